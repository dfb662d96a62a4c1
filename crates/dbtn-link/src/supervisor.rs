//! Device discovery and connection lifecycle
//!
//! The supervisor loops forever: enumerate ports, try each candidate with a
//! `PING`/`PONG` handshake, adopt the first one that answers, then watch it
//! until it drops and start over. At most one adapter is ever current, and
//! it is the only one holding its endpoint open.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

use dbtn_core::prelude::*;
use dbtn_core::{DeviceState, LinkConfig};

use crate::adapter::LinkAdapter;
use crate::port::PortProvider;
use crate::state::DeviceStateStore;

/// Reads the link settings in effect right now
pub type LinkConfigSource = Arc<dyn Fn() -> LinkConfig + Send + Sync>;

/// How long the supervisor waits at each step
#[derive(Debug, Clone)]
pub struct SupervisorTimings {
    /// How long a candidate has to answer `PING`
    pub probe_timeout: Duration,
    /// Pause after a scan finds nothing
    pub rescan_backoff: Duration,
    /// How often a connected adapter is checked
    pub liveness_interval: Duration,
}

impl Default for SupervisorTimings {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(2),
            rescan_backoff: Duration::from_secs(3),
            liveness_interval: Duration::from_secs(1),
        }
    }
}

/// Where the supervisor is in its cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkPhase {
    Scanning,
    Verifying(String),
    Connected(String),
    Stopped,
}

/// Read access to whichever adapter is current
pub trait AdapterSource: Send + Sync {
    fn current_adapter(&self) -> Option<Arc<LinkAdapter>>;
}

/// Order in which ports are tried.
///
/// A configured port that is visible goes first (names compare
/// case-insensitively). The remaining visible ports follow in enumeration
/// order. A configured port that is not visible is skipped.
pub fn candidate_order(config: &LinkConfig, visible: &[String]) -> Vec<String> {
    let preferred = config.explicit_port().and_then(|wanted| {
        visible
            .iter()
            .find(|p| p.eq_ignore_ascii_case(wanted))
            .cloned()
    });

    let mut order = Vec::with_capacity(visible.len());
    if let Some(ref port) = preferred {
        order.push(port.clone());
    }
    for port in visible {
        if preferred.as_ref() != Some(port) && !order.contains(port) {
            order.push(port.clone());
        }
    }
    order
}

/// Owns the current [`LinkAdapter`] and the [`DeviceStateStore`]
pub struct LinkSupervisor {
    provider: Arc<dyn PortProvider>,
    config: LinkConfigSource,
    state: DeviceStateStore,
    timings: SupervisorTimings,
    current: Mutex<Option<Arc<LinkAdapter>>>,
    adapter_tx: watch::Sender<Option<Arc<LinkAdapter>>>,
    phase_tx: watch::Sender<LinkPhase>,
}

impl LinkSupervisor {
    pub fn new(
        provider: Arc<dyn PortProvider>,
        config: LinkConfigSource,
        state: DeviceStateStore,
    ) -> Self {
        let (adapter_tx, _) = watch::channel(None);
        let (phase_tx, _) = watch::channel(LinkPhase::Scanning);
        Self {
            provider,
            config,
            state,
            timings: SupervisorTimings::default(),
            current: Mutex::new(None),
            adapter_tx,
            phase_tx,
        }
    }

    pub fn with_timings(mut self, timings: SupervisorTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn device_state(&self) -> &DeviceStateStore {
        &self.state
    }

    /// Notified with the new adapter (or `None`) every time it changes
    pub fn subscribe_adapter(&self) -> watch::Receiver<Option<Arc<LinkAdapter>>> {
        self.adapter_tx.subscribe()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<LinkPhase> {
        self.phase_tx.subscribe()
    }

    pub fn phase(&self) -> LinkPhase {
        self.phase_tx.borrow().clone()
    }

    /// Run until `cancel` fires, then release the port
    pub async fn run(&self, cancel: CancellationToken) {
        info!("Link supervisor started");

        while !cancel.is_cancelled() {
            self.set_phase(LinkPhase::Scanning);

            let config = (self.config)();
            let ports = self.provider.available_ports();
            debug!("Scanning {} visible port(s): {:?}", ports.len(), ports);

            match self.find_device(&config, &ports, &cancel).await {
                Some(adapter) => {
                    let adapter = Arc::new(adapter);
                    let port = adapter.port_name().to_string();

                    self.state.replace(DeviceState::connected(
                        port.clone(),
                        adapter.baud_rate(),
                        ports,
                    ));
                    self.adopt(Arc::clone(&adapter)).await;
                    self.set_phase(LinkPhase::Connected(port.clone()));
                    info!("Device connected on {}", port);

                    self.watch_liveness(&adapter, &cancel).await;
                    if cancel.is_cancelled() {
                        break;
                    }

                    warn!("Device on {} disconnected", port);
                    self.retire().await;
                }
                None => {
                    debug!("{}", Error::LinkUnavailable);
                    self.state.replace(DeviceState::disconnected(ports));

                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.timings.rescan_backoff) => {}
                    }
                }
            }
        }

        self.shutdown().await;
        info!("Link supervisor stopped");
    }

    /// Dispose the current adapter and publish the disconnected state
    pub async fn shutdown(&self) {
        self.retire().await;
        self.set_phase(LinkPhase::Stopped);
    }

    async fn find_device(
        &self,
        config: &LinkConfig,
        ports: &[String],
        cancel: &CancellationToken,
    ) -> Option<LinkAdapter> {
        if let Some(wanted) = config.explicit_port() {
            if !ports.iter().any(|p| p.eq_ignore_ascii_case(wanted)) {
                debug!("Configured port {} is not visible", wanted);
            }
        }

        for port in candidate_order(config, ports) {
            if cancel.is_cancelled() {
                return None;
            }
            self.set_phase(LinkPhase::Verifying(port.clone()));
            if let Some(adapter) = self.try_port(&port, config.baud_rate, cancel).await {
                return Some(adapter);
            }
        }
        None
    }

    async fn try_port(
        &self,
        port: &str,
        baud_rate: u32,
        cancel: &CancellationToken,
    ) -> Option<LinkAdapter> {
        let adapter = match LinkAdapter::connect(self.provider.as_ref(), port, baud_rate) {
            Ok(adapter) => adapter,
            // Busy or vanished ports are expected while scanning
            Err(e) if e.is_recoverable() => {
                debug!("Skipping {}: {}", port, e);
                return None;
            }
            Err(e) => {
                warn!("Skipping {}: {}", port, e);
                return None;
            }
        };

        let alive = tokio::select! {
            _ = cancel.cancelled() => false,
            alive = adapter.probe(self.timings.probe_timeout) => alive,
        };

        if alive {
            Some(adapter)
        } else {
            debug!("No PONG from {}", port);
            adapter.disconnect().await;
            None
        }
    }

    /// Make `adapter` current, disposing whichever was current before
    async fn adopt(&self, adapter: Arc<LinkAdapter>) {
        let mut current = self.current.lock().await;
        if let Some(previous) = current.take() {
            previous.disconnect().await;
        }
        *current = Some(Arc::clone(&adapter));
        self.adapter_tx.send_replace(Some(adapter));
    }

    /// Dispose the current adapter, publish disconnected, announce `None`
    async fn retire(&self) {
        let mut current = self.current.lock().await;
        let previous = current.take();
        if let Some(ref adapter) = previous {
            adapter.disconnect().await;
        }

        self.state
            .replace(DeviceState::disconnected(self.provider.available_ports()));

        if previous.is_some() {
            self.adapter_tx.send_replace(None);
        }
    }

    async fn watch_liveness(&self, adapter: &LinkAdapter, cancel: &CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.timings.liveness_interval) => {
                    if !adapter.is_connected() {
                        return;
                    }
                }
            }
        }
    }

    fn set_phase(&self, phase: LinkPhase) {
        self.phase_tx.send_if_modified(|current| {
            if *current == phase {
                false
            } else {
                trace!("Link phase: {:?}", phase);
                *current = phase;
                true
            }
        });
    }
}

impl AdapterSource for LinkSupervisor {
    fn current_adapter(&self) -> Option<Arc<LinkAdapter>> {
        self.adapter_tx.borrow().clone()
    }
}
