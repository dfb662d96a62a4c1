//! Engine - shared wiring for the deploy button service
//!
//! The Engine owns every long-running piece: the link supervisor, the command
//! dispatcher, the deploy orchestrator, config reconciliation, and the file
//! watcher. Frontends (the CLI, tests) construct one, call [`Engine::start`],
//! subscribe to [`UiEvent`]s, and call [`Engine::shutdown`] on the way out.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use dbtn_ci::CiClientFactory;
use dbtn_core::prelude::*;
use dbtn_core::{EventBus, UiEvent};
use dbtn_link::{
    AdapterSource, DeviceStateStore, LinkConfigSource, LinkSupervisor, PortProvider,
    SupervisorTimings,
};

use crate::config::{ConfigStore, Settings};
use crate::cue::SoundCuePlayer;
use crate::dispatcher::CommandDispatcher;
use crate::orchestrator::DeployOrchestrator;
use crate::watcher::ConfigWatcher;

pub type ServiceOrchestrator<F> = DeployOrchestrator<F, SoundCuePlayer>;

pub struct Engine<F: CiClientFactory> {
    config: ConfigStore,
    events: EventBus,
    supervisor: Arc<LinkSupervisor>,
    orchestrator: Arc<ServiceOrchestrator<F>>,
    dispatcher: Arc<CommandDispatcher<F, SoundCuePlayer>>,
    watcher: Option<ConfigWatcher>,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

impl<F: CiClientFactory> Engine<F> {
    /// Build an engine with the default link timings
    pub fn new(config: ConfigStore, provider: Arc<dyn PortProvider>, factory: F) -> Result<Self> {
        Self::with_link_timings(config, provider, factory, SupervisorTimings::default())
    }

    /// Build an engine. Nothing runs until [`Engine::start`].
    ///
    /// `[deploy]` timings are taken from the settings at this point; the CI
    /// section is re-applied whenever the store changes.
    pub fn with_link_timings(
        config: ConfigStore,
        provider: Arc<dyn PortProvider>,
        factory: F,
        link_timings: SupervisorTimings,
    ) -> Result<Self> {
        let events = EventBus::new();
        let settings = config.current();

        let link_store = config.clone();
        let link_config: LinkConfigSource = Arc::new(move || link_store.link_config());
        let supervisor = Arc::new(
            LinkSupervisor::new(provider, link_config, DeviceStateStore::new())
                .with_timings(link_timings),
        );

        let cues = Arc::new(SoundCuePlayer::new(
            Arc::clone(&supervisor) as Arc<dyn AdapterSource>,
            config.clone(),
        ));
        let orchestrator = Arc::new(DeployOrchestrator::new(
            factory,
            settings.ci.clone(),
            cues,
            events.clone(),
            settings.deploy.monitor_timings(),
        )?);
        let dispatcher = Arc::new(CommandDispatcher::new(
            Arc::clone(&orchestrator),
            events.clone(),
        ));

        Ok(Self {
            config,
            events,
            supervisor,
            orchestrator,
            dispatcher,
            watcher: None,
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Spawn the background loops. Must be called inside a Tokio runtime.
    ///
    /// With `watch_config`, a file-backed store is reloaded when the file
    /// changes on disk.
    pub fn start(&mut self, watch_config: bool) {
        info!("Starting deploy button engine");

        let supervisor = Arc::clone(&self.supervisor);
        let cancel = self.shutdown.clone();
        self.tasks.spawn(async move { supervisor.run(cancel).await });

        let dispatcher = Arc::clone(&self.dispatcher);
        let adapters = self.supervisor.subscribe_adapter();
        let cancel = self.shutdown.clone();
        self.tasks
            .spawn(async move { dispatcher.run(adapters, cancel).await });

        self.tasks.spawn(forward_device_state(
            self.supervisor.device_state().clone(),
            self.events.clone(),
            self.shutdown.clone(),
        ));

        self.tasks.spawn(reconcile_ci_config(
            self.config.subscribe(),
            Arc::clone(&self.orchestrator),
            self.shutdown.clone(),
        ));

        if watch_config && self.config.path().is_some() {
            let mut watcher = ConfigWatcher::new(self.config.clone());
            match watcher.start() {
                Ok(()) => self.watcher = Some(watcher),
                Err(e) => warn!("Config file will not be watched: {}", e),
            }
        }
    }

    /// Token that stops the engine when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn supervisor(&self) -> &Arc<LinkSupervisor> {
        &self.supervisor
    }

    pub fn orchestrator(&self) -> &Arc<ServiceOrchestrator<F>> {
        &self.orchestrator
    }

    /// Stop every loop, wait for in-flight deploy tasks, release the port
    pub async fn shutdown(&mut self) {
        info!("Shutting down deploy button engine");
        self.shutdown.cancel();

        if let Some(mut watcher) = self.watcher.take() {
            watcher.stop();
        }

        self.tasks.close();
        self.tasks.wait().await;

        self.orchestrator.shutdown().await;
        self.supervisor.shutdown().await;
        info!("Engine stopped");
    }
}

/// Mirror every device state change onto the UI bus, starting with the current one
async fn forward_device_state(
    state: DeviceStateStore,
    events: EventBus,
    cancel: CancellationToken,
) {
    let mut rx = state.subscribe();
    loop {
        let snapshot = rx.borrow_and_update().clone();
        events.publish(UiEvent::DeviceStateChanged { state: snapshot });

        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}

/// Hand CI config changes to the orchestrator so it can swap clients
///
/// The first pass applies whatever is current, covering changes made between
/// construction and start.
async fn reconcile_ci_config<F: CiClientFactory>(
    mut rx: watch::Receiver<Arc<Settings>>,
    orchestrator: Arc<ServiceOrchestrator<F>>,
    cancel: CancellationToken,
) {
    loop {
        let ci = rx.borrow_and_update().ci.clone();
        match orchestrator.apply_ci_config(ci).await {
            Ok(true) => debug!("CI client reconfigured"),
            Ok(false) => trace!("CI section unchanged"),
            Err(e) => warn!("Keeping previous CI client: {}", e),
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}
