//! Service runner - the engine loop behind `dbtn`
//!
//! Builds the engine against real serial ports and TeamCity, relays UI
//! events to stdout or the log, and shuts down on SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use dbtn_app::{spawn_signal_handler, ConfigStore, Engine};
use dbtn_ci::TeamCityClientFactory;
use dbtn_core::prelude::{Result, ResultExt};
use dbtn_core::UiEvent;
use dbtn_link::{PortProvider, SerialPortProvider};

use super::HeadlessEvent;

/// Run until a termination signal arrives
pub async fn run_service(config_path: PathBuf, json: bool) -> Result<()> {
    info!("═══════════════════════════════════════════════════════");
    info!("Deploy button starting");
    info!("Config: {}", config_path.display());
    info!("═══════════════════════════════════════════════════════");

    let store = ConfigStore::load(&config_path);
    let provider: Arc<dyn PortProvider> = Arc::new(SerialPortProvider::new());
    let mut engine = Engine::new(store, provider, TeamCityClientFactory)
        .context("Failed to start the deploy engine")?;

    let shutdown = engine.shutdown_token();
    spawn_signal_handler(shutdown.clone());

    let mut events = engine.subscribe();
    engine.start(true);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Ok(event) => relay(&event, json),
                Err(RecvError::Lagged(skipped)) => warn!("Dropped {} UI event(s)", skipped),
                Err(RecvError::Closed) => break,
            },
        }
    }

    engine.shutdown().await;
    info!("Deploy button exiting");
    Ok(())
}

fn relay(event: &UiEvent, json: bool) {
    if json {
        HeadlessEvent::new(event).emit();
        return;
    }

    match event {
        UiEvent::DeviceStateChanged { state } if state.connected => info!(
            "Device connected on {} at {} baud",
            state.port_name.as_deref().unwrap_or("?"),
            state.baud_rate.unwrap_or_default()
        ),
        UiEvent::DeviceStateChanged { state } => {
            info!("Device disconnected ({} port(s) visible)", state.available_ports.len())
        }
        UiEvent::BuildStatusChanged { attempt } => info!(
            "Deploy attempt {}: {} (build {})",
            attempt.attempt_id,
            attempt.outcome,
            attempt.build_id.as_deref().unwrap_or("-")
        ),
        other => debug!("UI event: {}", other.name()),
    }
}
