//! Notifications pushed to UI clients
//!
//! The bus is one-way: the core publishes, subscribers only listen. Publishing
//! with no subscribers is not an error.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::types::{DeployAttempt, DeviceState};

/// Capacity of the UI broadcast channel. Slow subscribers see `Lagged`.
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Event delivered to UI clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum UiEvent {
    DeviceStateChanged { state: DeviceState },
    ButtonPressed,
    ButtonReleased,
    BuildStatusChanged { attempt: DeployAttempt },
}

impl UiEvent {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            UiEvent::DeviceStateChanged { .. } => "device_state_changed",
            UiEvent::ButtonPressed => "button_pressed",
            UiEvent::ButtonReleased => "button_released",
            UiEvent::BuildStatusChanged { .. } => "build_status_changed",
        }
    }
}

/// Cloneable handle to the UI broadcast channel
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<UiEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { tx }
    }

    /// Subscribe to all subsequent events
    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.tx.subscribe()
    }

    /// Broadcast an event to all subscribers
    pub fn publish(&self, event: UiEvent) {
        tracing::trace!("ui event: {}", event.name());
        // No subscribers is fine
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
