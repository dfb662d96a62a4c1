//! Owned holder for the current [`DeviceState`]

use std::sync::Arc;

use tokio::sync::watch;

use dbtn_core::DeviceState;

/// Single source of truth for the device connection snapshot.
///
/// Cloning shares the same holder. The supervisor is the only writer; the
/// UI boundary reads or subscribes.
#[derive(Debug, Clone)]
pub struct DeviceStateStore {
    tx: Arc<watch::Sender<DeviceState>>,
}

impl DeviceStateStore {
    /// Starts as disconnected with no visible ports
    pub fn new() -> Self {
        let (tx, _) = watch::channel(DeviceState::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> DeviceState {
        self.tx.borrow().clone()
    }

    /// Replace the snapshot atomically.
    ///
    /// Subscribers are only woken when the new snapshot differs from the old
    /// one. Returns whether it differed.
    pub fn replace(&self, state: DeviceState) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<DeviceState> {
        self.tx.subscribe()
    }
}

impl Default for DeviceStateStore {
    fn default() -> Self {
        Self::new()
    }
}
