//! Config file watcher
//!
//! Watches the directory holding `config.toml` and reloads the
//! [`ConfigStore`] when the file changes, with debouncing so an editor's
//! save-rename-chmod burst produces one reload.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::RecursiveMode;
use notify_debouncer_full::{new_debouncer, DebounceEventResult};
use tokio::sync::oneshot;

use dbtn_core::prelude::*;

use crate::config::ConfigStore;

/// Default debounce duration in milliseconds
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Reloads a [`ConfigStore`] from disk on change
pub struct ConfigWatcher {
    store: ConfigStore,
    debounce: Duration,
    stop_tx: Option<oneshot::Sender<()>>,
}

impl ConfigWatcher {
    pub fn new(store: ConfigStore) -> Self {
        Self {
            store,
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            stop_tx: None,
        }
    }

    pub fn with_debounce_ms(mut self, ms: u64) -> Self {
        self.debounce = Duration::from_millis(ms);
        self
    }

    /// Start watching. The store must have a backing file path.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(Error::config("Config watcher is already running"));
        }

        let path = self
            .store
            .path()
            .map(Path::to_path_buf)
            .ok_or_else(|| Error::config("Config store has no file to watch"))?;

        let store = self.store.clone();
        let debounce = self.debounce;
        let (stop_tx, stop_rx) = oneshot::channel();
        self.stop_tx = Some(stop_tx);

        tokio::task::spawn_blocking(move || {
            run_watcher(path, store, debounce, stop_rx);
        });

        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }

    pub fn is_running(&self) -> bool {
        self.stop_tx.is_some()
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_watcher(
    config_path: PathBuf,
    store: ConfigStore,
    debounce: Duration,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let Some(file_name) = config_path.file_name().map(OsString::from) else {
        warn!("Config path {:?} has no file name", config_path);
        return;
    };
    let dir = match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let debouncer_result = new_debouncer(debounce, None, move |result: DebounceEventResult| {
        match result {
            Ok(events) => {
                let touched = events.iter().any(|event| {
                    event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == Some(file_name.as_os_str()))
                });
                if !touched {
                    return;
                }

                debug!("Config file changed on disk");
                if let Err(e) = store.reload() {
                    debug!("Reload skipped: {}", e);
                }
            }
            Err(errors) => {
                for error in errors {
                    warn!("Config watcher error: {:?}", error);
                }
            }
        }
    });

    let mut debouncer = match debouncer_result {
        Ok(d) => d,
        Err(e) => {
            error!("Failed to create config watcher: {}", e);
            return;
        }
    };

    if let Err(e) = debouncer.watch(&dir, RecursiveMode::NonRecursive) {
        warn!("Failed to watch {}: {}", dir.display(), e);
        return;
    }
    info!("Watching config: {}", config_path.display());

    loop {
        match stop_rx.try_recv() {
            Ok(()) | Err(oneshot::error::TryRecvError::Closed) => {
                debug!("Config watcher stopping");
                break;
            }
            Err(oneshot::error::TryRecvError::Empty) => {
                std::thread::sleep(Duration::from_millis(100));
            }
        }
    }
}
