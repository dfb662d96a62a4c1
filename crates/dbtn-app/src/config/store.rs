//! Live configuration snapshots

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::watch;

use dbtn_core::prelude::*;
use dbtn_core::{AudioCueMap, CiConfig, LinkConfig};

use super::settings::{load_settings, try_load_settings};
use super::types::Settings;

/// Holds the current [`Settings`] and notifies subscribers on change.
///
/// Readers always get a whole immutable snapshot. Cloning shares the store.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: Option<PathBuf>,
    tx: Arc<watch::Sender<Arc<Settings>>>,
}

impl ConfigStore {
    /// Load from `path` (defaults if missing or invalid) and remember the
    /// path for [`reload`](Self::reload)
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = load_settings(&path);
        Self::with_path(Some(path), settings)
    }

    /// A store with no backing file
    pub fn in_memory(settings: Settings) -> Self {
        Self::with_path(None, settings)
    }

    fn with_path(path: Option<PathBuf>, settings: Settings) -> Self {
        let (tx, _) = watch::channel(Arc::new(settings));
        Self {
            path,
            tx: Arc::new(tx),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn current(&self) -> Arc<Settings> {
        Arc::clone(&self.tx.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Settings>> {
        self.tx.subscribe()
    }

    pub fn link_config(&self) -> LinkConfig {
        self.tx.borrow().serial.clone()
    }

    pub fn ci_config(&self) -> CiConfig {
        self.tx.borrow().ci.clone()
    }

    pub fn audio(&self) -> AudioCueMap {
        self.tx.borrow().audio.clone()
    }

    /// Publish a new snapshot. Returns whether it differed from the current one.
    pub fn replace(&self, settings: Settings) -> bool {
        self.tx.send_if_modified(|current| {
            if **current == settings {
                false
            } else {
                *current = Arc::new(settings);
                true
            }
        })
    }

    /// Re-read the backing file.
    ///
    /// A file that fails to parse keeps the previous snapshot. A deleted file
    /// reverts to defaults.
    pub fn reload(&self) -> Result<bool> {
        let Some(path) = self.path.as_deref() else {
            return Ok(false);
        };

        let settings = match try_load_settings(path) {
            Ok(settings) => settings,
            Err(Error::ConfigNotFound { .. }) => {
                debug!("Config file {:?} removed, reverting to defaults", path);
                Settings::default()
            }
            Err(e) => {
                warn!("Keeping previous settings: {}", e);
                return Err(e);
            }
        };

        let changed = self.replace(settings);
        if changed {
            info!("Configuration reloaded from {:?}", path);
        }
        Ok(changed)
    }
}
