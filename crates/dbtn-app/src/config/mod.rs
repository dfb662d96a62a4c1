//! Configuration for the deploy button
//!
//! A single `config.toml` holds the serial, CI, audio, and deploy sections.
//! [`ConfigStore`] publishes snapshots; [`ConfigWatcher`](crate::watcher::ConfigWatcher)
//! reloads it when the file changes.

pub mod settings;
pub mod store;
pub mod types;

pub use settings::{default_config_path, init_config, load_settings, try_load_settings};
pub use store::ConfigStore;
pub use types::{DeploySettings, Settings};
