//! # dbtn-app - Deploy Button Service
//!
//! Wires the device link to the CI client. Depends on `dbtn-core`,
//! `dbtn-link`, and `dbtn-ci`.
//!
//! ## Public API
//!
//! ### Engine (`engine`)
//! - [`Engine`] - Owns and runs every background loop
//!
//! ### Deploys (`orchestrator`, `dispatcher`)
//! - [`DeployOrchestrator`] - Trigger guard, CI calls, build monitoring
//! - [`CommandDispatcher`] - Device lines to UI events and triggers
//! - [`MonitorTimings`] - Poll interval, poll ceiling, absolute timeout
//!
//! ### Sound cues (`cue`)
//! - [`CueSink`] - Where cue events go
//! - [`SoundCuePlayer`] - Plays cues on the current device
//!
//! ### Configuration (`config`, `watcher`)
//! - [`ConfigStore`] - Published `Settings` snapshots
//! - [`ConfigWatcher`] - Reloads the store when `config.toml` changes
//!
//! ### Lifecycle (`signals`)
//! - [`spawn_signal_handler`] - SIGINT/SIGTERM cancel a shutdown token

pub mod config;
pub mod cue;
pub mod dispatcher;
pub mod engine;
pub mod orchestrator;
pub mod signals;
pub mod watcher;

pub use config::{ConfigStore, DeploySettings, Settings};
pub use cue::{cue_commands, CueSink, LocalCueSink, SoundCuePlayer};
pub use dispatcher::CommandDispatcher;
pub use engine::{Engine, ServiceOrchestrator};
pub use orchestrator::{DeployOrchestrator, MonitorTimings, TriggerOutcome};
pub use signals::spawn_signal_handler;
pub use watcher::ConfigWatcher;
