//! # dbtn-core - Core Domain Types
//!
//! Foundation crate for the deploy button. Provides domain types, error
//! handling, the UI event bus, and logging setup.
//!
//! This crate has **zero internal dependencies**.
//!
//! ## Public API
//!
//! ### Domain Types (`types`)
//! - [`DeviceState`] - Connection snapshot published to the UI
//! - [`LinkConfig`] - Serial port selection and baud rate
//! - [`CiConfig`] - CI server base URL, build configuration, credentials
//! - [`AudioCueMap`], [`CueEvent`] - Sound identifiers per logical event
//! - [`DeployAttempt`], [`DeployOutcome`] - One trigger-to-resolution cycle
//!
//! ### Events (`events`)
//! - [`UiEvent`] - Notifications for UI clients
//! - [`EventBus`] - One-way broadcast of [`UiEvent`]s
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Error enum with `recoverable` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ## Prelude
//!
//! ```rust
//! use dbtn_core::prelude::*;
//! ```

pub mod error;
pub mod events;
pub mod logging;
pub mod prelude;
pub mod types;

pub use error::{Error, Result, ResultExt};
pub use events::{EventBus, UiEvent, EVENT_BUS_CAPACITY};
pub use types::{
    AudioCueMap, CiConfig, CueEvent, DeployAttempt, DeployOutcome, DeviceState, LinkConfig,
    SoundMap, AUTO_PORT, DEFAULT_BAUD_RATE,
};
