//! # dbtn-link - Serial Device Link
//!
//! Talks to the push-button device over a serial port. Depends on
//! `dbtn-core` for domain types and errors.
//!
//! ## Public API
//!
//! ### Wire protocol (`protocol`, `framing`)
//! - [`InboundCommand`], [`OutboundCommand`] - The line-based command vocabulary
//! - [`LineFramer`] - Reassembles newline-delimited lines from arbitrary reads
//!
//! ### Connection (`adapter`, `port`)
//! - [`LinkAdapter`] - One open endpoint: send, subscribe, probe, disconnect
//! - [`CommandStream`] - Lines received from the device
//! - [`PortProvider`] - Enumerates and opens endpoints
//! - [`SerialPortProvider`] - OS serial ports via `tokio-serial`
//!
//! ### Discovery (`supervisor`, `state`)
//! - [`LinkSupervisor`] - Scan, verify, adopt, watch, repeat
//! - [`DeviceStateStore`] - The published [`DeviceState`](dbtn_core::DeviceState)
//! - [`AdapterSource`] - Read access to the current adapter
//!
//! ## Testing
//!
//! With the `test-helpers` feature, [`test_utils`] provides an in-memory
//! [`PortProvider`] and a fake device that answers the probe.

pub mod adapter;
pub mod framing;
pub mod port;
pub mod protocol;
pub mod state;
pub mod supervisor;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;

pub use adapter::{CommandStream, LinkAdapter, BACKLOG_LIMIT};
pub use framing::{LineFramer, MAX_LINE_LEN};
pub use port::{LinkIo, LinkStream, PortProvider, SerialPortProvider};
pub use protocol::{InboundCommand, OutboundCommand};
pub use state::DeviceStateStore;
pub use supervisor::{
    candidate_order, AdapterSource, LinkConfigSource, LinkPhase, LinkSupervisor,
    SupervisorTimings,
};
