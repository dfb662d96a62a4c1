//! Error types shared by every deploy-button crate

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types organized by layer
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Device Link Errors
    // ─────────────────────────────────────────────────────────────
    #[error("No device answered the liveness probe on any visible port")]
    LinkUnavailable,

    #[error("Failed to open serial port {port}: {reason}")]
    PortOpen { port: String, reason: String },

    #[error("Device link error: {message}")]
    LinkIo { message: String },

    // ─────────────────────────────────────────────────────────────
    // CI Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Invalid CI configuration: {message}")]
    CiConfigInvalid { message: String },

    #[error("CI transport error: {message}")]
    CiTransport { message: String },

    #[error("CI server rejected the request with HTTP {status}: {body}")]
    CiStatus { status: u16, body: String },

    #[error("Build {build_id} did not reach a terminal status in time")]
    CiTimeout { build_id: String },

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    // ─────────────────────────────────────────────────────────────
    // Lifecycle Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Signal handling error: {message}")]
    Signal { message: String },
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn port_open(port: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PortOpen {
            port: port.into(),
            reason: reason.into(),
        }
    }

    pub fn link_io(message: impl Into<String>) -> Self {
        Self::LinkIo {
            message: message.into(),
        }
    }

    pub fn ci_config_invalid(message: impl Into<String>) -> Self {
        Self::CiConfigInvalid {
            message: message.into(),
        }
    }

    pub fn ci_transport(message: impl Into<String>) -> Self {
        Self::CiTransport {
            message: message.into(),
        }
    }

    pub fn ci_status(status: u16, body: impl Into<String>) -> Self {
        Self::CiStatus {
            status,
            body: body.into(),
        }
    }

    pub fn ci_timeout(build_id: impl Into<String>) -> Self {
        Self::CiTimeout {
            build_id: build_id.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn signal(message: impl Into<String>) -> Self {
        Self::Signal {
            message: message.into(),
        }
    }

    /// Check if this is a recoverable error
    ///
    /// Recoverable errors are retried by the loop that hit them (rediscovery,
    /// the next poll) instead of ending the current operation.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::LinkUnavailable
                | Error::LinkIo { .. }
                | Error::PortOpen { .. }
                | Error::CiTransport { .. }
        )
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Log the error under `context` and pass it on unchanged
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }
}
