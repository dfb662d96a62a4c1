//! Headless mode - NDJSON event output
//!
//! With `--json`, every [`UiEvent`] is written to stdout as one line of JSON
//! with a millisecond timestamp, so scripts and dashboards can follow the
//! button without parsing logs.
//!
//! # Example Output
//!
//! ```json
//! {"event":"device_state_changed","state":{"connected":true,"portName":"/dev/ttyUSB0","baudRate":9600,"availablePorts":["/dev/ttyUSB0"]},"timestamp":1704700001000}
//! {"event":"button_released","timestamp":1704700002000}
//! {"event":"build_status_changed","attempt":{"attemptId":1,"startedAt":"2024-01-08T08:00:02Z","buildId":"4711","outcome":"queued"},"timestamp":1704700002150}
//! ```

pub mod runner;

use chrono::Utc;
use serde::Serialize;
use std::io::{self, Write};
use tracing::error;

use dbtn_core::UiEvent;

/// A UI event stamped for output
#[derive(Debug, Serialize)]
pub struct HeadlessEvent<'a> {
    #[serde(flatten)]
    event: &'a UiEvent,
    timestamp: i64,
}

impl<'a> HeadlessEvent<'a> {
    pub fn new(event: &'a UiEvent) -> Self {
        Self {
            event,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Emit this event to stdout as JSON
    pub fn emit(&self) {
        let json = match serde_json::to_string(self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize headless event: {}", e);
                return;
            }
        };

        // Write to stdout with newline (NDJSON format)
        let mut stdout = io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{}", json) {
            error!("Failed to write headless event to stdout: {}", e);
            return;
        }
        if let Err(e) = stdout.flush() {
            error!("Failed to flush headless stdout: {}", e);
        }
    }
}
