//! Domain types shared between the link, CI, and orchestration layers

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Port identifier meaning "probe every visible port"
pub const AUTO_PORT: &str = "auto";

/// Baud rate the button firmware ships with
pub const DEFAULT_BAUD_RATE: u32 = 9600;

// ─────────────────────────────────────────────────────────────────
// Device link
// ─────────────────────────────────────────────────────────────────

/// Snapshot of the device connection as seen by the UI boundary.
///
/// Replaced wholesale on every transition, never patched field by field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceState {
    pub connected: bool,
    pub port_name: Option<String>,
    pub baud_rate: Option<u32>,
    pub available_ports: Vec<String>,
}

impl DeviceState {
    /// State published while scanning or after a disconnect
    pub fn disconnected(available_ports: Vec<String>) -> Self {
        Self {
            connected: false,
            port_name: None,
            baud_rate: None,
            available_ports,
        }
    }

    /// State published once a port answered the liveness probe
    pub fn connected(
        port_name: impl Into<String>,
        baud_rate: u32,
        available_ports: Vec<String>,
    ) -> Self {
        Self {
            connected: true,
            port_name: Some(port_name.into()),
            baud_rate: Some(baud_rate),
            available_ports,
        }
    }
}

/// Which port to use and how fast to talk to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Explicit port name, or `"auto"` to probe every visible port
    #[serde(default = "default_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

impl LinkConfig {
    /// The explicitly configured port, if any
    pub fn explicit_port(&self) -> Option<&str> {
        let port = self.port.trim();
        if port.is_empty() || port.eq_ignore_ascii_case(AUTO_PORT) {
            None
        } else {
            Some(port)
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
        }
    }
}

fn default_port() -> String {
    AUTO_PORT.to_string()
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

// ─────────────────────────────────────────────────────────────────
// CI
// ─────────────────────────────────────────────────────────────────

/// Connection details for the CI server.
///
/// Treated as an immutable value: a change produces a new client, never an
/// in-place update of a live one.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiConfig {
    #[serde(default)]
    pub base_url: String,

    #[serde(default)]
    pub build_configuration_id: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,
}

impl CiConfig {
    /// Base URL and build configuration are both present
    pub fn is_complete(&self) -> bool {
        !self.base_url.trim().is_empty() && !self.build_configuration_id.trim().is_empty()
    }

    /// Base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        self.base_url.trim().trim_end_matches('/')
    }
}

impl fmt::Debug for CiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CiConfig")
            .field("base_url", &self.base_url)
            .field("build_configuration_id", &self.build_configuration_id)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────
// Audio cues
// ─────────────────────────────────────────────────────────────────

/// Logical events that can have a sound attached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CueEvent {
    ButtonPressed,
    BuildQueued,
    BuildNotQueued,
    BuildSucceeded,
    BuildFailed,
}

impl fmt::Display for CueEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CueEvent::ButtonPressed => "button pressed",
            CueEvent::BuildQueued => "build queued",
            CueEvent::BuildNotQueued => "build not queued",
            CueEvent::BuildSucceeded => "build succeeded",
            CueEvent::BuildFailed => "build failed",
        };
        f.write_str(name)
    }
}

/// Sound identifiers per cue. An empty string disables the cue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoundMap {
    #[serde(default)]
    pub button_pressed: String,

    #[serde(default = "default_build_queued")]
    pub build_queued: String,

    #[serde(default = "default_build_not_queued")]
    pub build_not_queued: String,

    #[serde(default = "default_build_succeeded")]
    pub build_succeeded: String,

    #[serde(default = "default_build_failed")]
    pub build_failed: String,
}

impl Default for SoundMap {
    fn default() -> Self {
        Self {
            button_pressed: String::new(),
            build_queued: default_build_queued(),
            build_not_queued: default_build_not_queued(),
            build_succeeded: default_build_succeeded(),
            build_failed: default_build_failed(),
        }
    }
}

fn default_build_queued() -> String {
    "0003".to_string()
}

fn default_build_not_queued() -> String {
    "0014".to_string()
}

fn default_build_succeeded() -> String {
    "0024".to_string()
}

fn default_build_failed() -> String {
    "0012".to_string()
}

/// Volume plus the per-event sound table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioCueMap {
    /// Device volume, 0-30
    #[serde(default = "default_volume")]
    pub volume: u8,

    #[serde(default)]
    pub sounds: SoundMap,
}

impl AudioCueMap {
    /// Raw configured sound identifier for an event
    pub fn sound_for(&self, cue: CueEvent) -> &str {
        let sound = match cue {
            CueEvent::ButtonPressed => &self.sounds.button_pressed,
            CueEvent::BuildQueued => &self.sounds.build_queued,
            CueEvent::BuildNotQueued => &self.sounds.build_not_queued,
            CueEvent::BuildSucceeded => &self.sounds.build_succeeded,
            CueEvent::BuildFailed => &self.sounds.build_failed,
        };
        sound.trim()
    }
}

impl Default for AudioCueMap {
    fn default() -> Self {
        Self {
            volume: default_volume(),
            sounds: SoundMap::default(),
        }
    }
}

fn default_volume() -> u8 {
    15
}

// ─────────────────────────────────────────────────────────────────
// Deploy attempts
// ─────────────────────────────────────────────────────────────────

/// How a deploy attempt resolved (or where it currently stands)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployOutcome {
    /// Build enqueued, monitoring in progress
    Queued,
    /// Another trigger or a build on the server was already in flight
    AlreadyBuilding,
    Failed,
    Succeeded,
    TimedOut,
    /// Monitoring was superseded by a CI configuration change or shutdown
    Cancelled,
}

impl DeployOutcome {
    /// No further transitions will follow
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeployOutcome::Queued)
    }
}

impl fmt::Display for DeployOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeployOutcome::Queued => "queued",
            DeployOutcome::AlreadyBuilding => "already building",
            DeployOutcome::Failed => "failed",
            DeployOutcome::Succeeded => "succeeded",
            DeployOutcome::TimedOut => "timed out",
            DeployOutcome::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// One trigger-to-resolution deploy cycle. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployAttempt {
    pub attempt_id: u64,
    pub started_at: DateTime<Utc>,
    pub build_id: Option<String>,
    pub outcome: DeployOutcome,
}

impl DeployAttempt {
    pub fn new(attempt_id: u64, outcome: DeployOutcome) -> Self {
        Self {
            attempt_id,
            started_at: Utc::now(),
            build_id: None,
            outcome,
        }
    }

    /// Same attempt, moved to a new outcome
    pub fn with_outcome(&self, outcome: DeployOutcome) -> Self {
        Self {
            outcome,
            ..self.clone()
        }
    }

    pub fn with_build_id(mut self, build_id: impl Into<String>) -> Self {
        self.build_id = Some(build_id.into());
        self
    }
}
