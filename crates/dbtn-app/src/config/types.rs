//! Configuration types for `config.toml`

use std::time::Duration;

use serde::{Deserialize, Serialize};

use dbtn_core::{AudioCueMap, CiConfig, LinkConfig};

use crate::orchestrator::MonitorTimings;

/// Everything read from `config.toml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub serial: LinkConfig,

    #[serde(default)]
    pub ci: CiConfig,

    #[serde(default)]
    pub audio: AudioCueMap,

    #[serde(default)]
    pub deploy: DeploySettings,
}

/// Build monitoring limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploySettings {
    /// Seconds between build status polls
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Give up after this many polls
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,

    /// Give up after this long regardless of poll count
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            max_polls: default_max_polls(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl DeploySettings {
    pub fn monitor_timings(&self) -> MonitorTimings {
        MonitorTimings {
            poll_interval: Duration::from_secs(self.poll_interval_secs.max(1)),
            max_polls: self.max_polls.max(1),
            timeout: Duration::from_secs(self.timeout_secs.max(1)),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_max_polls() -> u32 {
    120
}

fn default_timeout_secs() -> u64 {
    3600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_default() {
        let settings = Settings::default();

        assert_eq!(settings.serial.port, "auto");
        assert_eq!(settings.serial.baud_rate, 9600);
        assert!(!settings.ci.is_complete());
        assert_eq!(settings.audio.volume, 15);
        assert_eq!(settings.audio.sounds.build_queued, "0003");
        assert_eq!(settings.deploy.poll_interval_secs, 5);
        assert_eq!(settings.deploy.max_polls, 120);
        assert_eq!(settings.deploy.timeout_secs, 3600);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let toml = r#"
[serial]
port = "COM4"

[ci]
base_url = "https://ci.example.com"
build_configuration_id = "Deploy_Prod"

[audio.sounds]
build_failed = "0099"
"#;
        let settings: Settings = toml::from_str(toml).unwrap();

        assert_eq!(settings.serial.port, "COM4");
        assert_eq!(settings.serial.baud_rate, 9600);
        assert!(settings.ci.is_complete());
        assert_eq!(settings.ci.username, "");
        assert_eq!(settings.audio.volume, 15);
        assert_eq!(settings.audio.sounds.build_failed, "0099");
        assert_eq!(settings.audio.sounds.build_succeeded, "0024");
        assert_eq!(settings.deploy, DeploySettings::default());
    }

    #[test]
    fn test_monitor_timings_conversion() {
        let deploy = DeploySettings {
            poll_interval_secs: 2,
            max_polls: 10,
            timeout_secs: 60,
        };
        let timings = deploy.monitor_timings();
        assert_eq!(timings.poll_interval, Duration::from_secs(2));
        assert_eq!(timings.max_polls, 10);
        assert_eq!(timings.timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_monitor_timings_floor_zero_values() {
        let deploy = DeploySettings {
            poll_interval_secs: 0,
            max_polls: 0,
            timeout_secs: 0,
        };
        let timings = deploy.monitor_timings();
        assert_eq!(timings.poll_interval, Duration::from_secs(1));
        assert_eq!(timings.max_polls, 1);
    }
}
