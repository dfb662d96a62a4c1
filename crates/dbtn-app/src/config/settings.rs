//! Reading and writing `config.toml`

use std::path::{Path, PathBuf};

use dbtn_core::prelude::*;

use super::types::Settings;

const APP_DIR: &str = "deploy-button";
const CONFIG_FILENAME: &str = "config.toml";

/// `<config_dir>/deploy-button/config.toml`, or `./config.toml` when the
/// platform has no config directory
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR).join(CONFIG_FILENAME))
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILENAME))
}

/// Parse the settings file, reporting why it could not be used
pub fn try_load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Err(Error::ConfigNotFound {
            path: path.to_path_buf(),
        });
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::config(format!("Failed to read {}: {}", path.display(), e)))?;

    toml::from_str(&content)
        .map_err(|e| Error::config(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Load settings from `path`, falling back to defaults
pub fn load_settings(path: &Path) -> Settings {
    match try_load_settings(path) {
        Ok(settings) => {
            debug!("Loaded settings from {:?}", path);
            settings
        }
        Err(Error::ConfigNotFound { .. }) => {
            debug!("No config file at {:?}, using defaults", path);
            Settings::default()
        }
        Err(e) => {
            warn!("{}; using defaults", e);
            Settings::default()
        }
    }
}

/// Write a commented default config if none exists.
///
/// Returns whether a file was created.
pub fn init_config(path: &Path) -> Result<bool> {
    if path.exists() {
        debug!("Config already exists at {:?}", path);
        return Ok(false);
    }

    let dir = parent_dir(path);
    std::fs::create_dir_all(&dir)
        .map_err(|e| Error::config(format!("Failed to create {}: {}", dir.display(), e)))?;

    write_atomic(&dir, path, DEFAULT_CONFIG)?;

    info!("Created default config at {:?}", path);
    Ok(true)
}

/// Temp file in the same directory, then rename, so the watcher never reads
/// a half-written file
fn write_atomic(dir: &Path, path: &Path, content: &str) -> Result<()> {
    let temp_path = dir.join(format!(".{}.tmp", CONFIG_FILENAME));
    std::fs::write(&temp_path, content)
        .map_err(|e| Error::config(format!("Failed to write temp file: {}", e)))?;

    std::fs::rename(&temp_path, path)
        .map_err(|e| Error::config(format!("Failed to rename temp file: {}", e)))
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

const DEFAULT_CONFIG: &str = r#"# Deploy Button Configuration

[serial]
port = "auto"           # "auto" probes every port; or e.g. "COM3", "/dev/ttyUSB0"
baud_rate = 9600

[ci]
base_url = ""           # e.g. "https://teamcity.example.com"
build_configuration_id = ""
username = ""
password = ""

[audio]
volume = 15             # 0-30

[audio.sounds]
# Track numbers on the device's SD card (1-255). Empty disables the cue.
button_pressed = ""
build_queued = "0003"
build_not_queued = "0014"
build_succeeded = "0024"
build_failed = "0012"

[deploy]
poll_interval_secs = 5
max_polls = 120
timeout_secs = 3600
"#;
