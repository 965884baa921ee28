use crate::error::{OtaError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable carrying the peripheral name prefix.
pub const NAME_PREFIX_ENV: &str = "WATCH_OTA_NAME_PREFIX";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Settings {
    /// Only peripherals whose name starts with this are eligible
    #[serde(default)]
    pub name_prefix: Option<String>,
    #[serde(default = "default_scan_duration_ms")]
    pub scan_duration_ms: u64,
    /// Bytes per chunk when splitting a raw image
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: Option<u64>,
    #[serde(default = "default_discovery_timeout_secs")]
    pub discovery_timeout_secs: Option<u64>,
    /// Per write/read timeout during transfer (null = wait forever)
    #[serde(default = "default_io_timeout_secs")]
    pub io_timeout_secs: Option<u64>,
    #[serde(default = "default_watchdog_interval_ms")]
    pub watchdog_interval_ms: u64,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_scan_duration_ms() -> u64 {
    5000
}
fn default_chunk_size() -> usize {
    16
}
fn default_connect_timeout_secs() -> Option<u64> {
    Some(15)
}
fn default_discovery_timeout_secs() -> Option<u64> {
    Some(10)
}
fn default_io_timeout_secs() -> Option<u64> {
    Some(5)
}
fn default_watchdog_interval_ms() -> u64 {
    2000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            name_prefix: None,
            scan_duration_ms: default_scan_duration_ms(),
            chunk_size: default_chunk_size(),
            connect_timeout_secs: default_connect_timeout_secs(),
            discovery_timeout_secs: default_discovery_timeout_secs(),
            io_timeout_secs: default_io_timeout_secs(),
            watchdog_interval_ms: default_watchdog_interval_ms(),
            log_dir: None,
        }
    }
}

/// Per-operation timeouts. `None` waits indefinitely.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Option<Duration>,
    pub discovery: Option<Duration>,
    pub io: Option<Duration>,
}

impl Settings {
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            connect: self.connect_timeout_secs.map(Duration::from_secs),
            discovery: self.discovery_timeout_secs.map(Duration::from_secs),
            io: self.io_timeout_secs.map(Duration::from_secs),
        }
    }

    /// Fill `name_prefix` from the environment when the file left it unset.
    /// An empty variable counts as unset.
    pub fn apply_env(&mut self) {
        if self.name_prefix.is_none() {
            self.name_prefix = std::env::var(NAME_PREFIX_ENV)
                .ok()
                .filter(|prefix| !prefix.is_empty());
        }
    }
}

/// Default settings location: `<config dir>/watch-ota/settings.json`.
pub fn default_settings_path() -> Result<PathBuf> {
    let dir = dirs::config_dir()
        .ok_or_else(|| OtaError::Config("Failed to get config dir".to_string()))?;
    Ok(dir.join("watch-ota").join("settings.json"))
}

/// Load settings from `path`, writing defaults there on first run.
pub fn load_settings(path: &Path) -> Result<Settings> {
    if path.exists() {
        let content = std::fs::read_to_string(path)
            .map_err(|e| OtaError::Config(format!("Failed to read settings: {}", e)))?;

        serde_json::from_str(&content)
            .map_err(|e| OtaError::Config(format!("Failed to parse settings: {}", e)))
    } else {
        let settings = Settings::default();
        save_settings(path, &settings)?;
        Ok(settings)
    }
}

pub fn save_settings(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| OtaError::Config(format!("Failed to create config dir: {}", e)))?;
    }
    let content = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, content)
        .map_err(|e| OtaError::Config(format!("Failed to write settings: {}", e)))
}
