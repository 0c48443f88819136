//! TOML schema for the daemon config file.
//!
//! Every field is optional; anything left out falls back to the built-in
//! default when the config is resolved.
//!
//! ```toml
//! config_dir = "/data/adb/keyward"
//! port = 0
//! poll_interval_ms = 2000
//! maintenance_initial_delay_secs = 60
//! maintenance_interval_secs = 86400
//! oracle_url = "https://android.googleapis.com/attestation/status"
//! oracle_timeout_secs = 10
//! notify_program = "cmd"
//! notify_timeout_secs = 5
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Default config directory.
pub const DEFAULT_CONFIG_DIR: &str = "/data/adb/keyward";
pub const DEFAULT_PORT: u16 = 0;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;
pub const DEFAULT_MAINTENANCE_INITIAL_DELAY_SECS: u64 = 60;
pub const DEFAULT_MAINTENANCE_INTERVAL_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_ORACLE_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_NOTIFY_PROGRAM: &str = "cmd";
pub const DEFAULT_NOTIFY_TIMEOUT_SECS: u64 = 5;

/// Contents of a config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub config_dir: Option<PathBuf>,
    pub port: Option<u16>,
    pub poll_interval_ms: Option<u64>,
    pub maintenance_initial_delay_secs: Option<u64>,
    pub maintenance_interval_secs: Option<u64>,
    pub oracle_url: Option<String>,
    pub oracle_timeout_secs: Option<u64>,
    pub notify_program: Option<PathBuf>,
    pub notify_timeout_secs: Option<u64>,
}

impl ConfigFile {
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: ConfigFile = toml::from_str(text)?;
        config.validate().map_err(Error::InvalidInput)?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::store_io(path, e))?;
        Self::from_toml(&text)
    }

    /// Validate the config values.
    ///
    /// Returns an error message if any value is invalid.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.poll_interval_ms == Some(0) {
            return Err("poll_interval_ms must be greater than 0".to_string());
        }
        if self.maintenance_interval_secs == Some(0) {
            return Err("maintenance_interval_secs must be greater than 0".to_string());
        }
        for (name, value) in [
            ("oracle_timeout_secs", self.oracle_timeout_secs),
            ("notify_timeout_secs", self.notify_timeout_secs),
        ] {
            if value == Some(0) {
                return Err(format!("{} must be greater than 0", name));
            }
        }
        if let Some(url) = &self.oracle_url {
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                return Err("oracle_url must be an http(s) URL".to_string());
            }
        }
        if let Some(dir) = &self.config_dir {
            if !dir.is_absolute() {
                return Err("config_dir must be an absolute path".to_string());
            }
        }
        Ok(())
    }
}
