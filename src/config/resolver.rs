//! Precedence resolution for the daemon config.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. CLI flags, or their environment variables (`KEYWARD_DIR`, `KEYWARD_PORT`)
//! 2. The `--config` TOML file
//! 3. Built-in defaults

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::schema::{self, ConfigFile};
use crate::Result;
use crate::keybox::{DEFAULT_CRL_URL, MaintenanceSchedule};

/// Tracks where a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueSource {
    /// CLI flag or its environment variable
    Cli,
    /// The config file
    File,
    /// Built-in default value
    Default,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::Cli => write!(f, "cli"),
            ValueSource::File => write!(f, "file"),
            ValueSource::Default => write!(f, "default"),
        }
    }
}

/// A resolved value with its source.
#[derive(Debug, Clone, Serialize)]
pub struct Resolved<T> {
    pub value: T,
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    pub fn new(value: T, source: ValueSource) -> Self {
        Self { value, source }
    }
}

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_file: Option<PathBuf>,
    pub config_dir: Option<PathBuf>,
    pub port: Option<u16>,
}

/// Fully resolved daemon configuration.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonConfig {
    pub config_dir: Resolved<PathBuf>,
    pub port: Resolved<u16>,
    pub poll_interval_ms: u64,
    pub maintenance_initial_delay_secs: u64,
    pub maintenance_interval_secs: u64,
    pub oracle_url: String,
    pub oracle_timeout_secs: u64,
    pub notify_program: PathBuf,
    pub notify_timeout_secs: u64,
    /// The config file that was loaded, if any.
    pub config_file: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self::from_layers(&ConfigFile::default(), &ConfigOverrides::default())
    }
}

impl DaemonConfig {
    fn from_layers(file: &ConfigFile, overrides: &ConfigOverrides) -> Self {
        fn pick<T: Clone>(cli: &Option<T>, file: &Option<T>, default: T) -> Resolved<T> {
            match (cli, file) {
                (Some(v), _) => Resolved::new(v.clone(), ValueSource::Cli),
                (None, Some(v)) => Resolved::new(v.clone(), ValueSource::File),
                (None, None) => Resolved::new(default, ValueSource::Default),
            }
        }

        Self {
            config_dir: pick(
                &overrides.config_dir,
                &file.config_dir,
                PathBuf::from(schema::DEFAULT_CONFIG_DIR),
            ),
            port: pick(&overrides.port, &file.port, schema::DEFAULT_PORT),
            poll_interval_ms: file
                .poll_interval_ms
                .unwrap_or(schema::DEFAULT_POLL_INTERVAL_MS),
            maintenance_initial_delay_secs: file
                .maintenance_initial_delay_secs
                .unwrap_or(schema::DEFAULT_MAINTENANCE_INITIAL_DELAY_SECS),
            maintenance_interval_secs: file
                .maintenance_interval_secs
                .unwrap_or(schema::DEFAULT_MAINTENANCE_INTERVAL_SECS),
            oracle_url: file
                .oracle_url
                .clone()
                .unwrap_or_else(|| DEFAULT_CRL_URL.to_string()),
            oracle_timeout_secs: file
                .oracle_timeout_secs
                .unwrap_or(schema::DEFAULT_ORACLE_TIMEOUT_SECS),
            notify_program: file
                .notify_program
                .clone()
                .unwrap_or_else(|| PathBuf::from(schema::DEFAULT_NOTIFY_PROGRAM)),
            notify_timeout_secs: file
                .notify_timeout_secs
                .unwrap_or(schema::DEFAULT_NOTIFY_TIMEOUT_SECS),
            config_file: overrides.config_file.clone(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir.value
    }

    pub fn port(&self) -> u16 {
        self.port.value
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn schedule(&self) -> MaintenanceSchedule {
        MaintenanceSchedule {
            initial_delay: Duration::from_secs(self.maintenance_initial_delay_secs),
            interval: Duration::from_secs(self.maintenance_interval_secs),
        }
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_secs(self.oracle_timeout_secs)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs)
    }
}

/// Resolve the daemon config from the optional file and CLI overrides.
pub fn resolve_config(overrides: &ConfigOverrides) -> Result<DaemonConfig> {
    let file = match &overrides.config_file {
        Some(path) => ConfigFile::load(path)?,
        None => ConfigFile::default(),
    };
    Ok(DaemonConfig::from_layers(&file, overrides))
}
