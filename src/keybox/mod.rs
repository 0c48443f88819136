//! Keybox credential entries and their periodic maintenance.
//!
//! Entries are XML files. An enabled entry lives in `keyboxes/`; a disabled
//! one is moved into `keyboxes/revoked/`, which is what the hook layer looks at
//! when it picks a keybox. Entries are never deleted here.

mod maintainer;
mod notify;
mod oracle;

pub use maintainer::{CycleReport, EntryResult, KeyboxMaintainer, MaintenanceSchedule};
pub use notify::{CommandNotifier, Notification, NotificationSink, NotifyError};
pub use oracle::{CrlOracle, DEFAULT_CRL_URL, OracleError, ValidityOracle, parse_crl};

use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::store::{ensure_private_dir, write_atomic};
use crate::{Error, Result};

/// Directory (under the config dir) holding enabled entries.
pub const KEYBOX_DIR: &str = "keyboxes";
/// Directory (under [`KEYBOX_DIR`]) holding disabled entries.
pub const REVOKED_DIR: &str = "revoked";

/// Largest keybox file accepted on import.
pub const MAX_KEYBOX_BYTES: usize = 1024 * 1024;

/// Last known validity of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Validity {
    Valid,
    Revoked,
    Unknown,
}

impl std::fmt::Display for Validity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Validity::Valid => write!(f, "valid"),
            Validity::Revoked => write!(f, "revoked"),
            Validity::Unknown => write!(f, "unknown"),
        }
    }
}

/// One credential entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyboxEntry {
    /// File name, e.g. `device-a.xml`.
    pub id: String,
    pub status: Validity,
    pub enabled: bool,
    #[serde(skip)]
    pub path: PathBuf,
}

/// Check a keybox identifier: a plain `*.xml` file name.
pub fn is_valid_keybox_id(id: &str) -> bool {
    id.len() > ".xml".len()
        && id.len() <= 128
        && id.ends_with(".xml")
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// The set of keybox entries on disk plus their last known status.
#[derive(Debug)]
pub struct KeyboxRegistry {
    active_dir: PathBuf,
    revoked_dir: PathBuf,
    status: HashMap<String, Validity>,
}

impl KeyboxRegistry {
    /// Open the registry under `config_dir`, creating its directories.
    pub fn open(config_dir: &Path) -> Result<Self> {
        let active_dir = config_dir.join(KEYBOX_DIR);
        let revoked_dir = active_dir.join(REVOKED_DIR);
        ensure_private_dir(&active_dir)?;
        ensure_private_dir(&revoked_dir)?;
        Ok(Self {
            active_dir,
            revoked_dir,
            status: HashMap::new(),
        })
    }

    fn scan_dir(&self, dir: &Path, enabled: bool) -> Result<Vec<KeyboxEntry>> {
        let read = match fs::read_dir(dir) {
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::store_io(dir, e)),
        };

        let mut entries = Vec::new();
        for item in read {
            let item = item.map_err(|e| Error::store_io(dir, e))?;
            let name = item.file_name().to_string_lossy().into_owned();
            if !is_valid_keybox_id(&name) || !item.path().is_file() {
                continue;
            }
            let status = self
                .status
                .get(&name)
                .copied()
                .unwrap_or(Validity::Unknown);
            entries.push(KeyboxEntry {
                path: item.path(),
                id: name,
                status,
                enabled,
            });
        }
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entries)
    }

    /// Enabled entries, sorted by id.
    pub fn enabled_entries(&self) -> Result<Vec<KeyboxEntry>> {
        self.scan_dir(&self.active_dir, true)
    }

    /// Every entry, enabled first.
    pub fn list(&self) -> Result<Vec<KeyboxEntry>> {
        let mut entries = self.enabled_entries()?;
        entries.extend(self.scan_dir(&self.revoked_dir, false)?);
        Ok(entries)
    }

    pub fn enabled_count(&self) -> Result<usize> {
        Ok(self.enabled_entries()?.len())
    }

    /// Import a new entry (enabled).
    ///
    /// Fails if an entry with that id already exists in either directory.
    pub fn import(&mut self, id: &str, content: &str) -> Result<KeyboxEntry> {
        if !is_valid_keybox_id(id) {
            return Err(Error::InvalidInput("invalid keybox file name".to_string()));
        }
        if content.trim().is_empty() || content.len() > MAX_KEYBOX_BYTES {
            return Err(Error::InvalidInput("invalid keybox content".to_string()));
        }
        if !content.trim_start().starts_with('<') {
            return Err(Error::InvalidInput("keybox must be XML".to_string()));
        }

        let path = self.active_dir.join(id);
        for candidate in [&path, &self.revoked_dir.join(id)] {
            if candidate
                .try_exists()
                .map_err(|e| Error::store_io(candidate, e))?
            {
                return Err(Error::InvalidInput(format!("keybox '{}' already exists", id)));
            }
        }

        write_atomic(&path, content.as_bytes()).map_err(|e| Error::store_io(&path, e))?;
        self.status.remove(id);
        tracing::info!(keybox = %id, "imported keybox");
        Ok(KeyboxEntry {
            id: id.to_string(),
            status: Validity::Unknown,
            enabled: true,
            path,
        })
    }

    /// Enable or disable an entry by moving it between directories.
    ///
    /// Returns `Ok(true)` if the entry moved, `Ok(false)` if it was already in
    /// the requested state.
    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> Result<bool> {
        if !is_valid_keybox_id(id) {
            return Err(Error::InvalidInput("invalid keybox id".to_string()));
        }
        let active = self.active_dir.join(id);
        let revoked = self.revoked_dir.join(id);
        let (from, to) = if enabled {
            (revoked, active)
        } else {
            (active, revoked)
        };

        if to.try_exists().map_err(|e| Error::store_io(&to, e))? {
            return Ok(false);
        }
        match fs::rename(&from, &to) {
            Ok(()) => {
                tracing::info!(keybox = %id, enabled, "keybox state changed");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("keybox '{}'", id)))
            }
            Err(e) => Err(Error::store_io(&from, e)),
        }
    }

    /// Remember the outcome of a validity check.
    pub fn record_status(&mut self, id: &str, status: Validity) {
        self.status.insert(id.to_string(), status);
    }
}
