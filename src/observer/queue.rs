//! Trigger files: one-shot commands dropped into the config directory.
//!
//! Each trigger is consumed exactly once. Draining first renames the file to
//! a private claim name, so a writer that publishes the same trigger again
//! while the handler runs is left for the next drain. The claimed file is
//! removed after its handler runs, whether the handler succeeded or not, so a
//! bad trigger can never wedge the queue.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use crate::store::write_atomic;
use crate::{Error, Result};

/// Largest trigger payload accepted.
pub const MAX_TRIGGER_BYTES: u64 = 256;

/// Known trigger files, in dispatch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    /// Content is a profile name.
    ApplyProfile,
    /// Content is ignored; runs a keybox maintenance cycle.
    ScanKeyboxes,
}

impl TriggerKind {
    pub const ALL: [TriggerKind; 2] = [TriggerKind::ApplyProfile, TriggerKind::ScanKeyboxes];

    pub fn file_name(&self) -> &'static str {
        match self {
            Self::ApplyProfile => "apply_profile",
            Self::ScanKeyboxes => "scan_keyboxes",
        }
    }

    pub fn from_file_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.file_name() == name)
    }
}

/// The trigger files under one config directory.
#[derive(Debug, Clone)]
pub struct TriggerQueue {
    root: PathBuf,
}

impl TriggerQueue {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    fn path(&self, kind: TriggerKind) -> PathBuf {
        self.root.join(kind.file_name())
    }

    fn claim_path(&self, kind: TriggerKind) -> PathBuf {
        self.root.join(format!(".keyward-claim-{}", kind.file_name()))
    }

    /// Move the trigger aside. `Ok(false)` when it vanished first.
    fn claim(&self, kind: TriggerKind) -> io::Result<bool> {
        let claimed = self.claim_path(kind);
        // A stale directory at the claim name would make every rename fail.
        if fs::symlink_metadata(&claimed).is_ok_and(|m| m.is_dir()) {
            discard(&claimed)?;
        }
        match fs::rename(self.path(kind), &claimed) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Publish a trigger atomically so the observer never reads a partial file.
    pub fn enqueue(&self, kind: TriggerKind, content: &str) -> Result<()> {
        if content.len() as u64 > MAX_TRIGGER_BYTES {
            return Err(Error::InvalidInput("trigger content too long".to_string()));
        }
        let path = self.path(kind);
        write_atomic(&path, content.as_bytes()).map_err(|e| Error::store_io(&path, e))
    }

    /// Triggers currently waiting, in dispatch order.
    pub fn pending(&self) -> Vec<TriggerKind> {
        TriggerKind::ALL
            .iter()
            .copied()
            .filter(|k| fs::symlink_metadata(self.path(*k)).is_ok())
            .collect()
    }

    fn read_content(path: &Path) -> Result<String> {
        let meta = fs::symlink_metadata(path).map_err(|e| Error::store_io(path, e))?;
        if !meta.is_file() {
            return Err(Error::InvalidInput("trigger is not a regular file".to_string()));
        }
        if meta.len() > MAX_TRIGGER_BYTES {
            return Err(Error::InvalidInput(format!(
                "trigger larger than {} bytes",
                MAX_TRIGGER_BYTES
            )));
        }

        let mut raw = Vec::new();
        fs::File::open(path)
            .and_then(|f| f.take(MAX_TRIGGER_BYTES + 1).read_to_end(&mut raw))
            .map_err(|e| Error::store_io(path, e))?;
        if raw.len() as u64 > MAX_TRIGGER_BYTES {
            return Err(Error::InvalidInput("trigger grew while reading".to_string()));
        }
        let content = String::from_utf8(raw)
            .map_err(|_| Error::InvalidInput("trigger is not UTF-8".to_string()))?;
        Ok(content.trim().to_string())
    }

    /// Consume every pending trigger, calling `handle` with its trimmed content.
    ///
    /// Invalid content skips the handler. Handler errors are logged. In every
    /// case the file is removed. Returns the number of triggers consumed.
    pub fn drain<F>(&self, mut handle: F) -> usize
    where
        F: FnMut(TriggerKind, &str) -> Result<()>,
    {
        let mut consumed = 0;
        for kind in self.pending() {
            match self.claim(kind) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    tracing::error!(trigger = kind.file_name(), error = %e, "failed to claim trigger");
                    continue;
                }
            }

            let path = self.claim_path(kind);
            match Self::read_content(&path) {
                Ok(content) => {
                    tracing::info!(trigger = kind.file_name(), "processing trigger");
                    if let Err(e) = handle(kind, &content) {
                        tracing::error!(trigger = kind.file_name(), error = %e, "trigger handler failed");
                    }
                }
                Err(e) => {
                    tracing::error!(trigger = kind.file_name(), error = %e, "rejected trigger");
                }
            }

            if let Err(e) = discard(&path) {
                tracing::error!(trigger = kind.file_name(), error = %e, "failed to remove trigger");
            }
            consumed += 1;
        }
        consumed
    }
}

/// Remove a claimed trigger, whatever kind of entry it turned out to be.
fn discard(path: &Path) -> io::Result<()> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) => Err(e),
    };
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
