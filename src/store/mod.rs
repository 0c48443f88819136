//! Filesystem-backed settings store.
//!
//! Every setting lives in its own file inside the config directory:
//!
//! - Flags are marker files. The file existing means `true`.
//! - Text settings are regular files whose content is the value.
//!
//! All content writes go through [`write_atomic`], which writes to a temp file
//! in the same directory and renames it over the target, so a reader never
//! sees half-written content. The store itself does not lock; callers hold the
//! shared lock in [`crate::state`] around every mutation.

mod setting;

pub use setting::{DRM_FIX_DEFAULT_CONTENT, Setting, SettingKind, SettingValue};

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Permissions for files written by the store (Unix: 0600).
#[cfg(unix)]
pub const FILE_MODE: u32 = 0o600;

/// Permissions for the config directory (Unix: 0700).
#[cfg(unix)]
pub const DIR_MODE: u32 = 0o700;

/// Snapshot of every setting, keyed by setting.
pub type Snapshot = BTreeMap<Setting, SettingValue>;

/// Marker-file key/value store rooted at the config directory.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    root: PathBuf,
}

impl ConfigStore {
    /// Open the store, creating the config directory (0700) if needed.
    pub fn open(root: &Path) -> Result<Self> {
        ensure_private_dir(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// The config directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn setting_path(&self, setting: Setting) -> PathBuf {
        self.root.join(setting.file_name())
    }

    /// Read one setting.
    pub fn get(&self, setting: Setting) -> Result<SettingValue> {
        let path = self.setting_path(setting);
        match setting.kind() {
            SettingKind::Flag => path
                .try_exists()
                .map(SettingValue::Flag)
                .map_err(|e| Error::store_io(&path, e)),
            SettingKind::Text => match fs::read_to_string(&path) {
                Ok(content) => Ok(SettingValue::Text(content)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    Ok(SettingValue::Text(String::new()))
                }
                Err(e) => Err(Error::store_io(&path, e)),
            },
        }
    }

    /// Convenience for flags; text settings read as `false`.
    pub fn is_enabled(&self, setting: Setting) -> Result<bool> {
        Ok(self.get(setting)?.as_flag().unwrap_or(false))
    }

    /// Write one setting.
    ///
    /// Switching a flag on creates its marker file (with the setting's payload,
    /// if it has one) unless it already exists; switching it off removes the
    /// file. Text values replace the file content atomically.
    pub fn set(&self, setting: Setting, value: &SettingValue) -> Result<()> {
        let path = self.setting_path(setting);
        match (setting.kind(), value) {
            (SettingKind::Flag, SettingValue::Flag(true)) => {
                let exists = path.try_exists().map_err(|e| Error::store_io(&path, e))?;
                if !exists {
                    let content = setting.enabled_content().unwrap_or("");
                    write_atomic(&path, content.as_bytes()).map_err(|e| Error::store_io(&path, e))?;
                }
                Ok(())
            }
            (SettingKind::Flag, SettingValue::Flag(false)) => match fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(Error::store_io(&path, e)),
            },
            (SettingKind::Text, SettingValue::Text(text)) => {
                write_atomic(&path, text.as_bytes()).map_err(|e| Error::store_io(&path, e))
            }
            (SettingKind::Flag, SettingValue::Text(_)) => Err(Error::InvalidInput(format!(
                "'{}' takes a boolean value",
                setting
            ))),
            (SettingKind::Text, SettingValue::Flag(_)) => Err(Error::InvalidInput(format!(
                "'{}' takes a text value",
                setting
            ))),
        }
    }

    /// Read every setting.
    pub fn snapshot(&self) -> Result<Snapshot> {
        Setting::ALL
            .iter()
            .map(|&setting| Ok((setting, self.get(setting)?)))
            .collect()
    }

    /// Read a file inside the config directory.
    ///
    /// The caller is responsible for validating `path`; see
    /// [`crate::server::guard::resolve_safe_path`].
    pub fn read_file(&self, path: &Path) -> Result<String> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::NotFound(
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            )),
            Err(e) => Err(Error::store_io(path, e)),
        }
    }

    /// Atomically replace a file inside the config directory.
    pub fn write_file(&self, path: &Path, content: &str) -> Result<()> {
        write_atomic(path, content.as_bytes()).map_err(|e| Error::store_io(path, e))
    }
}

/// Create `dir` (and parents) and restrict it to the owner.
pub fn ensure_private_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| Error::store_io(dir, e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(DIR_MODE))
            .map_err(|e| Error::store_io(dir, e))?;
    }
    Ok(())
}

/// Write `contents` to `path` via a temp file in the same directory and a rename.
///
/// The file ends up with owner-only permissions on Unix.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut tmp = tempfile::Builder::new()
        .prefix(".keyward-")
        .suffix(".tmp")
        .tempfile_in(parent)?;
    tmp.write_all(contents)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(FILE_MODE))?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestEnv;

    #[test]
    fn test_open_creates_directory() {
        let env = TestEnv::new();
        let nested = env.path().join("a").join("b");
        let store = ConfigStore::open(&nested).unwrap();
        assert!(store.root().is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn test_open_restricts_directory_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let env = TestEnv::new();
        let store = env.store();
        let mode = fs::metadata(store.root()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, DIR_MODE);
    }

    #[test]
    fn test_flag_round_trip_for_every_flag() {
        let env = TestEnv::new();
        let store = env.store();
        for setting in Setting::ALL.iter().filter(|s| s.kind() == SettingKind::Flag) {
            for value in [true, false, true, true, false, false] {
                store.set(*setting, &SettingValue::Flag(value)).unwrap();
                assert_eq!(store.get(*setting).unwrap(), SettingValue::Flag(value));
            }
        }
    }

    #[test]
    fn test_flag_is_marker_file_presence() {
        let env = TestEnv::new();
        let store = env.store();
        store
            .set(Setting::GlobalMode, &SettingValue::Flag(true))
            .unwrap();
        assert!(env.path().join("global_mode").exists());
        store
            .set(Setting::GlobalMode, &SettingValue::Flag(false))
            .unwrap();
        assert!(!env.path().join("global_mode").exists());
    }

    #[test]
    fn test_disabling_missing_flag_is_ok() {
        let env = TestEnv::new();
        let store = env.store();
        store
            .set(Setting::RkpBypass, &SettingValue::Flag(false))
            .unwrap();
        assert_eq!(
            store.get(Setting::RkpBypass).unwrap(),
            SettingValue::Flag(false)
        );
    }

    #[test]
    fn test_drm_fix_writes_payload_once() {
        let env = TestEnv::new();
        let store = env.store();
        store.set(Setting::DrmFix, &SettingValue::Flag(true)).unwrap();
        let path = env.path().join("drm_fix");
        assert_eq!(fs::read_to_string(&path).unwrap(), DRM_FIX_DEFAULT_CONTENT);

        // User edits survive re-enabling
        fs::write(&path, "custom=1\n").unwrap();
        store.set(Setting::DrmFix, &SettingValue::Flag(true)).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "custom=1\n");
    }

    #[test]
    fn test_text_round_trip() {
        let env = TestEnv::new();
        let store = env.store();
        assert_eq!(
            store.get(Setting::KeyboxSource).unwrap(),
            SettingValue::Text(String::new())
        );

        let value = SettingValue::Text("https://example.invalid/keybox.xml".to_string());
        store.set(Setting::KeyboxSource, &value).unwrap();
        assert_eq!(store.get(Setting::KeyboxSource).unwrap(), value);
        assert_eq!(
            fs::read_to_string(env.path().join("keybox_source.txt")).unwrap(),
            "https://example.invalid/keybox.xml"
        );
    }

    #[test]
    fn test_kind_mismatch_is_rejected() {
        let env = TestEnv::new();
        let store = env.store();
        assert!(matches!(
            store.set(Setting::GlobalMode, &SettingValue::Text("x".into())),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            store.set(Setting::SecurityPatch, &SettingValue::Flag(true)),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_snapshot_covers_every_setting() {
        let env = TestEnv::new();
        let store = env.store();
        store
            .set(Setting::HideSensitiveProps, &SettingValue::Flag(true))
            .unwrap();

        let snapshot = store.snapshot().unwrap();
        assert_eq!(snapshot.len(), Setting::ALL.len());
        assert_eq!(
            snapshot[&Setting::HideSensitiveProps],
            SettingValue::Flag(true)
        );
        assert_eq!(snapshot[&Setting::GlobalMode], SettingValue::Flag(false));
    }

    #[test]
    fn test_snapshot_serializes_with_string_keys() {
        let env = TestEnv::new();
        let store = env.store();
        let json = serde_json::to_value(store.snapshot().unwrap()).unwrap();
        assert_eq!(json["global_mode"], serde_json::json!(false));
        assert_eq!(json["keybox_source"], serde_json::json!(""));
    }

    #[test]
    fn test_write_atomic_leaves_no_temp_files() {
        let env = TestEnv::new();
        let target = env.path().join("target.txt");
        write_atomic(&target, b"com.example.app\n").unwrap();
        write_atomic(&target, b"com.example.other\n").unwrap();

        assert_eq!(fs::read_to_string(&target).unwrap(), "com.example.other\n");
        let leftovers: Vec<_> = fs::read_dir(env.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_write_atomic_sets_owner_only_mode() {
        use std::os::unix::fs::PermissionsExt;
        let env = TestEnv::new();
        let target = env.path().join("app_config");
        write_atomic(&target, b"").unwrap();
        let mode = fs::metadata(&target).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, FILE_MODE);
    }

    #[test]
    fn test_read_missing_file_is_not_found() {
        let env = TestEnv::new();
        let store = env.store();
        let err = store.read_file(&env.path().join("missing")).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
