//! Command implementations for the Keyward CLI.
//!
//! Every command returns a result type implementing [`Output`], which the
//! binary prints as JSON or, with `-H`, as plain text.
//!
//! Commands that touch settings or keyboxes hold the config directory's
//! [`DirLock`] for their whole read or write, so they never interleave with
//! a running daemon.

use serde::Serialize;
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::keybox::{KeyboxEntry, KeyboxRegistry};
use crate::observer::{TriggerKind, TriggerQueue};
use crate::profile::{Profile, ProfileOutcome, apply_profile};
use crate::server::validate::validate_content;
use crate::server::{ServerInfo, StateFile};
use crate::state::DirLock;
use crate::store::{ConfigStore, Setting, SettingKind, SettingValue, Snapshot};
use crate::{Error, Result};

/// Command results that can be serialized to JSON or formatted for humans.
pub trait Output {
    /// Serialize to JSON string.
    fn to_json(&self) -> String;

    /// Format for human-readable output.
    fn to_human(&self) -> String;
}

fn json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!(r#"{{"error": "{}"}}"#, e))
}

fn format_settings(settings: &Snapshot) -> String {
    settings
        .iter()
        .map(|(setting, value)| match value {
            SettingValue::Text(text) if text.contains('\n') => {
                format!("{}: ({} lines)", setting, text.lines().count())
            }
            _ => format!("{}: {}", setting, value),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// === Status ===

#[derive(Serialize)]
pub struct StatusResult {
    pub config_dir: PathBuf,
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub settings: Snapshot,
    pub keyboxes_enabled: usize,
}

impl Output for StatusResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut lines = Vec::new();
        match (self.running, self.port) {
            (true, Some(port)) => lines.push(format!("Daemon: running on 127.0.0.1:{}", port)),
            (false, Some(port)) => lines.push(format!(
                "Daemon: not responding (stale state file for port {})",
                port
            )),
            _ => lines.push("Daemon: not running".to_string()),
        }
        if let Some(url) = &self.url {
            lines.push(format!("Admin UI: {}", url));
        }
        lines.push(format!("Config dir: {}", self.config_dir.display()));
        lines.push(format!("Active keyboxes: {}", self.keyboxes_enabled));
        lines.push(String::new());
        lines.push(format_settings(&self.settings));
        lines.join("\n")
    }
}

fn probe(info: &ServerInfo) -> bool {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, info.port));
    TcpStream::connect_timeout(&addr, Duration::from_millis(500)).is_ok()
}

/// Report whether the daemon is up, plus the current settings.
///
/// Does not create the config directory.
pub fn status(config_dir: &Path) -> Result<StatusResult> {
    if !config_dir.is_dir() {
        return Err(Error::NotFound(format!(
            "config directory {} does not exist",
            config_dir.display()
        )));
    }

    let state_file = StateFile::new(config_dir);
    let info = state_file
        .read()
        .map_err(|e| Error::store_io(state_file.path(), e))?;
    let running = info.as_ref().is_some_and(probe);

    let store = ConfigStore::open(config_dir)?;
    let registry = KeyboxRegistry::open(config_dir)?;
    let _lock = DirLock::exclusive(config_dir)?;

    Ok(StatusResult {
        config_dir: config_dir.to_path_buf(),
        running,
        port: info.as_ref().map(|i| i.port),
        url: info.filter(|_| running).map(|i| i.ui_url()),
        settings: store.snapshot()?,
        keyboxes_enabled: registry.enabled_count()?,
    })
}

// === Config ===

#[derive(Serialize)]
#[serde(untagged)]
pub enum ConfigGetResult {
    One {
        setting: Setting,
        value: SettingValue,
    },
    All {
        settings: Snapshot,
    },
}

impl Output for ConfigGetResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        match self {
            Self::One { value, .. } => value.to_string(),
            Self::All { settings } => format_settings(settings),
        }
    }
}

/// Read one setting by name, or every setting.
pub fn config_get(config_dir: &Path, key: Option<&str>) -> Result<ConfigGetResult> {
    let store = ConfigStore::open(config_dir)?;
    let _lock = DirLock::exclusive(config_dir)?;
    match key {
        Some(key) => {
            let setting: Setting = key.parse()?;
            Ok(ConfigGetResult::One {
                setting,
                value: store.get(setting)?,
            })
        }
        None => Ok(ConfigGetResult::All {
            settings: store.snapshot()?,
        }),
    }
}

#[derive(Serialize)]
pub struct ConfigSetResult {
    pub setting: Setting,
    pub value: SettingValue,
}

impl Output for ConfigSetResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        match self.setting.kind() {
            SettingKind::Flag => format!("Set {} = {}", self.setting, self.value),
            SettingKind::Text => format!("Updated {}", self.setting),
        }
    }
}

/// Set one setting. Text values get the same checks as the admin UI applies.
pub fn config_set(config_dir: &Path, key: &str, raw: &str) -> Result<ConfigSetResult> {
    let setting: Setting = key.parse()?;
    let value = SettingValue::parse_for(setting, raw)?;
    if let SettingValue::Text(text) = &value {
        validate_content(setting.file_name(), text).map_err(Error::InvalidInput)?;
    }

    let store = ConfigStore::open(config_dir)?;
    let _lock = DirLock::exclusive(config_dir)?;
    store.set(setting, &value)?;
    Ok(ConfigSetResult {
        setting,
        value: store.get(setting)?,
    })
}

// === Profiles ===

#[derive(Serialize)]
pub struct ProfileSummary {
    pub name: &'static str,
    pub enables: Vec<Setting>,
}

#[derive(Serialize)]
pub struct ProfileListResult {
    pub profiles: Vec<ProfileSummary>,
}

impl Output for ProfileListResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        self.profiles
            .iter()
            .map(|p| {
                let enables = if p.enables.is_empty() {
                    "(all managed flags off)".to_string()
                } else {
                    p.enables
                        .iter()
                        .map(|s| s.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                format!("{:<12} {}", p.name, enables)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// The built-in profiles and the flags each one turns on.
pub fn profile_list() -> ProfileListResult {
    let profiles = Profile::ALL
        .iter()
        .map(|profile| ProfileSummary {
            name: profile.name(),
            enables: profile
                .entries()
                .into_iter()
                .filter(|(_, on)| *on)
                .map(|(setting, _)| setting)
                .collect(),
        })
        .collect();
    ProfileListResult { profiles }
}

#[derive(Serialize)]
pub struct ProfileApplyResult {
    pub profile: Profile,
    /// `true` when handed to the daemon, `false` when written directly.
    pub queued: bool,
}

impl Output for ProfileApplyResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.queued {
            format!("Queued profile '{}' for the daemon", self.profile)
        } else {
            format!("Applied profile '{}'", self.profile)
        }
    }
}

/// Apply a profile, either through the trigger queue or directly.
pub fn profile_apply(config_dir: &Path, name: &str, now: bool) -> Result<ProfileApplyResult> {
    let unknown = || Error::InvalidInput(format!("unknown profile '{}'", name.trim()));
    let profile = Profile::lookup(name).ok_or_else(unknown)?;

    if now {
        let store = ConfigStore::open(config_dir)?;
        let _lock = DirLock::exclusive(config_dir)?;
        match apply_profile(&store, name)? {
            ProfileOutcome::Applied(profile) => Ok(ProfileApplyResult {
                profile,
                queued: false,
            }),
            ProfileOutcome::Unknown => Err(unknown()),
        }
    } else {
        if !config_dir.is_dir() {
            return Err(Error::NotFound(format!(
                "config directory {} does not exist",
                config_dir.display()
            )));
        }
        TriggerQueue::new(config_dir).enqueue(TriggerKind::ApplyProfile, profile.name())?;
        Ok(ProfileApplyResult {
            profile,
            queued: true,
        })
    }
}

// === Keyboxes ===

#[derive(Serialize)]
pub struct KeyboxListResult {
    pub keyboxes: Vec<KeyboxEntry>,
    pub enabled: usize,
}

impl Output for KeyboxListResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.keyboxes.is_empty() {
            return "No keyboxes.".to_string();
        }
        let mut lines = vec![format!(
            "{} of {} enabled",
            self.enabled,
            self.keyboxes.len()
        )];
        for entry in &self.keyboxes {
            lines.push(format!(
                "  [{}] {} ({})",
                if entry.enabled { "x" } else { " " },
                entry.id,
                entry.status
            ));
        }
        lines.join("\n")
    }
}

/// List every keybox entry, enabled first.
pub fn keybox_list(config_dir: &Path) -> Result<KeyboxListResult> {
    let registry = KeyboxRegistry::open(config_dir)?;
    let _lock = DirLock::exclusive(config_dir)?;
    let keyboxes = registry.list()?;
    let enabled = keyboxes.iter().filter(|e| e.enabled).count();
    Ok(KeyboxListResult { keyboxes, enabled })
}
