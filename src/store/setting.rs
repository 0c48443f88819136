//! Setting keys and values managed by the config store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default property overrides written into the `drm_fix` marker when it is enabled.
pub const DRM_FIX_DEFAULT_CONTENT: &str = "ro.netflix.bsp_rev=0\n\
drm.service.enabled=true\n\
ro.com.google.widevine.level=1\n\
ro.crypto.state=encrypted\n";

/// How a setting is represented on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKind {
    /// Marker file; existence is the value.
    Flag,
    /// Regular file; content is the value.
    Text,
}

/// Every setting the store knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Setting {
    GlobalMode,
    TeeBrokenMode,
    RkpBypass,
    AutoBetaFetch,
    AutoKeyboxCheck,
    RandomOnBoot,
    DrmFix,
    RandomDrmOnBoot,
    AutoPatchUpdate,
    HideSensitiveProps,
    SpoofRegionCn,
    RemoveMagisk32,
    KeyboxSource,
    SecurityPatch,
}

impl Setting {
    /// All settings, in snapshot order.
    pub const ALL: [Setting; 14] = [
        Setting::GlobalMode,
        Setting::TeeBrokenMode,
        Setting::RkpBypass,
        Setting::AutoBetaFetch,
        Setting::AutoKeyboxCheck,
        Setting::RandomOnBoot,
        Setting::DrmFix,
        Setting::RandomDrmOnBoot,
        Setting::AutoPatchUpdate,
        Setting::HideSensitiveProps,
        Setting::SpoofRegionCn,
        Setting::RemoveMagisk32,
        Setting::KeyboxSource,
        Setting::SecurityPatch,
    ];

    /// Settings that every profile assigns explicitly.
    pub const MANAGED: [Setting; 6] = [
        Setting::GlobalMode,
        Setting::RkpBypass,
        Setting::TeeBrokenMode,
        Setting::RandomOnBoot,
        Setting::HideSensitiveProps,
        Setting::DrmFix,
    ];

    /// Key used in the API and CLI.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GlobalMode => "global_mode",
            Self::TeeBrokenMode => "tee_broken_mode",
            Self::RkpBypass => "rkp_bypass",
            Self::AutoBetaFetch => "auto_beta_fetch",
            Self::AutoKeyboxCheck => "auto_keybox_check",
            Self::RandomOnBoot => "random_on_boot",
            Self::DrmFix => "drm_fix",
            Self::RandomDrmOnBoot => "random_drm_on_boot",
            Self::AutoPatchUpdate => "auto_patch_update",
            Self::HideSensitiveProps => "hide_sensitive_props",
            Self::SpoofRegionCn => "spoof_region_cn",
            Self::RemoveMagisk32 => "remove_magisk_32",
            Self::KeyboxSource => "keybox_source",
            Self::SecurityPatch => "security_patch",
        }
    }

    /// File name inside the config directory.
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::KeyboxSource => "keybox_source.txt",
            Self::SecurityPatch => "security_patch.txt",
            other => other.as_str(),
        }
    }

    pub fn kind(&self) -> SettingKind {
        match self {
            Self::KeyboxSource | Self::SecurityPatch => SettingKind::Text,
            _ => SettingKind::Flag,
        }
    }

    /// Content written into the marker file when a flag is switched on.
    pub fn enabled_content(&self) -> Option<&'static str> {
        match self {
            Self::DrmFix => Some(DRM_FIX_DEFAULT_CONTENT),
            _ => None,
        }
    }
}

impl fmt::Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Setting {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim();
        Setting::ALL
            .iter()
            .copied()
            .find(|setting| setting.as_str() == key)
            .ok_or_else(|| crate::Error::InvalidInput(format!("unknown setting '{}'", key)))
    }
}

/// Value of a setting: flags are booleans, text settings are strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Flag(bool),
    Text(String),
}

impl SettingValue {
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Flag(b) => Some(*b),
            Self::Text(_) => None,
        }
    }

    /// Parse a CLI argument into a value of the right kind for `setting`.
    pub fn parse_for(setting: Setting, raw: &str) -> crate::Result<Self> {
        match setting.kind() {
            SettingKind::Flag => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "on" | "1" | "yes" => Ok(Self::Flag(true)),
                "false" | "off" | "0" | "no" => Ok(Self::Flag(false)),
                other => Err(crate::Error::InvalidInput(format!(
                    "'{}' is not a boolean",
                    other
                ))),
            },
            SettingKind::Text => Ok(Self::Text(raw.to_string())),
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flag(b) => write!(f, "{}", b),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}
