//! Named settings bundles.
//!
//! A profile assigns a value to every managed setting, so applying one is a
//! full overwrite: the result never depends on what was set before. Lookup is
//! case-insensitive. An unknown name is logged and ignored, which is what the
//! trigger-file path relies on; HTTP callers inspect [`ProfileOutcome`] to
//! report it.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::Result;
use crate::store::{ConfigStore, Setting, SettingValue};

/// A built-in profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// Everything off.
    Minimal,
    /// Only RKP bypass.
    Default,
    /// RKP bypass and property hiding; what most users want.
    DailyUse,
    /// Everything except TEE-broken mode.
    GodProfile,
    /// Everything on.
    Maximal,
}

impl Profile {
    pub const ALL: [Profile; 5] = [
        Profile::Minimal,
        Profile::Default,
        Profile::DailyUse,
        Profile::GodProfile,
        Profile::Maximal,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Default => "default",
            Self::DailyUse => "dailyuse",
            Self::GodProfile => "godprofile",
            Self::Maximal => "maximal",
        }
    }

    /// Case-insensitive lookup.
    pub fn lookup(name: &str) -> Option<Self> {
        let wanted = name.trim().to_ascii_lowercase();
        Self::ALL.iter().copied().find(|p| p.name() == wanted)
    }

    /// The declared value of every managed setting, in [`Setting::MANAGED`] order.
    pub fn entries(&self) -> [(Setting, bool); 6] {
        // global, rkp, tee_broken, random_on_boot, hide_props, drm_fix
        let values = match self {
            Self::Minimal => [false, false, false, false, false, false],
            Self::Default => [false, true, false, false, false, false],
            Self::DailyUse => [false, true, false, false, true, false],
            Self::GodProfile => [true, true, false, true, true, true],
            Self::Maximal => [true, true, true, true, true, true],
        };
        let mut entries = [(Setting::GlobalMode, false); 6];
        for (slot, (setting, value)) in entries
            .iter_mut()
            .zip(Setting::MANAGED.iter().zip(values))
        {
            *slot = (*setting, value);
        }
        entries
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Profile {
    type Err = crate::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::lookup(s).ok_or_else(|| crate::Error::InvalidInput(format!("unknown profile '{}'", s)))
    }
}

/// What [`apply_profile`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileOutcome {
    Applied(Profile),
    /// The name matched no profile; nothing was changed.
    Unknown,
}

/// Apply the profile called `name` to `store`.
///
/// Must be called with the shared lock held. Store errors abort the
/// application and are returned; an unknown name is not an error.
pub fn apply_profile(store: &ConfigStore, name: &str) -> Result<ProfileOutcome> {
    let Some(profile) = Profile::lookup(name) else {
        tracing::error!(profile = %name.trim(), "unknown profile, nothing applied");
        return Ok(ProfileOutcome::Unknown);
    };

    tracing::info!(profile = %profile, "applying profile");
    for (setting, value) in profile.entries() {
        store.set(setting, &SettingValue::Flag(value))?;
    }
    Ok(ProfileOutcome::Applied(profile))
}
