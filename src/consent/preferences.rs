//! Consent preferences and the persisted consent record.
//!
//! [`CookiePreferences`] is a map from [`ConsentCategory`] to an on/off flag.
//! Every way of building or changing one goes through `pin_essential`, so a
//! value with `essential == false` cannot exist, including values read back
//! from storage.
//!
//! JSON shape (as stored under `krim-cookie-preferences` and inside the
//! consent record):
//!
//! ```json
//! {"analytics":false,"essential":true,"functional":false,"marketing":false}
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::ConsentConfig;
use crate::consent::category::ConsentCategory;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, bool>", into = "BTreeMap<String, bool>")]
pub struct CookiePreferences {
    flags: BTreeMap<ConsentCategory, bool>,
}

impl Default for CookiePreferences {
    /// Essential only.
    fn default() -> Self {
        Self::from_fn(|_| false)
    }
}

impl CookiePreferences {
    fn from_fn(f: impl Fn(ConsentCategory) -> bool) -> Self {
        let mut prefs = Self {
            flags: ConsentCategory::ALL.into_iter().map(|c| (c, f(c))).collect(),
        };
        prefs.pin_essential();
        prefs
    }

    fn pin_essential(&mut self) {
        for c in ConsentCategory::ALL {
            if c.is_required() {
                self.flags.insert(c, true);
            }
        }
    }

    /// Every category allowed.
    pub fn all_granted() -> Self {
        Self::from_fn(|_| true)
    }

    /// Only required categories allowed. Same as [`Default`].
    pub fn essential_only() -> Self {
        Self::default()
    }

    pub fn get(&self, category: ConsentCategory) -> bool {
        self.flags.get(&category).copied().unwrap_or(false)
    }

    /// Sets a flag. Attempts to switch off a required category are ignored.
    pub fn set(&mut self, category: ConsentCategory, allowed: bool) {
        self.flags.insert(category, allowed);
        self.pin_essential();
    }

    /// Returns a copy with `patch` merged on top.
    pub fn merged(&self, patch: &PreferencesPatch) -> Self {
        let mut next = self.clone();
        for (category, allowed) in patch.iter() {
            next.flags.insert(category, allowed);
        }
        next.pin_essential();
        next
    }

    pub fn essential(&self) -> bool {
        self.get(ConsentCategory::Essential)
    }

    pub fn analytics(&self) -> bool {
        self.get(ConsentCategory::Analytics)
    }

    pub fn marketing(&self) -> bool {
        self.get(ConsentCategory::Marketing)
    }

    pub fn functional(&self) -> bool {
        self.get(ConsentCategory::Functional)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ConsentCategory, bool)> + '_ {
        self.flags.iter().map(|(c, v)| (*c, *v))
    }
}

impl From<BTreeMap<String, bool>> for CookiePreferences {
    /// Unknown keys are dropped and missing categories read as `false`.
    fn from(raw: BTreeMap<String, bool>) -> Self {
        Self::from_fn(|c| raw.get(c.as_str()).copied().unwrap_or(false))
    }
}

impl From<CookiePreferences> for BTreeMap<String, bool> {
    fn from(prefs: CookiePreferences) -> Self {
        prefs
            .flags
            .into_iter()
            .map(|(c, v)| (c.as_str().to_string(), v))
            .collect()
    }
}

/// A partial update of [`CookiePreferences`]: only the listed categories change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PreferencesPatch {
    changes: BTreeMap<ConsentCategory, bool>,
}

impl PreferencesPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, category: ConsentCategory, allowed: bool) -> Self {
        self.changes.insert(category, allowed);
        self
    }

    pub fn essential(self, allowed: bool) -> Self { self.set(ConsentCategory::Essential, allowed) }
    pub fn analytics(self, allowed: bool) -> Self { self.set(ConsentCategory::Analytics, allowed) }
    pub fn marketing(self, allowed: bool) -> Self { self.set(ConsentCategory::Marketing, allowed) }
    pub fn functional(self, allowed: bool) -> Self { self.set(ConsentCategory::Functional, allowed) }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ConsentCategory, bool)> + '_ {
        self.changes.iter().map(|(c, v)| (*c, *v))
    }
}

impl FromIterator<(ConsentCategory, bool)> for PreferencesPatch {
    fn from_iter<T: IntoIterator<Item = (ConsentCategory, bool)>>(iter: T) -> Self {
        Self {
            changes: iter.into_iter().collect(),
        }
    }
}

impl From<&CookiePreferences> for PreferencesPatch {
    fn from(prefs: &CookiePreferences) -> Self {
        prefs.iter().collect()
    }
}

/// The durable unit stored under the consent key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentRecord {
    pub preferences: CookiePreferences,
    /// Epoch milliseconds of the last consent action.
    pub timestamp: i64,
    /// Policy/schema version the choice was made under.
    pub version: String,
    pub has_consented: bool,
}

/// Outcome of checking a stored record against the running configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    Valid,
    VersionMismatch,
    Expired,
}

impl ConsentRecord {
    pub fn new(preferences: CookiePreferences, timestamp: i64, version: impl Into<String>) -> Self {
        Self {
            preferences,
            timestamp,
            version: version.into(),
            has_consented: true,
        }
    }

    /// Checks version and age. A timestamp ahead of `now_millis` counts as fresh.
    pub fn status(&self, config: &ConsentConfig, now_millis: i64) -> RecordStatus {
        if self.version != config.schema_version {
            return RecordStatus::VersionMismatch;
        }
        let age = now_millis.saturating_sub(self.timestamp);
        if age > config.validity_millis() {
            return RecordStatus::Expired;
        }
        RecordStatus::Valid
    }

    pub fn is_valid(&self, config: &ConsentConfig, now_millis: i64) -> bool {
        self.status(config, now_millis) == RecordStatus::Valid
    }
}
