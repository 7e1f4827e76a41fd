//! Consent configuration.
//!
//! `ConsentConfig` controls how the [`ConsentStore`](crate::consent::ConsentStore)
//! names its storage keys, which policy version it expects, and how long a
//! recorded choice stays valid before the visitor is asked again.
//!
//! `ConsentConfig` provides the production values via [`Default`] and a fluent
//! [`ConsentConfig::builder()`] for customization with validation.
//!
//! # Examples
//!
//! ## Use defaults
//! ```rust
//! use krim_consent::config::ConsentConfig;
//! let cfg = ConsentConfig::default();
//! assert_eq!(cfg.schema_version, "1.0");
//! assert_eq!(cfg.consent_key, "krim-cookie-consent");
//! ```
//!
//! ## Customize with the builder
//! ```rust
//! use krim_consent::config::ConsentConfig;
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cfg = ConsentConfig::builder()
//!     .schema_version("2.0")
//!     .validity(time::Duration::days(180))
//!     .build()?; // returns Result<ConsentConfig, ConsentConfigError>
//! # Ok(()) }
//! ```
//!
//! # Fields (summary)
//! - `schema_version`: Policy/schema tag written into every record (default `"1.0"`).
//!   Records carrying any other version are ignored on load.
//! - `validity`: How long a recorded choice is honoured (default 365 days).
//! - `consent_key`: Storage key of the full consent record.
//! - `preferences_key`: Storage key of the redundant preferences copy.
//! - `event_capacity`: Buffer size of the facade's event channel.
//!
//! # Errors
//!
//! Builder validation returns [`ConsentConfigError`] for an empty version,
//! empty or clashing storage keys, a non-positive validity or a zero event
//! capacity.

use std::fmt;

pub const DEFAULT_SCHEMA_VERSION: &str = "1.0";
pub const DEFAULT_CONSENT_KEY: &str = "krim-cookie-consent";
pub const DEFAULT_PREFERENCES_KEY: &str = "krim-cookie-preferences";
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct ConsentConfig {
    pub schema_version: String,
    pub validity: time::Duration,
    pub consent_key: String,
    pub preferences_key: String,
    pub event_capacity: usize,
}

impl Default for ConsentConfig {
    fn default() -> Self {
        Self {
            schema_version: DEFAULT_SCHEMA_VERSION.to_string(),
            validity: time::Duration::days(365),
            consent_key: DEFAULT_CONSENT_KEY.to_string(),
            preferences_key: DEFAULT_PREFERENCES_KEY.to_string(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl ConsentConfig {
    pub fn builder() -> ConsentConfigBuilder {
        ConsentConfigBuilder::default()
    }

    /// Validity window in epoch milliseconds.
    pub fn validity_millis(&self) -> i64 {
        self.validity.whole_milliseconds().clamp(0, i64::MAX as i128) as i64
    }
}

/// Builder for [`ConsentConfig`].
#[derive(Debug, Clone, Default)]
pub struct ConsentConfigBuilder {
    inner: ConsentConfig,
}

impl ConsentConfigBuilder {
    #[inline]
    fn map(mut self, f: impl FnOnce(&mut ConsentConfig)) -> Self {
        f(&mut self.inner);
        self
    }

    pub fn schema_version<S: Into<String>>(self, v: S) -> Self { self.map(|c| c.schema_version = v.into()) }
    pub fn validity(self, d: time::Duration) -> Self { self.map(|c| c.validity = d) }
    pub fn consent_key<S: Into<String>>(self, k: S) -> Self { self.map(|c| c.consent_key = k.into()) }
    pub fn preferences_key<S: Into<String>>(self, k: S) -> Self { self.map(|c| c.preferences_key = k.into()) }
    pub fn event_capacity(self, n: usize) -> Self { self.map(|c| c.event_capacity = n) }

    /// Apply multiple changes in one go.
    pub fn with(self, f: impl FnOnce(&mut ConsentConfig)) -> Self { self.map(f) }

    /// Validate and build the final config.
    pub fn build(self) -> Result<ConsentConfig, ConsentConfigError> {
        validate(&self.inner)?;
        Ok(self.inner)
    }
}

// ---------- Validation ----------

#[derive(Debug, Clone, PartialEq)]
pub enum ConsentConfigError {
    EmptySchemaVersion,
    EmptyKey,
    SameKeys(String),
    NonPositiveValidity,
    ZeroEventCapacity,
}

impl fmt::Display for ConsentConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsentConfigError::EmptySchemaVersion =>
                write!(f, "schema_version must not be empty"),
            ConsentConfigError::EmptyKey =>
                write!(f, "storage keys must not be empty"),
            ConsentConfigError::SameKeys(k) =>
                write!(f, "consent_key and preferences_key are both {k:?}"),
            ConsentConfigError::NonPositiveValidity =>
                write!(f, "validity must be positive"),
            ConsentConfigError::ZeroEventCapacity =>
                write!(f, "event_capacity must be at least 1"),
        }
    }
}
impl std::error::Error for ConsentConfigError {}

pub fn validate(c: &ConsentConfig) -> Result<(), ConsentConfigError> {
    if c.schema_version.trim().is_empty() {
        return Err(ConsentConfigError::EmptySchemaVersion);
    }
    if c.consent_key.is_empty() || c.preferences_key.is_empty() {
        return Err(ConsentConfigError::EmptyKey);
    }
    if c.consent_key == c.preferences_key {
        return Err(ConsentConfigError::SameKeys(c.consent_key.clone()));
    }
    if !c.validity.is_positive() {
        return Err(ConsentConfigError::NonPositiveValidity);
    }
    if c.event_capacity == 0 {
        return Err(ConsentConfigError::ZeroEventCapacity);
    }
    Ok(())
}
