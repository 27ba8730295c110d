//! Ruler configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RulerError};
use crate::quota::RuleQuota;

/// Default base evaluation interval: 10 seconds.
pub const DEFAULT_BASE_INTERVAL_SECONDS: i64 = 10;

/// Default maximum length of group names and rule titles.
pub const DEFAULT_MAX_NAME_LENGTH: usize = 190;

/// Configuration for the ruler service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulerConfig {
    /// Every group interval must be a positive multiple of this.
    pub base_interval_seconds: i64,
    /// Maximum length of group names and rule titles.
    pub max_name_length: usize,
    /// Alert rule limits.
    pub quota: RuleQuota,
}

impl RulerConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            base_interval_seconds: DEFAULT_BASE_INTERVAL_SECONDS,
            max_name_length: DEFAULT_MAX_NAME_LENGTH,
            quota: RuleQuota::new(),
        }
    }

    /// Sets the base evaluation interval.
    #[must_use]
    pub const fn with_base_interval_seconds(mut self, seconds: i64) -> Self {
        self.base_interval_seconds = seconds;
        self
    }

    /// Sets the maximum name length.
    #[must_use]
    pub const fn with_max_name_length(mut self, length: usize) -> Self {
        self.max_name_length = length;
        self
    }

    /// Sets the alert rule limits.
    #[must_use]
    pub const fn with_quota(mut self, quota: RuleQuota) -> Self {
        self.quota = quota;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the base interval or the name length is not positive.
    pub fn validate(&self) -> Result<()> {
        if self.base_interval_seconds <= 0 {
            return Err(RulerError::validation(
                "base_interval_seconds must be positive",
            ));
        }
        if self.max_name_length == 0 {
            return Err(RulerError::validation("max_name_length must be positive"));
        }
        Ok(())
    }

    /// Loads and validates a configuration from a JSON file. Missing fields take
    /// their default values.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or is invalid.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            RulerError::Internal(format!("failed to read config {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for RulerConfig {
    fn default() -> Self {
        Self::new()
    }
}
