//! Access policy configuration: severity escalation and bulk fan-out.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ConfigError;

const fn default_medium_after() -> usize {
    2
}

const fn default_danger_after() -> usize {
    3
}

const fn default_severe_after() -> usize {
    5
}

const fn default_bulk_concurrency() -> usize {
    8
}

const fn default_max_bulk_ids() -> usize {
    500
}

/// Prior-ban thresholds for the advisory severity escalation.
///
/// With `n` prior bans in a visitor's history the suggestion is `severe` when
/// `n >= severe_after`, `danger` when `n >= danger_after`, `medium` when
/// `n >= medium_after`, and nothing otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EscalationThresholds {
    /// Prior bans before suggesting `medium`.
    #[serde(default = "default_medium_after")]
    pub medium_after: usize,
    /// Prior bans before suggesting `danger`.
    #[serde(default = "default_danger_after")]
    pub danger_after: usize,
    /// Prior bans before suggesting `severe`.
    #[serde(default = "default_severe_after")]
    pub severe_after: usize,
}

impl EscalationThresholds {
    /// Validates that thresholds are positive and strictly increasing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if the ordering is violated.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.medium_after == 0 {
            return Err(ConfigError::Validation {
                message: "escalation.medium_after must be >= 1".to_string(),
            });
        }
        if !(self.medium_after < self.danger_after && self.danger_after < self.severe_after) {
            return Err(ConfigError::Validation {
                message: "escalation thresholds must satisfy medium_after < danger_after < severe_after"
                    .to_string(),
            });
        }
        Ok(())
    }
}

impl Default for EscalationThresholds {
    fn default() -> Self {
        Self {
            medium_after: default_medium_after(),
            danger_after: default_danger_after(),
            severe_after: default_severe_after(),
        }
    }
}

/// Access policy engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PolicyConfig {
    /// Advisory escalation thresholds.
    #[serde(default)]
    pub escalation: EscalationThresholds,
    /// Number of ids processed concurrently by a bulk action. Must be >= 1.
    #[serde(default = "default_bulk_concurrency")]
    pub bulk_concurrency: usize,
    /// Maximum ids accepted by one bulk action. Must be >= 1.
    #[serde(default = "default_max_bulk_ids")]
    pub max_bulk_ids: usize,
}

#[bon::bon]
impl PolicyConfig {
    /// Creates a policy configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    #[builder]
    pub fn new(
        #[builder(default)] escalation: EscalationThresholds,
        #[builder(default = default_bulk_concurrency())] bulk_concurrency: usize,
        #[builder(default = default_max_bulk_ids())] max_bulk_ids: usize,
    ) -> Result<Self, ConfigError> {
        let config = Self { escalation, bulk_concurrency, max_bulk_ids };
        config.validate()?;
        Ok(config)
    }
}

impl PolicyConfig {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bulk_concurrency == 0 {
            return Err(ConfigError::Validation {
                message: "bulk_concurrency must be >= 1".to_string(),
            });
        }
        if self.max_bulk_ids == 0 {
            return Err(ConfigError::Validation {
                message: "max_bulk_ids must be >= 1".to_string(),
            });
        }
        self.escalation.validate()
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            escalation: EscalationThresholds::default(),
            bulk_concurrency: default_bulk_concurrency(),
            max_bulk_ids: default_max_bulk_ids(),
        }
    }
}
