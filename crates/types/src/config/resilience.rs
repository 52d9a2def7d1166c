//! Retry and store gateway configuration.

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ConfigError;

// =============================================================================
// Retry policy
// =============================================================================

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> Duration {
    Duration::from_millis(100)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(5)
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.25
}

/// Retry policy for transient store failures.
///
/// Backoff grows as `initial_backoff * multiplier^(attempt-1)`, capped at
/// `max_backoff`, with ±`jitter` randomisation.
///
/// # Example
///
/// ```no_run
/// # use std::time::Duration;
/// # use vigil_types::config::RetryPolicy;
/// let policy = RetryPolicy::builder()
///     .max_attempts(5)
///     .initial_backoff(Duration::from_millis(50))
///     .build()
///     .expect("valid retry policy");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one. Must be >= 1.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff before the first retry.
    #[serde(default = "default_initial_backoff")]
    #[serde(with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub initial_backoff: Duration,
    /// Upper bound for any single backoff. Must be >= `initial_backoff`.
    #[serde(default = "default_max_backoff")]
    #[serde(with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub max_backoff: Duration,
    /// Backoff growth factor. Must be >= 1.0.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Jitter factor in `[0.0, 1.0]`.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

#[bon::bon]
impl RetryPolicy {
    /// Creates a retry policy with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    #[builder]
    pub fn new(
        #[builder(default = default_max_attempts())] max_attempts: u32,
        #[builder(default = default_initial_backoff())] initial_backoff: Duration,
        #[builder(default = default_max_backoff())] max_backoff: Duration,
        #[builder(default = default_multiplier())] multiplier: f64,
        #[builder(default = default_jitter())] jitter: f64,
    ) -> Result<Self, ConfigError> {
        let policy = Self { max_attempts, initial_backoff, max_backoff, multiplier, jitter };
        policy.validate()?;
        Ok(policy)
    }
}

impl RetryPolicy {
    /// Validates the policy values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Validation {
                message: "max_attempts must be >= 1".to_string(),
            });
        }
        if self.max_backoff < self.initial_backoff {
            return Err(ConfigError::Validation {
                message: "max_backoff must be >= initial_backoff".to_string(),
            });
        }
        if !(self.multiplier >= 1.0) {
            return Err(ConfigError::Validation {
                message: "multiplier must be >= 1.0".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::Validation {
                message: "jitter must be within [0.0, 1.0]".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

// =============================================================================
// Store gateway
// =============================================================================

fn default_operation_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Configuration for the resilient store gateway.
///
/// Every store call is bounded by `operation_timeout`; a timeout counts as a
/// transient failure and is retried under `retry`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GatewayConfig {
    /// Deadline for a single store attempt. Must be > 0.
    #[serde(default = "default_operation_timeout")]
    #[serde(with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub operation_timeout: Duration,
    /// Retry policy for transient failures.
    #[serde(default)]
    pub retry: RetryPolicy,
}

#[bon::bon]
impl GatewayConfig {
    /// Creates a gateway configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if the timeout is zero or the retry policy is invalid.
    #[builder]
    pub fn new(
        #[builder(default = default_operation_timeout())] operation_timeout: Duration,
        #[builder(default)] retry: RetryPolicy,
    ) -> Result<Self, ConfigError> {
        let config = Self { operation_timeout, retry };
        config.validate()?;
        Ok(config)
    }
}

impl GatewayConfig {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.operation_timeout.is_zero() {
            return Err(ConfigError::Validation {
                message: "operation_timeout must be > 0".to_string(),
            });
        }
        self.retry.validate()
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self { operation_timeout: default_operation_timeout(), retry: RetryPolicy::default() }
    }
}
