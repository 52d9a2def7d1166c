//! Configuration types for Vigil.
//!
//! Configuration is loaded from TOML files and environment variables.
//! Config structs with cross-field constraints validate their values at
//! construction time via fallible builders. Post-deserialization validation
//! is available via the `validate()` method on each struct.

// The schemars `JsonSchema` derive macro internally uses `.unwrap()` in its
// expansions.
#![allow(clippy::disallowed_methods)]

mod audit;
mod identity;
mod notifier;
mod policy;
mod resilience;
mod validation;

pub use audit::*;
pub use identity::*;
pub use notifier::*;
pub use policy::*;
pub use resilience::*;
use snafu::Snafu;
pub use validation::*;

/// Configuration validation error.
///
/// Returned when a configuration value is outside its valid range or
/// violates a cross-field constraint.
#[derive(Debug, Snafu)]
pub enum ConfigError {
    /// A configuration value is invalid.
    #[snafu(display("invalid config: {message}"))]
    Validation {
        /// Description of the validation failure.
        message: String,
    },
}

impl From<ConfigError> for crate::error::VigilError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { message } => Self::Config { message },
        }
    }
}

/// Duration serialization using humantime format.
mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_backoff, Duration::from_millis(100));
        assert_eq!(policy.max_backoff, Duration::from_secs(5));
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_retry_policy_builder_rejects_zero_attempts() {
        let result = RetryPolicy::builder().max_attempts(0).build();
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_retry_policy_builder_rejects_inverted_backoff() {
        let result = RetryPolicy::builder()
            .initial_backoff(Duration::from_secs(10))
            .max_backoff(Duration::from_secs(1))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_retry_policy_rejects_out_of_range_jitter() {
        assert!(RetryPolicy::builder().jitter(1.5).build().is_err());
        assert!(RetryPolicy::builder().multiplier(0.5).build().is_err());
    }

    #[test]
    fn test_gateway_config_rejects_zero_timeout() {
        let result = GatewayConfig::builder().operation_timeout(Duration::ZERO).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_notifier_config_defaults() {
        let config = NotifierConfig::default();
        assert_eq!(config.reconnect_delay, Duration::from_secs(2));
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.redirect_delay, Duration::from_secs(3));
        assert_eq!(config.ban_notice_path, "/banned");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_notifier_config_rejects_relative_paths() {
        let result = NotifierConfig::builder().ban_notice_path("banned").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_escalation_thresholds_must_increase() {
        let thresholds = EscalationThresholds { medium_after: 3, danger_after: 3, severe_after: 5 };
        assert!(thresholds.validate().is_err());
        assert!(PolicyConfig::builder().escalation(thresholds).build().is_err());
        assert!(PolicyConfig::builder().bulk_concurrency(0).build().is_err());
    }

    #[test]
    fn test_validation_config_min_must_not_exceed_max() {
        let config = ValidationConfig::builder()
            .min_appeal_message_chars(100)
            .max_appeal_message_chars(50)
            .build();
        assert!(config.validate().is_err());
        assert!(ValidationConfig::default().validate().is_ok());
    }

    #[test]
    fn test_audit_config_rejects_small_rotation_size() {
        let result = AuditConfig::builder().max_file_size_bytes(1024).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_notifier_config_deserializes_humantime() {
        let config: NotifierConfig =
            serde_json::from_str(r#"{"reconnect_delay": "500ms", "liveness_interval": "1m"}"#)
                .unwrap();
        assert_eq!(config.reconnect_delay, Duration::from_millis(500));
        assert_eq!(config.liveness_interval, Duration::from_secs(60));
        assert_eq!(config.max_reconnect_attempts, 5);
    }

    #[test]
    fn test_merge_policy_serde_snake_case() {
        let json = serde_json::to_string(&MergePolicy::HashAndClientSignal).unwrap();
        assert_eq!(json, "\"hash_and_client_signal\"");
        let config: ResolverConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.merge_policy, MergePolicy::HashMatch);
    }
}
