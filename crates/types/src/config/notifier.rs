//! Status notifier configuration.

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ConfigError;

fn default_reconnect_delay() -> Duration {
    Duration::from_secs(2)
}

const fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_liveness_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_redirect_delay() -> Duration {
    Duration::from_secs(3)
}

const fn default_channel_capacity() -> usize {
    16
}

fn default_ban_notice_path() -> String {
    "/banned".to_string()
}

fn default_entry_path() -> String {
    "/".to_string()
}

/// Configuration for live status notifications.
///
/// # Reconnection
///
/// A failed watch is retried after a fixed `reconnect_delay`. After
/// `max_reconnect_attempts` consecutive failures the subscription reports a
/// lost connection and stops.
///
/// # Liveness
///
/// Every `liveness_interval` the subscription probes the store and restarts
/// itself if the stored status diverges from the last status it delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NotifierConfig {
    /// Fixed delay between reconnection attempts. Must be > 0.
    #[serde(default = "default_reconnect_delay")]
    #[serde(with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub reconnect_delay: Duration,
    /// Consecutive failed reconnects before giving up. Must be >= 1.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Period of the independent liveness probe. Must be > 0.
    #[serde(default = "default_liveness_interval")]
    #[serde(with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub liveness_interval: Duration,
    /// Countdown shown before redirecting after a status flip.
    #[serde(default = "default_redirect_delay")]
    #[serde(with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub redirect_delay: Duration,
    /// Buffered signals per subscription. Must be >= 1.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Path of the ban notice view.
    #[serde(default = "default_ban_notice_path")]
    pub ban_notice_path: String,
    /// Path of the normal entry point.
    #[serde(default = "default_entry_path")]
    pub entry_path: String,
}

#[bon::bon]
impl NotifierConfig {
    /// Creates a notifier configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    #[builder]
    pub fn new(
        #[builder(default = default_reconnect_delay())] reconnect_delay: Duration,
        #[builder(default = default_max_reconnect_attempts())] max_reconnect_attempts: u32,
        #[builder(default = default_liveness_interval())] liveness_interval: Duration,
        #[builder(default = default_redirect_delay())] redirect_delay: Duration,
        #[builder(default = default_channel_capacity())] channel_capacity: usize,
        #[builder(into, default = default_ban_notice_path())] ban_notice_path: String,
        #[builder(into, default = default_entry_path())] entry_path: String,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            reconnect_delay,
            max_reconnect_attempts,
            liveness_interval,
            redirect_delay,
            channel_capacity,
            ban_notice_path,
            entry_path,
        };
        config.validate()?;
        Ok(config)
    }
}

impl NotifierConfig {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reconnect_delay.is_zero() {
            return Err(ConfigError::Validation {
                message: "reconnect_delay must be > 0".to_string(),
            });
        }
        if self.max_reconnect_attempts == 0 {
            return Err(ConfigError::Validation {
                message: "max_reconnect_attempts must be >= 1".to_string(),
            });
        }
        if self.liveness_interval.is_zero() {
            return Err(ConfigError::Validation {
                message: "liveness_interval must be > 0".to_string(),
            });
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::Validation {
                message: "channel_capacity must be >= 1".to_string(),
            });
        }
        if !self.ban_notice_path.starts_with('/') || !self.entry_path.starts_with('/') {
            return Err(ConfigError::Validation {
                message: "ban_notice_path and entry_path must start with '/'".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: default_reconnect_delay(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            liveness_interval: default_liveness_interval(),
            redirect_delay: default_redirect_delay(),
            channel_capacity: default_channel_capacity(),
            ban_notice_path: default_ban_notice_path(),
            entry_path: default_entry_path(),
        }
    }
}
