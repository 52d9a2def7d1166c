//! Input limits for admin and visitor supplied text.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ConfigError;

const fn default_min_appeal_message_chars() -> usize {
    20
}

const fn default_max_appeal_message_chars() -> usize {
    5_000
}

const fn default_max_name_chars() -> usize {
    100
}

const fn default_max_subject_chars() -> usize {
    200
}

const fn default_max_reason_chars() -> usize {
    500
}

const fn default_max_notes_chars() -> usize {
    10_000
}

/// Length limits applied at the core boundary, counted in Unicode scalar values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, bon::Builder)]
pub struct ValidationConfig {
    /// Minimum appeal message length after trimming.
    #[serde(default = "default_min_appeal_message_chars")]
    #[builder(default = default_min_appeal_message_chars())]
    pub min_appeal_message_chars: usize,
    /// Maximum appeal message length.
    #[serde(default = "default_max_appeal_message_chars")]
    #[builder(default = default_max_appeal_message_chars())]
    pub max_appeal_message_chars: usize,
    /// Maximum appellant name length.
    #[serde(default = "default_max_name_chars")]
    #[builder(default = default_max_name_chars())]
    pub max_name_chars: usize,
    /// Maximum appeal subject length.
    #[serde(default = "default_max_subject_chars")]
    #[builder(default = default_max_subject_chars())]
    pub max_subject_chars: usize,
    /// Maximum ban reason length.
    #[serde(default = "default_max_reason_chars")]
    #[builder(default = default_max_reason_chars())]
    pub max_reason_chars: usize,
    /// Maximum admin notes length.
    #[serde(default = "default_max_notes_chars")]
    #[builder(default = default_max_notes_chars())]
    pub max_notes_chars: usize,
}

impl ValidationConfig {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if a minimum exceeds its maximum or a maximum is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_appeal_message_chars > self.max_appeal_message_chars {
            return Err(ConfigError::Validation {
                message: "min_appeal_message_chars must be <= max_appeal_message_chars".to_string(),
            });
        }
        for (name, value) in [
            ("max_name_chars", self.max_name_chars),
            ("max_subject_chars", self.max_subject_chars),
            ("max_reason_chars", self.max_reason_chars),
            ("max_notes_chars", self.max_notes_chars),
        ] {
            if value == 0 {
                return Err(ConfigError::Validation { message: format!("{name} must be > 0") });
            }
        }
        Ok(())
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}
