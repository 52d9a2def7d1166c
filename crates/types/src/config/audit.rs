//! Audit log configuration.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Minimum size before rotating the audit log (1 MiB).
const MIN_MAX_FILE_SIZE_BYTES: u64 = 1024 * 1024;

fn default_audit_path() -> String {
    "audit.jsonl".to_string()
}

const fn default_max_file_size_bytes() -> u64 {
    64 * 1024 * 1024
}

const fn default_max_rotated_files() -> u32 {
    5
}

/// Configuration for the JSON-lines audit log of admin actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AuditConfig {
    /// Whether audit events are written to disk.
    #[serde(default)]
    pub enabled: bool,
    /// Path of the active log file.
    #[serde(default = "default_audit_path")]
    pub path: String,
    /// Size at which the active file is rotated. Must be >= 1 MiB.
    #[serde(default = "default_max_file_size_bytes")]
    pub max_file_size_bytes: u64,
    /// Rotated files kept before the oldest is deleted. Must be >= 1.
    #[serde(default = "default_max_rotated_files")]
    pub max_rotated_files: u32,
}

#[bon::bon]
impl AuditConfig {
    /// Creates an audit configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    #[builder]
    pub fn new(
        #[builder(default)] enabled: bool,
        #[builder(into, default = default_audit_path())] path: String,
        #[builder(default = default_max_file_size_bytes())] max_file_size_bytes: u64,
        #[builder(default = default_max_rotated_files())] max_rotated_files: u32,
    ) -> Result<Self, ConfigError> {
        let config = Self { enabled, path, max_file_size_bytes, max_rotated_files };
        config.validate()?;
        Ok(config)
    }
}

impl AuditConfig {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.path.is_empty() {
            return Err(ConfigError::Validation { message: "audit path must not be empty".to_string() });
        }
        if self.max_file_size_bytes < MIN_MAX_FILE_SIZE_BYTES {
            return Err(ConfigError::Validation {
                message: "max_file_size_bytes must be >= 1 MB".to_string(),
            });
        }
        if self.max_rotated_files == 0 {
            return Err(ConfigError::Validation {
                message: "max_rotated_files must be >= 1".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_audit_path(),
            max_file_size_bytes: default_max_file_size_bytes(),
            max_rotated_files: default_max_rotated_files(),
        }
    }
}
