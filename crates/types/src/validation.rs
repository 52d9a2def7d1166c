//! Input validation for admin and visitor supplied fields.
//!
//! Provides configurable validation for appeal submissions, ban reasons, and
//! admin notes. Used at the core boundary before any store call, so invalid
//! input never costs a round trip.
//!
//! ## Length Accounting
//!
//! All limits count Unicode scalar values after trimming surrounding
//! whitespace, so a message padded with spaces cannot pass the minimum.

use std::{fmt, sync::LazyLock};

use regex::Regex;

use crate::config::ValidationConfig;

/// Validation error with structured context.
///
/// Contains the specific constraint that was violated and the field name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The field that failed validation.
    pub field: String,
    /// Description of the violated constraint.
    pub constraint: String,
}

impl ValidationError {
    fn new(field: &str, constraint: impl Into<String>) -> Self {
        Self { field: field.to_string(), constraint: constraint.into() }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.constraint)
    }
}

impl std::error::Error for ValidationError {}

/// Pragmatic address shape: one `@`, a dotted domain, no whitespace.
#[allow(clippy::expect_used)]
static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is a valid regex")
});

/// Validates a required free-text field and returns the trimmed value.
///
/// # Errors
///
/// Returns [`ValidationError`] if the trimmed value is empty or longer than `max_chars`.
pub fn validate_required_text(
    field: &str,
    value: &str,
    max_chars: usize,
) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }
    check_max_chars(field, trimmed, max_chars)?;
    Ok(trimmed.to_string())
}

/// Validates an optional free-text field.
///
/// Blank input normalizes to `None`.
///
/// # Errors
///
/// Returns [`ValidationError`] if the trimmed value is longer than `max_chars`.
pub fn validate_optional_text(
    field: &str,
    value: Option<&str>,
    max_chars: usize,
) -> Result<Option<String>, ValidationError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(trimmed) => {
            check_max_chars(field, trimmed, max_chars)?;
            Ok(Some(trimmed.to_string()))
        },
    }
}

/// Validates an email address and returns it trimmed.
///
/// # Errors
///
/// Returns [`ValidationError`] if the address is empty or malformed.
pub fn validate_email(value: &str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::new("email", "must not be empty"));
    }
    if trimmed.len() > 254 {
        return Err(ValidationError::new("email", "length exceeds 254 bytes"));
    }
    if !EMAIL_PATTERN.is_match(trimmed) {
        return Err(ValidationError::new("email", "is not a valid email address"));
    }
    Ok(trimmed.to_string())
}

/// Validates an appeal message against the configured length window.
///
/// # Errors
///
/// Returns [`ValidationError`] if the trimmed message is shorter than
/// `min_appeal_message_chars` or longer than `max_appeal_message_chars`.
pub fn validate_appeal_message(
    value: &str,
    config: &ValidationConfig,
) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    let chars = trimmed.chars().count();
    if chars < config.min_appeal_message_chars {
        return Err(ValidationError::new(
            "message",
            format!(
                "must be at least {} characters (got {chars})",
                config.min_appeal_message_chars
            ),
        ));
    }
    check_max_chars("message", trimmed, config.max_appeal_message_chars)?;
    Ok(trimmed.to_string())
}

/// Validates an admin identifier.
///
/// # Errors
///
/// Returns [`ValidationError`] if the id is blank or contains whitespace or control characters.
pub fn validate_admin_id(value: &str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::new("admin_id", "must not be empty"));
    }
    if trimmed.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ValidationError::new("admin_id", "must not contain whitespace"));
    }
    check_max_chars("admin_id", trimmed, 128)?;
    Ok(trimmed.to_string())
}

fn check_max_chars(field: &str, value: &str, max_chars: usize) -> Result<(), ValidationError> {
    let chars = value.chars().count();
    if chars > max_chars {
        return Err(ValidationError::new(
            field,
            format!("length {chars} characters exceeds maximum {max_chars}"),
        ));
    }
    Ok(())
}
