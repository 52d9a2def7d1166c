//! Error types for Vigil using snafu.
//!
//! Defines a unified error type covering:
//! - Input validation failures (never retried)
//! - Unknown visitor and appeal identifiers
//! - Rejected state transitions for visitors and appeals
//! - Transient store failures (unavailable, timeout) and their escalation
//!
//! Each variant maps to an [`ErrorCode`] with a stable numeric identifier,
//! retryability classification, and suggested recovery action. HTTP-style
//! status codes are derived from the code only at the outer boundary via
//! [`ErrorCode::boundary_status`].

use std::fmt;

use snafu::Snafu;

use crate::validation::ValidationError;

/// Unified result type for Vigil operations.
pub type Result<T, E = VigilError> = std::result::Result<T, E>;

/// Machine-readable error codes for programmatic error handling.
///
/// | Range     | Domain     | Examples                                   |
/// |-----------|------------|--------------------------------------------|
/// | 1000–1099 | Input      | Validation, configuration                  |
/// | 2000–2099 | Lookup     | Unknown visitor, unknown appeal            |
/// | 3000–3099 | Transition | Already banned, not banned, appeal final   |
/// | 4000–4099 | Store      | Unavailable, timeout, retries exhausted    |
/// | 5000–5099 | Internal   | Invariant violation                        |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    /// Request input failed validation.
    InvalidInput = 1000,
    /// Configuration value out of range.
    InvalidConfig = 1001,
    /// Visitor id is unknown.
    VisitorNotFound = 2000,
    /// Appeal id is unknown.
    AppealNotFound = 2001,
    /// Requested transition is not allowed from the current state.
    InvalidTransition = 3000,
    /// Store could not be reached.
    StoreUnavailable = 4000,
    /// Store operation exceeded its deadline.
    StoreTimeout = 4001,
    /// Store kept failing after all retry attempts.
    StoreRetryExhausted = 4002,
    /// Unexpected internal state.
    Internal = 5000,
}

impl ErrorCode {
    /// Returns the numeric code value.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Converts a numeric code to an `ErrorCode`, returning `None` for unknown values.
    #[must_use]
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            1000 => Some(Self::InvalidInput),
            1001 => Some(Self::InvalidConfig),
            2000 => Some(Self::VisitorNotFound),
            2001 => Some(Self::AppealNotFound),
            3000 => Some(Self::InvalidTransition),
            4000 => Some(Self::StoreUnavailable),
            4001 => Some(Self::StoreTimeout),
            4002 => Some(Self::StoreRetryExhausted),
            5000 => Some(Self::Internal),
            _ => None,
        }
    }

    /// Whether this error is transient and eligible for retry by the gateway.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::StoreUnavailable | Self::StoreTimeout)
    }

    /// HTTP-style status used when the error crosses the outer boundary.
    #[must_use]
    pub const fn boundary_status(self) -> u16 {
        match self {
            Self::InvalidInput => 400,
            Self::VisitorNotFound | Self::AppealNotFound => 404,
            Self::InvalidTransition => 409,
            Self::StoreUnavailable | Self::StoreTimeout | Self::StoreRetryExhausted => 503,
            Self::InvalidConfig | Self::Internal => 500,
        }
    }

    /// Suggested recovery action for this error code.
    #[must_use]
    pub const fn suggested_action(self) -> &'static str {
        match self {
            Self::InvalidInput => "Correct the request fields named in the error and resubmit.",
            Self::InvalidConfig => "Fix the configuration value named in the error and restart.",
            Self::VisitorNotFound => "Verify the visitor id. The visitor may have been purged.",
            Self::AppealNotFound => "Verify the appeal id.",
            Self::InvalidTransition => {
                "Refresh the record; its current state does not allow this action."
            },
            Self::StoreUnavailable | Self::StoreTimeout => {
                "Retry with backoff. The store is temporarily unreachable."
            },
            Self::StoreRetryExhausted => {
                "The store stayed unavailable across retries. Check store health before retrying."
            },
            Self::Internal => "Report this error. It indicates an invariant violation.",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// The kind of state-machine rule a rejected transition broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    /// Ban requested for a visitor already banned under a different category.
    AlreadyBanned,
    /// Unban requested for an active visitor.
    NotBanned,
    /// Recategorize requested for an active visitor.
    RecategorizeWhileActive,
    /// Recategorize to the category already in effect.
    SameCategory,
    /// Decision requested for an appeal in a terminal state.
    AppealFinalized,
    /// Review marker requested for an appeal that is no longer pending.
    AppealNotPending,
}

impl TransitionKind {
    /// Returns a stable label for logs and API payloads.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AlreadyBanned => "already_banned",
            Self::NotBanned => "not_banned",
            Self::RecategorizeWhileActive => "recategorize_while_active",
            Self::SameCategory => "same_category",
            Self::AppealFinalized => "appeal_finalized",
            Self::AppealNotPending => "appeal_not_pending",
        }
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type for all Vigil components.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum VigilError {
    /// Request input failed validation.
    #[snafu(display("Validation failed: {field}: {constraint}"))]
    Validation {
        /// Field that failed validation.
        field: String,
        /// Violated constraint.
        constraint: String,
    },

    /// No visitor exists with the given id.
    #[snafu(display("Visitor not found: {id}"))]
    VisitorNotFound {
        /// The unknown visitor id.
        id: String,
    },

    /// No appeal exists with the given id.
    #[snafu(display("Appeal not found: {id}"))]
    AppealNotFound {
        /// The unknown appeal id.
        id: String,
    },

    /// The requested transition is not allowed from the current state.
    #[snafu(display("Invalid transition for {id}: {kind} (current state: {current})"))]
    InvalidTransition {
        /// Id of the visitor or appeal.
        id: String,
        /// Rule that rejected the transition.
        kind: TransitionKind,
        /// Current state label at the time of rejection.
        current: String,
    },

    /// Store could not be reached.
    #[snafu(display("Store unavailable: {message}"))]
    StoreUnavailable {
        /// Failure description.
        message: String,
    },

    /// Store operation exceeded its deadline.
    #[snafu(display("Store operation timed out after {duration_ms}ms"))]
    Timeout {
        /// Deadline in milliseconds.
        duration_ms: u64,
    },

    /// Retry attempts exhausted against a transiently failing store.
    #[snafu(display("Retry exhausted after {attempts} attempts: {last_error}"))]
    RetryExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Last error message before giving up.
        last_error: String,
    },

    /// Configuration error.
    #[snafu(display("Configuration error: {message}"))]
    Config {
        /// Error description.
        message: String,
    },

    /// Unexpected internal state.
    #[snafu(display("Internal error: {message}"))]
    Internal {
        /// Error description.
        message: String,
    },
}

impl VigilError {
    /// Returns the machine-readable code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation { .. } => ErrorCode::InvalidInput,
            Self::VisitorNotFound { .. } => ErrorCode::VisitorNotFound,
            Self::AppealNotFound { .. } => ErrorCode::AppealNotFound,
            Self::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            Self::StoreUnavailable { .. } => ErrorCode::StoreUnavailable,
            Self::Timeout { .. } => ErrorCode::StoreTimeout,
            Self::RetryExhausted { .. } => ErrorCode::StoreRetryExhausted,
            Self::Config { .. } => ErrorCode::InvalidConfig,
            Self::Internal { .. } => ErrorCode::Internal,
        }
    }

    /// Returns true if the operation should be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }

    /// Returns true if the store could not serve the request, including after retries.
    #[must_use]
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::StoreUnavailable | ErrorCode::StoreTimeout | ErrorCode::StoreRetryExhausted
        )
    }

    /// Returns the transition rule if this is an [`VigilError::InvalidTransition`].
    #[must_use]
    pub fn transition_kind(&self) -> Option<TransitionKind> {
        match self {
            Self::InvalidTransition { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

impl From<ValidationError> for VigilError {
    fn from(err: ValidationError) -> Self {
        Self::Validation { field: err.field, constraint: err.constraint }
    }
}
