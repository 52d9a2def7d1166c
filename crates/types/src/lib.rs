//! Core types, errors, and configuration for Vigil.
//!
//! This crate provides the foundational types used throughout the access
//! subsystem:
//! - Identifier newtypes (`VisitorId`, `AppealId`) and ephemeral session ids
//! - Visitor, ban record and appeal data structures
//! - Device fingerprint digests (SHA-256)
//! - Error types using snafu
//! - Input validation and configuration structs

pub mod appeal;
pub mod audit;
pub mod config;
pub mod error;
pub mod events;
pub mod hash;
pub mod types;
pub mod validation;

// Re-export commonly used types at crate root
pub use appeal::{Appeal, AppealDecision, AppealStats, AppealStatus};
pub use error::{ErrorCode, Result, TransitionKind, VigilError};
pub use events::{PublicStatus, StatusChangeEvent};
pub use hash::fingerprint_digest;
pub use types::*;
pub use validation::ValidationError;
