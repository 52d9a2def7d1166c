//! Core type definitions for Vigil.
//!
//! - Identifier types (`VisitorId`, `AppealId`)
//! - Visitor records with access status and visit accounting
//! - Ban categories, category history and ban records
//! - Device fingerprints and their digests

use std::{collections::BTreeSet, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::validation::ValidationError;

// ============================================================================
// Identifier Types
// ============================================================================

/// Generates a newtype wrapper around a UUID for type-safe identifiers.
///
/// Each generated type provides:
/// - Standard derives: Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord
/// - Serde with `#[serde(transparent)]` for wire format compatibility
/// - `From<Uuid>` and `Into<Uuid>` conversions
/// - `Display` as the hyphenated UUID (ids travel through URLs and storage)
/// - `FromStr` accepting any syntactically valid UUID
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates an identifier from a raw UUID.
            #[inline]
            pub const fn new(value: Uuid) -> Self {
                Self(value)
            }

            /// Mints a fresh random (v4) identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            /// Returns the raw UUID.
            #[inline]
            pub const fn value(self) -> Uuid {
                self.0
            }
        }

        impl From<Uuid> for $name {
            #[inline]
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$name> for Uuid {
            #[inline]
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0.hyphenated(), f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self)
            }
        }
    };
}

define_id!(
    /// Canonical identifier of a visitor.
    ///
    /// Persistent ids are random v4 UUIDs. Session-only ids minted while the
    /// store is unreachable use UUID version 8 so they can be recognised and
    /// are never merged into another visitor's alternate ids.
    VisitorId
);

define_id!(
    /// Identifier of an appeal record.
    AppealId
);

impl VisitorId {
    /// Mints a session-only identifier that is never persisted.
    #[must_use]
    pub fn ephemeral() -> Self {
        let bytes = Uuid::new_v4().into_bytes();
        Self(uuid::Builder::from_custom_bytes(bytes).into_uuid())
    }

    /// Returns true if this id was minted by [`VisitorId::ephemeral`].
    #[must_use]
    pub fn is_ephemeral(self) -> bool {
        self.0.get_version() == Some(uuid::Version::Custom)
    }
}

/// Identifier of the administrator performing an action.
pub type AdminId = String;

// ============================================================================
// Access status
// ============================================================================

/// Binary access status of a visitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitorStatus {
    /// Visitor may use the site.
    Active,
    /// Visitor is redirected to the ban notice.
    Banned,
}

impl VisitorStatus {
    /// Returns a stable lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Banned => "banned",
        }
    }
}

impl fmt::Display for VisitorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity classification attached to an active ban.
///
/// Variants are declared in ascending severity so the derived ordering can be
/// used to compare categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BanCategory {
    /// Minor violation.
    Normal,
    /// Repeated or moderate violation.
    Medium,
    /// Harmful behaviour.
    Danger,
    /// Illegal or egregious behaviour.
    Severe,
}

impl BanCategory {
    /// All categories in ascending severity.
    pub const ALL: [Self; 4] = [Self::Normal, Self::Medium, Self::Danger, Self::Severe];

    /// Returns a stable lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Medium => "medium",
            Self::Danger => "danger",
            Self::Severe => "severe",
        }
    }
}

impl fmt::Display for BanCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BanCategory {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Ok(Self::Normal),
            "medium" => Ok(Self::Medium),
            "danger" => Ok(Self::Danger),
            "severe" => Ok(Self::Severe),
            other => Err(ValidationError {
                field: "category".to_string(),
                constraint: format!(
                    "unknown category {other:?}; expected one of normal, medium, danger, severe"
                ),
            }),
        }
    }
}

/// What produced a category history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryChangeKind {
    /// A fresh ban of an active visitor.
    Ban,
    /// A category change while the visitor stayed banned.
    Recategorize,
}

/// One entry of a visitor's append-only category history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanCategoryHistoryEntry {
    /// What produced the entry.
    pub kind: CategoryChangeKind,
    /// Category in effect after the change.
    pub category: BanCategory,
    /// Category before the change (`None` for a fresh ban).
    pub previous_category: Option<BanCategory>,
    /// Reason given by the administrator.
    pub reason: String,
    /// Administrator who made the change.
    pub admin_id: AdminId,
    /// When the change was committed.
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Fingerprints
// ============================================================================

/// Device and browser characteristics reported by a client.
///
/// Used for identity correlation only. Two distinct devices may produce the
/// same fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFingerprint {
    /// Browser user agent string.
    #[serde(default)]
    pub user_agent: String,
    /// Preferred language tag (e.g., `en-US`).
    #[serde(default)]
    pub language: String,
    /// Platform identifier (e.g., `MacIntel`).
    #[serde(default)]
    pub platform: String,
    /// Screen dimensions as `WIDTHxHEIGHT`.
    #[serde(default)]
    pub screen: String,
    /// IANA timezone name.
    #[serde(default)]
    pub timezone: String,
    /// Logical processor count reported by the browser.
    #[serde(default)]
    pub hardware_concurrency: u32,
    /// Screen colour depth in bits.
    #[serde(default)]
    pub color_depth: u32,
    /// Whether the device reports touch support.
    #[serde(default)]
    pub touch_support: bool,
    /// Digest of a canvas rendering, if the client computed one.
    #[serde(default)]
    pub canvas_hash: Option<String>,
    /// Client-held signal (e.g., a value kept in local storage), if any.
    ///
    /// Only folded into the digest under `MergePolicy::HashAndClientSignal`.
    #[serde(default)]
    pub client_signal: Option<String>,
}

/// Hex-encoded digest of a [`DeviceFingerprint`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FingerprintHash(String);

impl FingerprintHash {
    /// Wraps an already computed digest.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the digest as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FingerprintHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Visitor
// ============================================================================

/// Durable record of a visitor's identity, access status and visit statistics.
///
/// Invariants maintained by the access policy engine:
/// - `status == Banned` implies `ban_reason`, `ban_timestamp` and `ban_category` are set
/// - `status == Active` implies `ban_reason`, `ban_timestamp` and `ban_category` are cleared
/// - `ban_category_history` only grows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visitor {
    /// Canonical id, immutable once assigned.
    pub id: VisitorId,
    /// Digest of the device fingerprint seen at first contact.
    pub fingerprint_hash: FingerprintHash,
    /// Ids merged into this canonical identity.
    #[serde(default)]
    pub alternate_ids: BTreeSet<VisitorId>,
    /// Current access status.
    pub status: VisitorStatus,
    /// Category of the active ban.
    #[serde(default)]
    pub ban_category: Option<BanCategory>,
    /// Reason of the active ban.
    #[serde(default)]
    pub ban_reason: Option<String>,
    /// When the active ban was committed.
    #[serde(default)]
    pub ban_timestamp: Option<DateTime<Utc>>,
    /// When the most recent unban was committed.
    #[serde(default)]
    pub unban_timestamp: Option<DateTime<Utc>>,
    /// Append-only category log.
    #[serde(default)]
    pub ban_category_history: Vec<BanCategoryHistoryEntry>,
    /// Number of recorded visits.
    pub visit_count: u64,
    /// First recorded visit.
    pub first_visit: DateTime<Utc>,
    /// Most recent recorded visit.
    pub last_visit: DateTime<Utc>,
    /// Administrator-authored notes, independent of ban state.
    #[serde(default)]
    pub admin_notes: Option<String>,
}

impl Visitor {
    /// Creates an active visitor on first contact with one recorded visit.
    #[must_use]
    pub fn first_contact(id: VisitorId, fingerprint_hash: FingerprintHash, now: DateTime<Utc>) -> Self {
        Self {
            id,
            fingerprint_hash,
            alternate_ids: BTreeSet::new(),
            status: VisitorStatus::Active,
            ban_category: None,
            ban_reason: None,
            ban_timestamp: None,
            unban_timestamp: None,
            ban_category_history: Vec::new(),
            visit_count: 1,
            first_visit: now,
            last_visit: now,
            admin_notes: None,
        }
    }

    /// Returns true if the visitor is currently banned.
    #[must_use]
    pub fn is_banned(&self) -> bool {
        self.status == VisitorStatus::Banned
    }

    /// Records one visit. `last_visit` never moves backwards.
    pub fn record_visit(&mut self, now: DateTime<Utc>) {
        self.visit_count = self.visit_count.saturating_add(1);
        if now > self.last_visit {
            self.last_visit = now;
        }
    }

    /// Merges `alternate` into this identity.
    ///
    /// Returns false when the id is this visitor's own id, is ephemeral, or is
    /// already present.
    pub fn merge_alternate_id(&mut self, alternate: VisitorId) -> bool {
        if alternate == self.id || alternate.is_ephemeral() {
            return false;
        }
        self.alternate_ids.insert(alternate)
    }

    /// Number of fresh bans recorded in the category history.
    #[must_use]
    pub fn prior_ban_count(&self) -> usize {
        self.ban_category_history
            .iter()
            .filter(|entry| entry.kind == CategoryChangeKind::Ban)
            .count()
    }

    /// Checks the status/ban-field invariant.
    #[must_use]
    pub fn is_status_consistent(&self) -> bool {
        match self.status {
            VisitorStatus::Banned => {
                self.ban_reason.is_some()
                    && self.ban_timestamp.is_some()
                    && self.ban_category.is_some()
            },
            VisitorStatus::Active => {
                self.ban_reason.is_none()
                    && self.ban_timestamp.is_none()
                    && self.ban_category.is_none()
            },
        }
    }
}

// ============================================================================
// Ban records
// ============================================================================

/// Audit-oriented projection of a ban, keyed by visitor id.
///
/// At most one record per visitor has `is_active == true`. Records are never
/// deleted on unban; `is_active` flips to false and the lift is stamped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanRecord {
    /// Banned visitor.
    pub visitor_id: VisitorId,
    /// Reason given by the administrator.
    pub reason: String,
    /// Free-text detail when the reason is not a preset.
    #[serde(default)]
    pub custom_reason: Option<String>,
    /// Category at the time of the ban (updated on recategorize).
    pub category: BanCategory,
    /// Administrator who issued the ban.
    pub admin_id: AdminId,
    /// When the ban was committed.
    pub timestamp: DateTime<Utc>,
    /// Whether this ban is currently in effect.
    pub is_active: bool,
    /// When the ban was lifted.
    #[serde(default)]
    pub lifted_at: Option<DateTime<Utc>>,
    /// Administrator who lifted the ban.
    #[serde(default)]
    pub lifted_by: Option<AdminId>,
}
