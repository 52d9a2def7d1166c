//! Status change events and the visitor-facing status view.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Visitor, VisitorId, VisitorStatus};

/// A committed flip of a visitor's access status.
///
/// Events are not persisted. They are produced from the before and after
/// images of one committed write, so per-visitor event order equals commit
/// order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChangeEvent {
    /// Visitor whose status changed.
    pub visitor_id: VisitorId,
    /// Status before the write.
    pub previous_status: VisitorStatus,
    /// Status after the write.
    pub new_status: VisitorStatus,
    /// Ban reason when the new status is `banned`.
    #[serde(default)]
    pub reason: Option<String>,
    /// Commit time.
    pub timestamp: DateTime<Utc>,
}

impl StatusChangeEvent {
    /// Derives the event for a write, if the write flipped the status.
    ///
    /// A first write (no `before` image) never counts as a flip.
    #[must_use]
    pub fn between(before: Option<&Visitor>, after: &Visitor, now: DateTime<Utc>) -> Option<Self> {
        let before = before?;
        if before.status == after.status {
            return None;
        }
        Some(Self {
            visitor_id: after.id,
            previous_status: before.status,
            new_status: after.status,
            reason: after.ban_reason.clone(),
            timestamp: now,
        })
    }

    /// Returns true when the visitor became banned.
    #[must_use]
    pub fn is_ban(&self) -> bool {
        self.new_status == VisitorStatus::Banned
    }
}

/// Status exposed to non-admin callers.
///
/// `Unknown` is returned whenever the status could not be determined. It is
/// never collapsed into `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicStatus {
    /// Visitor may use the site.
    Active,
    /// Visitor is banned.
    Banned,
    /// Status could not be determined.
    Unknown,
}

impl From<VisitorStatus> for PublicStatus {
    fn from(status: VisitorStatus) -> Self {
        match status {
            VisitorStatus::Active => Self::Active,
            VisitorStatus::Banned => Self::Banned,
        }
    }
}

impl fmt::Display for PublicStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Active => "active",
            Self::Banned => "banned",
            Self::Unknown => "unknown",
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::{BanCategory, FingerprintHash};

    fn banned(mut visitor: Visitor) -> Visitor {
        visitor.status = VisitorStatus::Banned;
        visitor.ban_reason = Some("spam".to_string());
        visitor.ban_category = Some(BanCategory::Normal);
        visitor.ban_timestamp = Some(Utc::now());
        visitor
    }

    #[test]
    fn test_between_detects_flip_only() {
        let active =
            Visitor::first_contact(VisitorId::generate(), FingerprintHash::new("f"), Utc::now());
        let now = Utc::now();

        assert!(StatusChangeEvent::between(None, &active, now).is_none());
        assert!(StatusChangeEvent::between(Some(&active), &active, now).is_none());

        let after = banned(active.clone());
        let event = StatusChangeEvent::between(Some(&active), &after, now).unwrap();
        assert_eq!(event.previous_status, VisitorStatus::Active);
        assert_eq!(event.new_status, VisitorStatus::Banned);
        assert_eq!(event.reason.as_deref(), Some("spam"));
        assert!(event.is_ban());
    }

    #[test]
    fn test_public_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&PublicStatus::Unknown).unwrap(), "\"unknown\"");
        assert_eq!(PublicStatus::from(VisitorStatus::Banned), PublicStatus::Banned);
    }
}
