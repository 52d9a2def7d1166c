//! Audit logging types for administrator actions.
//!
//! Each event captures who did what, to which visitor or appeal, and the
//! outcome. Events are written after the underlying store write commits, so
//! an audit record never describes a transition that did not happen.
//!
//! # Event Structure
//!
//! Every audit event includes:
//! - **Timestamp**: When the action occurred (UTC, RFC 3339)
//! - **Event ID**: UUID v4 for deduplication
//! - **Principal**: Administrator id, or `system` for automated repairs
//! - **Action**: Ban, unban, recategorize, purge, notes, appeal review
//! - **Resource**: Target visitor and/or appeal
//! - **Outcome**: Success or failure with detail

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::types::{AppealId, BanCategory, VisitorId};

/// Outcome of an audited operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// Operation completed successfully.
    Success,
    /// Operation failed with an error.
    Failed {
        /// Error code or category.
        code: String,
        /// Human-readable error description.
        detail: String,
    },
}

/// Auditable administrator actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    // --- Access policy ---
    /// Visitor banned.
    Ban,
    /// Visitor unbanned.
    Unban,
    /// Ban category changed.
    Recategorize,
    /// Visitor purged.
    DeleteVisitor,
    /// Admin notes replaced.
    SetAdminNotes,
    /// Ban record repaired to match visitor status.
    ReconcileBanRecord,

    // --- Appeals ---
    /// Appeal marked reviewed.
    ReviewAppeal,
    /// Appeal approved or rejected.
    DecideAppeal,
}

impl AuditAction {
    /// Returns the action as a static string label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ban => "ban",
            Self::Unban => "unban",
            Self::Recategorize => "recategorize",
            Self::DeleteVisitor => "delete_visitor",
            Self::SetAdminNotes => "set_admin_notes",
            Self::ReconcileBanRecord => "reconcile_ban_record",
            Self::ReviewAppeal => "review_appeal",
            Self::DecideAppeal => "decide_appeal",
        }
    }
}

/// The target resource of an audited operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditResource {
    /// Target visitor (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visitor_id: Option<VisitorId>,
    /// Target appeal (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appeal_id: Option<AppealId>,
    /// Additional resource context (e.g., decision, repair kind).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AuditResource {
    /// Creates a resource targeting a visitor.
    pub fn visitor(visitor_id: VisitorId) -> Self {
        Self { visitor_id: Some(visitor_id), appeal_id: None, detail: None }
    }

    /// Creates a resource targeting an appeal about a visitor.
    pub fn appeal(appeal_id: AppealId, visitor_id: VisitorId) -> Self {
        Self { visitor_id: Some(visitor_id), appeal_id: Some(appeal_id), detail: None }
    }

    /// Adds a detail string to the resource.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// A structured audit event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// RFC 3339 UTC timestamp of the event.
    pub timestamp: String,
    /// Unique event identifier (UUID v4).
    pub event_id: String,
    /// Principal who performed the action.
    pub principal: String,
    /// The audited action.
    pub action: AuditAction,
    /// Target resource.
    pub resource: AuditResource,
    /// Operation outcome.
    pub outcome: AuditOutcome,
    /// Ban category in effect after the action (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<BanCategory>,
    /// Reason given for the action (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEvent {
    /// Creates a successful event stamped with the current time and a fresh id.
    pub fn success(principal: impl Into<String>, action: AuditAction, resource: AuditResource) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            event_id: uuid::Uuid::new_v4().to_string(),
            principal: principal.into(),
            action,
            resource,
            outcome: AuditOutcome::Success,
            category: None,
            reason: None,
        }
    }

    /// Attaches the ban category.
    #[must_use]
    pub fn with_category(mut self, category: BanCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// Attaches the reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Replaces the outcome.
    #[must_use]
    pub fn with_outcome(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = outcome;
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_action_as_str_matches_serde() {
        for action in [
            AuditAction::Ban,
            AuditAction::Unban,
            AuditAction::Recategorize,
            AuditAction::DeleteVisitor,
            AuditAction::SetAdminNotes,
            AuditAction::ReconcileBanRecord,
            AuditAction::ReviewAppeal,
            AuditAction::DecideAppeal,
        ] {
            let json = serde_json::to_string(&action).expect("serialize");
            assert_eq!(json, format!("\"{}\"", action.as_str()));
        }
    }

    #[test]
    fn test_audit_resource_appeal_carries_both_ids() {
        let appeal_id = AppealId::generate();
        let visitor_id = VisitorId::generate();
        let r = AuditResource::appeal(appeal_id, visitor_id).with_detail("approved");
        assert_eq!(r.appeal_id, Some(appeal_id));
        assert_eq!(r.visitor_id, Some(visitor_id));
        assert_eq!(r.detail.as_deref(), Some("approved"));
    }

    #[test]
    fn test_audit_event_skips_none_fields() {
        let event = AuditEvent::success(
            "admin1",
            AuditAction::Unban,
            AuditResource::visitor(VisitorId::generate()),
        );
        let json = serde_json::to_string(&event).expect("serialize");
        assert!(!json.contains("appeal_id"));
        assert!(!json.contains("category"));
        assert!(!json.contains("reason"));
        assert!(json.contains("\"success\""));
    }

    #[test]
    fn test_audit_outcome_failed_serde() {
        let outcome = AuditOutcome::Failed { code: "4002".to_string(), detail: "gone".to_string() };
        let json = serde_json::to_string(&outcome).expect("serialize");
        let back: AuditOutcome = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, outcome);
    }
}
