//! Appeal records and their review state machine.
//!
//! ```text
//! pending ──► reviewed ──► approved
//!    │                 └──► rejected
//!    ├──────────────────► approved
//!    └──────────────────► rejected
//! ```
//!
//! `approved` and `rejected` are terminal. `reviewed` is an optional marker an
//! administrator may set before deciding.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, TransitionKind, VigilError},
    types::{AdminId, AppealId, VisitorId},
};

/// Review status of an appeal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppealStatus {
    /// Submitted, awaiting an administrator.
    Pending,
    /// Looked at by an administrator, not yet decided.
    Reviewed,
    /// Ban reversal granted.
    Approved,
    /// Ban reversal refused.
    Rejected,
}

impl AppealStatus {
    /// Returns a stable lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Reviewed => "reviewed",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    /// Returns true for `approved` and `rejected`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Reviewed)
                | (Self::Pending | Self::Reviewed, Self::Approved | Self::Rejected)
        )
    }
}

impl fmt::Display for AppealStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome an administrator may choose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppealDecision {
    /// Grant the appeal and lift the ban.
    Approved,
    /// Refuse the appeal.
    Rejected,
}

impl From<AppealDecision> for AppealStatus {
    fn from(decision: AppealDecision) -> Self {
        match decision {
            AppealDecision::Approved => Self::Approved,
            AppealDecision::Rejected => Self::Rejected,
        }
    }
}

/// A visitor-submitted request to reverse a ban.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appeal {
    /// Appeal id.
    pub id: AppealId,
    /// Visitor the appeal is about.
    pub visitor_id: VisitorId,
    /// Appellant name.
    pub name: String,
    /// Appellant contact address.
    pub email: String,
    /// Short subject line.
    pub subject: String,
    /// Appeal body.
    pub message: String,
    /// Ban reason as shown to the visitor at submission time.
    #[serde(default)]
    pub original_ban_reason: Option<String>,
    /// Submission time.
    pub submitted_at: DateTime<Utc>,
    /// Current review status.
    pub status: AppealStatus,
    /// When the appeal last left `pending` or was decided.
    #[serde(default)]
    pub reviewed_at: Option<DateTime<Utc>>,
    /// Administrator who reviewed or decided.
    #[serde(default)]
    pub reviewed_by: Option<AdminId>,
    /// Reviewer notes.
    #[serde(default)]
    pub review_notes: Option<String>,
}

impl Appeal {
    /// Sets the optional `reviewed` marker.
    ///
    /// # Errors
    ///
    /// Returns [`VigilError::InvalidTransition`] unless the appeal is pending.
    pub fn mark_reviewed(
        &mut self,
        reviewer: &str,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if !self.status.can_transition_to(AppealStatus::Reviewed) {
            return Err(VigilError::InvalidTransition {
                id: self.id.to_string(),
                kind: TransitionKind::AppealNotPending,
                current: self.status.to_string(),
            });
        }
        self.status = AppealStatus::Reviewed;
        self.stamp_review(reviewer, notes, now);
        Ok(())
    }

    /// Records a terminal decision.
    ///
    /// # Errors
    ///
    /// Returns [`VigilError::InvalidTransition`] if the appeal is already terminal.
    pub fn decide(
        &mut self,
        decision: AppealDecision,
        reviewer: &str,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let next = AppealStatus::from(decision);
        if !self.status.can_transition_to(next) {
            return Err(VigilError::InvalidTransition {
                id: self.id.to_string(),
                kind: TransitionKind::AppealFinalized,
                current: self.status.to_string(),
            });
        }
        self.status = next;
        self.stamp_review(reviewer, notes, now);
        Ok(())
    }

    fn stamp_review(&mut self, reviewer: &str, notes: Option<String>, now: DateTime<Utc>) {
        self.reviewed_at = Some(now);
        self.reviewed_by = Some(reviewer.to_string());
        // A decision without notes keeps the notes left by an earlier review.
        if notes.is_some() {
            self.review_notes = notes;
        }
    }
}

/// Appeal counts computed from one consistent snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppealStats {
    /// All appeals.
    pub total: usize,
    /// Appeals awaiting review.
    pub pending: usize,
    /// Appeals marked reviewed.
    pub reviewed: usize,
    /// Approved appeals.
    pub approved: usize,
    /// Rejected appeals.
    pub rejected: usize,
}

impl AppealStats {
    /// Counts one appeal.
    pub fn record(&mut self, status: AppealStatus) {
        self.total += 1;
        match status {
            AppealStatus::Pending => self.pending += 1,
            AppealStatus::Reviewed => self.reviewed += 1,
            AppealStatus::Approved => self.approved += 1,
            AppealStatus::Rejected => self.rejected += 1,
        }
    }
}
