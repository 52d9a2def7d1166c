//! Appeal workflow.
//!
//! Appeals move `pending → (reviewed) → approved | rejected`. Approval lifts
//! the visitor's ban through the access policy engine. The appeal transition
//! is committed first and is never rolled back by a failing unban; both
//! outcomes are reported.

use std::{fmt, sync::Arc};

use chrono::Utc;
use serde::Deserialize;
use tracing::{info, instrument, warn};
use vigil_store::{AppealPage, AppealQuery, StoreGateway};
use vigil_types::{
    Appeal, AppealDecision, AppealId, AppealStatus, Result, StatusChangeEvent, TransitionKind,
    VigilError, VisitorId,
    audit::{AuditAction, AuditEvent, AuditResource},
    config::ValidationConfig,
    validation::{
        validate_admin_id, validate_appeal_message, validate_email, validate_optional_text,
        validate_required_text,
    },
};

use crate::{
    audit::{self, AuditLogger, NullAuditLogger},
    policy::{AccessPolicy, PolicyOutcome},
};

fn null_audit() -> Arc<dyn AuditLogger> {
    Arc::new(NullAuditLogger)
}

/// A visitor's appeal submission.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, bon::Builder)]
pub struct SubmitAppeal {
    /// Appealing visitor.
    pub visitor_id: VisitorId,
    /// Contact name.
    #[builder(into)]
    pub name: String,
    /// Contact email.
    #[builder(into)]
    pub email: String,
    /// Short subject line.
    #[builder(into)]
    pub subject: String,
    /// Appeal body.
    #[builder(into)]
    pub message: String,
    /// Ban reason as shown to the visitor when they appealed.
    #[serde(default)]
    #[builder(into)]
    pub ban_reason_snapshot: Option<String>,
}

/// Effect of an approval on the visitor's ban.
#[derive(Debug, Clone)]
pub enum UnbanOutcome {
    /// The ban was lifted.
    Unbanned {
        /// Status flip published to watchers.
        event: Option<StatusChangeEvent>,
    },
    /// The visitor was no longer banned.
    AlreadyActive,
    /// The unban failed. The appeal decision still stands.
    Failed {
        /// Why the unban failed.
        error: VigilError,
    },
}

/// Both outcomes of [`AppealWorkflow::decide`].
#[derive(Debug, Clone)]
pub struct DecisionReport {
    /// Appeal after the decision.
    pub appeal: Appeal,
    /// Unban outcome, present only for approvals.
    pub unban: Option<UnbanOutcome>,
}

impl DecisionReport {
    /// Returns true if an approval could not lift the ban.
    #[must_use]
    pub fn unban_failed(&self) -> bool {
        matches!(self.unban, Some(UnbanOutcome::Failed { .. }))
    }
}

/// The appeal workflow.
#[derive(Clone, bon::Builder)]
#[builder(on(_, required))]
pub struct AppealWorkflow {
    /// Store access.
    gateway: StoreGateway,
    /// Engine used to lift bans on approval.
    policy: AccessPolicy,
    /// Audit sink for review decisions.
    #[builder(default = null_audit())]
    audit: Arc<dyn AuditLogger>,
    /// Input length limits.
    #[builder(default)]
    validation: ValidationConfig,
}

impl fmt::Debug for AppealWorkflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppealWorkflow").field("validation", &self.validation).finish_non_exhaustive()
    }
}

impl AppealWorkflow {
    /// Validates and persists a pending appeal.
    ///
    /// Works whatever the visitor's current status is. When no ban reason
    /// snapshot is supplied, the visitor's current ban reason is recorded if
    /// there is one.
    ///
    /// # Errors
    ///
    /// `Validation` for bad fields, or store failures after retries.
    #[instrument(skip_all, fields(visitor_id = %submission.visitor_id))]
    pub async fn submit(&self, submission: SubmitAppeal) -> Result<Appeal> {
        let limits = &self.validation;
        let name = validate_required_text("name", &submission.name, limits.max_name_chars)?;
        let email = validate_email(&submission.email)?;
        let subject = validate_required_text("subject", &submission.subject, limits.max_subject_chars)?;
        let message = validate_appeal_message(&submission.message, limits)?;
        let snapshot = validate_optional_text(
            "ban_reason_snapshot",
            submission.ban_reason_snapshot.as_deref(),
            limits.max_reason_chars,
        )?;

        let original_ban_reason = match snapshot {
            Some(reason) => Some(reason),
            None => self
                .gateway
                .get_visitor(submission.visitor_id)
                .await?
                .and_then(|visitor| visitor.ban_reason),
        };

        let appeal = Appeal {
            id: AppealId::generate(),
            visitor_id: submission.visitor_id,
            name,
            email,
            subject,
            message,
            original_ban_reason,
            submitted_at: Utc::now(),
            status: AppealStatus::Pending,
            reviewed_at: None,
            reviewed_by: None,
            review_notes: None,
        };
        self.gateway.create_appeal(&appeal).await?;
        info!(appeal_id = %appeal.id, visitor_id = %appeal.visitor_id, "appeal submitted");
        Ok(appeal)
    }

    /// Marks a pending appeal as reviewed.
    ///
    /// # Errors
    ///
    /// `AppealNotFound`, `InvalidTransition` (`AppealNotPending`), or store failures.
    #[instrument(skip_all, fields(appeal_id = %appeal_id))]
    pub async fn mark_reviewed(
        &self,
        appeal_id: AppealId,
        reviewer: &str,
        notes: Option<&str>,
    ) -> Result<Appeal> {
        let reviewer = validate_admin_id(reviewer)?;
        let notes = validate_optional_text("notes", notes, self.validation.max_notes_chars)?;
        let now = Utc::now();

        let mutator = |current: &Appeal| -> Result<Appeal> {
            let mut next = current.clone();
            next.mark_reviewed(&reviewer, notes.clone(), now)?;
            Ok(next)
        };
        let appeal = self.gateway.update_appeal(appeal_id, &mutator).await?;

        info!(appeal_id = %appeal_id, reviewer = %reviewer, "appeal marked reviewed");
        self.record(AuditEvent::success(
            &reviewer,
            AuditAction::ReviewAppeal,
            AuditResource::appeal(appeal_id, appeal.visitor_id),
        ));
        Ok(appeal)
    }

    /// Records a terminal decision and, on approval, lifts the ban.
    ///
    /// # Errors
    ///
    /// `AppealNotFound`, `InvalidTransition` (`AppealFinalized`), or store
    /// failures while recording the decision. A failing unban is reported in
    /// [`DecisionReport::unban`], not as an error.
    #[instrument(skip_all, fields(appeal_id = %appeal_id, ?decision))]
    pub async fn decide(
        &self,
        appeal_id: AppealId,
        decision: AppealDecision,
        reviewer: &str,
        notes: Option<&str>,
    ) -> Result<DecisionReport> {
        let reviewer = validate_admin_id(reviewer)?;
        let notes = validate_optional_text("notes", notes, self.validation.max_notes_chars)?;
        let now = Utc::now();

        let mutator = |current: &Appeal| -> Result<Appeal> {
            let mut next = current.clone();
            next.decide(decision, &reviewer, notes.clone(), now)?;
            Ok(next)
        };
        let appeal = self.gateway.update_appeal(appeal_id, &mutator).await?;

        info!(
            appeal_id = %appeal_id,
            visitor_id = %appeal.visitor_id,
            reviewer = %reviewer,
            status = %appeal.status,
            "appeal decided"
        );
        self.record(
            AuditEvent::success(
                &reviewer,
                AuditAction::DecideAppeal,
                AuditResource::appeal(appeal_id, appeal.visitor_id)
                    .with_detail(appeal.status.as_str()),
            ),
        );

        let unban = match decision {
            AppealDecision::Rejected => None,
            AppealDecision::Approved => Some(self.lift_ban(&appeal, &reviewer).await),
        };
        Ok(DecisionReport { appeal, unban })
    }

    /// Reads an appeal.
    ///
    /// # Errors
    ///
    /// `AppealNotFound`, or store failures after retries.
    pub async fn get_appeal(&self, appeal_id: AppealId) -> Result<Appeal> {
        self.gateway.require_appeal(appeal_id).await
    }

    /// Lists appeals newest first, with counts from the same snapshot.
    ///
    /// # Errors
    ///
    /// `Validation` for a bad cursor or limit, or store failures after retries.
    pub async fn list_appeals(&self, query: &AppealQuery) -> Result<AppealPage> {
        self.gateway.list_appeals(query).await
    }

    async fn lift_ban(&self, appeal: &Appeal, reviewer: &str) -> UnbanOutcome {
        match self.policy.unban(appeal.visitor_id, reviewer).await {
            Ok(PolicyOutcome::Applied { event, .. }) => UnbanOutcome::Unbanned { event },
            Ok(PolicyOutcome::Unchanged { .. }) => UnbanOutcome::AlreadyActive,
            Err(err) if err.transition_kind() == Some(TransitionKind::NotBanned) => {
                UnbanOutcome::AlreadyActive
            },
            Err(error) => {
                warn!(
                    appeal_id = %appeal.id,
                    visitor_id = %appeal.visitor_id,
                    error = %error,
                    "appeal approved but unban failed"
                );
                UnbanOutcome::Failed { error }
            },
        }
    }

    fn record(&self, event: AuditEvent) {
        audit::emit(self.audit.as_ref(), event);
    }
}
