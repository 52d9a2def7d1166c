//! Access policy engine.
//!
//! The only writer of visitor access status. Every transition is expressed as
//! a mutator run inside one atomic store update, so the status flip, the
//! category history entry and the ban record change commit together.
//!
//! ```text
//!            ban                      recategorize (a -> b, a != b)
//!   active ───────────▶ banned ◀─────────────┐
//!      ▲                  │ └─────────────────┘
//!      └──────────────────┘
//!            unban
//! ```

use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use vigil_store::{
    BanRecordChange, Mutation, StoreGateway, UpsertOutcome, VisitorPage, VisitorQuery, VisitorWrite,
};
use vigil_types::{
    AdminId, BanCategory, BanCategoryHistoryEntry, BanRecord, CategoryChangeKind, PublicStatus,
    Result, StatusChangeEvent, TransitionKind, VigilError, Visitor, VisitorId, VisitorStatus,
    audit::{AuditAction, AuditEvent, AuditResource},
    config::{PolicyConfig, ValidationConfig},
    validation::{validate_admin_id, validate_optional_text, validate_required_text},
};

use crate::{
    audit::{self, AuditLogger, NullAuditLogger},
    category::{BanAdvice, effective_category},
};

fn null_audit() -> Arc<dyn AuditLogger> {
    Arc::new(NullAuditLogger)
}

fn not_found(id: VisitorId) -> VigilError {
    VigilError::VisitorNotFound { id: id.to_string() }
}

fn status_label(visitor: &Visitor) -> String {
    match visitor.ban_category {
        Some(category) if visitor.is_banned() => format!("banned ({category})"),
        _ => visitor.status.to_string(),
    }
}

fn rejected(visitor: &Visitor, kind: TransitionKind) -> VigilError {
    VigilError::InvalidTransition { id: visitor.id.to_string(), kind, current: status_label(visitor) }
}

/// Request to ban one visitor.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder)]
pub struct BanRequest {
    /// Visitor to ban.
    pub visitor_id: VisitorId,
    /// Ban reason shown to the visitor.
    #[builder(into)]
    pub reason: String,
    /// Free-text detail when the reason is a preset.
    #[builder(into)]
    pub custom_reason: Option<String>,
    /// Category. When absent the reason dictionary decides, falling back to `normal`.
    pub category: Option<BanCategory>,
    /// Administrator issuing the ban.
    #[builder(into)]
    pub admin_id: AdminId,
}

/// Result of a single-visitor transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyOutcome {
    /// The transition was committed.
    Applied {
        /// Visitor after the transition.
        visitor: Visitor,
        /// Status flip published to watchers, if the transition flipped status.
        event: Option<StatusChangeEvent>,
    },
    /// The request was already satisfied; nothing was written.
    Unchanged {
        /// Current visitor.
        visitor: Visitor,
        /// Advisory message for the administrator.
        warning: String,
    },
}

impl PolicyOutcome {
    /// Visitor after the call.
    #[must_use]
    pub fn visitor(&self) -> &Visitor {
        match self {
            Self::Applied { visitor, .. } | Self::Unchanged { visitor, .. } => visitor,
        }
    }

    /// Returns true if a write was committed.
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// What [`AccessPolicy::reconcile`] repaired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum ReconcileOutcome {
    /// Status and ban records already agreed.
    Consistent,
    /// A banned visitor had no single active record; one was opened.
    OpenedRecord,
    /// An active visitor had active records; they were closed.
    ClosedRecords {
        /// Records closed.
        count: usize,
    },
}

/// Bulk action kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkAction {
    /// Ban every listed visitor.
    Ban,
    /// Unban every listed visitor.
    Unban,
    /// Purge every listed visitor.
    Delete,
}

impl BulkAction {
    /// Returns a stable lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ban => "ban",
            Self::Unban => "unban",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for BulkAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request to apply one action to many visitors.
///
/// Ids are kept as raw strings so a malformed id fails only its own item.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder)]
pub struct BulkRequest {
    /// Action to apply.
    pub action: BulkAction,
    /// Target visitor ids.
    pub visitor_ids: Vec<String>,
    /// Ban reason. Required for [`BulkAction::Ban`].
    #[builder(into)]
    pub reason: Option<String>,
    /// Ban category. Defaults to the reason suggestion.
    pub category: Option<BanCategory>,
    /// Administrator issuing the action.
    #[builder(into)]
    pub admin_id: AdminId,
}

/// Per-id outcome of a successful bulk item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkItemOutcome {
    /// The action was committed.
    Applied,
    /// The visitor already satisfied the action.
    Unchanged,
}

/// Result for one id of a bulk request.
#[derive(Debug, Clone)]
pub struct BulkItemResult {
    /// The id as submitted.
    pub visitor_id: String,
    /// Outcome or the error that stopped this id.
    pub result: Result<BulkItemOutcome>,
}

impl BulkItemResult {
    /// Returns true if this id succeeded.
    #[must_use]
    pub fn success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Structured result of a bulk request, one entry per submitted id in order.
#[derive(Debug, Clone)]
pub struct BulkReport {
    /// Action applied.
    pub action: BulkAction,
    /// Per-id results.
    pub results: Vec<BulkItemResult>,
}

impl BulkReport {
    /// Number of ids that succeeded.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success()).count()
    }

    /// Number of ids that failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    /// Returns true if some but not all ids failed.
    #[must_use]
    pub fn is_partial_failure(&self) -> bool {
        self.failed() > 0 && self.succeeded() > 0
    }
}

/// The access policy engine.
#[derive(Clone, bon::Builder)]
#[builder(on(_, required))]
pub struct AccessPolicy {
    /// Store access.
    gateway: StoreGateway,
    /// Audit sink for committed actions.
    #[builder(default = null_audit())]
    audit: Arc<dyn AuditLogger>,
    /// Escalation thresholds and bulk limits.
    #[builder(default)]
    config: PolicyConfig,
    /// Input length limits.
    #[builder(default)]
    validation: ValidationConfig,
}

impl fmt::Debug for AccessPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessPolicy")
            .field("gateway", &self.gateway)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AccessPolicy {
    /// Returns the policy configuration.
    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Bans a visitor.
    ///
    /// Banning a visitor already banned under the same category is a no-op
    /// that returns [`PolicyOutcome::Unchanged`] with a warning.
    ///
    /// # Errors
    ///
    /// - `Validation` for a blank reason or admin id
    /// - `VisitorNotFound`
    /// - `InvalidTransition` (`AlreadyBanned`) when banned under another category
    /// - store failures after retries
    #[instrument(skip_all, fields(visitor_id = %request.visitor_id))]
    pub async fn ban(&self, request: BanRequest) -> Result<PolicyOutcome> {
        let reason = validate_required_text("reason", &request.reason, self.validation.max_reason_chars)?;
        let custom_reason = validate_optional_text(
            "custom_reason",
            request.custom_reason.as_deref(),
            self.validation.max_reason_chars,
        )?;
        let admin_id = validate_admin_id(&request.admin_id)?;
        let category = effective_category(request.category, &reason);
        let id = request.visitor_id;
        let now = Utc::now();

        let mutator = |current: Option<&Visitor>, _records: &[BanRecord]| -> Result<Mutation> {
            let current = current.ok_or_else(|| not_found(id))?;
            if current.is_banned() {
                if current.ban_category == Some(category) {
                    return Ok(Mutation::Skip);
                }
                return Err(rejected(current, TransitionKind::AlreadyBanned));
            }

            let mut next = current.clone();
            next.status = VisitorStatus::Banned;
            next.ban_reason = Some(reason.clone());
            next.ban_timestamp = Some(now);
            next.ban_category = Some(category);
            next.unban_timestamp = None;
            next.ban_category_history.push(BanCategoryHistoryEntry {
                kind: CategoryChangeKind::Ban,
                category,
                previous_category: None,
                reason: reason.clone(),
                admin_id: admin_id.clone(),
                timestamp: now,
            });

            let record = BanRecord {
                visitor_id: id,
                reason: reason.clone(),
                custom_reason: custom_reason.clone(),
                category,
                admin_id: admin_id.clone(),
                timestamp: now,
                is_active: true,
                lifted_at: None,
                lifted_by: None,
            };
            Ok(Mutation::Write(VisitorWrite { visitor: next, ban_record: BanRecordChange::Open(record) }))
        };

        let outcome = self.gateway.upsert_visitor(id, &mutator).await?;
        if !outcome.committed {
            let visitor = committed_image(id, outcome)?;
            let warning = format!("visitor {id} is already banned under category {category}");
            warn!(visitor_id = %id, admin_id = %admin_id, %category, "ban ignored, already banned");
            return Ok(PolicyOutcome::Unchanged { visitor, warning });
        }

        info!(visitor_id = %id, admin_id = %admin_id, %category, "visitor banned");
        self.record(
            AuditEvent::success(&admin_id, AuditAction::Ban, AuditResource::visitor(id))
                .with_category(category)
                .with_reason(reason.as_str()),
        );
        applied(id, outcome)
    }

    /// Lifts a ban.
    ///
    /// # Errors
    ///
    /// - `Validation` for a blank admin id
    /// - `VisitorNotFound`
    /// - `InvalidTransition` (`NotBanned`) when the visitor is active
    /// - store failures after retries
    #[instrument(skip_all, fields(visitor_id = %visitor_id))]
    pub async fn unban(&self, visitor_id: VisitorId, admin_id: &str) -> Result<PolicyOutcome> {
        let admin_id = validate_admin_id(admin_id)?;
        let now = Utc::now();

        let mutator = |current: Option<&Visitor>, _records: &[BanRecord]| -> Result<Mutation> {
            let current = current.ok_or_else(|| not_found(visitor_id))?;
            if !current.is_banned() {
                return Err(rejected(current, TransitionKind::NotBanned));
            }

            let mut next = current.clone();
            next.status = VisitorStatus::Active;
            next.ban_reason = None;
            next.ban_timestamp = None;
            next.ban_category = None;
            next.unban_timestamp = Some(now);
            Ok(Mutation::Write(VisitorWrite {
                visitor: next,
                ban_record: BanRecordChange::Close { at: now, by: Some(admin_id.clone()) },
            }))
        };

        let outcome = self.gateway.upsert_visitor(visitor_id, &mutator).await?;
        info!(visitor_id = %visitor_id, admin_id = %admin_id, "visitor unbanned");
        self.record(AuditEvent::success(
            &admin_id,
            AuditAction::Unban,
            AuditResource::visitor(visitor_id),
        ));
        applied(visitor_id, outcome)
    }

    /// Changes the category of an active ban and appends a history entry.
    ///
    /// # Errors
    ///
    /// - `Validation` for a blank reason or admin id
    /// - `VisitorNotFound`
    /// - `InvalidTransition` (`RecategorizeWhileActive` or `SameCategory`)
    /// - store failures after retries
    #[instrument(skip_all, fields(visitor_id = %visitor_id, %category))]
    pub async fn recategorize(
        &self,
        visitor_id: VisitorId,
        category: BanCategory,
        admin_id: &str,
        reason: &str,
    ) -> Result<PolicyOutcome> {
        let admin_id = validate_admin_id(admin_id)?;
        let reason = validate_required_text("reason", reason, self.validation.max_reason_chars)?;
        let now = Utc::now();

        let mutator = |current: Option<&Visitor>, _records: &[BanRecord]| -> Result<Mutation> {
            let current = current.ok_or_else(|| not_found(visitor_id))?;
            if !current.is_banned() {
                return Err(rejected(current, TransitionKind::RecategorizeWhileActive));
            }
            if current.ban_category == Some(category) {
                return Err(rejected(current, TransitionKind::SameCategory));
            }

            let mut next = current.clone();
            next.ban_category = Some(category);
            next.ban_category_history.push(BanCategoryHistoryEntry {
                kind: CategoryChangeKind::Recategorize,
                category,
                previous_category: current.ban_category,
                reason: reason.clone(),
                admin_id: admin_id.clone(),
                timestamp: now,
            });
            Ok(Mutation::Write(VisitorWrite {
                visitor: next,
                ban_record: BanRecordChange::Recategorize(category),
            }))
        };

        let outcome = self.gateway.upsert_visitor(visitor_id, &mutator).await?;
        info!(visitor_id = %visitor_id, admin_id = %admin_id, %category, "ban recategorized");
        self.record(
            AuditEvent::success(&admin_id, AuditAction::Recategorize, AuditResource::visitor(visitor_id))
                .with_category(category)
                .with_reason(reason.as_str()),
        );
        applied(visitor_id, outcome)
    }

    /// Purges a visitor. Its ban records stay, closed.
    ///
    /// # Errors
    ///
    /// `VisitorNotFound`, or store failures after retries.
    #[instrument(skip_all, fields(visitor_id = %visitor_id))]
    pub async fn delete(&self, visitor_id: VisitorId, admin_id: &str) -> Result<Visitor> {
        let admin_id = validate_admin_id(admin_id)?;
        let removed =
            self.gateway.delete_visitor(visitor_id).await?.ok_or_else(|| not_found(visitor_id))?;
        info!(visitor_id = %visitor_id, admin_id = %admin_id, "visitor purged");
        self.record(AuditEvent::success(
            &admin_id,
            AuditAction::DeleteVisitor,
            AuditResource::visitor(visitor_id),
        ));
        Ok(removed)
    }

    /// Replaces the admin notes of a visitor. Blank notes clear them.
    ///
    /// # Errors
    ///
    /// `Validation` for oversized notes, `VisitorNotFound`, or store failures.
    pub async fn set_admin_notes(
        &self,
        visitor_id: VisitorId,
        notes: Option<&str>,
        admin_id: &str,
    ) -> Result<Visitor> {
        let admin_id = validate_admin_id(admin_id)?;
        let notes = validate_optional_text("admin_notes", notes, self.validation.max_notes_chars)?;

        let mutator = |current: Option<&Visitor>, _records: &[BanRecord]| -> Result<Mutation> {
            let current = current.ok_or_else(|| not_found(visitor_id))?;
            if current.admin_notes == notes {
                return Ok(Mutation::Skip);
            }
            let mut next = current.clone();
            next.admin_notes = notes.clone();
            Ok(Mutation::Write(VisitorWrite::visitor_only(next)))
        };

        let outcome = self.gateway.upsert_visitor(visitor_id, &mutator).await?;
        if outcome.committed {
            self.record(AuditEvent::success(
                &admin_id,
                AuditAction::SetAdminNotes,
                AuditResource::visitor(visitor_id),
            ));
        }
        committed_image(visitor_id, outcome)
    }

    /// Full admin view of a visitor.
    ///
    /// # Errors
    ///
    /// `VisitorNotFound`, or store failures after retries.
    pub async fn get_visitor(&self, visitor_id: VisitorId) -> Result<Visitor> {
        self.gateway.require_visitor(visitor_id).await
    }

    /// Ban records of a visitor, oldest first.
    ///
    /// # Errors
    ///
    /// Store failures after retries.
    pub async fn ban_records(&self, visitor_id: VisitorId) -> Result<Vec<BanRecord>> {
        self.gateway.get_ban_records(visitor_id).await
    }

    /// Lists visitors with store-wide counts.
    ///
    /// # Errors
    ///
    /// `Validation` for a bad cursor or limit, or store failures after retries.
    pub async fn list_visitors(&self, query: &VisitorQuery) -> Result<VisitorPage> {
        self.gateway.list_visitors(query).await
    }

    /// Current access status.
    ///
    /// # Errors
    ///
    /// `VisitorNotFound`, or store failures after retries.
    pub async fn status_of(&self, visitor_id: VisitorId) -> Result<VisitorStatus> {
        Ok(self.gateway.require_visitor(visitor_id).await?.status)
    }

    /// Status for visitor-facing callers. Fails closed: any error, including
    /// an unknown id, yields [`PublicStatus::Unknown`].
    pub async fn public_status(&self, visitor_id: VisitorId) -> PublicStatus {
        match self.status_of(visitor_id).await {
            Ok(status) => status.into(),
            Err(err) => {
                warn!(visitor_id = %visitor_id, error = %err, "public status check failed closed");
                PublicStatus::Unknown
            },
        }
    }

    /// Advisory category suggestions for banning `visitor_id` with `reason`.
    ///
    /// # Errors
    ///
    /// `VisitorNotFound`, or store failures after retries.
    pub async fn advise(&self, visitor_id: VisitorId, reason: &str) -> Result<BanAdvice> {
        let visitor = self.gateway.require_visitor(visitor_id).await?;
        Ok(BanAdvice::new(reason, visitor.prior_ban_count(), &self.config.escalation))
    }

    /// Repairs disagreement between a visitor's status and its ban records.
    ///
    /// A banned visitor must have exactly one active record, an active visitor
    /// none. Status and records are read and repaired in one atomic update,
    /// so a ban or unban committing concurrently is either fully seen or not
    /// seen at all, and is never undone.
    ///
    /// # Errors
    ///
    /// `VisitorNotFound`, or store failures after retries.
    #[instrument(skip_all, fields(visitor_id = %visitor_id))]
    pub async fn reconcile(&self, visitor_id: VisitorId, admin_id: &str) -> Result<ReconcileOutcome> {
        let admin_id = validate_admin_id(admin_id)?;
        let now = Utc::now();
        // Decided under the store lock. The last run of the mutator wins.
        let decided = Mutex::new(ReconcileOutcome::Consistent);

        let mutator = |current: Option<&Visitor>, records: &[BanRecord]| -> Result<Mutation> {
            let current = current.ok_or_else(|| not_found(visitor_id))?;
            let active_records = records.iter().filter(|r| r.is_active).count();
            let (outcome, change) = match (current.status, active_records) {
                (VisitorStatus::Banned, 1) | (VisitorStatus::Active, 0) => {
                    *decided.lock() = ReconcileOutcome::Consistent;
                    return Ok(Mutation::Skip);
                },
                (VisitorStatus::Banned, _) => (
                    ReconcileOutcome::OpenedRecord,
                    BanRecordChange::Open(record_for(current, &admin_id, now)),
                ),
                (VisitorStatus::Active, count) => (
                    ReconcileOutcome::ClosedRecords { count },
                    BanRecordChange::Close { at: now, by: Some(admin_id.clone()) },
                ),
            };
            *decided.lock() = outcome;
            Ok(Mutation::Write(VisitorWrite { visitor: current.clone(), ban_record: change }))
        };

        let outcome = self.gateway.upsert_visitor(visitor_id, &mutator).await?;
        let result = decided.into_inner();
        if !outcome.committed {
            return Ok(ReconcileOutcome::Consistent);
        }

        warn!(visitor_id = %visitor_id, admin_id = %admin_id, ?result, "ban records reconciled");
        self.record(
            AuditEvent::success(
                &admin_id,
                AuditAction::ReconcileBanRecord,
                AuditResource::visitor(visitor_id).with_detail(format!("{result:?}")),
            ),
        );
        Ok(result)
    }

    /// Applies one action to many visitors.
    ///
    /// Each id is processed independently, up to `bulk_concurrency` at a
    /// time. A failing id never aborts the others; the report lists every id
    /// in submission order.
    ///
    /// # Errors
    ///
    /// `Validation` when the request as a whole is malformed: no ids, more
    /// than `max_bulk_ids`, a missing ban reason, or a bad admin id.
    #[instrument(skip_all, fields(action = %request.action, count = request.visitor_ids.len()))]
    pub async fn bulk(&self, request: BulkRequest) -> Result<BulkReport> {
        let admin_id = validate_admin_id(&request.admin_id)?;
        if request.visitor_ids.is_empty() {
            return Err(VigilError::Validation {
                field: "visitor_ids".to_string(),
                constraint: "must not be empty".to_string(),
            });
        }
        if request.visitor_ids.len() > self.config.max_bulk_ids {
            return Err(VigilError::Validation {
                field: "visitor_ids".to_string(),
                constraint: format!("at most {} ids per request", self.config.max_bulk_ids),
            });
        }
        let reason = match (request.action, request.reason.as_deref()) {
            (BulkAction::Ban, reason) => Some(validate_required_text(
                "reason",
                reason.unwrap_or_default(),
                self.validation.max_reason_chars,
            )?),
            (_, _) => None,
        };
        let category = reason.as_deref().map(|r| effective_category(request.category, r));

        let action = request.action;
        let results: Vec<BulkItemResult> = stream::iter(request.visitor_ids)
            .map(|raw| {
                let admin_id = admin_id.as_str();
                let reason = reason.as_deref();
                async move {
                    let result = self.bulk_item(action, &raw, reason, category, admin_id).await;
                    BulkItemResult { visitor_id: raw, result }
                }
            })
            .buffered(self.config.bulk_concurrency.max(1))
            .collect()
            .await;

        let report = BulkReport { action, results };
        if report.failed() > 0 {
            warn!(
                action = %action,
                succeeded = report.succeeded(),
                failed = report.failed(),
                "bulk action finished with failures"
            );
        } else {
            info!(action = %action, succeeded = report.succeeded(), "bulk action finished");
        }
        Ok(report)
    }

    async fn bulk_item(
        &self,
        action: BulkAction,
        raw_id: &str,
        reason: Option<&str>,
        category: Option<BanCategory>,
        admin_id: &str,
    ) -> Result<BulkItemOutcome> {
        let visitor_id: VisitorId = raw_id.parse().map_err(|_| VigilError::Validation {
            field: "visitor_id".to_string(),
            constraint: format!("{raw_id:?} is not a valid visitor id"),
        })?;

        let outcome = match action {
            BulkAction::Ban => {
                let request = BanRequest {
                    visitor_id,
                    reason: reason.unwrap_or_default().to_string(),
                    custom_reason: None,
                    category,
                    admin_id: admin_id.to_string(),
                };
                self.ban(request).await?
            },
            BulkAction::Unban => self.unban(visitor_id, admin_id).await?,
            BulkAction::Delete => {
                self.delete(visitor_id, admin_id).await?;
                return Ok(BulkItemOutcome::Applied);
            },
        };
        Ok(if outcome.is_applied() { BulkItemOutcome::Applied } else { BulkItemOutcome::Unchanged })
    }

    fn record(&self, event: AuditEvent) {
        audit::emit(self.audit.as_ref(), event);
    }
}

fn record_for(visitor: &Visitor, reconciler: &str, now: DateTime<Utc>) -> BanRecord {
    let banned_by = visitor
        .ban_category_history
        .iter()
        .rev()
        .find(|entry| entry.kind == CategoryChangeKind::Ban)
        .map_or_else(|| reconciler.to_string(), |entry| entry.admin_id.clone());
    BanRecord {
        visitor_id: visitor.id,
        reason: visitor.ban_reason.clone().unwrap_or_default(),
        custom_reason: None,
        category: visitor.ban_category.unwrap_or(BanCategory::Normal),
        admin_id: banned_by,
        timestamp: visitor.ban_timestamp.unwrap_or(now),
        is_active: true,
        lifted_at: None,
        lifted_by: None,
    }
}

fn committed_image(id: VisitorId, outcome: UpsertOutcome) -> Result<Visitor> {
    outcome.visitor.ok_or_else(|| not_found(id))
}

fn applied(id: VisitorId, outcome: UpsertOutcome) -> Result<PolicyOutcome> {
    let event = outcome.event.clone();
    Ok(PolicyOutcome::Applied { visitor: committed_image(id, outcome)?, event })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use vigil_store::{DocumentStore, InMemoryStore};
    use vigil_test_utils::test_gateway_config;
    use vigil_types::{ErrorCode, FingerprintHash};

    use super::*;
    use crate::audit::MemoryAuditLogger;

    struct Harness {
        store: Arc<InMemoryStore>,
        audit: Arc<MemoryAuditLogger>,
        policy: AccessPolicy,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let audit = Arc::new(MemoryAuditLogger::new());
        let policy = AccessPolicy::builder()
            .gateway(StoreGateway::new(store.clone(), test_gateway_config()))
            .audit(audit.clone())
            .build();
        Harness { store, audit, policy }
    }

    fn seed(store: &InMemoryStore) -> VisitorId {
        let visitor =
            Visitor::first_contact(VisitorId::generate(), FingerprintHash::new("fp"), Utc::now());
        let id = visitor.id;
        store.seed_visitor(visitor);
        id
    }

    fn ban_request(id: VisitorId, category: BanCategory) -> BanRequest {
        BanRequest::builder()
            .visitor_id(id)
            .reason("spam")
            .category(category)
            .admin_id("admin1")
            .build()
    }

    async fn active_records(store: &InMemoryStore, id: VisitorId) -> usize {
        store.get_ban_records(id).await.unwrap().iter().filter(|r| r.is_active).count()
    }

    #[tokio::test]
    async fn test_ban_sets_fields_history_and_record() {
        let h = harness();
        let id = seed(&h.store);

        let outcome = h.policy.ban(ban_request(id, BanCategory::Medium)).await.unwrap();
        let PolicyOutcome::Applied { visitor, event } = outcome else {
            panic!("expected applied ban");
        };
        assert!(visitor.is_banned());
        assert!(visitor.is_status_consistent());
        assert_eq!(visitor.ban_category, Some(BanCategory::Medium));
        assert_eq!(visitor.ban_category_history.len(), 1);
        assert!(event.unwrap().is_ban());
        assert_eq!(active_records(&h.store, id).await, 1);
        assert_eq!(h.audit.events()[0].action, AuditAction::Ban);
    }

    #[tokio::test]
    async fn test_ban_without_category_uses_reason_dictionary() {
        let h = harness();
        let id = seed(&h.store);
        let request = BanRequest::builder()
            .visitor_id(id)
            .reason("phishing links")
            .admin_id("admin1")
            .build();
        let outcome = h.policy.ban(request).await.unwrap();
        assert_eq!(outcome.visitor().ban_category, Some(BanCategory::Danger));
    }

    #[tokio::test]
    async fn test_repeat_ban_same_category_is_noop() {
        let h = harness();
        let id = seed(&h.store);
        let first = h.policy.ban(ban_request(id, BanCategory::Normal)).await.unwrap();
        let second = h.policy.ban(ban_request(id, BanCategory::Normal)).await.unwrap();

        assert!(matches!(second, PolicyOutcome::Unchanged { .. }));
        assert_eq!(second.visitor(), first.visitor());
        assert_eq!(active_records(&h.store, id).await, 1);
        assert_eq!(h.audit.events().len(), 1);
    }

    #[tokio::test]
    async fn test_ban_under_other_category_is_rejected() {
        let h = harness();
        let id = seed(&h.store);
        h.policy.ban(ban_request(id, BanCategory::Normal)).await.unwrap();
        let err = h.policy.ban(ban_request(id, BanCategory::Severe)).await.unwrap_err();
        assert_eq!(err.transition_kind(), Some(TransitionKind::AlreadyBanned));
    }

    #[tokio::test]
    async fn test_unban_active_visitor_is_rejected() {
        let h = harness();
        let id = seed(&h.store);
        let err = h.policy.unban(id, "admin1").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidTransition);
        assert_eq!(err.transition_kind(), Some(TransitionKind::NotBanned));
    }

    #[tokio::test]
    async fn test_unban_clears_fields_and_closes_record() {
        let h = harness();
        let id = seed(&h.store);
        h.policy.ban(ban_request(id, BanCategory::Danger)).await.unwrap();
        let outcome = h.policy.unban(id, "admin2").await.unwrap();

        let visitor = outcome.visitor();
        assert!(!visitor.is_banned());
        assert!(visitor.is_status_consistent());
        assert!(visitor.unban_timestamp.is_some());
        let records = h.store.get_ban_records(id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(!records[0].is_active);
        assert_eq!(records[0].lifted_by.as_deref(), Some("admin2"));
    }

    #[tokio::test]
    async fn test_recategorize_rules() {
        let h = harness();
        let id = seed(&h.store);

        let err = h.policy.recategorize(id, BanCategory::Danger, "admin1", "worse").await.unwrap_err();
        assert_eq!(err.transition_kind(), Some(TransitionKind::RecategorizeWhileActive));

        h.policy.ban(ban_request(id, BanCategory::Normal)).await.unwrap();
        let err = h.policy.recategorize(id, BanCategory::Normal, "admin1", "same").await.unwrap_err();
        assert_eq!(err.transition_kind(), Some(TransitionKind::SameCategory));

        let outcome =
            h.policy.recategorize(id, BanCategory::Severe, "admin1", "escalated").await.unwrap();
        let visitor = outcome.visitor();
        assert_eq!(visitor.ban_category, Some(BanCategory::Severe));
        let last = visitor.ban_category_history.last().unwrap();
        assert_eq!(last.kind, CategoryChangeKind::Recategorize);
        assert_eq!(last.previous_category, Some(BanCategory::Normal));

        let records = h.store.get_ban_records(id).await.unwrap();
        assert_eq!(records[0].category, BanCategory::Severe);
    }

    #[tokio::test]
    async fn test_transitions_on_unknown_visitor() {
        let h = harness();
        let id = VisitorId::generate();
        let err = h.policy.ban(ban_request(id, BanCategory::Normal)).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::VisitorNotFound);
        let err = h.policy.delete(id, "admin1").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::VisitorNotFound);
    }

    #[tokio::test]
    async fn test_blank_reason_is_validation_error() {
        let h = harness();
        let id = seed(&h.store);
        let request = BanRequest::builder().visitor_id(id).reason("   ").admin_id("admin1").build();
        let err = h.policy.ban(request).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidInput);
    }

    #[tokio::test]
    async fn test_admin_notes_are_independent_of_ban_state() {
        let h = harness();
        let id = seed(&h.store);
        h.policy.ban(ban_request(id, BanCategory::Normal)).await.unwrap();
        let visitor = h.policy.set_admin_notes(id, Some("  repeat offender "), "admin1").await.unwrap();
        assert_eq!(visitor.admin_notes.as_deref(), Some("repeat offender"));
        assert!(visitor.is_banned());

        let cleared = h.policy.set_admin_notes(id, Some(""), "admin1").await.unwrap();
        assert_eq!(cleared.admin_notes, None);
    }

    #[tokio::test]
    async fn test_public_status_fails_closed() {
        let h = harness();
        let id = seed(&h.store);
        assert_eq!(h.policy.public_status(id).await, PublicStatus::Active);
        assert_eq!(h.policy.public_status(VisitorId::generate()).await, PublicStatus::Unknown);

        h.store.fail_next(100);
        assert_eq!(h.policy.public_status(id).await, PublicStatus::Unknown);
    }

    #[tokio::test]
    async fn test_advise_counts_prior_bans() {
        let h = harness();
        let id = seed(&h.store);
        for _ in 0..3 {
            h.policy.ban(ban_request(id, BanCategory::Normal)).await.unwrap();
            h.policy.unban(id, "admin1").await.unwrap();
        }
        let advice = h.policy.advise(id, "harassment").await.unwrap();
        assert_eq!(advice.prior_bans, 3);
        assert_eq!(advice.from_history, Some(BanCategory::Danger));
        assert_eq!(advice.from_reason, Some(BanCategory::Danger));
    }

    #[tokio::test]
    async fn test_reconcile_opens_missing_record() {
        let h = harness();
        let mut visitor =
            Visitor::first_contact(VisitorId::generate(), FingerprintHash::new("fp"), Utc::now());
        visitor.status = VisitorStatus::Banned;
        visitor.ban_reason = Some("spam".to_string());
        visitor.ban_category = Some(BanCategory::Medium);
        visitor.ban_timestamp = Some(Utc::now());
        let id = visitor.id;
        h.store.seed_visitor(visitor);

        let outcome = h.policy.reconcile(id, "admin1").await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::OpenedRecord);
        let records = h.store.get_ban_records(id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].category, BanCategory::Medium);
        assert_eq!(records[0].admin_id, "admin1");

        assert_eq!(h.policy.reconcile(id, "admin1").await.unwrap(), ReconcileOutcome::Consistent);
    }

    #[tokio::test]
    async fn test_reconcile_closes_dangling_record() {
        let h = harness();
        let id = seed(&h.store);
        h.store.seed_ban_record(BanRecord {
            visitor_id: id,
            reason: "spam".to_string(),
            custom_reason: None,
            category: BanCategory::Normal,
            admin_id: "admin0".to_string(),
            timestamp: Utc::now(),
            is_active: true,
            lifted_at: None,
            lifted_by: None,
        });

        let outcome = h.policy.reconcile(id, "admin1").await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::ClosedRecords { count: 1 });
        assert_eq!(active_records(&h.store, id).await, 0);
        assert!(!h.policy.get_visitor(id).await.unwrap().is_banned());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_racing_a_ban_leaves_the_ban_record_intact() {
        let h = harness();
        let id = seed(&h.store);
        h.store.set_latency(std::time::Duration::from_millis(100));

        let ban = async {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            let request = BanRequest::builder()
                .visitor_id(id)
                .reason("spam")
                .custom_reason("posted 40 links")
                .category(BanCategory::Normal)
                .admin_id("admin2")
                .build();
            h.policy.ban(request).await
        };
        let (reconciled, banned) = tokio::join!(h.policy.reconcile(id, "admin1"), ban);
        assert_eq!(reconciled.unwrap(), ReconcileOutcome::Consistent);
        assert!(matches!(banned.unwrap(), PolicyOutcome::Applied { .. }));

        h.store.set_latency(std::time::Duration::ZERO);
        let records = h.store.get_ban_records(id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].is_active);
        assert_eq!(records[0].admin_id, "admin2");
        assert_eq!(records[0].custom_reason.as_deref(), Some("posted 40 links"));
        assert!(records[0].lifted_by.is_none());
        assert!(h.audit.events().iter().all(|e| e.action != AuditAction::ReconcileBanRecord));
    }

    #[tokio::test]
    async fn test_reconcile_closes_every_active_record_it_sees() {
        let h = harness();
        let id = seed(&h.store);
        for admin in ["admin0", "admin9"] {
            h.store.seed_ban_record(BanRecord {
                visitor_id: id,
                reason: "spam".to_string(),
                custom_reason: None,
                category: BanCategory::Normal,
                admin_id: admin.to_string(),
                timestamp: Utc::now(),
                is_active: true,
                lifted_at: None,
                lifted_by: None,
            });
        }

        let outcome = h.policy.reconcile(id, "admin1").await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::ClosedRecords { count: 2 });
        assert_eq!(active_records(&h.store, id).await, 0);
    }

    #[tokio::test]
    async fn test_bulk_validation() {
        let h = harness();
        let request = BulkRequest::builder()
            .action(BulkAction::Ban)
            .visitor_ids(vec![VisitorId::generate().to_string()])
            .admin_id("admin1")
            .build();
        let err = h.policy.bulk(request).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidInput);

        let request = BulkRequest::builder()
            .action(BulkAction::Unban)
            .visitor_ids(Vec::new())
            .admin_id("admin1")
            .build();
        assert!(h.policy.bulk(request).await.is_err());
    }

    #[tokio::test]
    async fn test_bulk_reports_each_id_in_order() {
        let h = harness();
        let banned = seed(&h.store);
        let active = seed(&h.store);
        h.policy.ban(ban_request(banned, BanCategory::Normal)).await.unwrap();

        let request = BulkRequest::builder()
            .action(BulkAction::Unban)
            .visitor_ids(vec![banned.to_string(), "garbage".to_string(), active.to_string()])
            .admin_id("admin1")
            .build();
        let report = h.policy.bulk(request).await.unwrap();

        assert_eq!(report.results.len(), 3);
        assert!(report.results[0].success());
        assert_eq!(report.results[1].result.as_ref().unwrap_err().code(), ErrorCode::InvalidInput);
        assert_eq!(
            report.results[2].result.as_ref().unwrap_err().transition_kind(),
            Some(TransitionKind::NotBanned)
        );
        assert!(report.is_partial_failure());
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 2);
    }
}
