//! Command surface.
//!
//! Requests and responses are serde types, one JSON object per line. Core
//! errors stay typed until they reach [`ErrorBody`], where they gain the
//! HTTP-style status used at the boundary.

use serde::{Deserialize, Serialize};
use vigil_access::{
    BanAdvice, BanRequest, BulkAction, BulkItemOutcome, BulkReport, BulkRequest, DecisionReport,
    NotifierSignal, PolicyOutcome, ReconcileOutcome, RedirectPlan, RedirectTarget,
    ResolutionKind, StatusSubscription, SubmitAppeal, UnbanOutcome,
};
use vigil_store::{AppealQuery, VisitorQuery, VisitorSort, VisitorStats};
use vigil_types::{
    Appeal, AppealDecision, AppealId, AppealStats, AppealStatus, BanCategory, BanRecord,
    DeviceFingerprint, ErrorCode, PublicStatus, Result, StatusChangeEvent, VigilError, Visitor,
    VisitorId, VisitorStatus, config::NotifierConfig,
};

use crate::bootstrap::Services;

/// One request line.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    /// Echoed on every response line caused by this request.
    #[serde(default)]
    pub request_id: Option<u64>,
    /// What to do.
    #[serde(flatten)]
    pub command: Command,
}

/// Visitor listing order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Most recently seen first.
    #[default]
    LastVisit,
    /// Most recently created first.
    FirstVisit,
    /// Most frequent visitors first.
    VisitCount,
}

impl From<SortOrder> for VisitorSort {
    fn from(order: SortOrder) -> Self {
        match order {
            SortOrder::LastVisit => Self::LastVisitDesc,
            SortOrder::FirstVisit => Self::FirstVisitDesc,
            SortOrder::VisitCount => Self::VisitCountDesc,
        }
    }
}

/// Commands accepted by the server.
///
/// Ids arrive as strings so that a malformed id is reported as invalid input
/// rather than as an unparseable line.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Resolve a visitor from a stored id and device fingerprint.
    Resolve {
        /// Client-held id, if any.
        #[serde(default)]
        candidate: Option<String>,
        /// Device components.
        fingerprint: DeviceFingerprint,
    },
    /// Public status check. Exposes the status and nothing else.
    StatusCheck {
        /// Visitor to check.
        visitor_id: String,
    },
    /// Ban a visitor.
    Ban {
        /// Target visitor.
        visitor_id: String,
        /// Reason shown to the visitor.
        reason: String,
        /// Free-text elaboration.
        #[serde(default)]
        custom_reason: Option<String>,
        /// Severity. Suggested from the reason when omitted.
        #[serde(default)]
        category: Option<BanCategory>,
        /// Acting administrator.
        admin_id: String,
    },
    /// Lift a ban.
    Unban {
        /// Target visitor.
        visitor_id: String,
        /// Acting administrator.
        admin_id: String,
    },
    /// Change the category of an active ban.
    Recategorize {
        /// Target visitor.
        visitor_id: String,
        /// New category.
        category: BanCategory,
        /// Why the category changed.
        reason: String,
        /// Acting administrator.
        admin_id: String,
    },
    /// Purge a visitor. Ban records are kept.
    Delete {
        /// Target visitor.
        visitor_id: String,
        /// Acting administrator.
        admin_id: String,
    },
    /// Replace a visitor's admin notes.
    SetNotes {
        /// Target visitor.
        visitor_id: String,
        /// New notes. Absent or blank clears them.
        #[serde(default)]
        notes: Option<String>,
        /// Acting administrator.
        admin_id: String,
    },
    /// Apply one action to many visitors.
    Bulk {
        /// Action to apply.
        action: BulkAction,
        /// Target visitors.
        visitor_ids: Vec<String>,
        /// Ban reason, required for `ban`.
        #[serde(default)]
        reason: Option<String>,
        /// Ban category.
        #[serde(default)]
        category: Option<BanCategory>,
        /// Acting administrator.
        admin_id: String,
    },
    /// Category suggestions for a prospective ban.
    Advise {
        /// Target visitor.
        visitor_id: String,
        /// Proposed reason.
        reason: String,
    },
    /// Repair disagreement between status and ban records.
    Reconcile {
        /// Target visitor.
        visitor_id: String,
        /// Acting administrator.
        admin_id: String,
    },
    /// Full admin view of a visitor.
    GetVisitor {
        /// Target visitor.
        visitor_id: String,
    },
    /// Ban history of a visitor.
    BanRecords {
        /// Target visitor.
        visitor_id: String,
    },
    /// List visitors.
    ListVisitors {
        /// Status filter.
        #[serde(default)]
        status: Option<VisitorStatus>,
        /// Order.
        #[serde(default)]
        sort: SortOrder,
        /// Cursor from the previous page.
        #[serde(default)]
        cursor: Option<String>,
        /// Page size.
        #[serde(default)]
        limit: Option<usize>,
    },
    /// Submit an appeal.
    SubmitAppeal {
        /// Appealing visitor.
        visitor_id: String,
        /// Contact name.
        name: String,
        /// Contact email.
        email: String,
        /// Subject line.
        subject: String,
        /// Appeal body.
        message: String,
        /// Ban reason as the visitor saw it.
        #[serde(default)]
        ban_reason_snapshot: Option<String>,
    },
    /// Mark an appeal as reviewed.
    ReviewAppeal {
        /// Target appeal.
        appeal_id: String,
        /// Reviewing administrator.
        reviewer_id: String,
        /// Review notes.
        #[serde(default)]
        notes: Option<String>,
    },
    /// Approve or reject an appeal.
    DecideAppeal {
        /// Target appeal.
        appeal_id: String,
        /// Decision.
        status: AppealDecision,
        /// Deciding administrator.
        reviewer_id: String,
        /// Decision notes.
        #[serde(default)]
        notes: Option<String>,
    },
    /// Fetch one appeal.
    GetAppeal {
        /// Target appeal.
        appeal_id: String,
    },
    /// List appeals, newest first.
    ListAppeals {
        /// Status filter.
        #[serde(default)]
        status: Option<AppealStatus>,
        /// Cursor from the previous page.
        #[serde(default)]
        cursor: Option<String>,
        /// Page size.
        #[serde(default)]
        limit: Option<usize>,
    },
    /// Subscribe to a visitor's status flips.
    Watch {
        /// Target visitor.
        visitor_id: String,
    },
}

impl Command {
    /// Name of the command, for logging.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Resolve { .. } => "resolve",
            Self::StatusCheck { .. } => "status_check",
            Self::Ban { .. } => "ban",
            Self::Unban { .. } => "unban",
            Self::Recategorize { .. } => "recategorize",
            Self::Delete { .. } => "delete",
            Self::SetNotes { .. } => "set_notes",
            Self::Bulk { .. } => "bulk",
            Self::Advise { .. } => "advise",
            Self::Reconcile { .. } => "reconcile",
            Self::GetVisitor { .. } => "get_visitor",
            Self::BanRecords { .. } => "ban_records",
            Self::ListVisitors { .. } => "list_visitors",
            Self::SubmitAppeal { .. } => "submit_appeal",
            Self::ReviewAppeal { .. } => "review_appeal",
            Self::DecideAppeal { .. } => "decide_appeal",
            Self::GetAppeal { .. } => "get_appeal",
            Self::ListAppeals { .. } => "list_appeals",
            Self::Watch { .. } => "watch",
        }
    }
}

/// Store-wide visitor counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsView {
    /// All visitors.
    pub total: usize,
    /// Active visitors.
    pub active: usize,
    /// Banned visitors.
    pub banned: usize,
}

impl From<VisitorStats> for StatsView {
    fn from(stats: VisitorStats) -> Self {
        Self { total: stats.total, active: stats.active, banned: stats.banned }
    }
}

/// Outcome of one bulk id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkItemView {
    /// The id as submitted.
    pub visitor_id: String,
    /// Whether this id succeeded.
    pub ok: bool,
    /// Outcome on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<BulkItemOutcome>,
    /// Error on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

/// Effect of an approval on the ban.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum UnbanView {
    /// The ban was lifted.
    Unbanned {
        /// Published flip.
        event: Option<StatusChangeEvent>,
    },
    /// The visitor was already active.
    AlreadyActive,
    /// The ban could not be lifted. The decision stands.
    Failed {
        /// Why.
        error: ErrorBody,
    },
}

impl From<&UnbanOutcome> for UnbanView {
    fn from(outcome: &UnbanOutcome) -> Self {
        match outcome {
            UnbanOutcome::Unbanned { event } => Self::Unbanned { event: event.clone() },
            UnbanOutcome::AlreadyActive => Self::AlreadyActive,
            UnbanOutcome::Failed { error } => Self::Failed { error: ErrorBody::from(error) },
        }
    }
}

/// Successful command results.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reply {
    /// Canonical id of a resolved visitor.
    Resolved {
        /// Canonical id.
        visitor_id: VisitorId,
        /// How it was reached.
        resolution: ResolutionKind,
    },
    /// Public status. Deliberately carries nothing else.
    Status {
        /// Current status, `unknown` when it could not be determined.
        status: PublicStatus,
    },
    /// Result of a single-visitor transition.
    Transition {
        /// Whether anything was written.
        applied: bool,
        /// Advisory note when nothing was written.
        #[serde(skip_serializing_if = "Option::is_none")]
        warning: Option<String>,
        /// Published flip, if the status changed.
        #[serde(skip_serializing_if = "Option::is_none")]
        event: Option<StatusChangeEvent>,
        /// Visitor after the call.
        visitor: Visitor,
    },
    /// Admin view of a visitor.
    Visitor {
        /// The visitor.
        visitor: Visitor,
    },
    /// A purged visitor.
    Deleted {
        /// Purged id.
        visitor_id: VisitorId,
    },
    /// Ban history.
    BanRecords {
        /// Records, oldest first.
        records: Vec<BanRecord>,
    },
    /// One page of visitors.
    Visitors {
        /// Visitors on this page.
        items: Vec<Visitor>,
        /// Store-wide counts.
        stats: StatsView,
        /// Cursor for the next page.
        next_cursor: Option<String>,
    },
    /// Per-id bulk results.
    Bulk {
        /// Applied action.
        action: BulkAction,
        /// Ids that succeeded.
        succeeded: usize,
        /// Ids that failed.
        failed: usize,
        /// True when some ids failed and others succeeded.
        partial_failure: bool,
        /// One entry per submitted id, in order.
        results: Vec<BulkItemView>,
    },
    /// Category suggestions.
    Advice {
        /// Both suggestions.
        advice: BanAdvice,
        /// The more severe of the two.
        recommended: Option<BanCategory>,
    },
    /// What reconciliation repaired.
    Reconciled {
        /// Repair performed.
        outcome: ReconcileOutcome,
    },
    /// One appeal.
    Appeal {
        /// The appeal.
        appeal: Appeal,
    },
    /// A recorded decision and its unban side effect.
    Decision {
        /// Appeal after the decision.
        appeal: Appeal,
        /// Present for approvals only.
        #[serde(skip_serializing_if = "Option::is_none")]
        unban: Option<UnbanView>,
    },
    /// One page of appeals.
    Appeals {
        /// Appeals on this page.
        items: Vec<Appeal>,
        /// Store-wide counts.
        stats: AppealStats,
        /// Cursor for the next page.
        next_cursor: Option<String>,
    },
    /// A subscription was opened. Signals follow on later lines.
    Watching {
        /// Watched visitor.
        visitor_id: VisitorId,
    },
}

impl From<PolicyOutcome> for Reply {
    fn from(outcome: PolicyOutcome) -> Self {
        match outcome {
            PolicyOutcome::Applied { visitor, event } => {
                Self::Transition { applied: true, warning: None, event, visitor }
            },
            PolicyOutcome::Unchanged { visitor, warning } => {
                Self::Transition { applied: false, warning: Some(warning), event: None, visitor }
            },
        }
    }
}

impl From<BulkReport> for Reply {
    fn from(report: BulkReport) -> Self {
        let succeeded = report.succeeded();
        let failed = report.failed();
        let partial_failure = report.is_partial_failure();
        let results = report
            .results
            .into_iter()
            .map(|item| match item.result {
                Ok(outcome) => BulkItemView {
                    visitor_id: item.visitor_id,
                    ok: true,
                    outcome: Some(outcome),
                    error: None,
                },
                Err(err) => BulkItemView {
                    visitor_id: item.visitor_id,
                    ok: false,
                    outcome: None,
                    error: Some(ErrorBody::from(&err)),
                },
            })
            .collect();
        Self::Bulk { action: report.action, succeeded, failed, partial_failure, results }
    }
}

impl From<DecisionReport> for Reply {
    fn from(report: DecisionReport) -> Self {
        Self::Decision { unban: report.unban.as_ref().map(UnbanView::from), appeal: report.appeal }
    }
}

/// Error crossing the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    /// Stable machine-readable code.
    pub code: u16,
    /// HTTP-style status: 400, 404, 409, 503 or 500.
    pub status: u16,
    /// Human-readable description.
    pub message: String,
    /// What the caller can do about it.
    pub suggested_action: &'static str,
}

impl ErrorBody {
    /// Error for a line that is not a valid request.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        let code = ErrorCode::InvalidInput;
        Self {
            code: code.as_u16(),
            status: code.boundary_status(),
            message: message.into(),
            suggested_action: code.suggested_action(),
        }
    }
}

impl From<&VigilError> for ErrorBody {
    fn from(err: &VigilError) -> Self {
        let code = err.code();
        Self {
            code: code.as_u16(),
            status: code.boundary_status(),
            message: err.to_string(),
            suggested_action: code.suggested_action(),
        }
    }
}

/// Where a client goes after a flip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedirectView {
    /// Countdown before redirecting.
    pub delay_ms: u64,
    /// Destination.
    pub target: RedirectTarget,
}

impl From<RedirectPlan> for RedirectView {
    fn from(plan: RedirectPlan) -> Self {
        Self {
            delay_ms: u64::try_from(plan.delay.as_millis()).unwrap_or(u64::MAX),
            target: plan.target,
        }
    }
}

/// A notifier signal as sent to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum SignalView {
    /// The status flipped.
    StatusChanged {
        /// The flip.
        event: StatusChangeEvent,
        /// Where to send the client.
        redirect: RedirectView,
    },
    /// The subscription gave up reconnecting.
    ConnectionLost {
        /// Reconnect attempts made.
        attempts: u32,
        /// Final error.
        last_error: String,
    },
    /// The visitor was purged.
    VisitorRemoved,
}

impl SignalView {
    /// Converts a signal, planning the redirect for flips.
    #[must_use]
    pub fn new(signal: NotifierSignal, config: &NotifierConfig) -> Self {
        match signal {
            NotifierSignal::StatusChanged(event) => {
                let redirect = RedirectPlan::for_event(&event, config).into();
                Self::StatusChanged { event, redirect }
            },
            NotifierSignal::ConnectionLost { attempts, last_error } => {
                Self::ConnectionLost { attempts, last_error }
            },
            NotifierSignal::VisitorRemoved => Self::VisitorRemoved,
        }
    }

    /// Returns true if no further signals follow.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::StatusChanged { .. })
    }
}

/// A signal tagged with the watched visitor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalEnvelope {
    /// Watched visitor.
    pub visitor_id: VisitorId,
    /// The signal.
    #[serde(flatten)]
    pub signal: SignalView,
}

/// Body of a response line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseBody {
    /// The command succeeded.
    Ok(Reply),
    /// The command failed.
    Error(ErrorBody),
    /// A subscription delivered a signal.
    Signal(SignalEnvelope),
}

/// One response line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    /// Id of the request this line answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    /// Payload.
    #[serde(flatten)]
    pub body: ResponseBody,
}

impl Response {
    /// Response for a finished command.
    #[must_use]
    pub fn from_result(request_id: Option<u64>, result: Result<Reply>) -> Self {
        let body = match result {
            Ok(reply) => ResponseBody::Ok(reply),
            Err(err) => ResponseBody::Error(ErrorBody::from(&err)),
        };
        Self { request_id, body }
    }

    /// Response for a line that could not be parsed.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self { request_id: None, body: ResponseBody::Error(ErrorBody::malformed(message)) }
    }

    /// Response carrying a subscription signal.
    #[must_use]
    pub fn signal(request_id: Option<u64>, visitor_id: VisitorId, signal: SignalView) -> Self {
        Self { request_id, body: ResponseBody::Signal(SignalEnvelope { visitor_id, signal }) }
    }
}

/// Executes commands against the bootstrapped services.
#[derive(Debug, Clone)]
pub struct Api {
    services: Services,
}

impl Api {
    /// Creates the command surface.
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    /// Notifier configuration, for planning redirects.
    pub fn notifier_config(&self) -> &NotifierConfig {
        self.services.notifier.config()
    }

    /// Runs one non-streaming command.
    ///
    /// # Errors
    ///
    /// Whatever the component behind the command returns. `watch` is
    /// rejected here because it needs a session to stream into; see
    /// [`Api::watch`].
    pub async fn execute(&self, command: Command) -> Result<Reply> {
        let Services { resolver, policy, appeals, .. } = &self.services;
        match command {
            Command::Resolve { candidate, fingerprint } => {
                let resolution = resolver.resolve_or_ephemeral(candidate.as_deref(), &fingerprint).await?;
                Ok(Reply::Resolved { visitor_id: resolution.visitor_id, resolution: resolution.kind })
            },
            Command::StatusCheck { visitor_id } => {
                let status = policy.public_status(parse_visitor_id(&visitor_id)?).await;
                Ok(Reply::Status { status })
            },
            Command::Ban { visitor_id, reason, custom_reason, category, admin_id } => {
                let request = BanRequest {
                    visitor_id: parse_visitor_id(&visitor_id)?,
                    reason,
                    custom_reason,
                    category,
                    admin_id,
                };
                Ok(policy.ban(request).await?.into())
            },
            Command::Unban { visitor_id, admin_id } => {
                Ok(policy.unban(parse_visitor_id(&visitor_id)?, &admin_id).await?.into())
            },
            Command::Recategorize { visitor_id, category, reason, admin_id } => {
                let id = parse_visitor_id(&visitor_id)?;
                Ok(policy.recategorize(id, category, &admin_id, &reason).await?.into())
            },
            Command::Delete { visitor_id, admin_id } => {
                let visitor = policy.delete(parse_visitor_id(&visitor_id)?, &admin_id).await?;
                Ok(Reply::Deleted { visitor_id: visitor.id })
            },
            Command::SetNotes { visitor_id, notes, admin_id } => {
                let id = parse_visitor_id(&visitor_id)?;
                let visitor = policy.set_admin_notes(id, notes.as_deref(), &admin_id).await?;
                Ok(Reply::Visitor { visitor })
            },
            Command::Bulk { action, visitor_ids, reason, category, admin_id } => {
                let request = BulkRequest { action, visitor_ids, reason, category, admin_id };
                Ok(policy.bulk(request).await?.into())
            },
            Command::Advise { visitor_id, reason } => {
                let advice = policy.advise(parse_visitor_id(&visitor_id)?, &reason).await?;
                Ok(Reply::Advice { recommended: advice.recommended(), advice })
            },
            Command::Reconcile { visitor_id, admin_id } => {
                let outcome = policy.reconcile(parse_visitor_id(&visitor_id)?, &admin_id).await?;
                Ok(Reply::Reconciled { outcome })
            },
            Command::GetVisitor { visitor_id } => {
                let visitor = policy.get_visitor(parse_visitor_id(&visitor_id)?).await?;
                Ok(Reply::Visitor { visitor })
            },
            Command::BanRecords { visitor_id } => {
                let records = policy.ban_records(parse_visitor_id(&visitor_id)?).await?;
                Ok(Reply::BanRecords { records })
            },
            Command::ListVisitors { status, sort, cursor, limit } => {
                let defaults = VisitorQuery::default();
                let query = VisitorQuery {
                    status,
                    sort: sort.into(),
                    cursor,
                    limit: limit.unwrap_or(defaults.limit),
                };
                let page = policy.list_visitors(&query).await?;
                Ok(Reply::Visitors {
                    items: page.items,
                    stats: page.stats.into(),
                    next_cursor: page.next_cursor,
                })
            },
            Command::SubmitAppeal {
                visitor_id,
                name,
                email,
                subject,
                message,
                ban_reason_snapshot,
            } => {
                let submission = SubmitAppeal {
                    visitor_id: parse_visitor_id(&visitor_id)?,
                    name,
                    email,
                    subject,
                    message,
                    ban_reason_snapshot,
                };
                Ok(Reply::Appeal { appeal: appeals.submit(submission).await? })
            },
            Command::ReviewAppeal { appeal_id, reviewer_id, notes } => {
                let id = parse_appeal_id(&appeal_id)?;
                let appeal = appeals.mark_reviewed(id, &reviewer_id, notes.as_deref()).await?;
                Ok(Reply::Appeal { appeal })
            },
            Command::DecideAppeal { appeal_id, status, reviewer_id, notes } => {
                let id = parse_appeal_id(&appeal_id)?;
                Ok(appeals.decide(id, status, &reviewer_id, notes.as_deref()).await?.into())
            },
            Command::GetAppeal { appeal_id } => {
                Ok(Reply::Appeal { appeal: appeals.get_appeal(parse_appeal_id(&appeal_id)?).await? })
            },
            Command::ListAppeals { status, cursor, limit } => {
                let defaults = AppealQuery::default();
                let query = AppealQuery { status, cursor, limit: limit.unwrap_or(defaults.limit) };
                let page = appeals.list_appeals(&query).await?;
                Ok(Reply::Appeals {
                    items: page.items,
                    stats: page.stats,
                    next_cursor: page.next_cursor,
                })
            },
            Command::Watch { .. } => Err(VigilError::Validation {
                field: "command".to_string(),
                constraint: "watch needs a streaming session".to_string(),
            }),
        }
    }

    /// Opens a status subscription.
    ///
    /// # Errors
    ///
    /// `Validation` for a malformed id, `VisitorNotFound`, or store failures.
    pub async fn watch(&self, visitor_id: &str) -> Result<StatusSubscription> {
        self.services.notifier.watch(parse_visitor_id(visitor_id)?).await
    }
}

fn parse_visitor_id(raw: &str) -> Result<VisitorId> {
    raw.parse().map_err(|_| VigilError::Validation {
        field: "visitor_id".to_string(),
        constraint: format!("{raw:?} is not a valid visitor id"),
    })
}

fn parse_appeal_id(raw: &str) -> Result<AppealId> {
    raw.parse().map_err(|_| VigilError::Validation {
        field: "appeal_id".to_string(),
        constraint: format!("{raw:?} is not a valid appeal id"),
    })
}
