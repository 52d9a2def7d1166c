//! Visitor identity, access policy and appeals for Vigil.
//!
//! All components reach persistence through a shared
//! [`StoreGateway`](vigil_store::StoreGateway):
//!
//! - [`IdentityResolver`]: canonical visitor ids from fingerprints
//! - [`AccessPolicy`]: the active/banned state machine, bulk actions and reconciliation
//! - [`AppealWorkflow`]: appeal submission, review and approval side effects
//! - [`StatusNotifier`]: live per-visitor status subscriptions
//! - [`audit`]: sinks for administrator audit events

pub mod appeal;
pub mod audit;
pub mod category;
pub mod identity;
pub mod notifier;
pub mod policy;

pub use appeal::{AppealWorkflow, DecisionReport, SubmitAppeal, UnbanOutcome};
pub use audit::{
    AuditError, AuditLogger, FileAuditLogger, MemoryAuditLogger, NullAuditLogger,
    create_audit_logger,
};
pub use category::{BanAdvice, suggest_category, suggest_escalation};
pub use identity::{IdentityResolver, Resolution, ResolutionKind};
pub use notifier::{
    NotifierSignal, RedirectPlan, RedirectTarget, StatusNotifier, StatusSubscription,
};
pub use policy::{
    AccessPolicy, BanRequest, BulkAction, BulkItemOutcome, BulkItemResult, BulkReport,
    BulkRequest, PolicyOutcome, ReconcileOutcome,
};
