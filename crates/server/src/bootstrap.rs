//! Service wiring.
//!
//! Builds every component over one store and one gateway so that writes made
//! by the policy engine reach the notifier's subscriptions.

use std::sync::Arc;

use snafu::{ResultExt, Snafu};
use vigil_access::{
    AccessPolicy, AppealWorkflow, AuditError, AuditLogger, IdentityResolver, StatusNotifier,
    create_audit_logger,
};
use vigil_store::{DocumentStore, InMemoryStore, StoreGateway};
use vigil_types::config::ConfigError;

use crate::config::Config;

/// Error type for bootstrap operations.
#[derive(Debug, Snafu)]
pub enum BootstrapError {
    /// Configuration failed validation.
    #[snafu(display("invalid configuration: {source}"))]
    InvalidConfig {
        /// Underlying error.
        source: ConfigError,
    },
    /// The audit log could not be opened.
    #[snafu(display("failed to open audit log: {source}"))]
    Audit {
        /// Underlying error.
        source: AuditError,
    },
}

/// Bootstrapped components.
#[derive(Debug, Clone)]
pub struct Services {
    /// Identity resolver.
    pub resolver: IdentityResolver,
    /// Access policy engine.
    pub policy: AccessPolicy,
    /// Appeal workflow.
    pub appeals: AppealWorkflow,
    /// Live status notifier.
    pub notifier: StatusNotifier,
}

/// Builds the services over a fresh in-memory store.
///
/// # Errors
///
/// Returns [`BootstrapError`] if the configuration is invalid or the audit
/// log cannot be opened.
pub fn bootstrap(config: &Config) -> Result<Services, BootstrapError> {
    bootstrap_with_store(config, Arc::new(InMemoryStore::new()))
}

/// Builds the services over `store`.
///
/// # Errors
///
/// See [`bootstrap`].
pub fn bootstrap_with_store(
    config: &Config,
    store: Arc<dyn DocumentStore>,
) -> Result<Services, BootstrapError> {
    config.validate().context(InvalidConfigSnafu)?;
    let audit = create_audit_logger(&config.audit).context(AuditSnafu)?;
    Ok(assemble(config, store, audit))
}

fn assemble(config: &Config, store: Arc<dyn DocumentStore>, audit: Arc<dyn AuditLogger>) -> Services {
    let gateway = StoreGateway::new(store, config.gateway.clone());

    let resolver = IdentityResolver::new(gateway.clone(), config.resolver.clone());
    let policy = AccessPolicy::builder()
        .gateway(gateway.clone())
        .audit(audit.clone())
        .config(config.policy.clone())
        .validation(config.validation.clone())
        .build();
    let appeals = AppealWorkflow::builder()
        .gateway(gateway.clone())
        .policy(policy.clone())
        .audit(audit)
        .validation(config.validation.clone())
        .build();
    let notifier = StatusNotifier::new(gateway, config.notifier.clone());

    tracing::info!(
        merge_policy = ?config.resolver.merge_policy,
        audit_enabled = config.audit.enabled,
        "services bootstrapped"
    );
    Services { resolver, policy, appeals, notifier }
}
