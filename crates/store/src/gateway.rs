//! Resilient store gateway.
//!
//! [`StoreGateway`] is the only path from Vigil components to a
//! [`DocumentStore`]. Each call is bounded by `operation_timeout`; an elapsed
//! deadline counts as a transient failure. Transient failures are retried
//! with jittered exponential backoff and only surface once the retry policy
//! is exhausted.

use std::{future::Future, sync::Arc, time::Duration};

use tracing::instrument;
use vigil_types::{
    Appeal, AppealId, BanRecord, FingerprintHash, Result, VigilError, Visitor, VisitorId,
    config::GatewayConfig,
};

use crate::{
    document::{
        AppealMutator, AppealPage, AppealQuery, DocumentStore, FingerprintClaim, UpsertOutcome,
        VisitorMutator, VisitorPage, VisitorQuery, VisitorWatch,
    },
    retry::with_retry,
};

/// Timeout and retry wrapper around a shared [`DocumentStore`].
#[derive(Clone)]
pub struct StoreGateway {
    store: Arc<dyn DocumentStore>,
    config: GatewayConfig,
}

impl std::fmt::Debug for StoreGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreGateway").field("config", &self.config).finish_non_exhaustive()
    }
}

impl StoreGateway {
    /// Creates a gateway over `store`.
    pub fn new(store: Arc<dyn DocumentStore>, config: GatewayConfig) -> Self {
        Self { store, config }
    }

    /// Returns the gateway configuration.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    async fn call<T, F, Fut>(&self, operation: &'static str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let deadline = self.config.operation_timeout;
        with_retry(&self.config.retry, operation, || {
            let attempt = f();
            async move {
                match tokio::time::timeout(deadline, attempt).await {
                    Ok(result) => result,
                    Err(_elapsed) => Err(timed_out(deadline)),
                }
            }
        })
        .await
    }

    /// Reads a visitor, failing with `VisitorNotFound` if absent.
    ///
    /// # Errors
    ///
    /// `VisitorNotFound`, or a store failure after retries.
    pub async fn require_visitor(&self, id: VisitorId) -> Result<Visitor> {
        self.get_visitor(id).await?.ok_or_else(|| VigilError::VisitorNotFound { id: id.to_string() })
    }

    /// See [`DocumentStore::get_visitor`].
    ///
    /// # Errors
    ///
    /// Store failure after retries.
    pub async fn get_visitor(&self, id: VisitorId) -> Result<Option<Visitor>> {
        self.call("get_visitor", || self.store.get_visitor(id)).await
    }

    /// See [`DocumentStore::upsert_visitor`]. The mutator may run once per attempt.
    ///
    /// # Errors
    ///
    /// Whatever the mutator returns, or a store failure after retries.
    #[instrument(skip_all, fields(visitor_id = %id))]
    pub async fn upsert_visitor(
        &self,
        id: VisitorId,
        mutator: VisitorMutator<'_>,
    ) -> Result<UpsertOutcome> {
        self.call("upsert_visitor", || self.store.upsert_visitor(id, mutator)).await
    }

    /// See [`DocumentStore::claim_fingerprint`].
    ///
    /// # Errors
    ///
    /// Store failure after retries.
    pub async fn claim_fingerprint(
        &self,
        hash: &FingerprintHash,
        candidate: &Visitor,
    ) -> Result<FingerprintClaim> {
        self.call("claim_fingerprint", || self.store.claim_fingerprint(hash, candidate.clone()))
            .await
    }

    /// See [`DocumentStore::query_visitors_by_fingerprint`].
    ///
    /// # Errors
    ///
    /// Store failure after retries.
    pub async fn query_visitors_by_fingerprint(
        &self,
        hash: &FingerprintHash,
    ) -> Result<Vec<Visitor>> {
        self.call("query_visitors_by_fingerprint", || self.store.query_visitors_by_fingerprint(hash))
            .await
    }

    /// See [`DocumentStore::list_visitors`].
    ///
    /// # Errors
    ///
    /// `Validation` for a bad cursor or limit, or a store failure after retries.
    pub async fn list_visitors(&self, query: &VisitorQuery) -> Result<VisitorPage> {
        self.call("list_visitors", || self.store.list_visitors(query)).await
    }

    /// See [`DocumentStore::delete_visitor`].
    ///
    /// # Errors
    ///
    /// Store failure after retries.
    pub async fn delete_visitor(&self, id: VisitorId) -> Result<Option<Visitor>> {
        self.call("delete_visitor", || self.store.delete_visitor(id)).await
    }

    /// See [`DocumentStore::get_ban_records`].
    ///
    /// # Errors
    ///
    /// Store failure after retries.
    pub async fn get_ban_records(&self, id: VisitorId) -> Result<Vec<BanRecord>> {
        self.call("get_ban_records", || self.store.get_ban_records(id)).await
    }

    /// See [`DocumentStore::create_appeal`].
    ///
    /// # Errors
    ///
    /// Store failure after retries.
    pub async fn create_appeal(&self, appeal: &Appeal) -> Result<()> {
        self.call("create_appeal", || self.store.create_appeal(appeal.clone())).await
    }

    /// Reads an appeal, failing with `AppealNotFound` if absent.
    ///
    /// # Errors
    ///
    /// `AppealNotFound`, or a store failure after retries.
    pub async fn require_appeal(&self, id: AppealId) -> Result<Appeal> {
        self.call("get_appeal", || self.store.get_appeal(id))
            .await?
            .ok_or_else(|| VigilError::AppealNotFound { id: id.to_string() })
    }

    /// See [`DocumentStore::update_appeal`].
    ///
    /// # Errors
    ///
    /// `AppealNotFound`, whatever the mutator returns, or a store failure after retries.
    pub async fn update_appeal(&self, id: AppealId, mutator: AppealMutator<'_>) -> Result<Appeal> {
        self.call("update_appeal", || self.store.update_appeal(id, mutator)).await
    }

    /// See [`DocumentStore::list_appeals`].
    ///
    /// # Errors
    ///
    /// `Validation` for a bad cursor or limit, or a store failure after retries.
    pub async fn list_appeals(&self, query: &AppealQuery) -> Result<AppealPage> {
        self.call("list_appeals", || self.store.list_appeals(query)).await
    }

    /// See [`DocumentStore::watch_visitor`]. Only the subscribe call is retried.
    ///
    /// # Errors
    ///
    /// `VisitorNotFound`, or a store failure after retries.
    pub async fn watch_visitor(&self, id: VisitorId) -> Result<VisitorWatch> {
        self.call("watch_visitor", || self.store.watch_visitor(id)).await
    }
}

fn timed_out(deadline: Duration) -> VigilError {
    VigilError::Timeout { duration_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX) }
}
