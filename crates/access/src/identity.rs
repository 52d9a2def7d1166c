//! Identity resolution.
//!
//! Turns a client-supplied identifier and a device fingerprint into one
//! canonical visitor id. Creation is a first-write-wins claim against the
//! store keyed by fingerprint digest, so concurrent first contacts from the
//! same device converge on a single visitor.

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use vigil_store::{FingerprintClaim, Mutation, StoreGateway, VisitorWrite};
use vigil_types::{
    BanRecord, DeviceFingerprint, FingerprintHash, Result, VigilError, Visitor, VisitorId,
    config::ResolverConfig, fingerprint_digest,
};

/// Attempts at claiming a fingerprint whose owner disappears mid-resolution.
const MAX_CLAIM_ATTEMPTS: usize = 2;

/// How a resolution reached its canonical id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionKind {
    /// The candidate id named an existing visitor.
    Known,
    /// The fingerprint belonged to an existing visitor; the candidate was merged.
    Merged,
    /// A new visitor was created.
    Created,
    /// The store was unreachable; a session-only id was minted.
    Ephemeral,
}

/// Result of [`IdentityResolver::resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Resolution {
    /// Canonical visitor id.
    pub visitor_id: VisitorId,
    /// How the id was reached.
    pub kind: ResolutionKind,
}

impl Resolution {
    fn new(visitor_id: VisitorId, kind: ResolutionKind) -> Self {
        Self { visitor_id, kind }
    }
}

/// Resolves anonymous visitors to canonical ids.
#[derive(Debug, Clone, bon::Builder)]
#[builder(on(_, required))]
pub struct IdentityResolver {
    /// Store access.
    gateway: StoreGateway,
    /// Merge policy.
    #[builder(default)]
    config: ResolverConfig,
}

impl IdentityResolver {
    /// Creates a resolver.
    pub fn new(gateway: StoreGateway, config: ResolverConfig) -> Self {
        Self { gateway, config }
    }

    /// Resolves a visitor and records the visit.
    ///
    /// A candidate that parses as an id of an existing visitor wins. Otherwise
    /// the fingerprint digest decides: its owner is reused (and the candidate
    /// merged into its alternate ids) or a new visitor is created.
    ///
    /// # Errors
    ///
    /// Store failures after retries. Callers that can tolerate a session-only
    /// identity use [`IdentityResolver::resolve_or_ephemeral`].
    #[instrument(skip_all, fields(has_candidate = candidate.is_some()))]
    pub async fn resolve(
        &self,
        candidate: Option<&str>,
        fingerprint: &DeviceFingerprint,
    ) -> Result<Resolution> {
        let candidate = parse_candidate(candidate);

        if let Some(id) = candidate
            && self.record_visit(id, None).await?
        {
            debug!(visitor_id = %id, "resolved known visitor");
            return Ok(Resolution::new(id, ResolutionKind::Known));
        }

        let hash = fingerprint_digest(fingerprint, self.config.merge_policy);
        for _ in 0..MAX_CLAIM_ATTEMPTS {
            let fresh = Visitor::first_contact(VisitorId::generate(), hash.clone(), Utc::now());
            match self.gateway.claim_fingerprint(&hash, &fresh).await? {
                FingerprintClaim::Created(visitor) => {
                    info!(visitor_id = %visitor.id, "created visitor");
                    return Ok(Resolution::new(visitor.id, ResolutionKind::Created));
                },
                FingerprintClaim::Existing(owner) => {
                    if self.record_visit(owner, candidate).await? {
                        debug!(visitor_id = %owner, "merged visitor by fingerprint");
                        return Ok(Resolution::new(owner, ResolutionKind::Merged));
                    }
                    // Owner purged between the claim and the visit; claim again.
                    debug!(visitor_id = %owner, "fingerprint owner vanished, reclaiming");
                },
            }
        }

        Err(VigilError::Internal {
            message: format!("fingerprint {hash} kept changing owner during resolution"),
        })
    }

    /// Like [`IdentityResolver::resolve`], but degrades to a session-only id
    /// when the store cannot be reached.
    ///
    /// # Errors
    ///
    /// Errors other than store failures.
    pub async fn resolve_or_ephemeral(
        &self,
        candidate: Option<&str>,
        fingerprint: &DeviceFingerprint,
    ) -> Result<Resolution> {
        match self.resolve(candidate, fingerprint).await {
            Err(err) if err.is_store_failure() => {
                let id = VisitorId::ephemeral();
                warn!(visitor_id = %id, error = %err, "store unavailable, using ephemeral identity");
                Ok(Resolution::new(id, ResolutionKind::Ephemeral))
            },
            other => other,
        }
    }

    /// Visitors whose fingerprint digest matches `fingerprint`.
    ///
    /// # Errors
    ///
    /// Store failures after retries.
    pub async fn visitors_sharing_fingerprint(
        &self,
        fingerprint: &DeviceFingerprint,
    ) -> Result<Vec<Visitor>> {
        self.gateway.query_visitors_by_fingerprint(&self.digest(fingerprint)).await
    }

    /// Digest of `fingerprint` under the configured merge policy.
    #[must_use]
    pub fn digest(&self, fingerprint: &DeviceFingerprint) -> FingerprintHash {
        fingerprint_digest(fingerprint, self.config.merge_policy)
    }

    /// Records one visit on `id`, merging `alternate` if given.
    ///
    /// Returns false if the visitor does not exist.
    async fn record_visit(&self, id: VisitorId, alternate: Option<VisitorId>) -> Result<bool> {
        let now = Utc::now();
        let mutator = move |current: Option<&Visitor>, _records: &[BanRecord]| -> Result<Mutation> {
            let Some(current) = current else {
                return Ok(Mutation::Skip);
            };
            let mut next = current.clone();
            next.record_visit(now);
            if let Some(alternate) = alternate {
                next.merge_alternate_id(alternate);
            }
            Ok(Mutation::Write(VisitorWrite::visitor_only(next)))
        };
        let outcome = self.gateway.upsert_visitor(id, &mutator).await?;
        Ok(outcome.committed)
    }
}

fn parse_candidate(candidate: Option<&str>) -> Option<VisitorId> {
    let raw = candidate?.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.parse::<VisitorId>() {
        // Session-only ids were never persisted.
        Ok(id) if id.is_ephemeral() => None,
        Ok(id) => Some(id),
        Err(_) => {
            debug!(candidate = raw, "ignoring malformed candidate id");
            None
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Arc;

    use vigil_store::InMemoryStore;
    use vigil_test_utils::test_gateway_config;
    use vigil_types::{ErrorCode, config::MergePolicy};

    use super::*;

    fn fingerprint(agent: &str) -> DeviceFingerprint {
        DeviceFingerprint {
            user_agent: agent.to_string(),
            language: "en-US".to_string(),
            screen: "1920x1080".to_string(),
            ..DeviceFingerprint::default()
        }
    }

    fn setup() -> (Arc<InMemoryStore>, IdentityResolver) {
        let store = Arc::new(InMemoryStore::new());
        let gateway = StoreGateway::new(store.clone(), test_gateway_config());
        (store, IdentityResolver::builder().gateway(gateway).build())
    }

    async fn stored(store: &InMemoryStore, id: VisitorId) -> Visitor {
        use vigil_store::DocumentStore;
        store.get_visitor(id).await.unwrap().expect("visitor exists")
    }

    #[tokio::test]
    async fn test_known_candidate_wins_and_counts_visit() {
        let (store, resolver) = setup();
        let first = resolver.resolve(None, &fingerprint("a")).await.unwrap();

        // Different device, same stored id.
        let second = resolver
            .resolve(Some(&first.visitor_id.to_string()), &fingerprint("b"))
            .await
            .unwrap();
        assert_eq!(second, Resolution::new(first.visitor_id, ResolutionKind::Known));
        assert_eq!(stored(&store, first.visitor_id).await.visit_count, 2);
    }

    #[tokio::test]
    async fn test_unknown_candidate_is_merged_into_fingerprint_owner() {
        let (store, resolver) = setup();
        let owner = resolver.resolve(None, &fingerprint("a")).await.unwrap();

        let stale = VisitorId::generate();
        let merged =
            resolver.resolve(Some(&stale.to_string()), &fingerprint("a")).await.unwrap();
        assert_eq!(merged.kind, ResolutionKind::Merged);
        assert_eq!(merged.visitor_id, owner.visitor_id);

        let visitor = stored(&store, owner.visitor_id).await;
        assert!(visitor.alternate_ids.contains(&stale));
        assert_eq!(visitor.visit_count, 2);
    }

    #[tokio::test]
    async fn test_malformed_and_ephemeral_candidates_are_ignored() {
        let (store, resolver) = setup();
        let owner = resolver.resolve(Some("not-a-uuid"), &fingerprint("a")).await.unwrap();
        assert_eq!(owner.kind, ResolutionKind::Created);

        let ephemeral = VisitorId::ephemeral();
        let again =
            resolver.resolve(Some(&ephemeral.to_string()), &fingerprint("a")).await.unwrap();
        assert_eq!(again.visitor_id, owner.visitor_id);
        assert!(stored(&store, owner.visitor_id).await.alternate_ids.is_empty());
    }

    #[tokio::test]
    async fn test_purged_owner_is_replaced_by_new_visitor() {
        use vigil_store::DocumentStore;

        let (store, resolver) = setup();
        let first = resolver.resolve(None, &fingerprint("a")).await.unwrap();
        store.delete_visitor(first.visitor_id).await.unwrap();

        let second = resolver.resolve(None, &fingerprint("a")).await.unwrap();
        assert_eq!(second.kind, ResolutionKind::Created);
        assert_ne!(second.visitor_id, first.visitor_id);
    }

    #[tokio::test]
    async fn test_client_signal_separates_identical_devices() {
        let store = Arc::new(InMemoryStore::new());
        let gateway = StoreGateway::new(store, test_gateway_config());
        let resolver = IdentityResolver::new(
            gateway,
            ResolverConfig { merge_policy: MergePolicy::HashAndClientSignal },
        );

        let mut a = fingerprint("same");
        a.client_signal = Some("alice".to_string());
        let mut b = fingerprint("same");
        b.client_signal = Some("bob".to_string());

        let first = resolver.resolve(None, &a).await.unwrap();
        let second = resolver.resolve(None, &b).await.unwrap();
        assert_ne!(first.visitor_id, second.visitor_id);
        assert_eq!(resolver.visitors_sharing_fingerprint(&a).await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_outage_falls_back_to_ephemeral() {
        let (store, resolver) = setup();
        store.fail_next(100);

        let err = resolver.resolve(None, &fingerprint("a")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::StoreRetryExhausted);

        let resolution = resolver.resolve_or_ephemeral(None, &fingerprint("a")).await.unwrap();
        assert_eq!(resolution.kind, ResolutionKind::Ephemeral);
        assert!(resolution.visitor_id.is_ephemeral());
    }
}
