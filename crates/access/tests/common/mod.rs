//! Test harness for access integration tests.
//!
//! Wires every component to one in-memory store through a gateway with
//! fast test timings, and records audit events in memory.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use vigil_access::{
    AccessPolicy, AppealWorkflow, BanRequest, IdentityResolver, MemoryAuditLogger,
    PolicyOutcome, StatusNotifier, SubmitAppeal,
};
use vigil_store::{DocumentStore, InMemoryStore, StoreGateway};
use vigil_test_utils::{test_gateway_config, test_notifier_config};
use vigil_types::{BanCategory, DeviceFingerprint, Visitor, VisitorId};

/// Every Vigil component over one shared store.
pub struct Harness {
    /// Backing store, for fault injection and direct reads.
    pub store: Arc<InMemoryStore>,
    /// Audit events of every component.
    pub audit: Arc<MemoryAuditLogger>,
    /// Identity resolver.
    pub resolver: IdentityResolver,
    /// Access policy engine.
    pub policy: AccessPolicy,
    /// Appeal workflow.
    pub appeals: AppealWorkflow,
    /// Status notifier.
    pub notifier: StatusNotifier,
}

impl Harness {
    /// Builds a harness over an empty store.
    pub fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let audit = Arc::new(MemoryAuditLogger::new());
        let gateway = StoreGateway::new(store.clone(), test_gateway_config());

        let resolver = IdentityResolver::builder().gateway(gateway.clone()).build();
        let policy = AccessPolicy::builder().gateway(gateway.clone()).audit(audit.clone()).build();
        let appeals = AppealWorkflow::builder()
            .gateway(gateway.clone())
            .policy(policy.clone())
            .audit(audit.clone())
            .build();
        let notifier = StatusNotifier::new(gateway, test_notifier_config());

        Self { store, audit, resolver, policy, appeals, notifier }
    }

    /// Creates a visitor through the resolver with a fingerprint unique to `device`.
    pub async fn visitor(&self, device: &str) -> VisitorId {
        self.resolver.resolve(None, &fingerprint(device)).await.unwrap().visitor_id
    }

    /// Reads a visitor straight from the store.
    pub async fn stored(&self, id: VisitorId) -> Visitor {
        self.store.get_visitor(id).await.unwrap().expect("visitor exists")
    }

    /// Number of active ban records of a visitor.
    pub async fn active_records(&self, id: VisitorId) -> usize {
        self.store.get_ban_records(id).await.unwrap().iter().filter(|r| r.is_active).count()
    }

    /// Bans `id` under `category` as `admin1`.
    pub async fn ban(&self, id: VisitorId, reason: &str, category: BanCategory) -> PolicyOutcome {
        self.policy.ban(ban_request(id, reason, category)).await.unwrap()
    }
}

/// A ban request from `admin1`.
pub fn ban_request(id: VisitorId, reason: &str, category: BanCategory) -> BanRequest {
    BanRequest::builder().visitor_id(id).reason(reason).category(category).admin_id("admin1").build()
}

/// A fingerprint determined by `device`.
pub fn fingerprint(device: &str) -> DeviceFingerprint {
    DeviceFingerprint {
        user_agent: format!("Mozilla/5.0 ({device})"),
        language: "en-US".to_string(),
        platform: "Linux x86_64".to_string(),
        screen: "1920x1080".to_string(),
        timezone: "Europe/Berlin".to_string(),
        hardware_concurrency: 8,
        color_depth: 24,
        touch_support: false,
        canvas_hash: None,
        client_signal: None,
    }
}

/// A valid appeal for `visitor_id`.
pub fn appeal_for(visitor_id: VisitorId) -> SubmitAppeal {
    SubmitAppeal::builder()
        .visitor_id(visitor_id)
        .name("Alex Visitor")
        .email("alex@example.org")
        .subject("Ban appeal")
        .message("Please review my ban, I think it was a misunderstanding.")
        .build()
}
