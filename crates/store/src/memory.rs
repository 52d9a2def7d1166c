//! In-memory [`DocumentStore`] with fault injection.
//!
//! All documents live behind one `parking_lot::RwLock`. Mutators run while the
//! write lock is held, which makes every upsert a serialisable
//! read-check-write. Status events are published before the lock is released,
//! so per-visitor publish order equals commit order.
//!
//! # Fault Injection
//!
//! - [`InMemoryStore::fail_next`]: the next `n` calls fail with `StoreUnavailable`
//! - [`InMemoryStore::set_latency`]: every call sleeps before touching state
//! - [`InMemoryStore::sever_watchers`]: live subscriptions end
//! - [`InMemoryStore::stall_watchers`]: live subscriptions go silent without ending
//!
//! A visitor's broadcast sender is dropped as soon as its last subscription
//! is, so the watcher table only holds visitors someone is watching.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::debug;
use vigil_types::{
    Appeal, AppealId, AppealStats, BanRecord, FingerprintHash, Result, StatusChangeEvent,
    VigilError, Visitor, VisitorId, VisitorStatus,
};

use crate::{
    document::{
        AppealMutator, AppealPage, AppealQuery, BanRecordChange, DocumentStore,
        FingerprintClaim, Mutation, StatusSnapshot, UpsertOutcome, VisitorMutator, VisitorPage,
        VisitorQuery, VisitorSort, VisitorStats, VisitorWatch, WatchLiveness, cursor,
    },
    watch::{event_stream, with_release},
};

/// Events buffered per visitor before a slow subscriber lags.
const DEFAULT_WATCH_CAPACITY: usize = 64;

#[derive(Default)]
struct State {
    visitors: HashMap<VisitorId, Visitor>,
    fingerprint_owners: HashMap<FingerprintHash, VisitorId>,
    ban_records: HashMap<VisitorId, Vec<BanRecord>>,
    appeals: HashMap<AppealId, Appeal>,
    watchers: HashMap<VisitorId, Watchers>,
    // Fault injection only: stalled senders kept alive so their receivers
    // never observe a close. Pruned once those receivers are dropped.
    stalled: Vec<broadcast::Sender<StatusChangeEvent>>,
    next_generation: u64,
}

/// The broadcast channel feeding every subscription to one visitor.
///
/// `generation` tells a subscription whether the channel it holds is still
/// the one the store publishes to.
struct Watchers {
    sender: broadcast::Sender<StatusChangeEvent>,
    generation: u64,
}

impl State {
    fn apply_ban_record_change(&mut self, id: VisitorId, change: BanRecordChange) {
        let records = self.ban_records.entry(id).or_default();
        match change {
            BanRecordChange::Unchanged => {},
            BanRecordChange::Open(record) => {
                for active in records.iter_mut().filter(|r| r.is_active) {
                    active.is_active = false;
                    active.lifted_at = Some(record.timestamp);
                    active.lifted_by = Some(record.admin_id.clone());
                }
                records.push(record);
            },
            BanRecordChange::Close { at, by } => {
                for active in records.iter_mut().filter(|r| r.is_active) {
                    active.is_active = false;
                    active.lifted_at = Some(at);
                    active.lifted_by = by.clone();
                }
            },
            BanRecordChange::Recategorize(category) => {
                for active in records.iter_mut().filter(|r| r.is_active) {
                    active.category = category;
                }
            },
        }
    }

    fn publish(&self, event: &StatusChangeEvent) {
        if let Some(watchers) = self.watchers.get(&event.visitor_id) {
            // No receivers is fine: nobody is watching.
            let _ = watchers.sender.send(event.clone());
        }
    }

    /// Subscribes to `id`, opening its channel if nobody watches it yet.
    fn subscribe(
        &mut self,
        id: VisitorId,
        capacity: usize,
    ) -> (broadcast::Receiver<StatusChangeEvent>, u64) {
        if let Some(watchers) = self.watchers.get(&id) {
            return (watchers.sender.subscribe(), watchers.generation);
        }
        let generation = self.next_generation;
        self.next_generation += 1;
        let (sender, receiver) = broadcast::channel(capacity);
        self.watchers.insert(id, Watchers { sender, generation });
        (receiver, generation)
    }

    /// Drops channels whose last subscription has gone.
    fn release_watchers(&mut self, id: VisitorId) {
        if self.watchers.get(&id).is_some_and(|w| w.sender.receiver_count() == 0) {
            self.watchers.remove(&id);
        }
        self.stalled.retain(|sender| sender.receiver_count() > 0);
    }

    fn is_fed(&self, id: VisitorId, generation: u64) -> bool {
        self.watchers.get(&id).is_some_and(|w| w.generation == generation)
    }

    fn owner_is_live(&self, hash: &FingerprintHash) -> Option<VisitorId> {
        self.fingerprint_owners.get(hash).copied().filter(|owner| self.visitors.contains_key(owner))
    }
}

/// Process-local document store.
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
    failures_remaining: AtomicU32,
    latency: Mutex<Duration>,
    watch_capacity: usize,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_watch_capacity(DEFAULT_WATCH_CAPACITY)
    }

    /// Creates an empty store whose per-visitor event buffer holds `capacity` events.
    #[must_use]
    pub fn with_watch_capacity(capacity: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            failures_remaining: AtomicU32::new(0),
            latency: Mutex::new(Duration::ZERO),
            watch_capacity: capacity.max(1),
        }
    }

    /// Makes the next `count` calls fail with `StoreUnavailable`.
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Delays every call by `latency` before it touches state.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Ends every live subscription to `id`.
    pub fn sever_watchers(&self, id: VisitorId) {
        if self.state.write().watchers.remove(&id).is_some() {
            debug!(visitor_id = %id, "severed watchers");
        }
    }

    /// Silences every live subscription to `id` without ending it.
    ///
    /// New subscriptions are unaffected.
    pub fn stall_watchers(&self, id: VisitorId) {
        let mut guard = self.state.write();
        let state = &mut *guard;
        if let Some(watchers) = state.watchers.remove(&id) {
            state.stalled.push(watchers.sender);
            debug!(visitor_id = %id, "stalled watchers");
        }
    }

    /// Number of live (non-stalled) subscriptions to `id`.
    #[must_use]
    pub fn watcher_count(&self, id: VisitorId) -> usize {
        self.state.read().watchers.get(&id).map_or(0, |w| w.sender.receiver_count())
    }

    /// Number of visitors with an open broadcast channel.
    #[must_use]
    pub fn watched_visitors(&self) -> usize {
        self.state.read().watchers.len()
    }

    /// Number of stalled channels still held for their subscribers.
    #[must_use]
    pub fn stalled_channels(&self) -> usize {
        self.state.read().stalled.len()
    }

    /// Inserts a visitor as-is, bypassing mutators.
    ///
    /// Used to stage documents that predate the current invariants.
    pub fn seed_visitor(&self, visitor: Visitor) {
        let mut guard = self.state.write();
        let state = &mut *guard;
        state.fingerprint_owners.entry(visitor.fingerprint_hash.clone()).or_insert(visitor.id);
        state.visitors.insert(visitor.id, visitor);
    }

    /// Inserts a ban record as-is.
    pub fn seed_ban_record(&self, record: BanRecord) {
        self.state.write().ban_records.entry(record.visitor_id).or_default().push(record);
    }

    async fn enter(&self, operation: &'static str) -> Result<()> {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(VigilError::StoreUnavailable {
                message: format!("injected failure during {operation}"),
            });
        }
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn sort_visitors(items: &mut [Visitor], sort: VisitorSort) {
    match sort {
        VisitorSort::LastVisitDesc => {
            items.sort_by(|a, b| b.last_visit.cmp(&a.last_visit).then(a.id.cmp(&b.id)));
        },
        VisitorSort::FirstVisitDesc => {
            items.sort_by(|a, b| b.first_visit.cmp(&a.first_visit).then(a.id.cmp(&b.id)));
        },
        VisitorSort::VisitCountDesc => {
            items.sort_by(|a, b| b.visit_count.cmp(&a.visit_count).then(a.id.cmp(&b.id)));
        },
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn get_visitor(&self, id: VisitorId) -> Result<Option<Visitor>> {
        self.enter("get_visitor").await?;
        Ok(self.state.read().visitors.get(&id).cloned())
    }

    async fn upsert_visitor(
        &self,
        id: VisitorId,
        mutator: VisitorMutator<'_>,
    ) -> Result<UpsertOutcome> {
        self.enter("upsert_visitor").await?;
        let mut guard = self.state.write();
        let state = &mut *guard;

        let before = state.visitors.get(&id).cloned();
        let records = state.ban_records.get(&id).map_or(&[][..], Vec::as_slice);
        let write = match mutator(before.as_ref(), records)? {
            Mutation::Skip => {
                return Ok(UpsertOutcome { visitor: before, committed: false, event: None });
            },
            Mutation::Write(write) => write,
        };
        if write.visitor.id != id {
            return Err(VigilError::Internal {
                message: format!("mutator for {id} produced visitor {}", write.visitor.id),
            });
        }

        let event = StatusChangeEvent::between(before.as_ref(), &write.visitor, Utc::now());
        if before.is_none() {
            state.fingerprint_owners.entry(write.visitor.fingerprint_hash.clone()).or_insert(id);
        }
        state.apply_ban_record_change(id, write.ban_record);
        state.visitors.insert(id, write.visitor.clone());
        if let Some(event) = &event {
            state.publish(event);
        }

        Ok(UpsertOutcome { visitor: Some(write.visitor), committed: true, event })
    }

    async fn claim_fingerprint(
        &self,
        hash: &FingerprintHash,
        candidate: Visitor,
    ) -> Result<FingerprintClaim> {
        self.enter("claim_fingerprint").await?;
        if &candidate.fingerprint_hash != hash {
            return Err(VigilError::Internal {
                message: format!("candidate {} does not carry fingerprint {hash}", candidate.id),
            });
        }

        let mut guard = self.state.write();
        let state = &mut *guard;
        if let Some(owner) = state.owner_is_live(hash) {
            return Ok(FingerprintClaim::Existing(owner));
        }
        state.fingerprint_owners.insert(hash.clone(), candidate.id);
        state.visitors.insert(candidate.id, candidate.clone());
        Ok(FingerprintClaim::Created(candidate))
    }

    async fn query_visitors_by_fingerprint(&self, hash: &FingerprintHash) -> Result<Vec<Visitor>> {
        self.enter("query_visitors_by_fingerprint").await?;
        let state = self.state.read();
        let mut matches: Vec<Visitor> =
            state.visitors.values().filter(|v| &v.fingerprint_hash == hash).cloned().collect();
        matches.sort_by(|a, b| a.first_visit.cmp(&b.first_visit).then(a.id.cmp(&b.id)));
        Ok(matches)
    }

    async fn list_visitors(&self, query: &VisitorQuery) -> Result<VisitorPage> {
        self.enter("list_visitors").await?;
        let offset = cursor::decode(query.cursor.as_deref())?;
        let limit = cursor::check_limit(query.limit)?;

        let state = self.state.read();
        let mut stats = VisitorStats::default();
        let mut matching = Vec::new();
        for visitor in state.visitors.values() {
            stats.total += 1;
            match visitor.status {
                VisitorStatus::Active => stats.active += 1,
                VisitorStatus::Banned => stats.banned += 1,
            }
            if query.status.is_none_or(|status| status == visitor.status) {
                matching.push(visitor.clone());
            }
        }
        drop(state);

        sort_visitors(&mut matching, query.sort);
        let total_matching = matching.len();
        let items: Vec<Visitor> = matching.into_iter().skip(offset).take(limit).collect();
        let next_cursor = cursor::next(offset, items.len(), total_matching);
        Ok(VisitorPage { items, stats, next_cursor })
    }

    async fn delete_visitor(&self, id: VisitorId) -> Result<Option<Visitor>> {
        self.enter("delete_visitor").await?;
        let mut guard = self.state.write();
        let state = &mut *guard;
        let removed = state.visitors.remove(&id);
        if removed.is_some() {
            state.fingerprint_owners.retain(|_, owner| *owner != id);
            state.apply_ban_record_change(id, BanRecordChange::Close { at: Utc::now(), by: None });
            // Dropping the sender ends every subscription to the purged visitor.
            state.watchers.remove(&id);
        }
        Ok(removed)
    }

    async fn get_ban_records(&self, id: VisitorId) -> Result<Vec<BanRecord>> {
        self.enter("get_ban_records").await?;
        Ok(self.state.read().ban_records.get(&id).cloned().unwrap_or_default())
    }

    async fn create_appeal(&self, appeal: Appeal) -> Result<()> {
        self.enter("create_appeal").await?;
        let mut state = self.state.write();
        if state.appeals.contains_key(&appeal.id) {
            return Err(VigilError::Internal { message: format!("appeal {} already exists", appeal.id) });
        }
        state.appeals.insert(appeal.id, appeal);
        Ok(())
    }

    async fn get_appeal(&self, id: AppealId) -> Result<Option<Appeal>> {
        self.enter("get_appeal").await?;
        Ok(self.state.read().appeals.get(&id).cloned())
    }

    async fn update_appeal(&self, id: AppealId, mutator: AppealMutator<'_>) -> Result<Appeal> {
        self.enter("update_appeal").await?;
        let mut state = self.state.write();
        let current =
            state.appeals.get(&id).ok_or_else(|| VigilError::AppealNotFound { id: id.to_string() })?;
        let updated = mutator(current)?;
        if updated.id != id {
            return Err(VigilError::Internal {
                message: format!("mutator for appeal {id} produced appeal {}", updated.id),
            });
        }
        state.appeals.insert(id, updated.clone());
        Ok(updated)
    }

    async fn list_appeals(&self, query: &AppealQuery) -> Result<AppealPage> {
        self.enter("list_appeals").await?;
        let offset = cursor::decode(query.cursor.as_deref())?;
        let limit = cursor::check_limit(query.limit)?;

        let state = self.state.read();
        let mut stats = AppealStats::default();
        let mut matching = Vec::new();
        for appeal in state.appeals.values() {
            stats.record(appeal.status);
            if query.status.is_none_or(|status| status == appeal.status) {
                matching.push(appeal.clone());
            }
        }
        drop(state);

        matching.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at).then(a.id.cmp(&b.id)));
        let total_matching = matching.len();
        let items: Vec<Appeal> = matching.into_iter().skip(offset).take(limit).collect();
        let next_cursor = cursor::next(offset, items.len(), total_matching);
        Ok(AppealPage { items, stats, next_cursor })
    }

    async fn watch_visitor(&self, id: VisitorId) -> Result<VisitorWatch> {
        self.enter("watch_visitor").await?;
        let mut guard = self.state.write();
        let state = &mut *guard;
        let snapshot = state
            .visitors
            .get(&id)
            .map(StatusSnapshot::from)
            .ok_or_else(|| VigilError::VisitorNotFound { id: id.to_string() })?;
        let (receiver, generation) = state.subscribe(id, self.watch_capacity);

        let released = Arc::downgrade(&self.state);
        let events = with_release(event_stream(id, receiver), move || {
            if let Some(state) = released.upgrade() {
                state.write().release_watchers(id);
            }
        });
        let fed = Arc::downgrade(&self.state);
        let liveness = WatchLiveness::new(move || {
            fed.upgrade().is_some_and(|state| {
                let state = state.read();
                state.is_fed(id, generation)
            })
        });
        Ok(VisitorWatch { snapshot, events, liveness })
    }
}
