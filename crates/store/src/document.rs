//! The document store interface.
//!
//! Every Vigil component reaches persistence through [`DocumentStore`]. The
//! trait is shaped around conditional read-modify-write: callers never
//! overwrite a visitor directly, they hand the store a mutator that sees the
//! current document and decides what to write. The store runs the mutator and
//! the write under one lock (or one transaction), so two concurrent writers
//! to the same visitor cannot interleave.
//!
//! A visitor write carries its [`BanRecordChange`] with it. The status flip
//! and the ban record projection therefore commit together or not at all.
//! The mutator also sees the visitor's ban records as they stand under the
//! same lock, so decisions that depend on both are taken atomically.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use vigil_types::{
    AdminId, Appeal, AppealId, AppealStats, AppealStatus, BanCategory, BanRecord,
    FingerprintHash, Result, StatusChangeEvent, Visitor, VisitorId, VisitorStatus,
    validation::ValidationError,
};

/// Largest page a listing call returns.
pub const MAX_PAGE_SIZE: usize = 200;

/// What a visitor mutator decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Persist the new image.
    Write(VisitorWrite),
    /// Leave the document untouched.
    Skip,
}

/// A visitor image plus the ban record change committed with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitorWrite {
    /// New visitor image.
    pub visitor: Visitor,
    /// Projection change committed atomically with the image.
    pub ban_record: BanRecordChange,
}

impl VisitorWrite {
    /// A write that leaves ban records untouched.
    #[must_use]
    pub fn visitor_only(visitor: Visitor) -> Self {
        Self { visitor, ban_record: BanRecordChange::Unchanged }
    }
}

/// Change to a visitor's ban records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BanRecordChange {
    /// No change.
    Unchanged,
    /// Open a new active record. Any record still active is closed first.
    Open(BanRecord),
    /// Close the active record.
    Close {
        /// Lift time.
        at: DateTime<Utc>,
        /// Administrator who lifted the ban, if any.
        by: Option<AdminId>,
    },
    /// Update the category of the active record.
    Recategorize(BanCategory),
}

/// Result of [`DocumentStore::upsert_visitor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// Document after the call (`None` if it did not exist and was not created).
    pub visitor: Option<Visitor>,
    /// Whether a write was committed.
    pub committed: bool,
    /// Status flip produced by the write, already published to watchers.
    pub event: Option<StatusChangeEvent>,
}

/// Result of [`DocumentStore::claim_fingerprint`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FingerprintClaim {
    /// The caller won the claim and the candidate visitor was created.
    Created(Visitor),
    /// The fingerprint already belongs to this canonical visitor.
    Existing(VisitorId),
}

/// Visitor mutator passed to [`DocumentStore::upsert_visitor`].
///
/// Receives the current document (`None` if absent) and the visitor's ban
/// records, oldest first. The mutator may run more than once when the gateway
/// retries, so it must be a pure function of its input.
pub type VisitorMutator<'a> =
    &'a (dyn Fn(Option<&Visitor>, &[BanRecord]) -> Result<Mutation> + Send + Sync);

/// Appeal mutator passed to [`DocumentStore::update_appeal`].
pub type AppealMutator<'a> = &'a (dyn Fn(&Appeal) -> Result<Appeal> + Send + Sync);

/// Sort orders for visitor listings. Ties break on visitor id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VisitorSort {
    /// Most recently seen first.
    #[default]
    LastVisitDesc,
    /// Most recently created first.
    FirstVisitDesc,
    /// Most frequent visitors first.
    VisitCountDesc,
}

/// Visitor listing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitorQuery {
    /// Only return visitors with this status.
    pub status: Option<VisitorStatus>,
    /// Sort order.
    pub sort: VisitorSort,
    /// Cursor returned by the previous page.
    pub cursor: Option<String>,
    /// Page size, `1..=MAX_PAGE_SIZE`.
    pub limit: usize,
}

impl Default for VisitorQuery {
    fn default() -> Self {
        Self { status: None, sort: VisitorSort::default(), cursor: None, limit: 50 }
    }
}

/// Visitor counts across the whole store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VisitorStats {
    /// All visitors.
    pub total: usize,
    /// Active visitors.
    pub active: usize,
    /// Banned visitors.
    pub banned: usize,
}

/// One page of visitors. `stats` comes from the same snapshot as `items`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitorPage {
    /// Visitors on this page.
    pub items: Vec<Visitor>,
    /// Store-wide counts.
    pub stats: VisitorStats,
    /// Cursor for the next page, if any.
    pub next_cursor: Option<String>,
}

/// Appeal listing request. Appeals are listed newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppealQuery {
    /// Only return appeals with this status.
    pub status: Option<AppealStatus>,
    /// Cursor returned by the previous page.
    pub cursor: Option<String>,
    /// Page size, `1..=MAX_PAGE_SIZE`.
    pub limit: usize,
}

impl Default for AppealQuery {
    fn default() -> Self {
        Self { status: None, cursor: None, limit: 50 }
    }
}

/// One page of appeals. `stats` comes from the same snapshot as `items`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppealPage {
    /// Appeals on this page.
    pub items: Vec<Appeal>,
    /// Store-wide counts.
    pub stats: AppealStats,
    /// Cursor for the next page, if any.
    pub next_cursor: Option<String>,
}

/// Status of a visitor at subscription time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    /// Status when the subscription was taken.
    pub status: VisitorStatus,
    /// Ban reason when banned.
    pub reason: Option<String>,
}

impl From<&Visitor> for StatusSnapshot {
    fn from(visitor: &Visitor) -> Self {
        Self { status: visitor.status, reason: visitor.ban_reason.clone() }
    }
}

/// Stream of committed status flips for one visitor.
///
/// The stream ends when the store drops the subscription. An `Err` item means
/// events may have been missed and the subscriber should resynchronise.
pub type StatusEventStream = BoxStream<'static, Result<StatusChangeEvent>>;

/// Asks the store whether it still feeds one subscription.
///
/// A subscription can go silent without its stream ending or erroring. The
/// check lets a subscriber tell such a stream from a quiet one.
#[derive(Clone)]
pub struct WatchLiveness(Arc<dyn Fn() -> bool + Send + Sync>);

impl WatchLiveness {
    /// Wraps a store-specific check.
    pub fn new(check: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(check))
    }

    /// Whether the store still delivers to this subscription.
    #[must_use]
    pub fn is_live(&self) -> bool {
        (self.0)()
    }
}

impl std::fmt::Debug for WatchLiveness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("WatchLiveness").field(&self.is_live()).finish()
    }
}

/// A live subscription to one visitor.
///
/// `snapshot` and `events` are taken atomically: every flip committed after
/// the snapshot appears on the stream, and none committed before it does.
/// Dropping `events` releases the subscription in the store.
pub struct VisitorWatch {
    /// Status at subscription time.
    pub snapshot: StatusSnapshot,
    /// Subsequent flips, in commit order.
    pub events: StatusEventStream,
    /// Whether the store still feeds `events`.
    pub liveness: WatchLiveness,
}

impl std::fmt::Debug for VisitorWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisitorWatch").field("snapshot", &self.snapshot).finish_non_exhaustive()
    }
}

/// Generic key-document store.
///
/// Implementations report transient trouble as `StoreUnavailable` and leave
/// retries and deadlines to the gateway.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Reads a visitor.
    async fn get_visitor(&self, id: VisitorId) -> Result<Option<Visitor>>;

    /// Atomic read-modify-write of one visitor and its ban records.
    ///
    /// The mutator sees the current document (`None` if absent) and its ban
    /// records. Errors it returns abort the call with nothing written.
    async fn upsert_visitor(&self, id: VisitorId, mutator: VisitorMutator<'_>)
    -> Result<UpsertOutcome>;

    /// First-write-wins claim of a fingerprint.
    ///
    /// If no live visitor owns `hash`, `candidate` is created and recorded as
    /// the owner. Otherwise the owner's id is returned and nothing is written.
    async fn claim_fingerprint(
        &self,
        hash: &FingerprintHash,
        candidate: Visitor,
    ) -> Result<FingerprintClaim>;

    /// All visitors whose fingerprint digest equals `hash`.
    async fn query_visitors_by_fingerprint(&self, hash: &FingerprintHash) -> Result<Vec<Visitor>>;

    /// Lists visitors.
    async fn list_visitors(&self, query: &VisitorQuery) -> Result<VisitorPage>;

    /// Purges a visitor. Its ban records are kept. Returns the removed document.
    async fn delete_visitor(&self, id: VisitorId) -> Result<Option<Visitor>>;

    /// All ban records of a visitor, oldest first.
    async fn get_ban_records(&self, id: VisitorId) -> Result<Vec<BanRecord>>;

    /// Persists a new appeal.
    async fn create_appeal(&self, appeal: Appeal) -> Result<()>;

    /// Reads an appeal.
    async fn get_appeal(&self, id: AppealId) -> Result<Option<Appeal>>;

    /// Atomic read-modify-write of one appeal.
    ///
    /// # Errors
    ///
    /// `AppealNotFound` if the appeal does not exist, or whatever the mutator returns.
    async fn update_appeal(&self, id: AppealId, mutator: AppealMutator<'_>) -> Result<Appeal>;

    /// Lists appeals newest first.
    async fn list_appeals(&self, query: &AppealQuery) -> Result<AppealPage>;

    /// Subscribes to status flips of one visitor.
    ///
    /// # Errors
    ///
    /// `VisitorNotFound` if the visitor does not exist.
    async fn watch_visitor(&self, id: VisitorId) -> Result<VisitorWatch>;
}

/// Offset cursor helpers shared by store implementations.
pub mod cursor {
    use super::{MAX_PAGE_SIZE, ValidationError};

    /// Decodes a page cursor into an offset.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if the cursor is not one this store issued.
    pub fn decode(cursor: Option<&str>) -> Result<usize, ValidationError> {
        match cursor {
            None => Ok(0),
            Some(raw) => raw.parse::<usize>().map_err(|_| ValidationError {
                field: "cursor".to_string(),
                constraint: "is not a valid page cursor".to_string(),
            }),
        }
    }

    /// Validates a page size.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] unless `1 <= limit <= MAX_PAGE_SIZE`.
    pub fn check_limit(limit: usize) -> Result<usize, ValidationError> {
        if limit == 0 || limit > MAX_PAGE_SIZE {
            return Err(ValidationError {
                field: "limit".to_string(),
                constraint: format!("must be between 1 and {MAX_PAGE_SIZE}"),
            });
        }
        Ok(limit)
    }

    /// Cursor for the page after `offset + taken`, if more items remain.
    #[must_use]
    pub fn next(offset: usize, taken: usize, total: usize) -> Option<String> {
        let end = offset.saturating_add(taken);
        (end < total).then(|| end.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::cursor;

    #[test]
    fn test_cursor_decode() {
        assert_eq!(cursor::decode(None).unwrap(), 0);
        assert_eq!(cursor::decode(Some("40")).unwrap(), 40);
        let err = cursor::decode(Some("page-2")).unwrap_err();
        assert_eq!(err.field, "cursor");
    }

    #[test]
    fn test_cursor_next_stops_at_end() {
        assert_eq!(cursor::next(0, 10, 25).as_deref(), Some("10"));
        assert_eq!(cursor::next(20, 5, 25), None);
    }

    #[test]
    fn test_check_limit_bounds() {
        assert!(cursor::check_limit(0).is_err());
        assert!(cursor::check_limit(1).is_ok());
        assert!(cursor::check_limit(super::MAX_PAGE_SIZE + 1).is_err());
    }
}
