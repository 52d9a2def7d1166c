//! Persistence layer for Vigil.
//!
//! - [`DocumentStore`]: the generic key-document store interface
//! - [`InMemoryStore`]: process-local implementation with fault injection
//! - [`StoreGateway`]: timeout and retry wrapper every component goes through

pub mod document;
pub mod gateway;
pub mod memory;
pub mod retry;
pub mod watch;

pub use document::{
    AppealPage, AppealQuery, BanRecordChange, DocumentStore, FingerprintClaim, MAX_PAGE_SIZE,
    Mutation, StatusEventStream, StatusSnapshot, UpsertOutcome, VisitorPage, VisitorQuery,
    VisitorSort, VisitorStats, VisitorWatch, VisitorWrite, WatchLiveness,
};
pub use gateway::StoreGateway;
pub use memory::InMemoryStore;
pub use retry::with_retry;
