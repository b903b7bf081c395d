//! Document store abstraction.
//!
//! Each branch owns a live collection (`planning_<branch>`) and an archive
//! collection (`garbage_<branch>`). None of the operations below is
//! transactional: a failure between an upsert and its history append, or
//! between the archive copy and the live removal, leaves the two out of step.

use chrono::{DateTime, Utc};
use planning_types::{CustomEvent, Event, HistoryEntry};
use thiserror::Error;

pub mod memory;
pub mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

pub const CUSTOM_COLLECTION: &str = "planning_custom";
pub const CUSTOM_ARCHIVE_COLLECTION: &str = "garbage_custom";

pub fn live_collection(branch: &str) -> String {
    format!("planning_{}", branch)
}

pub fn archive_collection(branch: &str) -> String {
    format!("garbage_{}", branch)
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[error("Unexpected document shape: {0}")]
    Field(#[from] bson::document::ValueAccessError),

    #[error("{0}")]
    Backend(String),
}

/// Selects the records a sweep moves to the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleFilter {
    /// Records whose `last_update` is strictly older than this
    pub updated_before: DateTime<Utc>,
    /// When set, only records whose `end_date` is not before this instant
    pub ending_after: Option<DateTime<Utc>>,
}

impl StaleFilter {
    pub fn matches(&self, event: &Event) -> bool {
        event.last_update < self.updated_before
            && self
                .ending_after
                .map_or(true, |instant| !event.has_ended(instant))
    }
}

/// Persistence operations used by the reconciler, the sweeper and the
/// custom event commands.
#[allow(async_fn_in_trait)]
pub trait EventStore {
    /// Write every field but the history of `event` to the record with the
    /// same `event_id`, inserting it when absent. Returns the record as it
    /// was before the write.
    async fn upsert_event(&self, collection: &str, event: &Event)
        -> Result<Option<Event>, StoreError>;

    /// Append a snapshot to the history of a record.
    async fn push_history(
        &self,
        collection: &str,
        event_id: &str,
        entry: &HistoryEntry,
    ) -> Result<(), StoreError>;

    async fn find_stale(&self, collection: &str, filter: &StaleFilter)
        -> Result<Vec<Event>, StoreError>;

    /// Copy `events` into `archive` then remove them from `live`.
    async fn archive_events(
        &self,
        live: &str,
        archive: &str,
        events: &[Event],
    ) -> Result<u64, StoreError>;

    async fn count(&self, collection: &str) -> Result<u64, StoreError>;

    async fn find_event(&self, collection: &str, event_id: &str)
        -> Result<Option<Event>, StoreError>;

    async fn insert_custom(&self, event: &CustomEvent) -> Result<(), StoreError>;

    /// List custom events, optionally restricted to one title.
    async fn list_custom(&self, title: Option<&str>) -> Result<Vec<CustomEvent>, StoreError>;

    /// Move custom events to their archive collection.
    async fn archive_custom(&self, events: &[CustomEvent]) -> Result<u64, StoreError>;
}
