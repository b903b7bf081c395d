//! Reconciliation of freshly merged events with a branch's live collection.

use chrono::{DateTime, Utc};
use planning_types::{Event, HistoryEntry, ReconcileStats};

use crate::store::{EventStore, StoreError};

/// Snapshot of the tracked values of `old` that differ in `new`, or `None`
/// when every tracked field is identical.
pub fn modifications(old: &Event, new: &Event, updated: DateTime<Utc>) -> Option<HistoryEntry> {
    let mut entry = HistoryEntry::new(updated);

    if old.title != new.title {
        entry.title = Some(old.title.clone());
    }
    if old.start_date != new.start_date {
        entry.start_date = Some(old.start_date);
    }
    if old.end_date != new.end_date {
        entry.end_date = Some(old.end_date);
    }
    if old.classrooms != new.classrooms {
        entry.classrooms = Some(old.classrooms.clone());
    }
    if old.teachers != new.teachers {
        entry.teachers = Some(old.teachers.clone());
    }
    if old.groups != new.groups {
        entry.groups = Some(old.groups.clone());
    }
    if old.undetermined_description_items != new.undetermined_description_items {
        entry.undetermined_description_items = Some(old.undetermined_description_items.clone());
    }

    if entry.is_empty() {
        None
    } else {
        Some(entry)
    }
}

/// Upsert every event of `events` into `collection` and classify it as new,
/// updated or unchanged against the record it replaced.
///
/// The first store failure aborts the reconciliation. Writes already done
/// are kept.
pub async fn reconcile<S: EventStore>(
    store: &S,
    collection: &str,
    events: &[Event],
    update_time: DateTime<Utc>,
) -> Result<ReconcileStats, StoreError> {
    let mut stats = ReconcileStats::default();

    for event in events {
        let previous = store.upsert_event(collection, event).await.map_err(|e| {
            tracing::error!("Error while updating event {} in {}: {}", event.event_id, collection, e);
            e
        })?;

        let Some(previous) = previous else {
            stats.new += 1;
            continue;
        };

        match modifications(&previous, event, update_time) {
            Some(entry) => {
                tracing::debug!(
                    "Event {} updated ({})",
                    event.event_id,
                    entry
                        .changed_fields()
                        .iter()
                        .map(|f| f.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                store
                    .push_history(collection, &event.event_id, &entry)
                    .await
                    .map_err(|e| {
                        tracing::error!(
                            "Error while pushing modifications of {} in {}: {}",
                            event.event_id,
                            collection,
                            e
                        );
                        e
                    })?;
                stats.updated += 1;
            }
            None => stats.unchanged += 1,
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StaleFilter};
    use chrono::{Duration, TimeZone};
    use planning_types::{CustomEvent, TrackedField};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Memory store whose n-th upsert (or n-th history push) fails.
    struct FailingStore {
        inner: MemoryStore,
        fail_upsert_at: Option<usize>,
        fail_push_at: Option<usize>,
        upserts: AtomicUsize,
        pushes: AtomicUsize,
    }

    impl FailingStore {
        fn new(inner: MemoryStore) -> Self {
            Self {
                inner,
                fail_upsert_at: None,
                fail_push_at: None,
                upserts: AtomicUsize::new(0),
                pushes: AtomicUsize::new(0),
            }
        }
    }

    impl EventStore for FailingStore {
        async fn upsert_event(
            &self,
            collection: &str,
            event: &Event,
        ) -> Result<Option<Event>, StoreError> {
            let call = self.upserts.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_upsert_at == Some(call) {
                return Err(StoreError::Backend(format!("upsert #{} refused", call)));
            }
            self.inner.upsert_event(collection, event).await
        }

        async fn push_history(
            &self,
            collection: &str,
            event_id: &str,
            entry: &HistoryEntry,
        ) -> Result<(), StoreError> {
            let call = self.pushes.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_push_at == Some(call) {
                return Err(StoreError::Backend(format!("push #{} refused", call)));
            }
            self.inner.push_history(collection, event_id, entry).await
        }

        async fn find_stale(
            &self,
            collection: &str,
            filter: &StaleFilter,
        ) -> Result<Vec<Event>, StoreError> {
            self.inner.find_stale(collection, filter).await
        }

        async fn archive_events(
            &self,
            live: &str,
            archive: &str,
            events: &[Event],
        ) -> Result<u64, StoreError> {
            self.inner.archive_events(live, archive, events).await
        }

        async fn count(&self, collection: &str) -> Result<u64, StoreError> {
            self.inner.count(collection).await
        }

        async fn find_event(
            &self,
            collection: &str,
            event_id: &str,
        ) -> Result<Option<Event>, StoreError> {
            self.inner.find_event(collection, event_id).await
        }

        async fn insert_custom(&self, event: &CustomEvent) -> Result<(), StoreError> {
            self.inner.insert_custom(event).await
        }

        async fn list_custom(&self, title: Option<&str>) -> Result<Vec<CustomEvent>, StoreError> {
            self.inner.list_custom(title).await
        }

        async fn archive_custom(&self, events: &[CustomEvent]) -> Result<u64, StoreError> {
            self.inner.archive_custom(events).await
        }
    }

    fn pass(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()
    }

    fn event(id: &str, title: &str, update_time: DateTime<Utc>) -> Event {
        Event {
            title: title.to_string(),
            start_date: Utc.with_ymd_and_hms(2024, 1, 10, 8, 0, 0).unwrap(),
            end_date: Utc.with_ymd_and_hms(2024, 1, 10, 10, 0, 0).unwrap(),
            classrooms: vec!["Room A".to_string()],
            teachers: vec!["Prof. Smith".to_string()],
            groups: vec!["TD1".to_string()],
            undetermined_description_items: vec![],
            event_id: id.to_string(),
            last_update: update_time,
            affiliation: vec!["G1".to_string()],
            old: vec![],
        }
    }

    #[test]
    fn test_modifications_only_tracked_fields() {
        let old = event("a", "Math", pass(1));
        let mut new = event("a", "Math", pass(2));
        new.affiliation.push("G2".to_string());
        assert!(modifications(&old, &new, pass(2)).is_none());

        new.title = "Algebra".to_string();
        new.end_date = new.end_date + Duration::minutes(30);
        let entry = modifications(&old, &new, pass(2)).unwrap();
        assert_eq!(entry.changed_fields(), vec![TrackedField::Title, TrackedField::EndDate]);
        assert_eq!(entry.title.as_deref(), Some("Math"));
        assert_eq!(entry.end_date, Some(old.end_date));
        assert_eq!(entry.updated, pass(2));
    }

    #[tokio::test]
    async fn test_new_events() {
        let store = MemoryStore::new();
        let stats = reconcile(&store, "planning_info", &[event("a", "Math", pass(1))], pass(1))
            .await
            .unwrap();

        assert_eq!(stats, ReconcileStats { new: 1, updated: 0, unchanged: 0 });
        let stored = store.find_event("planning_info", "a").await.unwrap().unwrap();
        assert!(stored.old.is_empty());
    }

    #[tokio::test]
    async fn test_updated_event_records_history() {
        let store = MemoryStore::new();
        reconcile(&store, "c", &[event("a", "Math", pass(1))], pass(1))
            .await
            .unwrap();

        let mut changed = event("a", "Math", pass(2));
        changed.classrooms = vec!["Room B".to_string()];
        let stats = reconcile(&store, "c", &[changed], pass(2)).await.unwrap();
        assert_eq!(stats, ReconcileStats { new: 0, updated: 1, unchanged: 0 });

        let stored = store.find_event("c", "a").await.unwrap().unwrap();
        assert_eq!(stored.classrooms, vec!["Room B"]);
        assert_eq!(stored.last_update, pass(2));
        assert_eq!(stored.old.len(), 1);
        assert_eq!(stored.old[0].classrooms, Some(vec!["Room A".to_string()]));
        assert_eq!(stored.old[0].updated, pass(2));
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let store = MemoryStore::new();
        reconcile(&store, "c", &[event("a", "Math", pass(1))], pass(1))
            .await
            .unwrap();

        let second = vec![event("a", "Algebra", pass(2)), event("b", "Physics", pass(2))];
        let stats = reconcile(&store, "c", &second, pass(2)).await.unwrap();
        assert_eq!(stats, ReconcileStats { new: 1, updated: 1, unchanged: 0 });
        let history = store.find_event("c", "a").await.unwrap().unwrap().old;

        let stats = reconcile(&store, "c", &second, pass(2)).await.unwrap();
        assert_eq!(stats, ReconcileStats { new: 0, updated: 0, unchanged: 2 });
        assert_eq!(store.find_event("c", "a").await.unwrap().unwrap().old, history);
    }

    #[tokio::test]
    async fn test_upsert_failure_stops_and_keeps_earlier_writes() {
        let mut store = FailingStore::new(MemoryStore::new());
        store.fail_upsert_at = Some(2);

        let events = vec![
            event("a", "Math", pass(1)),
            event("b", "Physics", pass(1)),
            event("c", "Chemistry", pass(1)),
        ];
        let result = reconcile(&store, "c", &events, pass(1)).await;

        assert!(matches!(result, Err(StoreError::Backend(_))));
        assert_eq!(store.upserts.load(Ordering::SeqCst), 2);
        let kept: Vec<_> = store.inner.events("c").into_iter().map(|e| e.event_id).collect();
        assert_eq!(kept, vec!["a"]);
    }

    #[tokio::test]
    async fn test_history_failure_leaves_upsert_without_history() {
        let inner = MemoryStore::new();
        reconcile(&inner, "c", &[event("a", "Math", pass(1))], pass(1))
            .await
            .unwrap();

        let mut store = FailingStore::new(inner);
        store.fail_push_at = Some(1);
        let events = vec![event("a", "Algebra", pass(2)), event("b", "Physics", pass(2))];
        let result = reconcile(&store, "c", &events, pass(2)).await;

        assert!(matches!(result, Err(StoreError::Backend(_))));
        // the upsert went through, its snapshot did not, and "b" was never reached
        let a = store.inner.find_event("c", "a").await.unwrap().unwrap();
        assert_eq!(a.title, "Algebra");
        assert!(a.old.is_empty());
        assert!(store.inner.find_event("c", "b").await.unwrap().is_none());
    }
}
