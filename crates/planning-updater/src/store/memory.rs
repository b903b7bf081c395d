use planning_types::{CustomEvent, Event, HistoryEntry};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{
    EventStore, StaleFilter, StoreError, CUSTOM_ARCHIVE_COLLECTION, CUSTOM_COLLECTION,
};

/// Process-local store used by dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Vec<Event>>>,
    custom: Mutex<HashMap<String, Vec<CustomEvent>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records of a collection in insertion order
    pub fn events(&self, collection: &str) -> Vec<Event> {
        self.collections
            .lock()
            .map(|collections| collections.get(collection).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn custom_events(&self, collection: &str) -> Vec<CustomEvent> {
        self.custom
            .lock()
            .map(|custom| custom.get(collection).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Put a record in place as if an earlier pass had written it
    pub fn seed(&self, collection: &str, event: Event) -> Result<(), StoreError> {
        self.lock_collections()?
            .entry(collection.to_string())
            .or_default()
            .push(event);
        Ok(())
    }

    fn lock_collections(&self) -> Result<MutexGuard<'_, HashMap<String, Vec<Event>>>, StoreError> {
        self.collections
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }

    fn lock_custom(
        &self,
    ) -> Result<MutexGuard<'_, HashMap<String, Vec<CustomEvent>>>, StoreError> {
        self.custom
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }
}

impl EventStore for MemoryStore {
    async fn upsert_event(
        &self,
        collection: &str,
        event: &Event,
    ) -> Result<Option<Event>, StoreError> {
        let mut collections = self.lock_collections()?;
        let records = collections.entry(collection.to_string()).or_default();

        match records.iter_mut().find(|r| r.event_id == event.event_id) {
            Some(record) => {
                let previous = record.clone();
                let history = std::mem::take(&mut record.old);
                *record = Event {
                    old: history,
                    ..event.clone()
                };
                Ok(Some(previous))
            }
            None => {
                records.push(Event {
                    old: Vec::new(),
                    ..event.clone()
                });
                Ok(None)
            }
        }
    }

    async fn push_history(
        &self,
        collection: &str,
        event_id: &str,
        entry: &HistoryEntry,
    ) -> Result<(), StoreError> {
        let mut collections = self.lock_collections()?;
        let record = collections
            .get_mut(collection)
            .and_then(|records| records.iter_mut().find(|r| r.event_id == event_id))
            .ok_or_else(|| {
                StoreError::Backend(format!("no event {} in {}", event_id, collection))
            })?;
        record.old.push(entry.clone());
        Ok(())
    }

    async fn find_stale(
        &self,
        collection: &str,
        filter: &StaleFilter,
    ) -> Result<Vec<Event>, StoreError> {
        let collections = self.lock_collections()?;
        Ok(collections
            .get(collection)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| filter.matches(r))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn archive_events(
        &self,
        live: &str,
        archive: &str,
        events: &[Event],
    ) -> Result<u64, StoreError> {
        let mut collections = self.lock_collections()?;
        collections
            .entry(archive.to_string())
            .or_default()
            .extend(events.iter().cloned());

        let records = collections.entry(live.to_string()).or_default();
        let before = records.len();
        records.retain(|r| !events.iter().any(|e| e.event_id == r.event_id));
        Ok((before - records.len()) as u64)
    }

    async fn count(&self, collection: &str) -> Result<u64, StoreError> {
        let collections = self.lock_collections()?;
        Ok(collections.get(collection).map_or(0, |r| r.len() as u64))
    }

    async fn find_event(
        &self,
        collection: &str,
        event_id: &str,
    ) -> Result<Option<Event>, StoreError> {
        let collections = self.lock_collections()?;
        Ok(collections
            .get(collection)
            .and_then(|records| records.iter().find(|r| r.event_id == event_id))
            .cloned())
    }

    async fn insert_custom(&self, event: &CustomEvent) -> Result<(), StoreError> {
        self.lock_custom()?
            .entry(CUSTOM_COLLECTION.to_string())
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn list_custom(&self, title: Option<&str>) -> Result<Vec<CustomEvent>, StoreError> {
        let custom = self.lock_custom()?;
        Ok(custom
            .get(CUSTOM_COLLECTION)
            .map(|events| {
                events
                    .iter()
                    .filter(|e| title.map_or(true, |t| e.title == t))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn archive_custom(&self, events: &[CustomEvent]) -> Result<u64, StoreError> {
        let mut custom = self.lock_custom()?;
        custom
            .entry(CUSTOM_ARCHIVE_COLLECTION.to_string())
            .or_default()
            .extend(events.iter().cloned());

        let live = custom.entry(CUSTOM_COLLECTION.to_string()).or_default();
        let before = live.len();
        live.retain(|c| !events.iter().any(|e| e.event_id == c.event_id));
        Ok((before - live.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn event(id: &str, title: &str) -> Event {
        Event {
            title: title.to_string(),
            start_date: Utc.with_ymd_and_hms(2024, 1, 10, 8, 0, 0).unwrap(),
            end_date: Utc.with_ymd_and_hms(2024, 1, 10, 10, 0, 0).unwrap(),
            classrooms: vec![],
            teachers: vec![],
            groups: vec![],
            undetermined_description_items: vec![],
            event_id: id.to_string(),
            last_update: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            affiliation: vec!["G1".to_string()],
            old: vec![],
        }
    }

    #[tokio::test]
    async fn test_upsert_returns_previous_and_keeps_history() {
        let store = MemoryStore::new();
        assert!(store.upsert_event("c", &event("a", "v1")).await.unwrap().is_none());

        let entry = HistoryEntry::new(Utc::now());
        store.push_history("c", "a", &entry).await.unwrap();

        let previous = store.upsert_event("c", &event("a", "v2")).await.unwrap().unwrap();
        assert_eq!(previous.title, "v1");

        let stored = store.find_event("c", "a").await.unwrap().unwrap();
        assert_eq!(stored.title, "v2");
        assert_eq!(stored.old, vec![entry]);
        assert_eq!(store.count("c").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_push_history_unknown_event_fails() {
        let store = MemoryStore::new();
        let result = store
            .push_history("c", "missing", &HistoryEntry::new(Utc::now()))
            .await;
        assert!(matches!(result, Err(StoreError::Backend(_))));
    }

    #[tokio::test]
    async fn test_archive_moves_records() {
        let store = MemoryStore::new();
        store.seed("live", event("a", "A")).unwrap();
        store.seed("live", event("b", "B")).unwrap();

        let moved = store
            .archive_events("live", "archive", &[event("a", "A")])
            .await
            .unwrap();

        assert_eq!(moved, 1);
        assert_eq!(store.events("live").len(), 1);
        assert_eq!(store.events("archive")[0].event_id, "a");
    }

    #[tokio::test]
    async fn test_custom_events() {
        let store = MemoryStore::new();
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let open_day = CustomEvent::new("Open day", start, start + chrono::Duration::hours(2));
        let exam = CustomEvent::new("Exam", start, start + chrono::Duration::hours(3));
        store.insert_custom(&open_day).await.unwrap();
        store.insert_custom(&exam).await.unwrap();

        assert_eq!(store.list_custom(None).await.unwrap().len(), 2);
        let found = store.list_custom(Some("Exam")).await.unwrap();
        assert_eq!(found, vec![exam.clone()]);

        assert_eq!(store.archive_custom(&found).await.unwrap(), 1);
        assert_eq!(store.list_custom(None).await.unwrap(), vec![open_day]);
        assert_eq!(store.custom_events(CUSTOM_ARCHIVE_COLLECTION), vec![exam]);
    }
}
