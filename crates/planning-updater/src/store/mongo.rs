use bson::{doc, Bson, Document};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::options::{FindOneAndUpdateOptions, FindOptions, IndexOptions, ReturnDocument};
use mongodb::{Client, Collection, Database, IndexModel};
use planning_types::{CustomEvent, Event, HistoryEntry};

use super::{
    EventStore, StaleFilter, StoreError, CUSTOM_ARCHIVE_COLLECTION, CUSTOM_COLLECTION,
};

/// MongoDB backed store. BSON datetimes keep millisecond precision only.
#[derive(Debug, Clone)]
pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, StoreError> {
        let client = Client::with_uri_str(uri).await?;
        let store = Self {
            db: client.database(database),
        };
        store.db.run_command(doc! { "ping": 1 }, None).await?;
        Ok(store)
    }

    /// Unique index on `event_id` so concurrent writers cannot duplicate a record
    pub async fn ensure_indexes(&self, collection: &str) -> Result<(), StoreError> {
        let index = IndexModel::builder()
            .keys(doc! { "event_id": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        self.collection(collection).create_index(index, None).await?;
        Ok(())
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.db.collection::<Document>(name)
    }
}

fn datetime(value: DateTime<Utc>) -> bson::DateTime {
    bson::DateTime::from_chrono(value)
}

/// Every field except `old`, so a `$set` never clobbers the history
fn event_fields(event: &Event) -> Document {
    doc! {
        "title": event.title.as_str(),
        "start_date": datetime(event.start_date),
        "end_date": datetime(event.end_date),
        "classrooms": event.classrooms.clone(),
        "teachers": event.teachers.clone(),
        "groups": event.groups.clone(),
        "undetermined_description_items": event.undetermined_description_items.clone(),
        "event_id": event.event_id.as_str(),
        "last_update": datetime(event.last_update),
        "affiliation": event.affiliation.clone(),
    }
}

fn event_document(event: &Event) -> Document {
    let mut document = event_fields(event);
    if !event.old.is_empty() {
        let history: Vec<Bson> = event
            .old
            .iter()
            .map(|entry| Bson::Document(history_document(entry)))
            .collect();
        document.insert("old", history);
    }
    document
}

fn history_document(entry: &HistoryEntry) -> Document {
    let mut document = Document::new();
    if let Some(title) = &entry.title {
        document.insert("title", title.as_str());
    }
    if let Some(start_date) = entry.start_date {
        document.insert("start_date", datetime(start_date));
    }
    if let Some(end_date) = entry.end_date {
        document.insert("end_date", datetime(end_date));
    }
    for (key, value) in [
        ("classrooms", &entry.classrooms),
        ("teachers", &entry.teachers),
        ("groups", &entry.groups),
        (
            "undetermined_description_items",
            &entry.undetermined_description_items,
        ),
    ] {
        if let Some(items) = value {
            document.insert(key, items.clone());
        }
    }
    document.insert("updated", datetime(entry.updated));
    document
}

fn strings(document: &Document, key: &str) -> Result<Vec<String>, StoreError> {
    Ok(document
        .get_array(key)?
        .iter()
        .filter_map(Bson::as_str)
        .map(str::to_string)
        .collect())
}

fn optional_strings(document: &Document, key: &str) -> Result<Option<Vec<String>>, StoreError> {
    if document.contains_key(key) {
        strings(document, key).map(Some)
    } else {
        Ok(None)
    }
}

fn history_from_document(document: &Document) -> Result<HistoryEntry, StoreError> {
    let mut entry = HistoryEntry::new(document.get_datetime("updated")?.to_chrono());
    entry.title = document.get_str("title").ok().map(str::to_string);
    entry.start_date = document
        .get_datetime("start_date")
        .ok()
        .map(|d| d.to_chrono());
    entry.end_date = document.get_datetime("end_date").ok().map(|d| d.to_chrono());
    entry.classrooms = optional_strings(document, "classrooms")?;
    entry.teachers = optional_strings(document, "teachers")?;
    entry.groups = optional_strings(document, "groups")?;
    entry.undetermined_description_items =
        optional_strings(document, "undetermined_description_items")?;
    Ok(entry)
}

fn event_from_document(document: &Document) -> Result<Event, StoreError> {
    let old = match document.get_array("old") {
        Ok(history) => history
            .iter()
            .filter_map(Bson::as_document)
            .map(history_from_document)
            .collect::<Result<Vec<_>, _>>()?,
        Err(_) => Vec::new(),
    };

    Ok(Event {
        title: document.get_str("title")?.to_string(),
        start_date: document.get_datetime("start_date")?.to_chrono(),
        end_date: document.get_datetime("end_date")?.to_chrono(),
        classrooms: strings(document, "classrooms")?,
        teachers: strings(document, "teachers")?,
        groups: strings(document, "groups")?,
        undetermined_description_items: strings(document, "undetermined_description_items")?,
        event_id: document.get_str("event_id")?.to_string(),
        last_update: document.get_datetime("last_update")?.to_chrono(),
        affiliation: optional_strings(document, "affiliation")?.unwrap_or_default(),
        old,
    })
}

fn custom_document(event: &CustomEvent) -> Document {
    doc! {
        "event_id": event.event_id.as_str(),
        "title": event.title.as_str(),
        "description": event.description.as_str(),
        "locations": event.locations.clone(),
        "stakeholders": event.stakeholders.clone(),
        "start_date": datetime(event.start_date),
        "end_date": datetime(event.end_date),
    }
}

fn custom_from_document(document: &Document) -> Result<CustomEvent, StoreError> {
    Ok(CustomEvent {
        event_id: document.get_str("event_id")?.to_string(),
        title: document.get_str("title")?.to_string(),
        description: document.get_str("description").unwrap_or_default().to_string(),
        locations: optional_strings(document, "locations")?.unwrap_or_default(),
        stakeholders: optional_strings(document, "stakeholders")?.unwrap_or_default(),
        start_date: document.get_datetime("start_date")?.to_chrono(),
        end_date: document.get_datetime("end_date")?.to_chrono(),
    })
}

fn event_ids<'a>(ids: impl Iterator<Item = &'a str>) -> Document {
    let ids: Vec<Bson> = ids.map(|id| Bson::String(id.to_string())).collect();
    doc! { "event_id": { "$in": ids } }
}

impl EventStore for MongoStore {
    async fn upsert_event(
        &self,
        collection: &str,
        event: &Event,
    ) -> Result<Option<Event>, StoreError> {
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::Before)
            .build();

        let previous = self
            .collection(collection)
            .find_one_and_update(
                doc! { "event_id": event.event_id.as_str() },
                doc! { "$set": event_fields(event) },
                options,
            )
            .await?;

        previous.as_ref().map(event_from_document).transpose()
    }

    async fn push_history(
        &self,
        collection: &str,
        event_id: &str,
        entry: &HistoryEntry,
    ) -> Result<(), StoreError> {
        let result = self
            .collection(collection)
            .update_one(
                doc! { "event_id": event_id },
                doc! { "$push": { "old": history_document(entry) } },
                None,
            )
            .await?;

        if result.matched_count == 0 {
            return Err(StoreError::Backend(format!(
                "no event {} in {} to append history to",
                event_id, collection
            )));
        }
        Ok(())
    }

    async fn find_stale(
        &self,
        collection: &str,
        filter: &StaleFilter,
    ) -> Result<Vec<Event>, StoreError> {
        let mut query = doc! { "last_update": { "$lt": datetime(filter.updated_before) } };
        if let Some(instant) = filter.ending_after {
            query.insert("end_date", doc! { "$gte": datetime(instant) });
        }
        let options = FindOptions::builder().sort(doc! { "start_date": 1 }).build();

        let documents: Vec<Document> = self
            .collection(collection)
            .find(query, options)
            .await?
            .try_collect()
            .await?;

        documents.iter().map(event_from_document).collect()
    }

    async fn archive_events(
        &self,
        live: &str,
        archive: &str,
        events: &[Event],
    ) -> Result<u64, StoreError> {
        if events.is_empty() {
            return Ok(0);
        }

        let documents: Vec<Document> = events.iter().map(event_document).collect();
        self.collection(archive).insert_many(documents, None).await?;

        let removed = self
            .collection(live)
            .delete_many(event_ids(events.iter().map(|e| e.event_id.as_str())), None)
            .await?;
        Ok(removed.deleted_count)
    }

    async fn count(&self, collection: &str) -> Result<u64, StoreError> {
        Ok(self
            .collection(collection)
            .count_documents(doc! {}, None)
            .await?)
    }

    async fn find_event(
        &self,
        collection: &str,
        event_id: &str,
    ) -> Result<Option<Event>, StoreError> {
        let document = self
            .collection(collection)
            .find_one(doc! { "event_id": event_id }, None)
            .await?;
        document.as_ref().map(event_from_document).transpose()
    }

    async fn insert_custom(&self, event: &CustomEvent) -> Result<(), StoreError> {
        self.collection(CUSTOM_COLLECTION)
            .insert_one(custom_document(event), None)
            .await?;
        Ok(())
    }

    async fn list_custom(&self, title: Option<&str>) -> Result<Vec<CustomEvent>, StoreError> {
        let filter = match title {
            Some(title) => doc! { "title": title },
            None => doc! {},
        };
        let options = FindOptions::builder().sort(doc! { "start_date": 1 }).build();

        let documents: Vec<Document> = self
            .collection(CUSTOM_COLLECTION)
            .find(filter, options)
            .await?
            .try_collect()
            .await?;

        documents.iter().map(custom_from_document).collect()
    }

    async fn archive_custom(&self, events: &[CustomEvent]) -> Result<u64, StoreError> {
        if events.is_empty() {
            return Ok(0);
        }

        let documents: Vec<Document> = events.iter().map(custom_document).collect();
        self.collection(CUSTOM_ARCHIVE_COLLECTION)
            .insert_many(documents, None)
            .await?;

        let removed = self
            .collection(CUSTOM_COLLECTION)
            .delete_many(event_ids(events.iter().map(|e| e.event_id.as_str())), None)
            .await?;
        Ok(removed.deleted_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_event() -> Event {
        Event {
            title: "CS101".to_string(),
            start_date: Utc.with_ymd_and_hms(2024, 1, 10, 8, 0, 0).unwrap(),
            end_date: Utc.with_ymd_and_hms(2024, 1, 10, 10, 0, 0).unwrap(),
            classrooms: vec!["Room A".to_string(), "Room B".to_string()],
            teachers: vec!["Prof. Smith".to_string()],
            groups: vec!["TD1".to_string()],
            undetermined_description_items: vec![],
            event_id: "ADE-1".to_string(),
            last_update: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            affiliation: vec!["G1".to_string(), "G2".to_string()],
            old: vec![],
        }
    }

    #[test]
    fn test_set_document_never_touches_history() {
        let mut event = sample_event();
        event.old.push(HistoryEntry::new(Utc::now()));

        let fields = event_fields(&event);
        assert!(!fields.contains_key("old"));
        assert!(!fields.contains_key("_id"));
        assert_eq!(fields.get_str("event_id").unwrap(), "ADE-1");
        assert_eq!(
            fields.get_datetime("start_date").unwrap().to_chrono(),
            event.start_date
        );
    }

    #[test]
    fn test_event_document_conversion() {
        let mut event = sample_event();
        let mut entry = HistoryEntry::new(Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap());
        entry.classrooms = Some(vec!["Room C".to_string()]);
        event.old.push(entry);

        let decoded = event_from_document(&event_document(&event)).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_history_document_only_holds_changes() {
        let mut entry = HistoryEntry::new(Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap());
        entry.title = Some("Old".to_string());

        let document = history_document(&entry);
        assert_eq!(document.len(), 2);
        assert_eq!(document.get_str("title").unwrap(), "Old");
    }

    #[test]
    fn test_document_missing_mandatory_field() {
        let mut document = event_fields(&sample_event());
        document.remove("end_date");
        assert!(matches!(
            event_from_document(&document),
            Err(StoreError::Field(_))
        ));
    }

    #[test]
    fn test_event_id_filter() {
        let filter = event_ids(["a", "b"].into_iter());
        let ids = filter.get_document("event_id").unwrap().get_array("$in").unwrap();
        assert_eq!(ids.len(), 2);
    }
}
