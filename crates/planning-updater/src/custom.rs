//! Manually entered events living next to the feed-driven collections.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use planning_types::CustomEvent;

use crate::store::EventStore;

/// Which custom events a removal targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomSelector {
    Id(String),
    Title(String),
}

/// Parse `YYYY-MM-DDTHH:MM` (read as UTC) or an RFC 3339 timestamp.
pub fn parse_datetime(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(date_time) = DateTime::parse_from_rfc3339(value) {
        return Ok(date_time.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M")
        .with_context(|| format!("Bad date {:?}, expected YYYY-MM-DDTHH:MM", value))?;
    Ok(naive.and_utc())
}

pub async fn add<S: EventStore>(store: &S, event: CustomEvent) -> Result<CustomEvent> {
    if event.title.trim().is_empty() {
        bail!("A custom event needs a title");
    }
    if event.end_date < event.start_date {
        bail!(
            "The event ends ({}) before it starts ({})",
            event.end_date,
            event.start_date
        );
    }

    store
        .insert_custom(&event)
        .await
        .context("Failed to insert the custom event")?;
    tracing::info!("Custom event {} ({}) added", event.event_id, event.title);
    Ok(event)
}

pub async fn find<S: EventStore>(store: &S, selector: &CustomSelector) -> Result<Vec<CustomEvent>> {
    let events = match selector {
        CustomSelector::Title(title) => store.list_custom(Some(title.as_str())).await?,
        CustomSelector::Id(id) => store
            .list_custom(None)
            .await?
            .into_iter()
            .filter(|e| &e.event_id == id)
            .collect(),
    };
    Ok(events)
}

/// Move the selected events to the custom archive. Returns how many moved.
pub async fn remove<S: EventStore>(store: &S, selector: &CustomSelector) -> Result<u64> {
    let events = find(store, selector).await?;
    if events.is_empty() {
        tracing::warn!("No custom event matches {:?}", selector);
        return Ok(0);
    }

    let removed = store
        .archive_custom(&events)
        .await
        .context("Failed to archive the custom events")?;
    for event in &events {
        tracing::info!("Custom event {} ({}) removed", event.event_id, event.title);
    }
    Ok(removed)
}

/// Multi-line listing entry
pub fn describe(event: &CustomEvent) -> String {
    let mut lines = vec![format!(
        "[{}] {} ({} -> {})",
        event.event_id,
        event.title,
        event.start_date.format("%Y-%m-%d %H:%M"),
        event.end_date.format("%Y-%m-%d %H:%M")
    )];
    if !event.description.is_empty() {
        lines.push(format!("    {}", event.description));
    }
    if !event.locations.is_empty() {
        lines.push(format!("    Locations: {}", event.locations.join(", ")));
    }
    if !event.stakeholders.is_empty() {
        lines.push(format!("    Stakeholders: {}", event.stakeholders.join(", ")));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, CUSTOM_ARCHIVE_COLLECTION};
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_datetime() {
        assert_eq!(parse_datetime("2024-03-01T09:00").unwrap(), at(9));
        assert_eq!(parse_datetime("2024-03-01T10:00:00+01:00").unwrap(), at(9));
        assert!(parse_datetime("01/03/2024").is_err());
    }

    #[tokio::test]
    async fn test_add_rejects_inverted_dates() {
        let store = MemoryStore::new();
        let result = add(&store, CustomEvent::new("Exam", at(12), at(9))).await;
        tokio_test::assert_err!(result);
        assert!(store.list_custom(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_by_id_and_title() {
        let store = MemoryStore::new();
        let exam = add(&store, CustomEvent::new("Exam", at(9), at(12))).await.unwrap();
        add(&store, CustomEvent::new("Open day", at(9), at(17))).await.unwrap();
        add(&store, CustomEvent::new("Open day", at(13), at(17))).await.unwrap();

        let removed = remove(&store, &CustomSelector::Id(exam.event_id.clone()))
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let removed = remove(&store, &CustomSelector::Title("Open day".to_string()))
            .await
            .unwrap();
        assert_eq!(removed, 2);

        assert!(store.list_custom(None).await.unwrap().is_empty());
        assert_eq!(store.custom_events(CUSTOM_ARCHIVE_COLLECTION).len(), 3);
    }

    #[tokio::test]
    async fn test_remove_unknown_is_noop() {
        let store = MemoryStore::new();
        let removed = remove(&store, &CustomSelector::Title("Nothing".to_string()))
            .await
            .unwrap();
        assert_eq!(removed, 0);
    }

    #[test]
    fn test_describe() {
        let mut event = CustomEvent::new("Exam", at(9), at(12));
        event.locations = vec!["Amphi A".to_string()];
        let text = describe(&event);
        assert!(text.contains("Exam (2024-03-01 09:00 -> 2024-03-01 12:00)"));
        assert!(text.contains("Locations: Amphi A"));
        assert!(!text.contains("Stakeholders"));
    }
}
