//! Retention sweep: records left untouched by a pass are moved to the archive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{EventStore, StaleFilter, StoreError};

/// Which untouched records a sweep archives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionPolicy {
    /// Only records that have not ended yet. Past events stay in the live
    /// collection as they were last seen.
    #[default]
    Upcoming,
    /// Every record the pass did not touch.
    All,
}

impl RetentionPolicy {
    pub fn filter(&self, update_time: DateTime<Utc>) -> StaleFilter {
        StaleFilter {
            updated_before: update_time,
            ending_after: match self {
                RetentionPolicy::Upcoming => Some(update_time),
                RetentionPolicy::All => None,
            },
        }
    }
}

/// Move the records of `live` whose `last_update` predates `update_time`
/// into `archive`. Returns how many were moved.
pub async fn sweep<S: EventStore>(
    store: &S,
    live: &str,
    archive: &str,
    update_time: DateTime<Utc>,
    policy: RetentionPolicy,
) -> Result<u64, StoreError> {
    let stale = store.find_stale(live, &policy.filter(update_time)).await?;
    if stale.is_empty() {
        return Ok(0);
    }

    for event in &stale {
        tracing::debug!("Archiving {} ({}) from {}", event.event_id, event.title, live);
    }

    let archived = store
        .archive_events(live, archive, &stale)
        .await
        .map_err(|e| {
            tracing::error!("Error while moving {} events to {}: {}", stale.len(), archive, e);
            e
        })?;

    if archived != stale.len() as u64 {
        tracing::warn!(
            "{} events copied to {} but {} removed from {}",
            stale.len(),
            archive,
            archived,
            live
        );
    }

    Ok(archived)
}
