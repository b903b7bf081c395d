use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One calendar appointment as stored in a branch's planning collection.
///
/// `event_id` is the reconciliation key: unique per appointment within a
/// branch and stable across downloads of the same source event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub title: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub classrooms: Vec<String>,
    pub teachers: Vec<String>,
    pub groups: Vec<String>,
    pub undetermined_description_items: Vec<String>,
    pub event_id: String,
    pub last_update: DateTime<Utc>,
    /// Names of the groups whose feeds contained this event, in discovery order
    #[serde(default)]
    pub affiliation: Vec<String>,
    /// Append-only history of tracked values replaced by later passes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub old: Vec<HistoryEntry>,
}

impl Event {
    /// Whether the appointment is already over at `now`
    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        self.end_date < now
    }
}

/// Fields compared between passes to decide whether an event was updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackedField {
    Title,
    StartDate,
    EndDate,
    Classrooms,
    Teachers,
    Groups,
    UndeterminedDescriptionItems,
}

impl TrackedField {
    pub const ALL: [TrackedField; 7] = [
        TrackedField::Title,
        TrackedField::StartDate,
        TrackedField::EndDate,
        TrackedField::Classrooms,
        TrackedField::Teachers,
        TrackedField::Groups,
        TrackedField::UndeterminedDescriptionItems,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            TrackedField::Title => "title",
            TrackedField::StartDate => "start_date",
            TrackedField::EndDate => "end_date",
            TrackedField::Classrooms => "classrooms",
            TrackedField::Teachers => "teachers",
            TrackedField::Groups => "groups",
            TrackedField::UndeterminedDescriptionItems => "undetermined_description_items",
        }
    }
}

/// Snapshot of the values an update replaced.
///
/// Only the fields that actually changed are set; `updated` is the timestamp
/// of the pass that replaced them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classrooms: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teachers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub undetermined_description_items: Option<Vec<String>>,
    pub updated: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(updated: DateTime<Utc>) -> Self {
        Self {
            title: None,
            start_date: None,
            end_date: None,
            classrooms: None,
            teachers: None,
            groups: None,
            undetermined_description_items: None,
            updated,
        }
    }

    /// Fields recorded in this snapshot, in tracking order
    pub fn changed_fields(&self) -> Vec<TrackedField> {
        TrackedField::ALL
            .into_iter()
            .filter(|field| match field {
                TrackedField::Title => self.title.is_some(),
                TrackedField::StartDate => self.start_date.is_some(),
                TrackedField::EndDate => self.end_date.is_some(),
                TrackedField::Classrooms => self.classrooms.is_some(),
                TrackedField::Teachers => self.teachers.is_some(),
                TrackedField::Groups => self.groups.is_some(),
                TrackedField::UndeterminedDescriptionItems => {
                    self.undetermined_description_items.is_some()
                }
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.changed_fields().is_empty()
    }
}

/// Outcome counters of one reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileStats {
    pub new: u64,
    pub updated: u64,
    pub unchanged: u64,
}

impl ReconcileStats {
    pub fn total(&self) -> u64 {
        self.new + self.updated + self.unchanged
    }
}

/// Summary of one branch within a reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchReport {
    pub branch: String,
    pub stats: ReconcileStats,
    pub archived: u64,
    pub live_count: u64,
    pub archive_count: u64,
}

/// Manually entered event, kept apart from the feed-driven collections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomEvent {
    pub event_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub stakeholders: Vec<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

impl CustomEvent {
    pub fn new(title: impl Into<String>, start_date: DateTime<Utc>, end_date: DateTime<Utc>) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            title: title.into(),
            description: String::new(),
            locations: Vec::new(),
            stakeholders: Vec::new(),
            start_date,
            end_date,
        }
    }
}
