use planning_types::Event;
use std::collections::HashMap;

/// Collects the events of every group of a branch, one record per `event_id`.
///
/// Groups and their addresses must be fed in configuration order: the first
/// occurrence of an event keeps its content, later occurrences only append
/// their group to `affiliation`.
#[derive(Debug, Default)]
pub struct AffiliationMerger {
    events: Vec<Event>,
    index: HashMap<String, usize>,
}

impl AffiliationMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge the events of one address downloaded for `group`.
    /// Returns how many events were seen for the first time.
    pub fn add(&mut self, group: &str, events: Vec<Event>) -> usize {
        let mut added = 0;

        for mut event in events {
            match self.index.get(&event.event_id) {
                Some(&position) => self.events[position].affiliation.push(group.to_string()),
                None => {
                    event.affiliation = vec![group.to_string()];
                    self.index.insert(event.event_id.clone(), self.events.len());
                    self.events.push(event);
                    added += 1;
                }
            }
        }

        added
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }
}
