//! Active command subscriptions of one broker session.

use super::topic_matches;

/// Filters in subscription order, each tagged with a generation id.
///
/// A fresh broker session starts with an empty table; handlers registered
/// for an earlier session keep their old id and stop matching.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    entries: Vec<(String, u64)>,
    next_id: u64,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `filter`, returning its id, or `None` if this session already has it
    pub fn insert(&mut self, filter: &str) -> Option<u64> {
        if self.entries.iter().any(|(f, _)| f == filter) {
            return None;
        }
        self.next_id += 1;
        self.entries.push((filter.to_string(), self.next_id));
        Some(self.next_id)
    }

    pub fn remove(&mut self, id: u64) {
        self.entries.retain(|(_, entry)| *entry != id);
    }

    /// Forget every filter; the next `insert` of each one subscribes again
    pub fn reset(&mut self) {
        self.entries.clear();
    }

    /// Id of the first subscription matching `topic`
    pub fn first_match(&self, topic: &str) -> Option<u64> {
        self.entries
            .iter()
            .find(|(filter, _)| topic_matches(filter, topic))
            .map(|(_, id)| *id)
    }

    pub fn filters(&self) -> Vec<String> {
        self.entries.iter().map(|(f, _)| f.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
