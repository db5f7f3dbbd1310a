use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Flat string-to-string bag carried on `EnrichedActivityEvent.enrichmentMetadata`.
/// Used both to pass destination config down and to carry section-header
/// markers and provider-emitted hints. No explicit cap exists in the source
/// system this was distilled from; we bound total size and drop the oldest
/// entry rather than let it grow unbounded (see DESIGN.md).
const MAX_METADATA_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataBag {
    #[serde(flatten)]
    entries: HashMap<String, String>,
    #[serde(skip)]
    insertion_order: Vec<String>,
}

impl MetadataBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys_with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> {
        self.entries
            .keys()
            .filter(move |k| k.starts_with(prefix))
            .map(String::as_str)
    }

    fn total_bytes(&self) -> usize {
        self.entries
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }

    /// Last-writer-wins insert within a single enricher run, dropping the
    /// oldest entry once the bag exceeds `MAX_METADATA_BYTES`.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        if !self.entries.contains_key(&key) {
            self.insertion_order.push(key.clone());
        }
        self.entries.insert(key, value.into());

        while self.total_bytes() > MAX_METADATA_BYTES && !self.insertion_order.is_empty() {
            let oldest = self.insertion_order.remove(0);
            self.entries.remove(&oldest);
            tracing::warn!(
                target: "sync.metadata",
                dropped_key = %oldest,
                "enrichment metadata exceeded cap, dropped oldest entry"
            );
        }
    }

    pub fn merge(&mut self, other: &MetadataBag) {
        for (k, v) in other.entries.iter() {
            self.insert(k.clone(), v.clone());
        }
    }

    pub fn into_map(self) -> HashMap<String, String> {
        self.entries
    }
}

impl From<HashMap<String, String>> for MetadataBag {
    fn from(entries: HashMap<String, String>) -> Self {
        let insertion_order = entries.keys().cloned().collect();
        Self {
            entries,
            insertion_order,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_is_last_writer_wins() {
        let mut bag = MetadataBag::new();
        bag.insert("k", "first");
        bag.insert("k", "second");
        assert_eq!(bag.get("k"), Some("second"));
        assert_eq!(bag.len(), 1);
    }

    #[test]
    fn bounded_insert_drops_oldest_when_cap_exceeded() {
        let mut bag = MetadataBag::new();
        let big_value = "x".repeat(40 * 1024);
        bag.insert("first", big_value.clone());
        bag.insert("second", big_value);
        assert!(!bag.contains_key("first"));
        assert!(bag.contains_key("second"));
    }

    #[test]
    fn keys_with_prefix_filters() {
        let mut bag = MetadataBag::new();
        bag.insert("google_sheets_api_key", "abc");
        bag.insert("git_repo_path", "xyz");
        let matched: Vec<_> = bag.keys_with_prefix("google_sheets_").collect();
        assert_eq!(matched, vec!["google_sheets_api_key"]);
    }
}
