//! Cache item model with access and quality bookkeeping

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A cached query result with its mutable bookkeeping metadata
///
/// The `value` payload is opaque to the cache: it is stored, returned and
/// persisted verbatim, never interpreted. Everything else exists to drive
/// eviction, tier placement and quality-gated retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheItem {
    /// Deterministic key derived from the query (and optionally its context)
    pub fingerprint: String,

    /// The cached answer/artifact
    pub value: Value,

    /// When the item was created
    pub created_at: DateTime<Utc>,

    /// Last access time (drives LRU eviction)
    pub last_accessed_at: DateTime<Utc>,

    /// Number of successful reads of this item
    pub access_count: u64,

    /// Signed feedback counter; 0 is neutral, negative items are excluded
    /// from fast retrieval and discarded instead of demoted
    pub quality: i64,

    /// Opaque side data (originating query text, keywords, session id, ...)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl CacheItem {
    /// Create a fresh item with neutral quality
    pub fn new(fingerprint: impl Into<String>, value: Value) -> Self {
        let now = Utc::now();
        Self {
            fingerprint: fingerprint.into(),
            value,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            quality: 0,
            metadata: HashMap::new(),
        }
    }

    /// Create a fresh item carrying metadata
    pub fn with_metadata(
        fingerprint: impl Into<String>,
        value: Value,
        metadata: HashMap<String, Value>,
    ) -> Self {
        let mut item = Self::new(fingerprint, value);
        item.metadata = metadata;
        item
    }

    /// Mark the item as read (updates access time and count)
    pub fn mark_accessed(&mut self) {
        self.last_accessed_at = Utc::now();
        self.access_count += 1;
    }

    /// Apply a quality feedback signal
    pub fn adjust_quality(&mut self, delta: i64) {
        self.quality += delta;
    }

    /// Whether the item is eligible for quality-gated (`get_fast`) retrieval
    pub fn is_trusted(&self) -> bool {
        self.quality >= 0
    }

    /// The query text recorded at `set` time, if any
    pub fn source_query(&self) -> Option<&str> {
        self.metadata.get("query").and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn test_item_creation() {
        let item = CacheItem::new("abc123", json!("an answer"));

        assert_eq!(item.fingerprint, "abc123");
        assert_eq!(item.value, json!("an answer"));
        assert_eq!(item.access_count, 0);
        assert_eq!(item.quality, 0);
        assert!(item.is_trusted());
        assert_eq!(item.created_at, item.last_accessed_at);
    }

    #[test]
    fn test_mark_accessed() {
        let mut item = CacheItem::new("k", json!("v"));
        let before = item.last_accessed_at;

        sleep(Duration::from_millis(10));
        item.mark_accessed();

        assert_eq!(item.access_count, 1);
        assert!(item.last_accessed_at > before);
    }

    #[test]
    fn test_quality_adjustment() {
        let mut item = CacheItem::new("k", json!("v"));

        item.adjust_quality(1);
        assert_eq!(item.quality, 1);

        item.adjust_quality(-1);
        item.adjust_quality(-1);
        assert_eq!(item.quality, -1);
        assert!(!item.is_trusted());
    }

    #[test]
    fn test_source_query() {
        let mut metadata = HashMap::new();
        metadata.insert("query".to_string(), json!("什么是Python?"));
        let item = CacheItem::with_metadata("k", json!("Python是一种编程语言"), metadata);

        assert_eq!(item.source_query(), Some("什么是Python?"));

        let bare = CacheItem::new("k2", json!("v"));
        assert_eq!(bare.source_query(), None);
    }

    #[test]
    fn test_serde_roundtrip() {
        let mut item = CacheItem::new("k", json!({"answer": "42", "sources": [1, 2]}));
        item.mark_accessed();
        item.adjust_quality(2);

        let encoded = serde_json::to_string(&item).unwrap();
        let decoded: CacheItem = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded.fingerprint, item.fingerprint);
        assert_eq!(decoded.value, item.value);
        assert_eq!(decoded.access_count, 1);
        assert_eq!(decoded.quality, 2);
    }
}
