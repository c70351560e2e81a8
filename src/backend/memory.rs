//! Bounded in-memory backend with LRU eviction

use std::collections::HashMap;
use tracing::debug;

use crate::backend::{BackendStats, StorageBackend};
use crate::error::Result;
use crate::item::CacheItem;

/// Hot-tier storage: a bounded map evicting the least-recently-used item
///
/// Victim selection orders by `last_accessed_at` first (recency matters most
/// in the hot tier), breaking ties by lowest `quality`, then oldest
/// `created_at`. A `set` at capacity evicts exactly one victim before
/// inserting.
#[derive(Debug)]
pub struct MemoryBackend {
    items: HashMap<String, CacheItem>,
    max_items: usize,
    stats: BackendStats,
}

impl MemoryBackend {
    /// Create a backend bounded to `max_items` entries
    pub fn new(max_items: usize) -> Self {
        Self {
            items: HashMap::new(),
            max_items,
            stats: BackendStats::default(),
        }
    }

    /// Insert an item, returning the victim evicted to make room (if any)
    ///
    /// The hybrid tier uses the returned victim for write-back demotion; the
    /// plain trait `set` discards it.
    pub fn set_evicting(&mut self, item: CacheItem) -> Option<CacheItem> {
        let mut victim = None;
        if !self.items.contains_key(&item.fingerprint) && self.items.len() >= self.max_items {
            victim = self.evict_one();
        }
        self.items.insert(item.fingerprint.clone(), item);
        victim
    }

    fn evict_one(&mut self) -> Option<CacheItem> {
        let victim_key = self
            .items
            .values()
            .min_by(|a, b| {
                a.last_accessed_at
                    .cmp(&b.last_accessed_at)
                    .then(a.quality.cmp(&b.quality))
                    .then(a.created_at.cmp(&b.created_at))
            })
            .map(|item| item.fingerprint.clone())?;

        let victim = self.items.remove(&victim_key);
        self.stats.evictions += 1;
        debug!("Memory tier full, evicting: {}", victim_key);
        victim
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&mut self, key: &str) -> Option<CacheItem> {
        let item = self.items.get_mut(key)?;
        item.mark_accessed();
        Some(item.clone())
    }

    fn peek(&self, key: &str) -> Option<CacheItem> {
        self.items.get(key).cloned()
    }

    fn set(&mut self, item: CacheItem) {
        self.set_evicting(item);
    }

    fn delete(&mut self, key: &str) -> bool {
        self.items.remove(key).is_some()
    }

    fn adjust_quality(&mut self, key: &str, delta: i64) -> bool {
        match self.items.get_mut(key) {
            Some(item) => {
                item.adjust_quality(delta);
                true
            }
            None => false,
        }
    }

    fn clear(&mut self) {
        self.items.clear();
    }

    fn flush(&mut self) -> Result<()> {
        // Nothing buffered; the memory tier is volatile by definition
        Ok(())
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn contains(&self, key: &str) -> bool {
        self.items.contains_key(key)
    }

    fn items(&self) -> Vec<CacheItem> {
        self.items.values().cloned().collect()
    }

    fn stats(&self) -> BackendStats {
        self.stats.clone()
    }
}
