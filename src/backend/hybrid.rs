//! Two-tier backend: hot memory in front of a durable disk store

use tracing::debug;

use crate::backend::{BackendStats, DiskBackend, MemoryBackend, StorageBackend};
use crate::error::Result;
use crate::item::CacheItem;

/// Hot/cold tiered storage
///
/// `get` checks memory first and promotes disk hits into memory; `set` always
/// lands in memory. When memory evicts a victim to make room, the victim is
/// written back to disk (demotion) unless its `quality` is below the discard
/// threshold, in which case it is dropped outright. An item is live in
/// exactly one tier at a time: promotion and demotion move it, never copy it.
pub struct HybridBackend {
    memory: MemoryBackend,
    disk: DiskBackend,

    /// Victims with `quality` below this are discarded instead of demoted
    discard_quality_below: i64,

    stats: BackendStats,
}

impl HybridBackend {
    /// Compose a hot memory tier over a cold disk tier
    pub fn new(memory: MemoryBackend, disk: DiskBackend) -> Self {
        Self {
            memory,
            disk,
            discard_quality_below: 0,
            stats: BackendStats::default(),
        }
    }

    /// Override the demotion discard threshold
    pub fn with_discard_threshold(mut self, threshold: i64) -> Self {
        self.discard_quality_below = threshold;
        self
    }

    /// Number of items currently in the hot tier
    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }

    /// Number of items currently in the cold tier
    pub fn disk_len(&self) -> usize {
        self.disk.len()
    }

    /// Whether a fingerprint is live in the hot tier
    pub fn in_memory(&self, key: &str) -> bool {
        self.memory.contains(key)
    }

    /// Insert into memory, demoting or discarding the displaced victim
    fn set_in_memory(&mut self, item: CacheItem) {
        if let Some(victim) = self.memory.set_evicting(item) {
            if victim.quality < self.discard_quality_below {
                debug!(
                    "Dropping negatively-rated victim instead of demoting: {}",
                    victim.fingerprint
                );
                self.stats.discards += 1;
            } else {
                debug!("Demoting to disk tier: {}", victim.fingerprint);
                self.disk.set(victim);
                self.stats.demotions += 1;
            }
        }
    }
}

impl StorageBackend for HybridBackend {
    fn get(&mut self, key: &str) -> Option<CacheItem> {
        if let Some(item) = self.memory.get(key) {
            return Some(item);
        }

        // Disk hit: move the item into the hot tier
        let mut item = self.disk.peek(key)?;
        self.disk.delete(key);
        item.mark_accessed();
        let result = item.clone();
        self.set_in_memory(item);
        self.stats.promotions += 1;
        debug!("Promoted from disk tier: {}", key);
        Some(result)
    }

    fn peek(&self, key: &str) -> Option<CacheItem> {
        self.memory.peek(key).or_else(|| self.disk.peek(key))
    }

    fn set(&mut self, item: CacheItem) {
        // A fingerprint lives in one tier only; an overwrite landing in
        // memory must not leave a stale twin on disk
        if self.disk.contains(&item.fingerprint) {
            self.disk.delete(&item.fingerprint);
        }
        self.set_in_memory(item);
    }

    fn delete(&mut self, key: &str) -> bool {
        let in_memory = self.memory.delete(key);
        let on_disk = self.disk.delete(key);
        in_memory || on_disk
    }

    fn adjust_quality(&mut self, key: &str, delta: i64) -> bool {
        self.memory.adjust_quality(key, delta) || self.disk.adjust_quality(key, delta)
    }

    fn clear(&mut self) {
        self.memory.clear();
        self.disk.clear();
    }

    fn flush(&mut self) -> Result<()> {
        self.disk.flush()
    }

    fn len(&self) -> usize {
        self.memory.len() + self.disk.len()
    }

    fn contains(&self, key: &str) -> bool {
        self.memory.contains(key) || self.disk.contains(key)
    }

    fn items(&self) -> Vec<CacheItem> {
        let mut items = self.memory.items();
        items.extend(self.disk.items());
        items
    }

    fn stats(&self) -> BackendStats {
        let mut stats = self.stats.clone();
        stats.merge(&self.memory.stats());
        stats.merge(&self.disk.stats());
        stats
    }
}
