//! Durable cold-tier backend with a write-behind append log
//!
//! Mutations land in an in-memory mirror and are recorded as dirty; the dirty
//! set is persisted to a JSON-lines append log once it reaches `batch_size`
//! or when the flush loop fires, whichever comes first. Reads are served from
//! the mirror, so a write is visible immediately regardless of flush state.
//!
//! The log replays on construction to repopulate the tier after a restart:
//! `set` records carry the full item, `delete` records are tombstones, and
//! the last record for a key wins. The log is rewritten as a plain snapshot
//! once it grows well past capacity, and truncated on `clear`.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::backend::{BackendStats, StorageBackend};
use crate::error::Result;
use crate::item::CacheItem;

const LOG_FILE: &str = "cache.jsonl";

/// Append-log record: a full item state or a deletion tombstone
#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum LogRecord {
    Set { item: CacheItem },
    Delete { key: String },
}

/// Cold-tier storage: bounded, durable, batched
///
/// Eviction on overflow removes the lowest-`quality` item first, breaking
/// ties by oldest `last_accessed_at` - in the cold tier an entry's proven
/// worth outweighs how recently it was touched.
///
/// A failed append degrades the affected records to memory-only: state stays
/// in the mirror, the fault is counted, and nothing reaches the caller.
pub struct DiskBackend {
    log_path: PathBuf,
    items: HashMap<String, CacheItem>,

    /// Keys whose current state is not yet in the log
    dirty: HashSet<String>,

    /// Deletions not yet in the log
    tombstones: Vec<String>,

    max_items: usize,
    batch_size: usize,

    /// Log records written since the last compaction
    log_records: usize,

    stats: BackendStats,
}

impl DiskBackend {
    /// Open (or create) a disk tier under `dir`, replaying any existing log
    pub fn new(dir: impl AsRef<Path>, max_items: usize, batch_size: usize) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let mut backend = Self {
            log_path: dir.join(LOG_FILE),
            items: HashMap::new(),
            dirty: HashSet::new(),
            tombstones: Vec::new(),
            max_items,
            batch_size: batch_size.max(1),
            log_records: 0,
            stats: BackendStats::default(),
        };
        backend.load();
        Ok(backend)
    }

    /// Replay the append log into the mirror; unparsable lines are skipped
    fn load(&mut self) {
        let file = match File::open(&self.log_path) {
            Ok(file) => file,
            Err(_) => return, // no log yet
        };

        let mut replayed = 0usize;
        for line in BufReader::new(file).lines() {
            let line = match line {
                Ok(line) if !line.trim().is_empty() => line,
                Ok(_) => continue,
                Err(e) => {
                    warn!("Stopping cache log replay on read error: {}", e);
                    self.stats.io_faults += 1;
                    break;
                }
            };
            match serde_json::from_str::<LogRecord>(&line) {
                Ok(LogRecord::Set { item }) => {
                    self.items.insert(item.fingerprint.clone(), item);
                }
                Ok(LogRecord::Delete { key }) => {
                    self.items.remove(&key);
                }
                Err(e) => {
                    warn!("Skipping corrupt cache log record: {}", e);
                    self.stats.io_faults += 1;
                }
            }
            replayed += 1;
        }
        self.log_records = replayed;

        // Capacity may have shrunk between runs
        while self.items.len() > self.max_items {
            self.evict_one();
        }

        info!(
            "Disk tier loaded {} items from {:?} ({} log records)",
            self.items.len(),
            self.log_path,
            replayed
        );
    }

    fn evict_one(&mut self) {
        let victim = self
            .items
            .values()
            .min_by(|a, b| {
                a.quality
                    .cmp(&b.quality)
                    .then(a.last_accessed_at.cmp(&b.last_accessed_at))
            })
            .map(|item| item.fingerprint.clone());

        if let Some(key) = victim {
            self.items.remove(&key);
            self.dirty.remove(&key);
            self.tombstones.push(key.clone());
            self.stats.evictions += 1;
            debug!("Disk tier full, evicting: {}", key);
        }
    }

    fn pending_ops(&self) -> usize {
        self.dirty.len() + self.tombstones.len()
    }

    /// Auto-flush for the write path; failures degrade rather than propagate
    fn flush_absorbing(&mut self) {
        if let Err(e) = self.flush() {
            warn!("Disk tier flush failed, keeping items in memory: {}", e);
        }
    }

    /// Serialize pending operations and append them to the log
    fn append_pending(&mut self) -> Result<()> {
        let mut lines = String::new();
        let mut count = 0usize;

        for key in self.tombstones.iter() {
            let record = LogRecord::Delete { key: key.clone() };
            lines.push_str(&serde_json::to_string(&record)?);
            lines.push('\n');
            count += 1;
        }
        for key in self.dirty.iter() {
            if let Some(item) = self.items.get(key) {
                let record = LogRecord::Set { item: item.clone() };
                lines.push_str(&serde_json::to_string(&record)?);
                lines.push('\n');
                count += 1;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        file.write_all(lines.as_bytes())?;
        file.sync_data()?;

        self.log_records += count;
        self.dirty.clear();
        self.tombstones.clear();
        debug!("Disk tier flushed {} records", count);
        Ok(())
    }

    /// Rewrite the log as a plain snapshot of the mirror
    fn compact(&mut self) -> Result<()> {
        let tmp_path = self.log_path.with_extension("jsonl.tmp");
        let mut lines = String::new();
        for item in self.items.values() {
            let record = LogRecord::Set { item: item.clone() };
            lines.push_str(&serde_json::to_string(&record)?);
            lines.push('\n');
        }
        fs::write(&tmp_path, lines)?;
        fs::rename(&tmp_path, &self.log_path)?;

        self.log_records = self.items.len();
        info!("Disk tier compacted log to {} records", self.log_records);
        Ok(())
    }

    fn should_compact(&self) -> bool {
        self.log_records > (self.max_items * 4).max(1024)
    }
}

impl StorageBackend for DiskBackend {
    fn get(&mut self, key: &str) -> Option<CacheItem> {
        let item = self.items.get_mut(key)?;
        item.mark_accessed();
        self.dirty.insert(key.to_string());
        Some(item.clone())
    }

    fn peek(&self, key: &str) -> Option<CacheItem> {
        self.items.get(key).cloned()
    }

    fn set(&mut self, item: CacheItem) {
        if !self.items.contains_key(&item.fingerprint) && self.items.len() >= self.max_items {
            self.evict_one();
        }
        self.dirty.insert(item.fingerprint.clone());
        self.items.insert(item.fingerprint.clone(), item);

        if self.pending_ops() >= self.batch_size {
            self.flush_absorbing();
        }
    }

    fn delete(&mut self, key: &str) -> bool {
        if self.items.remove(key).is_none() {
            return false;
        }
        self.dirty.remove(key);
        self.tombstones.push(key.to_string());

        if self.pending_ops() >= self.batch_size {
            self.flush_absorbing();
        }
        true
    }

    fn adjust_quality(&mut self, key: &str, delta: i64) -> bool {
        match self.items.get_mut(key) {
            Some(item) => {
                item.adjust_quality(delta);
                self.dirty.insert(key.to_string());
                true
            }
            None => false,
        }
    }

    fn clear(&mut self) {
        let count = self.items.len();
        self.items.clear();
        self.dirty.clear();
        self.tombstones.clear();
        self.log_records = 0;

        if let Err(e) = fs::write(&self.log_path, b"") {
            warn!("Failed to truncate cache log: {}", e);
            self.stats.io_faults += 1;
        }
        info!("Disk tier cleared {} items", count);
    }

    fn flush(&mut self) -> Result<()> {
        if self.pending_ops() > 0 {
            if let Err(e) = self.append_pending() {
                self.stats.io_faults += 1;
                return Err(e);
            }
        }
        if self.should_compact() {
            if let Err(e) = self.compact() {
                self.stats.io_faults += 1;
                return Err(e);
            }
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_set_get_before_flush() {
        let tmp = TempDir::new().unwrap();
        let mut backend = DiskBackend::new(tmp.path(), 100, 50).unwrap();

        backend.set(CacheItem::new("k1", json!("v1")));

        // Read-your-writes: visible before anything hits the log
        assert_eq!(backend.get("k1").unwrap().value, json!("v1"));
        assert_eq!(fs::metadata(tmp.path().join(LOG_FILE)).map(|m| m.len()).unwrap_or(0), 0);
    }

    #[test]
    fn test_flush_and_reload() {
        let tmp = TempDir::new().unwrap();
        {
            let mut backend = DiskBackend::new(tmp.path(), 100, 50).unwrap();
            let mut item = CacheItem::new("k1", json!({"answer": "42"}));
            item.metadata.insert("query".to_string(), json!("what?"));
            backend.set(item);
            backend.adjust_quality("k1", 2);
            backend.set(CacheItem::new("k2", json!("v2")));
            backend.flush().unwrap();
        }

        let mut reloaded = DiskBackend::new(tmp.path(), 100, 50).unwrap();
        assert_eq!(reloaded.len(), 2);

        let item = reloaded.get("k1").unwrap();
        assert_eq!(item.value, json!({"answer": "42"}));
        assert_eq!(item.quality, 2);
        assert_eq!(item.source_query(), Some("what?"));
    }

    #[test]
    fn test_unflushed_writes_are_lost_on_reload() {
        let tmp = TempDir::new().unwrap();
        {
            let mut backend = DiskBackend::new(tmp.path(), 100, 50).unwrap();
            backend.set(CacheItem::new("flushed", json!(1)));
            backend.flush().unwrap();
            backend.set(CacheItem::new("buffered", json!(2)));
            // dropped without flush
        }

        let reloaded = DiskBackend::new(tmp.path(), 100, 50).unwrap();
        assert!(reloaded.contains("flushed"));
        assert!(!reloaded.contains("buffered"));
    }

    #[test]
    fn test_batch_size_triggers_flush() {
        let tmp = TempDir::new().unwrap();
        {
            let mut backend = DiskBackend::new(tmp.path(), 100, 2).unwrap();
            backend.set(CacheItem::new("k1", json!(1)));
            backend.set(CacheItem::new("k2", json!(2)));
            // batch_size reached: persisted without an explicit flush
        }

        let reloaded = DiskBackend::new(tmp.path(), 100, 2).unwrap();
        assert_eq!(reloaded.len(), 2);
    }

    #[test]
    fn test_delete_tombstone_survives_reload() {
        let tmp = TempDir::new().unwrap();
        {
            let mut backend = DiskBackend::new(tmp.path(), 100, 50).unwrap();
            backend.set(CacheItem::new("k1", json!(1)));
            backend.flush().unwrap();
            assert!(backend.delete("k1"));
            backend.flush().unwrap();
        }

        let reloaded = DiskBackend::new(tmp.path(), 100, 50).unwrap();
        assert!(!reloaded.contains("k1"));
        assert!(reloaded.is_empty());
    }

    #[test]
    fn test_quality_first_eviction() {
        let tmp = TempDir::new().unwrap();
        let mut backend = DiskBackend::new(tmp.path(), 2, 50).unwrap();

        let mut liked = CacheItem::new("liked", json!(1));
        liked.quality = 3;
        let mut disliked = CacheItem::new("disliked", json!(2));
        disliked.quality = -2;

        backend.set(liked);
        backend.set(disliked);
        backend.set(CacheItem::new("new", json!(3)));

        // Lowest quality goes first even though it is the more recent insert
        assert!(!backend.contains("disliked"));
        assert!(backend.contains("liked"));
        assert!(backend.contains("new"));
    }

    #[test]
    fn test_clear_truncates_log() {
        let tmp = TempDir::new().unwrap();
        {
            let mut backend = DiskBackend::new(tmp.path(), 100, 50).unwrap();
            backend.set(CacheItem::new("k1", json!(1)));
            backend.flush().unwrap();
            backend.clear();
        }

        let reloaded = DiskBackend::new(tmp.path(), 100, 50).unwrap();
        assert!(reloaded.is_empty());
    }

    #[test]
    fn test_corrupt_log_lines_are_skipped() {
        let tmp = TempDir::new().unwrap();
        {
            let mut backend = DiskBackend::new(tmp.path(), 100, 50).unwrap();
            backend.set(CacheItem::new("good", json!(1)));
            backend.flush().unwrap();
        }

        let log_path = tmp.path().join(LOG_FILE);
        let mut content = fs::read_to_string(&log_path).unwrap();
        content.push_str("not json at all\n");
        fs::write(&log_path, content).unwrap();

        let reloaded = DiskBackend::new(tmp.path(), 100, 50).unwrap();
        assert!(reloaded.contains("good"));
        assert_eq!(reloaded.stats().io_faults, 1);
    }

    #[test]
    fn test_compaction_rewrites_log() {
        let tmp = TempDir::new().unwrap();
        let mut backend = DiskBackend::new(tmp.path(), 10, 1).unwrap();

        // Overwrite one key far past the compaction threshold
        for i in 0..1100 {
            backend.set(CacheItem::new("k", json!(i)));
        }
        backend.flush().unwrap();
        backend.flush().unwrap(); // compaction pass once threshold crossed

        let reloaded = DiskBackend::new(tmp.path(), 10, 1).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.peek("k").unwrap().value, json!(1099));
    }
}
