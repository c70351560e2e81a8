//! Cache performance metrics

use serde::{Deserialize, Serialize};
use std::fmt;

/// Cumulative counters for cache behavior, monotonic since construction or
/// the last reset
///
/// `exact_hits + vector_hits + misses == total_queries` holds for every
/// lookup, including lookups rejected by validation or by the quality gate
/// (both counted as misses).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheMetrics {
    /// Lookups satisfied by fingerprint equality
    pub exact_hits: u64,

    /// Lookups satisfied by embedding similarity
    pub vector_hits: u64,

    /// Lookups that returned nothing
    pub misses: u64,

    /// Total lookups (`get` and `get_fast`)
    pub total_queries: u64,

    /// Items written via `set`
    pub sets: u64,

    /// Items removed by capacity eviction across all tiers
    pub evictions: u64,

    /// Disk-tier items promoted into memory on access
    pub promotions: u64,

    /// Memory-tier victims written back to disk
    pub demotions: u64,

    /// Negatively-rated victims dropped instead of demoted
    pub discards: u64,

    /// Disk I/O failures absorbed as degraded operation
    pub io_faults: u64,

    /// Embedding provider failures absorbed as exact-only lookups
    pub embedding_faults: u64,
}

impl CacheMetrics {
    /// Hit rate as a percentage of all lookups
    pub fn hit_rate(&self) -> f64 {
        if self.total_queries == 0 {
            0.0
        } else {
            ((self.exact_hits + self.vector_hits) as f64 / self.total_queries as f64) * 100.0
        }
    }

    /// Share of hits answered by similarity rather than exact match
    pub fn vector_hit_share(&self) -> f64 {
        let hits = self.exact_hits + self.vector_hits;
        if hits == 0 {
            0.0
        } else {
            (self.vector_hits as f64 / hits as f64) * 100.0
        }
    }

    /// Zero all counters
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl fmt::Display for CacheMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheMetrics {{ queries: {}, exact: {}, vector: {}, misses: {}, hit_rate: {:.2}%, evictions: {}, faults: {} }}",
            self.total_queries,
            self.exact_hits,
            self.vector_hits,
            self.misses,
            self.hit_rate(),
            self.evictions,
            self.io_faults + self.embedding_faults
        )
    }
}
