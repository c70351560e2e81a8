//! Cache manager facade
//!
//! Composes a key strategy, a storage backend and an optional vector index
//! behind one handle. Storage and index always mutate together under a single
//! write lock, so a lookup never observes a half-written pair.
//!
//! Distinct managers share nothing; a shared cache is one manager handle
//! constructed at startup and passed around explicitly.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::backend::{
    BackendStats, DiskBackend, HybridBackend, MemoryBackend, StorageBackend, ThreadSafeBackend,
};
use crate::config::{CacheConfig, KeyStrategyKind};
use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::item::CacheItem;
use crate::metrics::CacheMetrics;
use crate::strategy::{
    CacheKeyStrategy, ContextAndKeywordAwareKeyStrategy, ContextAwareKeyStrategy,
    GlobalKeyStrategy, QueryContext, SimpleKeyStrategy,
};
use crate::vector::VectorIndex;

/// Caller-supplied answer validation predicate: `(query, answer) -> bool`
pub type AnswerValidator = dyn Fn(&str, &str) -> bool + Send + Sync;

/// Markers whose presence fails the default answer heuristic
const FAILURE_MARKERS: &[&str] = &[
    "i don't know",
    "i do not know",
    "no relevant information",
    "unable to answer",
    "抱歉",
    "无法回答",
    "没有找到相关信息",
];

/// Everything that must mutate atomically lives under one lock
struct ManagerState {
    storage: Box<dyn StorageBackend>,
    vectors: Option<VectorIndex>,
    metrics: CacheMetrics,

    /// Backend counters as of the last metrics reset
    stats_baseline: BackendStats,
}

/// The cache facade: get/set/delete/mark_quality/validate/flush/metrics
pub struct CacheManager {
    config: CacheConfig,
    strategy: Box<dyn CacheKeyStrategy>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    state: Arc<RwLock<ManagerState>>,
}

impl CacheManager {
    /// Build a cache without similarity matching
    pub fn new(config: CacheConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Build a cache that answers semantically-close queries via `embedder`
    pub fn with_embedder(config: CacheConfig, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        Self::build(config, Some(embedder))
    }

    fn build(config: CacheConfig, embedder: Option<Arc<dyn EmbeddingProvider>>) -> Result<Self> {
        config.validate()?;
        info!("Initializing cache manager: {:?}", config);

        let strategy: Box<dyn CacheKeyStrategy> = match config.key_strategy {
            KeyStrategyKind::Simple => Box::new(SimpleKeyStrategy),
            KeyStrategyKind::Global => Box::new(GlobalKeyStrategy),
            KeyStrategyKind::ContextAware => {
                Box::new(ContextAwareKeyStrategy::new(config.context_window))
            }
            KeyStrategyKind::ContextAndKeywordAware => {
                Box::new(ContextAndKeywordAwareKeyStrategy::new(config.context_window))
            }
        };

        // validate() guarantees a disk path whenever memory_only is off
        let disk_dir = config.disk_path.as_ref().filter(|_| !config.memory_only);
        let mut storage: Box<dyn StorageBackend> = match disk_dir {
            None => Box::new(MemoryBackend::new(config.max_memory_size)),
            Some(dir) => {
                let memory = MemoryBackend::new(config.max_memory_size);
                let disk = DiskBackend::new(dir, config.max_disk_size, config.batch_size)?;
                Box::new(HybridBackend::new(memory, disk))
            }
        };
        if config.thread_safe {
            storage = Box::new(ThreadSafeBackend::new(storage));
        }

        let mut metrics = CacheMetrics::default();
        let vectors = if config.enable_vector_similarity {
            if embedder.is_none() {
                warn!("Vector similarity enabled without an embedding provider; exact-only lookups");
            }
            let mut index = VectorIndex::new(config.max_vectors);
            if let Some(provider) = embedder.as_deref() {
                rebuild_index(&mut index, storage.as_ref(), provider, &mut metrics);
            }
            Some(index)
        } else {
            None
        };

        let state = ManagerState {
            storage,
            vectors,
            metrics,
            stats_baseline: BackendStats::default(),
        };

        Ok(Self {
            config,
            strategy,
            embedder,
            state: Arc::new(RwLock::new(state)),
        })
    }

    /// Look up a cached answer
    ///
    /// Exact fingerprint match first; on a miss with similarity enabled, the
    /// closest indexed query within the similarity threshold answers instead.
    /// Unless `skip_validation` is set, a hit must also pass the default
    /// answer heuristic - a rejected hit is reported as a miss and the entry
    /// is left in place. Storage or embedding faults degrade to a miss; this
    /// call never fails.
    pub async fn get(
        &self,
        query: &str,
        context: Option<&QueryContext>,
        skip_validation: bool,
    ) -> Option<Value> {
        self.lookup(query, context, skip_validation, false).await
    }

    /// Like [`get`](Self::get), but only returns answers with non-negative
    /// quality - confirmed-good or unrated entries, never downvoted ones
    pub async fn get_fast(&self, query: &str, context: Option<&QueryContext>) -> Option<Value> {
        self.lookup(query, context, false, true).await
    }

    async fn lookup(
        &self,
        query: &str,
        context: Option<&QueryContext>,
        skip_validation: bool,
        trusted_only: bool,
    ) -> Option<Value> {
        let key = self.strategy.compute_key(query, context);
        let mut state = self.state.write().await;
        state.metrics.total_queries += 1;

        if let Some(item) = state.storage.get(&key) {
            if self.accepts(&item, skip_validation, trusted_only) {
                debug!("Exact cache hit: {}", key);
                state.metrics.exact_hits += 1;
                return Some(item.value);
            }
            debug!("Exact hit rejected by validation/quality gate: {}", key);
            state.metrics.misses += 1;
            return None;
        }

        if let Some(item) = self.similarity_candidate(&mut state, query) {
            if self.accepts(&item, skip_validation, trusted_only) {
                state.metrics.vector_hits += 1;
                return Some(item.value);
            }
            debug!(
                "Vector hit rejected by validation/quality gate: {}",
                item.fingerprint
            );
            state.metrics.misses += 1;
            return None;
        }

        debug!("Cache miss: {}", key);
        state.metrics.misses += 1;
        None
    }

    /// Resolve a semantic match, dropping stale index entries along the way
    fn similarity_candidate(&self, state: &mut ManagerState, query: &str) -> Option<CacheItem> {
        let embedder = self.embedder.as_deref()?;
        let (candidate, score) = {
            let vectors = state.vectors.as_ref()?;
            if vectors.is_empty() {
                return None;
            }
            let embedding = match embedder.embed(query) {
                Ok(embedding) => embedding,
                Err(e) => {
                    warn!("Embedding failed, similarity unavailable for this call: {}", e);
                    state.metrics.embedding_faults += 1;
                    return None;
                }
            };
            vectors.search(&embedding, 1).into_iter().next()?
        };

        if score < self.config.similarity_threshold {
            debug!(
                "Best similarity {:.4} below threshold {:.4}",
                score, self.config.similarity_threshold
            );
            return None;
        }

        match state.storage.get(&candidate) {
            Some(item) => {
                debug!("Vector cache hit: {} (score {:.4})", candidate, score);
                Some(item)
            }
            None => {
                // The item was evicted underneath the index; a stale match
                // is a miss, and the dangling embedding goes with it
                if let Some(vectors) = state.vectors.as_mut() {
                    vectors.remove(&candidate);
                }
                None
            }
        }
    }

    fn accepts(&self, item: &CacheItem, skip_validation: bool, trusted_only: bool) -> bool {
        if trusted_only && !item.is_trusted() {
            return false;
        }
        if skip_validation {
            return true;
        }
        match item.value.as_str() {
            Some(answer) => self.default_validate(answer),
            None => true, // non-text payloads are not the heuristic's business
        }
    }

    /// Store an answer, replacing any previous entry for the same fingerprint
    ///
    /// An overwrite starts over: fresh timestamps, zero access count, neutral
    /// quality. The originating query text is recorded in the item metadata
    /// so the embedding index can be rebuilt after a restart.
    pub async fn set(
        &self,
        query: &str,
        value: Value,
        context: Option<&QueryContext>,
        metadata: Option<HashMap<String, Value>>,
    ) {
        let key = self.strategy.compute_key(query, context);
        let mut metadata = metadata.unwrap_or_default();
        metadata
            .entry("query".to_string())
            .or_insert_with(|| json!(query));
        let item = CacheItem::with_metadata(key.clone(), value, metadata);

        let mut state = self.state.write().await;
        state.metrics.sets += 1;
        state.storage.set(item);
        debug!("Cached answer under {}", key);

        if state.vectors.is_none() {
            return;
        }
        let Some(embedder) = self.embedder.as_deref() else {
            return;
        };
        let embedding = match embedder.embed(query) {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!("Embedding failed, entry will be exact-match only: {}", e);
                state.metrics.embedding_faults += 1;
                return;
            }
        };
        let evicted = match state.vectors.as_mut() {
            Some(vectors) => match vectors.insert(key, embedding) {
                Ok(evicted) => evicted,
                Err(e) => {
                    warn!("Vector index rejected embedding: {}", e);
                    state.metrics.embedding_faults += 1;
                    return;
                }
            },
            None => return,
        };
        // Index capacity evictions take their storage items with them,
        // keeping the two structures in lockstep
        for stale in evicted {
            state.storage.delete(&stale);
        }
    }

    /// Remove a cached answer; returns whether one existed
    pub async fn delete(&self, query: &str, context: Option<&QueryContext>) -> bool {
        let key = self.strategy.compute_key(query, context);
        let mut state = self.state.write().await;

        let existed = state.storage.delete(&key);
        if let Some(vectors) = state.vectors.as_mut() {
            vectors.remove(&key);
        }
        if existed {
            debug!("Deleted cache entry: {}", key);
        }
        existed
    }

    /// Record quality feedback against the exact fingerprint only
    ///
    /// No similarity fallback here: feedback must land on the specific entry
    /// it was given for. Returns false when no such entry exists.
    pub async fn mark_quality(
        &self,
        query: &str,
        is_positive: bool,
        context: Option<&QueryContext>,
    ) -> bool {
        let key = self.strategy.compute_key(query, context);
        let delta = if is_positive { 1 } else { -1 };

        let mut state = self.state.write().await;
        let found = state.storage.adjust_quality(&key, delta);
        if found {
            debug!("Quality {} for {}", if is_positive { "+1" } else { "-1" }, key);
        }
        found
    }

    /// Decide whether an answer is fit to cache or serve
    ///
    /// Runs the caller's predicate if one is supplied, otherwise the default
    /// heuristic (minimum length, no failure markers). Mutates nothing.
    pub fn validate_answer(
        &self,
        query: &str,
        answer: &str,
        validator: Option<&AnswerValidator>,
    ) -> bool {
        match validator {
            Some(validator) => validator(query, answer),
            None => self.default_validate(answer),
        }
    }

    fn default_validate(&self, answer: &str) -> bool {
        let trimmed = answer.trim();
        if trimmed.chars().count() < self.config.min_answer_length {
            return false;
        }
        let lowered = trimmed.to_lowercase();
        !FAILURE_MARKERS.iter().any(|marker| lowered.contains(marker))
    }

    /// Empty the cache and the embedding index
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.storage.clear();
        if let Some(vectors) = state.vectors.as_mut() {
            vectors.clear();
        }
        info!("Cache cleared");
    }

    /// Force the durable write path to complete now
    pub async fn flush(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.storage.flush()
    }

    /// Snapshot of cumulative counters since construction or the last reset
    pub async fn get_metrics(&self) -> CacheMetrics {
        let state = self.state.read().await;
        let mut snapshot = state.metrics.clone();

        let backend = state.storage.stats().since(&state.stats_baseline);
        snapshot.evictions += backend.evictions;
        snapshot.promotions += backend.promotions;
        snapshot.demotions += backend.demotions;
        snapshot.discards += backend.discards;
        snapshot.io_faults += backend.io_faults;
        snapshot
    }

    /// Zero all counters
    pub async fn reset_metrics(&self) {
        let mut state = self.state.write().await;
        state.metrics.reset();
        state.stats_baseline = state.storage.stats();
    }

    /// Number of live items across all tiers
    pub async fn len(&self) -> usize {
        self.state.read().await.storage.len()
    }

    /// Whether the cache holds no items
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// The active configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}

/// Re-embed persisted items into a fresh index after a restart
///
/// Only the newest `max_vectors` items are indexed; older ones stay reachable
/// by exact fingerprint. Embedding failures skip the item and are counted.
fn rebuild_index(
    index: &mut VectorIndex,
    storage: &dyn StorageBackend,
    embedder: &dyn EmbeddingProvider,
    metrics: &mut CacheMetrics,
) {
    let mut items = storage.items();
    if items.is_empty() {
        return;
    }
    items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    let start = items.len().saturating_sub(index.max_vectors());

    let mut indexed = 0usize;
    for item in &items[start..] {
        let Some(query) = item.source_query() else {
            continue;
        };
        match embedder.embed(query) {
            Ok(embedding) => {
                if index.insert(item.fingerprint.clone(), embedding).is_ok() {
                    indexed += 1;
                }
            }
            Err(e) => {
                warn!("Skipping index rebuild for {}: {}", item.fingerprint, e);
                metrics.embedding_faults += 1;
            }
        }
    }
    info!("Rebuilt vector index with {} of {} stored items", indexed, items.len());
}

/// Periodic flush task for the disk tier's write-behind buffer
///
/// Spawn this once per persistent manager; it acquires the same lock as
/// foreground operations and holds it only for the duration of one flush.
pub async fn run_flush_loop(manager: Arc<CacheManager>) {
    let interval = manager.config().flush_interval;
    info!("Starting background cache flush task (interval: {:?})", interval);

    loop {
        tokio::time::sleep(interval).await;
        if let Err(e) = manager.flush().await {
            warn!("Periodic cache flush failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;

    /// Embedder returning canned vectors keyed by exact text
    struct StaticEmbedder {
        table: HashMap<String, Vec<f32>>,
    }

    impl StaticEmbedder {
        fn new(entries: &[(&str, Vec<f32>)]) -> Arc<Self> {
            Arc::new(Self {
                table: entries
                    .iter()
                    .map(|(text, v)| (text.to_string(), v.clone()))
                    .collect(),
            })
        }
    }

    impl EmbeddingProvider for StaticEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.table
                .get(text)
                .cloned()
                .ok_or_else(|| CacheError::Embedding(format!("no embedding for: {text}")))
        }

        fn dimension(&self) -> usize {
            3
        }
    }

    fn memory_manager() -> CacheManager {
        CacheManager::new(CacheConfig::memory_only()).unwrap()
    }

    #[tokio::test]
    async fn test_set_then_get_roundtrip() {
        let cache = memory_manager();

        cache
            .set("什么是Python?", json!("Python是一种高级编程语言"), None, None)
            .await;

        let value = cache.get("什么是Python?", None, false).await;
        assert_eq!(value, Some(json!("Python是一种高级编程语言")));
    }

    #[tokio::test]
    async fn test_miss_before_set() {
        let cache = memory_manager();
        assert!(cache.get("never seen", None, false).await.is_none());

        let metrics = cache.get_metrics().await;
        assert_eq!(metrics.misses, 1);
        assert_eq!(metrics.total_queries, 1);
    }

    #[tokio::test]
    async fn test_overwrite_resets_quality() {
        let cache = memory_manager();

        cache.set("q", json!("first answer here"), None, None).await;
        cache.mark_quality("q", true, None).await;
        cache.set("q", json!("second answer here"), None, None).await;

        assert_eq!(
            cache.get("q", None, false).await,
            Some(json!("second answer here"))
        );
        // Fresh entry is neutral again: a single downvote takes it below zero
        assert!(cache.mark_quality("q", false, None).await);
        assert!(cache.get_fast("q", None).await.is_none());
    }

    #[tokio::test]
    async fn test_get_fast_excludes_downvoted() {
        let cache = memory_manager();
        cache.set("q", json!("a perfectly fine answer"), None, None).await;

        cache.mark_quality("q", false, None).await;
        cache.mark_quality("q", false, None).await;

        assert!(cache.get_fast("q", None).await.is_none());
        assert!(cache.get("q", None, false).await.is_some());
    }

    #[tokio::test]
    async fn test_mark_quality_missing_entry() {
        let cache = memory_manager();
        assert!(!cache.mark_quality("absent", true, None).await);
    }

    #[tokio::test]
    async fn test_delete() {
        let cache = memory_manager();
        cache.set("q", json!("some cached answer"), None, None).await;

        assert!(cache.delete("q", None).await);
        assert!(!cache.delete("q", None).await);
        assert!(cache.get("q", None, false).await.is_none());
    }

    #[tokio::test]
    async fn test_validation_gates_short_answers() {
        let cache = memory_manager();
        cache.set("q", json!("tiny"), None, None).await;

        assert!(cache.get("q", None, false).await.is_none());
        assert_eq!(cache.get("q", None, true).await, Some(json!("tiny")));
    }

    #[tokio::test]
    async fn test_validation_gates_failure_markers() {
        let cache = memory_manager();
        cache
            .set("q", json!("抱歉，没有找到相关信息，无法回答这个问题"), None, None)
            .await;

        assert!(cache.get("q", None, false).await.is_none());
        assert!(cache.get("q", None, true).await.is_some());
    }

    #[tokio::test]
    async fn test_validate_answer_custom_predicate() {
        let cache = memory_manager();

        let strict = |_q: &str, a: &str| a.contains("graph");
        assert!(cache.validate_answer("q", "a graph-based answer", Some(&strict)));
        assert!(!cache.validate_answer("q", "a plain answer long enough", Some(&strict)));

        // Default heuristic
        assert!(cache.validate_answer("q", "a sufficiently long answer", None));
        assert!(!cache.validate_answer("q", "short", None));
        assert!(!cache.validate_answer("q", "I don't know anything about that topic", None));
    }

    #[tokio::test]
    async fn test_similarity_hit_and_threshold_miss() {
        let embedder = StaticEmbedder::new(&[
            ("什么是Python?", vec![1.0, 0.0, 0.0]),
            ("Python是什么?", vec![0.95, 0.05, 0.0]),
            ("什么是Rust?", vec![0.0, 1.0, 0.0]),
        ]);
        let config = CacheConfig::builder()
            .memory_only(true)
            .enable_vector_similarity(true)
            .similarity_threshold(0.8)
            .build();
        let cache = CacheManager::with_embedder(config, embedder).unwrap();

        cache
            .set("什么是Python?", json!("Python是一种编程语言"), None, None)
            .await;

        // Paraphrase above the threshold reuses the cached answer
        let hit = cache.get("Python是什么?", None, false).await;
        assert_eq!(hit, Some(json!("Python是一种编程语言")));

        // Unrelated query stays a miss
        assert!(cache.get("什么是Rust?", None, false).await.is_none());

        let metrics = cache.get_metrics().await;
        assert_eq!(metrics.vector_hits, 1);
        assert_eq!(metrics.misses, 1);
        assert_eq!(metrics.total_queries, 2);
    }

    #[tokio::test]
    async fn test_embedding_failure_degrades_to_exact_only() {
        let embedder = StaticEmbedder::new(&[("known", vec![1.0, 0.0, 0.0])]);
        let config = CacheConfig::builder()
            .memory_only(true)
            .enable_vector_similarity(true)
            .build();
        let cache = CacheManager::with_embedder(config, embedder).unwrap();

        cache.set("known", json!("a cached answer of note"), None, None).await;

        // The embedder has no vector for this query: similarity unavailable,
        // lookup degrades to an exact-only miss instead of failing
        assert!(cache.get("unknown paraphrase", None, false).await.is_none());

        let metrics = cache.get_metrics().await;
        assert_eq!(metrics.embedding_faults, 1);
        assert_eq!(metrics.misses, 1);
    }

    #[tokio::test]
    async fn test_stale_index_entry_is_a_miss() {
        let embedder = StaticEmbedder::new(&[
            ("q1", vec![1.0, 0.0, 0.0]),
            ("q1 paraphrased", vec![0.99, 0.01, 0.0]),
        ]);
        let config = CacheConfig::builder()
            .memory_only(true)
            .max_memory_size(1)
            .enable_vector_similarity(true)
            .build();
        let cache = CacheManager::with_embedder(config, embedder).unwrap();

        cache.set("q1", json!("the original answer text"), None, None).await;

        // Evict q1's item from storage behind the index's back
        {
            let mut state = cache.state.write().await;
            let key = cache.strategy.compute_key("q1", None);
            state.storage.delete(&key);
        }

        assert!(cache.get("q1 paraphrased", None, false).await.is_none());

        // The dangling embedding was dropped on detection
        let state = cache.state.read().await;
        assert!(state.vectors.as_ref().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_metrics_invariant_over_mixed_traffic() {
        let cache = memory_manager();
        cache.set("a", json!("answer number one here"), None, None).await;
        cache.set("b", json!("tiny"), None, None).await;

        cache.get("a", None, false).await; // exact hit
        cache.get("b", None, false).await; // validation-rejected: miss
        cache.get("c", None, false).await; // miss
        cache.get_fast("a", None).await; // exact hit
        cache.mark_quality("a", false, None).await;
        cache.mark_quality("a", false, None).await;
        cache.get_fast("a", None).await; // quality-rejected: miss

        let metrics = cache.get_metrics().await;
        assert_eq!(
            metrics.exact_hits + metrics.vector_hits + metrics.misses,
            metrics.total_queries
        );
        assert_eq!(metrics.total_queries, 5);
        assert_eq!(metrics.exact_hits, 2);
        assert_eq!(metrics.misses, 3);
        assert_eq!(metrics.sets, 2);
    }

    #[tokio::test]
    async fn test_context_aware_keys_isolate_sessions() {
        let config = CacheConfig::builder()
            .memory_only(true)
            .key_strategy(KeyStrategyKind::ContextAware)
            .build();
        let cache = CacheManager::new(config).unwrap();

        let session_a = QueryContext::for_session("session-a");
        let session_b = QueryContext::for_session("session-b");

        cache
            .set("q", json!("answer for session a"), Some(&session_a), None)
            .await;

        assert!(cache.get("q", Some(&session_a), false).await.is_some());
        assert!(cache.get("q", Some(&session_b), false).await.is_none());
    }

    #[tokio::test]
    async fn test_clear_empties_storage_and_index() {
        let embedder = StaticEmbedder::new(&[("q", vec![1.0, 0.0, 0.0])]);
        let config = CacheConfig::builder()
            .memory_only(true)
            .enable_vector_similarity(true)
            .build();
        let cache = CacheManager::with_embedder(config, embedder).unwrap();

        cache.set("q", json!("an answer worth keeping"), None, None).await;
        cache.clear().await;

        assert!(cache.is_empty().await);
        let state = cache.state.read().await;
        assert!(state.vectors.as_ref().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reset_metrics_zeroes_backend_counters_too() {
        let config = CacheConfig::builder()
            .memory_only(true)
            .max_memory_size(1)
            .build();
        let cache = CacheManager::new(config).unwrap();

        cache.set("a", json!("first answer text"), None, None).await;
        cache.set("b", json!("second answer text"), None, None).await; // evicts

        assert_eq!(cache.get_metrics().await.evictions, 1);
        cache.reset_metrics().await;
        assert_eq!(cache.get_metrics().await.evictions, 0);
    }

    #[tokio::test]
    async fn test_invalid_config_is_a_construction_error() {
        let mut config = CacheConfig::memory_only();
        config.similarity_threshold = 2.0;
        assert!(matches!(
            CacheManager::new(config),
            Err(CacheError::Config(_))
        ));
    }
}
