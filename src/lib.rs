//! # GraphRAG Cache (graphrag-cache)
//!
//! A query-result cache for LLM-backed retrieval pipelines, serving repeat
//! requests by exact fingerprint match or by embedding similarity so that
//! expensive retrieval and generation work is not repeated.
//!
//! ## Features
//!
//! - **Pluggable fingerprints**: simple, global, context-aware and
//!   context-and-keyword-aware key strategies over SHA-256
//! - **Tiered storage**: bounded memory tier with LRU eviction in front of a
//!   durable disk tier with write-behind batching
//! - **Semantic hits**: a bounded in-memory vector index answers
//!   paraphrased queries above a cosine-similarity threshold
//! - **Quality feedback**: per-entry feedback biases eviction, write-back
//!   demotion, and quality-gated fast retrieval
//! - **Graceful degradation**: disk and embedding faults are absorbed as
//!   misses and surfaced through metrics, never through the caller
//! - **Async-first**: tokio throughout, with a background flush task for the
//!   disk tier's write-behind buffer
//!
//! ## Example
//!
//! ```rust
//! use graphrag_cache::{CacheConfig, CacheManager};
//! use serde_json::json;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let cache = CacheManager::new(CacheConfig::memory_only())?;
//!
//! cache
//!     .set("什么是Python?", json!("Python是一种高级编程语言"), None, None)
//!     .await;
//!
//! if let Some(answer) = cache.get("什么是Python?", None, false).await {
//!     println!("Cache hit: {}", answer);
//! }
//!
//! println!("{}", cache.get_metrics().await);
//! # Ok(())
//! # }
//! ```
//!
//! ## Persistent two-tier cache
//!
//! ```no_run
//! use graphrag_cache::{manager::run_flush_loop, CacheConfig, CacheManager};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = CacheConfig::persistent("./cache-data");
//! let cache = Arc::new(CacheManager::new(config)?);
//!
//! // Periodically persist the write-behind buffer
//! tokio::spawn(run_flush_loop(cache.clone()));
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod embedding;
pub mod error;
pub mod item;
pub mod manager;
pub mod metrics;
pub mod strategy;
pub mod vector;

// Re-export main types for convenience
pub use backend::{
    BackendStats, DiskBackend, HybridBackend, MemoryBackend, StorageBackend, ThreadSafeBackend,
};
pub use config::{CacheConfig, CacheConfigBuilder, KeyStrategyKind};
pub use embedding::EmbeddingProvider;
pub use error::{CacheError, Result};
pub use item::CacheItem;
pub use manager::{run_flush_loop, AnswerValidator, CacheManager};
pub use metrics::CacheMetrics;
pub use strategy::{
    CacheKeyStrategy, ContextAndKeywordAwareKeyStrategy, ContextAwareKeyStrategy,
    GlobalKeyStrategy, QueryContext, SimpleKeyStrategy,
};
pub use vector::VectorIndex;
