//! Configuration for the cache

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{CacheError, Result};

/// Which fingerprint strategy the manager uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategyKind {
    /// Query text alone
    #[default]
    Simple,

    /// Query plus recent conversation turns for the session
    ContextAware,

    /// Context plus canonicalized keyword tags
    ContextAndKeywordAware,

    /// Normalized query, shared across all sessions
    Global,
}

impl std::str::FromStr for KeyStrategyKind {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "simple" => Ok(Self::Simple),
            "context_aware" => Ok(Self::ContextAware),
            "context_and_keyword_aware" => Ok(Self::ContextAndKeywordAware),
            "global" => Ok(Self::Global),
            other => Err(CacheError::Config(format!(
                "unknown key strategy: {other}"
            ))),
        }
    }
}

/// Cache configuration
///
/// Validated once at construction; an invalid configuration is the only
/// error a caller ever sees from building a cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Fingerprint strategy
    pub key_strategy: KeyStrategyKind,

    /// Conversation turns participating in context-aware keys
    pub context_window: usize,

    /// Skip the disk tier entirely
    pub memory_only: bool,

    /// Hot-tier capacity in items
    pub max_memory_size: usize,

    /// Cold-tier capacity in items
    pub max_disk_size: usize,

    /// Directory for the cold tier's append log; required unless memory_only
    pub disk_path: Option<PathBuf>,

    /// Wrap the backend in a mutual-exclusion guard
    pub thread_safe: bool,

    /// Try embedding-similarity matching on exact misses
    pub enable_vector_similarity: bool,

    /// Minimum cosine similarity for a semantic hit
    pub similarity_threshold: f32,

    /// Embedding index capacity
    pub max_vectors: usize,

    /// Pending disk records that force a flush
    pub batch_size: usize,

    /// Interval for the background flush loop
    pub flush_interval: Duration,

    /// Minimum trimmed answer length accepted by the default validator
    pub min_answer_length: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key_strategy: KeyStrategyKind::Simple,
            context_window: 3,
            memory_only: false,
            max_memory_size: 200,
            max_disk_size: 5000,
            disk_path: None,
            thread_safe: true,
            enable_vector_similarity: false,
            similarity_threshold: 0.8,
            max_vectors: 1000,
            batch_size: 32,
            flush_interval: Duration::from_secs(60),
            min_answer_length: 10,
        }
    }
}

impl CacheConfig {
    /// Create a new builder
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Hot-tier-only preset: nothing ever touches disk
    pub fn memory_only() -> Self {
        Self {
            memory_only: true,
            ..Default::default()
        }
    }

    /// Two-tier preset persisting under `path`
    pub fn persistent(path: impl Into<PathBuf>) -> Self {
        Self {
            disk_path: Some(path.into()),
            ..Default::default()
        }
    }

    /// Read configuration from `GRAPHRAG_CACHE_*` environment variables,
    /// loading a `.env` file if one is present
    ///
    /// Unset variables keep their defaults; set-but-unparsable ones are a
    /// configuration error.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = Self::default();
        if let Some(value) = env_var("GRAPHRAG_CACHE_KEY_STRATEGY") {
            config.key_strategy = value.parse()?;
        }
        if let Some(value) = env_var("GRAPHRAG_CACHE_CONTEXT_WINDOW") {
            config.context_window = parse_env("GRAPHRAG_CACHE_CONTEXT_WINDOW", &value)?;
        }
        if let Some(value) = env_var("GRAPHRAG_CACHE_MEMORY_ONLY") {
            config.memory_only = parse_env("GRAPHRAG_CACHE_MEMORY_ONLY", &value)?;
        }
        if let Some(value) = env_var("GRAPHRAG_CACHE_MAX_MEMORY_SIZE") {
            config.max_memory_size = parse_env("GRAPHRAG_CACHE_MAX_MEMORY_SIZE", &value)?;
        }
        if let Some(value) = env_var("GRAPHRAG_CACHE_MAX_DISK_SIZE") {
            config.max_disk_size = parse_env("GRAPHRAG_CACHE_MAX_DISK_SIZE", &value)?;
        }
        if let Some(value) = env_var("GRAPHRAG_CACHE_DISK_PATH") {
            config.disk_path = Some(PathBuf::from(value));
        }
        if let Some(value) = env_var("GRAPHRAG_CACHE_THREAD_SAFE") {
            config.thread_safe = parse_env("GRAPHRAG_CACHE_THREAD_SAFE", &value)?;
        }
        if let Some(value) = env_var("GRAPHRAG_CACHE_ENABLE_VECTOR_SIMILARITY") {
            config.enable_vector_similarity =
                parse_env("GRAPHRAG_CACHE_ENABLE_VECTOR_SIMILARITY", &value)?;
        }
        if let Some(value) = env_var("GRAPHRAG_CACHE_SIMILARITY_THRESHOLD") {
            config.similarity_threshold = parse_env("GRAPHRAG_CACHE_SIMILARITY_THRESHOLD", &value)?;
        }
        if let Some(value) = env_var("GRAPHRAG_CACHE_MAX_VECTORS") {
            config.max_vectors = parse_env("GRAPHRAG_CACHE_MAX_VECTORS", &value)?;
        }
        if let Some(value) = env_var("GRAPHRAG_CACHE_BATCH_SIZE") {
            config.batch_size = parse_env("GRAPHRAG_CACHE_BATCH_SIZE", &value)?;
        }
        if let Some(value) = env_var("GRAPHRAG_CACHE_FLUSH_INTERVAL_SECS") {
            let secs: u64 = parse_env("GRAPHRAG_CACHE_FLUSH_INTERVAL_SECS", &value)?;
            config.flush_interval = Duration::from_secs(secs);
        }
        if let Some(value) = env_var("GRAPHRAG_CACHE_MIN_ANSWER_LENGTH") {
            config.min_answer_length = parse_env("GRAPHRAG_CACHE_MIN_ANSWER_LENGTH", &value)?;
        }
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_memory_size == 0 {
            return Err(CacheError::Config(
                "max_memory_size must be greater than 0".to_string(),
            ));
        }
        if !self.memory_only {
            if self.max_disk_size == 0 {
                return Err(CacheError::Config(
                    "max_disk_size must be greater than 0".to_string(),
                ));
            }
            if self.disk_path.is_none() {
                return Err(CacheError::Config(
                    "disk_path is required unless memory_only is set".to_string(),
                ));
            }
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(CacheError::Config(
                "similarity_threshold must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.enable_vector_similarity && self.max_vectors == 0 {
            return Err(CacheError::Config(
                "max_vectors must be greater than 0 when similarity is enabled".to_string(),
            ));
        }
        if self.context_window == 0 {
            return Err(CacheError::Config(
                "context_window must be greater than 0".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(CacheError::Config(
                "batch_size must be greater than 0".to_string(),
            ));
        }
        if self.flush_interval.is_zero() {
            return Err(CacheError::Config(
                "flush_interval must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| CacheError::Config(format!("invalid value for {name}: {value}")))
}

/// Builder for cache configuration
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    key_strategy: Option<KeyStrategyKind>,
    context_window: Option<usize>,
    memory_only: Option<bool>,
    max_memory_size: Option<usize>,
    max_disk_size: Option<usize>,
    disk_path: Option<PathBuf>,
    thread_safe: Option<bool>,
    enable_vector_similarity: Option<bool>,
    similarity_threshold: Option<f32>,
    max_vectors: Option<usize>,
    batch_size: Option<usize>,
    flush_interval: Option<Duration>,
    min_answer_length: Option<usize>,
}

impl CacheConfigBuilder {
    pub fn key_strategy(mut self, kind: KeyStrategyKind) -> Self {
        self.key_strategy = Some(kind);
        self
    }

    pub fn context_window(mut self, window: usize) -> Self {
        self.context_window = Some(window);
        self
    }

    pub fn memory_only(mut self, memory_only: bool) -> Self {
        self.memory_only = Some(memory_only);
        self
    }

    pub fn max_memory_size(mut self, size: usize) -> Self {
        self.max_memory_size = Some(size);
        self
    }

    pub fn max_disk_size(mut self, size: usize) -> Self {
        self.max_disk_size = Some(size);
        self
    }

    pub fn disk_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.disk_path = Some(path.into());
        self
    }

    pub fn thread_safe(mut self, thread_safe: bool) -> Self {
        self.thread_safe = Some(thread_safe);
        self
    }

    pub fn enable_vector_similarity(mut self, enable: bool) -> Self {
        self.enable_vector_similarity = Some(enable);
        self
    }

    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = Some(threshold);
        self
    }

    pub fn max_vectors(mut self, max: usize) -> Self {
        self.max_vectors = Some(max);
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = Some(interval);
        self
    }

    pub fn min_answer_length(mut self, length: usize) -> Self {
        self.min_answer_length = Some(length);
        self
    }

    /// Build the configuration
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        CacheConfig {
            key_strategy: self.key_strategy.unwrap_or(defaults.key_strategy),
            context_window: self.context_window.unwrap_or(defaults.context_window),
            memory_only: self.memory_only.unwrap_or(defaults.memory_only),
            max_memory_size: self.max_memory_size.unwrap_or(defaults.max_memory_size),
            max_disk_size: self.max_disk_size.unwrap_or(defaults.max_disk_size),
            disk_path: self.disk_path.or(defaults.disk_path),
            thread_safe: self.thread_safe.unwrap_or(defaults.thread_safe),
            enable_vector_similarity: self
                .enable_vector_similarity
                .unwrap_or(defaults.enable_vector_similarity),
            similarity_threshold: self
                .similarity_threshold
                .unwrap_or(defaults.similarity_threshold),
            max_vectors: self.max_vectors.unwrap_or(defaults.max_vectors),
            batch_size: self.batch_size.unwrap_or(defaults.batch_size),
            flush_interval: self.flush_interval.unwrap_or(defaults.flush_interval),
            min_answer_length: self
                .min_answer_length
                .unwrap_or(defaults.min_answer_length),
        }
    }
}
