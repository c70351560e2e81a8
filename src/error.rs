//! Error types for cache operations
//!
//! Only configuration errors are fatal, and only at construction time. Runtime
//! storage and embedding faults are downgraded to degraded operation inside the
//! cache and reported through metrics and logs.

use thiserror::Error;

/// Main error type for cache operations
#[derive(Error, Debug)]
pub enum CacheError {
    /// Invalid configuration - raised synchronously at construction
    #[error("Configuration error: {0}")]
    Config(String),

    /// Disk tier I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Embedding provider failure - similarity is unavailable for the call
    #[error("Embedding error: {0}")]
    Embedding(String),
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

impl From<String> for CacheError {
    fn from(s: String) -> Self {
        CacheError::Config(s)
    }
}

impl From<&str> for CacheError {
    fn from(s: &str) -> Self {
        CacheError::Config(s.to_string())
    }
}
