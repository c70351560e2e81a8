//! Embedding provider seam
//!
//! The embedding model is external to the cache: the host application supplies
//! an implementation and the cache treats it as an opaque text-to-vector
//! function. Provider failures make similarity matching unavailable for the
//! affected call; they never fail the lookup itself.

use crate::error::Result;

/// Host-supplied text embedding function
pub trait EmbeddingProvider: Send + Sync {
    /// Encode a text into a fixed-length vector
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Output vector dimension
    fn dimension(&self) -> usize;
}
