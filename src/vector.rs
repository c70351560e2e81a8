//! In-memory vector index for semantic cache hits
//!
//! A bounded approximate-nearest-neighbor store mapping fingerprints to
//! embeddings. The index is purely an acceleration structure: it carries no
//! meaning of its own and the manager keeps it in lockstep with storage.

use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::{CacheError, Result};

/// Bounded fingerprint-to-embedding index with cosine similarity search
///
/// Capacity overflow evicts the oldest-inserted entry first; the evicted
/// fingerprints are handed back to the caller so the paired storage items can
/// be removed as well.
#[derive(Debug)]
pub struct VectorIndex {
    vectors: HashMap<String, Vec<f32>>,

    /// Insertion order, oldest first; re-inserting a key refreshes its slot
    order: Vec<String>,

    max_vectors: usize,

    /// Fixed by the first inserted vector
    dimension: Option<usize>,
}

impl VectorIndex {
    /// Create an index bounded to `max_vectors` entries
    pub fn new(max_vectors: usize) -> Self {
        Self {
            vectors: HashMap::new(),
            order: Vec::new(),
            max_vectors,
            dimension: None,
        }
    }

    /// Insert or replace an embedding, returning fingerprints evicted to
    /// stay within capacity
    pub fn insert(&mut self, key: impl Into<String>, vector: Vec<f32>) -> Result<Vec<String>> {
        let key = key.into();

        match self.dimension {
            None => self.dimension = Some(vector.len()),
            Some(dim) if dim != vector.len() => {
                return Err(CacheError::Embedding(format!(
                    "dimension mismatch: expected {}, got {}",
                    dim,
                    vector.len()
                )));
            }
            Some(_) => {}
        }

        if self.vectors.insert(key.clone(), vector).is_some() {
            self.order.retain(|k| k != &key);
        }
        self.order.push(key);

        let mut evicted = Vec::new();
        while self.vectors.len() > self.max_vectors {
            let oldest = self.order.remove(0);
            self.vectors.remove(&oldest);
            debug!("Vector index full, evicting oldest entry: {}", oldest);
            evicted.push(oldest);
        }

        Ok(evicted)
    }

    /// Remove a fingerprint's embedding; returns whether it existed
    pub fn remove(&mut self, key: &str) -> bool {
        if self.vectors.remove(key).is_some() {
            self.order.retain(|k| k != key);
            true
        } else {
            false
        }
    }

    /// Top-k most similar fingerprints, descending by cosine similarity
    ///
    /// A query vector of the wrong dimension yields no results rather than an
    /// error; the caller treats that as similarity being unavailable.
    pub fn search(&self, query: &[f32], top_k: usize) -> Vec<(String, f32)> {
        if top_k == 0 || self.vectors.is_empty() {
            return Vec::new();
        }
        if self.dimension.is_some_and(|dim| dim != query.len()) {
            warn!(
                "Query embedding dimension mismatch: expected {:?}, got {}",
                self.dimension,
                query.len()
            );
            return Vec::new();
        }

        let mut scored: Vec<(String, f32)> = self
            .vectors
            .iter()
            .map(|(key, vector)| (key.clone(), cosine_similarity(query, vector)))
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        scored
    }

    /// Number of indexed embeddings
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    /// Capacity bound the index was constructed with
    pub fn max_vectors(&self) -> usize {
        self.max_vectors
    }

    /// Whether the index holds no embeddings
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Whether a fingerprint is indexed
    pub fn contains(&self, key: &str) -> bool {
        self.vectors.contains_key(key)
    }

    /// Drop all embeddings
    pub fn clear(&mut self) {
        self.vectors.clear();
        self.order.clear();
    }
}

/// Cosine similarity in [-1, 1]; zero vectors score 0
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
