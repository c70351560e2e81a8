//! Fingerprint generation strategies
//!
//! A strategy turns a raw query plus optional conversational context into a
//! deterministic fixed-length fingerprint. All variants hash their canonical
//! input with SHA-256, so accidental collisions across distinct inputs are
//! out of the question rather than an accepted risk.

use sha2::{Digest, Sha256};

/// Separator between canonical input fields; cannot occur in hashed content
/// without changing the field count, which keeps distinct inputs distinct.
const FIELD_SEP: char = '\x1f';

/// Conversational context accompanying a query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryContext {
    /// Calling session/thread identifier
    pub session_id: Option<String>,

    /// Conversation history for the session, oldest first
    pub history: Vec<String>,

    /// Keyword tags qualifying the query (e.g. "low-level", "high-level")
    pub keywords: Vec<String>,
}

impl QueryContext {
    /// Context scoped to a session with no history yet
    pub fn for_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Default::default()
        }
    }

    /// Append a conversation turn
    pub fn push_turn(&mut self, turn: impl Into<String>) {
        self.history.push(turn.into());
    }

    /// Attach keyword tags
    pub fn with_keywords(mut self, keywords: Vec<String>) -> Self {
        self.keywords = keywords;
        self
    }

    fn is_empty(&self) -> bool {
        self.session_id.is_none() && self.history.is_empty()
    }
}

/// Strategy for deriving a cache fingerprint from a query
///
/// Implementations must be pure: the same (query, context) pair always maps
/// to the same fingerprint.
pub trait CacheKeyStrategy: Send + Sync {
    /// Compute the fingerprint for a query under this strategy
    fn compute_key(&self, query: &str, context: Option<&QueryContext>) -> String;
}

/// Fingerprint from the query text alone
#[derive(Debug, Clone, Default)]
pub struct SimpleKeyStrategy;

impl CacheKeyStrategy for SimpleKeyStrategy {
    fn compute_key(&self, query: &str, _context: Option<&QueryContext>) -> String {
        digest(query)
    }
}

/// Session-independent fingerprint over a normalized query
///
/// Trimmed, case-folded and whitespace-collapsed, so trivially different
/// renderings of the same question from any session collide onto one key.
#[derive(Debug, Clone, Default)]
pub struct GlobalKeyStrategy;

impl GlobalKeyStrategy {
    fn normalize(query: &str) -> String {
        query
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }
}

impl CacheKeyStrategy for GlobalKeyStrategy {
    fn compute_key(&self, query: &str, _context: Option<&QueryContext>) -> String {
        digest(&Self::normalize(query))
    }
}

/// Fingerprint over the query plus the session's recent conversation turns
#[derive(Debug, Clone)]
pub struct ContextAwareKeyStrategy {
    /// How many trailing history turns participate in the key
    pub context_window: usize,
}

impl Default for ContextAwareKeyStrategy {
    fn default() -> Self {
        Self { context_window: 3 }
    }
}

impl ContextAwareKeyStrategy {
    pub fn new(context_window: usize) -> Self {
        Self { context_window }
    }

    fn canonical_input(&self, query: &str, context: &QueryContext) -> String {
        let mut input = String::from(query);
        if let Some(session) = &context.session_id {
            input.push(FIELD_SEP);
            input.push_str(session);
        }
        let start = context.history.len().saturating_sub(self.context_window);
        for turn in &context.history[start..] {
            input.push(FIELD_SEP);
            input.push_str(turn);
        }
        input
    }
}

impl CacheKeyStrategy for ContextAwareKeyStrategy {
    fn compute_key(&self, query: &str, context: Option<&QueryContext>) -> String {
        match context {
            // No context degrades to the simple, query-only key
            None => digest(query),
            Some(ctx) if ctx.is_empty() => digest(query),
            Some(ctx) => digest(&self.canonical_input(query, ctx)),
        }
    }
}

/// Context-aware fingerprint that additionally folds in keyword tags
///
/// Keywords are sorted and deduplicated before hashing: reordering an
/// identical keyword set never changes the key, while differing sets for an
/// otherwise-identical query never collide.
#[derive(Debug, Clone, Default)]
pub struct ContextAndKeywordAwareKeyStrategy {
    inner: ContextAwareKeyStrategy,
}

impl ContextAndKeywordAwareKeyStrategy {
    pub fn new(context_window: usize) -> Self {
        Self {
            inner: ContextAwareKeyStrategy::new(context_window),
        }
    }

    fn canonical_keywords(keywords: &[String]) -> Vec<&str> {
        let mut sorted: Vec<&str> = keywords.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        sorted.dedup();
        sorted
    }
}

impl CacheKeyStrategy for ContextAndKeywordAwareKeyStrategy {
    fn compute_key(&self, query: &str, context: Option<&QueryContext>) -> String {
        let keywords = context.map(|c| c.keywords.as_slice()).unwrap_or(&[]);
        if keywords.is_empty() {
            return self.inner.compute_key(query, context);
        }

        let mut input = match context {
            Some(ctx) if !ctx.is_empty() => self.inner.canonical_input(query, ctx),
            _ => String::from(query),
        };
        input.push(FIELD_SEP);
        input.push_str("kw");
        for keyword in Self::canonical_keywords(keywords) {
            input.push(FIELD_SEP);
            input.push_str(keyword);
        }
        digest(&input)
    }
}

/// SHA-256 of the canonical input, hex-encoded (64 chars, fixed length)
fn digest(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}
