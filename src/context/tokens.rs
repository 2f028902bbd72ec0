//! Model-aware token counting
//!
//! Exact counts through tiktoken's cl100k_base tokenizer; anything else falls
//! back to the chars/4 approximation. Per-chunk counts are cached so repeated
//! assembly of the same chunks stays cheap.

use moka::sync::Cache;
use std::sync::Arc;
use tiktoken_rs::CoreBPE;

/// Token counter with per-key caching
pub struct TokenCounter {
    bpe: Option<Arc<CoreBPE>>,
    cache: Cache<String, usize>,
}

impl TokenCounter {
    /// Create a counter for the given tokenizer name.
    ///
    /// Only "cl100k_base" counts exactly; unknown names use the
    /// approximation. A tokenizer that fails to load also degrades to the
    /// approximation rather than failing assembly.
    pub fn new(tokenizer: &str, cache_capacity: u64) -> Self {
        let bpe = if tokenizer == "cl100k_base" {
            match tiktoken_rs::cl100k_base() {
                Ok(bpe) => Some(Arc::new(bpe)),
                Err(e) => {
                    tracing::warn!("failed to load cl100k_base tokenizer: {}, approximating", e);
                    None
                }
            }
        } else {
            None
        };

        Self {
            bpe,
            cache: Cache::new(cache_capacity),
        }
    }

    /// Count tokens in `text` (uncached)
    pub fn count(&self, text: &str) -> usize {
        match &self.bpe {
            Some(bpe) => bpe.encode_ordinary(text).len(),
            None => approximate(text),
        }
    }

    /// Count tokens, caching the result under `key` (typically a chunk ID).
    ///
    /// The key must identify the text: callers use this only for immutable
    /// chunk content.
    pub fn count_cached(&self, key: &str, text: &str) -> usize {
        let owned = text.to_string();
        self.cache
            .get_with(key.to_string(), move || match &self.bpe {
                Some(bpe) => bpe.encode_ordinary(&owned).len(),
                None => approximate(&owned),
            })
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new("cl100k_base", 50_000)
    }
}

/// chars/4, rounded up; the standing estimate for unknown tokenizers
fn approximate(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}
