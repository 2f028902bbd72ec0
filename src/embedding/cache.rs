//! Query-embedding cache with single-flight semantics
//!
//! Keyed by normalized query text with a bounded TTL. Concurrent requests for
//! the same key share one provider call: `moka`'s `try_get_with` guarantees a
//! single in-flight init per key, every waiter receiving its result.

use crate::embedding::{EmbeddingError, EmbeddingProvider};
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

/// Embedding provider wrapped with a TTL cache
pub struct CachedEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Cache<String, Arc<Vec<f32>>>,
}

impl CachedEmbedder {
    /// Wrap `provider` with a cache of `capacity` entries and `ttl` lifetime
    pub fn new(provider: Arc<dyn EmbeddingProvider>, capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .build();

        Self { provider, cache }
    }

    /// Embed `text`, sharing in-flight work across concurrent callers.
    ///
    /// The cache key is the normalized text, so trivial whitespace/case
    /// variants of the same query hit the same entry.
    pub async fn embed(&self, text: &str) -> Result<Arc<Vec<f32>>, EmbeddingError> {
        let key = normalize_key(text);
        let provider = Arc::clone(&self.provider);
        let owned = text.to_string();

        self.cache
            .try_get_with(key, async move { provider.embed(&owned).await.map(Arc::new) })
            .await
            .map_err(|e: Arc<EmbeddingError>| {
                EmbeddingError::GenerationError(e.to_string())
            })
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    /// Drop all cached embeddings
    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

fn normalize_key(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
