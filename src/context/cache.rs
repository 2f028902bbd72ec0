//! Assembled-context cache: TTL-bounded, single-flight, invalidated by
//! document
//!
//! Concurrent requests computing the same key share one pipeline run. A
//! reverse index from document ID to cache keys supports eager invalidation
//! when the ingestion side updates or deletes a document's chunks.

use crate::context::AssembledContext;
use crate::retrieval::RetrievalError;
use ahash::AHashSet;
use dashmap::DashMap;
use moka::future::Cache;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Cache over assembled contexts
pub struct ContextCache {
    cache: Cache<String, Arc<AssembledContext>>,
    /// document_id -> cache keys whose citations reference it
    doc_keys: DashMap<String, AHashSet<String>>,
}

impl ContextCache {
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .build();

        Self {
            cache,
            doc_keys: DashMap::new(),
        }
    }

    /// Return the cached context for `key`, or run `compute` to fill it.
    ///
    /// Single-flight: when several requests miss on the same key at once,
    /// exactly one runs `compute`; the rest await its result. Errors are not
    /// cached. The returned flag is true on a hit.
    pub async fn get_or_compute<F>(
        &self,
        key: &str,
        compute: F,
    ) -> Result<(Arc<AssembledContext>, bool), RetrievalError>
    where
        F: Future<Output = Result<AssembledContext, RetrievalError>>,
    {
        if let Some(hit) = self.cache.get(key).await {
            return Ok((hit, true));
        }

        let assembled = self
            .cache
            .try_get_with(key.to_string(), async move { compute.await.map(Arc::new) })
            .await
            .map_err(|e: Arc<RetrievalError>| (*e).clone())?;

        for citation in &assembled.citations {
            self.doc_keys
                .entry(citation.document_id.clone())
                .or_default()
                .insert(key.to_string());
        }

        Ok((assembled, false))
    }

    /// Purge every cache entry whose citations reference `document_id`
    pub async fn invalidate_document(&self, document_id: &str) {
        if let Some((_, keys)) = self.doc_keys.remove(document_id) {
            for key in keys {
                self.cache.invalidate(&key).await;
            }
        }
    }

    /// Drop all entries
    pub fn clear(&self) {
        self.cache.invalidate_all();
        self.doc_keys.clear();
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}
