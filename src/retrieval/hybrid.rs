//! Hybrid retrieval engine
//!
//! Orchestrates the full request pipeline: validation, query enhancement,
//! concurrent dual-path search with independent timeouts, rank fusion,
//! post-processing, context assembly and caching. Branch failures degrade the
//! request to single-path mode; only the loss of both branches surfaces.

use crate::chunk::{matches_all, Chunk, ChunkStore};
use crate::config::Config;
use crate::context::{AssembledContext, ContextAssembler, ContextCache};
use crate::embedding::{CachedEmbedder, EmbeddingProvider, KeywordIndex, VectorIndex};
use crate::query::{EnhancedQuery, QueryEnhancer};
use crate::retrieval::fusion::{Branch, FusionEngine};
use crate::retrieval::postprocess::PostProcessor;
use crate::retrieval::{bm25_scores, BranchResult, FusedResult, RetrievalContext, SearchQuery};
use ahash::AHashMap;
use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::timeout;

#[derive(Error, Debug, Clone)]
pub enum RetrievalError {
    /// Malformed request; rejected immediately, never retried
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Embedding provider failure (branch-local, recovered via degradation)
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Index failure (branch-local, recovered via degradation)
    #[error("Index unavailable: {0}")]
    IndexUnavailable(String),

    /// Both search branches failed; nothing to return
    #[error("Retrieval unavailable: {0}")]
    Unavailable(String),

    /// Cache-layer failure; logged and bypassed, never fails a request
    #[error("Cache error: {0}")]
    Cache(String),
}

/// How a branch resolved
enum BranchOutcome {
    Ok(Vec<BranchResult>),
    Failed(String),
}

/// The hybrid retrieval engine.
///
/// Collaborators are injected; the engine never mutates the indexes or the
/// chunk store. Shared caches (query embeddings, assembled contexts) live
/// inside the engine with explicit lifecycle: constructed here, cleared
/// through [`HybridRetriever::invalidate_document`] and
/// [`HybridRetriever::clear_caches`].
pub struct HybridRetriever {
    config: Config,
    embedder: CachedEmbedder,
    vector_index: Arc<dyn VectorIndex>,
    keyword_index: Arc<dyn KeywordIndex>,
    chunk_store: Arc<dyn ChunkStore>,
    enhancer: QueryEnhancer,
    fusion: FusionEngine,
    postprocessor: PostProcessor,
    assembler: ContextAssembler,
    cache: ContextCache,
}

impl HybridRetriever {
    pub fn new(
        config: Config,
        provider: Arc<dyn EmbeddingProvider>,
        vector_index: Arc<dyn VectorIndex>,
        keyword_index: Arc<dyn KeywordIndex>,
        chunk_store: Arc<dyn ChunkStore>,
    ) -> Self {
        let embedder = CachedEmbedder::new(
            provider,
            config.embedding.cache_capacity,
            Duration::from_secs(config.embedding.cache_ttl_secs),
        );
        let enhancer = QueryEnhancer::from_vocabulary(keyword_index.vocabulary());
        let fusion = FusionEngine::new(&config.fusion);
        let postprocessor = PostProcessor::new(config.retrieval.clone());
        let assembler = ContextAssembler::new(config.assembly.clone());
        let cache = ContextCache::new(
            config.cache.capacity,
            Duration::from_secs(config.cache.ttl_secs),
        );

        Self {
            config,
            embedder,
            vector_index,
            keyword_index,
            chunk_store,
            enhancer,
            fusion,
            postprocessor,
            assembler,
            cache,
        }
    }

    /// Retrieve assembled context for a request.
    ///
    /// Synchronous contract from the caller's point of view: one awaited call
    /// returns either a complete (possibly degraded, flagged) context or a
    /// single typed error.
    pub async fn retrieve(
        &self,
        ctx: RetrievalContext,
    ) -> Result<AssembledContext, RetrievalError> {
        let started = Instant::now();
        self.validate(&ctx)?;

        let cache_key = cache_key(&ctx.query);
        let (assembled, cache_hit) = self
            .cache
            .get_or_compute(&cache_key, self.execute(&ctx, &cache_key))
            .await?;

        tracing::info!(
            cache_hit,
            token_count = assembled.token_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "retrieval complete"
        );

        Ok((*assembled).clone())
    }

    /// Purge cached contexts citing `document_id`.
    ///
    /// Called when the ingestion side updates or deletes a document's chunks.
    pub async fn invalidate_document(&self, document_id: &str) {
        self.cache.invalidate_document(document_id).await;
    }

    /// Drop both shared caches (query embeddings and assembled contexts)
    pub fn clear_caches(&self) {
        self.embedder.clear();
        self.cache.clear();
    }

    fn validate(&self, ctx: &RetrievalContext) -> Result<(), RetrievalError> {
        let text = ctx.query.text.trim();
        if text.is_empty() {
            return Err(RetrievalError::InvalidQuery(
                "query text cannot be empty".to_string(),
            ));
        }
        if text.len() > self.config.retrieval.max_query_len {
            return Err(RetrievalError::InvalidQuery(format!(
                "query length {} exceeds maximum {}",
                text.len(),
                self.config.retrieval.max_query_len
            )));
        }
        if ctx.query.top_k == 0 {
            return Err(RetrievalError::InvalidQuery(
                "top_k must be greater than 0".to_string(),
            ));
        }
        if ctx.max_tokens == 0 {
            return Err(RetrievalError::InvalidQuery(
                "max_tokens must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// The full pipeline behind a cache miss
    async fn execute(
        &self,
        ctx: &RetrievalContext,
        cache_key: &str,
    ) -> Result<AssembledContext, RetrievalError> {
        let enhanced = self.enhancer.enhance(&ctx.query.text);
        let top_k = ctx.query.top_k.min(self.config.retrieval.max_top_k);
        let pool = top_k.max(self.config.retrieval.rerank_pool_size);
        let branch_timeout = Duration::from_millis(self.config.retrieval.branch_timeout_ms);

        // Both branches run concurrently under independent timeouts; the
        // barrier is the join point, not either branch alone
        let keyword_task = async {
            let t0 = Instant::now();
            let outcome = match timeout(branch_timeout, self.keyword_branch(&enhanced, &ctx.query, pool)).await
            {
                Ok(Ok(results)) => BranchOutcome::Ok(results),
                Ok(Err(e)) => BranchOutcome::Failed(e.to_string()),
                Err(_) => BranchOutcome::Failed("timeout".to_string()),
            };
            (outcome, t0.elapsed())
        };
        let vector_task = async {
            if !ctx.query.hybrid {
                return (BranchOutcome::Failed("disabled".to_string()), Duration::ZERO);
            }
            let t0 = Instant::now();
            let outcome = match timeout(branch_timeout, self.vector_branch(&enhanced, &ctx.query, pool)).await
            {
                Ok(Ok(results)) => BranchOutcome::Ok(results),
                Ok(Err(e)) => BranchOutcome::Failed(e.to_string()),
                Err(_) => BranchOutcome::Failed("timeout".to_string()),
            };
            (outcome, t0.elapsed())
        };

        let ((keyword_outcome, keyword_elapsed), (vector_outcome, vector_elapsed)) =
            tokio::join!(keyword_task, vector_task);

        let algorithm = ctx.query.algorithm;
        let mut recovered: Vec<String> = Vec::new();

        let (fused, degraded) = match (keyword_outcome, vector_outcome) {
            (BranchOutcome::Ok(kw), BranchOutcome::Ok(sem)) => (
                self.fusion.fuse(algorithm, &kw, &sem, enhanced.intent),
                false,
            ),
            (BranchOutcome::Ok(kw), BranchOutcome::Failed(e)) => {
                let degraded = ctx.query.hybrid;
                if degraded {
                    tracing::warn!("vector branch failed, degrading to keyword-only: {}", e);
                    recovered.push(format!("vector branch: {}", e));
                }
                (self.fusion.passthrough(&kw, Branch::Keyword), degraded)
            }
            (BranchOutcome::Failed(e), BranchOutcome::Ok(sem)) => {
                tracing::warn!("keyword branch failed, degrading to vector-only: {}", e);
                recovered.push(format!("keyword branch: {}", e));
                (self.fusion.passthrough(&sem, Branch::Semantic), true)
            }
            (BranchOutcome::Failed(kw_err), BranchOutcome::Failed(vec_err)) => {
                return Err(RetrievalError::Unavailable(format!(
                    "keyword branch: {}; vector branch: {}",
                    kw_err, vec_err
                )));
            }
        };

        // Fused scores are bounded [0,1] only when a bounded algorithm
        // actually ran; degraded pass-through carries raw branch scores
        let bounded = !degraded && algorithm.is_bounded();

        let (fused, chunks) = self.hydrate(fused);

        let results = self.postprocessor.process(
            fused,
            &chunks,
            &ctx.user_id,
            ctx.min_relevance_score,
            top_k,
            bounded,
            Utc::now(),
        );

        tracing::info!(
            keyword_ms = keyword_elapsed.as_millis() as u64,
            vector_ms = vector_elapsed.as_millis() as u64,
            algorithm = algorithm.as_str(),
            intent = enhanced.intent.as_str(),
            degraded,
            results = results.len(),
            "branches fused"
        );

        let mut metadata = Map::new();
        metadata.insert("degraded".to_string(), Value::Bool(degraded));
        metadata.insert("hybrid".to_string(), Value::Bool(ctx.query.hybrid));
        metadata.insert(
            "fusion_algorithm".to_string(),
            Value::String(algorithm.as_str().to_string()),
        );
        metadata.insert(
            "intent".to_string(),
            Value::String(enhanced.intent.as_str().to_string()),
        );
        if !recovered.is_empty() {
            metadata.insert(
                "recovered_errors".to_string(),
                Value::Array(recovered.into_iter().map(Value::String).collect()),
            );
        }

        // Surface tokens, not stems: extractive compression matches them
        // against raw sentence text
        let query_terms = enhanced.tokens.clone();
        let ordered: Vec<(FusedResult, Chunk)> = results
            .into_iter()
            .filter_map(|r| chunks.get(&r.chunk_id).cloned().map(|c| (r, c)))
            .collect();

        Ok(self.assembler.assemble(
            cache_key,
            &query_terms,
            ordered,
            ctx.max_tokens,
            ctx.reorder,
            metadata,
        ))
    }

    /// Lexical branch: analyze, score BM25 over postings, fill the candidate
    /// pool with chunks that pass the request's filters.
    ///
    /// Scoring runs on the blocking pool so the branch timeout can fire even
    /// when postings are large.
    async fn keyword_branch(
        &self,
        enhanced: &EnhancedQuery,
        query: &SearchQuery,
        pool: usize,
    ) -> Result<Vec<BranchResult>, RetrievalError> {
        let terms = self.keyword_index.analyze(&enhanced.tokens.join(" "));
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let index = Arc::clone(&self.keyword_index);
        let store = Arc::clone(&self.chunk_store);
        let filters = query.filters.clone();

        tokio::task::spawn_blocking(move || {
            let scored = bm25_scores(index.as_ref(), &terms);

            let mut results = Vec::with_capacity(pool.min(scored.len()));
            for (chunk_id, raw_score) in scored {
                // Tolerate index lag: skip candidates the store no longer has
                let Some(chunk) = store.get(&chunk_id) else {
                    continue;
                };
                if !matches_all(&filters, &chunk) {
                    continue;
                }

                let rank = results.len() + 1;
                results.push(BranchResult {
                    chunk_id,
                    content_snippet: chunk.preview(200),
                    raw_score,
                    rank,
                });
                if results.len() == pool {
                    break;
                }
            }

            results
        })
        .await
        .map_err(|e| RetrievalError::IndexUnavailable(e.to_string()))
    }

    /// Semantic branch: embed the enhanced query (cached, single-flight) and
    /// search the vector index
    async fn vector_branch(
        &self,
        enhanced: &EnhancedQuery,
        query: &SearchQuery,
        pool: usize,
    ) -> Result<Vec<BranchResult>, RetrievalError> {
        let vector = self
            .embedder
            .embed(&enhanced.text)
            .await
            .map_err(|e| RetrievalError::EmbeddingUnavailable(e.to_string()))?;

        self.vector_index
            .search(&vector, pool, &query.namespace, &query.filters)
            .await
            .map_err(|e| RetrievalError::IndexUnavailable(e.to_string()))
    }

    /// Fetch full chunks for fused results, dropping results whose chunk no
    /// longer exists, and replace snippets with full content
    fn hydrate(&self, fused: Vec<FusedResult>) -> (Vec<FusedResult>, AHashMap<String, Chunk>) {
        let ids: Vec<String> = fused.iter().map(|r| r.chunk_id.clone()).collect();
        let chunks: AHashMap<String, Chunk> = self
            .chunk_store
            .get_many(&ids)
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();

        let mut hydrated: Vec<FusedResult> = fused
            .into_iter()
            .filter_map(|mut r| {
                let chunk = chunks.get(&r.chunk_id)?;
                r.content = chunk.content.clone();
                Some(r)
            })
            .collect();

        // Ranks stay contiguous after eventual-consistency drops
        for (i, r) in hydrated.iter_mut().enumerate() {
            r.rank = i + 1;
        }

        (hydrated, chunks)
    }
}

/// Deterministic cache key over the query signature
fn cache_key(query: &SearchQuery) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(query.text.as_bytes());
    hasher.update(b"\x1f");
    for filter in &query.filters {
        // ChunkFilter serialization is infallible (plain data enum)
        if let Ok(encoded) = serde_json::to_vec(filter) {
            hasher.update(&encoded);
        }
        hasher.update(b"\x1f");
    }
    hasher.update(&(query.top_k as u64).to_le_bytes());
    hasher.update(query.namespace.as_bytes());
    hasher.finalize().to_hex().to_string()
}
