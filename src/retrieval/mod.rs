//! Hybrid retrieval: dual-path search, rank fusion, post-processing
//!
//! A request fans out to a lexical (BM25) and a semantic (vector cosine)
//! branch running concurrently, merges the two ranked lists through a
//! selectable fusion algorithm, then filters for relevance and redundancy.
//! One failing branch degrades the request to single-path mode; only the loss
//! of both surfaces to the caller.

mod bm25;
mod fusion;
mod hybrid;
mod postprocess;

pub use bm25::{bm25_scores, BM25_B, BM25_K1};
pub use fusion::{FusionAlgorithm, FusionEngine};
pub use hybrid::{HybridRetriever, RetrievalError};
pub use postprocess::PostProcessor;

use crate::chunk::ChunkFilter;
use crate::context::ReorderStrategy;
use serde::{Deserialize, Serialize};

/// Search query with scoping filters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Query text
    pub text: String,

    /// Scoping filters (conjunction)
    #[serde(default)]
    pub filters: Vec<ChunkFilter>,

    /// Maximum number of results (clamped to the configured cap)
    pub top_k: usize,

    /// Index namespace (tenant isolation)
    pub namespace: String,

    /// Widen the candidate pool for downstream reranking
    #[serde(default)]
    pub rerank: bool,

    /// Run both search paths; false restricts to keyword-only
    #[serde(default = "default_true")]
    pub hybrid: bool,

    /// Rank-fusion algorithm for this request
    #[serde(default)]
    pub algorithm: FusionAlgorithm,
}

fn default_true() -> bool {
    true
}

impl SearchQuery {
    pub fn new(text: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            filters: Vec::new(),
            top_k: 10,
            namespace: namespace.into(),
            rerank: false,
            hybrid: true,
            algorithm: FusionAlgorithm::default(),
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_filters(mut self, filters: Vec<ChunkFilter>) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_algorithm(mut self, algorithm: FusionAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }
}

/// One retrieval request
#[derive(Debug, Clone)]
pub struct RetrievalContext {
    /// The search query (filters, top_k, namespace, fusion algorithm)
    pub query: SearchQuery,

    /// Requesting user; drives the ownership boost
    pub user_id: String,

    /// Total token budget the caller is working with
    pub max_tokens: usize,

    /// Minimum fused score (in [0,1]) a result must reach
    pub min_relevance_score: f32,

    /// Chunk ordering within the assembled text
    pub reorder: ReorderStrategy,
}

impl RetrievalContext {
    pub fn new(query: SearchQuery, user_id: impl Into<String>, max_tokens: usize) -> Self {
        Self {
            query,
            user_id: user_id.into(),
            max_tokens,
            min_relevance_score: 0.7,
            reorder: ReorderStrategy::default(),
        }
    }

    pub fn with_min_relevance(mut self, min_relevance_score: f32) -> Self {
        self.min_relevance_score = min_relevance_score;
        self
    }

    pub fn with_reorder(mut self, reorder: ReorderStrategy) -> Self {
        self.reorder = reorder;
        self
    }
}

/// One candidate from a single search branch.
///
/// Raw scores are NOT comparable across branches (different scales) until
/// fused.
#[derive(Debug, Clone, PartialEq)]
pub struct BranchResult {
    /// Matched chunk ID
    pub chunk_id: String,

    /// Short preview of the chunk content
    pub content_snippet: String,

    /// Branch-native score (BM25 or cosine similarity)
    pub raw_score: f32,

    /// 1-based rank within this branch
    pub rank: usize,
}

/// One candidate after rank fusion.
///
/// `fused_score` is non-increasing with `rank`; `rank` is 1-based and
/// contiguous; no chunk ID appears twice in a list.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedResult {
    /// Matched chunk ID
    pub chunk_id: String,

    /// Chunk content (snippet until hydration, then the full text)
    pub content: String,

    /// Raw semantic-branch score (0 when absent from that branch)
    pub semantic_score: f32,

    /// Raw keyword-branch score (0 when absent from that branch)
    pub keyword_score: f32,

    /// Fused relevance score
    pub fused_score: f32,

    /// 1-based rank in the fused list
    pub rank: usize,
}
