//! Braid - Hybrid Retrieval & Context Assembly Engine
//!
//! Takes a free-text query plus scoping filters and produces a token-budgeted,
//! ranked, deduplicated block of supporting text for downstream generation.
//! Lexical (BM25) and semantic (vector cosine) search run concurrently, get
//! merged through a selectable rank-fusion algorithm, filtered for relevance
//! and redundancy, and packed into a hard token budget. Degrades to a single
//! search path when the other is unavailable; identical concurrent requests
//! share one computation through single-flight caches.

pub mod chunk;
pub mod config;
pub mod context;
pub mod embedding;
pub mod error;
pub mod query;
pub mod retrieval;

pub use chunk::{Chunk, ChunkFilter, ChunkStore, InMemoryChunkStore};
pub use context::{AssembledContext, Citation, ReorderStrategy};
pub use error::{BraidError, Result};
pub use retrieval::{
    FusedResult, FusionAlgorithm, HybridRetriever, RetrievalContext, RetrievalError, SearchQuery,
};
