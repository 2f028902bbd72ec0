//! Context assembly: token accounting, budget packing, caching
//!
//! Turns post-processed results into one formatted, citation-backed block of
//! text that fits the context share of the caller's token budget.

mod assembler;
mod cache;
mod compress;
mod tokens;

pub use assembler::ContextAssembler;
pub use cache::ContextCache;
pub use tokens::TokenCounter;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reference from assembled text back to a source chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// Cited chunk
    pub chunk_id: String,
    /// Document the chunk came from
    pub document_id: String,
    /// Chunk position within its document
    pub position: u32,
    /// Final relevance score the chunk was accepted with
    pub score: f32,
}

/// The assembled context block returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssembledContext {
    /// Formatted context text, one numbered section per citation
    pub formatted_text: String,
    /// Source references, in display order
    pub citations: Vec<Citation>,
    /// Token count of `formatted_text`; never exceeds the request budget
    pub token_count: usize,
    /// Deterministic signature of (query text, filters, top_k, namespace)
    pub cache_key: String,
    /// Request-level flags: degraded, fusion algorithm, intent, recovered
    /// errors. No timing data lives here; cached responses must be
    /// byte-identical. Latencies go to tracing instead.
    pub metadata: Map<String, Value>,
}

/// Chunk ordering within the assembled text
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReorderStrategy {
    /// Highest relevance first (fused order)
    #[default]
    RelevanceFirst,
    /// By chunk position within the source documents
    Chronological,
    /// Alternate between distinct documents
    DiversityInterleave,
}
