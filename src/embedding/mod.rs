//! Embedding & index collaborators
//!
//! The engine never owns index contents; it reads them through narrow traits:
//! - [`EmbeddingProvider`] for query vectors (with a local FastEmbed impl)
//! - [`VectorIndex`] for nearest-neighbor search (HNSW impl, cosine)
//! - [`KeywordIndex`] for postings and document-frequency statistics
//!
//! Query embeddings are cached behind [`CachedEmbedder`] with single-flight
//! semantics so concurrent identical queries share one provider call.

mod cache;
mod keyword_index;
mod provider;
mod vector_index;

pub use cache::CachedEmbedder;
pub use keyword_index::{InMemoryKeywordIndex, KeywordIndex, KeywordIndexError, TermPostings};
pub use provider::{EmbeddingError, EmbeddingProvider, FastEmbedProvider};
pub use vector_index::{HnswVectorIndex, VectorIndex, VectorIndexError};
