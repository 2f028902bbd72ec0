/// Vector index trait and HNSW implementation
use crate::chunk::{Chunk, ChunkFilter};
use crate::retrieval::BranchResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hnsw_rs::prelude::*;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VectorIndexError {
    #[error("Index initialization failed: {0}")]
    InitializationError(String),

    #[error("Insert failed: {0}")]
    InsertError(String),

    #[error("Search failed: {0}")]
    SearchError(String),

    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },
}

/// Nearest-neighbor search over chunk embeddings.
///
/// Read-only from the engine's perspective; `upsert`/`delete` belong to the
/// ingestion pipeline. Results may lag deletions, so callers must tolerate
/// IDs that no longer hydrate.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Search for the `top_k` nearest neighbors under cosine similarity,
    /// restricted to `namespace` and `filters`.
    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        namespace: &str,
        filters: &[ChunkFilter],
    ) -> Result<Vec<BranchResult>, VectorIndexError>;
}

/// Per-vector bookkeeping needed for namespace/filter restriction
struct VectorEntry {
    chunk_id: String,
    namespace: String,
    document_id: String,
    owner_id: String,
    created_at: DateTime<Utc>,
    snippet: String,
}

impl VectorEntry {
    fn matches(&self, filter: &ChunkFilter) -> bool {
        match filter {
            ChunkFilter::ByDocument { ids } => ids.iter().any(|id| *id == self.document_id),
            ChunkFilter::ByOwner { id } => *id == self.owner_id,
            ChunkFilter::ByDateRange { start, end } => {
                self.created_at >= *start && self.created_at <= *end
            }
        }
    }
}

/// HNSW vector index (cosine similarity on normalized vectors)
pub struct HnswVectorIndex {
    index: RwLock<Hnsw<'static, f32, DistCosine>>,
    entries: RwLock<Vec<VectorEntry>>,
    dimension: usize,
    ef_search: usize,
}

/// Candidates fetched beyond top_k so post-search filtering still fills the pool
const OVERFETCH: usize = 4;

const SNIPPET_LEN: usize = 200;

impl HnswVectorIndex {
    /// Create an index for vectors of the given dimension
    pub fn new(dimension: usize) -> Self {
        Self::with_params(dimension, 16, 200, 50)
    }

    /// Create an index with explicit HNSW parameters
    pub fn with_params(dimension: usize, m: usize, ef_construction: usize, ef_search: usize) -> Self {
        let index = Hnsw::<f32, DistCosine>::new(
            m,
            1_000_000, // max elements
            16,        // max layers
            ef_construction,
            DistCosine,
        );

        Self {
            index: RwLock::new(index),
            entries: RwLock::new(Vec::new()),
            dimension,
            ef_search,
        }
    }

    /// Index a chunk's embedding.
    ///
    /// Chunks without an embedding are rejected: producing one is the
    /// ingestion pipeline's job, not this engine's.
    pub fn insert(&self, chunk: &Chunk, namespace: &str) -> Result<(), VectorIndexError> {
        let vector = chunk.embedding.as_ref().ok_or_else(|| {
            VectorIndexError::InsertError(format!("chunk {} has no embedding", chunk.id))
        })?;

        if vector.len() != self.dimension {
            return Err(VectorIndexError::InvalidDimension {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let mut entries = self.entries.write().unwrap();
        let internal_id = entries.len();

        entries.push(VectorEntry {
            chunk_id: chunk.id.clone(),
            namespace: namespace.to_string(),
            document_id: chunk.document_id.clone(),
            owner_id: chunk.owner_id.clone(),
            created_at: chunk.created_at,
            snippet: chunk.preview(SNIPPET_LEN),
        });

        let data = vector.clone();
        let index = self.index.write().unwrap();
        index.insert((&data, internal_id));

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

#[async_trait]
impl VectorIndex for HnswVectorIndex {
    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        namespace: &str,
        filters: &[ChunkFilter],
    ) -> Result<Vec<BranchResult>, VectorIndexError> {
        if vector.len() != self.dimension {
            return Err(VectorIndexError::InvalidDimension {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let fetch = top_k.saturating_mul(OVERFETCH);
        let ef = self.ef_search.max(fetch);

        let neighbours = {
            let index = self.index.read().unwrap();
            index.search(vector, fetch, ef)
        };

        let entries = self.entries.read().unwrap();
        let mut results = Vec::with_capacity(top_k);

        for neighbour in neighbours {
            let Some(entry) = entries.get(neighbour.d_id) else {
                continue;
            };
            if entry.namespace != namespace {
                continue;
            }
            if !filters.iter().all(|f| entry.matches(f)) {
                continue;
            }

            let rank = results.len() + 1;
            results.push(BranchResult {
                chunk_id: entry.chunk_id.clone(),
                content_snippet: entry.snippet.clone(),
                raw_score: 1.0 - neighbour.distance, // distance -> similarity
                rank,
            });

            if results.len() == top_k {
                break;
            }
        }

        Ok(results)
    }
}
