//! Chunk records and scoping filters
//!
//! Chunks are produced by the ingestion pipeline and are immutable once
//! indexed. The engine only reads them: hydration happens through the
//! [`ChunkStore`] trait so the backing store can be swapped without touching
//! retrieval code.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Metadata key marking a chunk's source as high quality
pub const META_HIGH_QUALITY: &str = "high_quality";

/// A bounded unit of source text with an associated embedding.
///
/// The atomic retrievable item. Immutable once indexed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique chunk ID
    pub id: String,

    /// Chunk text content
    pub content: String,

    /// Embedding vector, if the ingestion pipeline computed one
    pub embedding: Option<Vec<f32>>,

    /// Owning document ID
    pub document_id: String,

    /// Owner (user/tenant) of the source document
    pub owner_id: String,

    /// Position of this chunk within its document
    pub position: u32,

    /// Pre-computed token count, if known
    pub token_count: Option<u32>,

    /// Indexing timestamp
    pub created_at: DateTime<Utc>,

    /// Free-form metadata attached at ingestion time
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Chunk {
    /// Whether the source was marked high-quality at ingestion time
    pub fn is_high_quality(&self) -> bool {
        self.metadata
            .get(META_HIGH_QUALITY)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Age of the chunk relative to `now`
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_days()
    }

    /// Short preview of the content (at most `max_chars` characters)
    pub fn preview(&self, max_chars: usize) -> String {
        if self.content.chars().count() <= max_chars {
            self.content.clone()
        } else {
            let cut: String = self.content.chars().take(max_chars).collect();
            format!("{}...", cut)
        }
    }
}

/// Scoping filter restricting which chunks a query may match.
///
/// A closed set of variants rather than an open key/value map, so the filter
/// contract is statically checkable. All filters in a query must match
/// (conjunction).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChunkFilter {
    /// Restrict to chunks from the given documents
    ByDocument { ids: Vec<String> },

    /// Restrict to chunks owned by the given user
    ByOwner { id: String },

    /// Restrict to chunks indexed within the given time range (inclusive)
    ByDateRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

impl ChunkFilter {
    /// Whether `chunk` satisfies this filter
    pub fn matches(&self, chunk: &Chunk) -> bool {
        match self {
            ChunkFilter::ByDocument { ids } => ids.iter().any(|id| *id == chunk.document_id),
            ChunkFilter::ByOwner { id } => *id == chunk.owner_id,
            ChunkFilter::ByDateRange { start, end } => {
                chunk.created_at >= *start && chunk.created_at <= *end
            }
        }
    }
}

/// Whether `chunk` satisfies every filter in `filters`
pub fn matches_all(filters: &[ChunkFilter], chunk: &Chunk) -> bool {
    filters.iter().all(|f| f.matches(chunk))
}

/// Read-only chunk hydration by ID.
///
/// The index may lag ingestion: a just-deleted chunk can transiently surface
/// from a search branch. Callers drop IDs the store no longer knows about.
pub trait ChunkStore: Send + Sync {
    /// Fetch a single chunk
    fn get(&self, chunk_id: &str) -> Option<Chunk>;

    /// Fetch many chunks, silently skipping unknown IDs
    fn get_many(&self, chunk_ids: &[String]) -> Vec<Chunk> {
        chunk_ids.iter().filter_map(|id| self.get(id)).collect()
    }
}

/// Concurrent in-memory chunk store
#[derive(Default)]
pub struct InMemoryChunkStore {
    chunks: DashMap<String, Arc<Chunk>>,
}

impl InMemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a chunk
    pub fn insert(&self, chunk: Chunk) {
        self.chunks.insert(chunk.id.clone(), Arc::new(chunk));
    }

    /// Remove a chunk
    pub fn remove(&self, chunk_id: &str) {
        self.chunks.remove(chunk_id);
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

impl ChunkStore for InMemoryChunkStore {
    fn get(&self, chunk_id: &str) -> Option<Chunk> {
        self.chunks.get(chunk_id).map(|c| (**c).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, document_id: &str, owner_id: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            content: format!("content of {}", id),
            embedding: None,
            document_id: document_id.to_string(),
            owner_id: owner_id.to_string(),
            position: 0,
            token_count: None,
            created_at: Utc::now(),
            metadata: Map::new(),
        }
    }

    #[test]
    fn test_filter_by_document() {
        let c = chunk("c1", "doc-a", "alice");

        let hit = ChunkFilter::ByDocument {
            ids: vec!["doc-a".to_string(), "doc-b".to_string()],
        };
        let miss = ChunkFilter::ByDocument {
            ids: vec!["doc-z".to_string()],
        };

        assert!(hit.matches(&c));
        assert!(!miss.matches(&c));
    }

    #[test]
    fn test_filter_conjunction() {
        let c = chunk("c1", "doc-a", "alice");

        let filters = vec![
            ChunkFilter::ByDocument {
                ids: vec!["doc-a".to_string()],
            },
            ChunkFilter::ByOwner {
                id: "bob".to_string(),
            },
        ];

        assert!(!matches_all(&filters, &c));
    }

    #[test]
    fn test_store_get_many_skips_unknown() {
        let store = InMemoryChunkStore::new();
        store.insert(chunk("c1", "doc-a", "alice"));
        store.insert(chunk("c2", "doc-a", "alice"));

        let ids = vec![
            "c1".to_string(),
            "missing".to_string(),
            "c2".to_string(),
        ];
        let got = store.get_many(&ids);

        assert_eq!(got.len(), 2);
        assert_eq!(got[0].id, "c1");
        assert_eq!(got[1].id, "c2");
    }

    #[test]
    fn test_high_quality_flag() {
        let mut c = chunk("c1", "doc-a", "alice");
        assert!(!c.is_high_quality());

        c.metadata
            .insert(META_HIGH_QUALITY.to_string(), Value::Bool(true));
        assert!(c.is_high_quality());
    }
}
