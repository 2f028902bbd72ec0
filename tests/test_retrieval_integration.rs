//! End-to-end retrieval scenarios: dual-path search, fusion, degradation

use async_trait::async_trait;
use braid::chunk::{Chunk, ChunkFilter, InMemoryChunkStore};
use braid::config::Config;
use braid::embedding::{
    EmbeddingError, EmbeddingProvider, HnswVectorIndex, InMemoryKeywordIndex, KeywordIndex,
    TermPostings,
};
use braid::retrieval::{FusionAlgorithm, HybridRetriever, RetrievalContext, RetrievalError, SearchQuery};
use chrono::Utc;
use serde_json::Map;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const NAMESPACE: &str = "main";

/// Provider answering from a fixed table of query embeddings
struct TableProvider {
    table: HashMap<String, Vec<f32>>,
    calls: AtomicUsize,
}

impl TableProvider {
    fn new(entries: &[(&str, Vec<f32>)]) -> Self {
        Self {
            table: entries
                .iter()
                .map(|(text, v)| (text.to_string(), v.clone()))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for TableProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.table
            .get(text)
            .cloned()
            .ok_or_else(|| EmbeddingError::GenerationError(format!("no entry for {:?}", text)))
    }

    fn dimension(&self) -> usize {
        4
    }

    fn model_name(&self) -> &str {
        "table"
    }
}

/// Provider that never answers before the branch timeout
struct SlowProvider;

#[async_trait]
impl EmbeddingProvider for SlowProvider {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(vec![1.0, 0.0, 0.0, 0.0])
    }

    fn dimension(&self) -> usize {
        4
    }

    fn model_name(&self) -> &str {
        "slow"
    }
}

/// Provider that always fails
struct FailingProvider;

#[async_trait]
impl EmbeddingProvider for FailingProvider {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::GenerationError("provider down".to_string()))
    }

    fn dimension(&self) -> usize {
        4
    }

    fn model_name(&self) -> &str {
        "failing"
    }
}

/// Keyword index whose postings lookup blocks past any branch timeout
struct StuckKeywordIndex;

impl KeywordIndex for StuckKeywordIndex {
    fn doc_count(&self) -> usize {
        1
    }

    fn avg_doc_len(&self) -> f32 {
        1.0
    }

    fn doc_len(&self, _chunk_id: &str) -> Option<u32> {
        Some(1)
    }

    fn postings(&self, _term: &str) -> Option<TermPostings> {
        std::thread::sleep(Duration::from_millis(500));
        None
    }

    fn vocabulary(&self) -> Vec<String> {
        Vec::new()
    }

    fn analyze(&self, _text: &str) -> Vec<String> {
        vec!["term".to_string()]
    }
}

fn chunk(id: &str, document_id: &str, owner: &str, content: &str, embedding: Vec<f32>) -> Chunk {
    Chunk {
        id: id.to_string(),
        content: content.to_string(),
        embedding: Some(embedding),
        document_id: document_id.to_string(),
        owner_id: owner.to_string(),
        position: 0,
        token_count: None,
        // Old enough to stay clear of the recency boost
        created_at: Utc::now() - chrono::Duration::days(100),
        metadata: Map::new(),
    }
}

/// The four-chunk corpus behind most scenarios: keyword order [A, B, C],
/// semantic order (for query [1,0,0,0]) [B, D, A, C]
fn corpus() -> Vec<Chunk> {
    vec![
        chunk(
            "A",
            "doc-a",
            "alice",
            "refund policy refund policy refund policy",
            vec![0.6, 0.8, 0.0, 0.0],
        ),
        chunk(
            "B",
            "doc-b",
            "bob",
            "refund policy details summary",
            vec![1.0, 0.0, 0.0, 0.0],
        ),
        chunk(
            "C",
            "doc-c",
            "alice",
            "refund announcement",
            vec![0.0, 0.0, 1.0, 0.0],
        ),
        chunk(
            "D",
            "doc-d",
            "bob",
            "shipping rates information",
            vec![0.8, 0.6, 0.0, 0.0],
        ),
    ]
}

fn build_engine(
    config: Config,
    provider: Arc<dyn EmbeddingProvider>,
    chunks: Vec<Chunk>,
) -> HybridRetriever {
    let store = Arc::new(InMemoryChunkStore::new());
    let keyword_index = Arc::new(InMemoryKeywordIndex::new());
    let vector_index = Arc::new(HnswVectorIndex::new(4));

    for c in &chunks {
        store.insert(c.clone());
        keyword_index.insert(&c.id, &c.content).unwrap();
        vector_index.insert(c, NAMESPACE).unwrap();
    }

    HybridRetriever::new(config, provider, vector_index, keyword_index, store)
}

fn request(text: &str) -> RetrievalContext {
    let query = SearchQuery::new(text, NAMESPACE).with_top_k(3);
    RetrievalContext::new(query, "nobody", 2000).with_min_relevance(0.0)
}

fn citation_ids(ctx: &braid::AssembledContext) -> Vec<&str> {
    ctx.citations.iter().map(|c| c.chunk_id.as_str()).collect()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("braid=debug")
        .try_init();
}

#[tokio::test]
async fn test_hybrid_retrieval_end_to_end() {
    init_tracing();
    let provider = Arc::new(TableProvider::new(&[(
        "refund policy",
        vec![1.0, 0.0, 0.0, 0.0],
    )]));
    let engine = build_engine(Config::default(), provider, corpus());

    let assembled = engine.retrieve(request("refund policy")).await.unwrap();

    assert!(!assembled.citations.is_empty());
    assert!(assembled.citations.len() <= 3);
    assert!(!assembled.formatted_text.is_empty());
    assert_eq!(assembled.metadata["degraded"], serde_json::json!(false));
    assert!(assembled.token_count <= 2000);

    // Every citation's section shows up in the text
    for i in 1..=assembled.citations.len() {
        assert!(assembled.formatted_text.contains(&format!("[{}] ", i)));
    }
}

#[tokio::test]
async fn test_rrf_fusion_ranks_cross_branch_agreement_first() {
    let provider = Arc::new(TableProvider::new(&[(
        "refund policy",
        vec![1.0, 0.0, 0.0, 0.0],
    )]));
    let mut config = Config::default();
    // Pool of 3 per branch: keyword [A,B,C], semantic [B,D,A]
    config.retrieval.rerank_pool_size = 3;
    let engine = build_engine(config, provider, corpus());

    let query = SearchQuery::new("refund policy", NAMESPACE)
        .with_top_k(3)
        .with_algorithm(FusionAlgorithm::ReciprocalRank);
    let ctx = RetrievalContext::new(query, "nobody", 2000).with_min_relevance(0.0);

    let assembled = engine.retrieve(ctx).await.unwrap();

    // B appears near the top of both branches and must win; truncation to
    // top 3 leaves [B, A, D]
    assert_eq!(citation_ids(&assembled), vec!["B", "A", "D"]);
    assert_eq!(
        assembled.metadata["fusion_algorithm"],
        serde_json::json!("rrf")
    );
}

#[tokio::test]
async fn test_vector_timeout_degrades_to_keyword_only() {
    let mut config = Config::default();
    config.retrieval.branch_timeout_ms = 50;
    let engine = build_engine(config, Arc::new(SlowProvider), corpus());

    let assembled = engine.retrieve(request("refund policy")).await.unwrap();

    assert_eq!(assembled.metadata["degraded"], serde_json::json!(true));
    let recovered = assembled.metadata["recovered_errors"].to_string();
    assert!(recovered.contains("vector branch"));

    // Keyword-derived order survives: A tops lexical scoring
    let ids = citation_ids(&assembled);
    assert_eq!(ids.first(), Some(&"A"));
    // D matches no keyword and cannot appear without the vector branch
    assert!(!ids.contains(&"D"));
}

#[tokio::test]
async fn test_embedding_failure_degrades() {
    let engine = build_engine(Config::default(), Arc::new(FailingProvider), corpus());

    let assembled = engine.retrieve(request("refund policy")).await.unwrap();

    assert_eq!(assembled.metadata["degraded"], serde_json::json!(true));
    assert!(!assembled.citations.is_empty());
}

#[tokio::test]
async fn test_both_branches_down_is_unavailable() {
    let mut config = Config::default();
    config.retrieval.branch_timeout_ms = 50;

    let store = Arc::new(InMemoryChunkStore::new());
    let vector_index = Arc::new(HnswVectorIndex::new(4));
    let engine = HybridRetriever::new(
        config,
        Arc::new(FailingProvider),
        vector_index,
        Arc::new(StuckKeywordIndex),
        store,
    );

    let result = engine.retrieve(request("refund policy")).await;

    assert!(matches!(result, Err(RetrievalError::Unavailable(_))));
}

#[tokio::test]
async fn test_invalid_queries_rejected() {
    let provider = Arc::new(TableProvider::new(&[]));
    let engine = build_engine(Config::default(), provider, corpus());

    let empty = engine.retrieve(request("   ")).await;
    assert!(matches!(empty, Err(RetrievalError::InvalidQuery(_))));

    let long = "x".repeat(5000);
    let too_long = engine.retrieve(request(&long)).await;
    assert!(matches!(too_long, Err(RetrievalError::InvalidQuery(_))));

    let mut zero_k = request("refund policy");
    zero_k.query.top_k = 0;
    assert!(matches!(
        engine.retrieve(zero_k).await,
        Err(RetrievalError::InvalidQuery(_))
    ));

    let mut zero_budget = request("refund policy");
    zero_budget.max_tokens = 0;
    assert!(matches!(
        engine.retrieve(zero_budget).await,
        Err(RetrievalError::InvalidQuery(_))
    ));
}

#[tokio::test]
async fn test_keyword_only_mode_skips_embedding() {
    let provider = Arc::new(TableProvider::new(&[(
        "refund policy",
        vec![1.0, 0.0, 0.0, 0.0],
    )]));
    let provider_handle = Arc::clone(&provider);
    let engine = build_engine(Config::default(), provider, corpus());

    let mut ctx = request("refund policy");
    ctx.query.hybrid = false;

    let assembled = engine.retrieve(ctx).await.unwrap();

    // Single-path by choice is not degradation
    assert_eq!(assembled.metadata["degraded"], serde_json::json!(false));
    assert_eq!(assembled.metadata["hybrid"], serde_json::json!(false));
    assert_eq!(provider_handle.calls.load(Ordering::SeqCst), 0);
    assert!(!assembled.citations.is_empty());
}

#[tokio::test]
async fn test_filters_restrict_both_branches() {
    let provider = Arc::new(TableProvider::new(&[(
        "refund policy",
        vec![1.0, 0.0, 0.0, 0.0],
    )]));
    let engine = build_engine(Config::default(), provider, corpus());

    let query = SearchQuery::new("refund policy", NAMESPACE)
        .with_top_k(3)
        .with_filters(vec![ChunkFilter::ByOwner {
            id: "bob".to_string(),
        }]);
    let ctx = RetrievalContext::new(query, "nobody", 2000).with_min_relevance(0.0);

    let assembled = engine.retrieve(ctx).await.unwrap();

    assert!(!assembled.citations.is_empty());
    for citation in &assembled.citations {
        assert!(
            citation.chunk_id == "B" || citation.chunk_id == "D",
            "chunk {} is not owned by bob",
            citation.chunk_id
        );
    }
}

#[tokio::test]
async fn test_near_duplicates_collapse_to_higher_scored() {
    let base = "the refund policy covers unused items returned within thirty days of purchase";
    let near_dup = format!("{} always", base);

    let chunks = vec![
        chunk("X", "doc-x", "alice", base, vec![1.0, 0.0, 0.0, 0.0]),
        chunk("Y", "doc-y", "alice", &near_dup, vec![0.9, 0.1, 0.0, 0.0]),
        chunk(
            "Z",
            "doc-z",
            "alice",
            "shipping rates for international orders",
            vec![0.0, 1.0, 0.0, 0.0],
        ),
    ];

    let provider = Arc::new(TableProvider::new(&[(
        "refund policy",
        vec![1.0, 0.0, 0.0, 0.0],
    )]));
    let engine = build_engine(Config::default(), provider, chunks);

    let assembled = engine.retrieve(request("refund policy")).await.unwrap();

    let ids = citation_ids(&assembled);
    assert!(ids.contains(&"X"));
    assert!(!ids.contains(&"Y"), "near-duplicate of X must be dropped");
}

#[tokio::test]
async fn test_results_capped_at_top_k() {
    let provider = Arc::new(TableProvider::new(&[(
        "refund policy",
        vec![1.0, 0.0, 0.0, 0.0],
    )]));
    let engine = build_engine(Config::default(), provider, corpus());

    let mut ctx = request("refund policy");
    ctx.query.top_k = 2;

    let assembled = engine.retrieve(ctx).await.unwrap();
    assert!(assembled.citations.len() <= 2);
}
