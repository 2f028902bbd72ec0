/// Keyword index collaborator: postings and document-frequency statistics
///
/// The index exposes term statistics; lexical scoring itself (BM25) lives in
/// the retrieval layer. The in-memory implementation analyzes text with a
/// tantivy tokenizer chain: lowercase, English stopwords, Snowball stemming.
use ahash::{AHashMap, AHashSet};
use std::sync::RwLock;
use tantivy::tokenizer::{
    Language, LowerCaser, RemoveLongFilter, SimpleTokenizer, Stemmer, StopWordFilter,
    TextAnalyzer,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeywordIndexError {
    #[error("Insert failed: {0}")]
    InsertError(String),
}

/// Postings for one term
#[derive(Debug, Clone)]
pub struct TermPostings {
    /// Number of documents containing the term
    pub doc_freq: usize,
    /// (chunk_id, term frequency) pairs
    pub entries: Vec<(String, u32)>,
}

/// Tokenized postings and document statistics sufficient to compute BM25.
///
/// Read-only from the engine's perspective.
pub trait KeywordIndex: Send + Sync {
    /// Number of indexed documents
    fn doc_count(&self) -> usize;

    /// Mean document length in tokens
    fn avg_doc_len(&self) -> f32;

    /// Length in tokens of one document
    fn doc_len(&self, chunk_id: &str) -> Option<u32>;

    /// Postings for a term, or None if the term is not in the vocabulary
    fn postings(&self, term: &str) -> Option<TermPostings>;

    /// Surface-form term vocabulary (spell-correction dictionary source).
    ///
    /// Unstemmed, lowercased document tokens; postings keys are stemmed and
    /// would corrupt well-spelled query words if used for correction.
    fn vocabulary(&self) -> Vec<String>;

    /// Run query text through the same analyzer documents were indexed with
    fn analyze(&self, text: &str) -> Vec<String>;
}

#[derive(Default)]
struct IndexState {
    /// term -> chunk_id -> term frequency
    postings: AHashMap<String, AHashMap<String, u32>>,
    /// chunk_id -> document length in tokens
    doc_lens: AHashMap<String, u32>,
    total_len: u64,
    /// Unstemmed lowercased tokens seen across all documents
    surface_terms: AHashSet<String>,
}

/// English stop words removed before indexing and scoring
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in", "is",
    "it", "its", "of", "on", "that", "the", "to", "was", "will", "with", "or", "but", "not",
    "this", "these", "they", "them", "their", "there", "then", "than", "so", "if", "when",
    "where", "why", "how", "what", "which", "who", "whom", "whose", "can", "could", "should",
    "would", "may", "might", "must", "shall", "do", "does", "did", "have", "had", "having",
];

/// In-memory inverted index
pub struct InMemoryKeywordIndex {
    analyzer: TextAnalyzer,
    surface_analyzer: TextAnalyzer,
    state: RwLock<IndexState>,
}

impl InMemoryKeywordIndex {
    pub fn new() -> Self {
        let analyzer = TextAnalyzer::builder(SimpleTokenizer::default())
            .filter(RemoveLongFilter::limit(40))
            .filter(LowerCaser)
            .filter(StopWordFilter::remove(
                STOP_WORDS.iter().map(|s| s.to_string()),
            ))
            .filter(Stemmer::new(Language::English))
            .build();

        // Surface forms feed the spell dictionary; no stemming or stopword
        // removal here
        let surface_analyzer = TextAnalyzer::builder(SimpleTokenizer::default())
            .filter(RemoveLongFilter::limit(40))
            .filter(LowerCaser)
            .build();

        Self {
            analyzer,
            surface_analyzer,
            state: RwLock::new(IndexState::default()),
        }
    }

    /// Index a chunk's content under its ID.
    ///
    /// Re-indexing an existing ID is an error: chunks are immutable once
    /// indexed, replacement is an ingestion concern.
    pub fn insert(&self, chunk_id: &str, content: &str) -> Result<(), KeywordIndexError> {
        let tokens = self.analyze(content);
        let surface = run_analyzer(&self.surface_analyzer, content);

        let mut state = self.state.write().unwrap();
        if state.doc_lens.contains_key(chunk_id) {
            return Err(KeywordIndexError::InsertError(format!(
                "chunk {} already indexed",
                chunk_id
            )));
        }

        state.doc_lens.insert(chunk_id.to_string(), tokens.len() as u32);
        state.total_len += tokens.len() as u64;

        for token in tokens {
            *state
                .postings
                .entry(token)
                .or_default()
                .entry(chunk_id.to_string())
                .or_insert(0) += 1;
        }

        state.surface_terms.extend(surface);

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.state.read().unwrap().doc_lens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryKeywordIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl KeywordIndex for InMemoryKeywordIndex {
    fn doc_count(&self) -> usize {
        self.state.read().unwrap().doc_lens.len()
    }

    fn avg_doc_len(&self) -> f32 {
        let state = self.state.read().unwrap();
        if state.doc_lens.is_empty() {
            return 0.0;
        }
        state.total_len as f32 / state.doc_lens.len() as f32
    }

    fn doc_len(&self, chunk_id: &str) -> Option<u32> {
        self.state.read().unwrap().doc_lens.get(chunk_id).copied()
    }

    fn postings(&self, term: &str) -> Option<TermPostings> {
        let state = self.state.read().unwrap();
        state.postings.get(term).map(|docs| TermPostings {
            doc_freq: docs.len(),
            entries: docs.iter().map(|(id, tf)| (id.clone(), *tf)).collect(),
        })
    }

    fn vocabulary(&self) -> Vec<String> {
        self.state
            .read()
            .unwrap()
            .surface_terms
            .iter()
            .cloned()
            .collect()
    }

    fn analyze(&self, text: &str) -> Vec<String> {
        run_analyzer(&self.analyzer, text)
    }
}

fn run_analyzer(analyzer: &TextAnalyzer, text: &str) -> Vec<String> {
    let mut analyzer = analyzer.clone();
    let mut stream = analyzer.token_stream(text);
    let mut tokens = Vec::new();
    while let Some(token) = stream.next() {
        tokens.push(token.text.clone());
    }
    tokens
}
