//! BM25 lexical scoring over keyword-index postings

use crate::embedding::KeywordIndex;
use ahash::{AHashMap, AHashSet};

/// Term-frequency saturation parameter
pub const BM25_K1: f32 = 1.2;

/// Document-length normalization parameter
pub const BM25_B: f32 = 0.75;

/// Score every chunk matching at least one query term.
///
/// Terms must already be analyzed (stemmed, stopword-free). Returns
/// (chunk_id, score) pairs sorted by score descending, ties broken by the
/// lexicographically smaller chunk ID so ranking is deterministic.
pub fn bm25_scores(index: &dyn KeywordIndex, terms: &[String]) -> Vec<(String, f32)> {
    let doc_count = index.doc_count();
    if doc_count == 0 || terms.is_empty() {
        return Vec::new();
    }

    let avg_doc_len = index.avg_doc_len().max(1.0);
    let n = doc_count as f32;

    let unique: AHashSet<&String> = terms.iter().collect();
    let mut scores: AHashMap<String, f32> = AHashMap::new();

    for term in unique {
        let Some(postings) = index.postings(term) else {
            continue;
        };

        let df = postings.doc_freq as f32;
        // Lucene-style smoothed IDF, always positive
        let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();

        for (chunk_id, tf) in postings.entries {
            let doc_len = index.doc_len(&chunk_id).unwrap_or(0) as f32;
            let tf = tf as f32;
            let norm = BM25_K1 * (1.0 - BM25_B + BM25_B * doc_len / avg_doc_len);
            let term_score = idf * (tf * (BM25_K1 + 1.0)) / (tf + norm);

            *scores.entry(chunk_id).or_insert(0.0) += term_score;
        }
    }

    let mut ranked: Vec<(String, f32)> = scores.into_iter().collect();
    ranked.sort_unstable_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });

    ranked
}
