//! Post-fusion result shaping
//!
//! Fixed pipeline: relevance threshold, score boosting, diversity
//! de-duplication, truncation to top_k. Order matters: boosts apply only to
//! results that cleared the threshold, and the diversity walk sees the
//! boosted ordering.

use crate::chunk::Chunk;
use crate::config::RetrievalConfig;
use crate::retrieval::FusedResult;
use ahash::{AHashMap, AHashSet};
use chrono::{DateTime, Utc};

/// Post-processor over fused results
pub struct PostProcessor {
    config: RetrievalConfig,
}

impl PostProcessor {
    pub fn new(config: RetrievalConfig) -> Self {
        Self { config }
    }

    /// Run the full pipeline.
    ///
    /// `bounded` states whether fused scores are already in [0,1]; unbounded
    /// scores are min-max rescaled before thresholding. `chunks` holds the
    /// hydrated chunk per result ID (results without one were dropped
    /// earlier).
    pub fn process(
        &self,
        mut results: Vec<FusedResult>,
        chunks: &AHashMap<String, Chunk>,
        user_id: &str,
        min_relevance: f32,
        top_k: usize,
        bounded: bool,
        now: DateTime<Utc>,
    ) -> Vec<FusedResult> {
        if !bounded {
            rescale(&mut results);
        }

        // 1. Relevance threshold
        results.retain(|r| r.fused_score >= min_relevance);

        // 2. Multiplicative boosts, independent, all that match
        for r in &mut results {
            if let Some(chunk) = chunks.get(&r.chunk_id) {
                if chunk.age_days(now) < self.config.recency_days {
                    r.fused_score *= self.config.recency_boost;
                }
                if chunk.owner_id == user_id {
                    r.fused_score *= self.config.ownership_boost;
                }
                if chunk.is_high_quality() {
                    r.fused_score *= self.config.quality_boost;
                }
            }
        }
        results.sort_unstable_by(|a, b| {
            b.fused_score
                .partial_cmp(&a.fused_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });

        // 3. Greedy diversity walk: drop candidates too similar to anything
        //    already accepted
        let mut accepted: Vec<FusedResult> = Vec::with_capacity(results.len().min(top_k));
        for candidate in results {
            let too_similar = accepted.iter().any(|kept| {
                content_similarity(
                    chunks.get(&candidate.chunk_id),
                    chunks.get(&kept.chunk_id),
                    &candidate.content,
                    &kept.content,
                ) > self.config.diversity_threshold
            });
            if !too_similar {
                accepted.push(candidate);
            }
            // 4. Truncate to top_k
            if accepted.len() == top_k {
                break;
            }
        }

        for (i, r) in accepted.iter_mut().enumerate() {
            r.rank = i + 1;
        }
        accepted
    }
}

/// Min-max rescale fused scores to [0,1] in place.
///
/// Degenerate lists (single result, all scores equal) rescale to 1.0.
fn rescale(results: &mut [FusedResult]) {
    let min = results
        .iter()
        .map(|r| r.fused_score)
        .fold(f32::INFINITY, f32::min);
    let max = results
        .iter()
        .map(|r| r.fused_score)
        .fold(f32::NEG_INFINITY, f32::max);
    let span = max - min;

    for r in results {
        r.fused_score = if span <= f32::EPSILON {
            1.0
        } else {
            (r.fused_score - min) / span
        };
    }
}

/// Content similarity between two candidates: embedding cosine when both
/// chunks carry embeddings, token-set Jaccard otherwise.
fn content_similarity(
    a_chunk: Option<&Chunk>,
    b_chunk: Option<&Chunk>,
    a_content: &str,
    b_content: &str,
) -> f32 {
    if let (Some(a), Some(b)) = (a_chunk, b_chunk) {
        if let (Some(va), Some(vb)) = (a.embedding.as_ref(), b.embedding.as_ref()) {
            if va.len() == vb.len() && !va.is_empty() {
                return cosine_similarity(va, vb);
            }
        }
    }
    jaccard_similarity(a_content, b_content)
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

fn token_set(text: &str) -> AHashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

fn jaccard_similarity(a: &str, b: &str) -> f32 {
    let sa = token_set(a);
    let sb = token_set(b);
    if sa.is_empty() && sb.is_empty() {
        return 0.0;
    }
    let intersection = sa.intersection(&sb).count() as f32;
    let union = sa.union(&sb).count() as f32;
    intersection / union
}
