//! Rank fusion: merge two branch rankings into one
//!
//! Four selectable strategies. Every strategy produces a list sorted
//! descending by fused score with ranks reassigned contiguously from 1, and
//! is deterministic: ties resolve to the lexicographically smaller chunk ID,
//! so re-running fusion on the same inputs yields identical output.

use crate::config::FusionConfig;
use crate::query::QueryIntent;
use crate::retrieval::{BranchResult, FusedResult};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// Rank-fusion strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionAlgorithm {
    /// Reciprocal Rank Fusion: score = Σ 1/(k + rank)
    ReciprocalRank,
    /// Min-max normalize raw scores per branch, then weighted sum
    CombSum,
    /// Borda count: score = Σ (N - rank), rank-based, scale-insensitive
    BordaCount,
    /// CombSum with weights steered by query intent
    #[default]
    Adaptive,
}

impl FusionAlgorithm {
    /// Whether fused scores are already bounded to [0,1].
    ///
    /// Unbounded strategies get min-max rescaled before relevance
    /// thresholding.
    pub fn is_bounded(&self) -> bool {
        matches!(self, FusionAlgorithm::CombSum | FusionAlgorithm::Adaptive)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FusionAlgorithm::ReciprocalRank => "rrf",
            FusionAlgorithm::CombSum => "comb_sum",
            FusionAlgorithm::BordaCount => "borda",
            FusionAlgorithm::Adaptive => "adaptive",
        }
    }
}

/// Which branch produced a pass-through result set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    Keyword,
    Semantic,
}

/// Candidate under fusion, before scoring
struct Candidate<'a> {
    keyword: Option<&'a BranchResult>,
    semantic: Option<&'a BranchResult>,
}

/// Rank fusion engine
#[derive(Debug, Clone)]
pub struct FusionEngine {
    /// RRF smoothing constant
    rrf_k: f32,
    /// CombSum semantic weight when intent gives no steer
    semantic_weight: f32,
    /// CombSum keyword weight when intent gives no steer
    keyword_weight: f32,
}

impl FusionEngine {
    pub fn new(config: &FusionConfig) -> Self {
        Self {
            rrf_k: config.rrf_k,
            semantic_weight: config.semantic_weight,
            keyword_weight: config.keyword_weight,
        }
    }

    /// Merge two branch rankings into one fused list
    pub fn fuse(
        &self,
        algorithm: FusionAlgorithm,
        keyword: &[BranchResult],
        semantic: &[BranchResult],
        intent: QueryIntent,
    ) -> Vec<FusedResult> {
        let mut candidates: AHashMap<&str, Candidate> = AHashMap::new();
        for r in keyword {
            candidates
                .entry(r.chunk_id.as_str())
                .or_insert(Candidate {
                    keyword: None,
                    semantic: None,
                })
                .keyword = Some(r);
        }
        for r in semantic {
            candidates
                .entry(r.chunk_id.as_str())
                .or_insert(Candidate {
                    keyword: None,
                    semantic: None,
                })
                .semantic = Some(r);
        }

        let kw_norm = minmax_normalizer(keyword);
        let sem_norm = minmax_normalizer(semantic);

        let (w_sem, w_kw) = match algorithm {
            FusionAlgorithm::Adaptive => intent_weights(intent),
            _ => normalized_weights(self.semantic_weight, self.keyword_weight),
        };

        let mut fused: Vec<FusedResult> = candidates
            .into_iter()
            .map(|(chunk_id, c)| {
                let fused_score = match algorithm {
                    FusionAlgorithm::ReciprocalRank => {
                        let kw = c.keyword.map_or(0.0, |r| 1.0 / (self.rrf_k + r.rank as f32));
                        let sem = c.semantic.map_or(0.0, |r| 1.0 / (self.rrf_k + r.rank as f32));
                        kw + sem
                    }
                    FusionAlgorithm::CombSum | FusionAlgorithm::Adaptive => {
                        let kw = c.keyword.map_or(0.0, |r| kw_norm(r.raw_score));
                        let sem = c.semantic.map_or(0.0, |r| sem_norm(r.raw_score));
                        w_kw * kw + w_sem * sem
                    }
                    FusionAlgorithm::BordaCount => {
                        let kw = c.keyword.map_or(0.0, |r| (keyword.len() - r.rank) as f32);
                        let sem = c.semantic.map_or(0.0, |r| (semantic.len() - r.rank) as f32);
                        kw + sem
                    }
                };

                let snippet = c
                    .semantic
                    .or(c.keyword)
                    .map(|r| r.content_snippet.clone())
                    .unwrap_or_default();

                FusedResult {
                    chunk_id: chunk_id.to_string(),
                    content: snippet,
                    semantic_score: c.semantic.map_or(0.0, |r| r.raw_score),
                    keyword_score: c.keyword.map_or(0.0, |r| r.raw_score),
                    fused_score,
                    rank: 0,
                }
            })
            .collect();

        sort_and_rank(&mut fused);
        fused
    }

    /// Identity fusion for degraded single-path mode: the surviving branch's
    /// order is preserved, its raw scores carried as fused scores.
    pub fn passthrough(&self, results: &[BranchResult], branch: Branch) -> Vec<FusedResult> {
        let mut fused: Vec<FusedResult> = results
            .iter()
            .map(|r| FusedResult {
                chunk_id: r.chunk_id.clone(),
                content: r.content_snippet.clone(),
                semantic_score: if branch == Branch::Semantic {
                    r.raw_score
                } else {
                    0.0
                },
                keyword_score: if branch == Branch::Keyword {
                    r.raw_score
                } else {
                    0.0
                },
                fused_score: r.raw_score,
                rank: 0,
            })
            .collect();

        sort_and_rank(&mut fused);
        fused
    }
}

/// Intent-steered CombSum weights: (semantic, keyword)
fn intent_weights(intent: QueryIntent) -> (f32, f32) {
    match intent {
        QueryIntent::ShortKeyword => (0.3, 0.7),
        QueryIntent::Factual => (0.5, 0.5),
        QueryIntent::Exploratory => (0.7, 0.3),
    }
}

fn normalized_weights(semantic: f32, keyword: f32) -> (f32, f32) {
    let total = semantic + keyword;
    if total <= 0.0 {
        return (0.5, 0.5);
    }
    (semantic / total, keyword / total)
}

/// Min-max normalization of one branch's raw scores to [0,1].
///
/// Degenerate branches (single candidate, or all scores equal) map to 1.0.
fn minmax_normalizer(results: &[BranchResult]) -> impl Fn(f32) -> f32 {
    let min = results
        .iter()
        .map(|r| r.raw_score)
        .fold(f32::INFINITY, f32::min);
    let max = results
        .iter()
        .map(|r| r.raw_score)
        .fold(f32::NEG_INFINITY, f32::max);
    let span = max - min;

    move |score: f32| {
        if span <= f32::EPSILON {
            1.0
        } else {
            (score - min) / span
        }
    }
}

/// Sort descending by fused score (chunk-id tie-break) and assign contiguous
/// 1-based ranks
fn sort_and_rank(results: &mut [FusedResult]) {
    results.sort_unstable_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    for (i, r) in results.iter_mut().enumerate() {
        r.rank = i + 1;
    }
}
