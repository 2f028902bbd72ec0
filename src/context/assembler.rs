//! Context assembly: budget allocation, compression, reordering, formatting
//!
//! The caller's `max_tokens` splits into prompt / context / response shares;
//! the context share is this component's hard output ceiling. When selected
//! chunks overflow it, compression passes escalate: duplicate-sentence
//! removal, extractive selection, then dropping and hard-truncating the
//! lowest-ranked chunks. A request never comes back with more tokens than its
//! budget, and never loses its last citation to compression.

use crate::chunk::Chunk;
use crate::config::AssemblyConfig;
use crate::context::compress::{
    drop_duplicate_sentences, extractive_filter, truncate_to_tokens,
};
use crate::context::{AssembledContext, Citation, ReorderStrategy, TokenCounter};
use crate::retrieval::FusedResult;
use ahash::AHashSet;
use serde_json::{Map, Value};

/// One accepted result on its way into the formatted block
struct Piece {
    result: FusedResult,
    chunk: Chunk,
    text: String,
}

/// Context assembler
pub struct ContextAssembler {
    counter: TokenCounter,
    config: AssemblyConfig,
}

impl ContextAssembler {
    pub fn new(config: AssemblyConfig) -> Self {
        let counter = TokenCounter::new(&config.tokenizer, config.token_cache_capacity);
        Self { counter, config }
    }

    /// The hard ceiling for assembled context, given the caller's budget
    pub fn context_budget(&self, max_tokens: usize) -> usize {
        (max_tokens as f32 * self.config.context_share) as usize
    }

    /// Assemble post-processed results into the final context block.
    ///
    /// `results` arrive in fused rank order with their hydrated chunks;
    /// `query_terms` drive extractive compression; `metadata` carries the
    /// request-level flags recorded by the engine.
    pub fn assemble(
        &self,
        cache_key: &str,
        query_terms: &[String],
        results: Vec<(FusedResult, Chunk)>,
        max_tokens: usize,
        reorder: ReorderStrategy,
        mut metadata: Map<String, Value>,
    ) -> AssembledContext {
        let budget = self.context_budget(max_tokens);

        let mut pieces: Vec<Piece> = results
            .into_iter()
            .map(|(result, chunk)| {
                let text = chunk.content.clone();
                Piece { result, chunk, text }
            })
            .collect();

        reorder_pieces(&mut pieces, reorder);

        // Warm the per-chunk count cache while texts are still pristine
        for p in &pieces {
            self.counter.count_cached(&p.chunk.id, &p.text);
        }

        let mut compressed = false;
        if !pieces.is_empty() && budget > 0 && self.render_count(&pieces) > budget {
            compressed = true;
            self.compress(&mut pieces, query_terms, budget);
        }

        if budget == 0 {
            pieces.clear();
        }

        let formatted_text = render(&pieces);
        let token_count = if formatted_text.is_empty() {
            0
        } else {
            self.counter.count(&formatted_text)
        };

        let citations = pieces
            .iter()
            .map(|p| Citation {
                chunk_id: p.chunk.id.clone(),
                document_id: p.chunk.document_id.clone(),
                position: p.chunk.position,
                score: p.result.fused_score,
            })
            .collect();

        metadata.insert("compressed".to_string(), Value::Bool(compressed));
        metadata.insert(
            "result_count".to_string(),
            Value::Number(pieces.len().into()),
        );

        AssembledContext {
            formatted_text,
            citations,
            token_count,
            cache_key: cache_key.to_string(),
            metadata,
        }
    }

    fn render_count(&self, pieces: &[Piece]) -> usize {
        if pieces.is_empty() {
            return 0;
        }
        self.counter.count(&render(pieces))
    }

    /// Escalating compression until the rendered block fits `budget`
    fn compress(&self, pieces: &mut Vec<Piece>, query_terms: &[String], budget: usize) {
        // (a) drop exact duplicate sentences across chunks, first occurrence
        //     in display order wins
        let mut seen = AHashSet::new();
        for p in pieces.iter_mut() {
            p.text = drop_duplicate_sentences(&p.text, &mut seen);
        }
        pieces.retain(|p| !p.text.is_empty());
        if self.render_count(pieces) <= budget {
            return;
        }

        // (b) extractive selection: keep sentences related to the query
        for p in pieces.iter_mut() {
            let kept = extractive_filter(&p.text, query_terms, self.config.extractive_cutoff);
            // A chunk that matched retrieval but has no qualifying sentence
            // keeps its first sentence rather than vanishing silently
            if kept.is_empty() {
                p.text = first_sentence(&p.text);
            } else {
                p.text = kept;
            }
        }
        if self.render_count(pieces) <= budget {
            return;
        }

        // (c) hard truncation: shed lowest-scored chunks, never the last one
        while pieces.len() > 1 && self.render_count(pieces) > budget {
            let (drop_idx, _) = pieces
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| {
                    a.result
                        .fused_score
                        .partial_cmp(&b.result.fused_score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|(i, p)| (i, p.result.fused_score))
                .unwrap_or((0, 0.0));
            pieces.remove(drop_idx);
        }

        // Down to one chunk: cut its text to whatever still fits
        if !pieces.is_empty() && self.render_count(pieces) > budget {
            let overhead = self.counter.count("[1] ");
            let text_budget = budget.saturating_sub(overhead);
            pieces[0].text = truncate_to_tokens(&pieces[0].text, text_budget, &self.counter);

            // Tokenization is not perfectly additive across concatenation;
            // trim trailing words until the rendered block fits
            while !pieces[0].text.is_empty() && self.render_count(pieces) > budget {
                let trimmed = match pieces[0].text.rsplit_once(char::is_whitespace) {
                    Some((head, _)) => head.trim_end().to_string(),
                    None => String::new(),
                };
                pieces[0].text = trimmed;
            }
            pieces.retain(|p| !p.text.is_empty());
        }
    }
}

/// Render pieces as numbered sections separated by blank lines
fn render(pieces: &[Piece]) -> String {
    pieces
        .iter()
        .enumerate()
        .map(|(i, p)| format!("[{}] {}", i + 1, p.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn first_sentence(text: &str) -> String {
    crate::context::compress::split_sentences(text)
        .into_iter()
        .next()
        .unwrap_or_default()
}

fn reorder_pieces(pieces: &mut Vec<Piece>, strategy: ReorderStrategy) {
    match strategy {
        ReorderStrategy::RelevanceFirst => {
            // Already in fused rank order
        }
        ReorderStrategy::Chronological => {
            pieces.sort_by(|a, b| {
                a.chunk
                    .position
                    .cmp(&b.chunk.position)
                    .then_with(|| a.chunk.id.cmp(&b.chunk.id))
            });
        }
        ReorderStrategy::DiversityInterleave => {
            // Round-robin across documents, preserving relevance order
            // within each document
            let mut groups: Vec<(String, Vec<Piece>)> = Vec::new();
            for piece in pieces.drain(..) {
                match groups
                    .iter_mut()
                    .find(|(doc, _)| *doc == piece.chunk.document_id)
                {
                    Some((_, group)) => group.push(piece),
                    None => groups.push((piece.chunk.document_id.clone(), vec![piece])),
                }
            }
            let mut interleaved = Vec::new();
            let mut cursor = 0;
            while groups.iter().any(|(_, g)| !g.is_empty()) {
                let idx = cursor % groups.len();
                let (_, group) = &mut groups[idx];
                if !group.is_empty() {
                    interleaved.push(group.remove(0));
                }
                cursor += 1;
            }
            *pieces = interleaved;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn chunk(id: &str, document_id: &str, position: u32, content: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            content: content.to_string(),
            embedding: None,
            document_id: document_id.to_string(),
            owner_id: "owner".to_string(),
            position,
            token_count: None,
            created_at: Utc::now(),
            metadata: Map::new(),
        }
    }

    fn result(id: &str, rank: usize, score: f32) -> FusedResult {
        FusedResult {
            chunk_id: id.to_string(),
            content: String::new(),
            semantic_score: 0.0,
            keyword_score: 0.0,
            fused_score: score,
            rank,
        }
    }

    fn assembler() -> ContextAssembler {
        ContextAssembler::new(AssemblyConfig::default())
    }

    fn terms(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_within_budget_untouched() {
        let a = assembler();
        let results = vec![
            (
                result("c1", 1, 0.9),
                chunk("c1", "d1", 0, "Refunds take five days."),
            ),
            (
                result("c2", 2, 0.8),
                chunk("c2", "d2", 0, "Invoices are emailed monthly."),
            ),
        ];

        let ctx = a.assemble(
            "key",
            &terms(&["refund"]),
            results,
            4000,
            ReorderStrategy::RelevanceFirst,
            Map::new(),
        );

        assert!(ctx.formatted_text.contains("[1] Refunds take five days."));
        assert!(ctx.formatted_text.contains("[2] Invoices are emailed monthly."));
        assert_eq!(ctx.citations.len(), 2);
        assert_eq!(ctx.metadata["compressed"], Value::Bool(false));
        assert!(ctx.token_count <= a.context_budget(4000));
    }

    #[test]
    fn test_token_count_never_exceeds_budget() {
        let a = assembler();
        let long: String = "The refund policy covers unused items in original packaging. "
            .repeat(80);

        for max_tokens in [20, 60, 200, 1000] {
            let results = vec![
                (result("c1", 1, 0.9), chunk("c1", "d1", 0, &long)),
                (result("c2", 2, 0.8), chunk("c2", "d2", 0, &long)),
                (result("c3", 3, 0.7), chunk("c3", "d3", 0, &long)),
            ];
            let ctx = a.assemble(
                "key",
                &terms(&["refund"]),
                results,
                max_tokens,
                ReorderStrategy::RelevanceFirst,
                Map::new(),
            );

            assert!(
                ctx.token_count <= max_tokens,
                "token_count {} > max_tokens {}",
                ctx.token_count,
                max_tokens
            );
        }
    }

    #[test]
    fn test_duplicate_sentences_removed_once_over_budget() {
        let a = assembler();
        let shared = "Refunds take five business days to process after approval. ";
        let filler = "Each return needs a printed label from the support portal. ";
        let c1_text = format!("{}{}", shared, filler.repeat(30));
        let c2_text = format!("{}{}", shared, "Gift cards cannot be refunded at all. ".repeat(30));

        let results = vec![
            (result("c1", 1, 0.9), chunk("c1", "d1", 0, &c1_text)),
            (result("c2", 2, 0.8), chunk("c2", "d2", 0, &c2_text)),
        ];

        let ctx = a.assemble(
            "key",
            &terms(&["refund", "label", "gift"]),
            results,
            500,
            ReorderStrategy::RelevanceFirst,
            Map::new(),
        );

        let occurrences = ctx
            .formatted_text
            .matches("Refunds take five business days")
            .count();
        assert_eq!(occurrences, 1);
        assert_eq!(ctx.metadata["compressed"], Value::Bool(true));
    }

    #[test]
    fn test_compression_keeps_at_least_one_citation() {
        let a = assembler();
        let long = "word ".repeat(5000);
        let results = vec![
            (result("c1", 1, 0.9), chunk("c1", "d1", 0, &long)),
            (result("c2", 2, 0.8), chunk("c2", "d2", 0, &long)),
        ];

        let ctx = a.assemble(
            "key",
            &terms(&["refund"]),
            results,
            40,
            ReorderStrategy::RelevanceFirst,
            Map::new(),
        );

        assert_eq!(ctx.citations.len(), 1);
        assert_eq!(ctx.citations[0].chunk_id, "c1");
        assert!(ctx.token_count <= 40);
        assert!(ctx.token_count > 0);
    }

    #[test]
    fn test_chronological_reorder() {
        let a = assembler();
        let results = vec![
            (result("c2", 1, 0.9), chunk("c2", "d1", 5, "Later section.")),
            (result("c1", 2, 0.8), chunk("c1", "d1", 1, "Earlier section.")),
        ];

        let ctx = a.assemble(
            "key",
            &[],
            results,
            4000,
            ReorderStrategy::Chronological,
            Map::new(),
        );

        assert!(ctx.formatted_text.contains("[1] Earlier section."));
        assert!(ctx.formatted_text.contains("[2] Later section."));
        assert_eq!(ctx.citations[0].chunk_id, "c1");
    }

    #[test]
    fn test_diversity_interleave_alternates_documents() {
        let a = assembler();
        let results = vec![
            (result("a1", 1, 0.9), chunk("a1", "doc-a", 0, "A one.")),
            (result("a2", 2, 0.8), chunk("a2", "doc-a", 1, "A two.")),
            (result("b1", 3, 0.7), chunk("b1", "doc-b", 0, "B one.")),
        ];

        let ctx = a.assemble(
            "key",
            &[],
            results,
            4000,
            ReorderStrategy::DiversityInterleave,
            Map::new(),
        );

        let order: Vec<&str> = ctx.citations.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(order, vec!["a1", "b1", "a2"]);
    }

    #[test]
    fn test_empty_results() {
        let a = assembler();
        let ctx = a.assemble(
            "key",
            &[],
            Vec::new(),
            4000,
            ReorderStrategy::RelevanceFirst,
            Map::new(),
        );

        assert!(ctx.formatted_text.is_empty());
        assert!(ctx.citations.is_empty());
        assert_eq!(ctx.token_count, 0);
    }

    #[test]
    fn test_every_citation_present_in_text() {
        let a = assembler();
        let long = "Refund details repeated here for testing purposes only. ".repeat(40);
        let results = vec![
            (result("c1", 1, 0.9), chunk("c1", "d1", 0, &long)),
            (
                result("c2", 2, 0.8),
                chunk("c2", "d2", 0, "Shipping is free over fifty dollars."),
            ),
        ];

        let ctx = a.assemble(
            "key",
            &terms(&["refund", "shipping"]),
            results,
            600,
            ReorderStrategy::RelevanceFirst,
            Map::new(),
        );

        // One numbered section per citation
        for i in 1..=ctx.citations.len() {
            assert!(ctx.formatted_text.contains(&format!("[{}] ", i)));
        }
    }
}
