//! Text compression passes for budget overflow
//!
//! Applied in escalating order by the assembler: duplicate-sentence removal,
//! extractive sentence selection, then hard truncation as a last resort.

use crate::context::TokenCounter;
use ahash::AHashSet;
use regex::Regex;
use std::sync::OnceLock;

fn sentence_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"[^.!?]+[.!?]*\s*").ok())
        .as_ref()
}

/// Split text into sentences, terminators attached.
///
/// Falls back to the whole text as a single sentence if splitting is not
/// possible.
pub fn split_sentences(text: &str) -> Vec<String> {
    let Some(pattern) = sentence_pattern() else {
        return vec![text.to_string()];
    };

    let sentences: Vec<String> = pattern
        .find_iter(text)
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if sentences.is_empty() {
        vec![text.to_string()]
    } else {
        sentences
    }
}

/// Normalized identity of a sentence for duplicate detection
fn sentence_key(sentence: &str) -> String {
    sentence
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Remove sentences already seen in earlier texts.
///
/// `seen` carries normalized sentence keys across chunks so the first
/// occurrence (in display order) wins.
pub fn drop_duplicate_sentences(text: &str, seen: &mut AHashSet<String>) -> String {
    let mut kept = Vec::new();
    for sentence in split_sentences(text) {
        let key = sentence_key(&sentence);
        if key.is_empty() || seen.insert(key) {
            kept.push(sentence);
        }
    }
    kept.join(" ")
}

/// Keep only sentences sufficiently related to the query.
///
/// A sentence survives when it covers at least `cutoff` of the query terms.
pub fn extractive_filter(text: &str, query_terms: &[String], cutoff: f32) -> String {
    if query_terms.is_empty() {
        return text.to_string();
    }

    let terms: AHashSet<&str> = query_terms.iter().map(|t| t.as_str()).collect();
    let kept: Vec<String> = split_sentences(text)
        .into_iter()
        .filter(|sentence| {
            let lowered = sentence.to_lowercase();
            let covered = terms
                .iter()
                .filter(|t| lowered.contains(*t))
                .count();
            covered as f32 / terms.len() as f32 >= cutoff
        })
        .collect();

    kept.join(" ")
}

/// Hard-truncate text to at most `budget` tokens, cutting at word boundaries.
///
/// Returns the truncated text; empty if even the first word does not fit.
pub fn truncate_to_tokens(text: &str, budget: usize, counter: &TokenCounter) -> String {
    if budget == 0 {
        return String::new();
    }
    if counter.count(text) <= budget {
        return text.to_string();
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    // Binary search the longest word prefix that fits
    let (mut lo, mut hi) = (0usize, words.len());
    while lo < hi {
        let mid = (lo + hi + 1) / 2;
        let candidate = words[..mid].join(" ");
        if counter.count(&candidate) <= budget {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }

    words[..lo].join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_sentences() {
        let text = "First sentence. Second one! Third? Trailing without dot";
        let sentences = split_sentences(text);
        assert_eq!(sentences.len(), 4);
        assert_eq!(sentences[0], "First sentence.");
        assert_eq!(sentences[3], "Trailing without dot");
    }

    #[test]
    fn test_drop_duplicate_sentences_across_chunks() {
        let mut seen = AHashSet::new();

        let first = drop_duplicate_sentences(
            "Refunds take five days. Contact support for help.",
            &mut seen,
        );
        let second = drop_duplicate_sentences(
            "Refunds take five days. Shipping is free over fifty dollars.",
            &mut seen,
        );

        assert!(first.contains("Refunds take five days."));
        assert!(!second.contains("Refunds take five days."));
        assert!(second.contains("Shipping is free"));
    }

    #[test]
    fn test_duplicate_detection_ignores_case_and_punctuation() {
        let mut seen = AHashSet::new();
        drop_duplicate_sentences("Refunds take FIVE days!", &mut seen);
        let second = drop_duplicate_sentences("refunds take five days.", &mut seen);
        assert!(second.is_empty());
    }

    #[test]
    fn test_extractive_filter_keeps_relevant_sentences() {
        let text = "The refund policy covers unused items. The weather is nice today. \
                    Refund requests need an invoice number.";
        let terms = vec!["refund".to_string()];

        let kept = extractive_filter(text, &terms, 0.1);

        assert!(kept.contains("refund policy"));
        assert!(kept.contains("Refund requests"));
        assert!(!kept.contains("weather"));
    }

    #[test]
    fn test_extractive_filter_empty_terms_is_identity() {
        let text = "Anything at all.";
        assert_eq!(extractive_filter(text, &[], 0.1), text);
    }

    #[test]
    fn test_truncate_to_tokens_fits_budget() {
        let counter = TokenCounter::default();
        let text = "one two three four five six seven eight nine ten \
                    eleven twelve thirteen fourteen fifteen";

        for budget in [1, 3, 5, 8] {
            let truncated = truncate_to_tokens(text, budget, &counter);
            assert!(counter.count(&truncated) <= budget);
        }
    }

    #[test]
    fn test_truncate_noop_when_within_budget() {
        let counter = TokenCounter::default();
        let text = "short text";
        assert_eq!(truncate_to_tokens(text, 100, &counter), text);
    }

    #[test]
    fn test_truncate_zero_budget() {
        let counter = TokenCounter::default();
        assert_eq!(truncate_to_tokens("anything", 0, &counter), "");
    }
}
