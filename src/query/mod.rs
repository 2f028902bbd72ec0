//! Query enhancement: normalization, spell correction, synonym expansion
//! and coarse intent classification
//!
//! Intent steers fusion weighting downstream. Enhancement never fails hard:
//! anything unexpected falls back to the original text with the safe
//! `Exploratory` intent.

use ahash::AHashSet;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Maximum edit distance for a spell correction to apply
const MAX_EDIT_DISTANCE: usize = 2;

/// Tokens shorter than this are never spell-corrected
const MIN_CORRECTION_LEN: usize = 4;

/// Coarse query intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    /// One or two bare keywords; lexical match dominates
    ShortKeyword,
    /// A direct question; both paths carry equal weight
    Factual,
    /// Open-ended phrasing; semantic match dominates
    Exploratory,
}

impl QueryIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryIntent::ShortKeyword => "short_keyword",
            QueryIntent::Factual => "factual",
            QueryIntent::Exploratory => "exploratory",
        }
    }
}

/// An enhanced query ready for both search branches
#[derive(Debug, Clone, PartialEq)]
pub struct EnhancedQuery {
    /// Normalized, spell-corrected text (embedded by the vector branch)
    pub text: String,
    /// Classified intent
    pub intent: QueryIntent,
    /// Query tokens including synonym expansions (scored by the keyword branch)
    pub tokens: Vec<String>,
}

/// Query enhancer over a term dictionary derived from the keyword index
/// vocabulary.
///
/// Pure: no shared state is touched during `enhance`.
pub struct QueryEnhancer {
    dictionary: AHashSet<String>,
    synonyms: Vec<(String, Vec<String>)>,
}

fn word_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[a-z0-9]+").ok()).as_ref()
}

/// Interrogative lead-ins marking a factual query
const INTERROGATIVES: &[&str] = &[
    "what", "who", "whom", "when", "where", "why", "how", "which", "is", "are", "was", "were",
    "does", "do", "did", "can", "could", "should",
];

/// Built-in synonym table; extended per deployment via `with_synonyms`
const BUILTIN_SYNONYMS: &[(&str, &[&str])] = &[
    ("error", &["failure", "fault"]),
    ("delete", &["remove"]),
    ("config", &["configuration", "settings"]),
    ("doc", &["document"]),
    ("auth", &["authentication"]),
    ("perf", &["performance"]),
];

impl QueryEnhancer {
    /// Build an enhancer whose spell dictionary is the given index vocabulary
    pub fn from_vocabulary(vocabulary: impl IntoIterator<Item = String>) -> Self {
        let synonyms = BUILTIN_SYNONYMS
            .iter()
            .map(|(term, subs)| {
                (
                    term.to_string(),
                    subs.iter().map(|s| s.to_string()).collect(),
                )
            })
            .collect();

        Self {
            dictionary: vocabulary.into_iter().collect(),
            synonyms,
        }
    }

    /// Add deployment-specific synonym entries
    pub fn with_synonyms(mut self, extra: Vec<(String, Vec<String>)>) -> Self {
        self.synonyms.extend(extra);
        self
    }

    /// Enhance a raw query.
    ///
    /// Never fails: if anything inside goes sideways, returns the raw text
    /// unmodified with `Exploratory` intent.
    pub fn enhance(&self, raw_text: &str) -> EnhancedQuery {
        self.try_enhance(raw_text).unwrap_or_else(|| EnhancedQuery {
            text: raw_text.to_string(),
            intent: QueryIntent::Exploratory,
            tokens: raw_text
                .split_whitespace()
                .map(|w| w.to_lowercase())
                .collect(),
        })
    }

    fn try_enhance(&self, raw_text: &str) -> Option<EnhancedQuery> {
        let pattern = word_pattern()?;

        let normalized = normalize(raw_text);
        let is_question = raw_text.trim_end().ends_with('?');

        let words: Vec<String> = pattern
            .find_iter(&normalized)
            .map(|m| m.as_str().to_string())
            .collect();
        if words.is_empty() {
            return None;
        }

        // Spell-correct each word against the index vocabulary
        let corrected: Vec<String> = words
            .iter()
            .map(|w| self.correct(w).unwrap_or_else(|| w.clone()))
            .collect();

        let intent = classify_intent(&corrected, is_question);

        // Synonym expansions only widen the keyword token set; the embedded
        // text stays what the user asked
        let mut tokens = corrected.clone();
        let existing: AHashSet<&String> = corrected.iter().collect();
        for word in &corrected {
            for (term, subs) in &self.synonyms {
                if term == word {
                    tokens.extend(
                        subs.iter()
                            .filter(|s| !existing.contains(s))
                            .cloned(),
                    );
                }
            }
        }

        Some(EnhancedQuery {
            text: corrected.join(" "),
            intent,
            tokens,
        })
    }

    /// Find a vocabulary term within the edit-distance bound, or None.
    ///
    /// Words already in the vocabulary are left alone.
    fn correct(&self, word: &str) -> Option<String> {
        if word.len() < MIN_CORRECTION_LEN || self.dictionary.contains(word) {
            return None;
        }

        let mut best: Option<(usize, &String)> = None;
        for term in &self.dictionary {
            // Length difference is a lower bound on edit distance
            if term.len().abs_diff(word.len()) > MAX_EDIT_DISTANCE {
                continue;
            }
            let d = edit_distance(word, term);
            if d <= MAX_EDIT_DISTANCE {
                match best {
                    // Ties resolve to the lexicographically smaller term so
                    // correction is deterministic across runs
                    Some((bd, bt)) if d > bd || (d == bd && term >= bt) => {}
                    _ => best = Some((d, term)),
                }
            }
        }

        best.map(|(_, term)| term.clone())
    }
}

/// Lowercase and collapse whitespace
fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn classify_intent(words: &[String], is_question: bool) -> QueryIntent {
    let interrogative_lead = words
        .first()
        .map(|w| INTERROGATIVES.contains(&w.as_str()))
        .unwrap_or(false);

    if interrogative_lead || is_question {
        QueryIntent::Factual
    } else if words.len() <= 2 {
        QueryIntent::ShortKeyword
    } else {
        QueryIntent::Exploratory
    }
}

/// Levenshtein distance, single-row dynamic programming
fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.iter().enumerate() {
        let mut prev_diag = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            let next = (prev_diag + cost).min(row[j] + 1).min(row[j + 1] + 1);
            prev_diag = row[j + 1];
            row[j + 1] = next;
        }
    }

    row[b.len()]
}
