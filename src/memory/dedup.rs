//! Duplicate detection for candidate facts
//!
//! Exact duplicates are case-insensitive content matches. Near-duplicates
//! combine a character-bigram Dice coefficient with the Jaccard overlap of
//! significant terms; the weights and threshold come from `DedupConfig`.
//! Records owned by a different identity are never compared.

use super::record::MemoryRecord;
use crate::config::DedupConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// How a duplicate was detected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateKind {
    /// Same content, ignoring case and surrounding whitespace
    Exact,
    /// Similarity at or above the configured threshold
    Semantic,
}

/// Outcome of a duplicate check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "verdict")]
pub enum DuplicateVerdict {
    /// No existing record matches
    Unique,
    /// The candidate repeats an existing record
    Duplicate {
        /// Id of the colliding record
        of: Uuid,
        /// Detection kind
        kind: DuplicateKind,
        /// Similarity score in [0, 1]
        score: f64,
    },
}

impl DuplicateVerdict {
    /// Whether this verdict rejects the candidate
    pub fn is_duplicate(&self) -> bool {
        matches!(self, DuplicateVerdict::Duplicate { .. })
    }
}

const STOP_WORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "am", "an", "and", "any", "are", "as", "at", "be",
    "been", "before", "being", "but", "by", "can", "could", "did", "do", "does", "for", "from",
    "had", "has", "have", "he", "her", "him", "his", "how", "i", "if", "in", "into", "is", "it",
    "its", "just", "me", "my", "myself", "no", "not", "of", "on", "or", "our", "she", "so",
    "some", "than", "that", "the", "their", "them", "then", "there", "these", "they", "this",
    "to", "too", "up", "us", "very", "was", "we", "were", "what", "when", "where", "which",
    "who", "will", "with", "would", "you", "your",
];

/// Exact and near-duplicate detector
#[derive(Debug, Clone)]
pub struct DuplicateDetector {
    config: DedupConfig,
}

impl DuplicateDetector {
    /// Create a detector with the given weights and threshold
    pub fn new(config: DedupConfig) -> Self {
        Self { config }
    }

    /// Active configuration
    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    /// Check `candidate` against the records of `identity` in `existing`
    pub fn check(
        &self,
        identity: &str,
        candidate: &str,
        existing: &[MemoryRecord],
    ) -> DuplicateVerdict {
        let owned: Vec<&MemoryRecord> =
            existing.iter().filter(|r| r.identity == identity).collect();

        let needle = candidate.trim().to_lowercase();
        if let Some(record) = owned
            .iter()
            .find(|r| r.content.trim().to_lowercase() == needle)
        {
            return DuplicateVerdict::Duplicate {
                of: record.id,
                kind: DuplicateKind::Exact,
                score: 1.0,
            };
        }

        let candidate_text = normalize(candidate);
        let candidate_bigrams = bigrams(&candidate_text);
        let candidate_terms = key_terms(candidate);

        let best = owned
            .iter()
            .map(|record| {
                let text = normalize(&record.content);
                let string_sim = dice(&candidate_bigrams, &bigrams(&text));
                let term_overlap = jaccard(&candidate_terms, &key_terms(&record.content));
                (record.id, self.weighted(string_sim, term_overlap))
            })
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        match best {
            Some((of, score)) if score >= self.config.threshold => DuplicateVerdict::Duplicate {
                of,
                kind: DuplicateKind::Semantic,
                score,
            },
            _ => DuplicateVerdict::Unique,
        }
    }

    /// Semantic score of two texts, ignoring identity and exact matching
    pub fn similarity(&self, a: &str, b: &str) -> f64 {
        let string_sim = dice(&bigrams(&normalize(a)), &bigrams(&normalize(b)));
        let term_overlap = jaccard(&key_terms(a), &key_terms(b));
        self.weighted(string_sim, term_overlap)
    }

    fn weighted(&self, string_sim: f64, term_overlap: f64) -> f64 {
        (self.config.string_weight * string_sim + self.config.term_weight * term_overlap)
            .clamp(0.0, 1.0)
    }
}

impl Default for DuplicateDetector {
    fn default() -> Self {
        Self::new(DedupConfig::default())
    }
}

/// Lowercase and collapse whitespace
fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn bigrams(text: &str) -> Vec<(char, char)> {
    let chars: Vec<char> = text.chars().collect();
    let mut pairs: Vec<(char, char)> = chars.windows(2).map(|w| (w[0], w[1])).collect();
    pairs.sort_unstable();
    pairs
}

/// Sørensen–Dice coefficient over sorted bigram multisets
fn dice(a: &[(char, char)], b: &[(char, char)]) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let (mut i, mut j, mut shared) = (0, 0, 0usize);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Equal => {
                shared += 1;
                i += 1;
                j += 1;
            }
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
        }
    }

    (2 * shared) as f64 / (a.len() + b.len()) as f64
}

/// Significant lowercase terms with stop-words removed
fn key_terms(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .map(|t| t.trim_matches('\''))
        .filter(|t| t.chars().count() >= 2 && !STOP_WORDS.contains(t))
        .map(str::to_string)
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}
