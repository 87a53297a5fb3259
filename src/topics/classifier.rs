//! Rule-based topic classifier
//!
//! Every rule term is compiled once into a case-insensitive, word-bounded
//! regex. Classification only reads the compiled table, so identical input
//! always yields identical labels.

use super::rules::{TopicRule, UNCLASSIFIED};
use crate::error::{Error, Result};
use regex::Regex;
use std::collections::{BTreeSet, HashSet};

/// Default weight of a phrase hit (keywords weigh 1)
pub const DEFAULT_PHRASE_WEIGHT: u32 = 2;

/// Score of a single label for a piece of text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicScore {
    /// Topic label
    pub label: String,
    /// Weighted hit count
    pub score: u32,
    /// Number of keyword hits
    pub keyword_hits: u32,
    /// Number of phrase hits
    pub phrase_hits: u32,
}

/// Keyword/phrase topic classifier
#[derive(Debug)]
pub struct RuleClassifier {
    rules: Vec<CompiledRule>,
    phrase_weight: u32,
}

#[derive(Debug)]
struct CompiledRule {
    label: String,
    keywords: Vec<Regex>,
    phrases: Vec<Regex>,
}

impl RuleClassifier {
    /// Create a classifier from a rule table
    pub fn new(rules: Vec<TopicRule>, phrase_weight: u32) -> Result<Self> {
        if phrase_weight == 0 {
            return Err(Error::Config(
                "phrase_weight must be at least 1".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let compiled_rules = rules
            .into_iter()
            .map(|rule| {
                let label = rule.label.trim().to_string();
                if label.is_empty() {
                    return Err(Error::Config("topic rule with empty label".to_string()));
                }
                if !seen.insert(label.clone()) {
                    return Err(Error::Config(format!("duplicate topic rule '{}'", label)));
                }

                Ok(CompiledRule {
                    keywords: compile_terms(&label, &rule.keywords)?,
                    phrases: compile_terms(&label, &rule.phrases)?,
                    label,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            rules: compiled_rules,
            phrase_weight,
        })
    }

    /// Classify text into one or more labels, falling back to `unclassified`
    pub fn classify(&self, text: &str) -> BTreeSet<String> {
        let labels: BTreeSet<String> = self
            .classify_scored(text)
            .into_iter()
            .map(|s| s.label)
            .collect();

        if labels.is_empty() {
            BTreeSet::from([UNCLASSIFIED.to_string()])
        } else {
            labels
        }
    }

    /// Score every matching label, highest score first then by label
    pub fn classify_scored(&self, text: &str) -> Vec<TopicScore> {
        let mut scores: Vec<TopicScore> = self
            .rules
            .iter()
            .filter_map(|rule| {
                let keyword_hits = count_hits(&rule.keywords, text);
                let phrase_hits = count_hits(&rule.phrases, text);
                let score = keyword_hits + phrase_hits * self.phrase_weight;
                (score > 0).then(|| TopicScore {
                    label: rule.label.clone(),
                    score,
                    keyword_hits,
                    phrase_hits,
                })
            })
            .collect();

        scores.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.label.cmp(&b.label)));
        scores
    }

    /// Weight applied to phrase hits
    pub fn phrase_weight(&self) -> u32 {
        self.phrase_weight
    }
}

fn count_hits(patterns: &[Regex], text: &str) -> u32 {
    patterns
        .iter()
        .map(|p| p.find_iter(text).count() as u32)
        .sum()
}

fn compile_terms(label: &str, terms: &[String]) -> Result<Vec<Regex>> {
    terms
        .iter()
        .filter(|t| !t.trim().is_empty())
        .map(|term| {
            Regex::new(&term_pattern(term)).map_err(|e| {
                Error::Config(format!(
                    "Invalid term '{}' for topic rule '{}': {}",
                    term, label, e
                ))
            })
        })
        .collect()
}

/// Build `(?i)\bword\s+word\b`, skipping a boundary next to non-word characters
fn term_pattern(term: &str) -> String {
    let words: Vec<String> = term.split_whitespace().map(regex::escape).collect();
    let body = words.join(r"\s+");
    let trimmed = term.trim();

    let starts_word = trimmed
        .chars()
        .next()
        .is_some_and(|c| c.is_alphanumeric() || c == '_');
    let ends_word = trimmed
        .chars()
        .last()
        .is_some_and(|c| c.is_alphanumeric() || c == '_');

    format!(
        "(?i){}{}{}",
        if starts_word { r"\b" } else { "" },
        body,
        if ends_word { r"\b" } else { "" }
    )
}
