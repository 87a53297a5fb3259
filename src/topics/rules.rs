//! Topic rule table
//!
//! A rule maps a topic label to single-word keywords (weight 1 each) and
//! multi-word phrases (weighted by the classifier's phrase weight).

use serde::{Deserialize, Serialize};

/// Label returned when no rule matches
pub const UNCLASSIFIED: &str = "unclassified";

/// A single topic rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicRule {
    /// Topic label attached to matching text
    pub label: String,

    /// Keywords, matched on word boundaries
    #[serde(default)]
    pub keywords: Vec<String>,

    /// Multi-word phrases, matched on word boundaries with flexible spacing
    #[serde(default)]
    pub phrases: Vec<String>,
}

impl TopicRule {
    /// Create an empty rule for a label
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            keywords: Vec::new(),
            phrases: Vec::new(),
        }
    }

    /// Add a keyword
    pub fn keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keywords.push(keyword.into());
        self
    }

    /// Add several keywords
    pub fn keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords.extend(keywords.into_iter().map(Into::into));
        self
    }

    /// Add a phrase
    pub fn phrase(mut self, phrase: impl Into<String>) -> Self {
        self.phrases.push(phrase.into());
        self
    }
}

fn rule(label: &str, keywords: &[&str], phrases: &[&str]) -> TopicRule {
    TopicRule {
        label: label.to_string(),
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        phrases: phrases.iter().map(|p| p.to_string()).collect(),
    }
}

/// Built-in rule table for personal facts
pub fn default_topic_rules() -> Vec<TopicRule> {
    vec![
        rule(
            "pets",
            &[
                "pet", "pets", "dog", "dogs", "cat", "cats", "puppy", "kitten", "hamster",
                "parrot", "rabbit", "vet",
            ],
            &["pet dog", "pet cat", "my dog", "my cat"],
        ),
        rule(
            "family",
            &[
                "mother", "father", "mom", "dad", "sister", "brother", "son", "daughter",
                "wife", "husband", "parents", "grandmother", "grandfather", "cousin",
            ],
            &["my family", "my kids", "my children"],
        ),
        rule(
            "relationships",
            &["friend", "friends", "girlfriend", "boyfriend", "partner", "roommate"],
            &["friend named", "best friend", "dating someone"],
        ),
        rule(
            "work",
            &[
                "job", "work", "works", "office", "manager", "colleague", "coworker",
                "career", "salary", "employer",
            ],
            &["work as", "work at", "works at", "my boss"],
        ),
        rule(
            "health",
            &[
                "allergic", "allergy", "doctor", "medication", "diet", "vegetarian", "vegan",
                "exercise", "injury", "diabetes",
            ],
            &["allergic to", "blood type"],
        ),
        rule(
            "food",
            &[
                "food", "eat", "eating", "cook", "cooking", "pizza", "coffee", "tea",
                "restaurant", "cuisine",
            ],
            &["favorite food", "favourite food", "likes to eat"],
        ),
        rule(
            "hobbies",
            &[
                "hobby", "hobbies", "guitar", "piano", "painting", "reading", "hiking",
                "gaming", "chess", "photography",
            ],
            &["in my free time", "for fun"],
        ),
        rule(
            "location",
            &["live", "lives", "moved", "city", "country", "hometown", "address"],
            &["live in", "born in", "moved to"],
        ),
        rule(
            "preferences",
            &["prefer", "prefers", "favorite", "favourite", "like", "love", "hate", "dislike"],
            &["prefer to", "don't like", "do not like"],
        ),
    ]
}
