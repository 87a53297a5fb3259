//! Topic classification
//!
//! Maps free text to topic labels using a static keyword/phrase rule table.

pub mod classifier;
pub mod rules;

pub use classifier::{RuleClassifier, TopicScore, DEFAULT_PHRASE_WEIGHT};
pub use rules::{default_topic_rules, TopicRule, UNCLASSIFIED};
