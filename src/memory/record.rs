//! Memory record data types
//!
//! A record is one personal fact owned by an identity. Its `id` and
//! `content` never change after the first write; topics may be re-derived
//! but the primary and replicated copies must carry the same set.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use uuid::Uuid;

/// A stored personal fact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Unique record identifier
    pub id: Uuid,
    /// Partition key (e.g. user id)
    pub identity: String,
    /// The fact itself
    pub content: String,
    /// Topic labels, never empty
    pub topics: BTreeSet<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last topic change
    pub last_updated: DateTime<Utc>,
    /// Confidence in the fact (0.0 to 1.0)
    pub confidence: f32,
    /// How the fact was captured
    pub provenance: Provenance,
    /// Why or how the fact was captured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_context: Option<String>,
    /// Whether the secondary copy holds the current topics; kept by the
    /// store's sync ledger, not in the record body
    #[serde(default, skip_deserializing)]
    pub sync: SyncState,
}

impl MemoryRecord {
    /// Stable replication fingerprint of `(identity, content)`
    pub fn fingerprint(&self) -> String {
        content_fingerprint(&self.identity, &self.content)
    }

    /// Replace topics and bump `last_updated`; the record becomes pending
    pub fn set_topics(&mut self, topics: BTreeSet<String>) {
        self.topics = topics;
        self.sync = SyncState::Pending;
        self.touch();
    }

    /// Mark the secondary copy as up to date
    pub fn mark_replicated(&mut self) {
        self.sync = SyncState::Replicated;
    }

    fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}

/// How a fact entered the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProvenanceKind {
    /// Stated directly by the user
    #[default]
    Direct,
    /// Loaded from a file or bulk import
    Imported,
    /// Captured on behalf of the user by another agent
    Proxy,
}

/// Origin of a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Provenance {
    /// Capture path
    pub kind: ProvenanceKind,
    /// Agent that supplied the fact, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

impl Provenance {
    /// Fact stated directly by the user
    pub fn direct() -> Self {
        Self::default()
    }

    /// Fact loaded by a bulk import
    pub fn imported() -> Self {
        Self {
            kind: ProvenanceKind::Imported,
            agent: None,
        }
    }

    /// Fact supplied by another agent
    pub fn proxy(agent: impl Into<String>) -> Self {
        Self {
            kind: ProvenanceKind::Proxy,
            agent: Some(agent.into()),
        }
    }
}

/// Replication state of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Not yet confirmed by the secondary store
    #[default]
    Pending,
    /// Secondary store holds the current topics
    Replicated,
}

/// SHA-256 hex digest of the identity and whitespace-normalised, lowercased content
pub fn content_fingerprint(identity: &str, content: &str) -> String {
    let normalized = content
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    let mut hasher = Sha256::new();
    hasher.update(identity.as_bytes());
    hasher.update([0u8]);
    hasher.update(normalized.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Builder for constructing `MemoryRecord` instances
pub struct MemoryRecordBuilder {
    identity: Option<String>,
    content: Option<String>,
    topics: BTreeSet<String>,
    confidence: f32,
    provenance: Provenance,
    source_context: Option<String>,
}

impl MemoryRecordBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            identity: None,
            content: None,
            topics: BTreeSet::new(),
            confidence: 1.0,
            provenance: Provenance::default(),
            source_context: None,
        }
    }

    /// Set the owning identity
    pub fn identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Set the content
    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Add a topic label
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topics.insert(topic.into());
        self
    }

    /// Set all topic labels
    pub fn topics(mut self, topics: impl IntoIterator<Item = String>) -> Self {
        self.topics.extend(topics);
        self
    }

    /// Set confidence (clamped to 0.0..=1.0)
    pub fn confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Set provenance
    pub fn provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }

    /// Set source context
    pub fn source_context(mut self, context: impl Into<String>) -> Self {
        self.source_context = Some(context.into());
        self
    }

    /// Build the record, returning an error if required fields are missing
    pub fn build(self) -> Result<MemoryRecord> {
        let identity = self
            .identity
            .filter(|i| !i.trim().is_empty())
            .ok_or_else(|| Error::Validation("identity is required".to_string()))?;
        let content = self
            .content
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::Validation("content must not be empty".to_string()))?;
        if self.topics.is_empty() {
            return Err(Error::Validation("at least one topic is required".to_string()));
        }

        let now = Utc::now();
        Ok(MemoryRecord {
            id: Uuid::new_v4(),
            identity,
            content,
            topics: self.topics,
            created_at: now,
            last_updated: now,
            confidence: self.confidence,
            provenance: self.provenance,
            source_context: self.source_context,
            sync: SyncState::Pending,
        })
    }
}

impl Default for MemoryRecordBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_builder() {
        let record = MemoryRecordBuilder::new()
            .identity("user-1")
            .content("  I have a pet dog ")
            .topic("pets")
            .confidence(1.7)
            .provenance(Provenance::proxy("calendar-agent"))
            .source_context("mentioned while planning a trip")
            .build()
            .unwrap();

        assert_eq!(record.identity, "user-1");
        assert_eq!(record.content, "I have a pet dog");
        assert_eq!(record.topics, BTreeSet::from(["pets".to_string()]));
        assert_eq!(record.confidence, 1.0);
        assert_eq!(record.provenance.kind, ProvenanceKind::Proxy);
        assert_eq!(record.provenance.agent.as_deref(), Some("calendar-agent"));
        assert_eq!(record.sync, SyncState::Pending);
        assert_eq!(record.created_at, record.last_updated);
    }

    #[test]
    fn test_record_builder_missing_fields() {
        assert!(MemoryRecordBuilder::new().content("x").topic("a").build().is_err());
        assert!(MemoryRecordBuilder::new()
            .identity("user-1")
            .content("   ")
            .topic("a")
            .build()
            .is_err());
        assert!(MemoryRecordBuilder::new()
            .identity("user-1")
            .content("fact")
            .build()
            .is_err());
    }

    #[test]
    fn test_fingerprint_is_stable_and_partitioned() {
        let a = content_fingerprint("user-1", "I have a  pet dog");
        let b = content_fingerprint("user-1", "i have a pet DOG");
        let c = content_fingerprint("user-2", "I have a pet dog");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_set_topics_marks_pending() {
        let mut record = MemoryRecordBuilder::new()
            .identity("user-1")
            .content("I play chess")
            .topic("hobbies")
            .build()
            .unwrap();
        record.mark_replicated();
        assert_eq!(record.sync, SyncState::Replicated);

        record.set_topics(BTreeSet::from(["games".to_string()]));
        assert_eq!(record.sync, SyncState::Pending);
        assert!(record.last_updated >= record.created_at);
    }

    #[test]
    fn test_provenance_serialization() {
        let json = serde_json::to_string(&Provenance::imported()).unwrap();
        assert_eq!(json, r#"{"kind":"imported"}"#);
        let parsed: Provenance = serde_json::from_str(r#"{"kind":"proxy","agent":"mail"}"#).unwrap();
        assert_eq!(parsed, Provenance::proxy("mail"));
    }
}
