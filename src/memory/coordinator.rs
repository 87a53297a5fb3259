//! Memory coordinator: single-fact write path
//!
//! Every write runs validate → dedup → classify → persist → replicate while
//! holding the identity's exclusive lock, so two concurrent writes of the
//! same fact cannot both observe `Unique`. Topics are computed once and the
//! persisted value is the one replicated.
//!
//! ```text
//! store(request)
//!   ├─ empty content ──────────────▶ Err(Validation)
//!   ├─ duplicate ──────────────────▶ RejectedDuplicate
//!   ├─ primary write fails ────────▶ Err(Persistence)
//!   ├─ upload fails / times out ───▶ StoredLocalOnly
//!   └─ upload ok or remote dup ────▶ Stored
//! ```

use super::dedup::{DuplicateDetector, DuplicateKind, DuplicateVerdict};
use super::record::{MemoryRecord, MemoryRecordBuilder, Provenance, SyncState};
use super::store::PrimaryStore;
use crate::config::FactVaultConfig;
use crate::error::{Error, Result};
use crate::replication::{
    rebuild_with_timeout, upload_with_timeout, ReplicationClient, UploadRequest,
};
use crate::topics::{RuleClassifier, TopicRule};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

/// A candidate fact from an upstream extractor
#[derive(Debug, Clone)]
pub struct StoreRequest {
    /// Owning identity
    pub identity: String,
    /// Fact text
    pub content: String,
    /// Topics to use instead of classification
    pub explicit_topics: Option<Vec<String>>,
    /// Capture path
    pub provenance: Provenance,
    /// Why or how the fact was captured
    pub source_context: Option<String>,
    /// Confidence override (default 1.0)
    pub confidence: Option<f32>,
}

impl StoreRequest {
    /// A direct fact for `identity`
    pub fn new(identity: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            content: content.into(),
            explicit_topics: None,
            provenance: Provenance::direct(),
            source_context: None,
            confidence: None,
        }
    }

    /// Use these topics instead of classifying
    pub fn topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.explicit_topics = Some(topics.into_iter().map(Into::into).collect());
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

    /// Set confidence
    pub fn confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// Result of a write that passed validation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum StoreOutcome {
    /// Persisted and replicated
    Stored(MemoryRecord),
    /// Persisted; the secondary store must be reconciled later
    StoredLocalOnly {
        /// The persisted record
        record: MemoryRecord,
        /// Why replication failed
        reason: String,
    },
    /// Not written; the fact already exists
    RejectedDuplicate {
        /// Id of the existing record
        of: Uuid,
        /// Detection kind
        kind: DuplicateKind,
        /// Similarity score
        score: f64,
    },
}

impl StoreOutcome {
    /// The persisted record, if any
    pub fn record(&self) -> Option<&MemoryRecord> {
        match self {
            StoreOutcome::Stored(record) | StoreOutcome::StoredLocalOnly { record, .. } => {
                Some(record)
            }
            StoreOutcome::RejectedDuplicate { .. } => None,
        }
    }

    /// Whether a record was persisted
    pub fn is_stored(&self) -> bool {
        self.record().is_some()
    }

    /// Whether the candidate was rejected as a duplicate
    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreOutcome::RejectedDuplicate { .. })
    }
}

/// Result of `retry_pending`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Records now replicated
    pub replicated: Vec<Uuid>,
    /// Records still pending
    pub still_pending: Vec<Uuid>,
}

/// Per-identity exclusive locks
///
/// An entry lives only while some task holds or waits on it.
#[derive(Default)]
struct IdentityLocks {
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl IdentityLocks {
    async fn acquire(&self, identity: &str) -> IdentityGuard<'_> {
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(identity.to_string())
            .or_default()
            .clone();
        IdentityGuard {
            guard: Some(lock.clone().lock_owned().await),
            lock,
            identity: identity.to_string(),
            owner: self,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Held identity lock; drops the map entry when nobody else wants it
struct IdentityGuard<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    lock: Arc<Mutex<()>>,
    identity: String,
    owner: &'a IdentityLocks,
}

impl Drop for IdentityGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.owner.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Waiters hold a clone, so two references means the map and us
        let idle = locks
            .get(&self.identity)
            .is_some_and(|current| Arc::ptr_eq(current, &self.lock))
            && Arc::strong_count(&self.lock) == 2;
        if idle {
            locks.remove(&self.identity);
        }
    }
}

/// Orchestrates dedup, classification, persistence and replication
pub struct MemoryCoordinator {
    store: Arc<dyn PrimaryStore>,
    replicator: Arc<dyn ReplicationClient>,
    detector: DuplicateDetector,
    classifier: RwLock<Arc<RuleClassifier>>,
    locks: IdentityLocks,
    upload_timeout: Duration,
    rebuild_timeout: Duration,
}

impl MemoryCoordinator {
    /// Create a coordinator from its parts with default timeouts
    pub fn new(
        store: Arc<dyn PrimaryStore>,
        replicator: Arc<dyn ReplicationClient>,
        detector: DuplicateDetector,
        classifier: RuleClassifier,
    ) -> Self {
        let defaults = crate::config::ReplicationConfig::default();
        Self {
            store,
            replicator,
            detector,
            classifier: RwLock::new(Arc::new(classifier)),
            locks: IdentityLocks::default(),
            upload_timeout: defaults.upload_timeout(),
            rebuild_timeout: defaults.rebuild_timeout(),
        }
    }

    /// Create a coordinator from configuration
    pub fn from_config(
        config: &FactVaultConfig,
        store: Arc<dyn PrimaryStore>,
        replicator: Arc<dyn ReplicationClient>,
    ) -> Result<Self> {
        config.validate()?;
        let classifier =
            RuleClassifier::new(config.topics.rules.clone(), config.topics.phrase_weight)?;
        Ok(Self::new(
            store,
            replicator,
            DuplicateDetector::new(config.dedup.clone()),
            classifier,
        )
        .with_timeouts(
            config.replication.upload_timeout(),
            config.replication.rebuild_timeout(),
        ))
    }

    /// Override the upload and rebuild bounds
    pub fn with_timeouts(mut self, upload: Duration, rebuild: Duration) -> Self {
        self.upload_timeout = upload;
        self.rebuild_timeout = rebuild;
        self
    }

    /// The primary store (read access for callers)
    pub fn primary(&self) -> &Arc<dyn PrimaryStore> {
        &self.store
    }

    /// Current classifier
    pub async fn classifier(&self) -> Arc<RuleClassifier> {
        self.classifier.read().await.clone()
    }

    /// Replace the rule table; later classifications use the new table
    pub async fn replace_rules(&self, rules: Vec<TopicRule>) -> Result<()> {
        let mut slot = self.classifier.write().await;
        let next = RuleClassifier::new(rules, slot.phrase_weight())?;
        *slot = Arc::new(next);
        tracing::info!("Replaced topic rule table");
        Ok(())
    }

    /// Store a single fact
    pub async fn store(&self, request: StoreRequest) -> Result<StoreOutcome> {
        self.store_with(request, false).await
    }

    /// Store a fact; `deferred` suppresses the remote index rebuild
    pub(crate) async fn store_with(
        &self,
        request: StoreRequest,
        deferred: bool,
    ) -> Result<StoreOutcome> {
        let content = request.content.trim();
        if content.is_empty() {
            return Err(Error::Validation("content must not be empty".to_string()));
        }
        let identity = normalize_identity(&request.identity)?;

        let _guard = self.locks.acquire(identity).await;

        let existing = self
            .store
            .list_by_identity(identity)
            .await
            .map_err(persistence)?;
        if let DuplicateVerdict::Duplicate { of, kind, score } =
            self.detector.check(identity, content, &existing)
        {
            tracing::info!(
                identity = %identity,
                duplicate_of = %of,
                kind = ?kind,
                score,
                "Rejected duplicate memory"
            );
            return Ok(StoreOutcome::RejectedDuplicate { of, kind, score });
        }

        let topics = match explicit_topics(request.explicit_topics) {
            Some(topics) => topics,
            None => self.classifier().await.classify(content),
        };

        let mut builder = MemoryRecordBuilder::new()
            .identity(identity)
            .content(content)
            .topics(topics)
            .provenance(request.provenance);
        if let Some(context) = request.source_context {
            builder = builder.source_context(context);
        }
        if let Some(confidence) = request.confidence {
            builder = builder.confidence(confidence);
        }
        let record = builder.build()?;

        self.store.insert(&record).await.map_err(persistence)?;
        tracing::debug!(
            identity = %identity,
            id = %record.id,
            topics = ?record.topics,
            "Persisted memory"
        );

        Ok(self.replicate(record, deferred).await)
    }

    /// Re-derive topics with the current rules and re-replicate
    pub async fn reclassify(&self, identity: &str, id: &Uuid) -> Result<StoreOutcome> {
        let identity = normalize_identity(identity)?;
        let _guard = self.locks.acquire(identity).await;
        let mut record = self.owned_record(identity, id).await?;

        let topics = self.classifier().await.classify(&record.content);
        if topics == record.topics && record.sync == SyncState::Replicated {
            return Ok(StoreOutcome::Stored(record));
        }

        record.set_topics(topics);
        self.store.update(&record).await.map_err(persistence)?;
        tracing::info!(identity = %identity, id = %id, topics = ?record.topics, "Reclassified memory");

        Ok(self.replicate(record, false).await)
    }

    /// Replace a record's topics explicitly and re-replicate
    pub async fn set_topics(
        &self,
        identity: &str,
        id: &Uuid,
        topics: Vec<String>,
    ) -> Result<StoreOutcome> {
        let identity = normalize_identity(identity)?;
        let topics = explicit_topics(Some(topics))
            .ok_or_else(|| Error::Validation("at least one topic is required".to_string()))?;

        let _guard = self.locks.acquire(identity).await;
        let mut record = self.owned_record(identity, id).await?;

        record.set_topics(topics);
        self.store.update(&record).await.map_err(persistence)?;

        Ok(self.replicate(record, false).await)
    }

    /// Retry replication for every pending record of an identity
    pub async fn retry_pending(&self, identity: &str) -> Result<ReconcileReport> {
        let identity = normalize_identity(identity)?;
        let _guard = self.locks.acquire(identity).await;
        let pending: Vec<MemoryRecord> = self
            .store
            .list_by_identity(identity)
            .await
            .map_err(persistence)?
            .into_iter()
            .filter(|r| r.sync == SyncState::Pending)
            .collect();

        let mut report = ReconcileReport::default();
        for record in pending {
            match self.replicate(record, false).await {
                StoreOutcome::Stored(record) => report.replicated.push(record.id),
                StoreOutcome::StoredLocalOnly { record, .. } => {
                    report.still_pending.push(record.id)
                }
                StoreOutcome::RejectedDuplicate { .. } => {}
            }
        }

        tracing::info!(
            identity = %identity,
            replicated = report.replicated.len(),
            still_pending = report.still_pending.len(),
            "Reconciled pending replication"
        );
        Ok(report)
    }

    /// Remove a record from the primary store
    pub async fn forget(&self, identity: &str, id: &Uuid) -> Result<MemoryRecord> {
        let identity = normalize_identity(identity)?;
        let _guard = self.locks.acquire(identity).await;
        self.owned_record(identity, id).await?;

        let removed = self
            .store
            .remove(id)
            .await
            .map_err(persistence)?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        tracing::info!(identity = %identity, id = %id, "Forgot memory");
        Ok(removed)
    }

    /// Fetch one record of an identity
    pub async fn get(&self, identity: &str, id: &Uuid) -> Result<MemoryRecord> {
        self.owned_record(normalize_identity(identity)?, id).await
    }

    /// All records of an identity, oldest first
    pub async fn list(&self, identity: &str) -> Result<Vec<MemoryRecord>> {
        self.store
            .list_by_identity(normalize_identity(identity)?)
            .await
    }

    /// Records of an identity carrying `label`
    pub async fn by_topic(&self, identity: &str, label: &str) -> Result<Vec<MemoryRecord>> {
        Ok(self
            .list(identity)
            .await?
            .into_iter()
            .filter(|r| r.topics.contains(label))
            .collect())
    }

    /// Rebuild the secondary index, bounded by the rebuild timeout
    pub async fn rebuild_index(&self) -> Result<()> {
        rebuild_with_timeout(self.replicator.as_ref(), self.rebuild_timeout).await
    }

    async fn owned_record(&self, identity: &str, id: &Uuid) -> Result<MemoryRecord> {
        self.store
            .get(id)
            .await
            .map_err(persistence)?
            .filter(|r| r.identity == identity)
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Push a persisted record; never fails the caller
    async fn replicate(&self, mut record: MemoryRecord, deferred: bool) -> StoreOutcome {
        let request = UploadRequest::from_record(&record, deferred);

        match upload_with_timeout(self.replicator.as_ref(), &request, self.upload_timeout).await {
            Ok(status) => {
                match self.store.mark_synced(&record.id, SyncState::Replicated).await {
                    Ok(()) => record.mark_replicated(),
                    Err(e) => tracing::warn!(
                        id = %record.id,
                        "Replicated but failed to record sync state: {}",
                        e
                    ),
                }
                tracing::info!(
                    identity = %record.identity,
                    id = %record.id,
                    status = ?status,
                    deferred,
                    "Stored memory"
                );
                StoreOutcome::Stored(record)
            }
            Err(e) => {
                tracing::warn!(
                    identity = %record.identity,
                    id = %record.id,
                    replicator = self.replicator.name(),
                    "Stored memory locally only: {}",
                    e
                );
                StoreOutcome::StoredLocalOnly {
                    record,
                    reason: e.to_string(),
                }
            }
        }
    }
}

/// Identities are compared trimmed; blank ones are rejected
fn normalize_identity(identity: &str) -> Result<&str> {
    let identity = identity.trim();
    if identity.is_empty() {
        return Err(Error::Validation("identity must not be empty".to_string()));
    }
    Ok(identity)
}

/// Trimmed, non-empty explicit topics, or `None` to classify
fn explicit_topics(topics: Option<Vec<String>>) -> Option<BTreeSet<String>> {
    let topics: BTreeSet<String> = topics?
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    (!topics.is_empty()).then_some(topics)
}

fn persistence(e: Error) -> Error {
    match e {
        Error::Persistence(_) | Error::NotFound(_) | Error::Validation(_) => e,
        other => Error::Persistence(other.to_string()),
    }
}
