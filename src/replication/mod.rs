//! Secondary graph store replication
//!
//! Defines the `ReplicationClient` trait used by the coordinator to push a
//! record's content and topics to the secondary, index-backed store, and to
//! trigger that store's index rebuild.
//!
//! ## Contract
//!
//! - Uploads are at-least-once. Every request carries a fingerprint of
//!   `(identity, content)`; the remote answers `duplicate` for a fingerprint
//!   it already holds, which callers treat as success. A known fingerprint
//!   sent with different topics replaces the remote topics.
//! - A `deferred` upload must not trigger an index rebuild on the remote.
//!   Batch callers follow deferred uploads with exactly one `rebuild_index`.
//! - Implementations never touch the primary store.

pub mod http;

pub use http::HttpGraphClient;

use crate::error::{Error, Result};
use crate::memory::MemoryRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use uuid::Uuid;

/// Payload pushed to the secondary store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRequest {
    /// Primary record id
    pub id: Uuid,
    /// Owning identity
    pub identity: String,
    /// Record content
    pub content: String,
    /// Topics exactly as persisted in the primary store
    pub topics: BTreeSet<String>,
    /// Idempotency key
    pub fingerprint: String,
    /// Skip the remote index rebuild for this upload
    pub deferred: bool,
}

impl UploadRequest {
    /// Build the payload for a persisted record
    pub fn from_record(record: &MemoryRecord, deferred: bool) -> Self {
        Self {
            id: record.id,
            identity: record.identity.clone(),
            content: record.content.clone(),
            topics: record.topics.clone(),
            fingerprint: record.fingerprint(),
            deferred,
        }
    }
}

/// Successful upload result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    /// The remote stored the fact
    Success,
    /// The remote already held this fingerprint
    Duplicate,
}

/// Client for the secondary graph-indexed store
#[async_trait]
pub trait ReplicationClient: Send + Sync {
    /// Push one record to the secondary store
    async fn upload(&self, request: &UploadRequest) -> Result<UploadStatus>;

    /// Rebuild the secondary index now
    async fn rebuild_index(&self) -> Result<()>;

    /// Human-readable name used in logs
    fn name(&self) -> &str;
}

/// Upload bounded by `timeout`; a timeout is a replication error
pub async fn upload_with_timeout(
    client: &dyn ReplicationClient,
    request: &UploadRequest,
    timeout: Duration,
) -> Result<UploadStatus> {
    match tokio::time::timeout(timeout, client.upload(request)).await {
        Ok(result) => result,
        Err(_) => Err(Error::Replication(format!(
            "upload to {} timed out after {}ms",
            client.name(),
            timeout.as_millis()
        ))),
    }
}

/// Rebuild bounded by `timeout`; a timeout is a rebuild error
pub async fn rebuild_with_timeout(client: &dyn ReplicationClient, timeout: Duration) -> Result<()> {
    match tokio::time::timeout(timeout, client.rebuild_index()).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(Error::Rebuild(reason))) => Err(Error::Rebuild(reason)),
        Ok(Err(other)) => Err(Error::Rebuild(other.to_string())),
        Err(_) => Err(Error::Rebuild(format!(
            "rebuild on {} timed out after {}ms",
            client.name(),
            timeout.as_millis()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRecordBuilder;
    use crate::testing::RecordingReplicator;

    #[test]
    fn test_upload_request_from_record() {
        let record = MemoryRecordBuilder::new()
            .identity("user-1")
            .content("I have a pet dog")
            .topic("pets")
            .build()
            .unwrap();

        let request = UploadRequest::from_record(&record, true);
        assert_eq!(request.id, record.id);
        assert_eq!(request.topics, record.topics);
        assert_eq!(request.fingerprint, record.fingerprint());
        assert!(request.deferred);
    }

    #[tokio::test]
    async fn test_upload_timeout_is_error() {
        let replicator = RecordingReplicator::new().with_delay(Duration::from_millis(200));
        let record = MemoryRecordBuilder::new()
            .identity("user-1")
            .content("slow fact")
            .topic("test")
            .build()
            .unwrap();

        let result = upload_with_timeout(
            &replicator,
            &UploadRequest::from_record(&record, false),
            Duration::from_millis(20),
        )
        .await;
        assert!(matches!(result, Err(Error::Replication(_))));
    }

    #[tokio::test]
    async fn test_rebuild_timeout_is_rebuild_error() {
        let replicator = RecordingReplicator::new().with_delay(Duration::from_millis(200));
        let result = rebuild_with_timeout(&replicator, Duration::from_millis(20)).await;
        assert!(matches!(result, Err(Error::Rebuild(_))));
    }

    #[tokio::test]
    async fn test_rebuild_failure_maps_to_rebuild_error() {
        let replicator = RecordingReplicator::new();
        replicator.fail_rebuilds(true);
        let result = rebuild_with_timeout(&replicator, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(Error::Rebuild(_))));
        assert_eq!(replicator.rebuild_count(), 1);
    }
}
