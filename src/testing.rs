//! Test utilities for factvault
//!
//! `RecordingReplicator` is an in-process `ReplicationClient` that records
//! every upload and rebuild, deduplicates by fingerprint like the real graph
//! store, and can be told to fail or stall.

use crate::error::{Error, Result};
use crate::replication::{ReplicationClient, UploadRequest, UploadStatus};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

/// Recording, scriptable replication client
#[derive(Default)]
pub struct RecordingReplicator {
    attempts: Mutex<Vec<UploadRequest>>,
    stored: Mutex<HashMap<String, UploadRequest>>,
    rebuilds: AtomicUsize,
    fail_uploads: AtomicBool,
    fail_rebuilds: AtomicBool,
    delay: Option<Duration>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RecordingReplicator {
    /// Create a replicator that accepts everything immediately
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep before answering every upload and rebuild
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make uploads fail (or succeed again)
    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    /// Make rebuilds fail (or succeed again)
    pub fn fail_rebuilds(&self, fail: bool) {
        self.fail_rebuilds.store(fail, Ordering::SeqCst);
    }

    /// Every upload attempt, including failed ones, in call order
    pub fn attempts(&self) -> Vec<UploadRequest> {
        lock(&self.attempts).clone()
    }

    /// Number of upload attempts
    pub fn upload_count(&self) -> usize {
        lock(&self.attempts).len()
    }

    /// Number of facts held by the fake remote
    pub fn stored_count(&self) -> usize {
        lock(&self.stored).len()
    }

    /// Topics the fake remote holds for a record id
    pub fn stored_topics(&self, id: &Uuid) -> Option<BTreeSet<String>> {
        lock(&self.stored)
            .values()
            .find(|r| r.id == *id)
            .map(|r| r.topics.clone())
    }

    /// Number of rebuild calls, including failed ones
    pub fn rebuild_count(&self) -> usize {
        self.rebuilds.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ReplicationClient for RecordingReplicator {
    async fn upload(&self, request: &UploadRequest) -> Result<UploadStatus> {
        self.pause().await;
        lock(&self.attempts).push(request.clone());

        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(Error::Replication("graph store unavailable".to_string()));
        }

        let mut stored = lock(&self.stored);
        match stored.get_mut(&request.fingerprint) {
            Some(existing) if existing.topics == request.topics => Ok(UploadStatus::Duplicate),
            Some(existing) => {
                existing.topics = request.topics.clone();
                Ok(UploadStatus::Success)
            }
            None => {
                stored.insert(request.fingerprint.clone(), request.clone());
                Ok(UploadStatus::Success)
            }
        }
    }

    async fn rebuild_index(&self) -> Result<()> {
        self.pause().await;
        self.rebuilds.fetch_add(1, Ordering::SeqCst);

        if self.fail_rebuilds.load(Ordering::SeqCst) {
            return Err(Error::Rebuild("index rebuild failed".to_string()));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(fingerprint: &str, topics: &[&str]) -> UploadRequest {
        UploadRequest {
            id: Uuid::new_v4(),
            identity: "user-1".to_string(),
            content: "fact".to_string(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
            fingerprint: fingerprint.to_string(),
            deferred: false,
        }
    }

    #[tokio::test]
    async fn test_fingerprint_dedup() {
        let replicator = RecordingReplicator::new();
        let first = request("fp-1", &["pets"]);

        assert_eq!(replicator.upload(&first).await.unwrap(), UploadStatus::Success);
        assert_eq!(replicator.upload(&first).await.unwrap(), UploadStatus::Duplicate);
        assert_eq!(replicator.upload_count(), 2);
        assert_eq!(replicator.stored_count(), 1);
    }

    #[tokio::test]
    async fn test_topic_replacement() {
        let replicator = RecordingReplicator::new();
        let first = request("fp-1", &["unclassified"]);
        replicator.upload(&first).await.unwrap();

        let mut second = first.clone();
        second.topics = BTreeSet::from(["relationships".to_string()]);
        assert_eq!(replicator.upload(&second).await.unwrap(), UploadStatus::Success);
        assert_eq!(replicator.stored_topics(&first.id), Some(second.topics));
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let replicator = RecordingReplicator::new();
        replicator.fail_uploads(true);
        replicator.fail_rebuilds(true);

        assert!(replicator.upload(&request("fp-1", &["a"])).await.is_err());
        assert!(replicator.rebuild_index().await.is_err());
        assert_eq!(replicator.stored_count(), 0);
        assert_eq!(replicator.rebuild_count(), 1);

        replicator.fail_uploads(false);
        assert!(replicator.upload(&request("fp-1", &["a"])).await.is_ok());
    }
}
