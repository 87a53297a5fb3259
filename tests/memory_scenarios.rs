//! End-to-end memory scenarios against the public API

use factvault::memory::{
    open_store, BatchStager, DuplicateKind, JsonFileStore, MemoryCoordinator, Provenance,
    RebuildOutcome, StoreOutcome, StoreRequest, SyncState,
};
use factvault::testing::RecordingReplicator;
use factvault::topics::{TopicRule, UNCLASSIFIED};
use factvault::FactVaultConfig;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

fn memory_config() -> FactVaultConfig {
    FactVaultConfig::from_toml_str(
        r#"
[storage]
backend = "memory"

[replication]
upload_timeout_ms = 50
rebuild_timeout_ms = 50
"#,
    )
    .unwrap()
}

async fn make_coordinator(
    config: &FactVaultConfig,
    replicator: Arc<RecordingReplicator>,
) -> Arc<MemoryCoordinator> {
    let store = open_store(&config.storage).await.unwrap();
    Arc::new(MemoryCoordinator::from_config(config, store, replicator).unwrap())
}

fn topics(labels: &[&str]) -> BTreeSet<String> {
    labels.iter().map(|l| l.to_string()).collect()
}

#[tokio::test]
async fn pet_fact_is_classified_then_rejected_as_duplicate() -> anyhow::Result<()> {
    let replicator = Arc::new(RecordingReplicator::new());
    let coordinator = make_coordinator(&memory_config(), replicator.clone()).await;

    let first = coordinator
        .store(StoreRequest::new("alice", "I have a pet dog"))
        .await?;
    let record = match &first {
        StoreOutcome::Stored(record) => record.clone(),
        other => panic!("expected Stored, got {:?}", other),
    };
    assert!(record.topics.contains("pets"));

    let second = coordinator
        .store(StoreRequest::new("alice", "  i have a PET dog "))
        .await?;
    match second {
        StoreOutcome::RejectedDuplicate { of, kind, .. } => {
            assert_eq!(of, record.id);
            assert_eq!(kind, DuplicateKind::Exact);
        }
        other => panic!("expected RejectedDuplicate, got {:?}", other),
    }

    assert_eq!(coordinator.list("alice").await?.len(), 1);
    assert_eq!(replicator.upload_count(), 1);
    Ok(())
}

#[tokio::test]
async fn near_duplicate_is_rejected() -> anyhow::Result<()> {
    let coordinator =
        make_coordinator(&memory_config(), Arc::new(RecordingReplicator::new())).await;

    coordinator
        .store(StoreRequest::new("alice", "My favorite food is spicy ramen"))
        .await?;
    let outcome = coordinator
        .store(StoreRequest::new("alice", "My favorite food is spicy ramen!"))
        .await?;

    match outcome {
        StoreOutcome::RejectedDuplicate { kind, score, .. } => {
            assert_eq!(kind, DuplicateKind::Semantic);
            assert!(score >= 0.8);
        }
        other => panic!("expected RejectedDuplicate, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn ten_fact_batch_triggers_one_rebuild() {
    let replicator = Arc::new(RecordingReplicator::new());
    let config = memory_config();
    let coordinator = make_coordinator(&config, replicator.clone()).await;
    let stager = BatchStager::new(coordinator.clone(), config.batch.concurrency);

    let facts = [
        "I have a pet dog",
        "My sister lives in Oslo",
        "I work as a nurse",
        "I am allergic to peanuts",
        "My favorite food is ramen",
        "I play chess on weekends",
        "My best friend is called Ana",
        "I drink coffee every morning",
        "My father was a carpenter",
        "I go hiking in the Alps",
    ];
    let report = stager.stage("alice", Provenance::imported(), facts).await;

    assert_eq!(report.stored_count(), 10);
    assert_eq!(report.rebuild, RebuildOutcome::Rebuilt);
    assert_eq!(replicator.rebuild_count(), 1);
    assert_eq!(replicator.upload_count(), 10);
    assert!(replicator.attempts().iter().all(|a| a.deferred));

    let empty = stager
        .stage("alice", Provenance::imported(), Vec::<String>::new())
        .await;
    assert_eq!(empty.rebuild, RebuildOutcome::NotNeeded);
    assert_eq!(replicator.rebuild_count(), 1);
}

#[tokio::test]
async fn rebuild_timeout_leaves_items_persisted() {
    let replicator = Arc::new(RecordingReplicator::new().with_delay(Duration::from_millis(20)));
    let config = FactVaultConfig::from_toml_str(
        r#"
[storage]
backend = "memory"

[replication]
upload_timeout_ms = 1000
rebuild_timeout_ms = 1
"#,
    )
    .unwrap();
    let coordinator = make_coordinator(&config, replicator).await;
    let stager = BatchStager::new(coordinator.clone(), 2);

    let report = stager
        .stage("alice", Provenance::imported(), ["I live in Lisbon", "I work as a nurse"])
        .await;
    assert!(matches!(report.rebuild, RebuildOutcome::Failed { .. }));
    assert_eq!(coordinator.list("alice").await.unwrap().len(), 2);
}

#[tokio::test]
async fn reclassify_picks_up_new_phrase() -> anyhow::Result<()> {
    let replicator = Arc::new(RecordingReplicator::new());
    let coordinator = make_coordinator(&memory_config(), replicator.clone()).await;
    coordinator
        .replace_rules(vec![TopicRule::new("relationships")])
        .await?;

    let record = coordinator
        .store(StoreRequest::new("alice", "I have a friend named Schroeder"))
        .await?
        .record()
        .cloned()
        .expect("stored");
    assert_eq!(record.topics, topics(&[UNCLASSIFIED]));

    coordinator
        .replace_rules(vec![TopicRule::new("relationships").phrase("friend named")])
        .await?;
    let updated = coordinator
        .reclassify("alice", &record.id)
        .await?
        .record()
        .cloned()
        .expect("stored");

    assert_eq!(updated.topics, topics(&["relationships"]));
    assert_eq!(
        coordinator.get("alice", &record.id).await?.topics,
        updated.topics
    );
    assert_eq!(replicator.stored_topics(&record.id), Some(updated.topics));
    Ok(())
}

#[tokio::test]
async fn concurrent_identical_writes_persist_once() {
    let coordinator =
        make_coordinator(&memory_config(), Arc::new(RecordingReplicator::new())).await;

    let writes = (0..16).map(|_| {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            coordinator
                .store(StoreRequest::new("alice", "I was born in Porto"))
                .await
        })
    });
    let outcomes = futures::future::join_all(writes).await;

    let stored = outcomes
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .filter(StoreOutcome::is_stored)
        .count();
    assert_eq!(stored, 1);
    assert_eq!(coordinator.list("alice").await.unwrap().len(), 1);
}

#[tokio::test]
async fn identities_do_not_dedup_each_other() {
    let coordinator =
        make_coordinator(&memory_config(), Arc::new(RecordingReplicator::new())).await;

    for identity in ["alice", "bob"] {
        let outcome = coordinator
            .store(StoreRequest::new(identity, "I have a pet dog"))
            .await
            .unwrap();
        assert!(outcome.is_stored());
    }
    assert_eq!(coordinator.primary().count().await.unwrap(), 2);
}

#[tokio::test]
async fn failed_upload_is_reconciled_later() -> anyhow::Result<()> {
    let replicator = Arc::new(RecordingReplicator::new());
    let coordinator = make_coordinator(&memory_config(), replicator.clone()).await;

    replicator.fail_uploads(true);
    let outcome = coordinator
        .store(StoreRequest::new("alice", "I am allergic to peanuts"))
        .await?;
    let record = match outcome {
        StoreOutcome::StoredLocalOnly { record, .. } => record,
        other => panic!("expected StoredLocalOnly, got {:?}", other),
    };
    assert_eq!(record.sync, SyncState::Pending);

    replicator.fail_uploads(false);
    let report = coordinator.retry_pending("alice").await?;
    assert_eq!(report.replicated, vec![record.id]);

    let reconciled = coordinator.get("alice", &record.id).await?;
    assert_eq!(reconciled.sync, SyncState::Replicated);
    assert_eq!(replicator.stored_topics(&record.id), Some(reconciled.topics));
    Ok(())
}

#[tokio::test]
async fn file_store_survives_reopen() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = memory_config();

    let id = {
        let store = Arc::new(JsonFileStore::open(dir.path()).await?);
        let coordinator = MemoryCoordinator::from_config(
            &config,
            store,
            Arc::new(RecordingReplicator::new()),
        )?;
        let outcome = coordinator
            .store(StoreRequest::new("alice", "I live in Lisbon").source_context("onboarding"))
            .await?;
        tokio_test::assert_ok!(outcome.record().cloned().ok_or("not stored")).id
    };

    let store = Arc::new(JsonFileStore::open(dir.path()).await?);
    let coordinator =
        MemoryCoordinator::from_config(&config, store, Arc::new(RecordingReplicator::new()))?;

    let record = coordinator.get("alice", &id).await?;
    assert_eq!(record.content, "I live in Lisbon");
    assert_eq!(record.sync, SyncState::Replicated);
    assert_eq!(record.source_context.as_deref(), Some("onboarding"));

    let again = coordinator
        .store(StoreRequest::new("alice", "I live in Lisbon"))
        .await?;
    assert!(again.is_duplicate());
    Ok(())
}
