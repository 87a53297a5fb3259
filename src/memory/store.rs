//! Primary record stores
//!
//! `PrimaryStore` is the authoritative id → record mapping. Writes go through
//! `MemoryCoordinator` only. Two backends are provided:
//!
//! ```text
//! InMemoryStore   HashMap<Uuid, MemoryRecord> behind a tokio RwLock
//! JsonFileStore   <data_dir>/records/<id>.json, cached in memory
//!                 <data_dir>/sync/<id>  present once replicated
//! ```
//!
//! Replication state lives in a sync ledger beside the records, so marking a
//! record replicated never rewrites it.

use super::record::{MemoryRecord, SyncState};
use crate::config::{StorageBackend, StorageConfig};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Authoritative record store
#[async_trait]
pub trait PrimaryStore: Send + Sync {
    /// Insert a new `Pending` record; fails if the id already exists
    async fn insert(&self, record: &MemoryRecord) -> Result<()>;

    /// Replace an existing record; `identity` and `content` must not change
    ///
    /// The stored record becomes `Pending` whatever `record.sync` says.
    async fn update(&self, record: &MemoryRecord) -> Result<()>;

    /// Set the replication state of a record in the sync ledger
    async fn mark_synced(&self, id: &Uuid, sync: SyncState) -> Result<()>;

    /// Fetch a record by id
    async fn get(&self, id: &Uuid) -> Result<Option<MemoryRecord>>;

    /// All records of an identity, oldest first
    async fn list_by_identity(&self, identity: &str) -> Result<Vec<MemoryRecord>>;

    /// Remove a record, returning it if it existed
    async fn remove(&self, id: &Uuid) -> Result<Option<MemoryRecord>>;

    /// Total number of records
    async fn count(&self) -> Result<usize>;
}

/// Open the backend selected by configuration
pub async fn open_store(config: &StorageConfig) -> Result<Arc<dyn PrimaryStore>> {
    match config.backend {
        StorageBackend::Memory => Ok(Arc::new(InMemoryStore::new())),
        StorageBackend::File => Ok(Arc::new(JsonFileStore::open(&config.data_dir).await?)),
    }
}

fn check_immutable(existing: &MemoryRecord, updated: &MemoryRecord) -> Result<()> {
    if existing.identity != updated.identity || existing.content != updated.content {
        return Err(Error::Validation(format!(
            "identity and content of record {} are immutable",
            existing.id
        )));
    }
    Ok(())
}

fn pending(record: &MemoryRecord) -> MemoryRecord {
    MemoryRecord {
        sync: SyncState::Pending,
        ..record.clone()
    }
}

fn sorted_for_identity<'a>(
    records: impl Iterator<Item = &'a MemoryRecord>,
    identity: &str,
) -> Vec<MemoryRecord> {
    let mut owned: Vec<MemoryRecord> = records
        .filter(|r| r.identity == identity)
        .cloned()
        .collect();
    owned.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    owned
}

/// In-memory primary store
pub struct InMemoryStore {
    records: Arc<RwLock<HashMap<Uuid, MemoryRecord>>>,
}

impl InMemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PrimaryStore for InMemoryStore {
    async fn insert(&self, record: &MemoryRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(Error::Persistence(format!(
                "record {} already exists",
                record.id
            )));
        }
        records.insert(record.id, pending(record));
        Ok(())
    }

    async fn update(&self, record: &MemoryRecord) -> Result<()> {
        let mut records = self.records.write().await;
        let existing = records
            .get_mut(&record.id)
            .ok_or_else(|| Error::NotFound(record.id.to_string()))?;
        check_immutable(existing, record)?;
        *existing = pending(record);
        Ok(())
    }

    async fn mark_synced(&self, id: &Uuid, sync: SyncState) -> Result<()> {
        let mut records = self.records.write().await;
        let existing = records
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        existing.sync = sync;
        Ok(())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<MemoryRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn list_by_identity(&self, identity: &str) -> Result<Vec<MemoryRecord>> {
        Ok(sorted_for_identity(
            self.records.read().await.values(),
            identity,
        ))
    }

    async fn remove(&self, id: &Uuid) -> Result<Option<MemoryRecord>> {
        Ok(self.records.write().await.remove(id))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.records.read().await.len())
    }
}

/// Primary store with one JSON file per record
///
/// Files are written to a temporary name and renamed into place, so a crash
/// never leaves a half-written record. A failed write leaves the cache
/// untouched. An empty marker file under `sync/` means the record is
/// replicated.
pub struct JsonFileStore {
    records_dir: PathBuf,
    sync_dir: PathBuf,
    records: Arc<RwLock<HashMap<Uuid, MemoryRecord>>>,
}

impl JsonFileStore {
    /// Open (or create) a store under `base_dir/records`
    pub async fn open(base_dir: impl AsRef<Path>) -> Result<Self> {
        let records_dir = base_dir.as_ref().join("records");
        let sync_dir = base_dir.as_ref().join("sync");
        for dir in [&records_dir, &sync_dir] {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                Error::Persistence(format!("Failed to create {}: {}", dir.display(), e))
            })?;
        }

        let mut loaded = Self::load_records(&records_dir);
        for record in loaded.values_mut() {
            if sync_dir.join(record.id.to_string()).is_file() {
                record.sync = SyncState::Replicated;
            }
        }
        tracing::debug!(
            dir = %records_dir.display(),
            records = loaded.len(),
            "Opened JSON record store"
        );

        Ok(Self {
            records_dir,
            sync_dir,
            records: Arc::new(RwLock::new(loaded)),
        })
    }

    /// Directory holding the record files
    pub fn records_dir(&self) -> &Path {
        &self.records_dir
    }

    fn record_path(&self, id: &Uuid) -> PathBuf {
        self.records_dir.join(format!("{}.json", id))
    }

    fn sync_marker(&self, id: &Uuid) -> PathBuf {
        self.sync_dir.join(id.to_string())
    }

    async fn write_sync(&self, id: &Uuid, sync: SyncState) -> Result<()> {
        let marker = self.sync_marker(id);
        let result = match sync {
            SyncState::Replicated => tokio::fs::write(&marker, b"").await,
            SyncState::Pending => match tokio::fs::remove_file(&marker).await {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                other => other,
            },
        };
        result.map_err(|e| {
            Error::Persistence(format!("Failed to record sync state of {}: {}", id, e))
        })
    }

    /// Load every `*.json` record, skipping unreadable files
    fn load_records(dir: &Path) -> HashMap<Uuid, MemoryRecord> {
        let mut records = HashMap::new();
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to read directory {}: {}", dir.display(), e);
                }
                return records;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read_to_string(&path) {
                Ok(data) => match serde_json::from_str::<MemoryRecord>(&data) {
                    Ok(record) => {
                        records.insert(record.id, record);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read {}: {}", path.display(), e);
                }
            }
        }

        records
    }

    async fn write_record(&self, record: &MemoryRecord) -> Result<()> {
        let path = self.record_path(&record.id);
        let tmp = self.records_dir.join(format!(".{}.json.tmp", record.id));
        let json = serde_json::to_string_pretty(record)?;

        let write = async {
            tokio::fs::write(&tmp, json).await?;
            tokio::fs::rename(&tmp, &path).await
        };
        if let Err(e) = write.await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Error::Persistence(format!(
                "Failed to write record {}: {}",
                record.id, e
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl PrimaryStore for JsonFileStore {
    async fn insert(&self, record: &MemoryRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(Error::Persistence(format!(
                "record {} already exists",
                record.id
            )));
        }
        let record = pending(record);
        self.write_record(&record).await?;
        records.insert(record.id, record);
        Ok(())
    }

    async fn update(&self, record: &MemoryRecord) -> Result<()> {
        let mut records = self.records.write().await;
        let existing = records
            .get(&record.id)
            .ok_or_else(|| Error::NotFound(record.id.to_string()))?;
        check_immutable(existing, record)?;
        let record = pending(record);
        self.write_sync(&record.id, SyncState::Pending).await?;
        self.write_record(&record).await?;
        records.insert(record.id, record);
        Ok(())
    }

    async fn mark_synced(&self, id: &Uuid, sync: SyncState) -> Result<()> {
        let mut records = self.records.write().await;
        let existing = records
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        self.write_sync(id, sync).await?;
        existing.sync = sync;
        Ok(())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<MemoryRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn list_by_identity(&self, identity: &str) -> Result<Vec<MemoryRecord>> {
        Ok(sorted_for_identity(
            self.records.read().await.values(),
            identity,
        ))
    }

    async fn remove(&self, id: &Uuid) -> Result<Option<MemoryRecord>> {
        let mut records = self.records.write().await;
        if !records.contains_key(id) {
            return Ok(None);
        }
        match tokio::fs::remove_file(self.record_path(id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::Persistence(format!(
                    "Failed to remove record {}: {}",
                    id, e
                )))
            }
        }
        if let Err(e) = self.write_sync(id, SyncState::Pending).await {
            tracing::warn!(id = %id, "Left a stale sync marker: {}", e);
        }
        Ok(records.remove(id))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.records.read().await.len())
    }
}
