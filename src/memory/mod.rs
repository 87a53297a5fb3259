//! Memory system: facts about a user, deduplicated and replicated
//!
//! ```text
//! StoreRequest ─▶ MemoryCoordinator ─┬─▶ DuplicateDetector
//!                                    ├─▶ RuleClassifier
//!                                    ├─▶ PrimaryStore        (authoritative)
//!                                    └─▶ ReplicationClient   (graph index)
//! ```
//!
//! `BatchStager` fans many facts through the coordinator with deferred
//! replication and a single index rebuild at the end.

pub mod batch;
pub mod coordinator;
pub mod dedup;
pub mod record;
pub mod store;

pub use batch::{BatchItem, BatchItemReport, BatchReport, BatchStager, IngestionBatch, RebuildOutcome};
pub use coordinator::{MemoryCoordinator, ReconcileReport, StoreOutcome, StoreRequest};
pub use dedup::{DuplicateDetector, DuplicateKind, DuplicateVerdict};
pub use record::{
    content_fingerprint, MemoryRecord, MemoryRecordBuilder, Provenance, ProvenanceKind, SyncState,
};
pub use store::{open_store, InMemoryStore, JsonFileStore, PrimaryStore};
