//! FactVault - Personal fact memory with a replicated graph index
//!
//! FactVault stores short facts about a user ("I have a pet dog"), rejects
//! exact and near duplicates, labels each fact with topics from a keyword
//! rule table, and mirrors it to a secondary graph-indexed store.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     MemoryCoordinator                        │
//! │   per-identity lock ─▶ DuplicateDetector ─▶ RuleClassifier   │
//! │                             │                                │
//! │                ┌────────────▼─────────────┐                  │
//! │                │  PrimaryStore (authority) │                 │
//! │                └────────────┬─────────────┘                  │
//! │                             │ same topics                    │
//! │                ┌────────────▼─────────────┐                  │
//! │                │ ReplicationClient (graph) │                 │
//! │                └──────────────────────────┘                  │
//! └──────────────────────────────────────────────────────────────┘
//!        ▲                                   │ one rebuild per batch
//!   BatchStager ─────────────────────────────┘
//!
//!   ConfigCell ─▶ ConfigTransaction: snapshot, apply, commit or rollback
//! ```
//!
//! ## Modules
//!
//! - [`memory`]: records, dedup, stores, coordinator and batch staging
//! - [`topics`]: keyword/phrase topic rules and classifier
//! - [`replication`]: secondary store client trait and HTTP adapter
//! - [`settings`]: transactional settings changes
//! - [`config`]: configuration management
//! - [`logging`]: tracing subscriber setup

pub mod config;
pub mod error;
pub mod logging;
pub mod memory;
pub mod replication;
pub mod settings;
pub mod testing;
pub mod topics;

pub use config::FactVaultConfig;
pub use error::{Error, Result};
pub use memory::{
    BatchReport, BatchStager, MemoryCoordinator, MemoryRecord, RebuildOutcome, StoreOutcome,
    StoreRequest,
};
pub use replication::{HttpGraphClient, ReplicationClient};
pub use settings::{ConfigCell, ConfigTransaction, FieldRef};
pub use topics::RuleClassifier;
