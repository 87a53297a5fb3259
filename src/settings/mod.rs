//! Settings module: guarded configuration changes
//!
//! A `ConfigCell` owns the assistant settings together with the chat session
//! derived from them. Changes go through a `ConfigTransaction`, which
//! snapshots the declared fields, applies updates, runs the re-initialization
//! step and either commits or restores the snapshot.

pub mod transaction;
pub mod types;

pub use transaction::{
    ConfigCell, ConfigSnapshot, ConfigState, ConfigTransaction, FieldAccess, FieldRef,
    FieldTarget, TransactionState,
};
pub use types::{mask_api_key, AssistantSettings, ChatSession};
