//! Snapshot / apply / commit / rollback over settings and session
//!
//! ```text
//!   begin ──▶ Open ──attempt_commit ok──▶ Committed
//!              │  └──attempt_commit err─┐
//!              └──rollback / drop ──────┴─▶ RolledBack
//!                      restore error ─────▶ Failed (cell poisoned)
//! ```
//!
//! An open transaction owns the cell's mutex guard, so no other transaction
//! and no reader can observe or touch the values until it reaches a terminal
//! state. Declared fields are snapshotted at `begin` and restored exactly on
//! rollback.

use crate::error::{BoxError, Error, Result};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
pub use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Field access by name
///
/// Each field is read and written on its own, so state that is not exposed
/// by name (skipped or private fields) is never touched. Implement with
/// [`field_access!`](crate::field_access).
pub trait FieldAccess {
    /// Current value of `name`
    fn get_field(&self, name: &str) -> Result<Value>;

    /// Overwrite `name` with `value`
    fn set_field(&mut self, name: &str, value: Value) -> Result<()>;
}

/// Serialize a single field
pub fn read_field<T: Serialize>(slot: &T) -> Result<Value> {
    Ok(serde_json::to_value(slot)?)
}

/// Replace a single field; the slot is left as-is when `value` does not fit
pub fn write_field<T: DeserializeOwned>(slot: &mut T, name: &str, value: Value) -> Result<()> {
    *slot = serde_json::from_value(value)
        .map_err(|e| Error::Validation(format!("invalid value for '{}': {}", name, e)))?;
    Ok(())
}

#[doc(hidden)]
pub fn unknown_field(name: &str) -> Error {
    Error::Validation(format!("unknown field '{}'", name))
}

/// Implement [`FieldAccess`] from a `"name" => field` table
///
/// ```ignore
/// field_access!(ChatSession {
///     "activeModel" => active_model,
///     "connected" => connected,
/// });
/// ```
#[macro_export]
macro_rules! field_access {
    ($ty:ty { $($name:literal => $field:ident),+ $(,)? }) => {
        impl $crate::settings::FieldAccess for $ty {
            fn get_field(&self, name: &str) -> $crate::Result<$crate::settings::transaction::Value> {
                match name {
                    $($name => $crate::settings::transaction::read_field(&self.$field),)+
                    other => Err($crate::settings::transaction::unknown_field(other)),
                }
            }

            fn set_field(&mut self, name: &str, value: $crate::settings::transaction::Value) -> $crate::Result<()> {
                match name {
                    $($name => $crate::settings::transaction::write_field(&mut self.$field, name, value),)+
                    other => Err($crate::settings::transaction::unknown_field(other)),
                }
            }
        }
    };
}

/// Which object a field lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldTarget {
    Config,
    Session,
}

/// A named field on the config or the session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    pub target: FieldTarget,
    pub name: String,
}

impl FieldRef {
    pub fn config(name: impl Into<String>) -> Self {
        Self {
            target: FieldTarget::Config,
            name: name.into(),
        }
    }

    pub fn session(name: impl Into<String>) -> Self {
        Self {
            target: FieldTarget::Session,
            name: name.into(),
        }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target {
            FieldTarget::Config => write!(f, "config.{}", self.name),
            FieldTarget::Session => write!(f, "session.{}", self.name),
        }
    }
}

/// Transaction lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Open,
    Committed,
    RolledBack,
    /// Restore failed; the cell is poisoned
    Failed,
}

impl TransactionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionState::Open)
    }
}

/// Values of the declared fields captured at `begin`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub taken_at: DateTime<Utc>,
    pub fields: Vec<(FieldRef, Value)>,
}

impl ConfigSnapshot {
    /// Whether `field` was declared
    pub fn declares(&self, field: &FieldRef) -> bool {
        self.fields.iter().any(|(f, _)| f == field)
    }

    /// Captured value of `field`
    pub fn value(&self, field: &FieldRef) -> Option<&Value> {
        self.fields.iter().find(|(f, _)| f == field).map(|(_, v)| v)
    }
}

/// Settings and their dependent session, guarded together
#[derive(Debug)]
pub struct ConfigState<C, S> {
    pub config: C,
    pub session: S,
}

impl<C: FieldAccess, S: FieldAccess> ConfigState<C, S> {
    fn read(&self, field: &FieldRef) -> Result<Value> {
        match field.target {
            FieldTarget::Config => self.config.get_field(&field.name),
            FieldTarget::Session => self.session.get_field(&field.name),
        }
    }

    fn write(&mut self, field: &FieldRef, value: Value) -> Result<()> {
        match field.target {
            FieldTarget::Config => self.config.set_field(&field.name, value),
            FieldTarget::Session => self.session.set_field(&field.name, value),
        }
    }
}

/// Shared owner of a config/session pair
///
/// Transactions are the only mutation path.
pub struct ConfigCell<C, S> {
    inner: Arc<Mutex<ConfigState<C, S>>>,
    poisoned: Arc<AtomicBool>,
}

impl<C, S> Clone for ConfigCell<C, S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            poisoned: self.poisoned.clone(),
        }
    }
}

impl<C: FieldAccess, S: FieldAccess> ConfigCell<C, S> {
    pub fn new(config: C, session: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ConfigState { config, session })),
            poisoned: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Read both values; waits for any open transaction to finish
    pub async fn read<R>(&self, f: impl FnOnce(&C, &S) -> R) -> R {
        let state = self.inner.lock().await;
        f(&state.config, &state.session)
    }

    /// Whether a failed rollback left the values inconsistent
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::SeqCst)
    }

    /// Open a transaction, waiting for the current one to finish
    pub async fn begin(&self, fields: &[FieldRef]) -> Result<ConfigTransaction<C, S>> {
        self.check_poisoned()?;
        let guard = self.inner.clone().lock_owned().await;
        self.check_poisoned()?;
        ConfigTransaction::open(guard, self.poisoned.clone(), fields)
    }

    /// Open a transaction or fail with `TransactionBusy`
    pub fn try_begin(&self, fields: &[FieldRef]) -> Result<ConfigTransaction<C, S>> {
        self.check_poisoned()?;
        let guard = self
            .inner
            .clone()
            .try_lock_owned()
            .map_err(|_| Error::TransactionBusy)?;
        ConfigTransaction::open(guard, self.poisoned.clone(), fields)
    }

    fn check_poisoned(&self) -> Result<()> {
        if self.is_poisoned() {
            return Err(Error::ConfigPoisoned);
        }
        Ok(())
    }
}

/// An open change to a `ConfigCell`
pub struct ConfigTransaction<C: FieldAccess, S: FieldAccess> {
    id: Uuid,
    guard: Option<OwnedMutexGuard<ConfigState<C, S>>>,
    snapshot: ConfigSnapshot,
    state: TransactionState,
    poisoned: Arc<AtomicBool>,
}

impl<C: FieldAccess, S: FieldAccess> ConfigTransaction<C, S> {
    fn open(
        guard: OwnedMutexGuard<ConfigState<C, S>>,
        poisoned: Arc<AtomicBool>,
        fields: &[FieldRef],
    ) -> Result<Self> {
        let mut captured: Vec<(FieldRef, Value)> = Vec::with_capacity(fields.len());
        for field in fields {
            if captured.iter().any(|(f, _)| f == field) {
                continue;
            }
            let value = guard.read(field)?;
            captured.push((field.clone(), value));
        }

        let id = Uuid::new_v4();
        tracing::debug!(
            transaction = %id,
            fields = ?captured.iter().map(|(f, _)| f.to_string()).collect::<Vec<_>>(),
            "Opened config transaction"
        );
        Ok(Self {
            id,
            guard: Some(guard),
            snapshot: ConfigSnapshot {
                taken_at: Utc::now(),
                fields: captured,
            },
            state: TransactionState::Open,
            poisoned,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn snapshot(&self) -> &ConfigSnapshot {
        &self.snapshot
    }

    /// Live config while open
    pub fn config(&self) -> Result<&C> {
        Ok(&self.live()?.config)
    }

    /// Live session while open
    pub fn session(&self) -> Result<&S> {
        Ok(&self.live()?.session)
    }

    /// Write values into the live config/session
    ///
    /// Every field must have been declared at `begin`. A value that fails to
    /// deserialize stops the apply; earlier writes stay until rollback.
    pub fn apply<I>(&mut self, updates: I) -> Result<()>
    where
        I: IntoIterator<Item = (FieldRef, Value)>,
    {
        self.live()?;
        let updates: Vec<(FieldRef, Value)> = updates.into_iter().collect();
        if let Some((field, _)) = updates.iter().find(|(f, _)| !self.snapshot.declares(f)) {
            return Err(Error::Validation(format!(
                "field {} was not declared when the transaction began",
                field
            )));
        }

        let state = self.live_mut()?;
        for (field, value) in updates {
            state.write(&field, value)?;
        }
        Ok(())
    }

    /// Run `risky_init`; commit on success, roll back on failure
    pub fn attempt_commit<T, E, F>(&mut self, risky_init: F) -> Result<T>
    where
        F: FnOnce(&C, &mut S) -> std::result::Result<T, E>,
        E: Into<BoxError>,
    {
        let state = self.live_mut()?;
        let result = risky_init(&state.config, &mut state.session);
        self.settle(result.map_err(Into::into))
    }

    /// Async form of `attempt_commit`
    pub async fn attempt_commit_async<T, E, F>(&mut self, risky_init: F) -> Result<T>
    where
        F: for<'a> FnOnce(&'a C, &'a mut S) -> BoxFuture<'a, std::result::Result<T, E>>,
        E: Into<BoxError>,
    {
        let state = self.live_mut()?;
        let result = risky_init(&state.config, &mut state.session).await;
        self.settle(result.map_err(Into::into))
    }

    /// Restore every declared field; idempotent once rolled back
    pub fn rollback(&mut self) -> Result<()> {
        match self.state {
            TransactionState::RolledBack => Ok(()),
            TransactionState::Committed | TransactionState::Failed => {
                Err(Error::TransactionClosed)
            }
            TransactionState::Open => self
                .restore()
                .map_err(|reason| Error::RollbackFailed {
                    reason,
                    source: None,
                }),
        }
    }

    /// Write the snapshot back; the error is the joined field failures
    fn restore(&mut self) -> std::result::Result<(), String> {
        let Some(state) = self.guard.as_deref_mut() else {
            return Err("transaction holds no state".to_string());
        };
        let mut failures = Vec::new();
        for (field, value) in &self.snapshot.fields {
            if let Err(e) = state.write(field, value.clone()) {
                failures.push(format!("{}: {}", field, e));
            }
        }

        if failures.is_empty() {
            self.finish(TransactionState::RolledBack);
            tracing::info!(transaction = %self.id, "Rolled back config transaction");
            Ok(())
        } else {
            self.poisoned.store(true, Ordering::SeqCst);
            self.finish(TransactionState::Failed);
            let reason = failures.join("; ");
            tracing::error!(transaction = %self.id, "Config rollback failed: {}", reason);
            Err(reason)
        }
    }

    fn settle<T>(&mut self, result: std::result::Result<T, BoxError>) -> Result<T> {
        match result {
            Ok(value) => {
                self.finish(TransactionState::Committed);
                tracing::info!(transaction = %self.id, "Committed config transaction");
                Ok(value)
            }
            Err(source) => {
                tracing::warn!(
                    transaction = %self.id,
                    "Re-initialization failed, rolling back: {}",
                    source
                );
                match self.restore() {
                    Ok(()) => Err(Error::TransactionAborted(source)),
                    Err(reason) => Err(Error::RollbackFailed {
                        reason,
                        source: Some(source),
                    }),
                }
            }
        }
    }

    fn finish(&mut self, state: TransactionState) {
        self.state = state;
        self.guard = None;
    }

    fn live(&self) -> Result<&ConfigState<C, S>> {
        match (&self.state, &self.guard) {
            (TransactionState::Open, Some(guard)) => Ok(&**guard),
            _ => Err(Error::TransactionClosed),
        }
    }

    fn live_mut(&mut self) -> Result<&mut ConfigState<C, S>> {
        match (&self.state, &mut self.guard) {
            (TransactionState::Open, Some(guard)) => Ok(&mut **guard),
            _ => Err(Error::TransactionClosed),
        }
    }
}

impl<C: FieldAccess, S: FieldAccess> Drop for ConfigTransaction<C, S> {
    fn drop(&mut self) {
        if self.state == TransactionState::Open {
            tracing::warn!(transaction = %self.id, "Config transaction dropped while open");
            if let Err(e) = self.rollback() {
                tracing::error!(transaction = %self.id, "Rollback on drop failed: {}", e);
            }
        }
    }
}
