//! FactVault error types

use thiserror::Error;

/// Boxed error produced by a caller-supplied re-initialization step
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// FactVault error type
///
/// Duplicate rejection and degraded replication are not errors; they are
/// reported through `StoreOutcome`.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Content or request rejected before any side effect
    #[error("Validation error: {0}")]
    Validation(String),

    /// Primary store write or read failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Secondary store upload failed or timed out
    #[error("Replication error: {0}")]
    Replication(String),

    /// Secondary index rebuild failed or timed out
    #[error("Rebuild error: {0}")]
    Rebuild(String),

    /// Record not found for the given identity
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Risky re-initialization failed; the transaction was rolled back
    #[error("Transaction aborted: {0}")]
    TransactionAborted(#[source] BoxError),

    /// Restoring a snapshot failed; live state is partially restored
    #[error("Rollback failed: {reason}")]
    RollbackFailed {
        reason: String,
        /// Re-initialization error that triggered the rollback
        source: Option<BoxError>,
    },

    /// A previous rollback failed and the config cell is unusable
    #[error("Configuration cell is poisoned by a failed rollback")]
    ConfigPoisoned,

    /// Operation on a committed or rolled-back transaction
    #[error("Transaction is already closed")]
    TransactionClosed,

    /// Another transaction is open on the same config cell
    #[error("Another transaction is open on this configuration")]
    TransactionBusy,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error must be surfaced to the user as an actionable failure
    pub fn is_actionable(&self) -> bool {
        matches!(
            self,
            Error::Persistence(_) | Error::Rebuild(_) | Error::RollbackFailed { .. }
        )
    }
}

/// Result type alias for FactVault operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actionable_errors() {
        assert!(Error::Persistence("disk full".into()).is_actionable());
        assert!(Error::Rebuild("timeout".into()).is_actionable());
        assert!(Error::RollbackFailed {
            reason: "model".into(),
            source: None
        }
        .is_actionable());
        assert!(!Error::Validation("empty".into()).is_actionable());
        assert!(!Error::TransactionClosed.is_actionable());
    }

    #[test]
    fn test_transaction_aborted_keeps_source() {
        let source: BoxError = "model not found".into();
        let err = Error::TransactionAborted(source);
        assert_eq!(err.to_string(), "Transaction aborted: model not found");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_rollback_failed_keeps_trigger() {
        let err = Error::RollbackFailed {
            reason: "session.value: locked".into(),
            source: Some("connect refused".into()),
        };
        assert_eq!(err.to_string(), "Rollback failed: session.value: locked");
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("connect refused"));
    }
}
