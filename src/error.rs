//! Error types for the storage layer
//!
//! Every fallible library operation returns [`StoreError`]. No operation retries:
//! errors surface with their exact cause, wrapped at most once with the context
//! (migration step or transaction name) in which they happened.

use std::fmt;
use thiserror::Error;

/// Result alias used throughout the storage layer
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Direction in which a migration step was being applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationDirection {
    Up,
    Down,
}

impl fmt::Display for MigrationDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationDirection::Up => write!(f, "up"),
            MigrationDirection::Down => write!(f, "down"),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// Invalid arguments or setup; never retried
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Lifecycle misuse, e.g. close without a matching open or use after teardown
    #[error("State error: {0}")]
    State(String),

    /// A migration step failed; the store is left at the last completed step
    #[error("Migration step {step} ({name}) failed while migrating {direction}: {source}")]
    Migration {
        step: usize,
        name: String,
        direction: MigrationDirection,
        #[source]
        source: Box<StoreError>,
    },

    /// The persisted schema version is unknown to the supplied migrations
    #[error("Database schema version {persisted} is newer than the {available} known migrations")]
    UnknownVersion { persisted: u32, available: usize },

    /// A statement inside a transaction failed and the transaction was rolled back
    #[error("Transaction '{name}' rolled back: {source}")]
    Transaction {
        name: String,
        #[source]
        source: Box<StoreError>,
    },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        StoreError::Configuration(msg.into())
    }

    pub(crate) fn state(msg: impl Into<String>) -> Self {
        StoreError::State(msg.into())
    }

    /// Whether this error is a configuration error
    pub fn is_configuration(&self) -> bool {
        matches!(self, StoreError::Configuration(_))
    }

    /// Whether this error is a lifecycle state error
    pub fn is_state(&self) -> bool {
        matches!(self, StoreError::State(_))
    }

    /// Whether this error comes from the migration engine
    pub fn is_migration(&self) -> bool {
        matches!(
            self,
            StoreError::Migration { .. } | StoreError::UnknownVersion { .. }
        )
    }

    /// Whether this error is a rolled-back transaction
    pub fn is_transaction(&self) -> bool {
        matches!(self, StoreError::Transaction { .. })
    }

    /// The innermost error, looking through migration and transaction wrappers
    pub fn root_cause(&self) -> &StoreError {
        match self {
            StoreError::Migration { source, .. } | StoreError::Transaction { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }
}
