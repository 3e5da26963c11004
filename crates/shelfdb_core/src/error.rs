//! Error types for ShelfDB core.

use crate::types::RowKey;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in ShelfDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error (flush, journal or snapshot I/O).
    #[error("storage error: {0}")]
    Io(#[from] shelfdb_storage::StorageError),

    /// Snapshot or journal encoding failed.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// Insert collided with a visible live row.
    #[error("duplicate key {key} in table {table}")]
    DuplicateKey {
        /// Table the insert targeted.
        table: String,
        /// The colliding key.
        key: RowKey,
    },

    /// A mutation targeted an absent or deleted row.
    #[error("key {key} not found in table {table}")]
    KeyNotFound {
        /// Table the mutation targeted.
        table: String,
        /// The missing key.
        key: RowKey,
    },

    /// Snapshot isolation violation detected at commit.
    #[error("write conflict on key {key} in table {table}: committed by another transaction at {committed_at}")]
    WriteConflict {
        /// Table holding the conflicting row.
        table: String,
        /// The conflicting row.
        key: RowKey,
        /// Commit id of the competing version.
        committed_at: u64,
    },

    /// Predicate demands a value type incompatible with an index.
    #[error("invalid query: {message}")]
    InvalidQuery {
        /// Description of the problem.
        message: String,
    },

    /// Operation attempted outside its legal lifecycle state.
    #[error("engine {table} is {state}: {message}")]
    EngineState {
        /// Store name.
        table: String,
        /// Current lifecycle state.
        state: String,
        /// What was attempted.
        message: String,
    },

    /// Commit or revert on a completed transaction, or reentrant open.
    #[error("transaction state error: {message}")]
    TransactionState {
        /// Description of the problem.
        message: String,
    },

    /// A revert left one or more stores possibly inconsistent.
    #[error("revert of transaction {transaction} incomplete; tables may be inconsistent: {}", tables.join(", "))]
    RevertIncomplete {
        /// The reverted transaction id.
        transaction: u64,
        /// Tables whose revert failed.
        tables: Vec<String>,
        /// Failure message per table, in the same order.
        failures: Vec<String>,
    },

    /// One or more sub-cursors failed to close.
    #[error("failed to close {} cursor(s): {}", failures.len(), failures.join("; "))]
    CursorClose {
        /// Failure messages, one per sub-cursor.
        failures: Vec<String>,
    },
}

impl CoreError {
    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates an invalid query error.
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }

    /// Creates a transaction state error.
    pub fn transaction_state(message: impl Into<String>) -> Self {
        Self::TransactionState {
            message: message.into(),
        }
    }

    /// Creates an engine state error.
    pub fn engine_state(
        table: impl Into<String>,
        state: impl ToString,
        message: impl Into<String>,
    ) -> Self {
        Self::EngineState {
            table: table.into(),
            state: state.to_string(),
            message: message.into(),
        }
    }

    /// Returns true for [`CoreError::WriteConflict`].
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::WriteConflict { .. })
    }
}
