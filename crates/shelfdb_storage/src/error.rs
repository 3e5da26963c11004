//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The blob name is not usable as a storage key.
    #[error("invalid blob name {name:?}: {reason}")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Another process holds the storage directory lock.
    #[error("storage locked: another process has exclusive access to {0}")]
    Locked(String),

    /// A write was refused by an injected fault.
    #[error("injected write failure for {0}")]
    InjectedFailure(String),
}
