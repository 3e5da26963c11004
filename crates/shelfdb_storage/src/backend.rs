//! Storage backend trait definition.

use crate::error::{StorageError, StorageResult};

/// A low-level storage backend for ShelfDB.
///
/// Storage backends are **opaque named-blob stores**. ShelfDB owns all format
/// interpretation - backends do not understand snapshots or journal entries.
///
/// # Invariants
///
/// - `write` atomically replaces the whole blob and is durable on return
/// - `read` returns exactly the bytes of the last successful `write`
/// - `list` returns names in ascending lexicographic order
/// - Backends must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
pub trait StorageBackend: Send + Sync {
    /// Reads the blob stored under `name`.
    ///
    /// Returns `Ok(None)` if no such blob exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or an I/O error occurs.
    fn read(&self, name: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Atomically replaces the blob stored under `name`.
    ///
    /// After this returns successfully the new contents survive process
    /// termination.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or an I/O error occurs.
    fn write(&self, name: &str, data: &[u8]) -> StorageResult<()>;

    /// Removes the blob stored under `name`.
    ///
    /// Returns whether a blob was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or an I/O error occurs.
    fn remove(&self, name: &str) -> StorageResult<bool>;

    /// Lists all blob names starting with `prefix`, in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing fails.
    fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;
}

/// Checks that a blob name is a relative `/`-separated path without empty,
/// `.` or `..` components.
///
/// # Errors
///
/// Returns [`StorageError::InvalidName`] describing the first violation.
pub fn validate_name(name: &str) -> StorageResult<()> {
    let invalid = |reason| StorageError::InvalidName {
        name: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.starts_with('/') {
        return Err(invalid("name must be relative"));
    }
    for component in name.split('/') {
        match component {
            "" => return Err(invalid("empty path component")),
            "." | ".." => return Err(invalid("relative path component")),
            c if c.ends_with(".tmp") => return Err(invalid("reserved suffix .tmp")),
            _ => {}
        }
    }
    Ok(())
}
