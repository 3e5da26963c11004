//! In-memory storage backend for testing.

use crate::backend::{validate_name, StorageBackend};
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// An in-memory storage backend.
///
/// This backend stores all blobs in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral databases that don't need persistence
///
/// Cloning the contents with [`InMemoryBackend::with_blobs`] lets tests
/// simulate a process restart over the same "disk".
///
/// # Example
///
/// ```rust
/// use shelfdb_storage::{StorageBackend, InMemoryBackend};
///
/// let backend = InMemoryBackend::new();
/// backend.write("a", b"1").unwrap();
/// assert_eq!(backend.list("").unwrap(), vec!["a".to_string()]);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    blobs: RwLock<BTreeMap<String, Vec<u8>>>,
    failing_writes: AtomicUsize,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend pre-populated with blobs.
    ///
    /// Useful for testing recovery scenarios.
    #[must_use]
    pub fn with_blobs(blobs: BTreeMap<String, Vec<u8>>) -> Self {
        Self {
            blobs: RwLock::new(blobs),
            failing_writes: AtomicUsize::new(0),
        }
    }

    /// Returns a copy of every stored blob.
    #[must_use]
    pub fn blobs(&self) -> BTreeMap<String, Vec<u8>> {
        self.blobs.read().clone()
    }

    /// Makes the next `count` writes fail with [`StorageError::InjectedFailure`].
    ///
    /// Removals are not affected.
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read(&self, name: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_name(name)?;
        Ok(self.blobs.read().get(name).cloned())
    }

    fn write(&self, name: &str, data: &[u8]) -> StorageResult<()> {
        validate_name(name)?;
        if self.take_injected_failure() {
            return Err(StorageError::InjectedFailure(name.to_string()));
        }
        self.blobs.write().insert(name.to_string(), data.to_vec());
        Ok(())
    }

    fn remove(&self, name: &str) -> StorageResult<bool> {
        validate_name(name)?;
        Ok(self.blobs.write().remove(name).is_some())
    }

    fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .blobs
            .read()
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }
}
