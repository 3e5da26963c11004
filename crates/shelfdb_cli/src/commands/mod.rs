//! CLI command implementations.

pub mod dump_journal;
pub mod inspect;
pub mod recover;
pub mod verify;

use shelfdb_storage::{FileBackend, StorageBackend};
use std::path::Path;
use std::sync::Arc;

/// Opens the blob backend of an existing database directory without
/// running recovery.
pub(crate) fn open_backend(path: &Path) -> Result<Arc<dyn StorageBackend>, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("No database found at {path:?}").into());
    }
    Ok(Arc::new(FileBackend::open(path)?))
}
