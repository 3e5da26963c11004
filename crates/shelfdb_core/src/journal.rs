//! Commit journal.
//!
//! Before a commit touches any store, the coordinator appends an entry
//! naming every store involved. The entry is removed once every store has
//! stamped and persisted the commit. Entries still present at open belong to
//! commits that may be half-applied and are reverted by recovery.

use crate::error::{CoreError, CoreResult};
use crate::types::{CommitId, TransactionId};
use serde::{Deserialize, Serialize};
use shelfdb_storage::StorageBackend;
use std::sync::Arc;
use tracing::debug;

const JOURNAL_PREFIX: &str = "journal/";

/// One in-progress commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// The committing transaction.
    pub transaction_id: TransactionId,
    /// Commit id allocated for it.
    pub commit_id: CommitId,
    /// Every store the transaction wrote to, sorted.
    pub tables: Vec<String>,
}

/// Result of reading the journal.
#[derive(Debug, Default)]
pub struct JournalScan {
    /// Decodable entries in transaction order.
    pub entries: Vec<JournalEntry>,
    /// Blob names of entries that could not be decoded.
    pub corrupt: Vec<String>,
}

/// The commit journal.
#[derive(Clone)]
pub struct Journal {
    backend: Arc<dyn StorageBackend>,
}

impl Journal {
    /// Creates a journal over `backend`.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    fn blob_name(txid: TransactionId) -> String {
        // Zero-padded so lexical order is transaction order.
        format!("{JOURNAL_PREFIX}{:020}", txid.as_u64())
    }

    /// Durably records an entry.
    pub fn append(&self, entry: &JournalEntry) -> CoreResult<()> {
        let mut data = Vec::new();
        ciborium::into_writer(entry, &mut data).map_err(|e| CoreError::codec(e.to_string()))?;
        self.backend
            .write(&Self::blob_name(entry.transaction_id), &data)?;
        debug!(txid = entry.transaction_id.as_u64(), tables = ?entry.tables, "journal append");
        Ok(())
    }

    /// Removes the entry of `txid`, if present.
    pub fn remove(&self, txid: TransactionId) -> CoreResult<()> {
        self.backend.remove(&Self::blob_name(txid))?;
        Ok(())
    }

    /// Removes a blob by name (used to discard corrupt entries).
    pub fn remove_blob(&self, name: &str) -> CoreResult<()> {
        self.backend.remove(name)?;
        Ok(())
    }

    /// Reads every entry.
    pub fn scan(&self) -> CoreResult<JournalScan> {
        let mut scan = JournalScan::default();
        for name in self.backend.list(JOURNAL_PREFIX)? {
            let Some(data) = self.backend.read(&name)? else {
                continue;
            };
            match ciborium::from_reader::<JournalEntry, _>(data.as_slice()) {
                Ok(entry) => scan.entries.push(entry),
                Err(_) => scan.corrupt.push(name),
            }
        }
        scan.entries.sort_by_key(|e| e.transaction_id);
        Ok(scan)
    }

    /// Number of outstanding entries, corrupt ones included.
    pub fn len(&self) -> CoreResult<usize> {
        Ok(self.backend.list(JOURNAL_PREFIX)?.len())
    }

    /// Returns true if no entry is outstanding.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }
}
