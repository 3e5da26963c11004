//! Point-in-time table snapshots.
//!
//! A store persists by writing one snapshot per table holding the committed
//! version of every live row. Snapshots go through the [`SnapshotStore`]
//! trait; [`BlobSnapshotStore`] keeps them as blobs in a
//! [`StorageBackend`].
//!
//! ## Blob Format
//!
//! ```text
//! | magic (4) | version (2) | sha256 of body (32) | CBOR body... |
//! ```

use crate::document::Document;
use crate::error::{CoreError, CoreResult};
use crate::types::RowKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use shelfdb_storage::StorageBackend;
use std::sync::Arc;

/// Magic bytes for snapshot blobs.
const SNAPSHOT_MAGIC: [u8; 4] = *b"SHLF";
/// Current snapshot format version.
const SNAPSHOT_VERSION: u16 = 1;
/// Header size (magic + version + checksum).
const HEADER_SIZE: usize = 4 + 2 + 32;

const TABLE_PREFIX: &str = "tables/";
const TABLE_SUFFIX: &str = ".snap";

/// One persisted row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRow {
    /// Row key.
    pub key: RowKey,
    /// Transaction that wrote the version.
    pub transaction_id: u64,
    /// Commit that made it visible.
    pub commit_id: u64,
    /// The document.
    pub document: Document,
}

/// Every live row of one table, as of one snapshot reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSnapshot {
    /// Table (or shard) name.
    pub table: String,
    /// Rows in ascending key order.
    pub rows: Vec<SnapshotRow>,
}

impl TableSnapshot {
    /// Creates an empty snapshot.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            rows: Vec::new(),
        }
    }

    /// Largest transaction or commit id recorded in the snapshot.
    pub fn high_water(&self) -> u64 {
        self.rows
            .iter()
            .map(|r| r.transaction_id.max(r.commit_id))
            .max()
            .unwrap_or(0)
    }
}

/// Reads and writes table snapshots.
pub trait SnapshotStore: Send + Sync {
    /// Loads the snapshot of `table`, or `None` if it was never saved.
    fn load(&self, table: &str) -> CoreResult<Option<TableSnapshot>>;

    /// Atomically replaces the snapshot of `snapshot.table`.
    fn save(&self, snapshot: &TableSnapshot) -> CoreResult<()>;

    /// Names of every table with a saved snapshot, sorted.
    fn tables(&self) -> CoreResult<Vec<String>>;
}

/// Snapshot store over a named-blob backend.
pub struct BlobSnapshotStore {
    backend: Arc<dyn StorageBackend>,
}

impl BlobSnapshotStore {
    /// Creates a snapshot store writing to `backend`.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    fn blob_name(table: &str) -> String {
        format!("{TABLE_PREFIX}{table}{TABLE_SUFFIX}")
    }
}

impl SnapshotStore for BlobSnapshotStore {
    fn load(&self, table: &str) -> CoreResult<Option<TableSnapshot>> {
        match self.backend.read(&Self::blob_name(table))? {
            Some(data) => decode_snapshot(&data).map(Some),
            None => Ok(None),
        }
    }

    fn save(&self, snapshot: &TableSnapshot) -> CoreResult<()> {
        let data = encode_snapshot(snapshot)?;
        self.backend.write(&Self::blob_name(&snapshot.table), &data)?;
        Ok(())
    }

    fn tables(&self) -> CoreResult<Vec<String>> {
        Ok(self
            .backend
            .list(TABLE_PREFIX)?
            .into_iter()
            .filter_map(|name| {
                name.strip_prefix(TABLE_PREFIX)
                    .and_then(|n| n.strip_suffix(TABLE_SUFFIX))
                    .map(str::to_string)
            })
            .collect())
    }
}

/// Encodes a snapshot blob.
pub fn encode_snapshot(snapshot: &TableSnapshot) -> CoreResult<Vec<u8>> {
    let mut body = Vec::new();
    ciborium::into_writer(snapshot, &mut body).map_err(|e| CoreError::codec(e.to_string()))?;

    let mut data = Vec::with_capacity(HEADER_SIZE + body.len());
    data.extend_from_slice(&SNAPSHOT_MAGIC);
    data.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    data.extend_from_slice(&Sha256::digest(&body));
    data.extend_from_slice(&body);
    Ok(data)
}

/// Decodes and verifies a snapshot blob.
pub fn decode_snapshot(data: &[u8]) -> CoreResult<TableSnapshot> {
    if data.len() < HEADER_SIZE {
        return Err(CoreError::codec("snapshot too short"));
    }
    if data[0..4] != SNAPSHOT_MAGIC {
        return Err(CoreError::codec("invalid snapshot magic"));
    }
    let version = u16::from_le_bytes([data[4], data[5]]);
    if version != SNAPSHOT_VERSION {
        return Err(CoreError::codec(format!(
            "unsupported snapshot version {version}"
        )));
    }

    let body = &data[HEADER_SIZE..];
    if Sha256::digest(body).as_slice() != &data[6..HEADER_SIZE] {
        return Err(CoreError::codec("snapshot checksum mismatch"));
    }
    ciborium::from_reader(body).map_err(|e| CoreError::codec(e.to_string()))
}
