//! Storage engine interface.
//!
//! A [`StorageEngine`] is anything rows can be read from and written to: a
//! single [`RowStore`](crate::RowStore) or a [`ShardRouter`](crate::ShardRouter)
//! spreading one table over many stores. Every operation takes an optional
//! transaction; without one the operation commits on its own.

use crate::document::Document;
use crate::error::CoreResult;
use crate::query::{DocumentUpdate, Predicate};
use crate::transaction::Transaction;
use crate::types::RowKey;

/// A lazy, closeable sequence of matching rows.
///
/// Items are yielded in ascending key order. A cursor releases its
/// resources once exhausted; [`RowCursor::close`] releases them early.
pub trait RowCursor: Iterator<Item = CoreResult<(RowKey, Document)>> + Send {
    /// Releases the cursor. Closing twice is a no-op.
    fn close(&mut self) -> CoreResult<()>;
}

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upserted {
    /// No live row existed.
    Inserted,
    /// A live row was replaced.
    Updated,
}

/// Row-level operations.
pub trait StorageEngine: Send + Sync {
    /// Inserts a new row.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateKey`](crate::CoreError::DuplicateKey)
    /// if a live row with `key` is visible.
    fn insert_row(&self, txn: Option<&Transaction>, key: RowKey, doc: Document) -> CoreResult<()>;

    /// Reads the row visible under `txn` (or the latest committed state).
    fn read_row(&self, txn: Option<&Transaction>, key: &RowKey) -> CoreResult<Option<Document>>;

    /// Opens a cursor over every row matching `predicate`.
    fn query_table(
        &self,
        txn: Option<&Transaction>,
        predicate: &Predicate,
    ) -> CoreResult<Box<dyn RowCursor>>;

    /// Replaces the document of an existing row.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::KeyNotFound`](crate::CoreError::KeyNotFound) if
    /// no live row with `key` is visible.
    fn replace_row(&self, txn: Option<&Transaction>, key: RowKey, doc: Document) -> CoreResult<()>;

    /// Applies `update` to an existing row. Returns false if the update left
    /// the document unchanged, in which case nothing is written.
    fn update_row(
        &self,
        txn: Option<&Transaction>,
        key: &RowKey,
        update: &dyn DocumentUpdate,
    ) -> CoreResult<bool>;

    /// Applies `update` to every row matching `predicate` and returns how
    /// many rows changed.
    fn update_all(
        &self,
        txn: Option<&Transaction>,
        predicate: &Predicate,
        update: &dyn DocumentUpdate,
    ) -> CoreResult<usize>;

    /// Inserts or replaces a row.
    fn upsert_row(&self, txn: Option<&Transaction>, key: RowKey, doc: Document) -> CoreResult<Upserted>;

    /// Deletes an existing row.
    fn delete_row(&self, txn: Option<&Transaction>, key: &RowKey) -> CoreResult<()>;

    /// Deletes every row matching `predicate` and returns how many were
    /// deleted.
    fn delete_all(&self, txn: Option<&Transaction>, predicate: &Predicate) -> CoreResult<usize>;
}

/// Drains a cursor into a vector, closing it on error.
pub fn collect_rows(mut cursor: Box<dyn RowCursor>) -> CoreResult<Vec<(RowKey, Document)>> {
    let mut rows = Vec::new();
    while let Some(item) = cursor.next() {
        match item {
            Ok(row) => rows.push(row),
            Err(e) => {
                cursor.close()?;
                return Err(e);
            }
        }
    }
    cursor.close()?;
    Ok(rows)
}
