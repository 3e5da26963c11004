//! Cursors spanning shards.

use crate::document::Document;
use crate::engine::RowCursor;
use crate::error::{CoreError, CoreResult};
use crate::interval::Interval;
use crate::transaction::SnapshotPin;
use crate::types::RowKey;
use tracing::debug;

/// Opens the sub-cursor of one shard.
pub(crate) type ShardOpener =
    Box<dyn FnMut(&Interval<i64>) -> CoreResult<Box<dyn RowCursor>> + Send>;

/// A cursor that never yields.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyCursor;

impl Iterator for EmptyCursor {
    type Item = CoreResult<(RowKey, Document)>;

    fn next(&mut self) -> Option<Self::Item> {
        None
    }
}

impl RowCursor for EmptyCursor {
    fn close(&mut self) -> CoreResult<()> {
        Ok(())
    }
}

/// Chains the cursors of several shards in ascending key order.
///
/// Only one sub-cursor is open at a time: each is exhausted and closed
/// before the next shard is opened. Every sub-cursor reads through the view
/// captured when the composite was opened.
pub struct CompositeCursor {
    plan: std::vec::IntoIter<Interval<i64>>,
    opener: ShardOpener,
    current: Option<Box<dyn RowCursor>>,
    spent: Vec<Box<dyn RowCursor>>,
    failures: Vec<String>,
    closed: bool,
    pin: Option<SnapshotPin>,
}

impl CompositeCursor {
    pub(crate) fn new(plan: Vec<Interval<i64>>, opener: ShardOpener, pin: Option<SnapshotPin>) -> Self {
        Self {
            plan: plan.into_iter(),
            opener,
            current: None,
            spent: Vec::new(),
            failures: Vec::new(),
            closed: false,
            pin,
        }
    }

    /// Number of shards opened so far.
    pub fn shards_opened(&self) -> usize {
        self.spent.len() + usize::from(self.current.is_some())
    }

    fn retire_current(&mut self) {
        if let Some(mut cursor) = self.current.take() {
            if let Err(e) = cursor.close() {
                self.failures.push(e.to_string());
            }
            self.spent.push(cursor);
        }
    }
}

impl Iterator for CompositeCursor {
    type Item = CoreResult<(RowKey, Document)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.closed {
            return None;
        }
        loop {
            if let Some(cursor) = self.current.as_mut() {
                match cursor.next() {
                    Some(item) => return Some(item),
                    None => self.retire_current(),
                }
            }

            let Some(interval) = self.plan.next() else {
                self.pin = None;
                return None;
            };
            debug!(shard = %interval, "opening shard cursor");
            match (self.opener)(&interval) {
                Ok(cursor) => self.current = Some(cursor),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

impl RowCursor for CompositeCursor {
    /// Closes the open sub-cursor and every spent one, then reports every
    /// failure at once.
    fn close(&mut self) -> CoreResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.retire_current();
        for cursor in &mut self.spent {
            if let Err(e) = cursor.close() {
                self.failures.push(e.to_string());
            }
        }
        self.pin = None;

        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(CoreError::CursorClose {
                failures: std::mem::take(&mut self.failures),
            })
        }
    }
}

impl std::fmt::Debug for CompositeCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeCursor")
            .field("remaining", &self.plan.len())
            .field("opened", &self.shards_opened())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}
