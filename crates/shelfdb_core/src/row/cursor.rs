//! Lazy cursor over one row store.

use crate::document::Document;
use crate::engine::RowCursor;
use crate::error::CoreResult;
use crate::lifecycle::CursorId;
use crate::query::Predicate;
use crate::row::{ReadView, RowStore};
use crate::types::RowKey;

/// Iterates the rows of one store that match a predicate, in key order.
///
/// The key set is captured when the cursor opens; each row is resolved
/// against the cursor's view as the cursor advances. The cursor keeps the
/// store from spinning down (and its snapshot from being collected) until
/// it is exhausted, closed or dropped.
pub struct TableCursor {
    store: RowStore,
    id: Option<CursorId>,
    view: ReadView,
    predicate: Predicate,
    keys: std::vec::IntoIter<RowKey>,
}

impl TableCursor {
    pub(crate) fn new(
        store: RowStore,
        id: CursorId,
        view: ReadView,
        predicate: Predicate,
        keys: Vec<RowKey>,
    ) -> Self {
        Self {
            store,
            id: Some(id),
            view,
            predicate,
            keys: keys.into_iter(),
        }
    }

    /// The view rows are resolved against.
    pub fn view(&self) -> ReadView {
        self.view
    }

    /// Returns true once the cursor was exhausted or closed.
    pub fn is_closed(&self) -> bool {
        self.id.is_none()
    }

    fn release(&mut self) {
        if let Some(id) = self.id.take() {
            self.store.deregister_cursor(id);
        }
    }
}

impl Iterator for TableCursor {
    type Item = CoreResult<(RowKey, Document)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.id?;
        while let Some(key) = self.keys.next() {
            match self.store.read_visible(&key, &self.view) {
                Ok(Some(doc)) if self.predicate.matches(&key, &doc) => return Some(Ok((key, doc))),
                Ok(_) => {}
                Err(e) => {
                    self.release();
                    return Some(Err(e));
                }
            }
        }
        self.release();
        None
    }
}

impl RowCursor for TableCursor {
    fn close(&mut self) -> CoreResult<()> {
        self.release();
        Ok(())
    }
}

impl Drop for TableCursor {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for TableCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableCursor")
            .field("store", &self.store.name())
            .field("view", &self.view)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
