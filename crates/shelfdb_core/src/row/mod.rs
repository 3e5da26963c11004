//! Multi-version row storage.
//!
//! Every row holds one version per writing transaction. A version is
//! visible to a reader once its commit id is at or before the reader's
//! snapshot; a transaction always sees its own versions. Old versions are
//! collected by a periodic cleanup once no reader can see them.

mod cursor;
mod store;
pub(crate) mod table;
mod version;

pub use cursor::TableCursor;
pub use store::{RevertMode, RowStore};
pub use version::{Payload, ReadView, Row, RowVersion};
