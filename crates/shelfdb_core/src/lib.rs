//! # ShelfDB Core
//!
//! Core engine of ShelfDB, an embedded document store.
//!
//! This crate provides:
//! - A multi-version row store per table with snapshot-isolated reads
//! - An engine lifecycle draining readers and flushes on shutdown
//! - A transaction coordinator journaling commits across tables
//! - Interval algebra lowering predicates to key ranges
//! - A shard router spreading a table over range shards
//!
//! ## Example
//!
//! ```rust,ignore
//! use shelfdb_core::{Database, Document, Predicate, Selector, StorageEngine};
//!
//! let db = Database::open_in_memory()?;
//! let events = db.sharded_table("events", 0, 100)?;
//! events.insert_row(None, 250.into(), Document::from("hello"))?;
//!
//! let cursor = events.query_table(None, &Predicate::gte(Selector::Key, 200))?;
//! for row in cursor {
//!     let (key, doc) = row?;
//!     println!("{key}: {doc}");
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod database;
mod document;
mod engine;
mod error;
mod interval;
mod journal;
mod lifecycle;
mod query;
mod registry;
mod row;
mod scheduler;
mod shard;
mod snapshot;
mod stats;
mod transaction;
mod types;

pub use config::Config;
pub use database::Database;
pub use document::{Document, ValueType};
pub use engine::{collect_rows, RowCursor, StorageEngine, Upserted};
pub use error::{CoreError, CoreResult};
pub use interval::{dissect, Interval, IntervalSet};
pub use journal::{Journal, JournalEntry, JournalScan};
pub use lifecycle::{CursorId, EngineState, Lifecycle, WritePermit};
pub use query::{DocumentUpdate, IndexSpec, IndexValue, Predicate, Resolved, Selector, Update};
pub use registry::StoreRegistry;
pub use row::{Payload, ReadView, RevertMode, Row, RowStore, RowVersion, TableCursor};
pub use scheduler::{Scheduler, SchedulerHandle, Task, TaskControl};
pub use shard::{CompositeCursor, EmptyCursor, IntervalProvider, ShardRouter};
pub use snapshot::{decode_snapshot, encode_snapshot, BlobSnapshotStore, SnapshotRow, SnapshotStore, TableSnapshot};
pub use stats::{StatsSnapshot, StoreStats};
pub use transaction::{RecoveryReport, SnapshotPin, Transaction, TransactionCoordinator, TransactionStatus};
pub use types::{CommitId, RowKey, TransactionId};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
