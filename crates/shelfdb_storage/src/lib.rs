//! # ShelfDB Storage
//!
//! Storage backend trait and implementations for ShelfDB.
//!
//! This crate provides the lowest-level storage abstraction for ShelfDB.
//! Backends are **opaque named-blob stores** - they do not interpret the
//! bytes they hold.
//!
//! ## Design Principles
//!
//! - A blob is addressed by a `/`-separated name such as `tables/users.snap`
//! - `write` replaces a blob atomically: readers see the old or the new bytes
//! - No knowledge of snapshot or journal formats
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral databases
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use shelfdb_storage::{StorageBackend, InMemoryBackend};
//!
//! let backend = InMemoryBackend::new();
//! backend.write("tables/users.snap", b"hello").unwrap();
//! assert_eq!(backend.read("tables/users.snap").unwrap(), Some(b"hello".to_vec()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::{validate_name, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
