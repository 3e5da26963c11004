//! Store statistics.
//!
//! Every row store keeps a set of atomic counters that can be read while
//! operations are in progress.
//!
//! # Usage
//!
//! ```rust,ignore
//! let users = db.table("users")?;
//! users.insert_row(None, 1.into(), doc)?;
//!
//! let stats = users.stats();
//! println!("Writes: {}", stats.writes);
//! println!("Flushes: {}", stats.flushes);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-store statistics.
///
/// Values are monotonically increasing.
#[derive(Debug, Default)]
pub struct StoreStats {
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    scans: AtomicU64,
    commits: AtomicU64,
    conflicts: AtomicU64,
    reverts: AtomicU64,
    flushes: AtomicU64,
    flush_failures: AtomicU64,
    versions_collected: AtomicU64,
}

impl StoreStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_scan(&self) {
        self.scans.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_revert(&self) {
        self.reverts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_flush_failure(&self) {
        self.flush_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_versions_collected(&self, count: u64) {
        self.versions_collected.fetch_add(count, Ordering::Relaxed);
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            scans: self.scans.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            reverts: self.reverts.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
            versions_collected: self.versions_collected.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of store statistics.
///
/// Unlike `StoreStats`, this is a plain struct that can be compared or
/// passed across threads without atomics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Point and cursor reads.
    pub reads: u64,
    /// Installed versions (insert, replace, update, upsert).
    pub writes: u64,
    /// Installed tombstones.
    pub deletes: u64,
    /// Cursors opened.
    pub scans: u64,
    /// Transactions stamped into this store.
    pub commits: u64,
    /// Commits rejected with a write conflict.
    pub conflicts: u64,
    /// Transactions reverted in this store.
    pub reverts: u64,
    /// Successful flushes.
    pub flushes: u64,
    /// Failed flushes.
    pub flush_failures: u64,
    /// Versions dropped by cleanup.
    pub versions_collected: u64,
}
