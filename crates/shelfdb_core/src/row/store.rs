//! Multi-version row store.

use crate::config::Config;
use crate::document::Document;
use crate::engine::{RowCursor, StorageEngine, Upserted};
use crate::error::{CoreError, CoreResult};
use crate::lifecycle::{CursorId, EngineState, Lifecycle};
use crate::query::{DocumentUpdate, Predicate};
use crate::row::cursor::TableCursor;
use crate::row::table::RowTable;
use crate::row::version::{Payload, ReadView, Row, RowVersion};
use crate::scheduler::{SchedulerHandle, TaskControl};
use crate::snapshot::{SnapshotRow, SnapshotStore, TableSnapshot};
use crate::stats::{StatsSnapshot, StoreStats};
use crate::transaction::{SnapshotPin, Transaction, TransactionCoordinator};
use crate::types::{CommitId, RowKey, TransactionId};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// How a revert treats versions that were already persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevertMode {
    /// Re-flush immediately.
    Normal,
    /// Leave the store dirty; recovery flushes once per journal entry.
    Recovery,
}

#[derive(Debug, Default)]
struct FlushState {
    /// Serializes flushes so an older capture never overwrites a newer one.
    lock: Mutex<()>,
    dirty: AtomicBool,
    scheduled: AtomicBool,
    consecutive_failures: AtomicU32,
}

struct StoreInner {
    name: String,
    config: Config,
    coordinator: TransactionCoordinator,
    snapshots: Arc<dyn SnapshotStore>,
    scheduler: SchedulerHandle,
    lifecycle: Lifecycle,
    rows: RowTable,
    /// Held shared by every operation; exclusively by cleanup when it
    /// removes rows or computes its low-water mark.
    structure: RwLock<()>,
    /// Serializes commits and auto-commit writes.
    commit_lock: Mutex<()>,
    /// Keys written by each open transaction.
    pending: Mutex<HashMap<TransactionId, BTreeSet<RowKey>>>,
    flush: FlushState,
    stats: StoreStats,
    last_activity: Mutex<Instant>,
    /// Newest commit id loaded into or stamped in this store.
    high_water: AtomicU64,
}

/// A table (or one shard of a table) holding multi-version rows in memory
/// and persisting committed state through a [`SnapshotStore`].
///
/// `RowStore` is a cheap cloneable handle.
///
/// ## Lock Order
///
/// commit lock → commit gate → structure lock → row map shard → row mutex.
///
/// Snapshots are pinned before the structure lock is taken.
#[derive(Clone)]
pub struct RowStore {
    inner: Arc<StoreInner>,
}

/// Collects the versions one write operation installs.
struct WriteScope<'a> {
    inner: &'a StoreInner,
    txid: TransactionId,
    view: ReadView,
    touched: Vec<RowKey>,
}

impl WriteScope<'_> {
    fn install(&mut self, row: &mut Row, payload: Payload) {
        if payload.is_tombstone() {
            self.inner.stats.record_delete();
        } else {
            self.inner.stats.record_write();
        }
        row.install(RowVersion::pending(self.txid, payload));
        self.touched.push(row.key().clone());
    }

    fn visible_document(&self, row: &Row) -> Option<Document> {
        row.visible_document(&self.view).cloned()
    }
}

impl RowStore {
    /// Creates a store in [`EngineState::Uninitialized`].
    pub fn new(
        name: impl Into<String>,
        config: Config,
        coordinator: TransactionCoordinator,
        snapshots: Arc<dyn SnapshotStore>,
        scheduler: SchedulerHandle,
    ) -> Self {
        let name = name.into();
        Self {
            inner: Arc::new(StoreInner {
                lifecycle: Lifecycle::new(name.clone()),
                name,
                config,
                coordinator,
                snapshots,
                scheduler,
                rows: RowTable::new(),
                structure: RwLock::new(()),
                commit_lock: Mutex::new(()),
                pending: Mutex::new(HashMap::new()),
                flush: FlushState::default(),
                stats: StoreStats::new(),
                last_activity: Mutex::new(Instant::now()),
                high_water: AtomicU64::new(0),
            }),
        }
    }

    /// Store name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        self.inner.lifecycle.state()
    }

    /// Snapshot of the store counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Number of rows held, including rows only holding old or uncommitted
    /// versions.
    pub fn row_count(&self) -> usize {
        self.inner.rows.len()
    }

    /// Number of open cursors.
    pub fn open_cursors(&self) -> usize {
        self.inner.lifecycle.open_cursors()
    }

    /// Returns true if an open transaction has versions in this store.
    pub fn has_pending(&self) -> bool {
        !self.inner.pending.lock().is_empty()
    }

    /// Newest commit id this store holds a version of.
    ///
    /// A view older than this may resolve rows differently here than in a
    /// copy reloaded from the snapshot, which keeps only the newest version.
    pub fn high_water(&self) -> u64 {
        self.inner.high_water.load(Ordering::SeqCst)
    }

    fn raise_high_water(&self, commit_id: u64) {
        self.inner.high_water.fetch_max(commit_id, Ordering::SeqCst);
    }

    /// When the store was last read or written.
    pub fn last_activity(&self) -> Instant {
        *self.inner.last_activity.lock()
    }

    /// Flushes that failed since the last success.
    pub fn consecutive_flush_failures(&self) -> u32 {
        self.inner.flush.consecutive_failures.load(Ordering::SeqCst)
    }

    fn touch(&self) {
        *self.inner.last_activity.lock() = Instant::now();
    }

    // === Lifecycle ===

    /// Loads persisted rows and moves to `SpunUp` (or `Running` if
    /// operations were already begun).
    ///
    /// Each persisted row is seeded as one committed, persisted version.
    pub fn spin_up(&self) -> CoreResult<()> {
        let inner = &*self.inner;
        inner.lifecycle.begin_spin_up()?;

        let loaded = match self.load_rows() {
            Ok(loaded) => loaded,
            Err(e) => {
                error!(store = %inner.name, error = %e, "failed to load rows");
                inner.lifecycle.force_spin_down();
                return Err(e);
            }
        };

        inner.lifecycle.finish_spin_up()?;
        self.schedule_cleanup();
        info!(store = %inner.name, rows = loaded, "store spun up");
        Ok(())
    }

    fn load_rows(&self) -> CoreResult<usize> {
        let inner = &*self.inner;
        let Some(snapshot) = inner.snapshots.load(&inner.name)? else {
            return Ok(0);
        };
        inner.coordinator.observe(snapshot.high_water());
        self.raise_high_water(snapshot.high_water());

        let count = snapshot.rows.len();
        for persisted in snapshot.rows {
            let mut row = Row::new(persisted.key);
            let mut version = RowVersion::committed(
                TransactionId::new(persisted.transaction_id),
                CommitId::new(persisted.commit_id),
                Payload::Document(persisted.document),
            );
            version.persisted = true;
            row.install(version);
            inner.rows.insert(row);
        }
        Ok(count)
    }

    /// Allows operations to begin; see [`Lifecycle::begin_operations`].
    pub fn begin_operations(&self) -> CoreResult<()> {
        self.inner.lifecycle.begin_operations()
    }

    /// Drains running writes and open cursors, flushes, then releases the
    /// rows.
    ///
    /// The final flush runs after the drain so that it covers every write
    /// that was admitted before spin-down began. Falls back to
    /// [`RowStore::force_spin_down`] if draining exceeds the configured
    /// timeout. A failed final flush is returned after the store reached
    /// `SpunDown`.
    pub fn spin_down(&self) -> CoreResult<()> {
        let inner = &*self.inner;
        inner.lifecycle.begin_spin_down()?;
        let drained = inner.lifecycle.await_drained(inner.config.spin_down_timeout);

        let flushed = if inner.flush.dirty.load(Ordering::SeqCst) {
            self.flush()
        } else {
            Ok(())
        };
        if let Err(e) = &flushed {
            error!(store = %inner.name, error = %e, "final flush failed");
        }

        if drained {
            inner.lifecycle.finish_spin_down()?;
            self.release_rows();
        } else {
            warn!(
                store = %inner.name,
                cursors = inner.lifecycle.open_cursors(),
                writes = inner.lifecycle.writes_in_flight(),
                "drain timed out, forcing spin down"
            );
            self.force_spin_down();
        }
        info!(store = %inner.name, "store spun down");
        flushed
    }

    /// Moves straight to `SpunDown` and releases the rows.
    pub fn force_spin_down(&self) {
        self.inner.lifecycle.force_spin_down();
        self.release_rows();
    }

    fn release_rows(&self) {
        let _structure = self.inner.structure.write();
        self.inner.rows.clear();
        self.inner.pending.lock().clear();
    }

    // === Persistence ===

    /// Writes the committed state of every live row.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is spun down or the snapshot cannot be
    /// saved; the failure counts towards the synchronous-flush threshold.
    pub fn flush(&self) -> CoreResult<()> {
        let inner = &*self.inner;
        inner.lifecycle.begin_flush()?;
        let result = self.flush_now();
        inner.lifecycle.end_flush();

        match &result {
            Ok(()) => {
                inner.flush.consecutive_failures.store(0, Ordering::SeqCst);
                inner.stats.record_flush();
            }
            Err(e) => {
                inner.flush.dirty.store(true, Ordering::SeqCst);
                let failures = inner.flush.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                inner.stats.record_flush_failure();
                warn!(store = %inner.name, failures, error = %e, "flush failed");
            }
        }
        result
    }

    fn flush_now(&self) -> CoreResult<()> {
        let inner = &*self.inner;
        let _flush = inner.flush.lock.lock();
        inner.flush.dirty.store(false, Ordering::SeqCst);

        let pin = inner.coordinator.pin_current();
        let (snapshot, written) = {
            let _structure = inner.structure.read();
            let state = inner.lifecycle.state();
            if state == EngineState::SpunDown {
                return Err(CoreError::engine_state(&inner.name, state, "cannot flush"));
            }

            let view = ReadView::at(pin.snapshot());
            let mut snapshot = TableSnapshot::new(inner.name.clone());
            let mut written = Vec::new();
            for row in inner.rows.rows() {
                let row = row.lock();
                let Some(version) = row.visible(&view) else {
                    continue;
                };
                if let Payload::Document(document) = &version.payload {
                    snapshot.rows.push(SnapshotRow {
                        key: row.key().clone(),
                        transaction_id: version.transaction_id.as_u64(),
                        commit_id: version.commit_id.map_or(0, CommitId::as_u64),
                        document: document.clone(),
                    });
                    if !version.persisted {
                        written.push((row.key().clone(), version.transaction_id));
                    }
                }
            }
            (snapshot, written)
        };

        inner.snapshots.save(&snapshot)?;

        let _structure = inner.structure.read();
        for (key, txid) in written {
            if let Some(row) = inner.rows.get(&key) {
                row.lock().mark_persisted(txid);
            }
        }
        debug!(store = %inner.name, rows = snapshot.rows.len(), "flushed");
        Ok(())
    }

    /// Marks the store dirty and schedules a debounced flush, unless one is
    /// already scheduled.
    fn mark_dirty(&self) {
        let inner = &*self.inner;
        inner.flush.dirty.store(true, Ordering::SeqCst);
        if inner.flush.scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        inner
            .scheduler
            .schedule(inner.config.flush_debounce, move || flush_task(&weak));
    }

    /// Once background flushes have failed too often, the next writer
    /// flushes synchronously and fails if that flush fails.
    fn ensure_flush_healthy(&self) -> CoreResult<()> {
        let inner = &*self.inner;
        if inner.flush.consecutive_failures.load(Ordering::SeqCst) < inner.config.max_flush_failures {
            return Ok(());
        }
        debug!(store = %inner.name, "flushing synchronously after repeated failures");
        self.flush()
    }

    // === Cleanup ===

    fn schedule_cleanup(&self) {
        let interval = self.inner.config.cleanup_interval;
        if interval.is_zero() {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        self.inner
            .scheduler
            .schedule(interval, move || cleanup_task(&weak));
    }

    /// Oldest snapshot any reader of this store may still need.
    pub fn low_water_mark(&self) -> u64 {
        let cursors = self
            .inner
            .lifecycle
            .oldest_cursor_snapshot()
            .map_or(u64::MAX, |s| s.saturating_add(1));
        self.inner.coordinator.low_water_mark().min(cursors)
    }

    /// Drops versions no reader can see and removes dead rows. Returns the
    /// number of versions dropped.
    pub fn cleanup(&self) -> usize {
        let inner = &*self.inner;
        let low_water = {
            let _structure = inner.structure.write();
            self.low_water_mark()
        };

        let mut collected = 0;
        let mut obsolete = Vec::new();
        {
            let _structure = inner.structure.read();
            for row in inner.rows.rows() {
                let mut row = row.lock();
                collected += row.prune(low_water);
                if row.is_obsolete(low_water) {
                    obsolete.push(row.key().clone());
                }
            }
        }

        let mut removed = 0;
        if !obsolete.is_empty() {
            let _structure = inner.structure.write();
            for key in &obsolete {
                if inner.rows.remove_if(key, |row| row.is_obsolete(low_water)) {
                    removed += 1;
                }
            }
        }

        inner.stats.record_versions_collected(collected as u64);
        if collected > 0 || removed > 0 {
            debug!(store = %inner.name, low_water, collected, removed, "cleanup");
        }
        collected
    }

    // === Commit protocol ===

    /// Takes the store's commit lock.
    pub(crate) fn lock_commit(&self) -> MutexGuard<'_, ()> {
        self.inner.commit_lock.lock()
    }

    fn pending_keys(&self, txid: TransactionId) -> Vec<RowKey> {
        self.inner
            .pending
            .lock()
            .get(&txid)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Fails if another transaction committed a row `txid` wrote after
    /// `txid` began. Requires the commit lock.
    pub(crate) fn check_conflicts(&self, txid: TransactionId) -> CoreResult<()> {
        let inner = &*self.inner;
        let keys = self.pending_keys(txid);
        let _structure = inner.structure.read();
        for key in keys {
            let Some(row) = inner.rows.get(&key) else {
                continue;
            };
            let conflict = row.lock().conflicts_with(txid);
            if let Some(committed_at) = conflict {
                inner.stats.record_conflict();
                return Err(CoreError::WriteConflict {
                    table: inner.name.clone(),
                    key,
                    committed_at: committed_at.as_u64(),
                });
            }
        }
        Ok(())
    }

    /// Stamps `txid`'s versions with `commit_id`. Requires the commit lock.
    pub(crate) fn stamp(&self, txid: TransactionId, commit_id: CommitId) {
        let inner = &*self.inner;
        let keys = self.pending_keys(txid);
        {
            let _structure = inner.structure.read();
            for key in &keys {
                if let Some(row) = inner.rows.get(key) {
                    row.lock().stamp(txid, commit_id);
                }
            }
        }
        self.raise_high_water(commit_id.as_u64());
        inner.stats.record_commit();
        self.mark_dirty();
    }

    /// Flushes synchronously as the last step of a commit.
    pub(crate) fn persist(&self) -> CoreResult<()> {
        self.flush()
    }

    /// Forgets a committed transaction's key set.
    pub(crate) fn complete(&self, txid: TransactionId) {
        self.inner.pending.lock().remove(&txid);
    }

    /// Removes every version written by `txid`.
    ///
    /// In recovery mode the whole store is scanned, since versions seeded
    /// from a snapshot have no key set.
    pub fn revert(&self, txid: TransactionId, mode: RevertMode) -> CoreResult<()> {
        let inner = &*self.inner;
        let keys = inner.pending.lock().remove(&txid);

        let mut removed = 0;
        let mut removed_persisted = false;
        {
            let _structure = inner.structure.read();
            let rows = match (mode, keys) {
                (RevertMode::Recovery, _) => inner.rows.rows(),
                (RevertMode::Normal, Some(keys)) => {
                    keys.iter().filter_map(|k| inner.rows.get(k)).collect()
                }
                (RevertMode::Normal, None) => Vec::new(),
            };
            for row in rows {
                if let Some(version) = row.lock().remove_transaction(txid) {
                    removed += 1;
                    removed_persisted |= version.persisted;
                }
            }
        }
        inner.stats.record_revert();
        debug!(store = %inner.name, txid = txid.as_u64(), removed, ?mode, "reverted");

        if removed_persisted {
            match mode {
                RevertMode::Normal => self.flush()?,
                RevertMode::Recovery => inner.flush.dirty.store(true, Ordering::SeqCst),
            }
        }
        Ok(())
    }

    // === Reads and writes ===

    /// Runs a write. Inside a transaction the versions stay pending until
    /// commit; otherwise they are committed under the commit lock as soon as
    /// `body` succeeds.
    fn mutate<R>(
        &self,
        txn: Option<&Transaction>,
        body: impl FnOnce(&mut WriteScope<'_>) -> CoreResult<R>,
    ) -> CoreResult<R> {
        let inner = &*self.inner;
        let _write = inner.lifecycle.await_writable()?;
        self.touch();
        self.ensure_flush_healthy()?;

        match txn {
            Some(txn) => {
                txn.ensure_open()?;
                let mut scope = WriteScope {
                    inner,
                    txid: txn.id(),
                    view: txn.view(),
                    touched: Vec::new(),
                };
                let result = {
                    let _structure = inner.structure.read();
                    body(&mut scope)
                };
                if !scope.touched.is_empty() {
                    inner
                        .pending
                        .lock()
                        .entry(txn.id())
                        .or_default()
                        .extend(scope.touched);
                    txn.bind(self);
                }
                result
            }
            None => {
                let _commit = inner.commit_lock.lock();
                let txid = inner.coordinator.next_transaction_id();
                let mut scope = WriteScope {
                    inner,
                    txid,
                    view: ReadView::at(txid.as_u64()),
                    touched: Vec::new(),
                };
                let result = {
                    let _structure = inner.structure.read();
                    body(&mut scope)
                };
                if scope.touched.is_empty() {
                    return result;
                }

                if result.is_ok() {
                    inner.coordinator.issue_commit(|commit_id| {
                        let _structure = inner.structure.read();
                        for key in &scope.touched {
                            if let Some(row) = inner.rows.get(key) {
                                row.lock().stamp(txid, commit_id);
                            }
                        }
                        self.raise_high_water(commit_id.as_u64());
                    });
                } else {
                    let _structure = inner.structure.read();
                    for key in &scope.touched {
                        if let Some(row) = inner.rows.get(key) {
                            row.lock().remove_transaction(txid);
                        }
                    }
                }
                if result.is_ok() {
                    inner.stats.record_commit();
                    self.mark_dirty();
                }
                result
            }
        }
    }

    fn begin_read(&self, txn: Option<&Transaction>) -> CoreResult<Option<ReadView>> {
        self.inner.lifecycle.await_readable()?;
        self.touch();
        match txn {
            Some(txn) => {
                txn.ensure_open()?;
                Ok(Some(txn.view()))
            }
            None => Ok(None),
        }
    }

    /// Returns `view`, or a pinned view of the latest commit. The pin has to
    /// be held until the structure lock is taken.
    fn resolve_view(&self, view: Option<ReadView>) -> (ReadView, Option<SnapshotPin>) {
        match view {
            Some(view) => (view, None),
            None => {
                let pin = self.inner.coordinator.pin_current();
                (ReadView::at(pin.snapshot()), Some(pin))
            }
        }
    }

    /// Resolves one row for a cursor. Fails once the store is spun down.
    pub(crate) fn read_visible(&self, key: &RowKey, view: &ReadView) -> CoreResult<Option<Document>> {
        let inner = &*self.inner;
        inner.lifecycle.check_readable()?;
        inner.stats.record_read();
        let _structure = inner.structure.read();
        Ok(inner
            .rows
            .get(key)
            .and_then(|row| row.lock().visible_document(view).cloned()))
    }

    /// Opens a cursor reading through `view`, or the latest committed state.
    pub(crate) fn open_cursor(
        &self,
        view: Option<ReadView>,
        predicate: Predicate,
    ) -> CoreResult<TableCursor> {
        let inner = &*self.inner;
        inner.lifecycle.await_readable()?;
        self.touch();
        inner.stats.record_scan();

        let (view, _pin) = self.resolve_view(view);
        let _structure = inner.structure.read();
        let id = inner.lifecycle.register_cursor(view.snapshot)?;
        let keys = inner.rows.keys();
        Ok(TableCursor::new(self.clone(), id, view, predicate, keys))
    }

    pub(crate) fn deregister_cursor(&self, id: CursorId) {
        self.inner.lifecycle.deregister_cursor(id);
    }

    fn bulk<F>(
        &self,
        txn: Option<&Transaction>,
        predicate: &Predicate,
        mut apply: F,
    ) -> CoreResult<usize>
    where
        F: FnMut(&mut WriteScope<'_>, &mut Row, Document) -> bool,
    {
        self.mutate(txn, |scope| {
            let mut count = 0;
            for key in scope.inner.rows.keys() {
                let Some(row) = scope.inner.rows.get(&key) else {
                    continue;
                };
                let mut row = row.lock();
                let Some(doc) = scope.visible_document(&row) else {
                    continue;
                };
                if predicate.matches(&key, &doc) && apply(scope, &mut row, doc) {
                    count += 1;
                }
            }
            Ok(count)
        })
    }

    fn not_found(&self, key: &RowKey) -> CoreError {
        CoreError::KeyNotFound {
            table: self.inner.name.clone(),
            key: key.clone(),
        }
    }
}

impl StorageEngine for RowStore {
    fn insert_row(&self, txn: Option<&Transaction>, key: RowKey, doc: Document) -> CoreResult<()> {
        self.mutate(txn, |scope| {
            let row = scope.inner.rows.get_or_insert(&key);
            let mut row = row.lock();
            if row.visible_document(&scope.view).is_some() {
                return Err(CoreError::DuplicateKey {
                    table: scope.inner.name.clone(),
                    key: key.clone(),
                });
            }
            scope.install(&mut row, Payload::Document(doc));
            Ok(())
        })
    }

    fn read_row(&self, txn: Option<&Transaction>, key: &RowKey) -> CoreResult<Option<Document>> {
        let view = self.begin_read(txn)?;
        let inner = &*self.inner;
        inner.stats.record_read();
        let (view, _pin) = self.resolve_view(view);
        let _structure = inner.structure.read();
        Ok(inner
            .rows
            .get(key)
            .and_then(|row| row.lock().visible_document(&view).cloned()))
    }

    fn query_table(
        &self,
        txn: Option<&Transaction>,
        predicate: &Predicate,
    ) -> CoreResult<Box<dyn RowCursor>> {
        let view = match txn {
            Some(txn) => {
                txn.ensure_open()?;
                Some(txn.view())
            }
            None => None,
        };
        Ok(Box::new(self.open_cursor(view, predicate.clone())?))
    }

    fn replace_row(&self, txn: Option<&Transaction>, key: RowKey, doc: Document) -> CoreResult<()> {
        self.mutate(txn, |scope| {
            let Some(row) = scope.inner.rows.get(&key) else {
                return Err(self.not_found(&key));
            };
            let mut row = row.lock();
            if scope.visible_document(&row).is_none() {
                return Err(self.not_found(&key));
            }
            scope.install(&mut row, Payload::Document(doc));
            Ok(())
        })
    }

    fn update_row(
        &self,
        txn: Option<&Transaction>,
        key: &RowKey,
        update: &dyn DocumentUpdate,
    ) -> CoreResult<bool> {
        self.mutate(txn, |scope| {
            let Some(row) = scope.inner.rows.get(key) else {
                return Err(self.not_found(key));
            };
            let mut row = row.lock();
            let Some(mut doc) = scope.visible_document(&row) else {
                return Err(self.not_found(key));
            };
            if !update.apply(&mut doc) {
                return Ok(false);
            }
            scope.install(&mut row, Payload::Document(doc));
            Ok(true)
        })
    }

    fn update_all(
        &self,
        txn: Option<&Transaction>,
        predicate: &Predicate,
        update: &dyn DocumentUpdate,
    ) -> CoreResult<usize> {
        self.bulk(txn, predicate, |scope, row, mut doc| {
            if !update.apply(&mut doc) {
                return false;
            }
            scope.install(row, Payload::Document(doc));
            true
        })
    }

    fn upsert_row(&self, txn: Option<&Transaction>, key: RowKey, doc: Document) -> CoreResult<Upserted> {
        self.mutate(txn, |scope| {
            let row = scope.inner.rows.get_or_insert(&key);
            let mut row = row.lock();
            let existed = row.visible_document(&scope.view).is_some();
            scope.install(&mut row, Payload::Document(doc));
            Ok(if existed {
                Upserted::Updated
            } else {
                Upserted::Inserted
            })
        })
    }

    fn delete_row(&self, txn: Option<&Transaction>, key: &RowKey) -> CoreResult<()> {
        self.mutate(txn, |scope| {
            let Some(row) = scope.inner.rows.get(key) else {
                return Err(self.not_found(key));
            };
            let mut row = row.lock();
            if row.visible_document(&scope.view).is_none() {
                return Err(self.not_found(key));
            }
            scope.install(&mut row, Payload::Tombstone);
            Ok(())
        })
    }

    fn delete_all(&self, txn: Option<&Transaction>, predicate: &Predicate) -> CoreResult<usize> {
        self.bulk(txn, predicate, |scope, row, _doc| {
            scope.install(row, Payload::Tombstone);
            true
        })
    }
}

impl std::fmt::Debug for RowStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowStore")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn flush_task(weak: &Weak<StoreInner>) -> TaskControl {
    let Some(inner) = weak.upgrade() else {
        return TaskControl::Done;
    };
    let store = RowStore { inner };
    let flush = &store.inner.flush;
    flush.scheduled.store(false, Ordering::SeqCst);

    if !matches!(store.state(), EngineState::SpunUp | EngineState::Running)
        || !flush.dirty.load(Ordering::SeqCst)
    {
        return TaskControl::Done;
    }
    if store.flush().is_ok() {
        return TaskControl::Done;
    }
    // Past the threshold the next writer takes over.
    if store.consecutive_flush_failures() >= store.inner.config.max_flush_failures
        || flush.scheduled.swap(true, Ordering::SeqCst)
    {
        return TaskControl::Done;
    }
    TaskControl::RunAgainIn(store.inner.config.flush_debounce)
}

fn cleanup_task(weak: &Weak<StoreInner>) -> TaskControl {
    let Some(inner) = weak.upgrade() else {
        return TaskControl::Done;
    };
    let store = RowStore { inner };
    match store.state() {
        EngineState::SpunUp | EngineState::Running => {
            store.cleanup();
            TaskControl::RunAgainIn(store.inner.config.cleanup_interval)
        }
        EngineState::Uninitialized | EngineState::SpinningUp => {
            TaskControl::RunAgainIn(store.inner.config.cleanup_interval)
        }
        EngineState::SpinningDown | EngineState::SpunDown => TaskControl::Done,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::Journal;
    use crate::scheduler::Scheduler;
    use crate::snapshot::BlobSnapshotStore;
    use shelfdb_storage::InMemoryBackend;
    use std::time::Duration;

    fn create_store(scheduler: &Scheduler) -> (RowStore, TransactionCoordinator) {
        let backend: Arc<dyn shelfdb_storage::StorageBackend> = Arc::new(InMemoryBackend::new());
        let coordinator = TransactionCoordinator::new(Journal::new(Arc::clone(&backend)));
        let config = Config::default()
            .cleanup_interval(Duration::ZERO)
            .flush_debounce(Duration::from_millis(1));
        let store = RowStore::new(
            "t",
            config,
            coordinator.clone(),
            Arc::new(BlobSnapshotStore::new(backend)),
            scheduler.handle(),
        );
        (store, coordinator)
    }

    #[test]
    fn writes_before_spin_up_fail() {
        let scheduler = Scheduler::start("test").unwrap();
        let (store, _) = create_store(&scheduler);
        assert!(matches!(
            store.insert_row(None, RowKey::Int(1), Document::Null),
            Err(CoreError::EngineState { .. })
        ));
    }

    #[test]
    fn writes_park_until_operations_begin() {
        let scheduler = Scheduler::start("test").unwrap();
        let (store, _) = create_store(&scheduler);
        store.spin_up().unwrap();
        assert_eq!(store.state(), EngineState::SpunUp);

        let writer = {
            let store = store.clone();
            std::thread::spawn(move || store.insert_row(None, RowKey::Int(1), Document::from(1)))
        };
        std::thread::sleep(Duration::from_millis(20));
        assert!(!writer.is_finished());
        assert_eq!(store.read_row(None, &RowKey::Int(1)).unwrap(), None);

        store.begin_operations().unwrap();
        writer.join().unwrap().unwrap();
        assert_eq!(store.state(), EngineState::Running);
        assert_eq!(store.read_row(None, &RowKey::Int(1)).unwrap(), Some(Document::from(1)));
    }

    #[test]
    fn spun_down_store_rejects_everything() {
        let scheduler = Scheduler::start("test").unwrap();
        let (store, _) = create_store(&scheduler);
        store.spin_up().unwrap();
        store.begin_operations().unwrap();
        store.insert_row(None, RowKey::Int(1), Document::from(1)).unwrap();

        store.spin_down().unwrap();
        assert_eq!(store.state(), EngineState::SpunDown);
        assert_eq!(store.row_count(), 0);
        assert!(store.read_row(None, &RowKey::Int(1)).is_err());
        assert!(store.insert_row(None, RowKey::Int(2), Document::Null).is_err());
        assert!(store.spin_down().is_err());
    }

    #[test]
    fn spin_down_reloads_from_snapshot() {
        let scheduler = Scheduler::start("test").unwrap();
        let (store, coordinator) = create_store(&scheduler);
        store.spin_up().unwrap();
        store.begin_operations().unwrap();
        store.insert_row(None, RowKey::Int(1), Document::from(1)).unwrap();
        store.spin_down().unwrap();

        let reopened = RowStore::new(
            "t",
            store.inner.config.clone(),
            coordinator,
            Arc::clone(&store.inner.snapshots),
            scheduler.handle(),
        );
        reopened.spin_up().unwrap();
        assert_eq!(reopened.read_row(None, &RowKey::Int(1)).unwrap(), Some(Document::from(1)));
    }

    #[test]
    fn failed_auto_commit_leaves_no_versions() {
        let scheduler = Scheduler::start("test").unwrap();
        let (store, _) = create_store(&scheduler);
        store.spin_up().unwrap();
        store.begin_operations().unwrap();
        store.insert_row(None, RowKey::Int(1), Document::from(1)).unwrap();

        assert!(store.insert_row(None, RowKey::Int(1), Document::from(2)).is_err());
        assert!(store.replace_row(None, RowKey::Int(9), Document::from(2)).is_err());
        assert!(!store.has_pending());
        assert_eq!(store.read_row(None, &RowKey::Int(1)).unwrap(), Some(Document::from(1)));
        assert_eq!(store.stats().commits, 1);
    }
}
