//! Transaction coordinator.

use crate::error::{CoreError, CoreResult};
use crate::journal::{Journal, JournalEntry};
use crate::row::{RevertMode, RowStore};
use crate::transaction::state::{Transaction, TransactionStatus, TxnState};
use crate::types::{CommitId, TransactionId};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::{debug, info, warn};

struct Shared {
    /// Last issued id. Transaction and commit ids share it.
    clock: AtomicU64,
    /// Held exclusively from issuing a commit id until it is stamped, so no
    /// snapshot or transaction id is taken in between.
    gate: RwLock<()>,
    open: Mutex<BTreeSet<TransactionId>>,
    bound: Mutex<HashMap<ThreadId, TransactionId>>,
    pins: Mutex<BTreeMap<u64, usize>>,
    journal: Journal,
}

/// Issues transaction ids and drives commit and revert across every store a
/// transaction touched.
///
/// ## Commit Protocol
///
/// 1. Take each store's commit lock in name order and check for conflicts.
/// 2. Issue a commit id and journal the commit, naming every participating
///    store.
/// 3. Stamp the commit id onto the transaction's versions in every store.
/// 4. Persist every store, then remove the journal entry.
///
/// Steps 2 and 3 run under the commit gate: no transaction begins and no
/// snapshot is taken between issuing a commit id and stamping it.
///
/// Any failure reverts every participant and removes the journal entry.
///
/// Stamped versions are visible before step 4 completes. If persisting
/// fails, readers that ran in between have observed a commit that is then
/// reverted. The gate is not held through step 4 because flushing pins a
/// snapshot, which takes the gate.
#[derive(Clone)]
pub struct TransactionCoordinator {
    shared: Arc<Shared>,
}

/// Outcome of journal recovery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Half-applied commits that were reverted.
    pub reverted: usize,
    /// Undecodable journal entries that were discarded.
    pub discarded: usize,
}

/// Keeps cleanup from collecting versions visible at a snapshot. Released
/// on drop.
#[derive(Debug)]
pub struct SnapshotPin {
    coordinator: TransactionCoordinator,
    snapshot: u64,
}

impl SnapshotPin {
    /// The pinned snapshot reference.
    pub fn snapshot(&self) -> u64 {
        self.snapshot
    }
}

impl Drop for SnapshotPin {
    fn drop(&mut self) {
        let mut pins = self.coordinator.shared.pins.lock();
        if let Some(count) = pins.get_mut(&self.snapshot) {
            *count -= 1;
            if *count == 0 {
                pins.remove(&self.snapshot);
            }
        }
    }
}

impl std::fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionCoordinator")
            .field("clock", &self.current())
            .field("open", &self.open_count())
            .finish()
    }
}

impl TransactionCoordinator {
    /// Creates a coordinator journaling to `journal`.
    pub fn new(journal: Journal) -> Self {
        Self {
            shared: Arc::new(Shared {
                clock: AtomicU64::new(0),
                gate: RwLock::new(()),
                open: Mutex::new(BTreeSet::new()),
                bound: Mutex::new(HashMap::new()),
                pins: Mutex::new(BTreeMap::new()),
                journal,
            }),
        }
    }

    fn next_id(&self) -> u64 {
        self.shared.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Issues an id for a write outside any transaction.
    pub(crate) fn next_transaction_id(&self) -> TransactionId {
        let _gate = self.shared.gate.read();
        TransactionId::new(self.next_id())
    }

    /// Issues a commit id and runs `apply` with it before any later
    /// snapshot can be taken.
    pub(crate) fn issue_commit<R>(&self, apply: impl FnOnce(CommitId) -> R) -> R {
        let _gate = self.shared.gate.write();
        apply(CommitId::new(self.next_id()))
    }

    /// The last issued id.
    pub fn current(&self) -> u64 {
        self.shared.clock.load(Ordering::SeqCst)
    }

    /// Advances the clock to at least `id`.
    pub fn observe(&self, id: u64) {
        self.shared.clock.fetch_max(id, Ordering::SeqCst);
    }

    /// The journal commits are recorded in.
    pub fn journal(&self) -> &Journal {
        &self.shared.journal
    }

    /// Pins the current snapshot until the returned guard drops.
    pub fn pin_current(&self) -> SnapshotPin {
        let _gate = self.shared.gate.read();
        // Under the open lock so the pin is either seen by a concurrent
        // low-water computation or not older than it.
        let _open = self.shared.open.lock();
        let snapshot = self.current();
        *self.shared.pins.lock().entry(snapshot).or_insert(0) += 1;
        SnapshotPin {
            coordinator: self.clone(),
            snapshot,
        }
    }

    /// Oldest id any reader may still need: the smallest open transaction
    /// id, one past the oldest pinned snapshot, or one past the clock.
    pub fn low_water_mark(&self) -> u64 {
        let open = self.shared.open.lock();
        let mut mark = self.current() + 1;
        if let Some(oldest) = open.first() {
            mark = mark.min(oldest.as_u64());
        }
        if let Some((&pinned, _)) = self.shared.pins.lock().first_key_value() {
            mark = mark.min(pinned + 1);
        }
        mark
    }

    /// Number of open transactions.
    pub fn open_count(&self) -> usize {
        self.shared.open.lock().len()
    }

    /// Opens a transaction bound to the calling thread.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionState`] if the calling thread already
    /// has an open transaction.
    pub fn begin(&self) -> CoreResult<Transaction> {
        let thread = thread::current().id();
        let mut bound = self.shared.bound.lock();
        if let Some(existing) = bound.get(&thread) {
            return Err(CoreError::transaction_state(format!(
                "thread already has open transaction {existing}"
            )));
        }

        let id = {
            let _gate = self.shared.gate.read();
            let mut open = self.shared.open.lock();
            let id = TransactionId::new(self.next_id());
            open.insert(id);
            id
        };
        bound.insert(thread, id);
        debug!(txid = id.as_u64(), "begin");
        Ok(Transaction::new(id, thread, self.clone()))
    }

    /// Commits a transaction and returns its commit id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionState`] if the transaction is not
    /// open, [`CoreError::WriteConflict`] if another transaction committed
    /// a row this one wrote after it began, or an I/O error if journaling
    /// or persisting failed. On error the transaction is reverted.
    pub fn commit(&self, txn: &Transaction) -> CoreResult<CommitId> {
        let mut state = txn.lock_state();
        if state.status != TransactionStatus::Open {
            return Err(CoreError::transaction_state(format!(
                "cannot commit {} ({:?})",
                txn.id(),
                state.status
            )));
        }

        let txid = txn.id();
        let stores: Vec<RowStore> = state.participants.values().cloned().collect();

        if stores.is_empty() {
            let commit_id = self.issue_commit(|commit_id| commit_id);
            self.finish(txn, &mut state, TransactionStatus::Committed, Some(commit_id));
            return Ok(commit_id);
        }

        let guards: Vec<_> = stores.iter().map(RowStore::lock_commit).collect();
        let tables: Vec<String> = state.participants.keys().cloned().collect();
        let result = self.apply_commit(txid, tables, &stores);
        if result.is_err() {
            Self::revert_stores(txid, &stores);
        }
        drop(guards);

        match result {
            Ok(commit_id) => {
                for store in &stores {
                    store.complete(txid);
                }
                self.finish(txn, &mut state, TransactionStatus::Committed, Some(commit_id));
                debug!(txid = txid.as_u64(), commit = commit_id.as_u64(), "committed");
                Ok(commit_id)
            }
            Err(e) => {
                self.finish(txn, &mut state, TransactionStatus::Reverted, None);
                if e.is_conflict() {
                    debug!(txid = txid.as_u64(), error = %e, "commit conflict");
                } else {
                    warn!(txid = txid.as_u64(), error = %e, "commit failed");
                }
                Err(e)
            }
        }
    }

    fn apply_commit(
        &self,
        txid: TransactionId,
        tables: Vec<String>,
        stores: &[RowStore],
    ) -> CoreResult<CommitId> {
        for store in stores {
            store.check_conflicts(txid)?;
        }
        let journal = &self.shared.journal;
        let commit_id = self.issue_commit(|commit_id| {
            journal.append(&JournalEntry {
                transaction_id: txid,
                commit_id,
                tables,
            })?;
            for store in stores {
                store.stamp(txid, commit_id);
            }
            Ok::<_, CoreError>(commit_id)
        })?;

        let persisted = stores.iter().try_for_each(RowStore::persist);
        if let Err(e) = persisted {
            if let Err(remove_err) = journal.remove(txid) {
                warn!(txid = txid.as_u64(), error = %remove_err, "failed to remove journal entry");
            }
            return Err(e);
        }
        journal.remove(txid)?;
        Ok(commit_id)
    }

    fn revert_stores(txid: TransactionId, stores: &[RowStore]) {
        for store in stores {
            if let Err(e) = store.revert(txid, RevertMode::Normal) {
                warn!(txid = txid.as_u64(), store = store.name(), error = %e, "revert after failed commit");
            }
        }
    }

    /// Reverts a transaction in every store it wrote to.
    ///
    /// The transaction is marked reverted even if some store fails.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionState`] if the transaction is not
    /// open, or [`CoreError::RevertIncomplete`] naming the stores that may
    /// be left inconsistent.
    pub fn revert(&self, txn: &Transaction) -> CoreResult<()> {
        let mut state = txn.lock_state();
        if state.status != TransactionStatus::Open {
            return Err(CoreError::transaction_state(format!(
                "cannot revert {} ({:?})",
                txn.id(),
                state.status
            )));
        }

        let mut tables = Vec::new();
        let mut failures = Vec::new();
        for (name, store) in &state.participants {
            if let Err(e) = store.revert(txn.id(), RevertMode::Normal) {
                tables.push(name.clone());
                failures.push(e.to_string());
            }
        }
        self.finish(txn, &mut state, TransactionStatus::Reverted, None);
        debug!(txid = txn.id().as_u64(), "reverted");

        if tables.is_empty() {
            Ok(())
        } else {
            Err(CoreError::RevertIncomplete {
                transaction: txn.id().as_u64(),
                tables,
                failures,
            })
        }
    }

    fn finish(
        &self,
        txn: &Transaction,
        state: &mut TxnState,
        status: TransactionStatus,
        commit_id: Option<CommitId>,
    ) {
        state.status = status;
        state.commit_id = commit_id;
        self.shared.open.lock().remove(&txn.id());
        let mut bound = self.shared.bound.lock();
        if bound.get(&txn.thread()) == Some(&txn.id()) {
            bound.remove(&txn.thread());
        }
    }

    /// Executes a function within a transaction.
    ///
    /// Commits if `f` returns `Ok`; reverts if it returns `Err`.
    pub fn transaction<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&Transaction) -> CoreResult<T>,
    {
        let txn = self.begin()?;
        match f(&txn) {
            Ok(value) => {
                self.commit(&txn)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(revert_err) = self.revert(&txn) {
                    warn!(txid = txn.id().as_u64(), error = %revert_err, "revert failed");
                }
                Err(e)
            }
        }
    }

    /// Reverts every commit still in the journal.
    ///
    /// Entries are replayed in transaction order. `resolve` maps a table name
    /// to its (spun up) store. Each touched store is flushed once per entry,
    /// then the entry is removed. Undecodable entries are discarded.
    pub fn recover<F>(&self, mut resolve: F) -> CoreResult<RecoveryReport>
    where
        F: FnMut(&str) -> CoreResult<RowStore>,
    {
        let journal = &self.shared.journal;
        let scan = journal.scan()?;
        let mut report = RecoveryReport::default();

        for name in &scan.corrupt {
            warn!(entry = %name, "discarding undecodable journal entry");
            journal.remove_blob(name)?;
            report.discarded += 1;
        }

        for entry in &scan.entries {
            let txid = entry.transaction_id;
            self.observe(entry.commit_id.as_u64().max(txid.as_u64()));

            let mut touched = Vec::with_capacity(entry.tables.len());
            for table in &entry.tables {
                let store = resolve(table)?;
                store.revert(txid, RevertMode::Recovery)?;
                touched.push(store);
            }
            for store in &touched {
                store.flush()?;
            }
            journal.remove(txid)?;
            info!(txid = txid.as_u64(), tables = ?entry.tables, "reverted interrupted commit");
            report.reverted += 1;
        }

        Ok(report)
    }
}
