//! Transaction state.

use crate::error::{CoreError, CoreResult};
use crate::row::{ReadView, RowStore};
use crate::transaction::TransactionCoordinator;
use crate::types::{CommitId, TransactionId};
use parking_lot::{Mutex, MutexGuard};
use std::collections::BTreeMap;
use std::thread::ThreadId;
use tracing::warn;

/// Status of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Transaction is open and can perform operations.
    Open,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been reverted.
    Reverted,
}

#[derive(Debug)]
pub(crate) struct TxnState {
    pub(crate) status: TransactionStatus,
    pub(crate) commit_id: Option<CommitId>,
    /// Stores written to, by name. Commit visits them in name order.
    pub(crate) participants: BTreeMap<String, RowStore>,
}

/// An open transaction.
///
/// Reads see the transaction's own writes plus everything committed before
/// it began (snapshot isolation). A transaction is bound to the thread that
/// opened it and is reverted if dropped while still open.
pub struct Transaction {
    id: TransactionId,
    thread: ThreadId,
    coordinator: TransactionCoordinator,
    state: Mutex<TxnState>,
}

impl Transaction {
    pub(crate) fn new(
        id: TransactionId,
        thread: ThreadId,
        coordinator: TransactionCoordinator,
    ) -> Self {
        Self {
            id,
            thread,
            coordinator,
            state: Mutex::new(TxnState {
                status: TransactionStatus::Open,
                commit_id: None,
                participants: BTreeMap::new(),
            }),
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> TransactionStatus {
        self.state.lock().status
    }

    /// Returns the commit id once committed.
    #[must_use]
    pub fn commit_id(&self) -> Option<CommitId> {
        self.state.lock().commit_id
    }

    /// Checks if the transaction is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status() == TransactionStatus::Open
    }

    /// Names of the stores this transaction wrote to.
    pub fn tables(&self) -> Vec<String> {
        self.state.lock().participants.keys().cloned().collect()
    }

    pub(crate) fn thread(&self) -> ThreadId {
        self.thread
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, TxnState> {
        self.state.lock()
    }

    /// The view this transaction reads through.
    pub(crate) fn view(&self) -> ReadView {
        ReadView::owned_by(self.id)
    }

    pub(crate) fn ensure_open(&self) -> CoreResult<()> {
        match self.status() {
            TransactionStatus::Open => Ok(()),
            status => Err(CoreError::transaction_state(format!(
                "{} is {status:?}",
                self.id
            ))),
        }
    }

    /// Records that this transaction wrote to `store`.
    pub(crate) fn bind(&self, store: &RowStore) {
        self.state
            .lock()
            .participants
            .entry(store.name().to_string())
            .or_insert_with(|| store.clone());
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.is_open() {
            if let Err(e) = self.coordinator.revert(self) {
                warn!(txid = self.id.as_u64(), error = %e, "revert on drop failed");
            }
        }
    }
}
