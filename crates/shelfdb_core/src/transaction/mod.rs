//! Transactions with snapshot isolation.
//!
//! - **Atomicity**: a commit is journaled first, so a crash mid-commit is
//!   reverted on the next open
//! - **Isolation**: readers see their own writes plus what committed before
//!   they began
//! - **Conflicts**: first committer wins; a later commit touching the same
//!   row fails with a write conflict
//! - **Durability**: every participating store is persisted before commit
//!   returns

mod coordinator;
mod state;

pub use coordinator::{RecoveryReport, SnapshotPin, TransactionCoordinator};
pub use state::{Transaction, TransactionStatus};
