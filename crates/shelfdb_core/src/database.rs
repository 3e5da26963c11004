//! Database facade and recovery.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::journal::Journal;
use crate::registry::StoreRegistry;
use crate::row::RowStore;
use crate::scheduler::Scheduler;
use crate::shard::{IntervalProvider, ShardRouter};
use crate::snapshot::{BlobSnapshotStore, SnapshotStore};
use crate::transaction::{RecoveryReport, Transaction, TransactionCoordinator};
use crate::types::CommitId;
use parking_lot::{Mutex, RwLock};
use shelfdb_storage::{FileBackend, InMemoryBackend, StorageBackend};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// The main database handle.
///
/// `Database` is the entry point of ShelfDB. It provides:
/// - Plain tables ([`Database::table`]) and range-sharded tables
///   ([`Database::sharded_table`]), both usable through
///   [`StorageEngine`](crate::StorageEngine)
/// - Transactions spanning any number of tables
/// - Recovery of commits interrupted by a crash
///
/// # Opening a Database
///
/// ```rust,ignore
/// use shelfdb_core::{Database, Document, StorageEngine};
/// use std::path::Path;
///
/// let db = Database::open(Path::new("my_database"))?;
/// let users = db.table("users")?;
///
/// db.transaction(|txn| {
///     users.insert_row(Some(txn), 1.into(), Document::from("alice"))?;
///     Ok(())
/// })?;
///
/// db.close()?;
/// ```
pub struct Database {
    config: Config,
    backend: Arc<dyn StorageBackend>,
    snapshots: Arc<dyn SnapshotStore>,
    coordinator: TransactionCoordinator,
    registry: StoreRegistry,
    routers: Mutex<HashMap<String, ShardRouter>>,
    recovery: RecoveryReport,
    is_open: RwLock<bool>,
    /// Dropped last so background tasks outlive the stores they serve.
    scheduler: Scheduler,
}

impl Database {
    /// Opens a database stored in the directory `path`, creating it if
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns an error if another process holds the directory lock, or if
    /// recovery fails.
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens a database stored in `path` with custom configuration.
    pub fn open_with_config(path: &Path, config: Config) -> CoreResult<Self> {
        let backend = FileBackend::open(path)?;
        Self::open_with_backend(Arc::new(backend), config)
    }

    /// Opens a fresh in-memory database. Data is lost when it is dropped.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_with_backend(Arc::new(InMemoryBackend::new()), Config::default())
    }

    /// Opens a database over any storage backend.
    ///
    /// The clock is advanced past every id found in persisted snapshots,
    /// then every commit left in the journal is reverted. Stores accept
    /// writes only after recovery completed.
    pub fn open_with_backend(backend: Arc<dyn StorageBackend>, config: Config) -> CoreResult<Self> {
        let scheduler = Scheduler::start("shelfdb-scheduler")?;
        let snapshots: Arc<dyn SnapshotStore> = Arc::new(BlobSnapshotStore::new(Arc::clone(&backend)));
        let coordinator = TransactionCoordinator::new(Journal::new(Arc::clone(&backend)));

        for table in snapshots.tables()? {
            if let Some(snapshot) = snapshots.load(&table)? {
                coordinator.observe(snapshot.high_water());
            }
        }

        let registry = StoreRegistry::new(
            config.clone(),
            coordinator.clone(),
            Arc::clone(&snapshots),
            scheduler.handle(),
        );
        let recovery = coordinator.recover(|name| registry.open(name))?;
        if recovery != RecoveryReport::default() {
            info!(
                reverted = recovery.reverted,
                discarded = recovery.discarded,
                "journal recovery complete"
            );
        }
        registry.begin_operations()?;

        Ok(Self {
            config,
            backend,
            snapshots,
            coordinator,
            registry,
            routers: Mutex::new(HashMap::new()),
            recovery,
            is_open: RwLock::new(true),
            scheduler,
        })
    }

    /// Configuration this database was opened with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The storage backend.
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// The transaction coordinator.
    pub fn coordinator(&self) -> &TransactionCoordinator {
        &self.coordinator
    }

    /// What recovery did when this database was opened.
    pub fn recovery(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// Checks if the database is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CoreError::transaction_state("database is closed"))
        }
    }

    /// Returns the plain table `name`, opening it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidQuery`] if the name is empty or contains
    /// `/` or `@`.
    pub fn table(&self, name: &str) -> CoreResult<RowStore> {
        self.ensure_open()?;
        validate_table_name(name)?;
        self.registry.open(name)
    }

    /// Returns the table `name` sharded into `[base + k·width, base + (k+1)·width)`
    /// ranges of its integer key.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidQuery`] if the name is invalid, `width` is
    /// not positive, or the table is already open with another geometry.
    pub fn sharded_table(&self, name: &str, base: i64, width: i64) -> CoreResult<ShardRouter> {
        self.ensure_open()?;
        validate_table_name(name)?;
        let provider = IntervalProvider::new(base, width)
            .ok_or_else(|| CoreError::invalid_query(format!("shard width must be positive, got {width}")))?;

        let mut routers = self.routers.lock();
        if let Some(router) = routers.get(name) {
            if router.provider() != provider {
                return Err(CoreError::invalid_query(format!(
                    "table {name} is sharded as {:?}",
                    router.provider()
                )));
            }
            return Ok(router.clone());
        }
        let router = ShardRouter::open(name, provider, self.registry.clone())?;
        routers.insert(name.to_string(), router.clone());
        Ok(router)
    }

    /// Names of every persisted or open store, sorted. Shards appear as
    /// `table@begin`.
    pub fn tables(&self) -> CoreResult<Vec<String>> {
        let mut names: BTreeSet<String> = self.snapshots.tables()?.into_iter().collect();
        names.extend(self.registry.stores().iter().map(|s| s.name().to_string()));
        Ok(names.into_iter().collect())
    }

    /// Opens a transaction bound to the calling thread.
    pub fn begin(&self) -> CoreResult<Transaction> {
        self.ensure_open()?;
        self.coordinator.begin()
    }

    /// Commits a transaction.
    pub fn commit(&self, txn: &Transaction) -> CoreResult<CommitId> {
        self.coordinator.commit(txn)
    }

    /// Reverts a transaction.
    pub fn revert(&self, txn: &Transaction) -> CoreResult<()> {
        self.coordinator.revert(txn)
    }

    /// Executes a function within a transaction.
    ///
    /// Commits if `f` returns `Ok`; reverts if it returns `Err`.
    pub fn transaction<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&Transaction) -> CoreResult<T>,
    {
        self.ensure_open()?;
        self.coordinator.transaction(f)
    }

    /// Spins every store down, flushing pending state.
    ///
    /// Every store is attempted; the first failure is returned. Closing an
    /// already closed database is a no-op.
    pub fn close(&self) -> CoreResult<()> {
        let mut is_open = self.is_open.write();
        if !*is_open {
            return Ok(());
        }
        *is_open = false;

        for router in self.routers.lock().drain().map(|(_, r)| r) {
            router.close();
        }
        let result = self.registry.close_all();
        info!(pending_tasks = self.scheduler.pending(), "database closed");
        result
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "close on drop failed");
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("config", &self.config)
            .field("open", &self.is_open())
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

fn validate_table_name(name: &str) -> CoreResult<()> {
    if name.is_empty() || name.contains(['/', '@']) || name.trim() != name {
        return Err(CoreError::invalid_query(format!("invalid table name {name:?}")));
    }
    shelfdb_storage::validate_name(name)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::engine::StorageEngine;
    use crate::types::RowKey;

    fn create_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn open_in_memory() {
        let db = create_db();
        assert!(db.is_open());
        assert_eq!(db.recovery(), &RecoveryReport::default());
    }

    #[test]
    fn tables_are_opened_once() {
        let db = create_db();
        let a = db.table("users").unwrap();
        a.insert_row(None, RowKey::Int(1), Document::from("alice")).unwrap();
        let b = db.table("users").unwrap();
        assert_eq!(b.read_row(None, &RowKey::Int(1)).unwrap(), Some(Document::from("alice")));
        assert_eq!(db.tables().unwrap(), vec!["users".to_string()]);
    }

    #[test]
    fn table_names_are_validated() {
        let db = create_db();
        for name in ["", "a/b", "a@1", " a", ".."] {
            assert!(db.table(name).is_err(), "{name:?} accepted");
        }
    }

    #[test]
    fn sharded_table_geometry_is_fixed() {
        let db = create_db();
        db.sharded_table("events", 0, 100).unwrap();
        assert!(db.sharded_table("events", 0, 100).is_ok());
        assert!(matches!(
            db.sharded_table("events", 0, 50),
            Err(CoreError::InvalidQuery { .. })
        ));
        assert!(db.sharded_table("other", 0, 0).is_err());
    }

    #[test]
    fn close_database() {
        let db = create_db();
        let users = db.table("users").unwrap();
        db.close().unwrap();
        assert!(!db.is_open());
        assert!(db.table("users").is_err());
        assert!(users.read_row(None, &RowKey::Int(1)).is_err());
        db.close().unwrap();
    }
}
