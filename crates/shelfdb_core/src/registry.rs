//! Open stores by name.

use crate::config::Config;
use crate::error::CoreResult;
use crate::lifecycle::EngineState;
use crate::row::RowStore;
use crate::scheduler::SchedulerHandle;
use crate::snapshot::SnapshotStore;
use crate::transaction::TransactionCoordinator;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};

struct RegistryInner {
    config: Config,
    coordinator: TransactionCoordinator,
    snapshots: Arc<dyn SnapshotStore>,
    scheduler: SchedulerHandle,
    stores: Mutex<BTreeMap<String, RowStore>>,
    operating: AtomicBool,
}

/// Opens each named store at most once and hands out shared handles.
///
/// Stores opened before [`StoreRegistry::begin_operations`] stay `SpunUp`
/// (readable, writes parked) so journal recovery can run first.
#[derive(Clone)]
pub struct StoreRegistry {
    inner: Arc<RegistryInner>,
}

impl StoreRegistry {
    /// Creates an empty registry.
    pub fn new(
        config: Config,
        coordinator: TransactionCoordinator,
        snapshots: Arc<dyn SnapshotStore>,
        scheduler: SchedulerHandle,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                coordinator,
                snapshots,
                scheduler,
                stores: Mutex::new(BTreeMap::new()),
                operating: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the open store `name`, spinning it up first if needed.
    pub fn open(&self, name: &str) -> CoreResult<RowStore> {
        let inner = &*self.inner;
        let mut stores = inner.stores.lock();
        if let Some(store) = stores.get(name) {
            if store.state() != EngineState::SpunDown {
                return Ok(store.clone());
            }
        }

        let store = RowStore::new(
            name,
            inner.config.clone(),
            inner.coordinator.clone(),
            Arc::clone(&inner.snapshots),
            inner.scheduler.clone(),
        );
        store.spin_up()?;
        if inner.operating.load(Ordering::SeqCst) {
            store.begin_operations()?;
        }
        stores.insert(name.to_string(), store.clone());
        Ok(store)
    }

    /// Returns the store `name` if it is open.
    pub fn get(&self, name: &str) -> Option<RowStore> {
        self.inner.stores.lock().get(name).cloned()
    }

    /// Every open store, by name.
    pub fn stores(&self) -> Vec<RowStore> {
        self.inner.stores.lock().values().cloned().collect()
    }

    /// Lets writes proceed on every store, now and as they open.
    pub fn begin_operations(&self) -> CoreResult<()> {
        let stores = self.inner.stores.lock();
        self.inner.operating.store(true, Ordering::SeqCst);
        for store in stores.values() {
            store.begin_operations()?;
        }
        Ok(())
    }

    /// Spins down and forgets the store `name`.
    pub fn evict(&self, name: &str) -> CoreResult<()> {
        let store = self.inner.stores.lock().remove(name);
        match store {
            Some(store) => store.spin_down(),
            None => Ok(()),
        }
    }

    /// Spins down every store. Every store is attempted; the first failure
    /// is returned.
    pub fn close_all(&self) -> CoreResult<()> {
        let stores = std::mem::take(&mut *self.inner.stores.lock());
        let mut result = Ok(());
        for (name, store) in stores {
            if store.state() == EngineState::SpunDown {
                continue;
            }
            if let Err(e) = store.spin_down() {
                error!(store = %name, error = %e, "failed to spin down");
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        info!("all stores closed");
        result
    }

    /// Shared configuration.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Shared coordinator.
    pub fn coordinator(&self) -> &TransactionCoordinator {
        &self.inner.coordinator
    }

    /// Shared snapshot store.
    pub fn snapshots(&self) -> &Arc<dyn SnapshotStore> {
        &self.inner.snapshots
    }

    /// Shared scheduler.
    pub fn scheduler(&self) -> &SchedulerHandle {
        &self.inner.scheduler
    }
}

impl std::fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreRegistry")
            .field("stores", &self.inner.stores.lock().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
