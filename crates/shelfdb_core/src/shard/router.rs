//! Shard router.

use crate::document::Document;
use crate::engine::{RowCursor, StorageEngine, Upserted};
use crate::error::{CoreError, CoreResult};
use crate::interval::{dissect, Interval};
use crate::lifecycle::EngineState;
use crate::query::{DocumentUpdate, IndexSpec, Predicate};
use crate::registry::StoreRegistry;
use crate::row::{ReadView, RowStore};
use crate::scheduler::TaskControl;
use crate::shard::cursor::{CompositeCursor, EmptyCursor, ShardOpener};
use crate::shard::provider::IntervalProvider;
use crate::transaction::Transaction;
use crate::types::RowKey;
use parking_lot::{RwLock, RwLockWriteGuard};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Separates a table name from a shard's begin in store names.
const SHARD_SEPARATOR: char = '@';

struct ShardSlot {
    interval: Interval<i64>,
    /// `None` until first use and after eviction.
    store: Option<RowStore>,
}

impl ShardSlot {
    fn live_store(&self) -> Option<&RowStore> {
        self.store
            .as_ref()
            .filter(|store| store.state() != EngineState::SpunDown)
    }
}

struct RouterInner {
    table: String,
    provider: IntervalProvider,
    registry: StoreRegistry,
    /// Known shards by interval begin.
    shards: RwLock<BTreeMap<i64, ShardSlot>>,
    closed: AtomicBool,
}

/// Spreads one table over range shards of its integer row key.
///
/// Shard stores are opened lazily on first use and spun down again by a
/// periodic sweep once idle. Shards found in persisted snapshots are known
/// from the start, so predicate operations reach them even before they are
/// opened.
#[derive(Clone)]
pub struct ShardRouter {
    inner: Arc<RouterInner>,
}

impl ShardRouter {
    /// Opens the router for `table` and discovers its persisted shards.
    pub fn open(
        table: impl Into<String>,
        provider: IntervalProvider,
        registry: StoreRegistry,
    ) -> CoreResult<Self> {
        let table = table.into();
        let prefix = format!("{table}{SHARD_SEPARATOR}");

        let mut shards = BTreeMap::new();
        for name in registry.snapshots().tables()? {
            let Some(begin) = name.strip_prefix(&prefix) else {
                continue;
            };
            match begin.parse::<i64>() {
                Ok(begin) if provider.is_aligned(begin) => {
                    shards.insert(
                        begin,
                        ShardSlot {
                            interval: provider.interval_for(begin),
                            store: None,
                        },
                    );
                }
                _ => warn!(table = %table, shard = %name, "ignoring shard not aligned to this table's intervals"),
            }
        }
        debug!(table = %table, shards = shards.len(), "router opened");

        let router = Self {
            inner: Arc::new(RouterInner {
                table,
                provider,
                registry,
                shards: RwLock::new(shards),
                closed: AtomicBool::new(false),
            }),
        };
        router.schedule_sweep();
        Ok(router)
    }

    /// Table name.
    pub fn table(&self) -> &str {
        &self.inner.table
    }

    /// Shard geometry.
    pub fn provider(&self) -> IntervalProvider {
        self.inner.provider
    }

    /// Every known shard interval, ascending.
    pub fn shards(&self) -> Vec<Interval<i64>> {
        self.inner
            .shards
            .read()
            .values()
            .map(|slot| slot.interval.clone())
            .collect()
    }

    /// Number of shards with an open store.
    pub fn open_shards(&self) -> usize {
        self.inner
            .shards
            .read()
            .values()
            .filter(|slot| slot.live_store().is_some())
            .count()
    }

    /// Store name of the shard starting at `begin`.
    pub fn shard_name(&self, begin: i64) -> String {
        format!("{}{SHARD_SEPARATOR}{begin}", self.inner.table)
    }

    /// Intervals of the known shards a predicate can match, ascending.
    pub fn plan(&self, predicate: &Predicate) -> CoreResult<Vec<Interval<i64>>> {
        let domain = dissect::<i64>(predicate, &IndexSpec::row_key())?;
        Ok(self
            .inner
            .shards
            .read()
            .values()
            .filter(|slot| domain.intersects(&slot.interval))
            .map(|slot| slot.interval.clone())
            .collect())
    }

    /// Runs `f` against the store of the shard beginning at `begin`, opening
    /// it if needed. The shard cannot be evicted while `f` runs.
    fn with_shard<R>(&self, begin: i64, f: impl FnOnce(&RowStore) -> CoreResult<R>) -> CoreResult<R> {
        let inner = &*self.inner;
        if inner.closed.load(Ordering::SeqCst) {
            return Err(CoreError::engine_state(
                &inner.table,
                EngineState::SpunDown,
                "router is closed",
            ));
        }

        {
            let shards = inner.shards.read();
            if let Some(store) = shards.get(&begin).and_then(ShardSlot::live_store) {
                return f(store);
            }
        }

        let mut shards = inner.shards.write();
        let slot = shards.entry(begin).or_insert_with(|| ShardSlot {
            interval: inner.provider.interval_for(begin),
            store: None,
        });
        if slot.live_store().is_none() {
            let store = inner.registry.open(&self.shard_name(begin))?;
            debug!(table = %inner.table, shard = %slot.interval, "shard opened");
            slot.store = Some(store);
        }
        let shards = RwLockWriteGuard::downgrade(shards);
        match shards.get(&begin).and_then(ShardSlot::live_store) {
            Some(store) => f(store),
            None => Err(CoreError::engine_state(
                self.shard_name(begin),
                EngineState::SpunDown,
                "shard closed while opening",
            )),
        }
    }

    fn with_key<R>(&self, key: &RowKey, f: impl FnOnce(&RowStore) -> CoreResult<R>) -> CoreResult<R> {
        let Some(value) = key.as_int() else {
            return Err(CoreError::invalid_query(format!(
                "sharded table {} requires integer keys, got {key}",
                self.inner.table
            )));
        };
        self.with_shard(self.inner.provider.begin_for(value), f)
    }

    fn with_interval<R>(
        &self,
        interval: &Interval<i64>,
        f: impl FnOnce(&RowStore) -> CoreResult<R>,
    ) -> CoreResult<R> {
        let begin = interval.begin().copied().unwrap_or(i64::MIN);
        self.with_shard(begin, f)
    }

    fn sum_shards(
        &self,
        predicate: &Predicate,
        mut f: impl FnMut(&RowStore) -> CoreResult<usize>,
    ) -> CoreResult<usize> {
        let mut total = 0;
        for interval in self.plan(predicate)? {
            total += self.with_interval(&interval, &mut f)?;
        }
        Ok(total)
    }

    /// Spins down every shard idle for at least the configured timeout that
    /// has no open cursor and no uncommitted versions. Evicted shards stay
    /// known. Returns how many were evicted.
    ///
    /// A reloaded shard keeps only the newest version of each row, so a shard
    /// is also kept while any open transaction or pinned snapshot is older
    /// than its newest commit.
    pub fn evict_idle(&self) -> usize {
        let inner = &*self.inner;
        let timeout = inner.registry.config().shard_idle_timeout;
        let now = Instant::now();
        let low_water = inner.registry.coordinator().low_water_mark();

        let mut shards = inner.shards.write();
        let mut evicted = 0;
        for slot in shards.values_mut() {
            let Some(store) = slot.live_store() else {
                continue;
            };
            let idle = now.saturating_duration_since(store.last_activity());
            if idle < timeout
                || store.open_cursors() > 0
                || store.has_pending()
                || low_water <= store.high_water()
            {
                continue;
            }

            let name = store.name().to_string();
            slot.store = None;
            if let Err(e) = inner.registry.evict(&name) {
                warn!(table = %inner.table, shard = %slot.interval, error = %e, "failed to evict shard");
            }
            info!(table = %inner.table, shard = %slot.interval, idle_ms = idle.as_millis() as u64, "evicted idle shard");
            evicted += 1;
        }
        evicted
    }

    /// Stops the sweep and rejects further operations. Shard stores are
    /// closed by their registry.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        for slot in self.inner.shards.write().values_mut() {
            slot.store = None;
        }
    }

    fn schedule_sweep(&self) {
        let config = self.inner.registry.config();
        if config.shard_sweep_interval.is_zero() {
            return;
        }
        let interval = config.shard_sweep_interval;
        let weak = Arc::downgrade(&self.inner);
        self.inner
            .registry
            .scheduler()
            .schedule(interval, move || sweep_task(&weak, interval));
    }
}

fn sweep_task(weak: &Weak<RouterInner>, interval: std::time::Duration) -> TaskControl {
    let Some(inner) = weak.upgrade() else {
        return TaskControl::Done;
    };
    if inner.closed.load(Ordering::SeqCst) {
        return TaskControl::Done;
    }
    ShardRouter { inner }.evict_idle();
    TaskControl::RunAgainIn(interval)
}

impl StorageEngine for ShardRouter {
    fn insert_row(&self, txn: Option<&Transaction>, key: RowKey, doc: Document) -> CoreResult<()> {
        self.with_key(&key.clone(), |store| store.insert_row(txn, key, doc))
    }

    fn read_row(&self, txn: Option<&Transaction>, key: &RowKey) -> CoreResult<Option<Document>> {
        self.with_key(key, |store| store.read_row(txn, key))
    }

    fn query_table(
        &self,
        txn: Option<&Transaction>,
        predicate: &Predicate,
    ) -> CoreResult<Box<dyn RowCursor>> {
        let plan = self.plan(predicate)?;
        match plan.as_slice() {
            [] => return Ok(Box::new(EmptyCursor)),
            [interval] => return self.with_interval(interval, |store| store.query_table(txn, predicate)),
            _ => {}
        }

        let (view, pin) = match txn {
            Some(txn) => {
                txn.ensure_open()?;
                (txn.view(), None)
            }
            None => {
                let pin = self.inner.registry.coordinator().pin_current();
                (ReadView::at(pin.snapshot()), Some(pin))
            }
        };
        debug!(table = %self.inner.table, shards = plan.len(), "composite query");

        let router = self.clone();
        let predicate = predicate.clone();
        let opener: ShardOpener = Box::new(move |interval: &Interval<i64>| {
            router.with_interval(interval, |store| {
                let cursor = store.open_cursor(Some(view), predicate.clone())?;
                Ok(Box::new(cursor) as Box<dyn RowCursor>)
            })
        });
        Ok(Box::new(CompositeCursor::new(plan, opener, pin)))
    }

    fn replace_row(&self, txn: Option<&Transaction>, key: RowKey, doc: Document) -> CoreResult<()> {
        self.with_key(&key.clone(), |store| store.replace_row(txn, key, doc))
    }

    fn update_row(
        &self,
        txn: Option<&Transaction>,
        key: &RowKey,
        update: &dyn DocumentUpdate,
    ) -> CoreResult<bool> {
        self.with_key(key, |store| store.update_row(txn, key, update))
    }

    fn update_all(
        &self,
        txn: Option<&Transaction>,
        predicate: &Predicate,
        update: &dyn DocumentUpdate,
    ) -> CoreResult<usize> {
        self.sum_shards(predicate, |store| store.update_all(txn, predicate, update))
    }

    fn upsert_row(&self, txn: Option<&Transaction>, key: RowKey, doc: Document) -> CoreResult<Upserted> {
        self.with_key(&key.clone(), |store| store.upsert_row(txn, key, doc))
    }

    fn delete_row(&self, txn: Option<&Transaction>, key: &RowKey) -> CoreResult<()> {
        self.with_key(key, |store| store.delete_row(txn, key))
    }

    fn delete_all(&self, txn: Option<&Transaction>, predicate: &Predicate) -> CoreResult<usize> {
        self.sum_shards(predicate, |store| store.delete_all(txn, predicate))
    }
}

impl std::fmt::Debug for ShardRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardRouter")
            .field("table", &self.inner.table)
            .field("provider", &self.inner.provider)
            .field("shards", &self.shards().len())
            .finish_non_exhaustive()
    }
}
