//! Sharded row lock table.

use crate::row::version::Row;
use crate::types::RowKey;
use parking_lot::{Mutex, RwLock};
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Number of map shards.
const SHARDS: usize = 16;

type RowMap = BTreeMap<RowKey, Arc<Mutex<Row>>>;

/// Rows of one store, spread over independently locked shards so unrelated
/// keys do not contend. Each row has its own mutex.
#[derive(Debug)]
pub(crate) struct RowTable {
    shards: Vec<RwLock<RowMap>>,
}

impl RowTable {
    pub(crate) fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| RwLock::new(BTreeMap::new())).collect(),
        }
    }

    fn shard(&self, key: &RowKey) -> &RwLock<RowMap> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        // Truncation is fine; only the low bits pick the shard.
        #[allow(clippy::cast_possible_truncation)]
        let index = hasher.finish() as usize % SHARDS;
        &self.shards[index]
    }

    pub(crate) fn get(&self, key: &RowKey) -> Option<Arc<Mutex<Row>>> {
        self.shard(key).read().get(key).cloned()
    }

    pub(crate) fn get_or_insert(&self, key: &RowKey) -> Arc<Mutex<Row>> {
        if let Some(row) = self.get(key) {
            return row;
        }
        Arc::clone(
            self.shard(key)
                .write()
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(Row::new(key.clone())))),
        )
    }

    pub(crate) fn insert(&self, row: Row) {
        let key = row.key().clone();
        self.shard(&key).write().insert(key, Arc::new(Mutex::new(row)));
    }

    /// Removes `key` if `obsolete` still holds for it.
    pub(crate) fn remove_if(&self, key: &RowKey, obsolete: impl FnOnce(&Row) -> bool) -> bool {
        let mut shard = self.shard(key).write();
        let remove = shard.get(key).is_some_and(|row| obsolete(&row.lock()));
        if remove {
            shard.remove(key);
        }
        remove
    }

    /// Every key, sorted.
    pub(crate) fn keys(&self) -> Vec<RowKey> {
        let mut keys: Vec<RowKey> = self
            .shards
            .iter()
            .flat_map(|shard| shard.read().keys().cloned().collect::<Vec<_>>())
            .collect();
        keys.sort();
        keys
    }

    /// Every row, sorted by key.
    pub(crate) fn rows(&self) -> Vec<Arc<Mutex<Row>>> {
        let mut rows: Vec<(RowKey, Arc<Mutex<Row>>)> = self
            .shards
            .iter()
            .flat_map(|shard| {
                shard
                    .read()
                    .iter()
                    .map(|(k, r)| (k.clone(), Arc::clone(r)))
                    .collect::<Vec<_>>()
            })
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows.into_iter().map(|(_, r)| r).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    pub(crate) fn clear(&self) {
        for shard in &self.shards {
            shard.write().clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_sorted_across_shards() {
        let table = RowTable::new();
        for k in [5_i64, -3, 100, 42, 0] {
            table.get_or_insert(&RowKey::Int(k));
        }
        table.get_or_insert(&RowKey::from("z"));
        assert_eq!(
            table.keys(),
            vec![
                RowKey::Int(-3),
                RowKey::Int(0),
                RowKey::Int(5),
                RowKey::Int(42),
                RowKey::Int(100),
                RowKey::from("z"),
            ]
        );
        assert_eq!(table.len(), 6);
    }

    #[test]
    fn get_or_insert_returns_the_same_row() {
        let table = RowTable::new();
        let a = table.get_or_insert(&RowKey::Int(1));
        let b = table.get_or_insert(&RowKey::Int(1));
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn remove_if_rechecks() {
        let table = RowTable::new();
        table.get_or_insert(&RowKey::Int(1));
        assert!(!table.remove_if(&RowKey::Int(1), |_| false));
        assert!(table.remove_if(&RowKey::Int(1), |row| row.version_count() == 0));
        assert!(table.get(&RowKey::Int(1)).is_none());
    }
}
