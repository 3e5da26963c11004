//! Shared helpers for integration tests.

#![allow(dead_code)]

use shelfdb_core::{Config, Database, Document};
use shelfdb_storage::{InMemoryBackend, StorageBackend};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Fast flushes, no background cleanup or shard sweeps.
pub fn test_config() -> Config {
    Config::default()
        .flush_debounce(Duration::from_millis(2))
        .cleanup_interval(Duration::ZERO)
        .shard_sweep_interval(Duration::ZERO)
        .spin_down_timeout(Duration::from_secs(5))
}

pub fn open_memory(backend: &Arc<InMemoryBackend>) -> Database {
    open_memory_with(backend, test_config())
}

pub fn open_memory_with(backend: &Arc<InMemoryBackend>, config: Config) -> Database {
    let backend: Arc<dyn StorageBackend> = Arc::clone(backend) as Arc<dyn StorageBackend>;
    Database::open_with_backend(backend, config).unwrap()
}

/// Simulates a restart: a new backend holding the same blobs.
pub fn restart(backend: &Arc<InMemoryBackend>) -> Arc<InMemoryBackend> {
    Arc::new(InMemoryBackend::with_blobs(backend.blobs()))
}

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

pub fn person(name: &str, age: i64) -> Document {
    Document::map([("name", Document::from(name)), ("age", Document::from(age))])
}
