//! Engine configuration.

use std::time::Duration;

/// Configuration shared by every store a database opens.
#[derive(Debug, Clone)]
pub struct Config {
    /// Delay between the first dirtying write and the coalesced flush.
    pub flush_debounce: Duration,

    /// Consecutive flush failures after which the next writer flushes
    /// synchronously and receives the error.
    pub max_flush_failures: u32,

    /// How often version cleanup runs (zero disables it).
    pub cleanup_interval: Duration,

    /// How long spin-down waits for open cursors before forcing.
    pub spin_down_timeout: Duration,

    /// Inactivity window after which an idle shard is evicted.
    pub shard_idle_timeout: Duration,

    /// How often the idle-shard sweep runs (zero disables it).
    pub shard_sweep_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            flush_debounce: Duration::from_millis(50),
            max_flush_failures: 3,
            cleanup_interval: Duration::from_secs(10),
            spin_down_timeout: Duration::from_secs(30),
            shard_idle_timeout: Duration::from_secs(300),
            shard_sweep_interval: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flush debounce window.
    #[must_use]
    pub const fn flush_debounce(mut self, value: Duration) -> Self {
        self.flush_debounce = value;
        self
    }

    /// Sets the consecutive flush failure threshold.
    #[must_use]
    pub const fn max_flush_failures(mut self, value: u32) -> Self {
        self.max_flush_failures = value;
        self
    }

    /// Sets the cleanup interval.
    #[must_use]
    pub const fn cleanup_interval(mut self, value: Duration) -> Self {
        self.cleanup_interval = value;
        self
    }

    /// Sets the spin-down drain timeout.
    #[must_use]
    pub const fn spin_down_timeout(mut self, value: Duration) -> Self {
        self.spin_down_timeout = value;
        self
    }

    /// Sets the idle window after which shards are evicted.
    #[must_use]
    pub const fn shard_idle_timeout(mut self, value: Duration) -> Self {
        self.shard_idle_timeout = value;
        self
    }

    /// Sets the idle-shard sweep interval.
    #[must_use]
    pub const fn shard_sweep_interval(mut self, value: Duration) -> Self {
        self.shard_sweep_interval = value;
        self
    }
}
