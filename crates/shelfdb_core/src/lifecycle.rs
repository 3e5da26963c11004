//! Engine lifecycle state machine.
//!
//! A store moves strictly forward through
//! `Uninitialized → SpinningUp → SpunUp → Running → SpinningDown → SpunDown`.
//! The lifecycle also tracks open cursors, running writes and in-flight
//! flushes so that spin-down can drain them.

use crate::error::{CoreError, CoreResult};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

/// Lifecycle state of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EngineState {
    /// Created, nothing loaded.
    Uninitialized,
    /// Loading persisted rows.
    SpinningUp,
    /// Rows loaded; waiting for operations to begin.
    SpunUp,
    /// Serving reads and writes.
    Running,
    /// Flushing and draining cursors.
    SpinningDown,
    /// Released; every access fails.
    SpunDown,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::SpinningUp => "spinning up",
            Self::SpunUp => "spun up",
            Self::Running => "running",
            Self::SpinningDown => "spinning down",
            Self::SpunDown => "spun down",
        };
        f.write_str(name)
    }
}

/// Handle for a registered cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CursorId(u64);

#[derive(Debug)]
struct LifecycleInner {
    state: EngineState,
    operations_begun: bool,
    flushes_in_flight: usize,
    writes_in_flight: usize,
    cursors: HashMap<CursorId, u64>,
    next_cursor: u64,
}

impl LifecycleInner {
    fn is_drained(&self) -> bool {
        self.cursors.is_empty() && self.writes_in_flight == 0 && self.flushes_in_flight == 0
    }
}

/// A running write. Spin-down waits until every permit is dropped.
#[derive(Debug)]
#[must_use = "the write is only tracked while the permit is held"]
pub struct WritePermit<'a> {
    lifecycle: &'a Lifecycle,
}

impl Drop for WritePermit<'_> {
    fn drop(&mut self) {
        let mut inner = self.lifecycle.inner.lock();
        inner.writes_in_flight = inner.writes_in_flight.saturating_sub(1);
        self.lifecycle.changed.notify_all();
    }
}

/// The lifecycle of one store.
#[derive(Debug)]
pub struct Lifecycle {
    name: String,
    inner: Mutex<LifecycleInner>,
    changed: Condvar,
}

impl Lifecycle {
    /// Creates a lifecycle in [`EngineState::Uninitialized`].
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(LifecycleInner {
                state: EngineState::Uninitialized,
                operations_begun: false,
                flushes_in_flight: 0,
                writes_in_flight: 0,
                cursors: HashMap::new(),
                next_cursor: 0,
            }),
            changed: Condvar::new(),
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> EngineState {
        self.inner.lock().state
    }

    fn error(&self, state: EngineState, message: impl Into<String>) -> CoreError {
        CoreError::engine_state(&self.name, state, message)
    }

    /// `Uninitialized → SpinningUp`.
    pub fn begin_spin_up(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        if inner.state != EngineState::Uninitialized {
            return Err(self.error(inner.state, "spin up requires an uninitialized engine"));
        }
        inner.state = EngineState::SpinningUp;
        debug!(store = %self.name, "spinning up");
        Ok(())
    }

    /// `SpinningUp → SpunUp`, continuing to `Running` if operations were
    /// already begun.
    pub fn finish_spin_up(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        if inner.state != EngineState::SpinningUp {
            return Err(self.error(inner.state, "spin up was not in progress"));
        }
        inner.state = if inner.operations_begun {
            EngineState::Running
        } else {
            EngineState::SpunUp
        };
        debug!(store = %self.name, state = %inner.state, "spun up");
        self.changed.notify_all();
        Ok(())
    }

    /// Allows operations to begin. Whichever of this and
    /// [`Lifecycle::finish_spin_up`] comes second moves the engine to
    /// `Running` and wakes parked callers.
    pub fn begin_operations(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            EngineState::Uninitialized | EngineState::SpinningUp => {
                inner.operations_begun = true;
            }
            EngineState::SpunUp => {
                inner.operations_begun = true;
                inner.state = EngineState::Running;
                debug!(store = %self.name, "running");
                self.changed.notify_all();
            }
            EngineState::Running => {}
            state @ (EngineState::SpinningDown | EngineState::SpunDown) => {
                return Err(self.error(state, "cannot begin operations"));
            }
        }
        Ok(())
    }

    /// Blocks until writes are allowed and returns a permit covering the
    /// write.
    ///
    /// Writes park while spinning up and fail before spin-up starts or once
    /// spin-down has begun.
    pub fn await_writable(&self) -> CoreResult<WritePermit<'_>> {
        let mut inner = self.inner.lock();
        loop {
            match inner.state {
                EngineState::Running => {
                    inner.writes_in_flight += 1;
                    return Ok(WritePermit { lifecycle: self });
                }
                EngineState::SpinningUp | EngineState::SpunUp => self.changed.wait(&mut inner),
                state => return Err(self.error(state, "writes are not allowed")),
            }
        }
    }

    /// Blocks until reads are allowed.
    pub fn await_readable(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        loop {
            match inner.state {
                EngineState::SpunUp | EngineState::Running | EngineState::SpinningDown => {
                    return Ok(())
                }
                EngineState::SpinningUp => self.changed.wait(&mut inner),
                state => return Err(self.error(state, "reads are not allowed")),
            }
        }
    }

    /// Fails without blocking unless reads are currently allowed.
    pub fn check_readable(&self) -> CoreResult<()> {
        let state = self.state();
        match state {
            EngineState::SpunUp | EngineState::Running | EngineState::SpinningDown => Ok(()),
            _ => Err(self.error(state, "reads are not allowed")),
        }
    }

    /// Registers an open cursor reading at `snapshot`.
    pub fn register_cursor(&self, snapshot: u64) -> CoreResult<CursorId> {
        let mut inner = self.inner.lock();
        match inner.state {
            EngineState::SpunUp | EngineState::Running | EngineState::SpinningDown => {}
            state => return Err(self.error(state, "cannot open a cursor")),
        }
        let id = CursorId(inner.next_cursor);
        inner.next_cursor += 1;
        inner.cursors.insert(id, snapshot);
        Ok(id)
    }

    /// Deregisters a cursor and wakes anyone draining.
    pub fn deregister_cursor(&self, id: CursorId) {
        let mut inner = self.inner.lock();
        if inner.cursors.remove(&id).is_some() {
            self.changed.notify_all();
        }
    }

    /// Number of open cursors.
    pub fn open_cursors(&self) -> usize {
        self.inner.lock().cursors.len()
    }

    /// Smallest snapshot any open cursor reads at.
    pub fn oldest_cursor_snapshot(&self) -> Option<u64> {
        self.inner.lock().cursors.values().copied().min()
    }

    /// Marks a flush as in flight. Fails once the engine is spun down.
    pub fn begin_flush(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            EngineState::SpinningUp
            | EngineState::SpunUp
            | EngineState::Running
            | EngineState::SpinningDown => {
                inner.flushes_in_flight += 1;
                Ok(())
            }
            state => Err(self.error(state, "cannot flush")),
        }
    }

    /// Marks an in-flight flush as finished.
    pub fn end_flush(&self) {
        let mut inner = self.inner.lock();
        inner.flushes_in_flight = inner.flushes_in_flight.saturating_sub(1);
        self.changed.notify_all();
    }

    /// `SpunUp | Running → SpinningDown`. Parked writers wake and fail.
    pub fn begin_spin_down(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            EngineState::SpunUp | EngineState::Running => {
                inner.state = EngineState::SpinningDown;
                debug!(store = %self.name, "spinning down");
                self.changed.notify_all();
                Ok(())
            }
            state => Err(self.error(state, "spin down requires a spun up engine")),
        }
    }

    /// Number of writes holding a permit.
    pub fn writes_in_flight(&self) -> usize {
        self.inner.lock().writes_in_flight
    }

    /// Waits until no cursor is open, no write is running and no flush is in
    /// flight.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub fn await_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        while !inner.is_drained() {
            if self.changed.wait_until(&mut inner, deadline).timed_out() {
                return inner.is_drained();
            }
        }
        true
    }

    /// `SpinningDown → SpunDown`.
    pub fn finish_spin_down(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        if inner.state != EngineState::SpinningDown {
            return Err(self.error(inner.state, "spin down was not in progress"));
        }
        inner.state = EngineState::SpunDown;
        debug!(store = %self.name, "spun down");
        self.changed.notify_all();
        Ok(())
    }

    /// Unconditionally moves to `SpunDown`, abandoning open cursors.
    pub fn force_spin_down(&self) {
        let mut inner = self.inner.lock();
        inner.state = EngineState::SpunDown;
        inner.cursors.clear();
        debug!(store = %self.name, "forced spin down");
        self.changed.notify_all();
    }
}
