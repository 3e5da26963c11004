//! Background task scheduler.
//!
//! A single named thread runs delayed tasks in deadline order. Stores use it
//! for debounced flushes and version cleanup; shard routers use it for the
//! idle sweep. Tasks hold weak references to their owner and return
//! [`TaskControl::Done`] once it is gone or spun down.

use crate::error::CoreResult;
use parking_lot::{Condvar, Mutex};
use shelfdb_storage::StorageError;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// What a task wants after it ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskControl {
    /// Do not run again.
    Done,
    /// Run again after the given delay.
    RunAgainIn(Duration),
}

/// A scheduled unit of work.
pub type Task = Box<dyn FnMut() -> TaskControl + Send>;

struct Entry {
    deadline: Instant,
    seq: u64,
    task: Task,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Reversed so the max-heap pops the earliest deadline.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct Queue {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
    shutdown: bool,
}

#[derive(Default)]
struct Shared {
    queue: Mutex<Queue>,
    wakeup: Condvar,
}

impl Shared {
    fn push(&self, delay: Duration, task: Task) {
        let mut queue = self.queue.lock();
        if queue.shutdown {
            return;
        }
        let seq = queue.next_seq;
        queue.next_seq += 1;
        queue.heap.push(Entry {
            deadline: Instant::now() + delay,
            seq,
            task,
        });
        self.wakeup.notify_one();
    }
}

/// Owns the scheduler thread. Dropping it stops and joins the thread;
/// pending tasks are discarded.
pub struct Scheduler {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

/// A cloneable handle for scheduling tasks.
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Arc<Shared>,
}

impl Scheduler {
    /// Starts the scheduler thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn start(name: &str) -> CoreResult<Self> {
        let shared = Arc::new(Shared::default());
        let worker = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(format!("shelfdb-{name}"))
                .spawn(move || run(&shared))
                .map_err(StorageError::from)?
        };
        debug!(name, "scheduler started");
        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Returns a handle for scheduling tasks.
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().heap.len()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        {
            let mut queue = self.shared.queue.lock();
            queue.shutdown = true;
            queue.heap.clear();
        }
        self.shared.wakeup.notify_all();
        if let Some(worker) = self.worker.take() {
            if worker.thread().id() != thread::current().id() && worker.join().is_err() {
                error!("scheduler thread panicked");
            }
        }
    }
}

impl SchedulerHandle {
    /// Runs `task` after `delay`.
    pub fn schedule<F>(&self, delay: Duration, task: F)
    where
        F: FnMut() -> TaskControl + Send + 'static,
    {
        self.shared.push(delay, Box::new(task));
    }
}

fn run(shared: &Shared) {
    loop {
        let mut entry = {
            let mut queue = shared.queue.lock();
            loop {
                if queue.shutdown {
                    return;
                }
                let now = Instant::now();
                match queue.heap.peek().map(|e| e.deadline) {
                    Some(deadline) if deadline <= now => {
                        if let Some(entry) = queue.heap.pop() {
                            break entry;
                        }
                    }
                    Some(deadline) => {
                        let _ = shared.wakeup.wait_until(&mut queue, deadline);
                    }
                    None => shared.wakeup.wait(&mut queue),
                }
            }
        };

        if let TaskControl::RunAgainIn(delay) = (entry.task)() {
            shared.push(delay, entry.task);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn runs_task_after_delay() {
        let scheduler = Scheduler::start("test").unwrap();
        let ran = Arc::new(AtomicUsize::new(0));
        {
            let ran = Arc::clone(&ran);
            scheduler.handle().schedule(Duration::from_millis(5), move || {
                ran.fetch_add(1, AtomicOrdering::SeqCst);
                TaskControl::Done
            });
        }
        assert!(wait_for(|| ran.load(AtomicOrdering::SeqCst) == 1));
    }

    #[test]
    fn runs_in_deadline_order() {
        let scheduler = Scheduler::start("test").unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));
        for (delay, tag) in [(30, 'c'), (10, 'a'), (20, 'b')] {
            let order = Arc::clone(&order);
            scheduler.handle().schedule(Duration::from_millis(delay), move || {
                order.lock().push(tag);
                TaskControl::Done
            });
        }
        assert!(wait_for(|| order.lock().len() == 3));
        assert_eq!(*order.lock(), vec!['a', 'b', 'c']);
    }

    #[test]
    fn repeating_task_stops_itself() {
        let scheduler = Scheduler::start("test").unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        {
            let runs = Arc::clone(&runs);
            scheduler.handle().schedule(Duration::ZERO, move || {
                if runs.fetch_add(1, AtomicOrdering::SeqCst) + 1 < 3 {
                    TaskControl::RunAgainIn(Duration::from_millis(1))
                } else {
                    TaskControl::Done
                }
            });
        }
        assert!(wait_for(|| runs.load(AtomicOrdering::SeqCst) == 3));
        assert!(wait_for(|| scheduler.pending() == 0));
    }

    #[test]
    fn drop_discards_pending_tasks() {
        let ran = Arc::new(AtomicUsize::new(0));
        {
            let scheduler = Scheduler::start("test").unwrap();
            let ran = Arc::clone(&ran);
            scheduler.handle().schedule(Duration::from_secs(60), move || {
                ran.fetch_add(1, AtomicOrdering::SeqCst);
                TaskControl::Done
            });
        }
        assert_eq!(ran.load(AtomicOrdering::SeqCst), 0);
    }
}
