//! Bounded pool of OS worker threads
//!
//! Admits at most `capacity` tasks (queued plus running) at a time and
//! starts worker threads lazily, never more than `capacity`. Idle workers
//! exit after `expiry`, so a quiet pool holds no threads.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error};

use crate::panic::panic_message;

/// Unit of work run by a pool
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Worker pool options
#[derive(Debug, Clone)]
pub struct WorkerPoolOptions {
    /// Used for thread names and logs
    pub name: String,
    /// Maximum number of admitted (queued plus running) tasks
    pub capacity: usize,
    /// How long an idle worker waits for work before exiting
    pub expiry: Duration,
    /// Fail submissions at capacity instead of waiting
    pub non_blocking: bool,
}

/// Native submission failures of a worker pool
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// Non-blocking pool has no free slot
    #[error("worker pool is at capacity")]
    Full,

    /// Pool has been closed or released
    #[error("worker pool is closed")]
    Closed,

    /// The OS refused to start a worker thread
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// A submission the pool refused, with the task handed back
pub struct Rejected {
    pub error: SubmitError,
    pub task: Task,
}

impl Rejected {
    fn new(error: SubmitError, task: Task) -> Self {
        Self { error, task }
    }
}

impl std::fmt::Debug for Rejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rejected")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct State {
    queue: VecDeque<Task>,
    /// Tasks currently executing
    running: usize,
    /// Live worker threads (busy or idle)
    workers: usize,
    /// Submitters parked until a slot frees
    waiting: usize,
    closed: bool,
}

struct Shared {
    options: WorkerPoolOptions,
    state: Mutex<State>,
    /// Signalled when a task is queued or the pool closes
    work_ready: Condvar,
    /// Signalled when a task finishes or the pool closes
    slot_freed: Condvar,
    /// Signalled when the last worker exits
    drained: Condvar,
    /// Upcoming worker spawns to fail
    #[cfg(test)]
    refused_spawns: AtomicUsize,
}

/// Capacity-bounded worker pool
///
/// Cloning yields another handle to the same pool.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use pool_executor::worker::{WorkerPool, WorkerPoolOptions};
///
/// let pool = WorkerPool::new(WorkerPoolOptions {
///     name: "demo".to_string(),
///     capacity: 4,
///     expiry: Duration::from_secs(1),
///     non_blocking: false,
/// });
///
/// pool.submit(Box::new(|| println!("hello from a worker"))).unwrap();
/// pool.release();
/// ```
#[derive(Clone)]
pub struct WorkerPool {
    shared: Arc<Shared>,
}

impl WorkerPool {
    /// Create a pool; no threads are started until the first submission
    pub fn new(mut options: WorkerPoolOptions) -> Self {
        options.capacity = options.capacity.max(1);
        Self {
            shared: Arc::new(Shared {
                options,
                state: Mutex::new(State::default()),
                work_ready: Condvar::new(),
                slot_freed: Condvar::new(),
                drained: Condvar::new(),
                #[cfg(test)]
                refused_spawns: AtomicUsize::new(0),
            }),
        }
    }

    /// Submit a task.
    ///
    /// Blocking pools park the caller while the pool is at capacity.
    pub fn submit(&self, task: Task) -> Result<(), SubmitError> {
        self.submit_or_reject(task).map_err(|rejected| rejected.error)
    }

    /// Like [`WorkerPool::submit`], but hands the task back when refused
    pub fn submit_or_reject(&self, task: Task) -> Result<(), Rejected> {
        let shared = &self.shared;
        let mut state = shared.state.lock();

        loop {
            if state.closed {
                return Err(Rejected::new(SubmitError::Closed, task));
            }
            if state.running + state.queue.len() < shared.options.capacity {
                break;
            }
            if shared.options.non_blocking {
                return Err(Rejected::new(SubmitError::Full, task));
            }
            state.waiting += 1;
            shared.slot_freed.wait(&mut state);
            state.waiting -= 1;
        }

        // Every worker that is not running a task picks up one queued task.
        let idle = state.workers - state.running;
        if idle <= state.queue.len() {
            // The new worker blocks on the state lock until the task is queued.
            if let Err(err) = self.spawn_worker() {
                // The slot this submitter may have been woken for is still free.
                shared.slot_freed.notify_one();
                return Err(Rejected::new(SubmitError::Spawn(err), task));
            }
            state.workers += 1;
            state.queue.push_back(task);
        } else {
            state.queue.push_back(task);
            shared.work_ready.notify_one();
        }

        Ok(())
    }

    /// Stop accepting tasks without waiting for the drain.
    ///
    /// Admitted tasks still run; idle workers exit.
    pub fn close(&self) {
        let mut state = self.shared.state.lock();
        self.close_locked(&mut state);
    }

    /// Close the pool and block until every admitted task has finished and
    /// every worker thread has exited.
    ///
    /// Must not be called from a task running on this pool.
    pub fn release(&self) {
        let mut state = self.shared.state.lock();
        self.close_locked(&mut state);
        while state.workers > 0 {
            self.shared.drained.wait(&mut state);
        }
        debug!(pool = %self.shared.options.name, "Worker pool released");
    }

    fn close_locked(&self, state: &mut MutexGuard<'_, State>) {
        if state.closed {
            return;
        }
        state.closed = true;
        self.shared.work_ready.notify_all();
        self.shared.slot_freed.notify_all();
    }

    fn spawn_worker(&self) -> std::io::Result<()> {
        if self.refuse_spawn() {
            return Err(std::io::Error::other("worker spawn refused"));
        }
        let shared = Arc::clone(&self.shared);
        let thread_name = format!("{}-worker", shared.options.name).replace('\0', "");
        thread::Builder::new()
            .name(thread_name)
            .spawn(move || run_worker(shared))
            .map(|_| ())
    }

    #[cfg(test)]
    fn refuse_spawn(&self) -> bool {
        self.shared
            .refused_spawns
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    #[cfg(not(test))]
    fn refuse_spawn(&self) -> bool {
        false
    }

    /// Pool name
    pub fn name(&self) -> &str {
        &self.shared.options.name
    }

    /// Maximum number of admitted tasks
    pub fn cap(&self) -> usize {
        self.shared.options.capacity
    }

    /// Tasks currently executing
    pub fn running(&self) -> usize {
        self.shared.state.lock().running
    }

    /// Slots available for new submissions
    pub fn free(&self) -> usize {
        let state = self.shared.state.lock();
        self.shared
            .options
            .capacity
            .saturating_sub(state.running + state.queue.len())
    }

    /// Submitters parked waiting for a slot
    pub fn waiting(&self) -> usize {
        self.shared.state.lock().waiting
    }

    /// Live worker threads
    pub fn workers(&self) -> usize {
        self.shared.state.lock().workers
    }

    /// Whether the pool has been closed
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }
}

fn run_worker(shared: Arc<Shared>) {
    let mut state = shared.state.lock();

    loop {
        if let Some(task) = state.queue.pop_front() {
            state.running += 1;
            MutexGuard::unlocked(&mut state, || run_task(&shared.options.name, task));
            state.running -= 1;
            shared.slot_freed.notify_one();
            continue;
        }

        if state.closed {
            break;
        }

        let timed_out = shared
            .work_ready
            .wait_for(&mut state, shared.options.expiry)
            .timed_out();
        if timed_out && state.queue.is_empty() {
            break;
        }
    }

    state.workers -= 1;
    if state.workers == 0 {
        shared.drained.notify_all();
    }
}

fn run_task(pool: &str, task: Task) {
    // Callers normally contain panics themselves; this keeps the
    // accounting intact when they do not.
    if let Err(payload) = catch_unwind(AssertUnwindSafe(task)) {
        error!(
            pool = %pool,
            panic = %panic_message(payload.as_ref()),
            "Worker task panicked"
        );
    }
}
