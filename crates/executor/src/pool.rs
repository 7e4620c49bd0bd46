//! Managed pool
//!
//! Owns one [`WorkerPool`] and the validated [`PoolConfig`] that built it.
//! Adds panic containment around every task and a release that bounds how
//! long the caller waits for the drain.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::error::ExecutorError;
use crate::panic::{report_panic, SharedPanicHandler};
use crate::worker::{SubmitError, Task, WorkerPool, WorkerPoolOptions};

/// Point-in-time view of one pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub name: String,
    pub capacity: usize,
    pub running: usize,
    pub free: usize,
    pub waiting: usize,
    pub non_blocking: bool,
    pub expiry_ms: u64,
}

/// A task a pool refused, already wrapped for panic containment
pub(crate) struct RejectedTask {
    pub error: ExecutorError,
    pub task: Task,
}

/// A named worker pool with panic containment
pub struct ManagedPool {
    config: PoolConfig,
    pool: WorkerPool,
    panic_handler: Option<SharedPanicHandler>,
}

impl ManagedPool {
    /// Validate `config` and create its pool
    pub fn new(
        mut config: PoolConfig,
        panic_handler: Option<SharedPanicHandler>,
    ) -> Result<Self, ExecutorError> {
        config.validate()?;

        let pool = WorkerPool::new(WorkerPoolOptions {
            name: config.name.clone(),
            capacity: config.capacity(),
            expiry: config.expiry,
            non_blocking: config.non_blocking,
        });

        info!(
            pool = %config.name,
            size = config.size,
            expiry_ms = config.expiry.as_millis() as u64,
            non_blocking = config.non_blocking,
            "Created pool"
        );

        Ok(Self {
            config,
            pool,
            panic_handler,
        })
    }

    /// Pool name
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Validated configuration this pool was built from
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Submit a task; panics inside it are contained and reported.
    ///
    /// A full non-blocking pool yields [`ExecutorError::PoolOverload`], a
    /// closed pool [`ExecutorError::ManagerClosed`].
    pub fn submit<F>(&self, task: F) -> Result<(), ExecutorError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit_task(self.wrap(task))
            .map_err(|rejected| rejected.error)
    }

    /// Wrap `task` so a panic is caught and routed to the panic handler
    pub(crate) fn wrap<F>(&self, task: F) -> Task
    where
        F: FnOnce() + Send + 'static,
    {
        let name = self.config.name.clone();
        let panic_handler = self.panic_handler.clone();

        Box::new(move || {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(task)) {
                report_panic(panic_handler.as_ref(), &name, payload.as_ref());
            }
        })
    }

    /// Submit an already wrapped task, handing it back when refused
    pub(crate) fn submit_task(&self, task: Task) -> Result<(), RejectedTask> {
        self.pool.submit_or_reject(task).map_err(|rejected| {
            let error = match rejected.error {
                SubmitError::Full => ExecutorError::PoolOverload(self.config.name.clone()),
                SubmitError::Closed => ExecutorError::ManagerClosed,
                SubmitError::Spawn(source) => ExecutorError::Spawn {
                    pool: self.config.name.clone(),
                    source,
                },
            };
            RejectedTask {
                error,
                task: rejected.task,
            }
        })
    }

    /// Release the pool, waiting at most `timeout` for the drain.
    ///
    /// The drain runs on a detached thread and is not cancelled when the
    /// timeout fires: running and queued tasks still finish and the worker
    /// threads still exit. The timeout only bounds the caller's wait, and
    /// the runtime can be dropped while the drain is still in progress.
    pub async fn release_timeout(&self, timeout: Duration) -> Result<(), ExecutorError> {
        let pool = self.pool.clone();
        let (done_tx, done_rx) = oneshot::channel();
        let thread_name = format!("{}-release", self.config.name).replace('\0', "");

        thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                pool.release();
                let _ = done_tx.send(());
            })
            .map_err(|e| ExecutorError::ReleaseFailed {
                pool: self.config.name.clone(),
                reason: e.to_string(),
            })?;

        match tokio::time::timeout(timeout, done_rx).await {
            Ok(Ok(())) => {
                debug!(pool = %self.config.name, "Pool released");
                Ok(())
            }
            Ok(Err(recv_err)) => Err(ExecutorError::ReleaseFailed {
                pool: self.config.name.clone(),
                reason: recv_err.to_string(),
            }),
            Err(_) => {
                warn!(
                    pool = %self.config.name,
                    timeout_ms = timeout.as_millis() as u64,
                    running = self.pool.running(),
                    "Pool release timed out, drain continues in background"
                );
                Err(ExecutorError::ReleaseTimeout {
                    pool: self.config.name.clone(),
                    timeout,
                })
            }
        }
    }

    /// Release the pool, blocking until it has drained
    pub fn release(&self) {
        self.pool.release();
    }

    /// Tasks currently executing
    pub fn running(&self) -> usize {
        self.pool.running()
    }

    /// Slots available for new submissions
    pub fn free(&self) -> usize {
        self.pool.free()
    }

    /// Capacity
    pub fn cap(&self) -> usize {
        self.pool.cap()
    }

    /// Submitters parked on a full blocking pool
    pub fn waiting(&self) -> usize {
        self.pool.waiting()
    }

    /// Whether the pool has been closed or released
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Snapshot of the pool's counters
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            name: self.config.name.clone(),
            capacity: self.cap(),
            running: self.running(),
            free: self.free(),
            waiting: self.waiting(),
            non_blocking: self.config.non_blocking,
            expiry_ms: self.config.expiry.as_millis() as u64,
        }
    }
}

impl Drop for ManagedPool {
    fn drop(&mut self) {
        // Admitted tasks still finish; idle workers exit now instead of at expiry.
        self.pool.close();
    }
}

impl std::fmt::Debug for ManagedPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedPool")
            .field("config", &self.config)
            .field("has_panic_handler", &self.panic_handler.is_some())
            .finish()
    }
}
