//! Executor errors
//!
//! One error type covers every failure a caller of the pool manager can
//! observe. Task panics are never reported here; they go to the panic
//! observer instead.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by the pool manager and the pools it owns
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// A pool configuration could not be repaired (e.g. empty name)
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),

    /// Two pools in one configuration batch share a name
    #[error("duplicate pool name: {0}")]
    DuplicatePool(String),

    /// No pool with this name in the active configuration
    #[error("pool not found: {0}")]
    PoolNotFound(String),

    /// Non-blocking pool is at capacity
    #[error("pool overloaded: {0}")]
    PoolOverload(String),

    /// The manager (or the pool being submitted to) has been shut down
    #[error("pool manager is closed")]
    ManagerClosed,

    /// The pool could not start a worker thread
    #[error("failed to start worker for pool {pool}: {source}")]
    Spawn {
        pool: String,
        #[source]
        source: std::io::Error,
    },

    /// The caller stopped waiting for a pool to drain; the drain continues
    #[error("release of pool {pool} timed out after {timeout:?}")]
    ReleaseTimeout { pool: String, timeout: Duration },

    /// The background drain itself failed
    #[error("release of pool {pool} failed: {reason}")]
    ReleaseFailed { pool: String, reason: String },
}

impl ExecutorError {
    /// Name of the pool this error refers to, if any
    pub fn pool(&self) -> Option<&str> {
        match self {
            Self::DuplicatePool(pool) | Self::PoolNotFound(pool) | Self::PoolOverload(pool) => {
                Some(pool.as_str())
            }
            Self::Spawn { pool, .. }
            | Self::ReleaseTimeout { pool, .. }
            | Self::ReleaseFailed { pool, .. } => Some(pool.as_str()),
            Self::InvalidConfig(_) | Self::ManagerClosed => None,
        }
    }

    /// Backpressure from a non-blocking pool
    pub fn is_overload(&self) -> bool {
        matches!(self, Self::PoolOverload(_))
    }

    /// Routing failure: unknown pool name
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::PoolNotFound(_))
    }

    /// Lifecycle failure: used after shutdown
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::ManagerClosed)
    }

    /// Configuration failure raised by construction or reload
    pub fn is_config(&self) -> bool {
        matches!(self, Self::InvalidConfig(_) | Self::DuplicatePool(_))
    }
}
