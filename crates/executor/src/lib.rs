//! # Pool Executor
//!
//! Runs fire-and-forget tasks on named, independently configured worker
//! pools.
//!
//! ## Features
//!
//! - **Isolated pools**: each pool has its own capacity, idle worker expiry
//!   and submission policy; saturating one never affects another
//! - **Backpressure**: non-blocking pools fail fast with
//!   [`ExecutorError::PoolOverload`]; blocking pools park the caller
//! - **Panic containment**: a panicking task never reaches the submitter;
//!   an optional [`PanicHandler`] observes it
//! - **Hot reload**: the whole pool set is rebuilt and swapped atomically,
//!   old pools drain in the background
//! - **Bounded shutdown**: each pool gets at most the shutdown timeout to
//!   drain before the caller moves on
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       PoolManager                            │
//! │  (name → pool map, copy-on-write reload, closed flag)       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ execute(name, task)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       ManagedPool                            │
//! │  (panic containment, error translation, bounded release)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkerPool                             │
//! │  (bounded OS worker threads, idle expiry, submit policy)    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use pool_executor::prelude::*;
//!
//! # async fn run() -> Result<(), ExecutorError> {
//! let manager = PoolManager::new(vec![
//!     PoolConfig::new("http", 100).non_blocking(),
//!     PoolConfig::new("storage", 20),
//! ])?;
//!
//! match manager.execute("http", || println!("handling request")) {
//!     Ok(()) => {}
//!     Err(e) if e.is_overload() => eprintln!("shedding load"),
//!     Err(e) => return Err(e),
//! }
//!
//! manager.reload(vec![PoolConfig::new("http", 200).non_blocking()]).await?;
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod manager;
pub mod panic;
pub mod pool;
pub mod telemetry;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::{ExecutorConfig, PoolConfig};
    pub use crate::error::ExecutorError;
    pub use crate::manager::{ManagerOptions, PoolManager};
    pub use crate::panic::{PanicHandler, SharedPanicHandler, TracingPanicHandler};
    pub use crate::pool::PoolStats;
}

// Re-export key types at crate root
pub use config::{
    ConfigError, ExecutorConfig, PoolConfig, DEFAULT_SHUTDOWN_TIMEOUT, DEFAULT_WORKER_EXPIRY,
    MAX_POOL_SIZE, MIN_POOL_SIZE,
};
pub use error::ExecutorError;
pub use manager::{build_pools, ManagerOptions, PoolManager, PoolMap, ReleaseReport};
pub use panic::{panic_message, PanicHandler, SharedPanicHandler, TracingPanicHandler};
pub use pool::{ManagedPool, PoolStats};
