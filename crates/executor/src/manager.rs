//! Pool manager
//!
//! Routes tasks to named pools and owns their lifecycle.
//!
//! # State
//!
//! ```text
//!   Open ──shutdown()──► Closed (terminal)
//! ```
//!
//! The name→pool map is never mutated in place. [`PoolManager::reload`]
//! builds a complete replacement outside any lock, swaps the map pointer
//! under the write lock, then drains the old pools in parallel. Readers see
//! either the old map or the new one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::config::{ExecutorConfig, PoolConfig, DEFAULT_SHUTDOWN_TIMEOUT};
use crate::error::ExecutorError;
use crate::panic::SharedPanicHandler;
use crate::pool::{ManagedPool, PoolStats};

/// Active pools keyed by name
pub type PoolMap = HashMap<String, Arc<ManagedPool>>;

/// Manager options
#[derive(Clone)]
pub struct ManagerOptions {
    /// Per-pool bound on release waits during reload and shutdown
    pub shutdown_timeout: Duration,

    /// Observer for task panics; stderr fallback when unset
    pub panic_handler: Option<SharedPanicHandler>,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            panic_handler: None,
        }
    }
}

impl ManagerOptions {
    /// Create default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-pool release bound
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the panic observer
    pub fn with_panic_handler(mut self, handler: SharedPanicHandler) -> Self {
        self.panic_handler = Some(handler);
        self
    }
}

impl std::fmt::Debug for ManagerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerOptions")
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("panic_handler", &self.panic_handler.is_some())
            .finish()
    }
}

/// Outcome of draining a set of pools
#[derive(Debug, Default)]
pub struct ReleaseReport {
    /// Pools that drained within the bound
    pub released: Vec<String>,
    /// Pools whose drain timed out or failed
    pub failed: Vec<ExecutorError>,
}

impl ReleaseReport {
    /// Whether every pool drained in time
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Routes tasks to named, independently sized pools
///
/// # Example
///
/// ```ignore
/// use pool_executor::prelude::*;
///
/// let manager = PoolManager::new(vec![
///     PoolConfig::new("http", 100).non_blocking(),
///     PoolConfig::new("storage", 20),
/// ])?;
///
/// match manager.execute("http", || handle_request()) {
///     Ok(()) => {}
///     Err(e) if e.is_overload() => reject_with_503(),
///     Err(e) => return Err(e.into()),
/// }
///
/// manager.reload(new_configs).await?;
/// manager.shutdown().await;
/// ```
pub struct PoolManager {
    pools: RwLock<Arc<PoolMap>>,
    closed: AtomicBool,
    options: ManagerOptions,
}

impl PoolManager {
    /// Create a manager with default options
    pub fn new(configs: Vec<PoolConfig>) -> Result<Self, ExecutorError> {
        Self::with_options(configs, ManagerOptions::default())
    }

    /// Create a manager; fails without side effects if any config is invalid
    /// or two configs share a name
    pub fn with_options(
        configs: Vec<PoolConfig>,
        options: ManagerOptions,
    ) -> Result<Self, ExecutorError> {
        let pools = build_pools(configs, options.panic_handler.as_ref())?;

        info!(pools = pools.len(), "Pool manager started");

        Ok(Self {
            pools: RwLock::new(Arc::new(pools)),
            closed: AtomicBool::new(false),
            options,
        })
    }

    /// Create a manager from a loaded [`ExecutorConfig`]
    pub fn from_config(
        config: &ExecutorConfig,
        panic_handler: Option<SharedPanicHandler>,
    ) -> Result<Self, ExecutorError> {
        Self::with_options(
            config.pools.clone(),
            ManagerOptions {
                shutdown_timeout: config.shutdown_timeout,
                panic_handler,
            },
        )
    }

    /// Run `task` on the pool named `pool`.
    ///
    /// Blocks while a blocking pool is at capacity. Panics inside `task`
    /// are contained and never surface here.
    pub fn execute<F>(&self, pool: &str, task: F) -> Result<(), ExecutorError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_closed() {
            return Err(ExecutorError::ManagerClosed);
        }

        let target = self.lookup(pool)?;
        match target.submit_task(target.wrap(task)) {
            Ok(()) => Ok(()),
            Err(rejected) if rejected.error.is_closed() && !self.is_closed() => {
                // A reload superseded the pool between lookup and submit.
                // Route once against the current map.
                let current = self.lookup(pool)?;
                if Arc::ptr_eq(&current, &target) {
                    return Err(rejected.error);
                }
                debug!(pool = %pool, "Pool superseded during submit, re-routing");
                current
                    .submit_task(rejected.task)
                    .map_err(|rejected| rejected.error)
            }
            Err(rejected) => Err(rejected.error),
        }
    }

    fn lookup(&self, pool: &str) -> Result<Arc<ManagedPool>, ExecutorError> {
        let pools = self.pools.read();
        pools
            .get(pool)
            .cloned()
            .ok_or_else(|| ExecutorError::PoolNotFound(pool.to_string()))
    }

    /// Replace the whole pool set.
    ///
    /// All-or-nothing: on any configuration error the current pools keep
    /// serving unchanged. On success every later `execute` sees only the
    /// new pools; the old ones drain in parallel, each bounded by the
    /// shutdown timeout.
    #[instrument(skip(self, configs), fields(pools = configs.len()))]
    pub async fn reload(&self, configs: Vec<PoolConfig>) -> Result<(), ExecutorError> {
        if self.is_closed() {
            return Err(ExecutorError::ManagerClosed);
        }

        let new_pools = build_pools(configs, self.options.panic_handler.as_ref())?;
        let names = sorted_names(&new_pools);
        let old_pools = self.swap_pools(new_pools)?;

        info!(pools = ?names, "Pool configuration reloaded");

        let report = self.release_all(old_pools).await;
        if !report.is_clean() {
            warn!(
                failed = report.failed.len(),
                "Some superseded pools did not drain in time"
            );
        }

        Ok(())
    }

    /// Install `new_pools` and return the map they replace.
    ///
    /// If shutdown has already happened the new pools are released instead.
    fn swap_pools(&self, new_pools: PoolMap) -> Result<Arc<PoolMap>, ExecutorError> {
        let mut pools = self.pools.write();
        // Shutdown may have won the race while the new pools were built.
        if self.is_closed() {
            drop(pools);
            release_now(new_pools);
            return Err(ExecutorError::ManagerClosed);
        }
        Ok(std::mem::replace(&mut *pools, Arc::new(new_pools)))
    }

    /// Close the manager and drain every pool.
    ///
    /// Every later call returns [`ExecutorError::ManagerClosed`]. Release
    /// timeouts are logged, not returned; drains that outlive the bound
    /// keep running in the background.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);

        let old_pools = {
            let mut pools = self.pools.write();
            std::mem::replace(&mut *pools, Arc::new(PoolMap::new()))
        };

        if old_pools.is_empty() {
            return;
        }

        info!(pools = old_pools.len(), "Shutting down pool manager");

        let report = self.release_all(old_pools).await;
        for err in &report.failed {
            warn!(error = %err, "Pool did not drain during shutdown");
        }

        info!(
            released = report.released.len(),
            timed_out = report.failed.len(),
            "Pool manager shut down"
        );
    }

    async fn release_all(&self, pools: Arc<PoolMap>) -> ReleaseReport {
        let timeout = self.options.shutdown_timeout;
        let results = join_all(pools.values().map(|pool| async move {
            pool.release_timeout(timeout)
                .await
                .map(|_| pool.name().to_string())
        }))
        .await;

        let mut report = ReleaseReport::default();
        for result in results {
            match result {
                Ok(name) => report.released.push(name),
                Err(err) => report.failed.push(err),
            }
        }
        report
    }

    /// Whether [`PoolManager::shutdown`] has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Whether the active configuration has a pool named `pool`
    pub fn contains(&self, pool: &str) -> bool {
        self.pools.read().contains_key(pool)
    }

    /// Names of the active pools, sorted
    pub fn pool_names(&self) -> Vec<String> {
        sorted_names(&self.pools.read())
    }

    /// Counters of every active pool, sorted by name
    pub fn stats(&self) -> Vec<PoolStats> {
        let pools = self.pools.read().clone();
        let mut stats: Vec<_> = pools.values().map(|pool| pool.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Shutdown timeout applied to each pool release
    pub fn shutdown_timeout(&self) -> Duration {
        self.options.shutdown_timeout
    }
}

impl std::fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolManager")
            .field("pools", &self.pool_names())
            .field("closed", &self.is_closed())
            .field("options", &self.options)
            .finish()
    }
}

/// Validate and build a complete pool set.
///
/// Rejects the batch on the first invalid config or duplicate name and
/// releases every pool already built for it.
pub fn build_pools(
    configs: Vec<PoolConfig>,
    panic_handler: Option<&SharedPanicHandler>,
) -> Result<PoolMap, ExecutorError> {
    let mut pools = PoolMap::with_capacity(configs.len());

    for config in configs {
        if pools.contains_key(&config.name) {
            let name = config.name;
            release_now(pools);
            return Err(ExecutorError::DuplicatePool(name));
        }

        match ManagedPool::new(config, panic_handler.cloned()) {
            Ok(pool) => {
                pools.insert(pool.name().to_string(), Arc::new(pool));
            }
            Err(err) => {
                release_now(pools);
                return Err(err);
            }
        }
    }

    Ok(pools)
}

/// Release pools that never accepted a task; returns immediately.
fn release_now(pools: PoolMap) {
    for pool in pools.values() {
        pool.release();
    }
}

fn sorted_names(pools: &PoolMap) -> Vec<String> {
    let mut names: Vec<_> = pools.keys().cloned().collect();
    names.sort();
    names
}
