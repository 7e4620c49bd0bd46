//! Pool configuration
//!
//! [`PoolConfig`] describes one pool; [`ExecutorConfig`] is the ordered pool
//! list plus manager-wide settings, loadable from JSON or the environment.
//!
//! Validation repairs instead of rejecting: sizes are clamped into
//! `[MIN_POOL_SIZE, MAX_POOL_SIZE]` and a non-positive expiry becomes
//! [`DEFAULT_WORKER_EXPIRY`]. Only an empty name fails. Every repair is
//! logged at WARN so a misconfigured deployment stays visible.

use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::error::ExecutorError;

/// Smallest pool capacity
pub const MIN_POOL_SIZE: i64 = 1;

/// Largest pool capacity
pub const MAX_POOL_SIZE: i64 = 10_000;

/// Idle worker lifetime used when a pool has no positive expiry
pub const DEFAULT_WORKER_EXPIRY: Duration = Duration::from_secs(10);

/// Upper bound on how long reload/shutdown wait for one pool to drain
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration of a single named pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Routing key, unique within a manager
    pub name: String,

    /// Capacity; clamped into `[MIN_POOL_SIZE, MAX_POOL_SIZE]` by [`PoolConfig::validate`]
    #[serde(default)]
    pub size: i64,

    /// How long an idle worker waits for work before exiting
    #[serde(default, rename = "expiry_ms", with = "duration_millis")]
    pub expiry: Duration,

    /// Fail submissions at capacity instead of waiting for a slot
    #[serde(default)]
    pub non_blocking: bool,
}

impl PoolConfig {
    /// Create a blocking pool configuration with the default expiry
    pub fn new(name: impl Into<String>, size: i64) -> Self {
        Self {
            name: name.into(),
            size,
            expiry: DEFAULT_WORKER_EXPIRY,
            non_blocking: false,
        }
    }

    /// Set the idle worker expiry
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.expiry = expiry;
        self
    }

    /// Set the submission policy
    pub fn with_non_blocking(mut self, non_blocking: bool) -> Self {
        self.non_blocking = non_blocking;
        self
    }

    /// Fail fast at capacity
    pub fn non_blocking(self) -> Self {
        self.with_non_blocking(true)
    }

    /// Repair the configuration in place.
    ///
    /// Returns an error only when the name is empty.
    pub fn validate(&mut self) -> Result<(), ExecutorError> {
        if self.name.is_empty() {
            return Err(ExecutorError::InvalidConfig(
                "pool name must not be empty".into(),
            ));
        }

        let clamped = self.size.clamp(MIN_POOL_SIZE, MAX_POOL_SIZE);
        if clamped != self.size {
            warn!(
                pool = %self.name,
                requested = self.size,
                applied = clamped,
                "Pool size out of range, clamped"
            );
            self.size = clamped;
        }

        if self.expiry.is_zero() {
            warn!(
                pool = %self.name,
                applied_ms = DEFAULT_WORKER_EXPIRY.as_millis() as u64,
                "Pool expiry not set, using default"
            );
            self.expiry = DEFAULT_WORKER_EXPIRY;
        }

        Ok(())
    }

    /// Validated size as a capacity
    pub fn capacity(&self) -> usize {
        self.size.clamp(MIN_POOL_SIZE, MAX_POOL_SIZE) as usize
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Config document is not valid JSON for this schema
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// An environment variable holds an unusable value
    #[error("invalid value for {var}: {value}")]
    InvalidVar { var: &'static str, value: String },
}

/// Manager-wide configuration: the ordered pool list and release bound
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Pools to create, in order
    pub pools: Vec<PoolConfig>,

    /// Per-pool bound on release waits during reload and shutdown
    #[serde(
        default = "default_shutdown_timeout",
        rename = "shutdown_timeout_ms",
        with = "duration_millis"
    )]
    pub shutdown_timeout: Duration,
}

fn default_shutdown_timeout() -> Duration {
    DEFAULT_SHUTDOWN_TIMEOUT
}

impl Default for ExecutorConfig {
    /// One pool per standard workload category
    fn default() -> Self {
        Self {
            pools: vec![
                PoolConfig::new("http", 1000).non_blocking(),
                PoolConfig::new("storage", 200),
                PoolConfig::new("background", 50)
                    .with_expiry(Duration::from_secs(30))
                    .non_blocking(),
            ],
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl ExecutorConfig {
    /// Parse a JSON document
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `EXECUTOR_CONFIG_FILE`: path to a JSON config document (takes precedence)
    /// - `EXECUTOR_POOLS`: inline JSON array of pool configurations
    /// - `EXECUTOR_SHUTDOWN_TIMEOUT_MS`: per-pool release bound (default: 5000)
    ///
    /// Falls back to [`ExecutorConfig::default`] pools when neither source is set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|var| env::var(var).ok())
    }

    /// Same as [`ExecutorConfig::from_env`] with an injectable variable lookup
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = if let Some(path) = lookup("EXECUTOR_CONFIG_FILE") {
            Self::from_file(path)?
        } else if let Some(pools) = lookup("EXECUTOR_POOLS") {
            Self {
                pools: serde_json::from_str(&pools)?,
                ..Self::default()
            }
        } else {
            Self::default()
        };

        if let Some(raw) = lookup("EXECUTOR_SHUTDOWN_TIMEOUT_MS") {
            let millis: u64 = raw.trim().parse().map_err(|_| ConfigError::InvalidVar {
                var: "EXECUTOR_SHUTDOWN_TIMEOUT_MS",
                value: raw.clone(),
            })?;
            config.shutdown_timeout = Duration::from_millis(millis);
        }

        Ok(config)
    }

    /// Validate every pool, returning the repaired list
    pub fn validated_pools(&self) -> Result<Vec<PoolConfig>, ExecutorError> {
        self.pools
            .iter()
            .cloned()
            .map(|mut pool| pool.validate().map(|_| pool))
            .collect()
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        // Negative values are treated as unset and repaired by validation
        let millis = i64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis.max(0) as u64))
    }
}
