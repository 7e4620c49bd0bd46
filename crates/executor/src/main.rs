// Pool executor operator binary
//
// Design Decision: `check` validates a config without starting any pool.
// Design Decision: `serve` hosts the pools, reloads on SIGHUP and drains on Ctrl-C.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pool_executor::prelude::*;
use pool_executor::telemetry::{init_tracing, TelemetryConfig};

#[derive(Parser)]
#[command(name = "pool-executor")]
#[command(about = "Named worker pools with hot reload")]
#[command(version)]
struct Cli {
    /// JSON config file; falls back to EXECUTOR_POOLS and the built-in pools
    #[arg(long, short, env = "EXECUTOR_CONFIG_FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration and print the repaired pool list
    Check,

    /// Run the pools until Ctrl-C
    Serve {
        /// Seconds between pool statistics log lines (0 disables)
        #[arg(long, default_value_t = 30)]
        stats_interval_secs: u64,
    },
}

fn load_config(path: Option<&Path>) -> Result<ExecutorConfig> {
    match path {
        Some(path) => ExecutorConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => ExecutorConfig::from_env().context("Failed to load config from environment"),
    }
}

fn check(config: &ExecutorConfig) -> Result<()> {
    let pools = config
        .validated_pools()
        .context("Invalid pool configuration")?;

    let mut seen = std::collections::HashSet::new();
    for pool in &pools {
        if !seen.insert(pool.name.as_str()) {
            anyhow::bail!("Duplicate pool name: {}", pool.name);
        }
    }

    let normalized = ExecutorConfig {
        pools,
        shutdown_timeout: config.shutdown_timeout,
    };
    println!("{}", serde_json::to_string_pretty(&normalized)?);
    Ok(())
}

async fn serve(
    config: ExecutorConfig,
    config_path: Option<PathBuf>,
    stats_interval: Duration,
) -> Result<()> {
    let handler: SharedPanicHandler = Arc::new(TracingPanicHandler);
    let manager = PoolManager::from_config(&config, Some(handler))
        .context("Failed to create pool manager")?;

    tracing::info!(
        pools = ?manager.pool_names(),
        shutdown_timeout_ms = config.shutdown_timeout.as_millis() as u64,
        "Pool executor running"
    );

    let mut stats_ticker = (!stats_interval.is_zero()).then(|| {
        let mut ticker = tokio::time::interval(stats_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker
    });

    let mut reload_signal = ReloadSignal::new()?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal");
                break;
            }
            _ = reload_signal.recv() => {
                reload(&manager, config_path.as_deref()).await;
            }
            _ = tick(&mut stats_ticker) => {
                for stats in manager.stats() {
                    tracing::info!(
                        pool = %stats.name,
                        capacity = stats.capacity,
                        running = stats.running,
                        free = stats.free,
                        waiting = stats.waiting,
                        "Pool stats"
                    );
                }
            }
        }
    }

    manager.shutdown().await;
    tracing::info!("Pool executor stopped");
    Ok(())
}

async fn reload(manager: &PoolManager, config_path: Option<&Path>) {
    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "Reload skipped, keeping current pools");
            return;
        }
    };

    match manager.reload(config.pools).await {
        Ok(()) => tracing::info!(pools = ?manager.pool_names(), "Reload complete"),
        Err(e) => tracing::error!(error = %e, "Reload rejected, keeping current pools"),
    }
}

async fn tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// SIGHUP on unix; never fires elsewhere
struct ReloadSignal {
    #[cfg(unix)]
    inner: tokio::signal::unix::Signal,
}

impl ReloadSignal {
    #[cfg(unix)]
    fn new() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        let inner = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
        Ok(Self { inner })
    }

    #[cfg(not(unix))]
    fn new() -> Result<Self> {
        Ok(Self {})
    }

    #[cfg(unix)]
    async fn recv(&mut self) {
        if self.inner.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) {
        std::future::pending::<()>().await
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    init_tracing(&TelemetryConfig::from_env()).context("Failed to initialize tracing")?;

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Check => check(&config),
        Commands::Serve {
            stats_interval_secs,
        } => serve(config, cli.config, Duration::from_secs(stats_interval_secs)).await,
    }
}
