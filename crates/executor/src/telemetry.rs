// Tracing setup
//
// Installs a tracing-subscriber registry with an EnvFilter and a console
// layer. The library never calls this; binaries and tests do.

use tracing_subscriber::{
    layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError, EnvFilter, Layer,
};

// ============================================================================
// Telemetry Configuration
// ============================================================================

/// Configuration for log output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Service name attached to the startup log line
    pub service_name: String,
    /// Log filter (e.g., "info", "pool_executor=debug")
    pub log_filter: Option<String>,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "pool-executor".to_string(),
            log_filter: None,
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `SERVICE_NAME`: Service name (default: "pool-executor")
    /// - `RUST_LOG` or `LOG_LEVEL`: Log filter (default: "info")
    /// - `LOG_FORMAT`: "json" for JSON lines
    pub fn from_env() -> Self {
        Self {
            service_name: std::env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "pool-executor".to_string()),
            log_filter: std::env::var("RUST_LOG")
                .ok()
                .or_else(|| std::env::var("LOG_LEVEL").ok()),
            json: std::env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        }
    }

    /// Filter built from `log_filter`, falling back to "info" when unset or invalid
    pub fn env_filter(&self) -> EnvFilter {
        self.log_filter
            .as_ref()
            .and_then(|f| EnvFilter::try_new(f).ok())
            .unwrap_or_else(|| EnvFilter::new("info"))
    }
}

// ============================================================================
// Initialization
// ============================================================================

/// Install the global subscriber
///
/// Fails if a global subscriber is already set.
///
/// # Example
///
/// ```ignore
/// use pool_executor::telemetry::{init_tracing, TelemetryConfig};
///
/// init_tracing(&TelemetryConfig::from_env())?;
/// ```
pub fn init_tracing(config: &TelemetryConfig) -> Result<(), TryInitError> {
    let (json_layer, console_layer) = if config.json {
        (
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_filter(config.env_filter()),
            ),
            None,
        )
    } else {
        (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_filter(config.env_filter()),
            ),
        )
    };

    tracing_subscriber::registry()
        .with(json_layer)
        .with(console_layer)
        .try_init()?;

    tracing::debug!(service = %config.service_name, "Tracing initialized");
    Ok(())
}
