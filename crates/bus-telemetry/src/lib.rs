//! # Bus Telemetry
//!
//! Logging and metrics for the unicast bus.
//!
//! ## Components
//!
//! - **Logs**: `tracing` events rendered by `tracing-subscriber`, pretty or JSON
//! - **Metrics**: Prometheus counters and histograms, rendered by [`gather_metrics`]
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bus_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(TelemetryConfig::from_env())?;
//! // start the bus here
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `BUS_LOG_LEVEL` / `RUST_LOG` | `info` | Log level filter |
//! | `BUS_JSON_LOGS` | `false` | JSON log lines |
//! | `BUS_CONSOLE_OUTPUT` | `true` | Write logs to stdout |
//! | `BUS_SERVICE_NAME` | `unicast-bus` | Name in the startup log line |

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use metrics::{
    gather_metrics, register_metrics, HistogramTimer, DISPATCH_DURATION, DISPATCH_FAILURES,
    MESSAGES_DISPATCHED, MESSAGES_ESCALATED, MESSAGES_EXPIRED, MESSAGES_SENT, PUBLISH_COPIES,
    SUBSCRIPTION_CHANGES,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("A global tracing subscriber is already installed")]
    AlreadyInitialized,

    #[error("Failed to gather Prometheus metrics: {0}")]
    Metrics(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize logging and register metrics.
///
/// Returns a guard that should be held for the lifetime of the application.
///
/// # Example
///
/// ```rust,ignore
/// let config = TelemetryConfig::from_env();
/// let _guard = init_telemetry(config)?;
/// ```
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    // Metrics first so the startup log can be scraped alongside them
    register_metrics();

    logging::init_logging(&config)?;

    Ok(TelemetryGuard {
        service_name: config.service_name,
    })
}

/// Guard that keeps telemetry active for the application's lifetime.
pub struct TelemetryGuard {
    service_name: String,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!(service = %self.service_name, "Shutting down telemetry...");
    }
}

/// Convenience macro for recording a metric increment.
#[macro_export]
macro_rules! metric_inc {
    ($metric:expr) => {
        $metric.inc()
    };
    ($metric:expr, $labels:expr) => {
        $metric.with_label_values($labels).inc()
    };
}
