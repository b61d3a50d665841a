//! Structured logging setup.
//!
//! Installs a `tracing-subscriber` registry with an env filter and either a
//! pretty console layer (development) or a JSON layer (containers). JSON lines
//! carry `timestamp`, `level`, `target`, the message and every structured field
//! the bus records (`message_id`, `destination`, `message_type`, ...).

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{TelemetryConfig, TelemetryError};

/// Install the global subscriber.
///
/// Fails with [`TelemetryError::AlreadyInitialized`] if a global subscriber is
/// already set, instead of panicking.
pub fn init_logging(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_new(&config.log_level)
        .map_err(|e| TelemetryError::Config(format!("{}: {}", config.log_level, e)))?;

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = if !config.console_output {
        registry.try_init()
    } else if config.json_logs {
        // JSON output for containers/production
        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true);
        registry.with(json_layer).try_init()
    } else {
        // Pretty output for development
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .with_ansi(true);
        registry.with(fmt_layer).try_init()
    };

    result.map_err(|_| TelemetryError::AlreadyInitialized)?;

    tracing::info!(
        service = %config.service_name,
        log_level = %config.log_level,
        json_logs = config.json_logs,
        "Logging initialized"
    );

    Ok(())
}

/// Log a message-related event with the standard message fields.
#[macro_export]
macro_rules! log_message_event {
    ($level:ident, $msg:expr, $message_id:expr, $message_type:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            message_id = %$message_id,
            message_type = %$message_type,
            $($($field)*,)?
            $msg
        )
    };
}
