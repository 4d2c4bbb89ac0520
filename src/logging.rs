use std::sync::Once;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// Ensure initialization happens only once
static INIT: Once = Once::new();

/// Initialize the logging system with sensible defaults.
///
/// Log level can be set using the RUST_LOG environment variable.
/// Example: RUST_LOG=debug,resilient_store=trace
pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let installed = tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true) // workers share one client
                    .with_line_number(true),
            )
            .try_init();

        if installed.is_ok() {
            tracing::info!("Logging initialized");
        }
    });
}

/// Initialize JSON-formatted logging, for log shippers feeding the dashboards.
pub fn init_json() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let installed = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_current_span(false))
            .try_init();

        if installed.is_ok() {
            tracing::info!("JSON logging initialized");
        }
    });
}

/// Macro for logging store operations with timing
#[macro_export]
macro_rules! store_op {
    ($operation:expr, $key:expr, $source:expr, $elapsed_ms:expr) => {
        tracing::debug!(
            operation = $operation,
            key = $key,
            source = $source,
            elapsed_ms = $elapsed_ms,
            "Store operation"
        )
    };
}

/// Macro for logging a remote failure that was absorbed by the fallback cache
#[macro_export]
macro_rules! fallback_event {
    ($operation:expr, $key:expr, $error:expr) => {
        tracing::warn!(
            operation = $operation,
            key = $key,
            error_class = $error.error_class(),
            error = %$error,
            "Redis unavailable, serving from fallback cache"
        )
    };
}
