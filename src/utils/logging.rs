//! Logging initialization
//!
//! - Respects the RUST_LOG environment variable (takes precedence)
//! - Falls back to the filter from the `logging` config section
//! - Defaults to "info"
//! - Respects NO_COLOR
//!
//! # Usage
//! ```rust,no_run
//! use module_gate::utils::init_logging;
//!
//! init_logging(None); // Uses RUST_LOG or defaults to "info"
//! ```

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Resolve the filter: RUST_LOG, then config, then "info"
fn resolve_filter(filter: Option<&str>) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }
    EnvFilter::new(filter.unwrap_or("info"))
}

/// Initialize human-readable logging to stderr
///
/// # Arguments
/// * `filter` - Optional log filter from config (e.g., "info", "module_gate::module=debug")
pub fn init_logging(filter: Option<&str>) {
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(std::env::var("NO_COLOR").is_err()),
        )
        .with(resolve_filter(filter))
        .init();
}

/// Initialize logging with JSON output (for production/monitoring)
#[cfg(feature = "json-logging")]
pub fn init_json_logging(filter: Option<&str>) {
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_current_span(true)
                .with_span_list(true),
        )
        .with(resolve_filter(filter))
        .init();
}

/// Initialize logging from the `logging` config section
///
/// `json = true` needs the `json-logging` feature; without it the
/// human-readable format is used.
pub fn init_logging_from_config(config: Option<&LoggingConfig>) {
    let filter = config.and_then(|c| c.filter.as_deref());
    let json = config.map(|c| c.json).unwrap_or(false);

    #[cfg(feature = "json-logging")]
    if json {
        init_json_logging(filter);
        return;
    }

    init_logging(filter);
    if json {
        tracing::warn!("JSON logging requested but the json-logging feature is disabled");
    }
}
