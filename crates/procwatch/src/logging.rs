//! Installing a `tracing` subscriber.
//!
//! procwatch only emits `tracing` events; binaries decide where they go.
//! [`init`] is a ready-made choice: filtered by `PROCWATCH_LOG` (falling
//! back to `RUST_LOG`, then `info`), written to stderr as text, or as JSON
//! with `PROCWATCH_LOG_FORMAT=json`.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

use crate::config::EnvConfig;

/// Default filter when neither variable is set.
pub const DEFAULT_FILTER: &str = "info";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Install the global subscriber from the process environment.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init() -> Result<(), TryInitError> {
    init_from(&EnvConfig::from_process())
}

/// Install the global subscriber from `env`.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_from(env: &EnvConfig) -> Result<(), TryInitError> {
    let format = if env.log_json() {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    init_with(filter_from(env), format)
}

/// Install the global subscriber with an explicit filter and format.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_with(filter: EnvFilter, format: LogFormat) -> Result<(), TryInitError> {
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    }
}

/// The filter `init_from` would use. Unparsable directives fall back to
/// the default.
#[must_use]
pub fn filter_from(env: &EnvConfig) -> EnvFilter {
    let directives = env
        .log_filter()
        .map(str::to_string)
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string());
    EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}
