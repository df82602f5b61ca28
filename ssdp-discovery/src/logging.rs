//! Opt-in log output
//!
//! The library only emits `tracing` events; nothing is printed until an
//! application installs a subscriber. These helpers install one configured for
//! common setups.

use std::str::FromStr;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// How discovery logs are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// No subscriber is installed
    Silent,
    /// Compact stderr lines at `info`
    Development,
    /// Pretty output at `debug` with thread ids and source locations
    Debug,
    /// One JSON object per event at `info`, for log collectors
    Json,
}

impl LoggingMode {
    fn default_level(self) -> &'static str {
        match self {
            LoggingMode::Debug => "debug",
            _ => "info",
        }
    }
}

impl FromStr for LoggingMode {
    type Err = LoggingError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "silent" | "off" => Ok(LoggingMode::Silent),
            "development" | "dev" => Ok(LoggingMode::Development),
            "debug" => Ok(LoggingMode::Debug),
            "json" => Ok(LoggingMode::Json),
            other => Err(LoggingError::InvalidMode(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to install tracing subscriber: {0}")]
    Install(String),

    #[error("Unknown logging mode: {0}")]
    InvalidMode(String),
}

/// Install a global subscriber for `mode`
///
/// Fails if a subscriber is already installed.
///
/// The level comes from `SSDP_LOG_LEVEL`, then `RUST_LOG`, then the mode's
/// default. Both accept full filter directives such as
/// `ssdp_discovery=trace,reqwest=warn`.
pub fn init_logging(mode: LoggingMode) -> Result<(), LoggingError> {
    let filter = env_filter(mode.default_level());

    let result = match mode {
        LoggingMode::Silent => return Ok(()),
        LoggingMode::Development => Registry::default()
            .with(fmt::layer().with_target(false).compact())
            .with(filter)
            .try_init(),
        LoggingMode::Debug => Registry::default()
            .with(
                fmt::layer()
                    .pretty()
                    .with_thread_names(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .with(filter)
            .try_init(),
        LoggingMode::Json => Registry::default()
            .with(fmt::layer().json().with_current_span(false))
            .with(filter)
            .try_init(),
    };

    result.map_err(|e| LoggingError::Install(e.to_string()))
}

/// Install a subscriber chosen by `SSDP_LOG_MODE`
///
/// Unset means silent. An unrecognized value is an error rather than a
/// silent fallback.
pub fn init_logging_from_env() -> Result<(), LoggingError> {
    let mode = match std::env::var("SSDP_LOG_MODE") {
        Ok(value) => value.parse()?,
        Err(_) => LoggingMode::Silent,
    };
    init_logging(mode)
}

fn env_filter(default_level: &str) -> EnvFilter {
    std::env::var("SSDP_LOG_LEVEL")
        .or_else(|_| std::env::var("RUST_LOG"))
        .map(EnvFilter::new)
        .unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// True once any global subscriber has been set
pub fn is_initialized() -> bool {
    tracing::dispatcher::has_been_set()
}
