//! Structured logging initialization.
//!
//! The library itself only emits `tracing` events. Applications embedding the
//! cache can call [`init`] to install a subscriber configured from
//! [`LoggingConfig`]. The RUST_LOG environment variable takes precedence over
//! the configured level.

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{TierError, TierResult};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Install a global tracing subscriber.
///
/// Returns an error if a global subscriber is already installed.
///
/// # Example
///
/// ```ignore
/// use cache_tiering::{LoggingConfig, logging};
///
/// logging::init(&LoggingConfig::default())?;
/// tracing::info!("cache starting");
/// ```
pub fn init(config: &LoggingConfig) -> TierResult<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(config.level.as_str())
            .map_err(|e| TierError::InvalidConfig(format!("invalid log level: {e}")))?
    };

    let registry = tracing_subscriber::registry().with(filter);

    let result = match (config.format, config.timestamps) {
        (LogFormat::Pretty, true) => registry
            .with(fmt::layer().pretty().with_target(config.target))
            .try_init(),
        (LogFormat::Pretty, false) => registry
            .with(fmt::layer().pretty().with_target(config.target).without_time())
            .try_init(),
        (LogFormat::Compact, true) => registry
            .with(fmt::layer().compact().with_target(config.target))
            .try_init(),
        (LogFormat::Compact, false) => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_target(config.target)
                    .without_time(),
            )
            .try_init(),
        (LogFormat::Json, true) => registry
            .with(fmt::layer().json().with_target(config.target))
            .try_init(),
        (LogFormat::Json, false) => registry
            .with(fmt::layer().json().with_target(config.target).without_time())
            .try_init(),
    };

    result.map_err(|e| TierError::InvalidConfig(format!("logging already initialized: {e}")))
}
