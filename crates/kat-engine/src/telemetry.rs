//! Tracing subscriber setup for harness binaries and test runners

use crate::config::{LogConfig, LogFormat};
use crate::error::ConfigError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber
///
/// `RUST_LOG` wins over `config.filter` when set. Calling this again after a
/// subscriber is installed is a no-op.
///
/// # Errors
/// `ConfigError::Telemetry` if the filter is malformed
pub fn init(config: &LogConfig) -> Result<(), ConfigError> {
    let filter = filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init(),
    };
    if let Err(e) = installed {
        tracing::debug!(error = %e, "tracing subscriber already installed");
    }
    Ok(())
}

fn filter(config: &LogConfig) -> Result<EnvFilter, ConfigError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.filter)
            .map_err(|e| ConfigError::Telemetry(format!("filter {:?}: {e}", config.filter))),
    }
}
