//! Stderr logging for plugin processes.
//!
//! A plugin's stdout carries the RPC stream, so logs go to stderr, where the
//! host drains them into its own log at debug level. The filter comes from
//! [`PLUGIN_LOG_ENV`] and defaults to `info`.

use std::env;
use std::io;

use once_cell::sync::OnceCell;
use quill_plugins::PLUGIN_LOG_ENV;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();

const DEFAULT_PLUGIN_LOG_FILTER: &str = "info";

/// Errors encountered while configuring plugin telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The filter in the environment could not be parsed.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Failed to install the tracing subscriber.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Installs the stderr subscriber on first use; later calls do nothing.
///
/// # Errors
///
/// Returns [`TelemetryError`] if the filter is invalid or another global
/// subscriber is already installed.
pub fn initialise() -> Result<(), TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(install_subscriber)
        .map(|_| ())
}

fn install_subscriber() -> Result<(), TelemetryError> {
    let directive =
        env::var(PLUGIN_LOG_ENV).unwrap_or_else(|_| String::from(DEFAULT_PLUGIN_LOG_FILTER));
    let filter =
        EnvFilter::try_new(&directive).map_err(|error| TelemetryError::Filter(error.to_string()))?;
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(io::stderr)
        .with_ansi(false)
        .without_time()
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}
