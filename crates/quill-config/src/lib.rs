//! Shared configuration for the Quill plugin host.
//!
//! Configuration is layered by `ortho_config`: built-in defaults, then a
//! `.quill.toml` file (or the file named by `--config-path`), then `QUILL_*`
//! environment variables, then command-line flags. The host binary loads it
//! once at start-up and hands the resolved [`Config`] to telemetry, the plugin
//! launcher, and the package manager.

mod defaults;
mod logging;

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_DOWNLOAD_TIMEOUT_SECS, DEFAULT_LOG_FILTER,
    default_download_timeout_secs, default_log_filter, default_log_filter_string,
    default_log_format, default_packages_dir,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Resolved host configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "QUILL")]
#[serde(default)]
pub struct Config {
    /// `tracing` filter expression applied to host telemetry.
    #[ortho_config(default = default_log_filter_string())]
    #[serde(default = "default_log_filter_string")]
    pub log_filter: String,
    /// Output format for host telemetry.
    #[ortho_config(default = default_log_format())]
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
    /// Plugin executables launched when the host starts.
    #[ortho_config(default = Vec::new())]
    #[serde(default)]
    pub plugins: Vec<String>,
    /// Directory receiving downloaded package sources.
    #[ortho_config(default = default_packages_dir())]
    #[serde(default = "default_packages_dir")]
    pub packages_dir: Utf8PathBuf,
    /// Seconds a package download may run before it is killed.
    #[ortho_config(default = DEFAULT_DOWNLOAD_TIMEOUT_SECS)]
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            plugins: Vec::new(),
            packages_dir: default_packages_dir(),
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Filter expression for host telemetry.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Output format for host telemetry.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Plugin executables to launch at start-up.
    #[must_use]
    pub fn plugins(&self) -> &[String] {
        &self.plugins
    }

    /// Directory receiving downloaded package sources.
    #[must_use]
    pub fn packages_dir(&self) -> &Utf8Path {
        &self.packages_dir
    }

    /// Download timeout as a [`Duration`].
    #[must_use]
    pub const fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}
