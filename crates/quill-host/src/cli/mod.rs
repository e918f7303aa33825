//! Command-line runner for the `quill-host` binary.
//!
//! Leading configuration flags (see [`CONFIG_CLI_FLAGS`]) are forwarded to
//! `ortho_config`; everything after them is parsed as [`Cli`]. The runner
//! launches every configured plugin against a [`MemoryEditor`], lists what
//! each one contributed, optionally runs one command, loads any declared
//! packages, and shuts the plugins down.

use std::ffi::{OsStr, OsString};
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

use camino::Utf8Path;
use clap::Parser;
use ortho_config::OrthoConfig;
use quill_config::Config;
use thiserror::Error;
use tracing::{info, warn};

use crate::callbacks::HostContext;
use crate::commands::CommandError;
use crate::editor::{MemoryEditor, SharedEditor};
use crate::host::PluginHost;
use crate::packages::{
    ExtensionTable, GitDownloader, ManifestLoader, PackageDeclaration, PackageError,
    PackageManager,
};
use crate::telemetry::{self, TelemetryError};

const CLI_TARGET: &str = "quill_host::cli";

/// Flags consumed by the configuration loader.
///
/// They must precede every other argument; the first unknown token ends the
/// configuration section.
pub const CONFIG_CLI_FLAGS: &[&str] = &[
    "--config-path",
    "--log-filter",
    "--log-format",
    "--packages-dir",
    "--download-timeout-secs",
];

/// Host-specific arguments.
#[derive(Parser, Debug, Default, PartialEq, Eq)]
#[command(name = "quill-host", about = "Runs Quill plugins against an in-memory editor")]
pub struct Cli {
    /// Plugin executable to launch in addition to the configured ones.
    #[arg(long = "plugin", value_name = "PATH")]
    pub plugins: Vec<String>,
    /// Package URL to download and enable.
    #[arg(long = "package", value_name = "URL")]
    pub packages: Vec<String>,
    /// Command to run once the plugins are loaded.
    #[arg(long, value_name = "COMMAND")]
    pub execute: Option<String>,
    /// Arguments passed to the `--execute` command.
    #[arg(
        value_name = "ARG",
        num_args = 0..,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        requires = "execute"
    )]
    pub arguments: Vec<String>,
}

/// Failures surfaced by [`run`].
#[derive(Debug, Error)]
pub enum AppError {
    /// The arguments did not parse.
    #[error("{0}")]
    Usage(clap::Error),
    /// Configuration layering failed.
    #[error("failed to load configuration: {0}")]
    Configuration(Arc<ortho_config::OrthoError>),
    /// Telemetry could not be installed.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    /// The `--execute` command failed.
    #[error(transparent)]
    Command(Arc<CommandError>),
    /// A declared package failed to load.
    #[error(transparent)]
    Package(#[from] PackageError),
    /// Writing the report failed.
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

/// Arguments divided between the configuration loader and [`Cli`].
///
/// Both halves start with the program name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentSplit {
    /// Arguments for `Config::load_from_iter`.
    pub config_arguments: Vec<OsString>,
    /// Arguments for [`Cli`].
    pub host_arguments: Vec<OsString>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFlag {
    Inline,
    Separate,
}

fn config_flag(argument: &OsStr) -> Option<ConfigFlag> {
    let text = argument.to_str()?;
    let (flag, inline) = text
        .split_once('=')
        .map_or((text, false), |(flag, _)| (flag, true));
    CONFIG_CLI_FLAGS
        .contains(&flag)
        .then_some(if inline { ConfigFlag::Inline } else { ConfigFlag::Separate })
}

/// Separates leading configuration flags from host arguments.
#[must_use]
pub fn split_arguments(args: &[OsString]) -> ArgumentSplit {
    let mut remaining = args.iter().cloned().peekable();
    let program: Vec<OsString> = remaining.next().into_iter().collect();
    let mut config_arguments = program.clone();

    while let Some(argument) = remaining.next_if(|argument| config_flag(argument).is_some()) {
        let kind = config_flag(&argument);
        config_arguments.push(argument);
        if kind == Some(ConfigFlag::Separate) {
            config_arguments.extend(remaining.next());
        }
    }

    let mut host_arguments = program;
    host_arguments.extend(remaining);
    ArgumentSplit {
        config_arguments,
        host_arguments,
    }
}

/// Runs the host, writing its report to `stdout`.
///
/// # Errors
///
/// Returns [`AppError`] for bad arguments, configuration or telemetry
/// failures, a failing `--execute` command, a failing package, or an
/// unwritable `stdout`. Plugins that fail to load are reported but do not
/// stop the run.
pub fn run<W: Write>(
    args: impl IntoIterator<Item = OsString>,
    stdout: &mut W,
) -> Result<(), AppError> {
    let all: Vec<OsString> = args.into_iter().collect();
    let split = split_arguments(&all);
    let cli = match Cli::try_parse_from(&split.host_arguments) {
        Ok(cli) => cli,
        Err(error) if !error.use_stderr() => {
            write!(stdout, "{}", error.render())?;
            return Ok(());
        }
        Err(error) => return Err(AppError::Usage(error)),
    };
    let config = Config::load_from_iter(split.config_arguments).map_err(AppError::Configuration)?;
    let _telemetry = telemetry::initialise(&config)?;

    let editor = Arc::new(Mutex::new(MemoryEditor::new()));
    let host = PluginHost::new(HostContext::new(Arc::clone(&editor) as SharedEditor));
    let outcome = drive(&host, &editor, &config, &cli, stdout);
    host.shutdown();
    outcome
}

fn drive<W: Write>(
    host: &PluginHost,
    editor: &Mutex<MemoryEditor>,
    config: &Config,
    cli: &Cli,
    stdout: &mut W,
) -> Result<(), AppError> {
    for path in config.plugins().iter().chain(&cli.plugins) {
        match host.load(Utf8Path::new(path), &[]) {
            Ok(name) => info!(target: CLI_TARGET, plugin = %name, "plugin loaded"),
            Err(error) => warn!(target: CLI_TARGET, path = %path, %error, "plugin failed to load"),
        }
    }
    write_plugins(host, stdout)?;

    if let Some(command) = &cli.execute {
        host.context()
            .commands
            .execute(command, &cli.arguments)
            .map_err(|error| AppError::Command(Arc::new(error)))?;
        let state = editor.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(status) = state.status() {
            writeln!(stdout, "status: {status}")?;
        }
        for message in state.messages() {
            writeln!(stdout, "message: {message}")?;
        }
    }

    if !cli.packages.is_empty() {
        load_packages(config, &cli.packages, stdout)?;
    }
    Ok(())
}

fn write_plugins<W: Write>(host: &PluginHost, stdout: &mut W) -> io::Result<()> {
    for (name, state) in host.plugins() {
        writeln!(stdout, "{name} [{state}]")?;
        let Some(manifest) = host.manifest(&name) else {
            continue;
        };
        for command in &manifest.commands {
            writeln!(stdout, "  command {}: {}", command.name, command.description)?;
        }
        for mode in &manifest.major_modes {
            writeln!(stdout, "  major mode {}: {}", mode.name, mode.description)?;
        }
        for mode in &manifest.minor_modes {
            writeln!(stdout, "  minor mode {} ({}): {}", mode.name, mode.lighter, mode.description)?;
        }
        for binding in &manifest.key_bindings {
            writeln!(
                stdout,
                "  key {} -> {} ({})",
                binding.sequence, binding.command_name, binding.scope
            )?;
        }
    }
    Ok(())
}

fn load_packages<W: Write>(
    config: &Config,
    urls: &[String],
    stdout: &mut W,
) -> Result<(), AppError> {
    let manager = PackageManager::new(
        Arc::new(GitDownloader::new(config.download_timeout())),
        Arc::new(ManifestLoader),
        Arc::new(ExtensionTable::new()),
        config.packages_dir(),
    );
    for url in urls {
        manager.declare_package(PackageDeclaration::new(url.as_str()));
    }
    let outcome = manager.load_declared_packages();
    for summary in manager.packages() {
        writeln!(stdout, "package {} [{}]", summary.url, summary.status)?;
    }
    outcome?;
    Ok(())
}
