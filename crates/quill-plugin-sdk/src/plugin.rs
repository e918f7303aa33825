//! The interface a plugin author implements.

use quill_plugins::{CapabilitySet, CommandSpec, KeyBindingSpec, MajorModeSpec, MinorModeSpec};
use quill_rpc::{RpcError, RpcFault};
use thiserror::Error;

use crate::host::HostClient;

/// Failures a plugin reports back to the host.
///
/// Every variant reaches the host as an application-level JSON-RPC error,
/// never as a transport failure.
#[derive(Debug, Error)]
pub enum PluginFailure {
    /// The plugin does not provide the command.
    #[error("unknown command '{name}'")]
    UnknownCommand {
        /// Command that was requested.
        name: String,
    },

    /// The command rejected its arguments.
    #[error("invalid arguments for '{command}': {message}")]
    InvalidArguments {
        /// Command that was requested.
        command: String,
        /// What was wrong.
        message: String,
    },

    /// A callback into the host failed.
    #[error("host call failed: {0}")]
    Host(#[from] RpcError),

    /// Any other failure.
    #[error("{0}")]
    Other(String),
}

impl From<PluginFailure> for RpcFault {
    fn from(failure: PluginFailure) -> Self {
        Self::application(failure.to_string())
    }
}

/// A Quill plugin.
///
/// Methods take `&self` because the host may run several commands at once;
/// keep mutable state behind a lock. Manifest methods are called once, when
/// the [`crate::PluginServer`] is built.
pub trait Plugin: Send + Sync + 'static {
    /// Plugin name.
    fn name(&self) -> &str;

    /// Plugin version.
    fn version(&self) -> &str;

    /// One-line description.
    fn description(&self) -> &str;

    /// Runs once the host callback channel is connected.
    ///
    /// # Errors
    ///
    /// A failure aborts initialization; the host will not load the plugin.
    fn initialize(&self, _host: &HostClient) -> Result<(), PluginFailure> {
        Ok(())
    }

    /// Runs once before the process exits.
    ///
    /// # Errors
    ///
    /// Failures are reported to the host, which logs them.
    fn cleanup(&self) -> Result<(), PluginFailure> {
        Ok(())
    }

    /// Features reported from `Initialize`, in addition to those implied by
    /// a non-empty manifest.
    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::new()
    }

    /// Contributed commands.
    fn commands(&self) -> Vec<CommandSpec> {
        Vec::new()
    }

    /// Contributed major modes.
    fn major_modes(&self) -> Vec<MajorModeSpec> {
        Vec::new()
    }

    /// Contributed minor modes.
    fn minor_modes(&self) -> Vec<MinorModeSpec> {
        Vec::new()
    }

    /// Contributed key bindings.
    fn key_bindings(&self) -> Vec<KeyBindingSpec> {
        Vec::new()
    }

    /// Runs one of the plugin's commands.
    ///
    /// Only names listed by [`Plugin::commands`] reach this method.
    ///
    /// # Errors
    ///
    /// Returns a [`PluginFailure`] when the command cannot complete.
    fn execute_command(
        &self,
        host: &HostClient,
        name: &str,
        args: &[String],
    ) -> Result<(), PluginFailure>;

    /// Completion candidates for `command` given the typed `prefix`.
    fn completions(&self, _command: &str, _prefix: &str) -> Vec<String> {
        Vec::new()
    }
}
