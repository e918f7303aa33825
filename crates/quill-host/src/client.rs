//! Typed stubs for the plugin interface.

use quill_plugins::methods::plugin;
use quill_plugins::{
    CommandSpec, CompletionParams, ExecuteCommandParams, InitializeParams, InitializeResult,
    KeyBindingSpec, MajorModeSpec, MinorModeSpec, PluginIdentity, PluginManifest,
};
use quill_rpc::{ChannelId, RpcClient, RpcError};
use serde_json::Value;

/// Client for the service a plugin exposes on [`ChannelId::PLUGIN`].
#[derive(Debug, Clone)]
pub struct PluginClient {
    rpc: RpcClient,
}

impl PluginClient {
    /// Wraps a client dialled to the plugin channel.
    #[must_use]
    pub const fn new(rpc: RpcClient) -> Self {
        Self { rpc }
    }

    /// Plugin name.
    ///
    /// # Errors
    ///
    /// Returns the [`RpcError`] raised by the call.
    pub fn name(&self) -> Result<String, RpcError> {
        self.rpc.call(plugin::NAME, &Value::Null)
    }

    /// Plugin version.
    ///
    /// # Errors
    ///
    /// Returns the [`RpcError`] raised by the call.
    pub fn version(&self) -> Result<String, RpcError> {
        self.rpc.call(plugin::VERSION, &Value::Null)
    }

    /// Plugin description.
    ///
    /// # Errors
    ///
    /// Returns the [`RpcError`] raised by the call.
    pub fn description(&self) -> Result<String, RpcError> {
        self.rpc.call(plugin::DESCRIPTION, &Value::Null)
    }

    /// Initialises the plugin, handing it the host callback channel.
    ///
    /// # Errors
    ///
    /// Returns the [`RpcError`] raised by the call, including the plugin's
    /// refusal when it cannot dial `host_broker_id`.
    pub fn initialize(
        &self,
        host_broker_id: ChannelId,
        host_version: &str,
    ) -> Result<InitializeResult, RpcError> {
        self.rpc.call(
            plugin::INITIALIZE,
            &InitializeParams {
                host_broker_id: Some(host_broker_id),
                host_version: host_version.to_owned(),
            },
        )
    }

    /// Asks the plugin to release its resources.
    ///
    /// # Errors
    ///
    /// Returns the [`RpcError`] raised by the call.
    pub fn cleanup(&self) -> Result<(), RpcError> {
        self.rpc.call(plugin::CLEANUP, &Value::Null)
    }

    /// Commands the plugin contributes.
    ///
    /// # Errors
    ///
    /// Returns the [`RpcError`] raised by the call.
    pub fn commands(&self) -> Result<Vec<CommandSpec>, RpcError> {
        self.rpc.call(plugin::GET_COMMANDS, &Value::Null)
    }

    /// Major modes the plugin contributes.
    ///
    /// # Errors
    ///
    /// Returns the [`RpcError`] raised by the call.
    pub fn major_modes(&self) -> Result<Vec<MajorModeSpec>, RpcError> {
        self.rpc.call(plugin::GET_MAJOR_MODES, &Value::Null)
    }

    /// Minor modes the plugin contributes.
    ///
    /// # Errors
    ///
    /// Returns the [`RpcError`] raised by the call.
    pub fn minor_modes(&self) -> Result<Vec<MinorModeSpec>, RpcError> {
        self.rpc.call(plugin::GET_MINOR_MODES, &Value::Null)
    }

    /// Key bindings the plugin contributes.
    ///
    /// # Errors
    ///
    /// Returns the [`RpcError`] raised by the call.
    pub fn key_bindings(&self) -> Result<Vec<KeyBindingSpec>, RpcError> {
        self.rpc.call(plugin::GET_KEY_BINDINGS, &Value::Null)
    }

    /// Collects identity and every manifest getter into one record.
    ///
    /// # Errors
    ///
    /// Returns the first [`RpcError`] raised.
    pub fn manifest(&self) -> Result<PluginManifest, RpcError> {
        let mut manifest = PluginManifest::new(PluginIdentity::new(
            self.name()?,
            self.version()?,
            self.description()?,
        ));
        manifest.commands = self.commands()?;
        manifest.major_modes = self.major_modes()?;
        manifest.minor_modes = self.minor_modes()?;
        manifest.key_bindings = self.key_bindings()?;
        Ok(manifest)
    }

    /// Runs a plugin command.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Remote`] carrying an application fault when the
    /// plugin does not know the command or the command fails.
    pub fn execute_command(&self, name: &str, args: &[String]) -> Result<(), RpcError> {
        self.rpc.call(
            plugin::EXECUTE_COMMAND,
            &ExecuteCommandParams {
                name: name.to_owned(),
                args: args.to_vec(),
            },
        )
    }

    /// Completion candidates for an argument of `command`.
    ///
    /// # Errors
    ///
    /// Returns the [`RpcError`] raised by the call.
    pub fn completions(&self, command: &str, prefix: &str) -> Result<Vec<String>, RpcError> {
        self.rpc.call(
            plugin::GET_COMPLETIONS,
            &CompletionParams {
                command: command.to_owned(),
                prefix: prefix.to_owned(),
            },
        )
    }
}
