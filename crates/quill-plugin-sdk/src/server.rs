//! Plugin-side RPC service.
//!
//! [`PluginServer`] exposes a [`Plugin`] on [`quill_rpc::ChannelId::PLUGIN`]. It owns the
//! plugin's lifecycle: identity and manifest queries are always answered,
//! commands only run between a successful `Initialize` and `Cleanup`, and
//! each of those two transitions happens at most once.

use std::sync::{Arc, PoisonError, RwLock};

use quill_plugins::methods::plugin;
use quill_plugins::{
    Capability, CapabilitySet, CompletionParams, ExecuteCommandParams, InitializeParams,
    InitializeResult, PluginIdentity, PluginManifest,
};
use quill_rpc::{Broker, RpcFault, Service, codes, decode_params, encode_result};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::host::HostClient;
use crate::plugin::{Plugin, PluginFailure};

const SERVER_TARGET: &str = "quill_plugin_sdk::server";

enum Lifecycle {
    Uninitialised,
    Initialising,
    Ready(HostClient),
    CleanedUp,
}

/// Wraps a plugin instance and its manifest.
///
/// The manifest is captured once, here, so every later query returns the
/// same lists no matter what the plugin's methods would return now.
pub struct PluginServer<P> {
    plugin: P,
    manifest: PluginManifest,
    capabilities: CapabilitySet,
    lifecycle: RwLock<Lifecycle>,
}

impl<P: Plugin> PluginServer<P> {
    /// Builds a server, querying the plugin's manifest methods once.
    #[must_use]
    pub fn new(plugin: P) -> Self {
        let manifest = PluginManifest {
            identity: PluginIdentity::new(plugin.name(), plugin.version(), plugin.description()),
            commands: plugin.commands(),
            major_modes: plugin.major_modes(),
            minor_modes: plugin.minor_modes(),
            key_bindings: plugin.key_bindings(),
        };
        let mut capabilities = plugin.capabilities();
        for (present, capability) in [
            (!manifest.commands.is_empty(), Capability::Commands),
            (!manifest.major_modes.is_empty(), Capability::MajorModes),
            (!manifest.minor_modes.is_empty(), Capability::MinorModes),
            (!manifest.key_bindings.is_empty(), Capability::KeyBindings),
        ] {
            if present {
                capabilities.insert(capability);
            }
        }
        Self {
            plugin,
            manifest,
            capabilities,
            lifecycle: RwLock::new(Lifecycle::Uninitialised),
        }
    }

    /// The manifest captured at construction.
    #[must_use]
    pub const fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    /// Capabilities reported from `Initialize`.
    #[must_use]
    pub const fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    /// The wrapped plugin.
    #[must_use]
    pub const fn plugin(&self) -> &P {
        &self.plugin
    }

    /// Returns `true` between a successful `Initialize` and `Cleanup`.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(*self.read_lifecycle(), Lifecycle::Ready(_))
    }

    /// Binds the server to a connection's broker, ready to register on
    /// [`quill_rpc::ChannelId::PLUGIN`].
    #[must_use]
    pub fn bind(self, broker: Broker) -> Arc<dyn Service> {
        Arc::new(BoundServer {
            server: self,
            broker,
        })
    }

    fn read_lifecycle(&self) -> std::sync::RwLockReadGuard<'_, Lifecycle> {
        self.lifecycle.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_lifecycle(&self) -> std::sync::RwLockWriteGuard<'_, Lifecycle> {
        self.lifecycle.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn initialize(
        &self,
        broker: &Broker,
        params: InitializeParams,
    ) -> Result<InitializeResult, RpcFault> {
        {
            let mut lifecycle = self.write_lifecycle();
            match *lifecycle {
                Lifecycle::Uninitialised => *lifecycle = Lifecycle::Initialising,
                Lifecycle::Initialising | Lifecycle::Ready(_) => {
                    return Err(RpcFault::application("plugin is already initialised"));
                }
                Lifecycle::CleanedUp => {
                    return Err(RpcFault::application("plugin has been cleaned up"));
                }
            }
        }

        match self.connect(broker, params) {
            Ok(host) => {
                info!(
                    target: SERVER_TARGET,
                    plugin = self.manifest.name(),
                    host_channel = %host.channel(),
                    "plugin initialised"
                );
                *self.write_lifecycle() = Lifecycle::Ready(host);
                Ok(InitializeResult {
                    capabilities: self.capabilities.clone(),
                })
            }
            Err(fault) => {
                warn!(
                    target: SERVER_TARGET,
                    plugin = self.manifest.name(),
                    error = %fault,
                    "initialisation failed"
                );
                *self.write_lifecycle() = Lifecycle::Uninitialised;
                Err(fault)
            }
        }
    }

    fn connect(&self, broker: &Broker, params: InitializeParams) -> Result<HostClient, RpcFault> {
        let Some(channel) = params.host_broker_id else {
            return Err(RpcFault::application(
                "initialize requires a host_broker_id",
            ));
        };
        let rpc = broker.dial(channel).map_err(|error| {
            RpcFault::application(format!("failed to connect to host callbacks: {error}"))
        })?;
        let host = HostClient::new(rpc);
        self.plugin.initialize(&host)?;
        Ok(host)
    }

    fn cleanup(&self) -> Result<(), RpcFault> {
        {
            let mut lifecycle = self.write_lifecycle();
            match *lifecycle {
                Lifecycle::Uninitialised | Lifecycle::Ready(_) => {
                    *lifecycle = Lifecycle::CleanedUp;
                }
                Lifecycle::Initialising => {
                    return Err(RpcFault::application("plugin is still initialising"));
                }
                Lifecycle::CleanedUp => {
                    return Err(RpcFault::application("plugin has already been cleaned up"));
                }
            }
        }
        info!(
            target: SERVER_TARGET,
            plugin = self.manifest.name(),
            "plugin cleaning up"
        );
        self.plugin.cleanup().map_err(RpcFault::from)
    }

    fn execute(&self, params: &ExecuteCommandParams) -> Result<(), RpcFault> {
        let host = match &*self.read_lifecycle() {
            Lifecycle::Ready(host) => host.clone(),
            Lifecycle::Uninitialised | Lifecycle::Initialising => {
                return Err(RpcFault::new(
                    codes::NOT_INITIALISED,
                    "plugin has not been initialised",
                ));
            }
            Lifecycle::CleanedUp => {
                return Err(RpcFault::new(
                    codes::NOT_INITIALISED,
                    "plugin has been cleaned up",
                ));
            }
        };
        if !self
            .manifest
            .command_names()
            .any(|name| name == params.name)
        {
            return Err(PluginFailure::UnknownCommand {
                name: params.name.clone(),
            }
            .into());
        }
        debug!(
            target: SERVER_TARGET,
            plugin = self.manifest.name(),
            command = %params.name,
            args = params.args.len(),
            "executing command"
        );
        self.plugin
            .execute_command(&host, &params.name, &params.args)
            .map_err(RpcFault::from)
    }
}

struct BoundServer<P> {
    server: PluginServer<P>,
    broker: Broker,
}

impl<P: Plugin> Service for BoundServer<P> {
    fn call(&self, method: &str, params: Value) -> Result<Value, RpcFault> {
        let server = &self.server;
        let manifest = &server.manifest;
        match method {
            plugin::NAME => encode_result(&manifest.identity.name),
            plugin::VERSION => encode_result(&manifest.identity.version),
            plugin::DESCRIPTION => encode_result(&manifest.identity.description),
            plugin::INITIALIZE => {
                let request: InitializeParams = decode_params(method, params)?;
                encode_result(&server.initialize(&self.broker, request)?)
            }
            plugin::CLEANUP => server.cleanup().map(|()| Value::Null),
            plugin::GET_COMMANDS => encode_result(&manifest.commands),
            plugin::GET_MAJOR_MODES => encode_result(&manifest.major_modes),
            plugin::GET_MINOR_MODES => encode_result(&manifest.minor_modes),
            plugin::GET_KEY_BINDINGS => encode_result(&manifest.key_bindings),
            plugin::EXECUTE_COMMAND => {
                let request: ExecuteCommandParams = decode_params(method, params)?;
                server.execute(&request).map(|()| Value::Null)
            }
            plugin::GET_COMPLETIONS => {
                let request: CompletionParams = decode_params(method, params)?;
                encode_result(
                    &server
                        .plugin
                        .completions(&request.command, &request.prefix),
                )
            }
            other => Err(RpcFault::method_not_found(other)),
        }
    }
}
