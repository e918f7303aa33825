//! Plugin lifecycle orchestration.
//!
//! [`PluginHost`] turns a connected plugin into registered commands, modes,
//! and key bindings. Activation initialises the plugin with its callback
//! channel, reads the manifest once, validates it, and registers every entry
//! or none. A plugin that fails any step is shut down and recorded as
//! [`PluginState::Failed`]; the host itself keeps running.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use camino::Utf8Path;
use quill_plugins::{ManifestError, PluginManifest};
use quill_rpc::{RpcError, Service};
use strum::Display;
use thiserror::Error;
use tracing::{info, warn};

use crate::callbacks::{HostCallbackService, HostContext};
use crate::client::PluginClient;
use crate::commands::{CommandError, CommandHandler};
use crate::launcher::{LaunchError, LaunchedPlugin, PluginLauncher};
use crate::modes::ModeConflict;

const HOST_TARGET: &str = "quill_host::host";

/// Version reported to plugins in `Initialize`.
pub const HOST_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Where a plugin is in its life.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum PluginState {
    /// Initialised and registered.
    Ready,
    /// Activation failed; the plugin was shut down.
    Failed {
        /// Why activation failed.
        reason: String,
    },
    /// Cleaned up and shut down.
    Stopped,
}

/// Failures loading or addressing plugins.
#[derive(Debug, Error)]
pub enum HostError {
    /// The plugin could not be started or connected.
    #[error(transparent)]
    Launch(#[from] LaunchError),

    /// The plugin rejected `Initialize`.
    #[error("plugin '{plugin}' failed to initialise: {source}")]
    Initialize {
        /// Plugin label.
        plugin: String,
        /// Underlying error.
        #[source]
        source: Arc<RpcError>,
    },

    /// A manifest getter failed.
    #[error("failed to read the manifest of plugin '{plugin}': {source}")]
    Query {
        /// Plugin label.
        plugin: String,
        /// Underlying error.
        #[source]
        source: Arc<RpcError>,
    },

    /// The manifest is malformed.
    #[error("plugin '{plugin}' has an invalid manifest: {source}")]
    Manifest {
        /// Plugin name.
        plugin: String,
        /// Validation failure.
        #[source]
        source: ManifestError,
    },

    /// A plugin with the same name is already loaded.
    #[error("a plugin named '{name}' is already loaded")]
    Duplicate {
        /// Plugin name.
        name: String,
    },

    /// A command could not be registered.
    #[error("plugin '{plugin}' could not register its commands: {source}")]
    Command {
        /// Plugin name.
        plugin: String,
        /// Registry failure.
        #[source]
        source: Arc<CommandError>,
    },

    /// A mode or key binding is taken by another owner.
    #[error("plugin '{plugin}' conflicts with a registered entry: {source}")]
    ModeConflict {
        /// Plugin name.
        plugin: String,
        /// The collision.
        #[source]
        source: ModeConflict,
    },

    /// No plugin has the name.
    #[error("plugin '{name}' not found")]
    NotFound {
        /// Plugin name.
        name: String,
    },

    /// The plugin exists but is not ready.
    #[error("plugin '{name}' is {state}")]
    NotReady {
        /// Plugin name.
        name: String,
        /// Current state.
        state: PluginState,
    },
}

struct PluginEntry {
    state: PluginState,
    manifest: Option<PluginManifest>,
    launched: Option<LaunchedPlugin>,
}

/// Loads plugins and wires them into the host registries.
pub struct PluginHost {
    context: HostContext,
    launcher: PluginLauncher,
    plugins: Mutex<BTreeMap<String, PluginEntry>>,
}

impl PluginHost {
    /// Creates a host driving `context` with the default launcher.
    #[must_use]
    pub fn new(context: HostContext) -> Self {
        Self::with_launcher(context, PluginLauncher::new())
    }

    /// Creates a host with a custom launcher.
    #[must_use]
    pub const fn with_launcher(context: HostContext, launcher: PluginLauncher) -> Self {
        Self {
            context,
            launcher,
            plugins: Mutex::new(BTreeMap::new()),
        }
    }

    /// Registries and editor shared with every plugin.
    #[must_use]
    pub const fn context(&self) -> &HostContext {
        &self.context
    }

    /// Builds the callback service for a plugin about to be connected.
    #[must_use]
    pub fn callback_service(&self, label: &str) -> Arc<dyn Service> {
        Arc::new(HostCallbackService::new(self.context.clone(), label))
    }

    /// Launches the plugin executable at `path` and activates it.
    ///
    /// Returns the plugin's name.
    ///
    /// # Errors
    ///
    /// Returns a [`HostError`] if the plugin cannot be launched or activated.
    pub fn load(&self, path: &Utf8Path, args: &[String]) -> Result<String, HostError> {
        let label = path.file_stem().unwrap_or(path.as_str());
        let launched = self
            .launcher
            .launch(path, args, self.callback_service(label))
            .inspect_err(|error| {
                warn!(target: HOST_TARGET, plugin = label, %error, "plugin failed to start");
            })?;
        self.attach(launched)
    }

    /// Activates an already connected plugin.
    ///
    /// On failure the plugin is shut down and recorded as failed under its
    /// label.
    ///
    /// # Errors
    ///
    /// Returns the [`HostError`] that stopped activation.
    pub fn attach(&self, mut launched: LaunchedPlugin) -> Result<String, HostError> {
        match self.activate(&launched) {
            Ok(manifest) => {
                let name = manifest.name().to_owned();
                info!(
                    target: HOST_TARGET,
                    plugin = %name,
                    version = %manifest.identity.version,
                    commands = manifest.commands.len(),
                    "plugin ready"
                );
                self.entries().insert(
                    name.clone(),
                    PluginEntry {
                        state: PluginState::Ready,
                        manifest: Some(manifest),
                        launched: Some(launched),
                    },
                );
                Ok(name)
            }
            Err(error) => {
                warn!(
                    target: HOST_TARGET,
                    plugin = launched.label(),
                    %error,
                    "plugin failed to activate"
                );
                launched.shutdown();
                let label = launched.label().to_owned();
                let mut entries = self.entries();
                if !entries
                    .get(&label)
                    .is_some_and(|entry| entry.state == PluginState::Ready)
                {
                    entries.insert(
                        label,
                        PluginEntry {
                            state: PluginState::Failed {
                                reason: error.to_string(),
                            },
                            manifest: None,
                            launched: None,
                        },
                    );
                }
                Err(error)
            }
        }
    }

    fn activate(&self, launched: &LaunchedPlugin) -> Result<PluginManifest, HostError> {
        let label = launched.label();
        let client = launched.client();
        client
            .initialize(launched.callback_channel(), HOST_VERSION)
            .map_err(|source| HostError::Initialize {
                plugin: label.to_owned(),
                source: Arc::new(source),
            })?;

        let registered = client
            .manifest()
            .map_err(|source| HostError::Query {
                plugin: label.to_owned(),
                source: Arc::new(source),
            })
            .and_then(|manifest| self.register(client, manifest));
        if registered.is_err()
            && let Err(error) = client.cleanup()
        {
            warn!(target: HOST_TARGET, plugin = label, %error, "cleanup failed");
        }
        registered
    }

    fn register(
        &self,
        client: &PluginClient,
        manifest: PluginManifest,
    ) -> Result<PluginManifest, HostError> {
        let name = manifest.name().to_owned();
        manifest.validate().map_err(|source| HostError::Manifest {
            plugin: name.clone(),
            source,
        })?;
        if self
            .entries()
            .get(&name)
            .is_some_and(|entry| entry.state == PluginState::Ready)
        {
            return Err(HostError::Duplicate { name });
        }
        let commands = &self.context.commands;
        if let Some(conflict) = manifest.command_names().find_map(|command| {
            commands
                .get(command)
                .map(|info| CommandError::AlreadyRegistered {
                    name: command.to_owned(),
                    owner: info.owner,
                })
        }) {
            return Err(HostError::Command {
                plugin: name,
                source: Arc::new(conflict),
            });
        }
        self.context
            .modes
            .register(&name, &manifest)
            .map_err(|source| HostError::ModeConflict {
                plugin: name.clone(),
                source,
            })?;

        for spec in &manifest.commands {
            let handler = plugin_handler(client.clone(), spec.name.clone());
            if let Err(error) = commands.register(&name, spec.clone(), handler) {
                self.unregister(&manifest);
                return Err(HostError::Command {
                    plugin: name,
                    source: Arc::new(error),
                });
            }
        }
        Ok(manifest)
    }

    fn unregister(&self, manifest: &PluginManifest) {
        let owner = manifest.name();
        self.context.commands.unregister_owner(owner);
        self.context.modes.unregister_owner(owner);
        for command in manifest.command_names() {
            self.context.hooks.remove_command(command);
        }
    }

    /// Client for a ready plugin.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::NotFound`] or [`HostError::NotReady`].
    pub fn client(&self, name: &str) -> Result<PluginClient, HostError> {
        let entries = self.entries();
        let entry = entries.get(name).ok_or_else(|| HostError::NotFound {
            name: name.to_owned(),
        })?;
        match (&entry.state, &entry.launched) {
            (PluginState::Ready, Some(launched)) => Ok(launched.client().clone()),
            (state, _) => Err(HostError::NotReady {
                name: name.to_owned(),
                state: state.clone(),
            }),
        }
    }

    /// Manifest captured when the plugin was activated.
    #[must_use]
    pub fn manifest(&self, name: &str) -> Option<PluginManifest> {
        self.entries().get(name)?.manifest.clone()
    }

    /// State of the named plugin.
    #[must_use]
    pub fn state(&self, name: &str) -> Option<PluginState> {
        self.entries().get(name).map(|entry| entry.state.clone())
    }

    /// Every known plugin and its state, sorted by name.
    #[must_use]
    pub fn plugins(&self) -> Vec<(String, PluginState)> {
        self.entries()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.state.clone()))
            .collect()
    }

    /// Completion candidates from the plugin owning `command`.
    ///
    /// Empty when the command is unknown, its owner is not a ready plugin,
    /// or the call fails.
    #[must_use]
    pub fn completions(&self, command: &str, prefix: &str) -> Vec<String> {
        let Some(info) = self.context.commands.get(command) else {
            return Vec::new();
        };
        let Ok(client) = self.client(&info.owner) else {
            return Vec::new();
        };
        client.completions(command, prefix).unwrap_or_else(|error| {
            warn!(
                target: HOST_TARGET,
                plugin = %info.owner,
                command,
                %error,
                "completion request failed"
            );
            Vec::new()
        })
    }

    /// Cleans up a ready plugin and removes its registrations.
    ///
    /// `Cleanup` is sent at most once per plugin.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::NotFound`] or [`HostError::NotReady`].
    pub fn unload(&self, name: &str) -> Result<(), HostError> {
        let (manifest, mut launched) = {
            let mut entries = self.entries();
            let entry = entries.get_mut(name).ok_or_else(|| HostError::NotFound {
                name: name.to_owned(),
            })?;
            if entry.state != PluginState::Ready {
                return Err(HostError::NotReady {
                    name: name.to_owned(),
                    state: entry.state.clone(),
                });
            }
            entry.state = PluginState::Stopped;
            (entry.manifest.clone(), entry.launched.take())
        };

        if let Some(manifest) = &manifest {
            self.unregister(manifest);
        }
        if let Some(launched) = &mut launched {
            if let Err(error) = launched.client().cleanup() {
                warn!(target: HOST_TARGET, plugin = name, %error, "cleanup failed");
            }
            launched.shutdown();
        }
        info!(target: HOST_TARGET, plugin = name, "plugin stopped");
        Ok(())
    }

    /// Unloads every ready plugin.
    pub fn shutdown(&self) {
        let ready: Vec<String> = self
            .entries()
            .iter()
            .filter(|(_, entry)| entry.state == PluginState::Ready)
            .map(|(name, _)| name.clone())
            .collect();
        for name in ready {
            if let Err(error) = self.unload(&name) {
                warn!(target: HOST_TARGET, plugin = %name, %error, "unload failed");
            }
        }
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, PluginEntry>> {
        self.plugins.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for PluginHost {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for PluginHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginHost")
            .field("plugins", &self.plugins())
            .finish_non_exhaustive()
    }
}

fn plugin_handler(client: PluginClient, command: String) -> CommandHandler {
    Arc::new(move |args: &[String]| {
        client
            .execute_command(&command, args)
            .map_err(|source| CommandError::Plugin {
                name: command.clone(),
                source,
            })
    })
}
