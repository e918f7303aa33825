//! Command registry.
//!
//! Commands are named actions owned by a plugin (or by the host itself).
//! Plugins contribute [`CommandSpec`]s through their manifest; the host wraps
//! each one in a handler that calls back into the owning plugin.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use quill_plugins::CommandSpec;
use quill_rpc::RpcError;
use thiserror::Error;
use tracing::debug;

const COMMANDS_TARGET: &str = "quill_host::commands";

/// Failures registering or running commands.
#[derive(Debug, Clone, Error)]
pub enum CommandError {
    /// Another owner already registered the name.
    #[error("command '{name}' is already registered by '{owner}'")]
    AlreadyRegistered {
        /// Command name.
        name: String,
        /// Current owner.
        owner: String,
    },

    /// No command has the name.
    #[error("command '{name}' not found")]
    NotFound {
        /// Command name.
        name: String,
    },

    /// The handler reported a failure.
    #[error("command '{name}' failed: {message}")]
    Failed {
        /// Command name.
        name: String,
        /// Failure description.
        message: String,
    },

    /// The owning plugin rejected the call or could not be reached.
    #[error("plugin command '{name}' failed: {source}")]
    Plugin {
        /// Command name.
        name: String,
        /// Underlying RPC failure.
        #[source]
        source: RpcError,
    },
}

/// Runs a command with its positional arguments.
pub type CommandHandler = Arc<dyn Fn(&[String]) -> Result<(), CommandError> + Send + Sync>;

/// A registered command as listed by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInfo {
    /// The command descriptor.
    pub spec: CommandSpec,
    /// Plugin (or host component) that registered it.
    pub owner: String,
}

/// Storage and dispatch for commands.
pub trait CommandRegistry: Send + Sync {
    /// Registers a command.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::AlreadyRegistered`] if the name is taken.
    fn register(
        &self,
        owner: &str,
        spec: CommandSpec,
        handler: CommandHandler,
    ) -> Result<(), CommandError>;

    /// Looks up a command.
    fn get(&self, name: &str) -> Option<CommandInfo>;

    /// Runs a command.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::NotFound`] or the handler's failure.
    fn execute(&self, name: &str, args: &[String]) -> Result<(), CommandError>;

    /// Every command, sorted by name.
    fn list(&self) -> Vec<CommandInfo>;

    /// Commands whose names start with `prefix`, sorted by name.
    fn list_with_prefix(&self, prefix: &str) -> Vec<CommandInfo>;

    /// Removes every command registered by `owner`, returning how many.
    fn unregister_owner(&self, owner: &str) -> usize;
}

struct Entry {
    info: CommandInfo,
    handler: CommandHandler,
}

/// Default [`CommandRegistry`] backed by a sorted map.
///
/// Handlers run without the table lock held, so a handler may itself run or
/// register commands.
#[derive(Default)]
pub struct CommandTable {
    entries: RwLock<BTreeMap<String, Entry>>,
}

impl CommandTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl fmt::Debug for CommandTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("CommandTable")
            .field("commands", &entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CommandRegistry for CommandTable {
    fn register(
        &self,
        owner: &str,
        spec: CommandSpec,
        handler: CommandHandler,
    ) -> Result<(), CommandError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = entries.get(&spec.name) {
            return Err(CommandError::AlreadyRegistered {
                name: spec.name,
                owner: existing.info.owner.clone(),
            });
        }
        debug!(
            target: COMMANDS_TARGET,
            command = %spec.name,
            owner,
            "command registered"
        );
        entries.insert(
            spec.name.clone(),
            Entry {
                info: CommandInfo {
                    spec,
                    owner: owner.to_owned(),
                },
                handler,
            },
        );
        Ok(())
    }

    fn get(&self, name: &str) -> Option<CommandInfo> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|entry| entry.info.clone())
    }

    fn execute(&self, name: &str, args: &[String]) -> Result<(), CommandError> {
        let handler = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|entry| Arc::clone(&entry.handler))
            .ok_or_else(|| CommandError::NotFound {
                name: name.to_owned(),
            })?;
        debug!(target: COMMANDS_TARGET, command = name, "executing command");
        handler(args)
    }

    fn list(&self) -> Vec<CommandInfo> {
        self.list_with_prefix("")
    }

    fn list_with_prefix(&self, prefix: &str) -> Vec<CommandInfo> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .range(prefix.to_owned()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(_, entry)| entry.info.clone())
            .collect()
    }

    fn unregister_owner(&self, owner: &str) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| entry.info.owner != owner);
        before - entries.len()
    }
}
