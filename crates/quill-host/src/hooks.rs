//! Named events that run commands when fired.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use tracing::{debug, warn};

use crate::commands::{CommandError, CommandRegistry};

const HOOKS_TARGET: &str = "quill_host::hooks";

/// Event fired by the host after a buffer is saved.
pub const AFTER_SAVE: &str = "after-save";

/// Maps event names to the commands they run, in registration order.
#[derive(Debug, Default)]
pub struct HookRegistry {
    hooks: RwLock<BTreeMap<String, Vec<String>>>,
}

impl HookRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `command` whenever `event` fires.
    ///
    /// Returns `false` if the command was already attached to the event.
    pub fn add(&self, event: &str, command: &str) -> bool {
        let mut hooks = self.hooks.write().unwrap_or_else(PoisonError::into_inner);
        let commands = hooks.entry(event.to_owned()).or_default();
        if commands.iter().any(|existing| existing == command) {
            return false;
        }
        commands.push(command.to_owned());
        debug!(target: HOOKS_TARGET, event, command, "hook added");
        true
    }

    /// Commands attached to `event`.
    #[must_use]
    pub fn commands_for(&self, event: &str) -> Vec<String> {
        self.hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .cloned()
            .unwrap_or_default()
    }

    /// Detaches `command` from every event, returning how many it left.
    pub fn remove_command(&self, command: &str) -> usize {
        let mut hooks = self.hooks.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed = 0;
        for commands in hooks.values_mut() {
            let before = commands.len();
            commands.retain(|existing| existing != command);
            removed += before - commands.len();
        }
        hooks.retain(|_, commands| !commands.is_empty());
        removed
    }

    /// Runs every command attached to `event`.
    ///
    /// Each command runs even if an earlier one fails; failures are logged
    /// and returned.
    pub fn trigger(
        &self,
        event: &str,
        args: &[String],
        commands: &dyn CommandRegistry,
    ) -> Vec<CommandError> {
        let attached = self.commands_for(event);
        debug!(
            target: HOOKS_TARGET,
            event,
            commands = attached.len(),
            "triggering hook"
        );
        attached
            .iter()
            .filter_map(|command| {
                commands.execute(command, args).err().inspect(|error| {
                    warn!(
                        target: HOOKS_TARGET,
                        event,
                        command = %command,
                        %error,
                        "hooked command failed"
                    );
                })
            })
            .collect()
    }
}
