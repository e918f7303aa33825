//! Host callback service.
//!
//! One [`HostCallbackService`] is registered on each plugin's broker before
//! the plugin is initialised. It adapts the `host/*` methods onto the shared
//! [`EditorCore`] and the host registries. Every buffer it returns is a fresh
//! snapshot.

use std::fmt;
use std::sync::{Arc, MutexGuard, PoisonError};

use camino::Utf8Path;
use quill_plugins::methods::host;
use quill_plugins::{
    AddHookParams, BufferTarget, EditBufferParams, ExecuteCommandParams, GetOptionParams,
    MessageParams, ModeParams, OpenFileParams, SetOptionParams, TriggerHookParams,
};
use quill_rpc::{RpcFault, Service, decode_params, encode_result};
use serde_json::Value;
use tracing::{debug, warn};

use crate::commands::{CommandRegistry, CommandTable};
use crate::editor::{EditorCore, EditorError, SharedEditor};
use crate::hooks::{AFTER_SAVE, HookRegistry};
use crate::modes::ModeRegistry;

const CALLBACKS_TARGET: &str = "quill_host::callbacks";

/// Shared state every callback service drives.
#[derive(Clone)]
pub struct HostContext {
    /// Editor state, locked once per callback.
    pub editor: SharedEditor,
    /// Command registry used by `host/executeCommand`.
    pub commands: Arc<dyn CommandRegistry>,
    /// Hook registry used by `host/addHook` and `host/triggerHook`.
    pub hooks: Arc<HookRegistry>,
    /// Modes known to the host.
    pub modes: Arc<ModeRegistry>,
}

impl HostContext {
    /// Wraps `editor` with empty command, hook, and mode registries.
    #[must_use]
    pub fn new(editor: SharedEditor) -> Self {
        Self {
            editor,
            commands: Arc::new(CommandTable::new()),
            hooks: Arc::new(HookRegistry::new()),
            modes: Arc::new(ModeRegistry::new()),
        }
    }
}

impl fmt::Debug for HostContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostContext")
            .field("hooks", &self.hooks)
            .field("modes", &self.modes)
            .finish_non_exhaustive()
    }
}

/// Serves the `host/*` methods for one plugin.
#[derive(Debug)]
pub struct HostCallbackService {
    context: HostContext,
    plugin: String,
}

impl HostCallbackService {
    /// Creates the service for the plugin labelled `plugin`.
    #[must_use]
    pub fn new(context: HostContext, plugin: impl Into<String>) -> Self {
        Self {
            context,
            plugin: plugin.into(),
        }
    }

    fn editor(&self) -> MutexGuard<'_, dyn EditorCore + 'static> {
        self.context
            .editor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn save_buffer(&self, name: &str) -> Result<(), EditorError> {
        self.editor().save_buffer(name)?;
        let errors = self.context.hooks.trigger(
            AFTER_SAVE,
            &[name.to_owned()],
            self.context.commands.as_ref(),
        );
        if !errors.is_empty() {
            warn!(
                target: CALLBACKS_TARGET,
                plugin = %self.plugin,
                buffer = name,
                failures = errors.len(),
                "after-save hooks failed"
            );
        }
        Ok(())
    }

    fn set_major_mode(&self, request: &ModeParams) -> Result<(), RpcFault> {
        let mode = request.mode.as_str();
        if !self.context.modes.has_major_mode(mode) {
            return Err(RpcFault::application(format!("unknown major mode '{mode}'")));
        }
        self.editor()
            .set_major_mode(&request.buffer, mode)
            .map_err(editor_fault)
    }

    fn toggle_minor_mode(&self, request: &ModeParams) -> Result<bool, RpcFault> {
        let mode = request.mode.as_str();
        if !self.context.modes.has_minor_mode(mode) {
            return Err(RpcFault::application(format!("unknown minor mode '{mode}'")));
        }
        self.editor()
            .toggle_minor_mode(&request.buffer, mode)
            .map_err(editor_fault)
    }
}

impl Service for HostCallbackService {
    fn call(&self, method: &str, params: Value) -> Result<Value, RpcFault> {
        debug!(
            target: CALLBACKS_TARGET,
            plugin = %self.plugin,
            method,
            "host callback"
        );
        match method {
            host::GET_CURRENT_BUFFER => encode_result(&self.editor().current_buffer()),
            host::FIND_BUFFER => {
                let target: BufferTarget = decode_params(method, params)?;
                encode_result(&self.editor().find_buffer(&target.name))
            }
            host::CREATE_BUFFER => {
                let target: BufferTarget = decode_params(method, params)?;
                let created = self
                    .editor()
                    .create_buffer(&target.name)
                    .map_err(editor_fault)?;
                encode_result(&created)
            }
            host::SWITCH_TO_BUFFER => {
                let target: BufferTarget = decode_params(method, params)?;
                self.editor()
                    .switch_to_buffer(&target.name)
                    .map_err(editor_fault)?;
                Ok(Value::Null)
            }
            host::OPEN_FILE => {
                let request: OpenFileParams = decode_params(method, params)?;
                let opened = self
                    .editor()
                    .open_file(Utf8Path::new(&request.path))
                    .map_err(editor_fault)?;
                encode_result(&opened)
            }
            host::SAVE_BUFFER => {
                let target: BufferTarget = decode_params(method, params)?;
                self.save_buffer(&target.name).map_err(editor_fault)?;
                Ok(Value::Null)
            }
            host::SET_STATUS => {
                let message: MessageParams = decode_params(method, params)?;
                self.editor().set_status(&message.text);
                Ok(Value::Null)
            }
            host::SHOW_MESSAGE => {
                let message: MessageParams = decode_params(method, params)?;
                self.editor().show_message(&message.text);
                Ok(Value::Null)
            }
            host::EXECUTE_COMMAND => {
                let request: ExecuteCommandParams = decode_params(method, params)?;
                self.context
                    .commands
                    .execute(&request.name, &request.args)
                    .map_err(|error| RpcFault::application(error.to_string()))?;
                Ok(Value::Null)
            }
            host::SET_MAJOR_MODE => {
                let request: ModeParams = decode_params(method, params)?;
                self.set_major_mode(&request)?;
                Ok(Value::Null)
            }
            host::TOGGLE_MINOR_MODE => {
                let request: ModeParams = decode_params(method, params)?;
                encode_result(&self.toggle_minor_mode(&request)?)
            }
            host::ADD_HOOK => {
                let request: AddHookParams = decode_params(method, params)?;
                self.context.hooks.add(&request.event, &request.command);
                Ok(Value::Null)
            }
            host::GET_OPTION => {
                let request: GetOptionParams = decode_params(method, params)?;
                encode_result(&self.editor().option(&request.name))
            }
            host::SET_OPTION => {
                let request: SetOptionParams = decode_params(method, params)?;
                self.editor().set_option(&request.name, request.value);
                Ok(Value::Null)
            }
            host::EDIT_BUFFER => {
                let request: EditBufferParams = decode_params(method, params)?;
                let edited = self
                    .editor()
                    .edit_buffer(&request.buffer, &request.edit)
                    .map_err(editor_fault)?;
                encode_result(&edited)
            }
            _ => Err(RpcFault::method_not_found(method)),
        }
    }

    fn notify(&self, method: &str, params: Value) {
        if method != host::TRIGGER_HOOK {
            debug!(
                target: CALLBACKS_TARGET,
                plugin = %self.plugin,
                method,
                "ignoring unknown notification"
            );
            return;
        }
        match decode_params::<TriggerHookParams>(method, params) {
            Ok(request) => {
                self.context.hooks.trigger(
                    &request.event,
                    &request.args,
                    self.context.commands.as_ref(),
                );
            }
            Err(fault) => warn!(
                target: CALLBACKS_TARGET,
                plugin = %self.plugin,
                %fault,
                "malformed hook trigger"
            ),
        }
    }
}

fn editor_fault(error: EditorError) -> RpcFault {
    RpcFault::application(error.to_string())
}

#[cfg(test)]
mod tests;
