//! Typed stubs for calling back into the host.

use quill_plugins::methods::host;
use quill_plugins::{
    AddHookParams, BufferEdit, BufferInfo, BufferTarget, EditBufferParams, ExecuteCommandParams,
    GetOptionParams, MessageParams, ModeParams, OpenFileParams, SetOptionParams,
    TriggerHookParams,
};
use quill_rpc::{ChannelId, RpcClient, RpcError};
use serde_json::Value;

use crate::buffer::BufferProxy;

/// Client for the host callback service.
///
/// Obtained by the server during `Initialize` and handed to
/// [`crate::Plugin::initialize`] and [`crate::Plugin::execute_command`]. Every
/// buffer it returns is a snapshot taken when the host answered.
#[derive(Debug, Clone)]
pub struct HostClient {
    rpc: RpcClient,
}

impl HostClient {
    pub(crate) const fn new(rpc: RpcClient) -> Self {
        Self { rpc }
    }

    /// Broker channel the host serves callbacks on.
    #[must_use]
    pub const fn channel(&self) -> ChannelId {
        self.rpc.channel()
    }

    /// Snapshot of the current buffer, or `None` when there is none.
    ///
    /// # Errors
    ///
    /// Returns the [`RpcError`] raised by the call.
    pub fn current_buffer(&self) -> Result<Option<BufferInfo>, RpcError> {
        self.rpc.call(host::GET_CURRENT_BUFFER, &Value::Null)
    }

    /// Proxy over the current buffer, or `None` when there is none.
    ///
    /// # Errors
    ///
    /// Returns the [`RpcError`] raised by the call.
    pub fn current_buffer_proxy(&self) -> Result<Option<BufferProxy>, RpcError> {
        Ok(self
            .current_buffer()?
            .map(|snapshot| BufferProxy::new(snapshot, self.clone())))
    }

    /// Snapshot of the buffer called `name`, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns the [`RpcError`] raised by the call.
    pub fn find_buffer(&self, name: &str) -> Result<Option<BufferInfo>, RpcError> {
        self.rpc.call(host::FIND_BUFFER, &buffer_target(name))
    }

    /// Creates an empty buffer.
    ///
    /// # Errors
    ///
    /// Fails remotely if a buffer with that name already exists.
    pub fn create_buffer(&self, name: &str) -> Result<BufferInfo, RpcError> {
        self.rpc.call(host::CREATE_BUFFER, &buffer_target(name))
    }

    /// Makes `name` the current buffer.
    ///
    /// # Errors
    ///
    /// Fails remotely if the buffer does not exist.
    pub fn switch_to_buffer(&self, name: &str) -> Result<(), RpcError> {
        self.rpc.call(host::SWITCH_TO_BUFFER, &buffer_target(name))
    }

    /// Opens `path` into a buffer and makes it current.
    ///
    /// # Errors
    ///
    /// Fails remotely if the file cannot be read.
    pub fn open_file(&self, path: &str) -> Result<BufferInfo, RpcError> {
        self.rpc.call(
            host::OPEN_FILE,
            &OpenFileParams {
                path: path.to_owned(),
            },
        )
    }

    /// Writes the buffer to its file.
    ///
    /// # Errors
    ///
    /// Fails remotely if the buffer is unknown or has no file.
    pub fn save_buffer(&self, name: &str) -> Result<(), RpcError> {
        self.rpc.call(host::SAVE_BUFFER, &buffer_target(name))
    }

    /// Replaces the status line.
    ///
    /// # Errors
    ///
    /// Returns the [`RpcError`] raised by the call.
    pub fn set_status(&self, text: &str) -> Result<(), RpcError> {
        self.rpc.call(host::SET_STATUS, &message(text))
    }

    /// Shows a message to the user.
    ///
    /// # Errors
    ///
    /// Returns the [`RpcError`] raised by the call.
    pub fn show_message(&self, text: &str) -> Result<(), RpcError> {
        self.rpc.call(host::SHOW_MESSAGE, &message(text))
    }

    /// Runs any command registered with the host, including other plugins'.
    ///
    /// # Errors
    ///
    /// Fails remotely if the command is unknown or fails.
    pub fn execute_command(&self, name: &str, args: &[String]) -> Result<(), RpcError> {
        self.rpc.call(
            host::EXECUTE_COMMAND,
            &ExecuteCommandParams {
                name: name.to_owned(),
                args: args.to_vec(),
            },
        )
    }

    /// Selects the major mode of `buffer`.
    ///
    /// # Errors
    ///
    /// Fails remotely if the buffer or mode is unknown.
    pub fn set_major_mode(&self, buffer: &str, mode: &str) -> Result<(), RpcError> {
        self.rpc
            .call(host::SET_MAJOR_MODE, &mode_params(buffer, mode))
    }

    /// Toggles a minor mode on `buffer` and returns its new state.
    ///
    /// # Errors
    ///
    /// Fails remotely if the buffer or mode is unknown.
    pub fn toggle_minor_mode(&self, buffer: &str, mode: &str) -> Result<bool, RpcError> {
        self.rpc
            .call(host::TOGGLE_MINOR_MODE, &mode_params(buffer, mode))
    }

    /// Runs `command` whenever `event` fires.
    ///
    /// # Errors
    ///
    /// Returns the [`RpcError`] raised by the call.
    pub fn add_hook(&self, event: &str, command: &str) -> Result<(), RpcError> {
        self.rpc.call(
            host::ADD_HOOK,
            &AddHookParams {
                event: event.to_owned(),
                command: command.to_owned(),
            },
        )
    }

    /// Fires `event` without waiting for the hooked commands.
    ///
    /// # Errors
    ///
    /// Returns an [`RpcError`] only if the notification cannot be sent.
    pub fn trigger_hook(&self, event: &str, args: &[String]) -> Result<(), RpcError> {
        self.rpc.notify(
            host::TRIGGER_HOOK,
            &TriggerHookParams {
                event: event.to_owned(),
                args: args.to_vec(),
            },
        )
    }

    /// Reads an editor option, or `None` if unset.
    ///
    /// # Errors
    ///
    /// Returns the [`RpcError`] raised by the call.
    pub fn get_option(&self, name: &str) -> Result<Option<Value>, RpcError> {
        self.rpc.call(
            host::GET_OPTION,
            &GetOptionParams {
                name: name.to_owned(),
            },
        )
    }

    /// Writes an editor option.
    ///
    /// # Errors
    ///
    /// Returns the [`RpcError`] raised by the call.
    pub fn set_option(&self, name: &str, value: Value) -> Result<(), RpcError> {
        self.rpc.call(
            host::SET_OPTION,
            &SetOptionParams {
                name: name.to_owned(),
                value,
            },
        )
    }

    /// Applies `edit` to a buffer and returns the resulting snapshot.
    ///
    /// # Errors
    ///
    /// Fails remotely if the buffer is unknown or the edit is out of range.
    pub fn edit_buffer(&self, buffer: &str, edit: BufferEdit) -> Result<BufferInfo, RpcError> {
        self.rpc.call(
            host::EDIT_BUFFER,
            &EditBufferParams {
                buffer: buffer.to_owned(),
                edit,
            },
        )
    }
}

fn buffer_target(name: &str) -> BufferTarget {
    BufferTarget {
        name: name.to_owned(),
    }
}

fn message(text: &str) -> MessageParams {
    MessageParams {
        text: text.to_owned(),
    }
}

fn mode_params(buffer: &str, mode: &str) -> ModeParams {
    ModeParams {
        buffer: buffer.to_owned(),
        mode: mode.to_owned(),
    }
}
