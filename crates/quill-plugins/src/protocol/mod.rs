//! Method names and payloads exchanged between host and plugin.
//!
//! The plugin serves the [`methods::plugin`] methods on
//! [`quill_rpc::ChannelId::PLUGIN`]. The host serves the [`methods::host`]
//! callbacks on a channel it allocates before initialization and passes to
//! the plugin in [`InitializeParams::host_broker_id`].
//!
//! Buffer positions are character offsets into the buffer content.

use quill_rpc::ChannelId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::manifest::CapabilitySet;

/// JSON-RPC method names.
pub mod methods {
    /// Methods served by the plugin.
    pub mod plugin {
        /// Returns the plugin name.
        pub const NAME: &str = "plugin/name";
        /// Returns the plugin version.
        pub const VERSION: &str = "plugin/version";
        /// Returns the plugin description.
        pub const DESCRIPTION: &str = "plugin/description";
        /// Connects the plugin to the host callback channel.
        pub const INITIALIZE: &str = "plugin/initialize";
        /// Releases plugin resources before shutdown.
        pub const CLEANUP: &str = "plugin/cleanup";
        /// Lists contributed commands.
        pub const GET_COMMANDS: &str = "plugin/getCommands";
        /// Lists contributed major modes.
        pub const GET_MAJOR_MODES: &str = "plugin/getMajorModes";
        /// Lists contributed minor modes.
        pub const GET_MINOR_MODES: &str = "plugin/getMinorModes";
        /// Lists contributed key bindings.
        pub const GET_KEY_BINDINGS: &str = "plugin/getKeyBindings";
        /// Runs a contributed command.
        pub const EXECUTE_COMMAND: &str = "plugin/executeCommand";
        /// Offers argument completions for a command.
        pub const GET_COMPLETIONS: &str = "plugin/getCompletions";
    }

    /// Callbacks served by the host.
    pub mod host {
        /// Snapshot of the current buffer, or `null`.
        pub const GET_CURRENT_BUFFER: &str = "host/getCurrentBuffer";
        /// Creates an empty buffer.
        pub const CREATE_BUFFER: &str = "host/createBuffer";
        /// Makes a buffer current.
        pub const SWITCH_TO_BUFFER: &str = "host/switchToBuffer";
        /// Snapshot of a named buffer, or `null`.
        pub const FIND_BUFFER: &str = "host/findBuffer";
        /// Opens a file into a buffer.
        pub const OPEN_FILE: &str = "host/openFile";
        /// Saves a buffer to its file.
        pub const SAVE_BUFFER: &str = "host/saveBuffer";
        /// Sets the status line.
        pub const SET_STATUS: &str = "host/setStatus";
        /// Shows a message to the user.
        pub const SHOW_MESSAGE: &str = "host/showMessage";
        /// Runs any registered command.
        pub const EXECUTE_COMMAND: &str = "host/executeCommand";
        /// Selects the current buffer's major mode.
        pub const SET_MAJOR_MODE: &str = "host/setMajorMode";
        /// Toggles a minor mode on the current buffer.
        pub const TOGGLE_MINOR_MODE: &str = "host/toggleMinorMode";
        /// Attaches a command to a hook event.
        pub const ADD_HOOK: &str = "host/addHook";
        /// Fires a hook event; sent as a notification.
        pub const TRIGGER_HOOK: &str = "host/triggerHook";
        /// Reads an editor option.
        pub const GET_OPTION: &str = "host/getOption";
        /// Writes an editor option.
        pub const SET_OPTION: &str = "host/setOption";
        /// Applies an edit to a buffer and returns the new snapshot.
        pub const EDIT_BUFFER: &str = "host/editBuffer";
    }
}

/// Parameters of [`methods::plugin::INITIALIZE`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializeParams {
    /// Channel serving host callbacks.
    #[serde(default)]
    pub host_broker_id: Option<ChannelId>,
    /// Version of the host application.
    #[serde(default)]
    pub host_version: String,
}

/// Result of [`methods::plugin::INITIALIZE`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializeResult {
    /// Features the plugin provides.
    #[serde(default)]
    pub capabilities: CapabilitySet,
}

/// A command invocation, used in both directions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteCommandParams {
    /// Command name.
    pub name: String,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<String>,
}

/// Parameters of [`methods::plugin::GET_COMPLETIONS`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionParams {
    /// Command being completed.
    pub command: String,
    /// Text typed so far.
    #[serde(default)]
    pub prefix: String,
}

/// A point-in-time copy of one buffer.
///
/// Snapshots are values: changing one never changes the host's buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferInfo {
    /// Buffer name.
    pub name: String,
    /// Full text.
    pub content: String,
    /// Cursor position.
    pub position: usize,
    /// Whether the buffer has unsaved changes.
    pub is_dirty: bool,
    /// Backing file, if any.
    #[serde(default)]
    pub filename: Option<String>,
}

/// Names a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferTarget {
    /// Buffer name.
    pub name: String,
}

/// Parameters of [`methods::host::OPEN_FILE`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenFileParams {
    /// Path to open.
    pub path: String,
}

/// Text for the status line or a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageParams {
    /// Text to show.
    pub text: String,
}

/// Names a mode on a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeParams {
    /// Buffer the mode applies to.
    pub buffer: String,
    /// Mode name.
    pub mode: String,
}

/// Parameters of [`methods::host::ADD_HOOK`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddHookParams {
    /// Event name, for example `after-save`.
    pub event: String,
    /// Command run when the event fires.
    pub command: String,
}

/// Parameters of [`methods::host::TRIGGER_HOOK`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerHookParams {
    /// Event name.
    pub event: String,
    /// Arguments passed to each hooked command.
    #[serde(default)]
    pub args: Vec<String>,
}

/// Parameters of [`methods::host::GET_OPTION`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetOptionParams {
    /// Option name.
    pub name: String,
}

/// Parameters of [`methods::host::SET_OPTION`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetOptionParams {
    /// Option name.
    pub name: String,
    /// New value.
    pub value: Value,
}

/// A single change to a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BufferEdit {
    /// Replaces the whole text.
    SetContent {
        /// New text.
        content: String,
    },
    /// Inserts text at a position.
    Insert {
        /// Insertion point.
        position: usize,
        /// Text to insert.
        text: String,
    },
    /// Deletes the half-open range `start..end`.
    Delete {
        /// First deleted position.
        start: usize,
        /// Position after the last deleted character.
        end: usize,
    },
    /// Moves the cursor.
    SetCursor {
        /// New position.
        position: usize,
    },
    /// Sets or clears the modified flag.
    MarkDirty {
        /// New flag value.
        dirty: bool,
    },
}

/// Parameters of [`methods::host::EDIT_BUFFER`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditBufferParams {
    /// Buffer to edit.
    pub buffer: String,
    /// The change to apply.
    pub edit: BufferEdit,
}

#[cfg(test)]
mod tests;
