//! Protocol contract between the Quill host and its plugins.
//!
//! The `quill-plugins` crate holds everything both sides of the process
//! boundary must agree on: the handshake values, the JSON-RPC method names and
//! payloads, and the capability manifest a plugin declares. It has no
//! behaviour of its own; the host lives in `quill-host` and the plugin side
//! in `quill-plugin-sdk`.
//!
//! # Example
//!
//! ```
//! use quill_plugins::{CommandSpec, PluginIdentity, PluginManifest};
//!
//! let mut manifest = PluginManifest::new(PluginIdentity::new("demo", "0.1.0", "Demo"));
//! manifest.commands.push(CommandSpec::new("hello", "Say hello"));
//! assert!(manifest.validate().is_ok());
//! ```

pub mod handshake;
pub mod manifest;
pub mod protocol;

pub use self::handshake::{
    MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE, PLUGIN_LOG_ENV, PROTOCOL_VERSION, PROTOCOL_VERSION_KEY,
    handshake_config,
};
pub use self::manifest::{
    Capability, CapabilitySet, CommandSpec, KeyBindingSpec, KeyScope, MajorModeSpec,
    ManifestError, MinorModeSpec, PluginIdentity, PluginManifest,
};
pub use self::protocol::{
    AddHookParams, BufferEdit, BufferInfo, BufferTarget, CompletionParams, EditBufferParams,
    ExecuteCommandParams, GetOptionParams, InitializeParams, InitializeResult, MessageParams,
    ModeParams, OpenFileParams, SetOptionParams, TriggerHookParams, methods,
};
