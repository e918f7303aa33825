//! Host side of the Quill plugin runtime.
//!
//! Plugins are separate executables that speak JSON-RPC over their standard
//! streams. The host starts each one with the handshake environment, waits
//! for its announcement line, and multiplexes two services over the pipe: the
//! plugin's own methods on the plugin channel, and a [`HostCallbackService`]
//! on a channel the host allocates before initialisation. Plugins use the
//! callback channel to read and edit buffers, run commands, and register
//! hooks while a host request is still in flight.
//!
//! [`PluginHost`] drives the lifecycle: launch, `Initialize`, read the
//! manifest once, register its commands, modes, and key bindings, and clean
//! everything up again on unload. A plugin that fails at any point is shut
//! down and marked failed; the host keeps running.
//!
//! Packages are the in-process counterpart. [`PackageManager`] downloads
//! declared packages, builds a [`Provider`] for each, and walks it through
//! initialisation, configuration, scripting registration, and enablement.
//!
//! The [`cli`] module backs the `quill-host` binary, which runs plugins
//! against the in-memory [`MemoryEditor`].

pub mod callbacks;
pub mod cli;
pub mod client;
pub mod commands;
pub mod editor;
pub mod hooks;
pub mod host;
pub mod launcher;
pub mod modes;
pub mod packages;
pub mod telemetry;

pub use callbacks::{HostCallbackService, HostContext};
pub use client::PluginClient;
pub use commands::{CommandError, CommandInfo, CommandRegistry, CommandTable};
pub use editor::{EditorCore, EditorError, MemoryEditor, SharedEditor};
pub use hooks::HookRegistry;
pub use host::{HOST_VERSION, HostError, PluginHost, PluginState};
pub use launcher::{LaunchError, LaunchedPlugin, PluginLauncher};
pub use modes::{ModeConflict, ModeRegistry};
pub use packages::{
    PackageDeclaration, PackageError, PackageManager, PackageStatus, PackageSummary, Provider,
};
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;
