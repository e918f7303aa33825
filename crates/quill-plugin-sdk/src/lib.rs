//! Toolkit for writing Quill plugins.
//!
//! A plugin is an ordinary binary. Implement [`Plugin`], then hand an
//! instance to [`serve`] from `main`. The SDK checks the handshake
//! environment, announces the plugin, and serves the plugin interface over
//! stdin and stdout. During `Initialize` it connects back to the host and
//! passes a [`HostClient`] to the plugin for reading and editing host state.
//!
//! # Example
//!
//! ```rust,no_run
//! use quill_plugin_sdk::{CommandSpec, HostClient, Plugin, PluginFailure, serve};
//!
//! struct Hello;
//!
//! impl Plugin for Hello {
//!     fn name(&self) -> &str { "hello" }
//!     fn version(&self) -> &str { "0.1.0" }
//!     fn description(&self) -> &str { "Greets the user" }
//!
//!     fn commands(&self) -> Vec<CommandSpec> {
//!         vec![CommandSpec::new("hello", "Show a greeting")]
//!     }
//!
//!     fn execute_command(
//!         &self,
//!         host: &HostClient,
//!         _name: &str,
//!         _args: &[String],
//!     ) -> Result<(), PluginFailure> {
//!         host.show_message("hello from a plugin")?;
//!         Ok(())
//!     }
//! }
//!
//! fn main() {
//!     if serve(Hello).is_err() {
//!         std::process::exit(1);
//!     }
//! }
//! ```

mod buffer;
mod host;
mod plugin;
mod serve;
mod server;
pub mod telemetry;

#[cfg(test)]
mod tests;

pub use self::buffer::BufferProxy;
pub use self::host::HostClient;
pub use self::plugin::{Plugin, PluginFailure};
pub use self::serve::{ServeError, serve, serve_with};
pub use self::server::PluginServer;
pub use quill_plugins::{
    BufferInfo, Capability, CapabilitySet, CommandSpec, KeyBindingSpec, KeyScope, MajorModeSpec,
    MinorModeSpec,
};
