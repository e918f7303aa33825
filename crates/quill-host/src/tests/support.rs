//! An in-process test plugin and the wiring to attach it to a host.

use std::io::{BufReader, pipe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use quill_plugin_sdk::{
    CommandSpec, HostClient, KeyBindingSpec, KeyScope, MinorModeSpec, Plugin, PluginFailure,
    ServeError, serve_with,
};
use quill_plugins::handshake_config;
use quill_rpc::Service;

use crate::callbacks::HostContext;
use crate::editor::{MemoryEditor, SharedEditor};
use crate::launcher::{LaunchError, LaunchedPlugin, PluginLauncher};

/// Reads handshake variables as the host would set them.
pub(crate) fn handshake_env(key: &str) -> Option<String> {
    handshake_config()
        .environment()
        .into_iter()
        .find(|(name, _)| name == key)
        .map(|(_, value)| value)
}

/// Fresh registries around `editor`.
pub(crate) fn context(editor: &Arc<Mutex<MemoryEditor>>) -> HostContext {
    HostContext::new(Arc::clone(editor) as SharedEditor)
}

/// Serves `plugin` on a thread and connects to it over pipes.
pub(crate) fn connect<P: Plugin>(
    plugin: P,
    callbacks: Arc<dyn Service>,
) -> (
    Result<LaunchedPlugin, LaunchError>,
    JoinHandle<Result<(), ServeError>>,
) {
    let label = plugin.name().to_owned();
    let (host_reader, plugin_writer) = pipe().expect("plugin-to-host pipe");
    let (plugin_reader, host_writer) = pipe().expect("host-to-plugin pipe");
    let serving = thread::spawn(move || {
        serve_with(
            plugin,
            BufReader::new(plugin_reader),
            plugin_writer,
            handshake_env,
        )
    });
    let launched = PluginLauncher::new().connect(
        &label,
        BufReader::new(host_reader),
        host_writer,
        callbacks,
    );
    (launched, serving)
}

/// A small plugin exercising every callback path the host offers.
#[derive(Debug, Clone)]
pub(crate) struct Notes {
    pub(crate) name: &'static str,
    commands: Vec<&'static str>,
    minor_mode: Option<&'static str>,
    refuse_init: bool,
    cleanups: Arc<AtomicUsize>,
}

impl Notes {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            commands: vec!["note", "upcase", "nested", "save", "fail"],
            minor_mode: Some("notes-mode"),
            refuse_init: false,
            cleanups: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn with_commands(mut self, commands: &[&'static str]) -> Self {
        self.commands = commands.to_vec();
        self
    }

    pub(crate) fn without_modes(mut self) -> Self {
        self.minor_mode = None;
        self
    }

    pub(crate) fn refusing_init(mut self) -> Self {
        self.refuse_init = true;
        self
    }

    pub(crate) fn cleanups(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.cleanups)
    }
}

impl Plugin for Notes {
    fn name(&self) -> &str {
        self.name
    }

    fn version(&self) -> &str {
        "0.1.0"
    }

    fn description(&self) -> &str {
        "Test plugin"
    }

    fn initialize(&self, host: &HostClient) -> Result<(), PluginFailure> {
        if self.refuse_init {
            return Err(PluginFailure::Other(String::from("not today")));
        }
        if self.commands.contains(&"note") {
            host.add_hook("after-save", "note")?;
        }
        Ok(())
    }

    fn cleanup(&self) -> Result<(), PluginFailure> {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn commands(&self) -> Vec<CommandSpec> {
        self.commands
            .iter()
            .map(|name| CommandSpec::new(*name, format!("{name} command")))
            .collect()
    }

    fn minor_modes(&self) -> Vec<MinorModeSpec> {
        self.minor_mode
            .map(|mode| MinorModeSpec::new(mode, "Notes", " N"))
            .into_iter()
            .collect()
    }

    fn key_bindings(&self) -> Vec<KeyBindingSpec> {
        self.minor_mode
            .map(|_| KeyBindingSpec::new("C-c n", "note", KeyScope::Global))
            .into_iter()
            .collect()
    }

    fn execute_command(
        &self,
        host: &HostClient,
        name: &str,
        args: &[String],
    ) -> Result<(), PluginFailure> {
        match name {
            "note" => Ok(host.show_message(&args.join(" "))?),
            "upcase" => {
                let mut buffer = host
                    .current_buffer_proxy()?
                    .ok_or_else(|| PluginFailure::Other(String::from("no buffer")))?;
                let upper = buffer.content().to_uppercase();
                buffer.set_content(upper)?;
                Ok(())
            }
            "nested" => Ok(host.execute_command("note", args)?),
            "save" => {
                let buffer = host
                    .current_buffer()?
                    .ok_or_else(|| PluginFailure::Other(String::from("no buffer")))?;
                Ok(host.save_buffer(&buffer.name)?)
            }
            "fail" => Err(PluginFailure::Other(String::from("boom"))),
            other => Err(PluginFailure::UnknownCommand {
                name: other.to_owned(),
            }),
        }
    }

    fn completions(&self, command: &str, prefix: &str) -> Vec<String> {
        if command != "note" {
            return Vec::new();
        }
        ["alpha", "alpine", "beta"]
            .into_iter()
            .filter(|candidate| candidate.starts_with(prefix))
            .map(String::from)
            .collect()
    }
}
