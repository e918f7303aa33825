//! Spawning plugin processes and opening their connections.
//!
//! [`PluginLauncher::launch`] starts a plugin executable with the handshake
//! environment, validates its announcement line, registers the host callback
//! service on the new connection, and dials the plugin's primary channel.
//! [`PluginLauncher::connect`] performs the same steps over streams supplied
//! by the caller, which is how in-process plugins are attached.

use std::fmt;
use std::io::{self, BufRead, BufReader, Write};
use std::process::{Child, ChildStderr, Command, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use camino::Utf8Path;
use quill_plugins::handshake_config;
use quill_rpc::{
    ChannelId, Connection, HandshakeConfig, HandshakeError, RpcError, Service,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::client::PluginClient;

const LAUNCHER_TARGET: &str = "quill_host::launcher";

/// Time a plugin gets to exit after its stdin closes.
const EXIT_GRACE: Duration = Duration::from_millis(200);

/// Failures starting a plugin.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The executable could not be started.
    #[error("failed to start plugin '{path}': {source}")]
    Spawn {
        /// Executable path.
        path: String,
        /// Underlying error.
        #[source]
        source: Arc<io::Error>,
    },

    /// A standard stream of the child was not captured.
    #[error("plugin '{plugin}' has no {stream} pipe")]
    MissingPipe {
        /// Plugin label.
        plugin: String,
        /// Missing stream.
        stream: &'static str,
    },

    /// The plugin refused the handshake or announced an incompatible
    /// protocol.
    #[error("handshake with plugin '{plugin}' failed: {source}")]
    Handshake {
        /// Plugin label.
        plugin: String,
        /// Underlying error.
        #[source]
        source: Arc<HandshakeError>,
    },

    /// The connection could not be set up.
    #[error("connection to plugin '{plugin}' failed: {source}")]
    Rpc {
        /// Plugin label.
        plugin: String,
        /// Underlying error.
        #[source]
        source: Arc<RpcError>,
    },
}

/// Starts plugins and connects to them.
#[derive(Debug, Clone)]
pub struct PluginLauncher {
    handshake: HandshakeConfig,
}

impl Default for PluginLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginLauncher {
    /// Creates a launcher using the Quill handshake values.
    #[must_use]
    pub fn new() -> Self {
        Self::with_handshake(handshake_config())
    }

    /// Creates a launcher using custom handshake values.
    #[must_use]
    pub const fn with_handshake(handshake: HandshakeConfig) -> Self {
        Self { handshake }
    }

    /// Spawns the plugin at `path` and connects to it.
    ///
    /// `callbacks` is registered on the new connection before the plugin
    /// channel is dialled. The child is terminated if any step fails.
    ///
    /// # Errors
    ///
    /// Returns a [`LaunchError`] naming the step that failed.
    pub fn launch(
        &self,
        path: &Utf8Path,
        args: &[String],
        callbacks: Arc<dyn Service>,
    ) -> Result<LaunchedPlugin, LaunchError> {
        let label = plugin_label(path);
        debug!(
            target: LAUNCHER_TARGET,
            plugin = %label,
            path = %path,
            ?args,
            "spawning plugin process"
        );
        let mut child = Command::new(path.as_std_path())
            .args(args)
            .envs(self.handshake.environment())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                path: path.to_string(),
                source: Arc::new(source),
            })?;
        let stderr = child
            .stderr
            .take()
            .and_then(|pipe| drain_stderr(&label, pipe));

        let streams = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => Ok((stdin, stdout)),
            (None, _) => Err(LaunchError::MissingPipe {
                plugin: label.clone(),
                stream: "stdin",
            }),
            (_, None) => Err(LaunchError::MissingPipe {
                plugin: label.clone(),
                stream: "stdout",
            }),
        };
        let connected = streams.and_then(|(stdin, stdout)| {
            self.connect(&label, BufReader::new(stdout), stdin, callbacks)
        });

        match connected {
            Ok(mut launched) => {
                info!(
                    target: LAUNCHER_TARGET,
                    plugin = %label,
                    pid = child.id(),
                    "plugin process connected"
                );
                launched.child = Some(child);
                launched.stderr = stderr;
                Ok(launched)
            }
            Err(error) => {
                terminate_child(&label, &mut child);
                join_drain(&label, stderr);
                Err(error)
            }
        }
    }

    /// Connects to a plugin over caller-supplied streams.
    ///
    /// Reads the announcement line from `reader`, then starts the connection
    /// on the remainder of the stream.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError::Handshake`] for a missing or incompatible
    /// announcement, or [`LaunchError::Rpc`] if the connection cannot start
    /// or the plugin channel cannot be dialled.
    pub fn connect<R, W>(
        &self,
        label: &str,
        mut reader: R,
        writer: W,
        callbacks: Arc<dyn Service>,
    ) -> Result<LaunchedPlugin, LaunchError>
    where
        R: BufRead + Send + 'static,
        W: Write + Send + 'static,
    {
        let announcement = self
            .handshake
            .await_announcement(&mut reader)
            .map_err(|source| LaunchError::Handshake {
                plugin: label.to_owned(),
                source: Arc::new(source),
            })?;
        debug!(
            target: LAUNCHER_TARGET,
            plugin = label,
            core_version = announcement.core_version,
            app_version = announcement.app_version,
            "plugin announced"
        );

        let rpc_error = |source: RpcError| LaunchError::Rpc {
            plugin: label.to_owned(),
            source: Arc::new(source),
        };
        let connection = Connection::new(label, writer);
        let broker = connection.broker();
        let callback = broker.register(callbacks).map_err(rpc_error)?;
        connection.start(reader).map_err(rpc_error)?;
        let client = broker.dial(ChannelId::PLUGIN).map_err(rpc_error)?;

        Ok(LaunchedPlugin {
            label: label.to_owned(),
            connection,
            client: PluginClient::new(client),
            callback,
            child: None,
            stderr: None,
        })
    }
}

/// A connected plugin and the process behind it, if any.
pub struct LaunchedPlugin {
    label: String,
    connection: Connection,
    client: PluginClient,
    callback: ChannelId,
    child: Option<Child>,
    stderr: Option<JoinHandle<()>>,
}

impl LaunchedPlugin {
    /// Label used in logs, derived from the executable name.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Client for the plugin interface.
    #[must_use]
    pub const fn client(&self) -> &PluginClient {
        &self.client
    }

    /// Channel the host callback service is registered on.
    #[must_use]
    pub const fn callback_channel(&self) -> ChannelId {
        self.callback
    }

    /// Returns `true` once the plugin has closed its side of the connection.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    /// Closes the connection and stops the child process.
    ///
    /// Safe to call more than once.
    pub fn shutdown(&mut self) {
        self.connection.close();
        if let Some(mut child) = self.child.take() {
            terminate_child(&self.label, &mut child);
        }
        join_drain(&self.label, self.stderr.take());
    }
}

impl Drop for LaunchedPlugin {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for LaunchedPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchedPlugin")
            .field("label", &self.label)
            .field("callback", &self.callback)
            .field("pid", &self.child.as_ref().map(Child::id))
            .finish_non_exhaustive()
    }
}

fn plugin_label(path: &Utf8Path) -> String {
    path.file_stem().unwrap_or(path.as_str()).to_owned()
}

fn drain_stderr(label: &str, pipe: ChildStderr) -> Option<JoinHandle<()>> {
    let plugin = label.to_owned();
    thread::Builder::new()
        .name(format!("quill-plugin-stderr-{label}"))
        .spawn(move || {
            for line in BufReader::new(pipe).lines().map_while(Result::ok) {
                debug!(target: LAUNCHER_TARGET, plugin = %plugin, "{line}");
            }
        })
        .inspect_err(|error| {
            warn!(
                target: LAUNCHER_TARGET,
                plugin = label,
                %error,
                "failed to drain plugin stderr"
            );
        })
        .ok()
}

fn join_drain(label: &str, handle: Option<JoinHandle<()>>) {
    if let Some(handle) = handle
        && handle.join().is_err()
    {
        warn!(target: LAUNCHER_TARGET, plugin = label, "stderr drain panicked");
    }
}

/// Waits briefly for the child to exit, then kills it.
fn terminate_child(label: &str, child: &mut Child) {
    if let Ok(Some(status)) = child.try_wait() {
        debug!(target: LAUNCHER_TARGET, plugin = label, ?status, "plugin exited");
        return;
    }
    thread::sleep(EXIT_GRACE);
    match child.try_wait() {
        Ok(Some(status)) => {
            debug!(
                target: LAUNCHER_TARGET,
                plugin = label,
                ?status,
                "plugin exited during grace period"
            );
        }
        Ok(None) | Err(_) => {
            warn!(
                target: LAUNCHER_TARGET,
                plugin = label,
                "plugin did not exit, killing it"
            );
            drop(child.kill());
            drop(child.wait());
        }
    }
}
