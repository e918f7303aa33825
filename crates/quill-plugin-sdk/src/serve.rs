//! Process entry point for plugin binaries.

use std::env;
use std::io::{self, BufRead, BufReader, Write};

use quill_plugins::handshake_config;
use quill_rpc::{ChannelId, Connection, HandshakeError, RpcError};
use thiserror::Error;
use tracing::info;

use crate::plugin::Plugin;
use crate::server::PluginServer;
use crate::telemetry::{self, TelemetryError};

const SERVE_TARGET: &str = "quill_plugin_sdk::serve";

/// Failures that stop a plugin process from serving.
#[derive(Debug, Error)]
pub enum ServeError {
    /// Logging could not be set up.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    /// The host handshake failed.
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
    /// The RPC connection could not be set up.
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

/// Serves `plugin` over stdin and stdout until the host hangs up.
///
/// Call this from `main`. Without the host's handshake environment the
/// function returns at once with [`ServeError::Handshake`].
///
/// # Errors
///
/// Returns [`ServeError`] when telemetry, the handshake, or connection setup
/// fails.
pub fn serve<P: Plugin>(plugin: P) -> Result<(), ServeError> {
    telemetry::initialise()?;
    serve_with(
        plugin,
        BufReader::new(io::stdin()),
        io::stdout(),
        |key| env::var(key).ok(),
    )
}

/// Serves `plugin` over arbitrary streams.
///
/// `lookup` reads the handshake environment. The announcement line is
/// written to `writer` before any framed traffic.
///
/// # Errors
///
/// See [`serve`].
pub fn serve_with<P, R, W, F>(plugin: P, reader: R, mut writer: W, lookup: F) -> Result<(), ServeError>
where
    P: Plugin,
    R: BufRead + Send + 'static,
    W: Write + Send + 'static,
    F: Fn(&str) -> Option<String>,
{
    let handshake = handshake_config();
    handshake.verify_environment(lookup)?;
    handshake.announce(&mut writer)?;

    let label = plugin.name().to_owned();
    let connection = Connection::new(label.clone(), writer);
    let broker = connection.broker();
    let service = PluginServer::new(plugin).bind(broker.clone());
    broker.accept(ChannelId::PLUGIN, service)?;
    connection.start(reader)?;

    info!(target: SERVE_TARGET, plugin = %label, "plugin serving");
    connection.wait();
    info!(target: SERVE_TARGET, plugin = %label, "host closed the connection");
    Ok(())
}
