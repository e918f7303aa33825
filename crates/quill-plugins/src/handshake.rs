//! Handshake values shared by the Quill host and every plugin.

use quill_rpc::HandshakeConfig;

/// Application protocol version spoken by this release.
pub const PROTOCOL_VERSION: u32 = 1;

/// Environment variable carrying the magic cookie.
pub const MAGIC_COOKIE_KEY: &str = "QUILL_PLUGIN_MAGIC_COOKIE";

/// Magic cookie value. Plugins refuse to start without it.
pub const MAGIC_COOKIE_VALUE: &str = "d3a1c7e5b9f04c2a8e6b1f7d5c3a9e0b";

/// Environment variable carrying [`PROTOCOL_VERSION`].
pub const PROTOCOL_VERSION_KEY: &str = "QUILL_PLUGIN_PROTOCOL_VERSION";

/// Environment variable holding a plugin's log filter.
pub const PLUGIN_LOG_ENV: &str = "QUILL_PLUGIN_LOG";

/// Returns the handshake configuration used by host and plugins.
///
/// # Example
///
/// ```
/// let config = quill_plugins::handshake_config();
/// assert_eq!(config.announcement(), "1|1|stdio|jsonrpc");
/// ```
#[must_use]
pub fn handshake_config() -> HandshakeConfig {
    HandshakeConfig::new(PROTOCOL_VERSION, MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE)
        .with_version_key(PROTOCOL_VERSION_KEY)
}
