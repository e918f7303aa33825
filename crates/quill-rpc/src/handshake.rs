//! Process-level handshake between a host and a plugin child.
//!
//! The host passes a magic cookie and the application protocol version to
//! the child through its environment. The child checks both before speaking
//! RPC, then announces itself with a single line on its output stream:
//!
//! ```text
//! <core version>|<app version>|stdio|jsonrpc
//! ```
//!
//! The host reads that line before wrapping the stream in a
//! [`crate::Connection`]. Binaries started by hand, without the cookie, refuse
//! to run rather than waiting on a stream nobody will write to.

use std::io::{self, BufRead, Write};

use thiserror::Error;

/// Version of this handshake and framing layer.
pub const CORE_PROTOCOL_VERSION: u32 = 1;

/// Network field of the announcement line.
const TRANSPORT: &str = "stdio";

/// Protocol field of the announcement line.
const PROTOCOL: &str = "jsonrpc";

/// Default environment variable carrying the application protocol version.
pub const DEFAULT_VERSION_KEY: &str = "PLUGIN_PROTOCOL_VERSION";

/// Failures during the handshake.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The magic cookie was not present in the environment.
    #[error(
        "this binary is a plugin and must be launched by its host ({key} is not set)"
    )]
    MissingCookie {
        /// Environment variable that was expected.
        key: String,
    },

    /// The magic cookie had the wrong value.
    #[error("magic cookie in {key} does not match")]
    CookieMismatch {
        /// Environment variable that was checked.
        key: String,
    },

    /// The protocol version was not present in the environment.
    #[error("protocol version variable {key} is not set")]
    MissingVersion {
        /// Environment variable that was expected.
        key: String,
    },

    /// The protocol version could not be parsed.
    #[error("protocol version '{value}' is not a number")]
    InvalidVersion {
        /// The raw value.
        value: String,
    },

    /// The two sides speak different application protocol versions.
    #[error("protocol version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Version this side speaks.
        expected: u32,
        /// Version the peer announced.
        found: u32,
    },

    /// The peer uses a different handshake and framing layer.
    #[error("core protocol mismatch: expected {expected}, found {found}")]
    CoreVersionMismatch {
        /// Version this side speaks.
        expected: u32,
        /// Version the peer announced.
        found: u32,
    },

    /// The peer announced a transport this side cannot use.
    #[error("unsupported transport '{transport}'")]
    UnsupportedTransport {
        /// The announced network and protocol.
        transport: String,
    },

    /// The announcement line did not have four `|`-separated fields.
    #[error("malformed handshake line: {line:?}")]
    MalformedAnnouncement {
        /// The line as received.
        line: String,
    },

    /// The peer closed its stream before announcing itself.
    #[error("plugin exited before completing the handshake")]
    PeerExited,

    /// I/O failure while reading or writing the announcement.
    #[error("handshake I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A parsed announcement line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Announcement {
    /// Core protocol version.
    pub core_version: u32,
    /// Application protocol version.
    pub app_version: u32,
}

/// Shared handshake parameters for one host application.
///
/// Both sides must be built with identical values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeConfig {
    protocol_version: u32,
    cookie_key: String,
    cookie_value: String,
    version_key: String,
}

impl HandshakeConfig {
    /// Creates a configuration using [`DEFAULT_VERSION_KEY`].
    #[must_use]
    pub fn new(
        protocol_version: u32,
        cookie_key: impl Into<String>,
        cookie_value: impl Into<String>,
    ) -> Self {
        Self {
            protocol_version,
            cookie_key: cookie_key.into(),
            cookie_value: cookie_value.into(),
            version_key: String::from(DEFAULT_VERSION_KEY),
        }
    }

    /// Overrides the environment variable carrying the protocol version.
    #[must_use]
    pub fn with_version_key(mut self, key: impl Into<String>) -> Self {
        self.version_key = key.into();
        self
    }

    /// Application protocol version.
    #[must_use]
    pub const fn protocol_version(&self) -> u32 {
        self.protocol_version
    }

    /// Environment variable holding the magic cookie.
    #[must_use]
    pub fn cookie_key(&self) -> &str {
        &self.cookie_key
    }

    /// Environment variables the host sets on a plugin child.
    #[must_use]
    pub fn environment(&self) -> Vec<(String, String)> {
        vec![
            (self.cookie_key.clone(), self.cookie_value.clone()),
            (self.version_key.clone(), self.protocol_version.to_string()),
        ]
    }

    /// Checks the child-side environment.
    ///
    /// `lookup` is normally `|key| std::env::var(key).ok()`.
    ///
    /// # Errors
    ///
    /// Returns a [`HandshakeError`] naming the first missing or mismatched
    /// value.
    pub fn verify_environment<F>(&self, lookup: F) -> Result<(), HandshakeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(cookie) = lookup(&self.cookie_key) else {
            return Err(HandshakeError::MissingCookie {
                key: self.cookie_key.clone(),
            });
        };
        if cookie != self.cookie_value {
            return Err(HandshakeError::CookieMismatch {
                key: self.cookie_key.clone(),
            });
        }
        let Some(raw) = lookup(&self.version_key) else {
            return Err(HandshakeError::MissingVersion {
                key: self.version_key.clone(),
            });
        };
        let found = raw
            .trim()
            .parse::<u32>()
            .map_err(|_| HandshakeError::InvalidVersion { value: raw.clone() })?;
        if found != self.protocol_version {
            return Err(HandshakeError::VersionMismatch {
                expected: self.protocol_version,
                found,
            });
        }
        Ok(())
    }

    /// The line a plugin writes once it is ready.
    #[must_use]
    pub fn announcement(&self) -> String {
        format!(
            "{CORE_PROTOCOL_VERSION}|{}|{TRANSPORT}|{PROTOCOL}",
            self.protocol_version
        )
    }

    /// Writes the announcement line and flushes.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::Io`] if the write fails.
    pub fn announce<W: Write>(&self, writer: &mut W) -> Result<(), HandshakeError> {
        writeln!(writer, "{}", self.announcement())?;
        writer.flush()?;
        Ok(())
    }

    /// Reads and validates the plugin's announcement line.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::PeerExited`] on end-of-stream, or the
    /// validation failure from [`HandshakeConfig::parse_announcement`].
    pub fn await_announcement<R: BufRead>(
        &self,
        reader: &mut R,
    ) -> Result<Announcement, HandshakeError> {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Err(HandshakeError::PeerExited);
        }
        self.parse_announcement(&line)
    }

    /// Validates an announcement line.
    ///
    /// # Errors
    ///
    /// Returns a [`HandshakeError`] if the line is malformed or names an
    /// incompatible version or transport.
    pub fn parse_announcement(&self, line: &str) -> Result<Announcement, HandshakeError> {
        let trimmed = line.trim_end_matches(['\r', '\n']);
        let malformed = || HandshakeError::MalformedAnnouncement {
            line: trimmed.to_owned(),
        };
        let fields: Vec<&str> = trimmed.split('|').collect();
        let [core, app, network, protocol] = fields.as_slice() else {
            return Err(malformed());
        };
        let core_version = core.parse::<u32>().map_err(|_| malformed())?;
        let app_version = app.parse::<u32>().map_err(|_| malformed())?;

        if core_version != CORE_PROTOCOL_VERSION {
            return Err(HandshakeError::CoreVersionMismatch {
                expected: CORE_PROTOCOL_VERSION,
                found: core_version,
            });
        }
        if app_version != self.protocol_version {
            return Err(HandshakeError::VersionMismatch {
                expected: self.protocol_version,
                found: app_version,
            });
        }
        if *network != TRANSPORT || *protocol != PROTOCOL {
            return Err(HandshakeError::UnsupportedTransport {
                transport: format!("{network}|{protocol}"),
            });
        }
        Ok(Announcement {
            core_version,
            app_version,
        })
    }
}
