//! Error types for the RPC layer.
//!
//! Errors carry the method or channel they concern so that callers several
//! layers up can report which operation failed without re-wrapping.

use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::broker::ChannelId;
use crate::message::RpcFault;

/// Failures reading or writing framed bytes.
#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O error during read or write.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer closed the stream between frames.
    #[error("stream closed by peer")]
    Closed,

    /// A header block had no `Content-Length` entry.
    #[error("missing Content-Length header")]
    MissingContentLength,

    /// A `Content-Length` value could not be parsed.
    #[error("invalid header format")]
    InvalidHeader,

    /// A `Content-Length` value exceeded the frame limit.
    #[error("frame of {length} bytes exceeds the {limit} byte limit")]
    FrameTooLarge {
        /// Announced payload length.
        length: usize,
        /// Largest accepted payload.
        limit: usize,
    },
}

/// Failures surfaced to RPC callers.
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    /// Writing the request frame failed.
    #[error("failed to send '{method}': {source}")]
    Send {
        /// Method being invoked.
        method: String,
        /// Underlying transport failure.
        #[source]
        source: Arc<TransportError>,
    },

    /// Parameters or results could not be encoded or decoded.
    #[error("codec error in '{method}': {source}")]
    Codec {
        /// Method being invoked.
        method: String,
        /// Underlying JSON error.
        #[source]
        source: Arc<serde_json::Error>,
    },

    /// The connection closed before a response arrived.
    #[error("connection closed while waiting for '{method}'")]
    ConnectionClosed {
        /// Method being invoked.
        method: String,
    },

    /// The peer answered with an error response.
    #[error("'{method}' failed remotely: {fault}")]
    Remote {
        /// Method being invoked.
        method: String,
        /// Error object returned by the peer.
        fault: RpcFault,
    },

    /// Dialling a broker channel failed.
    #[error("failed to dial broker channel {id}: {message}")]
    Dial {
        /// Channel that was dialled.
        id: ChannelId,
        /// Description of the failure.
        message: String,
    },

    /// A service is already registered on the channel.
    #[error("broker channel {id} is already in use")]
    ChannelInUse {
        /// Channel that was requested.
        id: ChannelId,
    },

    /// Dynamic channels are only handed out by registration.
    #[error("broker channel {id} is not a reserved channel")]
    ChannelNotReserved {
        /// Channel that was requested.
        id: ChannelId,
    },

    /// The channel was withdrawn and cannot be registered again.
    #[error("broker channel {id} was withdrawn and is retired")]
    ChannelRetired {
        /// Channel that was requested.
        id: ChannelId,
    },

    /// The connection's reader was started twice or could not be spawned.
    #[error("connection could not start: {message}")]
    Start {
        /// Description of the failure.
        message: String,
    },
}

impl RpcError {
    /// Returns the remote error object when the peer rejected the call.
    #[must_use]
    pub const fn fault(&self) -> Option<&RpcFault> {
        match self {
            Self::Remote { fault, .. } => Some(fault),
            _ => None,
        }
    }

    /// Returns `true` when the peer reported an application-level error
    /// rather than a protocol or transport failure.
    #[must_use]
    pub fn is_application_error(&self) -> bool {
        self.fault().is_some_and(RpcFault::is_application)
    }

    pub(crate) fn codec(method: &str, source: serde_json::Error) -> Self {
        Self::Codec {
            method: method.to_owned(),
            source: Arc::new(source),
        }
    }
}
