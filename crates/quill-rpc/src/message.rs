//! JSON-RPC 2.0 frames addressed to broker channels.
//!
//! Each frame is an ordinary JSON-RPC 2.0 object with one extra member,
//! `channel`, naming the broker endpoint it belongs to. Requests and
//! notifications address a service registered by the *receiving* side;
//! responses travel back on the channel of the request they answer.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::broker::ChannelId;

const JSONRPC_VERSION: &str = "2.0";

/// Standard and Quill-specific JSON-RPC error codes.
pub mod codes {
    /// The frame body was not valid JSON.
    pub const PARSE_ERROR: i64 = -32_700;
    /// The request object was malformed.
    pub const INVALID_REQUEST: i64 = -32_600;
    /// The service does not implement the method.
    pub const METHOD_NOT_FOUND: i64 = -32_601;
    /// The parameters could not be decoded.
    pub const INVALID_PARAMS: i64 = -32_602;
    /// The service failed unexpectedly.
    pub const INTERNAL_ERROR: i64 = -32_603;
    /// The call was understood and refused by application logic.
    pub const APPLICATION_ERROR: i64 = -32_000;
    /// No service is registered on the addressed channel.
    pub const UNKNOWN_CHANNEL: i64 = -32_001;
    /// The service has not completed initialization.
    pub const NOT_INITIALISED: i64 = -32_002;
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcFault {
    /// Error code.
    pub code: i64,
    /// Human-readable error message.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcFault {
    /// Creates a fault with the given code and message.
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// An application-level refusal, such as an unknown command name.
    #[must_use]
    pub fn application(message: impl Into<String>) -> Self {
        Self::new(codes::APPLICATION_ERROR, message)
    }

    /// The service has no handler for `method`.
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(codes::METHOD_NOT_FOUND, format!("method '{method}' not found"))
    }

    /// Parameters for `method` could not be decoded.
    #[must_use]
    pub fn invalid_params(method: &str, detail: impl fmt::Display) -> Self {
        Self::new(
            codes::INVALID_PARAMS,
            format!("invalid params for '{method}': {detail}"),
        )
    }

    /// The service failed while producing a result.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL_ERROR, message)
    }

    /// Returns `true` for application-level refusals.
    #[must_use]
    pub const fn is_application(&self) -> bool {
        self.code == codes::APPLICATION_ERROR
    }
}

impl fmt::Display for RpcFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)
    }
}

/// The body of one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// A call expecting a response.
    Request {
        /// Identifier echoed in the response.
        id: u64,
        /// Method to invoke.
        method: String,
        /// Method parameters.
        params: Value,
    },
    /// The outcome of an earlier request.
    Response {
        /// Identifier of the request being answered.
        id: u64,
        /// Result value or error object.
        outcome: Result<Value, RpcFault>,
    },
    /// A one-way message with no response.
    Notification {
        /// Method to invoke.
        method: String,
        /// Method parameters.
        params: Value,
    },
}

/// A message addressed to a broker channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Channel the message belongs to.
    pub channel: ChannelId,
    /// The message itself.
    pub message: Message,
}

/// Failures decoding a frame body.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The body was not valid JSON for a frame.
    #[error("malformed frame: {0}")]
    Codec(#[from] serde_json::Error),
    /// The body declared an unsupported protocol version.
    #[error("unsupported JSON-RPC version '{0}'")]
    Version(String),
    /// The body was neither a request, a response, nor a notification.
    #[error("frame is neither a request, response, nor notification")]
    Shape,
}

#[derive(Serialize, Deserialize)]
struct WireFrame {
    channel: ChannelId,
    jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<RpcFault>,
}

impl Frame {
    /// Builds a request frame.
    #[must_use]
    pub fn request(channel: ChannelId, id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            channel,
            message: Message::Request {
                id,
                method: method.into(),
                params,
            },
        }
    }

    /// Builds a response frame.
    #[must_use]
    pub const fn response(channel: ChannelId, id: u64, outcome: Result<Value, RpcFault>) -> Self {
        Self {
            channel,
            message: Message::Response { id, outcome },
        }
    }

    /// Builds a notification frame.
    #[must_use]
    pub fn notification(channel: ChannelId, method: impl Into<String>, params: Value) -> Self {
        Self {
            channel,
            message: Message::Notification {
                method: method.into(),
                params,
            },
        }
    }

    /// Serialises the frame body.
    ///
    /// # Errors
    ///
    /// Returns an error if a parameter or result value cannot be serialised.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut wire = WireFrame {
            channel: self.channel,
            jsonrpc: String::from(JSONRPC_VERSION),
            id: None,
            method: None,
            params: None,
            result: None,
            error: None,
        };
        match &self.message {
            Message::Request { id, method, params } => {
                wire.id = Some(*id);
                wire.method = Some(method.clone());
                wire.params = Some(params.clone());
            }
            Message::Response { id, outcome } => {
                wire.id = Some(*id);
                match outcome {
                    Ok(value) => wire.result = Some(value.clone()),
                    Err(fault) => wire.error = Some(fault.clone()),
                }
            }
            Message::Notification { method, params } => {
                wire.method = Some(method.clone());
                wire.params = Some(params.clone());
            }
        }
        serde_json::to_vec(&wire)
    }

    /// Parses a frame body.
    ///
    /// A response with a `null` result decodes to `Ok(Value::Null)`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] when the body is not a well-formed frame.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        let wire: WireFrame = serde_json::from_slice(bytes)?;
        if wire.jsonrpc != JSONRPC_VERSION {
            return Err(FrameError::Version(wire.jsonrpc));
        }
        let params = wire.params.unwrap_or(Value::Null);
        let message = match (wire.id, wire.method) {
            (Some(id), Some(method)) => Message::Request { id, method, params },
            (None, Some(method)) => Message::Notification { method, params },
            (Some(id), None) => Message::Response {
                id,
                outcome: match wire.error {
                    Some(fault) => Err(fault),
                    None => Ok(wire.result.unwrap_or(Value::Null)),
                },
            },
            (None, None) => return Err(FrameError::Shape),
        };
        Ok(Self {
            channel: wire.channel,
            message,
        })
    }
}
