//! Server-side dispatch contract.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::message::RpcFault;

/// A set of methods exposed on one broker channel.
///
/// Each incoming request runs on its own worker thread, so implementations
/// may block, including on calls back over the same connection. They must be
/// safe for concurrent use.
pub trait Service: Send + Sync {
    /// Handles a request and produces its result.
    ///
    /// # Errors
    ///
    /// Returns an [`RpcFault`] which is sent back to the caller as a JSON-RPC
    /// error response.
    fn call(&self, method: &str, params: Value) -> Result<Value, RpcFault>;

    /// Handles a one-way notification.
    ///
    /// The default implementation ignores the message.
    fn notify(&self, method: &str, params: Value) {
        drop((method, params));
    }
}

/// Decodes request parameters, mapping failures to `INVALID_PARAMS`.
///
/// # Errors
///
/// Returns [`RpcFault::invalid_params`] if `params` does not match `T`.
pub fn decode_params<T: DeserializeOwned>(method: &str, params: Value) -> Result<T, RpcFault> {
    serde_json::from_value(params).map_err(|error| RpcFault::invalid_params(method, error))
}

/// Encodes a result value, mapping failures to `INTERNAL_ERROR`.
///
/// # Errors
///
/// Returns [`RpcFault::internal`] if `value` cannot be represented as JSON.
pub fn encode_result<T: Serialize>(value: &T) -> Result<Value, RpcFault> {
    serde_json::to_value(value)
        .map_err(|error| RpcFault::internal(format!("failed to encode result: {error}")))
}
