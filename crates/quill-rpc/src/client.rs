//! Caller side of a broker channel.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::broker::ChannelId;
use crate::connection::Shared;
use crate::error::RpcError;

/// Issues calls to one channel served by the peer.
///
/// Calls block the current thread until the peer responds. Clients are cheap
/// to clone and may be used from several threads at once.
#[derive(Clone)]
pub struct RpcClient {
    shared: Arc<Shared>,
    channel: ChannelId,
}

impl RpcClient {
    pub(crate) const fn new(shared: Arc<Shared>, channel: ChannelId) -> Self {
        Self { shared, channel }
    }

    /// Channel this client addresses.
    #[must_use]
    pub const fn channel(&self) -> ChannelId {
        self.channel
    }

    /// Calls `method` and decodes its result.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Remote`] when the peer answers with an error,
    /// [`RpcError::Codec`] when parameters or the result do not fit, and a
    /// transport variant when the connection fails.
    pub fn call<P, R>(&self, method: &str, params: &P) -> Result<R, RpcError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let value = serde_json::to_value(params).map_err(|error| RpcError::codec(method, error))?;
        let result = self.call_value(method, value)?;
        serde_json::from_value(result).map_err(|error| RpcError::codec(method, error))
    }

    /// Calls `method` with raw JSON parameters and returns the raw result.
    ///
    /// # Errors
    ///
    /// See [`RpcClient::call`].
    pub fn call_value(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.shared.request(self.channel, method, params)
    }

    /// Sends a one-way notification.
    ///
    /// Returns once the frame is written; the peer never answers.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Codec`] if `params` cannot be encoded, or a
    /// transport variant if the frame cannot be written.
    pub fn notify<P>(&self, method: &str, params: &P) -> Result<(), RpcError>
    where
        P: Serialize + ?Sized,
    {
        let value = serde_json::to_value(params).map_err(|error| RpcError::codec(method, error))?;
        self.shared.notify(self.channel, method, value)
    }
}

impl fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcClient")
            .field("connection", &self.shared.label())
            .field("channel", &self.channel)
            .finish()
    }
}
