//! Channel multiplexing over one connection.
//!
//! The broker hands out small integer [`ChannelId`]s for services registered
//! on the local side and lets callers dial IDs registered by the peer. Each
//! side owns its own ID namespace: a request addressed to channel `n` is always
//! dispatched to the service the *receiving* side registered under `n`, so the
//! host and the plugin can allocate IDs independently without colliding.
//!
//! Two IDs are reserved. [`ChannelId::CONTROL`] carries broker traffic such as
//! dial checks, and [`ChannelId::PLUGIN`] is where a plugin process exposes its
//! primary service. Allocated IDs start above both and are never reused for the
//! lifetime of the connection; a withdrawn ID, reserved or not, stays retired.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::client::RpcClient;
use crate::connection::Shared;
use crate::error::RpcError;
use crate::message::codes;
use crate::service::Service;

/// Log target for broker operations.
const BROKER_TARGET: &str = "quill_rpc::broker";

/// Control-channel method used to check a channel exists on the peer.
pub(crate) const DIAL_METHOD: &str = "$/broker/dial";

/// Identifier of one logical endpoint on a connection.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ChannelId(u32);

impl ChannelId {
    /// Broker control traffic.
    pub const CONTROL: Self = Self(0);
    /// The plugin process's primary service.
    pub const PLUGIN: Self = Self(1);
    /// First identifier handed out by [`Broker::register`].
    pub const FIRST_DYNAMIC: Self = Self(2);

    /// Wraps a raw identifier.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle for registering and dialling channels on one connection.
///
/// Brokers are cheap to clone; every clone refers to the same connection.
#[derive(Clone)]
pub struct Broker {
    shared: Arc<Shared>,
}

impl Broker {
    pub(crate) const fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Registers `service` under a reserved identifier such as
    /// [`ChannelId::PLUGIN`].
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::ChannelInUse`] for the control channel or an
    /// occupied one, [`RpcError::ChannelNotReserved`] for identifiers in the
    /// dynamic range, and [`RpcError::ChannelRetired`] once `id` has been
    /// withdrawn.
    pub fn accept(&self, id: ChannelId, service: Arc<dyn Service>) -> Result<(), RpcError> {
        if id == ChannelId::CONTROL {
            return Err(RpcError::ChannelInUse { id });
        }
        if id >= ChannelId::FIRST_DYNAMIC {
            return Err(RpcError::ChannelNotReserved { id });
        }
        self.install(id, service)
    }

    /// Registers `service` under a freshly allocated identifier.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::ChannelInUse`] only if the identifier space wrapped.
    pub fn register(&self, service: Arc<dyn Service>) -> Result<ChannelId, RpcError> {
        let id = self.shared.allocate_channel();
        self.install(id, service)?;
        Ok(id)
    }

    fn install(&self, id: ChannelId, service: Arc<dyn Service>) -> Result<(), RpcError> {
        self.shared.insert_service(id, service)?;
        debug!(
            target: BROKER_TARGET,
            connection = %self.shared.label(),
            channel = %id,
            "service registered"
        );
        Ok(())
    }

    /// Removes a locally registered service and retires its identifier.
    ///
    /// Returns `true` if a service was registered under `id`.
    pub fn withdraw(&self, id: ChannelId) -> bool {
        self.shared.remove_service(id)
    }

    /// Confirms the peer serves `id` and returns a client bound to it.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Dial`] when the peer has no service on `id`, or the
    /// transport error raised while asking.
    pub fn dial(&self, id: ChannelId) -> Result<RpcClient, RpcError> {
        if id == ChannelId::CONTROL {
            return Err(RpcError::Dial {
                id,
                message: String::from("the control channel cannot be dialled"),
            });
        }
        let control = RpcClient::new(Arc::clone(&self.shared), ChannelId::CONTROL);
        match control.call::<_, bool>(DIAL_METHOD, &json!({ "id": id })) {
            Ok(true) => {
                debug!(
                    target: BROKER_TARGET,
                    connection = %self.shared.label(),
                    channel = %id,
                    "dialled peer channel"
                );
                Ok(RpcClient::new(Arc::clone(&self.shared), id))
            }
            Ok(false) => Err(RpcError::Dial {
                id,
                message: String::from("peer refused the channel"),
            }),
            Err(RpcError::Remote { fault, .. }) if fault.code == codes::UNKNOWN_CHANNEL => {
                Err(RpcError::Dial {
                    id,
                    message: fault.message,
                })
            }
            Err(other) => Err(other),
        }
    }

    /// Returns a client for `id` without asking the peer first.
    ///
    /// Calls through the client fail with an `UNKNOWN_CHANNEL` fault if the
    /// peer has nothing registered there.
    #[must_use]
    pub fn client(&self, id: ChannelId) -> RpcClient {
        RpcClient::new(Arc::clone(&self.shared), id)
    }
}

impl fmt::Debug for Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broker")
            .field("connection", &self.shared.label())
            .finish_non_exhaustive()
    }
}
