//! Multiplexed JSON-RPC over a single byte stream.
//!
//! The `quill-rpc` crate carries the wire layer between the Quill host and
//! its plugin processes. Frames are JSON-RPC 2.0 objects delimited with
//! `Content-Length` headers, each tagged with the broker [`ChannelId`] it
//! belongs to. Either side can register services and call the other, so one
//! pair of pipes carries both host-to-plugin commands and plugin-to-host
//! callbacks.
//!
//! # Architecture
//!
//! A [`Connection`] owns the writing half of the stream and a reader thread
//! on the other half. Services are registered through the connection's
//! [`Broker`], which allocates channel IDs and dials channels served by the
//! peer. Dialling yields an [`RpcClient`] whose calls block until the matching
//! response arrives.
//!
//! Before any frame is exchanged, the [`handshake`] module checks the child's
//! environment and the plugin's announcement line.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::io::BufReader;
//! use std::sync::Arc;
//!
//! use quill_rpc::{ChannelId, Connection, RpcFault, Service};
//! use serde_json::Value;
//!
//! struct Echo;
//!
//! impl Service for Echo {
//!     fn call(&self, _method: &str, params: Value) -> Result<Value, RpcFault> {
//!         Ok(params)
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let (reader, _peer_writer) = std::io::pipe()?;
//! let (_peer_reader, writer) = std::io::pipe()?;
//! let connection = Connection::new("plugin", writer);
//! connection.broker().accept(ChannelId::PLUGIN, Arc::new(Echo))?;
//! connection.start(BufReader::new(reader))?;
//! connection.wait();
//! # Ok(())
//! # }
//! ```

mod broker;
mod client;
mod connection;
pub mod error;
pub mod handshake;
pub mod message;
mod service;
pub mod transport;

pub use self::broker::{Broker, ChannelId};
pub use self::client::RpcClient;
pub use self::connection::Connection;
pub use self::error::{RpcError, TransportError};
pub use self::handshake::{CORE_PROTOCOL_VERSION, HandshakeConfig, HandshakeError};
pub use self::message::{Frame, Message, RpcFault, codes};
pub use self::service::{Service, decode_params, encode_result};
