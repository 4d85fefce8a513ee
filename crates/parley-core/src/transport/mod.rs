//! Realtime transport
//!
//! Keeps one WebSocket per conversation connected, reconnecting with
//! jittered exponential backoff.
//!
//! - `connection`: the [`Transport`] state machine
//! - `backoff`: reconnect delay computation
//! - `socket`: the [`Connector`] seam and the tungstenite connector
//! - `endpoint`: endpoint and token query construction

mod backoff;
mod connection;
mod endpoint;
mod error;
mod socket;

#[cfg(test)]
pub(crate) mod testing;

pub use backoff::{Backoff, BackoffPolicy};
pub use connection::{CloseKind, ConnectionState, TokenSupplier, Transport, TransportConfig};
pub use error::TransportError;
pub use endpoint::{connection_url, conversation_endpoint};
pub use socket::{Connector, FrameSink, FrameStream, WsConnector};
