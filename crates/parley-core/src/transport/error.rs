//! Transport errors
//!
//! None of these are fatal. They are logged and handed to the registered
//! error handler while the connection heals itself.

use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::protocol::FrameError;

#[derive(Error, Debug)]
pub enum TransportError {
    /// Endpoint could not be parsed or extended
    #[error("Invalid realtime endpoint '{url}': {reason}")]
    InvalidEndpoint { url: String, reason: String },

    /// Socket failed to open or failed while open
    #[error("WebSocket error: {0}")]
    Socket(#[from] tungstenite::Error),

    /// An inbound frame could not be decoded
    #[error(transparent)]
    MalformedFrame(#[from] FrameError),
}
