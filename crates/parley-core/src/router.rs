//! Inbound frame dispatch
//!
//! Stateless: each frame goes to exactly one handler method chosen by its
//! kind. Every known kind has a required method so a new kind cannot be
//! added to the protocol without deciding its disposition. Unknown kinds
//! reach no handler.

use tracing::debug;

use crate::models::Message;
use crate::protocol::{ErrorPayload, InboundFrame, PresencePayload, TypingPayload};

/// Receives routed frames, one method per kind
pub trait FrameHandler {
    fn on_message(&self, message: Message);
    fn on_typing(&self, typing: TypingPayload);
    fn on_presence(&self, presence: PresencePayload);
    fn on_error(&self, error: ErrorPayload);
}

/// Where a frame went
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    Message,
    Typing,
    Presence,
    Error,
    /// Unknown kind, no handler invoked
    Dropped,
}

/// Dispatch one frame to its handler
pub fn route<H: FrameHandler + ?Sized>(frame: InboundFrame, handler: &H) -> Routed {
    match frame {
        InboundFrame::Message(message) => {
            handler.on_message(message);
            Routed::Message
        }
        InboundFrame::Typing(typing) => {
            handler.on_typing(typing);
            Routed::Typing
        }
        InboundFrame::Presence(presence) => {
            handler.on_presence(presence);
            Routed::Presence
        }
        InboundFrame::Error(error) => {
            handler.on_error(error);
            Routed::Error
        }
        InboundFrame::Unknown { kind } => {
            debug!(kind = %kind, "Dropping frame of unknown kind");
            Routed::Dropped
        }
    }
}
