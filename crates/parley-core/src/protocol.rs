//! Realtime wire protocol
//!
//! Frames are JSON text messages shaped `{ "type": ..., "payload": ... }`.
//! Inbound frames are decoded in two steps: the envelope first, then the
//! payload for the kinds this client knows. Unknown kinds decode to
//! [`InboundFrame::Unknown`] so newer servers do not break older clients.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::models::{Message, PresenceStatus};

/// Errors decoding an inbound frame
#[derive(Error, Debug)]
pub enum FrameError {
    /// Not valid JSON, or a known kind with the wrong payload shape
    #[error("Malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary frame that is not UTF-8 text
    #[error("Binary frame is not valid UTF-8")]
    NotUtf8,
}

/// Typing notification payload (inbound and outbound)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub conversation_id: String,
    pub user_id: String,
    pub is_typing: bool,
}

/// Presence notification payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
    pub conversation_id: String,
    pub user_id: String,
    pub status: PresenceStatus,
}

/// Server-reported error payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// A decoded inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Message(Message),
    Typing(TypingPayload),
    Presence(PresencePayload),
    Error(ErrorPayload),
    /// A kind this client does not understand
    Unknown { kind: String },
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

impl InboundFrame {
    /// Decode a frame from its JSON text
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let envelope: Envelope = serde_json::from_str(text)?;
        let frame = match envelope.kind.as_str() {
            "message" => InboundFrame::Message(serde_json::from_value(envelope.payload)?),
            "typing" => InboundFrame::Typing(serde_json::from_value(envelope.payload)?),
            "presence" => InboundFrame::Presence(serde_json::from_value(envelope.payload)?),
            "error" => InboundFrame::Error(serde_json::from_value(envelope.payload)?),
            _ => InboundFrame::Unknown {
                kind: envelope.kind,
            },
        };
        Ok(frame)
    }

    /// Decode a binary frame carrying UTF-8 JSON
    pub fn decode_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        let text = std::str::from_utf8(bytes).map_err(|_| FrameError::NotUtf8)?;
        Self::decode(text)
    }

    /// Wire name of this frame's kind
    pub fn kind(&self) -> &str {
        match self {
            InboundFrame::Message(_) => "message",
            InboundFrame::Typing(_) => "typing",
            InboundFrame::Presence(_) => "presence",
            InboundFrame::Error(_) => "error",
            InboundFrame::Unknown { kind } => kind,
        }
    }
}

/// Frames this client sends
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum OutboundFrame {
    Typing(TypingPayload),
}

impl OutboundFrame {
    pub fn typing(
        conversation_id: impl Into<String>,
        user_id: impl Into<String>,
        is_typing: bool,
    ) -> Self {
        OutboundFrame::Typing(TypingPayload {
            conversation_id: conversation_id.into(),
            user_id: user_id.into(),
            is_typing,
        })
    }

    /// Encode as JSON text
    pub fn encode(&self) -> String {
        // Serializing plain structs with string keys cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}
