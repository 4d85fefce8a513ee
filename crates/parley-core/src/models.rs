//! Data models for Parley
//!
//! Defines the chat message and the per-conversation record that the
//! state sink owns. Field names serialize in camelCase to match the wire
//! format used by both the realtime channel and the HTTP API.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted chat message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique identifier within the conversation
    pub id: String,
    /// Conversation this message belongs to
    pub conversation_id: String,
    /// Author's user id
    pub author: String,
    /// Message body
    pub content: String,
    /// Server-assigned creation time
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a message stamped with the current time
    pub fn new(
        id: impl Into<String>,
        conversation_id: impl Into<String>,
        author: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            conversation_id: conversation_id.into(),
            author: author.into(),
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// Presence reported for a user
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
    Away,
}

impl fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PresenceStatus::Online => "online",
            PresenceStatus::Offline => "offline",
            PresenceStatus::Away => "away",
        };
        f.write_str(s)
    }
}

/// Local view of one conversation
///
/// Messages are kept in arrival order, not timestamp order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationRecord {
    /// Conversation id, `None` until the first message is persisted
    pub conversation_id: Option<String>,
    /// Messages in arrival order
    pub messages: Vec<Message>,
    /// Whether the realtime connection is open
    pub connected: bool,
    /// Typing flag per user id
    pub typing: HashMap<String, bool>,
    /// Last reported presence per user id
    pub presence: HashMap<String, PresenceStatus>,
    /// A send is in flight
    pub pending: bool,
    /// Most recent error surfaced to the user
    pub last_error: Option<String>,
}

impl ConversationRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether a message with this id is already present
    pub fn contains_message(&self, id: &str) -> bool {
        self.messages.iter().any(|m| m.id == id)
    }

    /// Append a message unless one with the same id already exists
    ///
    /// Returns true if the message was appended.
    pub fn append_if_absent(&mut self, message: Message) -> bool {
        if self.contains_message(&message.id) {
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Users currently flagged as typing, sorted for stable display
    pub fn typing_users(&self) -> Vec<&str> {
        let mut users: Vec<&str> = self
            .typing
            .iter()
            .filter(|(_, typing)| **typing)
            .map(|(user, _)| user.as_str())
            .collect();
        users.sort_unstable();
        users
    }
}
