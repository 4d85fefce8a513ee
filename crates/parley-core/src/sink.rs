//! State sink
//!
//! [`StateSink`] is the mutation surface the orchestrator writes to.
//! Every method is one complete mutation; implementations must apply it
//! atomically with respect to readers.
//!
//! [`ConversationStore`] is the in-process implementation. It keeps the
//! [`ConversationRecord`] inside a `tokio::sync::watch` channel so readers
//! can take snapshots or wait for changes.

use tokio::sync::watch;

use crate::models::{ConversationRecord, Message, PresenceStatus};

/// Mutation contract for the conversation record
pub trait StateSink: Send + Sync {
    /// Append unless a message with the same id exists. Returns true if appended.
    fn append_message_if_absent(&self, message: Message) -> bool;

    fn set_connected(&self, connected: bool);

    /// Overwrite one user's typing flag
    fn set_typing(&self, user_id: &str, is_typing: bool);

    fn set_conversation_id(&self, conversation_id: &str);

    /// Reset to the empty record
    fn clear(&self);

    fn set_presence(&self, _user_id: &str, _status: PresenceStatus) {}

    fn set_pending(&self, _pending: bool) {}

    fn set_error(&self, _error: Option<String>) {}
}

/// In-memory conversation record with change notification
#[derive(Debug)]
pub struct ConversationStore {
    record: watch::Sender<ConversationRecord>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore {
    pub fn new() -> Self {
        let (record, _) = watch::channel(ConversationRecord::new());
        Self { record }
    }

    /// Copy of the current record
    pub fn snapshot(&self) -> ConversationRecord {
        self.record.borrow().clone()
    }

    /// Read the record without cloning it
    pub fn read<R>(&self, f: impl FnOnce(&ConversationRecord) -> R) -> R {
        f(&self.record.borrow())
    }

    /// Watch for record changes
    pub fn subscribe(&self) -> watch::Receiver<ConversationRecord> {
        self.record.subscribe()
    }
}

impl StateSink for ConversationStore {
    fn append_message_if_absent(&self, message: Message) -> bool {
        self.record
            .send_if_modified(|record| record.append_if_absent(message))
    }

    fn set_connected(&self, connected: bool) {
        self.record.send_if_modified(|record| {
            let changed = record.connected != connected;
            record.connected = connected;
            changed
        });
    }

    fn set_typing(&self, user_id: &str, is_typing: bool) {
        self.record.send_if_modified(|record| {
            let previous = record.typing.insert(user_id.to_string(), is_typing);
            previous != Some(is_typing)
        });
    }

    fn set_conversation_id(&self, conversation_id: &str) {
        self.record.send_if_modified(|record| {
            if record.conversation_id.as_deref() == Some(conversation_id) {
                return false;
            }
            record.conversation_id = Some(conversation_id.to_string());
            true
        });
    }

    fn clear(&self) {
        self.record.send_replace(ConversationRecord::new());
    }

    fn set_presence(&self, user_id: &str, status: PresenceStatus) {
        self.record.send_if_modified(|record| {
            let previous = record.presence.insert(user_id.to_string(), status);
            previous != Some(status)
        });
    }

    fn set_pending(&self, pending: bool) {
        self.record.send_if_modified(|record| {
            let changed = record.pending != pending;
            record.pending = pending;
            changed
        });
    }

    fn set_error(&self, error: Option<String>) {
        self.record.send_if_modified(|record| {
            let changed = record.last_error != error;
            record.last_error = error;
            changed
        });
    }
}
