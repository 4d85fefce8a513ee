//! Watch command handler

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use parley_core::{Config, ConversationRecord, ConversationStore, PresenceStatus};

use crate::output::{Event, Output};

/// Print conversation activity until Ctrl-C
pub async fn watch(config: &Config, conversation: String, output: &Output) -> Result<()> {
    let store = Arc::new(ConversationStore::new());
    let sync = super::orchestrator(config, store.clone())?;
    let mut rx = store.subscribe();

    sync.set_conversation(Some(&conversation));
    output.message(&format!("Watching {} (Ctrl-C to stop)", conversation));

    let mut tracker = Tracker::default();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let record = rx.borrow_and_update().clone();
                for event in tracker.diff(&record) {
                    output.print_event(&event);
                }
            }
        }
    }

    debug!("Stopping watch");
    sync.shutdown();
    Ok(())
}

/// Turns successive record snapshots into events
#[derive(Default)]
struct Tracker {
    messages_seen: usize,
    connected: bool,
    typing: Vec<String>,
    presence: HashMap<String, PresenceStatus>,
    last_error: Option<String>,
}

impl Tracker {
    fn diff(&mut self, record: &ConversationRecord) -> Vec<Event> {
        let mut events = Vec::new();

        // A cleared record starts over
        if record.messages.len() < self.messages_seen {
            self.messages_seen = 0;
        }

        if record.connected != self.connected {
            self.connected = record.connected;
            events.push(Event::Connected(record.connected));
        }

        for message in &record.messages[self.messages_seen..] {
            events.push(Event::Message(message.clone()));
        }
        self.messages_seen = record.messages.len();

        let typing: Vec<String> = record
            .typing_users()
            .into_iter()
            .map(str::to_string)
            .collect();
        if typing != self.typing {
            self.typing = typing.clone();
            events.push(Event::Typing(typing));
        }

        let mut changed: Vec<(&String, &PresenceStatus)> = record
            .presence
            .iter()
            .filter(|(user, status)| self.presence.get(*user) != Some(*status))
            .collect();
        changed.sort_by(|a, b| a.0.cmp(b.0));
        for (user_id, status) in changed {
            events.push(Event::Presence {
                user_id: user_id.clone(),
                status: *status,
            });
        }
        self.presence = record.presence.clone();

        if record.last_error != self.last_error {
            self.last_error = record.last_error.clone();
            if let Some(error) = &record.last_error {
                events.push(Event::Error(error.clone()));
            }
        }

        events
    }
}
