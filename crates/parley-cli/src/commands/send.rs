//! Send command handler

use std::sync::Arc;

use anyhow::{Context, Result};

use parley_core::{Config, ConversationStore};

use crate::output::Output;

/// Send one message and print it as stored
pub async fn send(
    config: &Config,
    conversation: Option<String>,
    text: String,
    output: &Output,
) -> Result<()> {
    let store = Arc::new(ConversationStore::new());
    let sync = super::orchestrator(config, store)?;

    if let Some(id) = conversation.as_deref() {
        sync.set_conversation(Some(id));
    }

    let result = sync.send_message(&text).await;
    sync.shutdown();
    let message = result.context("Failed to send message")?;

    if conversation.is_none() && !output.is_quiet() {
        output.message(&format!("Created conversation {}", message.conversation_id));
    }
    output.print_message(&message);

    Ok(())
}
