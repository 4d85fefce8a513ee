//! Command handlers

pub mod config;
pub mod send;
pub mod status;
pub mod watch;

use std::sync::Arc;

use anyhow::{Context, Result};

use parley_core::{Config, ConversationStore, HttpConversationApi, SyncOrchestrator, WsConnector};

/// Wire an orchestrator from configuration, writing into `store`
pub fn orchestrator(config: &Config, store: Arc<ConversationStore>) -> Result<SyncOrchestrator> {
    let mut api = HttpConversationApi::new(&config.api_url)
        .with_context(|| format!("Invalid api_url: {}", config.api_url))?;
    if let Some(token) = config.token_supplier() {
        api = api.with_token_supplier(token);
    }

    Ok(SyncOrchestrator::new(
        config.orchestrator_config(),
        Arc::new(api),
        store,
        Arc::new(WsConnector),
        config.token_supplier(),
    ))
}
