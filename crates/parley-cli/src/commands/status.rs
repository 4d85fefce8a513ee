//! Status command handler

use std::path::PathBuf;

use anyhow::Result;

use parley_core::transport::conversation_endpoint;
use parley_core::Config;

use crate::output::{Output, OutputFormat};

/// Show effective configuration and the realtime endpoint
pub fn show(
    config: &Config,
    config_path: Option<&PathBuf>,
    conversation: Option<String>,
    output: &Output,
) -> Result<()> {
    let endpoint = conversation
        .as_deref()
        .map(|id| conversation_endpoint(&config.realtime_url, id))
        .transpose()?;
    let config_file = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "config_file": config_file,
                    "api_url": config.api_url,
                    "realtime_url": config.realtime_url,
                    "user_id": config.user_id,
                    "authenticated": config.auth_token.is_some(),
                    "conversation": conversation,
                    "endpoint": endpoint
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", endpoint.as_deref().unwrap_or(&config.realtime_url));
        }
        OutputFormat::Human => {
            println!("Parley Status");
            println!("=============");
            println!();
            println!("Server:");
            println!("  API:      {}", config.api_url);
            println!("  Realtime: {}", config.realtime_url);
            println!(
                "  Auth:     {}",
                if config.auth_token.is_some() {
                    "token configured"
                } else {
                    "anonymous"
                }
            );
            println!();
            println!(
                "User: {}",
                config.user_id.as_deref().unwrap_or("(not set)")
            );
            if let (Some(id), Some(endpoint)) = (&conversation, &endpoint) {
                println!();
                println!("Conversation {}:", id);
                println!("  Endpoint: {}", endpoint);
            }
            println!();
            println!("Config file: {}", config_file.display());
        }
    }

    Ok(())
}
