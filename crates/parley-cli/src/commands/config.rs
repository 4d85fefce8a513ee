//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use parley_core::Config;

use crate::output::{Output, OutputFormat};

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "api_url": config.api_url,
                    "realtime_url": config.realtime_url,
                    "user_id": config.user_id,
                    "auth_token": config.auth_token.as_ref().map(|_| "***"),
                    "typing_debounce_ms": config.typing_debounce_ms,
                    "log_level": config.log_level,
                    "reconnect": {
                        "initial_delay_ms": config.reconnect.initial_delay_ms,
                        "max_delay_ms": config.reconnect.max_delay_ms,
                        "min_delay_ms": config.reconnect.min_delay_ms,
                        "jitter": config.reconnect.jitter
                    }
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.api_url);
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  api_url:            {}", config.api_url);
            println!("  realtime_url:       {}", config.realtime_url);
            println!(
                "  user_id:            {}",
                config.user_id.as_deref().unwrap_or("(not set)")
            );
            println!(
                "  auth_token:         {}",
                if config.auth_token.is_some() {
                    "(set)"
                } else {
                    "(not set)"
                }
            );
            println!("  typing_debounce_ms: {}", config.typing_debounce_ms);
            println!("  log_level:          {}", config.log_level);
            println!(
                "  reconnect:          {}ms initial, {}ms max, {}ms min, jitter {}",
                config.reconnect.initial_delay_ms,
                config.reconnect.max_delay_ms,
                config.reconnect.min_delay_ms,
                config.reconnect.jitter
            );
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    apply(&mut config, &key, &value)?;

    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    let shown = if key == "auth_token" { "***" } else { value.as_str() };
    output.success(&format!("Set {} = {}", key, shown));

    Ok(())
}

fn optional(value: &str) -> Option<String> {
    if value.is_empty() || value == "none" {
        None
    } else {
        Some(value.to_string())
    }
}

fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "api_url" => config.api_url = value.to_string(),
        "realtime_url" => config.realtime_url = value.to_string(),
        "user_id" => config.user_id = optional(value),
        "auth_token" => config.auth_token = optional(value),
        "typing_debounce_ms" => {
            config.typing_debounce_ms = value
                .parse()
                .context("Invalid value for typing_debounce_ms. Use milliseconds.")?;
        }
        "log_level" => config.log_level = value.to_string(),
        "reconnect.initial_delay_ms" => {
            config.reconnect.initial_delay_ms = value
                .parse()
                .context("Invalid value for reconnect.initial_delay_ms")?;
        }
        "reconnect.max_delay_ms" => {
            config.reconnect.max_delay_ms = value
                .parse()
                .context("Invalid value for reconnect.max_delay_ms")?;
        }
        "reconnect.min_delay_ms" => {
            config.reconnect.min_delay_ms = value
                .parse()
                .context("Invalid value for reconnect.min_delay_ms")?;
        }
        "reconnect.jitter" => {
            config.reconnect.jitter = value
                .parse()
                .context("Invalid value for reconnect.jitter. Use a fraction like 0.2.")?;
        }
        _ => {
            bail!(
                "Unknown configuration key: '{}'\n\
                 Valid keys: api_url, realtime_url, user_id, auth_token, typing_debounce_ms, \
                 log_level, reconnect.initial_delay_ms, reconnect.max_delay_ms, \
                 reconnect.min_delay_ms, reconnect.jitter",
                key
            );
        }
    }
    Ok(())
}
