//! Parley CLI
//!
//! Command-line client for Parley conversations.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use parley_core::Config;

mod commands;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Parley - realtime chat from the terminal")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Config file to use instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Send a message, creating a conversation if none is given
    Send {
        /// Conversation ID
        #[arg(short, long)]
        conversation: Option<String>,
        /// Message text
        text: String,
    },
    /// Follow a conversation until Ctrl-C
    Watch {
        /// Conversation ID
        conversation: String,
    },
    /// Show effective configuration and endpoints
    Status {
        /// Conversation ID to resolve the realtime endpoint for
        conversation: Option<String>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (api_url, realtime_url, user_id, auth_token, ...)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config_path = cli.config.as_ref();

    if let Commands::Config { command } = &cli.command {
        return match command.clone() {
            Some(ConfigCommands::Show) | None => commands::config::show(config_path, &output),
            Some(ConfigCommands::Set { key, value }) => {
                commands::config::set(key, value, config_path, &output)
            }
        };
    }

    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    init_logging(&config.log_level);

    match cli.command {
        Commands::Config { .. } => unreachable!(), // Handled above
        Commands::Send { conversation, text } => {
            commands::send::send(&config, conversation, text, &output).await
        }
        Commands::Watch { conversation } => {
            commands::watch::watch(&config, conversation, &output).await
        }
        Commands::Status { conversation } => {
            commands::status::show(&config, config_path, conversation, &output)
        }
    }
}

/// Log to stderr so stdout stays parseable; RUST_LOG overrides the config level
fn init_logging(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("parley_core={},parley_cli={}", log_level, log_level))
    });

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
