//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/parley/config.toml)
//! 3. Environment variables (PARLEY_* prefix)
//!
//! Environment variables take precedence over config file values.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::orchestrator::OrchestratorConfig;
use crate::transport::{BackoffPolicy, TokenSupplier};

/// Environment variable prefix
const ENV_PREFIX: &str = "PARLEY";

/// Reconnect tuning, in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub min_delay_ms: u64,
    /// Fraction of the base delay, 0.2 = ±20%
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            min_delay_ms: 500,
            jitter: 0.2,
        }
    }
}

impl ReconnectConfig {
    pub fn to_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            min_delay: Duration::from_millis(self.min_delay_ms),
            jitter: self.jitter.clamp(0.0, 1.0),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the HTTP API
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Base URL of the realtime socket endpoint
    #[serde(default = "default_realtime_url")]
    pub realtime_url: String,

    /// Local user id
    #[serde(default)]
    pub user_id: Option<String>,

    /// Bearer token for HTTP and the socket `token` query parameter
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Quiet period before a typing change is sent
    #[serde(default = "default_typing_debounce_ms")]
    pub typing_debounce_ms: u64,

    /// Default tracing level for the CLI
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            realtime_url: default_realtime_url(),
            user_id: None,
            auth_token: None,
            typing_debounce_ms: default_typing_debounce_ms(),
            log_level: default_log_level(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (PARLEY_API_URL, PARLEY_REALTIME_URL, ...)
    /// 2. Config file (~/.config/parley/config.toml or PARLEY_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load from an explicit path if given, else the default location
    pub fn load_with_cli_override(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(format!("{}_API_URL", ENV_PREFIX)) {
            self.api_url = val;
        }

        if let Ok(val) = std::env::var(format!("{}_REALTIME_URL", ENV_PREFIX)) {
            self.realtime_url = val;
        }

        if let Ok(val) = std::env::var(format!("{}_USER_ID", ENV_PREFIX)) {
            self.user_id = non_empty(val);
        }

        // Empty string clears the token
        if let Ok(val) = std::env::var(format!("{}_AUTH_TOKEN", ENV_PREFIX)) {
            self.auth_token = non_empty(val);
        }

        if let Ok(val) = std::env::var(format!("{}_TYPING_DEBOUNCE_MS", ENV_PREFIX)) {
            match val.parse() {
                Ok(ms) => self.typing_debounce_ms = ms,
                Err(_) => tracing::warn!(
                    "Ignoring invalid {}_TYPING_DEBOUNCE_MS: {:?}",
                    ENV_PREFIX,
                    val
                ),
            }
        }

        if let Ok(val) = std::env::var(format!("{}_LOG_LEVEL", ENV_PREFIX)) {
            self.log_level = val;
        }
    }

    /// Save configuration to the default file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific file
    pub fn save_to_path(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with PARLEY_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("parley")
            .join("config.toml")
    }

    /// Settings for a [`crate::SyncOrchestrator`]
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            realtime_url: self.realtime_url.clone(),
            user_id: self.user_id.clone(),
            typing_debounce: Duration::from_millis(self.typing_debounce_ms),
            backoff: self.reconnect.to_policy(),
        }
    }

    /// Supplier returning the configured auth token, if any
    pub fn token_supplier(&self) -> Option<TokenSupplier> {
        let token = self.auth_token.clone()?;
        Some(Arc::new(move || Some(token.clone())))
    }
}

fn non_empty(val: String) -> Option<String> {
    if val.is_empty() {
        None
    } else {
        Some(val)
    }
}

fn default_api_url() -> String {
    "http://localhost:3000/api/".to_string()
}

fn default_realtime_url() -> String {
    "ws://localhost:3000/ws".to_string()
}

fn default_typing_debounce_ms() -> u64 {
    200
}

fn default_log_level() -> String {
    "warn".to_string()
}
