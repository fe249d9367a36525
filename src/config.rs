//! LurchHome configuration management
//!
//! Configuration is read from an optional TOML file and then overridden by
//! environment variables, so a bare `HA_BASE_URL` / `HA_API_TOKEN` pair is
//! enough to start.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main LurchHome configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LurchConfig {
    /// Home Assistant connection
    #[serde(default)]
    pub home_assistant: HomeAssistantConfig,

    /// Language model configuration
    #[serde(default)]
    pub model: ModelConfig,

    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Home Assistant connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HomeAssistantConfig {
    /// Base URL, e.g. `http://homeassistant.local:8123`
    pub base_url: String,

    /// Long-lived access token
    pub api_token: String,

    /// Event types to subscribe to (empty = every event)
    pub event_types: Vec<String>,

    /// Timeout for correlated MCP calls in seconds
    pub request_timeout_secs: u64,

    /// Pause after a failed submission in milliseconds
    pub retry_backoff_ms: u64,

    /// Client name announced during the MCP handshake
    pub client_name: String,

    /// MCP tool queried before every turn for the current home status
    pub live_status_tool: String,
}

impl Default for HomeAssistantConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_token: String::new(),
            event_types: vec!["state_changed".to_string()],
            request_timeout_secs: 10,
            retry_backoff_ms: 1000,
            client_name: "LurchHome".to_string(),
            live_status_tool: "GetLiveContext".to_string(),
        }
    }
}

impl HomeAssistantConfig {
    /// Timeout applied to correlated MCP calls
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Backoff applied after a failed submission
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Server-sent events endpoint of the MCP server integration
    pub fn sse_url(&self) -> String {
        format!("{}/mcp_server/sse", self.base_url.trim_end_matches('/'))
    }

    /// WebSocket API endpoint derived from the base URL
    pub fn websocket_url(&self) -> Result<String> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| Error::Config(format!("Invalid base URL '{}': {}", self.base_url, e)))?;
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| Error::Config(format!("Cannot derive WebSocket URL from '{}'", self.base_url)))?;
        url.set_path("/api/websocket");
        Ok(url.to_string())
    }
}

/// OpenAI-compatible language model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Base URL of the chat completions API
    pub base_url: String,

    /// Model identifier
    pub model: String,

    /// Name of the environment variable holding the API key
    pub api_key_env: String,

    /// Upper bound of model round-trips per turn
    pub max_steps: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            max_steps: 8,
        }
    }
}

impl ModelConfig {
    /// Read the API key from the configured environment variable
    pub fn resolve_api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.is_empty())
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base directory for usage counters and recorded events
    pub base_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: dirs_next::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".lurchhome"),
        }
    }
}

impl LurchConfig {
    /// Load configuration from a TOML file (if any), then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                toml::from_str(&content)
                    .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply environment overrides using the given lookup
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(url) = lookup("HA_BASE_URL") {
            self.home_assistant.base_url = url;
        }
        if let Some(token) = lookup("HA_API_TOKEN") {
            self.home_assistant.api_token = token;
        }
        if let Some(model) = lookup("LURCH_LLM_MODEL") {
            self.model.model = model;
        }
        if let Some(url) = lookup("LURCH_LLM_BASE_URL") {
            self.model.base_url = url;
        }
        // SET_ENVIRONMENT_API_KEY names the variable that carries the model key
        if let Some(var) = lookup("SET_ENVIRONMENT_API_KEY") {
            self.model.api_key_env = var;
        }
    }

    /// Reject configurations that cannot reach Home Assistant
    pub fn validate(&self) -> Result<()> {
        if self.home_assistant.base_url.trim().is_empty() {
            return Err(Error::Config(
                "Home Assistant base URL is not set (HA_BASE_URL)".to_string(),
            ));
        }
        if self.home_assistant.api_token.trim().is_empty() {
            return Err(Error::Config(
                "Home Assistant API token is not set (HA_API_TOKEN)".to_string(),
            ));
        }
        self.home_assistant.websocket_url()?;
        Ok(())
    }
}
