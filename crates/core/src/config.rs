use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

use crate::error::Result;

pub const ENV_BACKEND_URL: &str = "WAYFINDER_BACKEND_URL";
pub const ENV_MODEL: &str = "WAYFINDER_MODEL";
pub const ENV_MCP_COMMAND: &str = "WAYFINDER_MCP_COMMAND";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Sampling temperature for the tool-selection prompt. Kept low so the
    /// backend sticks to the requested JSON shape.
    #[serde(default = "default_classify_temperature")]
    pub classify_temperature: f32,
    #[serde(default = "default_liveness_timeout_ms")]
    pub liveness_timeout_ms: u64,
    #[serde(default = "default_backend_timeout_secs")]
    pub request_timeout_secs: u64,
    /// HTTP proxy for backend requests. `Some("")` forces a direct connection.
    #[serde(default)]
    pub proxy: Option<String>,
}

fn default_api_base() -> String {
    "http://localhost:11434/api".to_string()
}

fn default_model() -> String {
    "qwen2.5:7b".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_top_p() -> f32 {
    0.9
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_classify_temperature() -> f32 {
    0.1
}

fn default_liveness_timeout_ms() -> u64 {
    2000
}

fn default_backend_timeout_secs() -> u64 {
    300
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            model: default_model(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tokens: default_max_tokens(),
            classify_temperature: default_classify_temperature(),
            liveness_timeout_ms: default_liveness_timeout_ms(),
            request_timeout_secs: default_backend_timeout_secs(),
            proxy: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportConfig {
    /// Label used in logs and status output.
    #[serde(default = "default_server_name")]
    pub server_name: String,
    /// Command line of the capability service, split on whitespace.
    #[serde(default = "default_command")]
    pub command: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default = "default_transport_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_server_name() -> String {
    "components".to_string()
}

fn default_command() -> String {
    "npx -y @wayfinder/component-mcp".to_string()
}

fn default_transport_timeout_secs() -> u64 {
    60
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            server_name: default_server_name(),
            command: default_command(),
            env: HashMap::new(),
            cwd: None,
            request_timeout_secs: default_transport_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub transport: TransportConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Defaults when `path` does not exist; a file that exists but does not
    /// parse is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply `WAYFINDER_*` environment overrides on top of the file values.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(url) = non_empty(ENV_BACKEND_URL) {
            debug!(url = %url, "Backend URL overridden from environment");
            self.backend.api_base = url;
        }
        if let Some(model) = non_empty(ENV_MODEL) {
            self.backend.model = model;
        }
        if let Some(command) = non_empty(ENV_MCP_COMMAND) {
            self.transport.command = command;
        }
    }

    pub fn backend_url(&self) -> String {
        self.backend.api_base.trim().trim_end_matches('/').to_string()
    }
}
