//! Configuration management for deepthink
//!
//! Settings come from an optional TOML file, then environment variables
//! (including a `.env` file loaded by the server binary), then CLI flags.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Environment variables that must be set (or present in the config file)
/// before the server will start.
pub const ENV_API_KEY: &str = "DEEPSEEK_R1_API_KEY";
pub const ENV_API_URL: &str = "DEEPSEEK_R1_API_URL";
pub const ENV_MODEL: &str = "DEEPSEEK_R1_MODEL";

/// Main configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub reasoner: ReasonerConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    /// Base port; the first free port at or above it is used
    #[serde(default = "default_port")]
    pub port: u16,
    /// How many consecutive ports to probe before giving up
    #[serde(default = "default_port_search_limit")]
    pub port_search_limit: u16,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Interval between SSE keep-alive comments
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// Per-session capacity of the inbound and outbound message queues
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub cors: CorsConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_port_search_limit() -> u16 {
    100
}

fn default_max_sessions() -> usize {
    100
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_queue_capacity() -> usize {
    64
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            port_search_limit: default_port_search_limit(),
            max_sessions: default_max_sessions(),
            keep_alive_secs: default_keep_alive_secs(),
            queue_capacity: default_queue_capacity(),
            cors: CorsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Allowed origins. Use "*" for any origin, or list specific origins.
    #[serde(default = "default_cors_origins")]
    pub origins: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            origins: default_cors_origins(),
        }
    }
}

/// Upstream chat-completions endpoint used by the thinking tool
#[derive(Clone, Deserialize, Serialize)]
pub struct ReasonerConfig {
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for ReasonerConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            api_key: None,
            model: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl std::fmt::Debug for ReasonerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReasonerConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log output format: "pretty" or "json"
    /// Override with LOG_FORMAT env var
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter string
    /// Override with RUST_LOG env var
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_log_level() -> String {
    "info,deepthink=debug".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: default_log_format(),
            log_level: default_log_level(),
        }
    }
}

/// Fully-resolved reasoner settings, produced by [`Config::validate`]
#[derive(Clone)]
pub struct ReasonerSettings {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl std::fmt::Debug for ReasonerSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReasonerSettings")
            .field("api_url", &self.api_url)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Expand ~ to home directory in path
pub fn expand_tilde(path: &Path) -> Result<PathBuf> {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(rest))
    } else if s == "~" {
        dirs::home_dir().ok_or_else(|| Error::Config("Cannot determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

impl Config {
    /// Load config from a TOML file, falling back to defaults when it does not exist
    pub fn load_or_default(config_path: &Path) -> Result<Self> {
        let config_path = expand_tilde(config_path)?;
        if config_path.exists() {
            let content = fs::read_to_string(&config_path)?;
            Ok(toml::from_str(&content)?)
        } else {
            Ok(Config::default())
        }
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides using an arbitrary variable lookup
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty(ENV_API_KEY) {
            self.reasoner.api_key = Some(key);
        }
        if let Some(url) = non_empty(ENV_API_URL) {
            self.reasoner.api_url = Some(url);
        }
        if let Some(model) = non_empty(ENV_MODEL) {
            self.reasoner.model = Some(model);
        }
        if let Some(host) = non_empty("HOST") {
            self.server.host = host;
        }
        if let Some(port) = non_empty("PORT") {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("PORT is not a valid port number: {}", port)))?;
        }
        if let Some(format) = non_empty("LOG_FORMAT") {
            self.observability.log_format = format;
        }
        if let Some(level) = non_empty("RUST_LOG") {
            self.observability.log_level = level;
        }
        Ok(())
    }

    /// Check that every required setting is present
    pub fn validate(&self) -> Result<ReasonerSettings> {
        let require = |value: &Option<String>, var: &str| {
            value
                .as_deref()
                .filter(|v| !v.trim().is_empty())
                .map(str::to_string)
                .ok_or_else(|| {
                    Error::Config(format!("Missing required environment variable: {}", var))
                })
        };

        let api_key = require(&self.reasoner.api_key, ENV_API_KEY)?;
        let api_url = require(&self.reasoner.api_url, ENV_API_URL)?;
        let model = require(&self.reasoner.model, ENV_MODEL)?;

        if self.server.port_search_limit == 0 {
            return Err(Error::Config(
                "server.port_search_limit must be at least 1".to_string(),
            ));
        }
        if self.server.queue_capacity == 0 {
            return Err(Error::Config(
                "server.queue_capacity must be at least 1".to_string(),
            ));
        }

        Ok(ReasonerSettings {
            api_url,
            api_key,
            model,
            timeout_secs: self.reasoner.timeout_secs,
        })
    }
}
