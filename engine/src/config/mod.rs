//! Configuration management
//!
//! This module handles loading, validation, and management of the orchestrator
//! configuration. Configuration is stored in TOML format at ~/.vibe/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, data directory
//! - **server**: HTTP bind address, request mode, CORS origins
//! - **capabilities**: Endpoints of the Decide / Plan / Generate services
//! - **store**: Conversation store backend
//! - **guard**: Phrase sets used by the phase guard
//!
//! # Environment
//!
//! `PORT` overrides `server.port`, so the service can be dropped behind a
//! platform that assigns the port at launch.
//!
//! # Examples
//!
//! ```no_run
//! use vibe_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//!
//! println!("Listening on {}:{}", config.server.host, config.server.port);
//! println!("Decide endpoint: {}", config.capabilities.decide_url);
//! # Ok(())
//! # }
//! ```

use sdk::errors::OrchestratorError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core settings
    #[serde(default)]
    pub core: CoreConfig,

    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Remote capability endpoints
    pub capabilities: CapabilitiesConfig,

    /// Conversation store settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Phase guard phrase sets
    #[serde(default)]
    pub guard: GuardConfig,
}

/// Core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

/// How `POST /chat` answers
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    /// 202 immediately, result delivered through the placeholder message
    #[default]
    Async,
    /// Block until the turn finishes
    Sync,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub mode: ChatMode,

    /// Allowed CORS origins; empty allows any origin
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            mode: ChatMode::default(),
            cors_origins: Vec::new(),
        }
    }
}

/// Remote capability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitiesConfig {
    /// Decide ("brain") endpoint
    pub decide_url: String,

    /// Plan ("architect") endpoint
    pub plan_url: String,

    /// Generate ("engineer") endpoint
    pub generate_url: String,

    /// Transport timeout per call, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Conversation store backend
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Memory,
}

/// Conversation store configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// SQLite database path; defaults to `<data_dir>/conversations.db`
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Phase guard configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Tokens that grant permission while awaiting it
    #[serde(default = "default_affirmative_tokens")]
    pub affirmative_tokens: Vec<String>,

    /// Phrases in an assistant reply that amount to asking for permission
    #[serde(default = "default_permission_phrases")]
    pub permission_phrases: Vec<String>,

    /// Reply substituted when the decision service tries to plan without permission
    #[serde(default = "default_confirmation_prompt")]
    pub confirmation_prompt: String,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            affirmative_tokens: default_affirmative_tokens(),
            permission_phrases: default_permission_phrases(),
            confirmation_prompt: default_confirmation_prompt(),
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.vibe")
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_affirmative_tokens() -> Vec<String> {
    ["yes", "yep", "ok", "sounds good", "do it", "perfect"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_permission_phrases() -> Vec<String> {
    [
        "shall i proceed",
        "should i proceed",
        "may i proceed",
        "can i proceed",
        "do you want me to proceed",
        "would you like me to proceed",
        "shall i go ahead",
        "should i go ahead",
        "do i have your permission",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_confirmation_prompt() -> String {
    "Before I hand this to the architect, I want to make sure we're aligned on what to build. \
     Shall I proceed with creating a plan?"
        .to_string()
}

fn default_capabilities() -> CapabilitiesConfig {
    CapabilitiesConfig {
        decide_url: "http://localhost:3400/decide".to_string(),
        plan_url: "http://localhost:3400/plan".to_string(),
        generate_url: "http://localhost:3400/generate".to_string(),
        timeout_secs: default_timeout_secs(),
    }
}

impl Config {
    /// Load configuration from the default location (~/.vibe/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, OrchestratorError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, OrchestratorError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| OrchestratorError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&contents)
    }

    /// Parse, apply environment overrides and validate
    pub fn from_toml_str(contents: &str) -> Result<Self, OrchestratorError> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|e| OrchestratorError::Config(format!("Failed to parse config: {}", e)))?;

        config.apply_env_overrides();
        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, OrchestratorError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                OrchestratorError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let mut config = Self::default_config();

        // Written before env overrides so PORT never ends up in the file
        let toml_string = toml::to_string_pretty(&config).map_err(|e| {
            OrchestratorError::Config(format!("Failed to serialize config: {}", e))
        })?;

        fs::write(path, toml_string).map_err(|e| {
            OrchestratorError::Config(format!("Failed to write config file: {}", e))
        })?;

        config.apply_env_overrides();
        config.validate_and_process()?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.vibe/config.toml)
    fn default_config_path() -> Result<PathBuf, OrchestratorError> {
        let home = dirs::home_dir().ok_or_else(|| {
            OrchestratorError::Config("Could not determine home directory".to_string())
        })?;

        Ok(home.join(".vibe").join("config.toml"))
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            core: CoreConfig::default(),
            server: ServerConfig::default(),
            capabilities: default_capabilities(),
            store: StoreConfig::default(),
            guard: GuardConfig::default(),
        }
    }

    /// Path of the SQLite database backing the conversation store
    pub fn store_path(&self) -> PathBuf {
        self.store
            .path
            .clone()
            .unwrap_or_else(|| self.core.data_dir.join("conversations.db"))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("PORT") {
            match port.trim().parse::<u16>() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!("Ignoring invalid PORT value '{}'", port),
            }
        }
    }

    /// Validate and process configuration
    ///
    /// Expands ~ in paths and creates the data directory.
    fn validate_and_process(&mut self) -> Result<(), OrchestratorError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(OrchestratorError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        for (name, url) in [
            ("decide_url", &self.capabilities.decide_url),
            ("plan_url", &self.capabilities.plan_url),
            ("generate_url", &self.capabilities.generate_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(OrchestratorError::Config(format!(
                    "{} must be an http(s) URL, got '{}'",
                    name, url
                )));
            }
        }

        if self.capabilities.timeout_secs == 0 {
            return Err(OrchestratorError::Config(
                "capabilities.timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self
            .guard
            .affirmative_tokens
            .iter()
            .all(|t| t.trim().is_empty())
        {
            return Err(OrchestratorError::Config(
                "guard.affirmative_tokens must contain at least one token".to_string(),
            ));
        }

        self.core.data_dir = expand_path(&self.core.data_dir)?;
        if let Some(path) = &self.store.path {
            self.store.path = Some(expand_path(path)?);
        }

        if self.store.backend == StoreBackend::Sqlite && !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                OrchestratorError::Config(format!("Failed to create data directory: {}", e))
            })?;
        }

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, OrchestratorError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| OrchestratorError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir().ok_or_else(|| {
            OrchestratorError::Config("Could not determine home directory".to_string())
        })?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir().ok_or_else(|| {
            OrchestratorError::Config("Could not determine home directory".to_string())
        })
    } else {
        Ok(path.to_path_buf())
    }
}
