//! Configuration loading, validation, and management for DeskPilot.
//!
//! Loads configuration from `~/.deskpilot/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.deskpilot/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default completion provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per completion
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Model used when a request asks for search augmentation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_model: Option<String>,

    /// Round controller settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Streaming relay settings
    #[serde(default)]
    pub relay: RelayConfig,

    /// Message log storage
    #[serde(default)]
    pub store: StoreConfig,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,

    /// Assistant profiles served by the engine, keyed by name
    #[serde(default = "default_assistants")]
    pub assistants: BTreeMap<String, AssistantConfig>,
}

fn default_provider() -> String {
    "openrouter".into()
}
fn default_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_tokens() -> u32 {
    2048
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("search_model", &self.search_model)
            .field("engine", &self.engine)
            .field("relay", &self.relay)
            .field("store", &self.store)
            .field("gateway", &self.gateway)
            .field("providers", &self.providers)
            .field("assistants", &self.assistants)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

/// Settings for the round controller and its collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum tool rounds per user turn before forced finalization
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    /// Upper bound for a single completion call
    #[serde(default = "default_completion_timeout")]
    pub completion_timeout_secs: u64,

    /// Upper bound for a single tool invocation
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,

    /// Upper bound for the external lookup tool's side-channel call
    #[serde(default = "default_lookup_timeout")]
    pub lookup_timeout_secs: u64,

    /// Dispatch sibling tool calls of one round concurrently
    #[serde(default = "default_true")]
    pub parallel_tools: bool,

    /// Use the provider's streaming endpoint for completion calls
    #[serde(default)]
    pub stream_upstream: bool,

    /// Session titles are cut to this many characters
    #[serde(default = "default_title_max_chars")]
    pub title_max_chars: usize,
}

fn default_max_rounds() -> u32 {
    6
}
fn default_completion_timeout() -> u64 {
    60
}
fn default_tool_timeout() -> u64 {
    30
}
fn default_lookup_timeout() -> u64 {
    45
}
fn default_title_max_chars() -> usize {
    50
}
fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            completion_timeout_secs: default_completion_timeout(),
            tool_timeout_secs: default_tool_timeout(),
            lookup_timeout_secs: default_lookup_timeout(),
            parallel_tools: true,
            stream_upstream: false,
            title_max_chars: default_title_max_chars(),
        }
    }
}

/// How the final answer is paced out to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Characters per chunk event
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Delay between chunk events (0 = no delay)
    #[serde(default)]
    pub interval_ms: u64,
}

fn default_chunk_size() -> usize {
    32
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            interval_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// "sqlite" or "memory"
    #[serde(default = "default_store_backend")]
    pub backend: String,

    /// SQLite database path (defaults to ~/.deskpilot/sessions.sqlite)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

fn default_store_backend() -> String {
    "sqlite".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: None,
        }
    }
}

impl StoreConfig {
    /// The database path to open, falling back to the config directory.
    pub fn resolved_path(&self) -> String {
        self.path.clone().unwrap_or_else(|| {
            AppConfig::config_dir()
                .join("sessions.sqlite")
                .display()
                .to_string()
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    42618
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

/// One assistant profile: the same engine with its own prompt and tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    pub system_prompt: String,

    /// Tool names this assistant may use. Empty = every registered tool.
    #[serde(default)]
    pub tools: Vec<String>,
}

fn default_assistants() -> BTreeMap<String, AssistantConfig> {
    let mut assistants = BTreeMap::new();
    assistants.insert(
        "ops".into(),
        AssistantConfig {
            system_prompt: "You are the operations assistant for a business dashboard. \
                Use the available tools to look up and update records. \
                Answer concisely and name the records you used."
                .into(),
            tools: vec![],
        },
    );
    assistants.insert(
        "support".into(),
        AssistantConfig {
            system_prompt: "You are a support assistant. Help the user understand their \
                records and the product. Never change records unless the user asks explicitly."
                .into(),
            tools: vec![
                "search_records".into(),
                "get_record".into(),
                "web_lookup".into(),
            ],
        },
    );
    assistants
}

impl AppConfig {
    /// Load configuration from the default path (~/.deskpilot/config.toml).
    ///
    /// Also checks environment variables for API keys:
    /// - `DESKPILOT_API_KEY` (highest priority)
    /// - `OPENROUTER_API_KEY`
    /// - `OPENAI_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("DESKPILOT_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENROUTER_API_KEY").ok())
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(provider) = std::env::var("DESKPILOT_PROVIDER") {
            config.default_provider = provider;
        }

        if let Ok(model) = std::env::var("DESKPILOT_MODEL") {
            config.default_model = model;
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".deskpilot")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.engine.max_rounds == 0 {
            return Err(ConfigError::ValidationError(
                "engine.max_rounds must be at least 1".into(),
            ));
        }

        if self.relay.chunk_size == 0 {
            return Err(ConfigError::ValidationError(
                "relay.chunk_size must be at least 1".into(),
            ));
        }

        if !matches!(self.store.backend.as_str(), "sqlite" | "memory") {
            return Err(ConfigError::ValidationError(format!(
                "store.backend must be \"sqlite\" or \"memory\", got \"{}\"",
                self.store.backend
            )));
        }

        if self.assistants.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one assistant profile is required".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// A copy with every secret replaced, for printing.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.api_key.is_some() {
            config.api_key = Some(redact(&config.api_key).to_string());
        }
        for provider in config.providers.values_mut() {
            if provider.api_key.is_some() {
                provider.api_key = Some(redact(&provider.api_key).to_string());
            }
        }
        config
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            search_model: None,
            engine: EngineConfig::default(),
            relay: RelayConfig::default(),
            store: StoreConfig::default(),
            gateway: GatewayConfig::default(),
            providers: BTreeMap::new(),
            assistants: default_assistants(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
