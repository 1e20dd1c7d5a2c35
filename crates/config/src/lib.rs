//! Configuration loading, validation, and management for the overlay agent.
//!
//! Loads configuration from `~/.overlay-agent/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Environment variable naming the install directory the tool server lives under.
pub const HOME_ENV: &str = "OVERLAY_HOME";

/// The root configuration structure.
///
/// Maps directly to `~/.overlay-agent/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Completion endpoint
    #[serde(default)]
    pub llm: LlmConfig,

    /// Tool server subprocess
    #[serde(default)]
    pub mcp: McpConfig,

    /// Tool-call resolution loop
    #[serde(default)]
    pub resolution: ResolutionConfig,

    /// Conversation storage
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of the local completion server
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Prepended to every chat relay request
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Whole-request timeout for non-streaming completions
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:11434".into()
}
fn default_model() -> String {
    "gemma:2b".into()
}
fn default_system_prompt() -> String {
    "[ Instructions ] You are a helpful assistant. Utilize markdown when appropriate and stay on topic."
        .into()
}
fn default_request_timeout() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            system_prompt: default_system_prompt(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// How the tool server is launched and spoken to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    /// Executable; defaults to the bundled virtualenv interpreter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Arguments; defaults to `-u <home>/mcp/mcp_server.py`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,

    /// Per-call RPC timeout, handshake included
    #[serde(default = "default_rpc_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,

    #[serde(default = "default_client_name")]
    pub client_name: String,

    #[serde(default = "default_client_version")]
    pub client_version: String,

    /// Extra environment for the subprocess
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_rpc_timeout() -> u64 {
    30
}
fn default_protocol_version() -> String {
    "v1".into()
}
fn default_client_name() -> String {
    "overlay-agent".into()
}
fn default_client_version() -> String {
    "1.0.0".into()
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: None,
            timeout_secs: default_rpc_timeout(),
            protocol_version: default_protocol_version(),
            client_name: default_client_name(),
            client_version: default_client_version(),
            env: BTreeMap::new(),
        }
    }
}

/// A fully resolved subprocess command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl McpConfig {
    /// Resolve the command line against an install directory.
    ///
    /// Unset fields fall back to `<home>/mcp/.venv` and `<home>/mcp/mcp_server.py`.
    /// `PYTHONUNBUFFERED=1` is always set.
    pub fn launch_command(&self, home: &Path) -> LaunchCommand {
        let program = match &self.command {
            Some(command) => PathBuf::from(command),
            None => default_interpreter(home),
        };
        let args = match &self.args {
            Some(args) => args.clone(),
            None => vec![
                "-u".into(),
                home.join("mcp")
                    .join("mcp_server.py")
                    .to_string_lossy()
                    .into_owned(),
            ],
        };
        let mut env = self.env.clone();
        env.entry("PYTHONUNBUFFERED".into())
            .or_insert_with(|| "1".into());
        LaunchCommand { program, args, env }
    }
}

fn default_interpreter(home: &Path) -> PathBuf {
    let venv = home.join("mcp").join(".venv");
    #[cfg(target_os = "windows")]
    {
        venv.join("Scripts").join("python.exe")
    }
    #[cfg(not(target_os = "windows"))]
    {
        venv.join("bin").join("python")
    }
}

/// What a turn does when no valid tool call was produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    /// Answer without tool context
    #[default]
    Continue,
    /// Fail the turn with an error event
    Abort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default)]
    pub on_exhausted: ExhaustionPolicy,
}

fn default_max_attempts() -> u32 {
    5
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            on_exhausted: ExhaustionPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file; defaults to `<config dir>/app.db`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl AppConfig {
    /// Load configuration from the default path (~/.overlay-agent/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `OVERLAY_MODEL`
    /// - `OVERLAY_LLM_URL`
    /// - `DB_PATH`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
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

    /// Apply overrides from an environment lookup.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(model) = lookup("OVERLAY_MODEL") {
            self.llm.model = model;
        }
        if let Some(url) = lookup("OVERLAY_LLM_URL") {
            self.llm.base_url = url;
        }
        if let Some(path) = lookup("DB_PATH") {
            self.store.path = Some(PathBuf::from(path));
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".overlay-agent")
    }

    /// The install directory: `OVERLAY_HOME`, else the executable's directory.
    pub fn install_home() -> PathBuf {
        if let Ok(home) = std::env::var(HOME_ENV) {
            return PathBuf::from(home);
        }
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Path of the conversation database.
    pub fn database_path(&self) -> PathBuf {
        self.store
            .path
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("app.db"))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.llm.base_url.starts_with("http://") || self.llm.base_url.starts_with("https://"))
        {
            return Err(ConfigError::ValidationError(format!(
                "llm.base_url must be an http(s) URL, got '{}'",
                self.llm.base_url
            )));
        }

        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "llm.model must not be empty".into(),
            ));
        }

        if self.mcp.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "mcp.timeout_secs must be > 0".into(),
            ));
        }

        if self.resolution.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "resolution.max_attempts must be >= 1".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
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
