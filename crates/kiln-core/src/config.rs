//! Configuration management for kiln
//!
//! Workspace-level settings: which language model to talk to, how file
//! mutations are confirmed, how much history is kept, and extra safety rules.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::{KilnError, Result};

/// Directory holding kiln state inside a workspace
pub const KILN_DIR: &str = ".kiln";

/// Workspace-level kiln configuration
///
/// Loaded from `.kiln/config.toml` in the workspace root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KilnConfig {
    /// Language model provider selection
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Step execution behavior
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Additions to the built-in safety rule table
    #[serde(default)]
    pub safety: SafetyConfig,

    /// Free-form user preferences surfaced into every task context
    #[serde(default)]
    pub preferences: BTreeMap<String, String>,
}

/// Which provider implementation backs the planner and executor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Anthropic,
    Ollama,
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "ollama" | "local" => Ok(Self::Ollama),
            _ => Err(format!("Invalid provider: {}. Use anthropic or ollama.", s)),
        }
    }
}

/// Language model provider configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,

    #[serde(default = "default_model")]
    pub model: String,

    /// Base URL; each provider has its own default
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Environment variable containing the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    #[serde(default)]
    pub temperature: Option<f32>,
}

/// Step execution configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Ask before `modify`/`replace` overwrite existing content
    #[serde(default = "default_true")]
    pub require_confirmation: bool,

    /// Task results kept in history
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// History file, relative to the workspace root
    #[serde(default = "default_history_file")]
    pub history_file: PathBuf,
}

/// Safety rule additions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyConfig {
    #[serde(default)]
    pub extra_dangerous_commands: Vec<String>,

    #[serde(default)]
    pub extra_sensitive_paths: Vec<String>,

    /// Payloads above this size draw a warning
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
}

// Default value providers
fn default_model() -> String {
    "claude-sonnet-4-5-20250929".to_string()
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_max_tokens() -> usize {
    8192
}

fn default_true() -> bool {
    true
}

fn default_max_history() -> usize {
    50
}

fn default_history_file() -> PathBuf {
    PathBuf::from(KILN_DIR).join("history.json")
}

fn default_max_payload_bytes() -> usize {
    1024 * 1024
}

impl KilnConfig {
    /// Load configuration from `.kiln/config.toml` or use defaults
    pub fn load_or_default(workspace_root: &Path) -> Result<Self> {
        let config_path = workspace_root.join(KILN_DIR).join("config.toml");

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)
                .map_err(|e| KilnError::Config(format!("Failed to parse config file: {}", e)))
        } else {
            Ok(Self::default())
        }
    }

    /// Write default configuration to `.kiln/config.toml`
    pub fn write_default(workspace_root: &Path) -> Result<PathBuf> {
        let config_dir = workspace_root.join(KILN_DIR);
        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join("config.toml");
        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| KilnError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(&config_path, content)?;
        Ok(config_path)
    }

    /// Absolute path of the history file for a workspace
    pub fn history_path(&self, workspace_root: &Path) -> PathBuf {
        if self.execution.history_file.is_absolute() {
            self.execution.history_file.clone()
        } else {
            workspace_root.join(&self.execution.history_file)
        }
    }
}

impl Default for KilnConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            execution: ExecutionConfig::default(),
            safety: SafetyConfig::default(),
            preferences: BTreeMap::new(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            model: default_model(),
            endpoint: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
            max_tokens: default_max_tokens(),
            temperature: None,
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            require_confirmation: default_true(),
            max_history: default_max_history(),
            history_file: default_history_file(),
        }
    }
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            extra_dangerous_commands: Vec::new(),
            extra_sensitive_paths: Vec::new(),
            max_payload_bytes: default_max_payload_bytes(),
        }
    }
}
