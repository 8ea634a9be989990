//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.agent-registry.toml` files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the configuration file looked up at the repository root.
pub const CONFIG_FILE: &str = ".agent-registry.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Registry file settings.
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Git remote settings.
    #[serde(default)]
    pub git: GitConfig,

    /// Retry and backoff settings.
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Where the registry lives and how its commits are labelled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Registry file path, relative to the repository root.
    #[serde(default = "default_registry_path")]
    pub path: PathBuf,

    /// Prefix for generated commit messages.
    #[serde(default = "default_commit_prefix")]
    pub commit_prefix: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: default_registry_path(),
            commit_prefix: default_commit_prefix(),
        }
    }
}

fn default_registry_path() -> PathBuf {
    PathBuf::from("agent_registry.json")
}

fn default_commit_prefix() -> String {
    "registry:".to_string()
}

/// Git remote settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    /// Remote to pull from and push to.
    #[serde(default = "default_remote")]
    pub remote: String,

    /// Tracking branch. Defaults to the currently checked-out branch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    /// Upper bound on any single git command.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_seconds: u64,

    /// Commit identity; the ambient git config is used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_email: Option<String>,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            remote: default_remote(),
            branch: None,
            command_timeout_seconds: default_command_timeout(),
            author_name: None,
            author_email: None,
        }
    }
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_command_timeout() -> u64 {
    120
}

/// Retry and backoff settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts before an update is abandoned.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Backoff after the first failed attempt; doubles per attempt.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Pulls that may fail to fast-forward without consuming an attempt.
    #[serde(default = "default_max_stalled_pulls")]
    pub max_stalled_pulls: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_stalled_pulls: default_max_stalled_pulls(),
        }
    }
}

fn default_max_retries() -> usize {
    5
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_stalled_pulls() -> usize {
    5
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from a repository root.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_from_repo(repo_root: &Path) -> Result<Option<Self>> {
        let config_path = repo_root.join(CONFIG_FILE);

        if config_path.exists() {
            Ok(Some(Self::load(&config_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// This method only overrides config when CLI provides explicit values.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref path) = args.registry {
            self.registry.path = path.clone();
        }
        if let Some(ref branch) = args.branch {
            self.git.branch = Some(branch.clone());
        }
        if let Some(max_retries) = args.max_retries {
            self.retry.max_retries = max_retries;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
