//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// agent-registry - coordinated updates to a git-hosted agent registry
///
/// Every write pulls the tracking branch, applies the change to the freshly
/// read registry, commits and pushes. A rejected push means another writer got
/// there first; the change is then re-applied on top of theirs.
///
/// Examples:
///   agent-registry add '{"id": "agent-7", "specialization": "parsing"}'
///   agent-registry remove agent-3,agent-4 --reason "low fitness"
///   agent-registry update-metrics agent-7 metrics.json
///   agent-registry show --summary
///   agent-registry init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Path to configuration file
    ///
    /// If not specified, looks for .agent-registry.toml at the repository root
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run in quiet mode (errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Registry file, relative to the repository root
    #[arg(long, value_name = "PATH", global = true, env = "AGENT_REGISTRY_PATH")]
    pub registry: Option<PathBuf>,

    /// Tracking branch to pull from and push to
    ///
    /// If not specified, uses the currently checked-out branch
    #[arg(short, long, value_name = "BRANCH", global = true)]
    pub branch: Option<String>,

    /// Attempts before giving up on a contended update
    #[arg(long, value_name = "COUNT", global = true)]
    pub max_retries: Option<usize>,

    /// Write the file without pulling, committing or pushing
    ///
    /// Only safe when something else already serializes writers.
    #[arg(long, global = true)]
    pub file_only: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Register a new live agent
    Add {
        /// Agent record as inline JSON or a path to a JSON file
        ///
        /// `spawned_at` defaults to the current time when omitted.
        #[arg(value_name = "AGENT_JSON|PATH")]
        agent: String,

        /// Commit message (defaults to a generated one)
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Take agents out of the live list
    Remove {
        /// Agent ids (comma-separated)
        #[arg(value_name = "IDS", value_delimiter = ',', required = true)]
        ids: Vec<String>,

        /// Why the agents are being removed
        #[arg(short, long)]
        reason: String,

        #[arg(short, long)]
        message: Option<String>,
    },

    /// Replace the metrics of one agent
    UpdateMetrics {
        #[arg(value_name = "AGENT_ID")]
        agent_id: String,

        /// Metrics as inline JSON or a path to a JSON file
        #[arg(value_name = "METRICS_JSON|PATH")]
        metrics: String,

        #[arg(short, long)]
        message: Option<String>,
    },

    /// Make a live agent the system lead
    SetLead {
        #[arg(value_name = "AGENT_ID")]
        agent_id: String,

        #[arg(short, long)]
        message: Option<String>,
    },

    /// Merge a registry snapshot produced elsewhere into the shared one
    Import {
        /// Registry document as inline JSON or a path to a JSON file
        #[arg(value_name = "REGISTRY_JSON|PATH")]
        snapshot: String,

        #[arg(short, long)]
        message: Option<String>,
    },

    /// Print the registry as stored on disk
    Show {
        /// Print counts and timestamps instead of the full document
        #[arg(long)]
        summary: bool,
    },

    /// Generate a default .agent-registry.toml configuration file
    InitConfig,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if self.max_retries == Some(0) {
            return Err("Max retries must be at least 1".to_string());
        }

        match &self.command {
            Command::Remove { ids, reason, .. } => {
                if ids.iter().all(|id| id.trim().is_empty()) {
                    return Err("At least one agent id is required".to_string());
                }
                if reason.trim().is_empty() {
                    return Err("Removal reason must not be empty".to_string());
                }
            }
            Command::UpdateMetrics { agent_id, .. } | Command::SetLead { agent_id, .. } => {
                if agent_id.trim().is_empty() {
                    return Err("Agent id must not be empty".to_string());
                }
            }
            _ => {}
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

/// Read a JSON object given either inline (leading `{`) or as a file path.
pub fn read_json_object(raw: &str) -> Result<Map<String, Value>, String> {
    let text = if raw.trim_start().starts_with('{') {
        raw.to_string()
    } else {
        let path = Path::new(raw);
        std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?
    };

    match serde_json::from_str(&text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("Expected a JSON object, got {}", json_kind(&other))),
        Err(e) => Err(format!("Invalid JSON: {}", e)),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
