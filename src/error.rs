//! Error taxonomy for registry updates.
//!
//! Every failure the orchestrator can observe maps onto one variant here.
//! `is_retryable` is what the retry loop consults for non-conflict faults.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while reading, transforming or publishing the registry.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// No `.git` directory at or above the starting directory.
    #[error("no git repository found at or above {path}")]
    Discovery {
        path: PathBuf,
        #[source]
        source: git2::Error,
    },

    /// A git command exited non-zero, could not be spawned, or timed out.
    #[error("git {command} failed: {stderr}")]
    Command { command: String, stderr: String },

    /// The remote refused to advance the branch.
    #[error("push rejected by remote (branch moved)")]
    PushConflict,

    /// The on-disk registry is not valid JSON for the registry schema.
    #[error("failed to decode registry {}: {source}", path.display())]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A snapshot could not be rendered as JSON.
    #[error("failed to encode registry: {0}")]
    Encoding(#[source] serde_json::Error),

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Tracked files have uncommitted changes before the update started.
    #[error("working tree has uncommitted changes to tracked files")]
    DirtyWorkingTree,

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("invalid agent record: {0}")]
    InvalidRecord(String),

    /// Retries were exhausted.
    #[error("registry update failed after {attempts} attempt(s): {last}")]
    UpdateFailed { attempts: usize, last: String },
}

impl RegistryError {
    pub fn command(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::Command {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether another pull/transform/push attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            RegistryError::Command { .. } | RegistryError::PushConflict => true,

            RegistryError::Discovery { .. }
            | RegistryError::Serialization { .. }
            | RegistryError::Encoding(_)
            | RegistryError::Io { .. }
            | RegistryError::DirtyWorkingTree
            | RegistryError::AgentNotFound(_)
            | RegistryError::InvalidRecord(_)
            | RegistryError::UpdateFailed { .. } => false,
        }
    }
}

pub type Result<T, E = RegistryError> = std::result::Result<T, E>;
