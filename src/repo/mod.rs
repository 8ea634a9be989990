//! Version control plumbing.
//!
//! The orchestrator only talks to git through the [`VersionControl`] trait;
//! [`GitClient`] is the production implementation.

pub mod git;

pub use git::{current_branch, discover_root, GitClient};

use crate::error::Result;
use std::fmt;
use std::path::PathBuf;

/// Result of pulling the tracking branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    /// Local branch now matches (or fast-forwarded to) the remote tip.
    Updated,
    /// The pull could not fast-forward (diverged history or local changes in the way).
    NotFastForward,
}

/// Result of pushing the local commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed,
    /// The remote tip moved since our pull: the compare-and-swap failed.
    Rejected,
}

/// A commit id as printed by `git rev-parse`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommitRef(pub String);

impl CommitRef {
    /// First eight characters, for log lines.
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for CommitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The operations the update protocol needs from a version control system.
///
/// Implementations run each call to completion before returning; no call is
/// expected to be cancelled halfway.
#[allow(async_fn_in_trait)]
pub trait VersionControl {
    /// True when no tracked file has uncommitted changes.
    async fn is_working_tree_clean(&self) -> Result<bool>;

    /// Fast-forward the local branch to the remote `branch`.
    async fn pull_latest(&self, branch: &str) -> Result<PullOutcome>;

    /// Stage `paths` and commit them, returning the new commit.
    async fn stage_and_commit(&self, paths: &[PathBuf], message: &str) -> Result<CommitRef>;

    /// Publish the local commit to the remote tracking branch.
    async fn push(&self) -> Result<PushOutcome>;

    /// Drop the most recent local commit and its changes.
    async fn discard_last_commit(&self) -> Result<()>;
}
