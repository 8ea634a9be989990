//! Git-backed [`VersionControl`] implementation.
//!
//! Network-facing operations (pull, commit, push, reset) shell out to the
//! `git` binary so the remote's configured credentials are used as-is.
//! Repository discovery and status checks go through git2.

use super::{CommitRef, PullOutcome, PushOutcome, VersionControl};
use crate::error::{RegistryError, Result};
use git2::{Repository, StatusOptions};
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Stderr fragments git prints when a pull cannot fast-forward.
const NOT_FAST_FORWARD_MARKERS: &[&str] = &[
    "not possible to fast-forward",
    "diverging branches",
    "would be overwritten by merge",
    "non-fast-forward",
];

/// Stderr fragments git prints when the remote refuses a push because the tip moved.
const PUSH_REJECTED_MARKERS: &[&str] = &[
    "[rejected]",
    "non-fast-forward",
    "fetch first",
    "stale info",
];

/// Find the working directory of the repository containing `start`.
///
/// Walks parent directories until a `.git` entry is found.
pub fn discover_root(start: &Path) -> Result<PathBuf> {
    let repo = Repository::discover(start).map_err(|source| RegistryError::Discovery {
        path: start.to_path_buf(),
        source,
    })?;

    match repo.workdir() {
        Some(dir) => Ok(dir.to_path_buf()),
        None => Err(RegistryError::Discovery {
            path: start.to_path_buf(),
            source: git2::Error::from_str("repository is bare"),
        }),
    }
}

/// Name of the branch HEAD points at, if any.
pub fn current_branch(root: &Path) -> Option<String> {
    Repository::open(root)
        .ok()?
        .head()
        .ok()
        .and_then(|head| head.shorthand().map(String::from))
}

/// Drives the `git` binary inside one working tree.
#[derive(Debug, Clone)]
pub struct GitClient {
    root: PathBuf,
    remote: String,
    branch: String,
    timeout: Duration,
    author: Option<(String, String)>,
}

impl GitClient {
    pub fn new(
        root: impl Into<PathBuf>,
        remote: impl Into<String>,
        branch: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            root: root.into(),
            remote: remote.into(),
            branch: branch.into(),
            timeout,
            author: None,
        }
    }

    /// Commit as this identity instead of the ambient git config.
    pub fn with_author(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.author = Some((name.into(), email.into()));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run `git <args>` in the working tree, bounded by the configured timeout.
    ///
    /// Returns the raw output; a non-zero exit is not an error here so callers
    /// can classify stderr themselves.
    async fn run(&self, args: &[&str]) -> Result<Output> {
        let label = args.first().copied().unwrap_or("git");
        debug!("git {}", args.join(" "));

        let mut command = Command::new("git");
        if let Some((name, email)) = &self.author {
            command
                .arg("-c")
                .arg(format!("user.name={}", name))
                .arg("-c")
                .arg(format!("user.email={}", email));
        }
        command
            .args(args)
            .current_dir(&self.root)
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true);

        match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(RegistryError::command(label, e.to_string())),
            Err(_) => {
                warn!("git {} timed out after {:?}", label, self.timeout);
                Err(RegistryError::command(
                    label,
                    format!("timed out after {}s", self.timeout.as_secs()),
                ))
            }
        }
    }

    /// Run a command that must succeed.
    async fn run_checked(&self, args: &[&str]) -> Result<String> {
        let output = self.run(args).await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(command_error(args, &output))
        }
    }
}

fn command_error(args: &[&str], output: &Output) -> RegistryError {
    let label = args.first().copied().unwrap_or("git");
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stderr = if stderr.is_empty() {
        format!("exit status {}", output.status)
    } else {
        stderr
    };
    RegistryError::command(label, stderr)
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    let haystack = haystack.to_lowercase();
    needles.iter().any(|needle| haystack.contains(needle))
}

impl VersionControl for GitClient {
    async fn is_working_tree_clean(&self) -> Result<bool> {
        let repo = Repository::open(&self.root).map_err(|source| RegistryError::Discovery {
            path: self.root.clone(),
            source,
        })?;

        let mut options = StatusOptions::new();
        options.include_untracked(false).include_ignored(false);

        let statuses = repo
            .statuses(Some(&mut options))
            .map_err(|e| RegistryError::command("status", e.message()))?;
        Ok(statuses.is_empty())
    }

    async fn pull_latest(&self, branch: &str) -> Result<PullOutcome> {
        let args = ["pull", "--ff-only", self.remote.as_str(), branch];
        let output = self.run(&args).await?;

        if output.status.success() {
            return Ok(PullOutcome::Updated);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if contains_any(&stderr, NOT_FAST_FORWARD_MARKERS) {
            debug!("pull could not fast-forward: {}", stderr.trim());
            Ok(PullOutcome::NotFastForward)
        } else {
            Err(command_error(&args, &output))
        }
    }

    async fn stage_and_commit(&self, paths: &[PathBuf], message: &str) -> Result<CommitRef> {
        let paths: Vec<String> = paths
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect();

        let mut add = vec!["add", "--"];
        add.extend(paths.iter().map(String::as_str));
        self.run_checked(&add).await?;

        if let Err(e) = self.run_checked(&["commit", "-m", message]).await {
            // Leave the index as the pull left it so the next pull can fast-forward.
            let mut unstage = vec!["reset", "-q", "--"];
            unstage.extend(paths.iter().map(String::as_str));
            if let Err(reset) = self.run_checked(&unstage).await {
                warn!("Failed to unstage after commit failure: {}", reset);
            }
            return Err(e);
        }
        let head = self.run_checked(&["rev-parse", "HEAD"]).await?;
        Ok(CommitRef(head))
    }

    async fn push(&self) -> Result<PushOutcome> {
        let refspec = format!("HEAD:{}", self.branch);
        let args = ["push", self.remote.as_str(), refspec.as_str()];
        let output = self.run(&args).await?;

        if output.status.success() {
            return Ok(PushOutcome::Pushed);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if contains_any(&stderr, PUSH_REJECTED_MARKERS) {
            Ok(PushOutcome::Rejected)
        } else {
            Err(command_error(&args, &output))
        }
    }

    async fn discard_last_commit(&self) -> Result<()> {
        self.run_checked(&["reset", "--hard", "HEAD~1"]).await?;
        Ok(())
    }
}
