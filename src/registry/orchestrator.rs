//! The pull → read → transform → write → commit → push cycle.
//!
//! Writers never lock the registry. Each attempt re-reads ground truth after
//! pulling, applies the caller's transform, and tries to push; a rejected push
//! means another writer won the race, so the local commit is discarded and the
//! whole cycle runs again after an exponential backoff.

use crate::error::{RegistryError, Result};
use crate::models::Registry;
use crate::registry::store;
use crate::repo::{CommitRef, PullOutcome, PushOutcome, VersionControl};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Settings injected into an orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Working tree root.
    pub root: PathBuf,
    /// Registry file, relative to `root`.
    pub registry_path: PathBuf,
    /// Tracking branch to pull from.
    pub branch: String,
    /// Total pull-transform-push attempts before giving up.
    pub max_retries: usize,
    /// Delay after the first failed attempt; doubles each time.
    pub base_delay: Duration,
    /// Pulls that may fail to fast-forward without consuming an attempt.
    pub max_stalled_pulls: usize,
}

impl OrchestratorConfig {
    /// Absolute location of the registry file.
    pub fn registry_file(&self) -> PathBuf {
        self.root.join(&self.registry_path)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.base_delay)
    }
}

/// Exponential backoff: `base * 2^attempt`.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
}

impl Backoff {
    pub fn new(base: Duration) -> Self {
        Self { base }
    }

    /// Delay after the zero-based `attempt` failed.
    pub fn delay(&self, attempt: usize) -> Duration {
        let factor = u32::try_from(attempt)
            .ok()
            .and_then(|a| 2u32.checked_pow(a))
            .unwrap_or(u32::MAX);
        self.base.saturating_mul(factor)
    }

    async fn wait(&self, attempt: usize) {
        let delay = self.delay(attempt);
        if !delay.is_zero() {
            debug!("Backing off for {:?}", delay);
            tokio::time::sleep(delay).await;
        }
    }
}

/// What an update produced.
#[derive(Debug, Clone)]
pub struct UpdateOutcome<T> {
    /// The published commit; `None` when nothing changed or in file-only mode.
    pub commit: Option<CommitRef>,
    /// Attempts consumed, including the successful one.
    pub attempts: usize,
    /// Whether the registry file was rewritten.
    pub changed: bool,
    /// The snapshot as written (or as found, when unchanged).
    pub registry: Registry,
    /// Metadata returned by the transform on the final attempt.
    pub output: T,
}

/// Classification of one pull-to-push pass.
enum AttemptOutcome<T> {
    Published {
        commit: CommitRef,
        registry: Registry,
        output: T,
    },
    Unchanged {
        registry: Registry,
        output: T,
    },
    /// The pull could not fast-forward; does not count as an attempt.
    Stalled,
    /// The push was rejected because the remote moved.
    Conflict,
    /// A git command failed in a way another attempt may fix.
    Retryable(RegistryError),
    Fatal(RegistryError),
}

/// Coordinates registry updates through a [`VersionControl`] remote.
pub struct UpdateOrchestrator<V> {
    vcs: V,
    config: OrchestratorConfig,
}

impl<V: VersionControl> UpdateOrchestrator<V> {
    pub fn new(vcs: V, config: OrchestratorConfig) -> Self {
        Self { vcs, config }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Apply `transform` with full optimistic concurrency control.
    ///
    /// The transform runs once per attempt against the snapshot read right
    /// after that attempt's pull, so it must be a pure function of its input.
    /// Succeeds without committing when the transform changes nothing.
    pub async fn update_with_occ<T, F>(&self, mut transform: F, message: &str) -> Result<UpdateOutcome<T>>
    where
        F: FnMut(Registry) -> Result<(Registry, T)>,
    {
        if !self.vcs.is_working_tree_clean().await? {
            return Err(RegistryError::DirtyWorkingTree);
        }

        let backoff = self.config.backoff();
        let max_retries = self.config.max_retries.max(1);
        let mut attempts = 0;
        let mut stalled = 0;

        loop {
            debug!("Attempt {}/{}", attempts + 1, max_retries);

            let last = match self.attempt(&mut transform, message).await {
                AttemptOutcome::Published {
                    commit,
                    registry,
                    output,
                } => {
                    info!(
                        "Published registry update {} after {} attempt(s)",
                        commit.short(),
                        attempts + 1
                    );
                    return Ok(UpdateOutcome {
                        commit: Some(commit),
                        attempts: attempts + 1,
                        changed: true,
                        registry,
                        output,
                    });
                }
                AttemptOutcome::Unchanged { registry, output } => {
                    info!("Registry already up to date; nothing to commit");
                    return Ok(UpdateOutcome {
                        commit: None,
                        attempts: attempts + 1,
                        changed: false,
                        registry,
                        output,
                    });
                }
                AttemptOutcome::Stalled => {
                    stalled += 1;
                    if stalled > self.config.max_stalled_pulls {
                        return Err(RegistryError::UpdateFailed {
                            attempts,
                            last: format!("pull could not fast-forward {} times", stalled),
                        });
                    }
                    warn!("Pull could not fast-forward; waiting before pulling again");
                    backoff.wait(stalled - 1).await;
                    continue;
                }
                AttemptOutcome::Conflict => {
                    warn!("Push rejected: another writer updated the registry");
                    RegistryError::PushConflict
                }
                AttemptOutcome::Retryable(e) => {
                    warn!("Attempt failed: {}", e);
                    e
                }
                AttemptOutcome::Fatal(e) => return Err(e),
            };

            attempts += 1;
            if attempts >= max_retries {
                return Err(RegistryError::UpdateFailed {
                    attempts,
                    last: last.to_string(),
                });
            }
            backoff.wait(attempts - 1).await;
        }
    }

    /// Apply `transform` to the local file only: no pull, commit or push.
    ///
    /// This gives up the compare-and-swap guarantee entirely. Concurrent
    /// writers can silently overwrite each other, so it is only safe when the
    /// caller already serializes access to the registry by other means.
    pub async fn update_file_only<T, F>(&self, transform: F) -> Result<UpdateOutcome<T>>
    where
        F: FnOnce(Registry) -> Result<(Registry, T)>,
    {
        let path = self.config.registry_file();
        let current = store::load(&path)?;
        let before = store::encode(&current)?;

        let (next, output) = transform(current)?;
        let changed = store::encode(&next)? != before;
        if changed {
            store::save(&path, &next)?;
            info!("Wrote {} (file-only, not committed)", path.display());
        } else {
            info!("Registry already up to date");
        }

        Ok(UpdateOutcome {
            commit: None,
            attempts: 1,
            changed,
            registry: next,
            output,
        })
    }

    async fn attempt<T, F>(&self, transform: &mut F, message: &str) -> AttemptOutcome<T>
    where
        F: FnMut(Registry) -> Result<(Registry, T)>,
    {
        debug!("Pulling {}", self.config.branch);
        match self.vcs.pull_latest(&self.config.branch).await {
            Ok(PullOutcome::Updated) => {}
            Ok(PullOutcome::NotFastForward) => return AttemptOutcome::Stalled,
            Err(e) => return classify(e),
        }

        let path = self.config.registry_file();
        debug!("Reading {}", path.display());
        let original = match std::fs::read_to_string(&path) {
            Ok(text) => Some(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return AttemptOutcome::Fatal(RegistryError::io(&path, e)),
        };
        let current = match &original {
            Some(text) => match store::decode(&path, text) {
                Ok(registry) => registry,
                Err(e) => return AttemptOutcome::Fatal(e),
            },
            None => Registry::default(),
        };

        debug!("Transforming snapshot with {} agent(s)", current.agents.len());
        let before = match store::encode(&current) {
            Ok(text) => text,
            Err(e) => return AttemptOutcome::Fatal(e),
        };
        let (next, output) = match transform(current) {
            Ok(result) => result,
            Err(e) => return AttemptOutcome::Fatal(e),
        };
        let after = match store::encode(&next) {
            Ok(text) => text,
            Err(e) => return AttemptOutcome::Fatal(e),
        };
        if after == before {
            return AttemptOutcome::Unchanged {
                registry: next,
                output,
            };
        }

        debug!("Writing {}", path.display());
        if let Err(e) = store::save(&path, &next) {
            return AttemptOutcome::Fatal(e);
        }

        debug!("Committing");
        let commit = match self
            .vcs
            .stage_and_commit(std::slice::from_ref(&self.config.registry_path), message)
            .await
        {
            Ok(commit) => commit,
            Err(e) => {
                if let Err(restore) = restore(&path, original.as_deref()) {
                    return AttemptOutcome::Fatal(restore);
                }
                return classify(e);
            }
        };

        debug!("Pushing {}", commit.short());
        let pushed = self.vcs.push().await;
        if matches!(pushed, Ok(PushOutcome::Pushed)) {
            return AttemptOutcome::Published {
                commit,
                registry: next,
                output,
            };
        }

        debug!("Discarding local commit {}", commit.short());
        if let Err(e) = self.vcs.discard_last_commit().await {
            return AttemptOutcome::Fatal(e);
        }

        match pushed {
            Ok(_) => AttemptOutcome::Conflict,
            Err(e) => classify(e),
        }
    }
}

fn classify<T>(error: RegistryError) -> AttemptOutcome<T> {
    if error.is_retryable() {
        AttemptOutcome::Retryable(error)
    } else {
        AttemptOutcome::Fatal(error)
    }
}

/// Put the registry file back the way the pull left it.
fn restore(path: &std::path::Path, original: Option<&str>) -> Result<()> {
    match original {
        Some(text) => std::fs::write(path, text).map_err(|e| RegistryError::io(path, e)),
        None => match std::fs::remove_file(path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(RegistryError::io(path, e)),
            _ => Ok(()),
        },
    }
}
