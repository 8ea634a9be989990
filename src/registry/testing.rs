//! In-memory git remote for exercising the update protocol.
//!
//! `SimulatedRemote` holds the branch tip; each `SimulatedClone` is a working
//! tree on disk with its own notion of which remote commit it is based on.
//! A push only lands when the clone's base is still the remote tip, which is
//! exactly the compare-and-swap a real remote performs.

use crate::error::{RegistryError, Result};
use crate::models::Registry;
use crate::registry::store;
use crate::repo::{CommitRef, PullOutcome, PushOutcome, VersionControl};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

type Interference = Box<dyn FnOnce(Registry) -> Registry + Send>;

#[derive(Debug, Default)]
struct RemoteState {
    head: u64,
    content: Option<String>,
    messages: Vec<String>,
}

/// The shared branch every clone pushes to.
#[derive(Debug, Clone, Default)]
pub struct SimulatedRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl SimulatedRemote {
    /// A remote whose tip contains `initial`, or an empty branch.
    pub fn new(initial: Option<&Registry>) -> Self {
        match initial {
            Some(registry) => Self::with_raw(&store::encode(registry).unwrap()),
            None => Self::default(),
        }
    }

    /// A remote whose tip holds `content` verbatim.
    pub fn with_raw(content: &str) -> Self {
        let remote = Self::default();
        {
            let mut state = remote.state.lock().unwrap();
            state.head = 1;
            state.content = Some(content.to_string());
        }
        remote
    }

    pub fn head(&self) -> u64 {
        self.state.lock().unwrap().head
    }

    pub fn content(&self) -> Option<String> {
        self.state.lock().unwrap().content.clone()
    }

    /// Decoded tip, if the branch has a registry.
    pub fn registry(&self) -> Option<Registry> {
        self.content()
            .map(|text| store::decode(Path::new("remote"), &text).unwrap())
    }

    /// Commit messages that landed, oldest first.
    pub fn messages(&self) -> Vec<String> {
        self.state.lock().unwrap().messages.clone()
    }

    /// Land a commit from some other writer.
    pub fn publish_foreign(&self, change: impl FnOnce(Registry) -> Registry) {
        let current = self.registry().unwrap_or_default();
        let next = store::encode(&change(current)).unwrap();
        let mut state = self.state.lock().unwrap();
        state.head += 1;
        state.content = Some(next);
        state.messages.push("foreign".to_string());
    }

    /// Check the tip out into `dir`.
    pub fn clone_into(&self, dir: &Path, registry_path: &Path) -> SimulatedClone {
        std::fs::create_dir_all(dir).unwrap();
        let clone = SimulatedClone {
            remote: self.clone(),
            file: dir.join(registry_path),
            local: Mutex::new(LocalState::default()),
            script: Mutex::new(Script::default()),
            gates: Mutex::new(Gates::default()),
            calls: Mutex::new(Vec::new()),
        };
        clone.checkout_tip();
        clone
    }
}

#[derive(Debug, Default)]
struct LocalState {
    base: u64,
    base_content: Option<String>,
    committed: Option<String>,
    message: Option<String>,
    commits: u64,
}

#[derive(Default)]
struct Script {
    stall_pulls: usize,
    fail_commits: usize,
    reject_all: bool,
    interference: VecDeque<Interference>,
}

#[derive(Default)]
struct Gates {
    before_pull: Option<oneshot::Receiver<()>>,
    after_commit: Option<oneshot::Sender<()>>,
    before_push: Option<oneshot::Receiver<()>>,
    after_push: Option<oneshot::Sender<()>>,
}

/// A working tree attached to a [`SimulatedRemote`].
pub struct SimulatedClone {
    remote: SimulatedRemote,
    file: PathBuf,
    local: Mutex<LocalState>,
    script: Mutex<Script>,
    gates: Mutex<Gates>,
    calls: Mutex<Vec<&'static str>>,
}

impl SimulatedClone {
    /// Report the next `n` pulls as not fast-forwardable.
    pub fn stall_pulls(&self, n: usize) {
        self.script.lock().unwrap().stall_pulls = n;
    }

    /// Fail the next `n` commits with a command error.
    pub fn fail_commits(&self, n: usize) {
        self.script.lock().unwrap().fail_commits = n;
    }

    pub fn reject_all_pushes(&self) {
        self.script.lock().unwrap().reject_all = true;
    }

    /// Queue a foreign commit that lands just before one of our pushes.
    pub fn interfere_before_push(&self, change: impl FnOnce(Registry) -> Registry + Send + 'static) {
        self.script
            .lock()
            .unwrap()
            .interference
            .push_back(Box::new(change));
    }

    pub fn wait_before_pull(&self, gate: oneshot::Receiver<()>) {
        self.gates.lock().unwrap().before_pull = Some(gate);
    }

    pub fn notify_after_commit(&self, signal: oneshot::Sender<()>) {
        self.gates.lock().unwrap().after_commit = Some(signal);
    }

    pub fn wait_before_push(&self, gate: oneshot::Receiver<()>) {
        self.gates.lock().unwrap().before_push = Some(gate);
    }

    pub fn notify_after_push(&self, signal: oneshot::Sender<()>) {
        self.gates.lock().unwrap().after_push = Some(signal);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == call).count()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }

    fn read_file(&self) -> Option<String> {
        std::fs::read_to_string(&self.file).ok()
    }

    fn write_file(&self, content: Option<&str>) {
        match content {
            Some(text) => {
                if let Some(parent) = self.file.parent() {
                    std::fs::create_dir_all(parent).unwrap();
                }
                std::fs::write(&self.file, text).unwrap();
            }
            None => {
                let _ = std::fs::remove_file(&self.file);
            }
        }
    }

    fn checkout_tip(&self) {
        let (head, content) = {
            let state = self.remote.state.lock().unwrap();
            (state.head, state.content.clone())
        };
        self.write_file(content.as_deref());
        let mut local = self.local.lock().unwrap();
        local.base = head;
        local.base_content = content;
        local.committed = None;
    }

    fn is_dirty(&self) -> bool {
        let local = self.local.lock().unwrap();
        let expected = local.committed.as_ref().or(local.base_content.as_ref());
        self.read_file().as_ref() != expected
    }
}

impl VersionControl for SimulatedClone {
    async fn is_working_tree_clean(&self) -> Result<bool> {
        self.record("status");
        Ok(!self.is_dirty())
    }

    async fn pull_latest(&self, _branch: &str) -> Result<PullOutcome> {
        let gate = self.gates.lock().unwrap().before_pull.take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        self.record("pull");

        {
            let mut script = self.script.lock().unwrap();
            if script.stall_pulls > 0 {
                script.stall_pulls -= 1;
                return Ok(PullOutcome::NotFastForward);
            }
        }

        let ahead = self.local.lock().unwrap().committed.is_some();
        if ahead || self.is_dirty() {
            return Ok(PullOutcome::NotFastForward);
        }
        self.checkout_tip();
        Ok(PullOutcome::Updated)
    }

    async fn stage_and_commit(&self, _paths: &[PathBuf], message: &str) -> Result<CommitRef> {
        self.record("commit");
        {
            let mut script = self.script.lock().unwrap();
            if script.fail_commits > 0 {
                script.fail_commits -= 1;
                return Err(RegistryError::command("commit", "simulated failure"));
            }
        }

        let content = self.read_file();
        let commit = {
            let mut local = self.local.lock().unwrap();
            local.committed = content;
            local.message = Some(message.to_string());
            local.commits += 1;
            CommitRef(format!("{:040x}", local.base * 1000 + local.commits))
        };

        let signal = self.gates.lock().unwrap().after_commit.take();
        if let Some(signal) = signal {
            let _ = signal.send(());
        }
        Ok(commit)
    }

    async fn push(&self) -> Result<PushOutcome> {
        let gate = self.gates.lock().unwrap().before_push.take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        self.record("push");

        let (reject_all, interference) = {
            let mut script = self.script.lock().unwrap();
            (script.reject_all, script.interference.pop_front())
        };
        if let Some(change) = interference {
            self.remote.publish_foreign(change);
        }
        if reject_all {
            return Ok(PushOutcome::Rejected);
        }

        let mut local = self.local.lock().unwrap();
        let mut remote = self.remote.state.lock().unwrap();
        if remote.head != local.base {
            return Ok(PushOutcome::Rejected);
        }

        remote.head += 1;
        remote.content = local.committed.take();
        remote.messages.push(local.message.take().unwrap_or_default());
        local.base = remote.head;
        local.base_content = remote.content.clone();
        drop(remote);
        drop(local);

        let signal = self.gates.lock().unwrap().after_push.take();
        if let Some(signal) = signal {
            let _ = signal.send(());
        }
        Ok(PushOutcome::Pushed)
    }

    async fn discard_last_commit(&self) -> Result<()> {
        self.record("discard");
        let base_content = {
            let mut local = self.local.lock().unwrap();
            local.committed = None;
            local.message = None;
            local.base_content.clone()
        };
        self.write_file(base_content.as_deref());
        Ok(())
    }
}
