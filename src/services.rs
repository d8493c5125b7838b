//! External collaborator contracts.
//!
//! The engine never reads process-wide singletons; one `Services` bundle is
//! constructed at startup and passed explicitly into every entry point.
//! Everything here is synchronous from the engine's perspective; transient
//! collaborator failures surface as `Error::Retryable`.

use std::path::{Path, PathBuf};

use crate::repo::Checkout;
use crate::Result;

/// A pull request's descriptive fields, as known to the hosting service.
#[derive(Debug, Clone)]
pub struct PullInfo {
    pub number: u64,
    pub title: String,
    pub author: String,
    pub head_sha: String,
}

/// Scoped multi-field bug edit; changes are applied when the context is
/// submitted back through `BugTracker::update_bug`.
#[derive(Debug, Default, Clone)]
pub struct BugEdit {
    pub comments: Vec<String>,
    pub blocks: Vec<u64>,
    pub needinfo: Vec<String>,
}

impl BugEdit {
    pub fn add_comment(&mut self, text: impl Into<String>) {
        self.comments.push(text.into());
    }

    pub fn add_blocking(&mut self, bug: u64) {
        self.blocks.push(bug);
    }

    pub fn needinfo(&mut self, users: &[String]) {
        self.needinfo.extend(users.iter().cloned());
    }
}

/// Bug tracker client.
pub trait BugTracker {
    fn create_bug(&self, title: &str, body: &str, product: &str, component: &str) -> Result<u64>;
    fn comment(&self, bug: u64, text: &str) -> Result<()>;
    /// Apply a scoped multi-field edit in one round trip.
    fn update_bug(&self, bug: u64, edit: BugEdit) -> Result<()>;
}

/// Code review (differential) client.
pub trait ReviewClient {
    fn get_diff(&self, revision: u64) -> Result<String>;
    fn get_raw_diff(&self, revision: u64) -> Result<String>;
    fn get_commit_paths(&self, revision: u64) -> Result<Vec<String>>;
}

/// Repository hosting client for the upstream tree, plus the downstream
/// tree-status gate.
pub trait RepoHost {
    fn get_pull(&self, number: u64) -> Result<PullInfo>;
    fn tree_is_open(&self, tree: &str) -> Result<bool>;
}

/// Aggregated results of one CI run.
pub trait TaskSet {
    fn complete(&self, allow_unscheduled: bool) -> bool;
    fn success(&self) -> bool;
    fn failed_builds(&self) -> Vec<String>;
    /// Whether the failure rate among scheduled test tasks exceeds `rate`.
    fn failure_limit_exceeded(&self, rate: f64) -> bool;
    /// Whether failing jobs were already retriggered for this run.
    fn retriggered(&self) -> bool;
    /// Retrigger failing jobs; returns how many new tasks were scheduled.
    fn retrigger_failures(&self) -> Result<u32>;
    /// Fetch raw logs for the run's test tasks.
    fn download_logs(&self) -> Result<Vec<PathBuf>>;
}

/// Parameters for scheduling one CI validation run.
#[derive(Debug, Clone)]
pub struct TryRequest {
    pub bug: u64,
    pub stability: bool,
    pub rebuild_count: u32,
}

/// CI trigger/result client.
pub trait CiClient {
    /// Schedule a run for the checkout's head; returns the result-viewer url.
    fn trigger(&self, checkout: &Checkout, request: &TryRequest) -> Result<String>;
    /// Results for a previously-scheduled run.
    fn tasks(&self, treeherder_url: &str) -> Result<Box<dyn TaskSet>>;
}

/// Kinds of follow-up work handed to the asynchronous dispatcher.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TaskKind {
    /// Re-examine syncs that were blocked on the finished landing.
    Retrigger,
    /// Continue the landing state machine.
    Land,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Retrigger => "retrigger",
            TaskKind::Land => "land",
        }
    }
}

/// Fire-and-forget task dispatch with at-least-once delivery. Handlers must
/// be idempotent, which is why every mutating entry point in this crate can
/// be safely re-run.
pub trait TaskDispatch {
    fn enqueue(&self, kind: TaskKind, payload: serde_json::Value) -> Result<()>;
}

/// Applies expectation-metadata updates derived from CI logs to a checkout.
pub trait MetadataUpdater {
    fn update(
        &self,
        checkout: &Checkout,
        log_files: &[PathBuf],
        update_intermittents: bool,
    ) -> Result<()>;
}

/// External three-way merge for conflicted metadata files, the last step of
/// the metadata merge fallback chain.
pub trait MetadataMergeTool {
    /// Resolve the given conflicted paths in place. Returns the paths it
    /// could not resolve.
    fn resolve(&self, checkout_dir: &Path, paths: &[String]) -> Result<Vec<String>>;
}

/// Scratch checkout provisioning. Each checkout is exclusively usable by
/// the requesting invocation.
pub trait Worktrees {
    fn downstream_checkout(&self, name: &str, branch_ref: &str) -> Result<Checkout>;
}

/// The collaborator bundle handed to every entry point.
pub struct Services<'a> {
    pub bugs: &'a dyn BugTracker,
    pub review: &'a dyn ReviewClient,
    pub host: &'a dyn RepoHost,
    pub ci: &'a dyn CiClient,
    pub dispatch: &'a dyn TaskDispatch,
    pub metadata_updater: &'a dyn MetadataUpdater,
    pub merge_tool: &'a dyn MetadataMergeTool,
    pub worktrees: &'a dyn Worktrees,
}
