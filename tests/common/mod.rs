//! Shared fixtures: scratch repository pairs and mock collaborators.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use git2::{Oid, Repository, Signature};
use tempfile::TempDir;

use landsync::Result;
use landsync::config::Config;
use landsync::record::{CommitRange, RecordSeed, SyncRecord, SyncRecordStore, SyncType, data_keys};
use landsync::repo::{Checkout, SyncRepos};
use landsync::services::{
    BugEdit, BugTracker, CiClient, MetadataMergeTool, MetadataUpdater, PullInfo, RepoHost,
    ReviewClient, Services, TaskDispatch, TaskKind, TaskSet, TryRequest, Worktrees,
};

const SEED_FILES: &[(&str, &str)] = &[
    ("css/flexbox/order.html", "<!doctype html>\n<!-- flexbox order -->\n"),
    ("css/grid/placement.html", "<!doctype html>\n<!-- grid placement -->\n"),
    ("README.md", "test corpus\n"),
];

/// A scratch deployment: upstream + downstream repositories, a state
/// directory, and the seeded sync point.
pub struct TestWorld {
    pub dir: TempDir,
    pub config: Config,
    pub store: SyncRecordStore,
    pub upstream_base: String,
}

impl TestWorld {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = Config::default();
        config.upstream.path = dir.path().join("upstream");
        config.downstream.path = dir.path().join("downstream");
        config.state_dir = dir.path().join("state");

        let upstream = Repository::init(&config.upstream.path).expect("init upstream");
        let files: Vec<(&str, Option<&str>)> =
            SEED_FILES.iter().map(|(p, c)| (*p, Some(*c))).collect();
        let u0 = commit_on_ref(&upstream, "refs/heads/master", None, &files, "Initial test corpus");

        let downstream = Repository::init(&config.downstream.path).expect("init downstream");
        let subtree = config.downstream.subtree_path.clone();
        let mirrored: Vec<(String, Option<&str>)> = SEED_FILES
            .iter()
            .map(|(p, c)| (format!("{subtree}/{p}"), Some(*c)))
            .collect();
        let mut downstream_files: Vec<(&str, Option<&str>)> = mirrored
            .iter()
            .map(|(p, c)| (p.as_str(), *c))
            .collect();
        let sync_point = format!("upstream: {u0}\n");
        let sync_point_rel = format!(
            "{}/{}",
            config.downstream.meta_path, config.downstream.sync_point_file
        );
        downstream_files.push((sync_point_rel.as_str(), Some(sync_point.as_str())));
        let d0 = commit_on_ref(
            &downstream,
            "refs/heads/integration",
            None,
            &downstream_files,
            "Initial downstream tree",
        );
        downstream
            .reference("refs/heads/central", Oid::from_str(&d0).unwrap(), true, "seed")
            .expect("central ref");

        let store = SyncRecordStore::new(&config.state_dir);
        Self {
            dir,
            config,
            store,
            upstream_base: u0,
        }
    }

    pub fn repos(&self) -> SyncRepos {
        SyncRepos::open(&self.config).expect("open repos")
    }

    pub fn upstream(&self) -> Repository {
        Repository::open(&self.config.upstream.path).expect("open upstream")
    }

    pub fn downstream(&self) -> Repository {
        Repository::open(&self.config.downstream.path).expect("open downstream")
    }

    /// Commit file edits on the upstream main branch; returns the sha.
    pub fn upstream_commit(&self, files: &[(&str, Option<&str>)], message: &str) -> String {
        let repo = self.upstream();
        commit_on_ref(&repo, "refs/heads/master", None, files, message)
    }

    /// A squash-style upstream commit attributed to a pull request.
    pub fn upstream_pr_commit(
        &self,
        origin: u64,
        files: &[(&str, Option<&str>)],
        subject: &str,
    ) -> String {
        self.upstream_commit(files, &format!("{subject} (#{origin})"))
    }

    /// A GitHub-style merge commit bringing a side branch into master.
    pub fn upstream_merge_commit(&self, origin: u64, side_head: &str, owner: &str) -> String {
        let repo = self.upstream();
        let master = repo
            .revparse_single("refs/heads/master")
            .and_then(|o| o.peel_to_commit())
            .expect("master head");
        let side = repo
            .find_commit(Oid::from_str(side_head).unwrap())
            .expect("side head");
        let sig = test_signature();
        let message = format!("Merge pull request #{origin} from {owner}/topic");
        let oid = repo
            .commit(
                Some("refs/heads/master"),
                &sig,
                &sig,
                &message,
                &side.tree().expect("tree"),
                &[&master, &side],
            )
            .expect("merge commit");
        oid.to_string()
    }

    /// Commit file edits on a branch of the upstream repo other than master.
    pub fn upstream_branch_commit(
        &self,
        branch_ref: &str,
        parent: &str,
        files: &[(&str, Option<&str>)],
        message: &str,
    ) -> String {
        let repo = self.upstream();
        commit_on_ref(&repo, branch_ref, Some(parent), files, message)
    }

    /// Commit file edits on the downstream integration branch.
    pub fn downstream_commit(&self, files: &[(&str, Option<&str>)], message: &str) -> String {
        let repo = self.downstream();
        commit_on_ref(&repo, "refs/heads/integration", None, files, message)
    }

    pub fn upstream_head(&self) -> String {
        resolve_ref(&self.upstream(), "refs/heads/master")
    }

    pub fn integration_head(&self) -> String {
        resolve_ref(&self.downstream(), "refs/heads/integration")
    }

    pub fn sync_point_rel(&self) -> String {
        format!(
            "{}/{}",
            self.config.downstream.meta_path, self.config.downstream.sync_point_file
        )
    }

    /// Read a blob from the tree at a downstream ref head.
    pub fn downstream_blob(&self, refname: &str, path: &str) -> Option<String> {
        let repo = self.downstream();
        let oid = Oid::from_str(&resolve_ref(&repo, refname)).unwrap();
        landsync::repo::blob_at(&repo, oid, path)
            .expect("blob lookup")
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Seed a downstream sync record correlated with `origin`.
    pub fn seed_downstream_sync(
        &self,
        bug: u64,
        origin: u64,
        ready: bool,
        extra: &[(&str, &str)],
    ) -> SyncRecord {
        let head = self.integration_head();
        self.store
            .with_lock(SyncType::Downstream, bug, |token| {
                let mut data = BTreeMap::new();
                data.insert(data_keys::ORIGIN_ID.to_string(), origin.to_string());
                if ready {
                    data.insert(data_keys::METADATA_READY.to_string(), "true".to_string());
                }
                for (key, value) in extra {
                    data.insert(key.to_string(), value.to_string());
                }
                self.store.create(
                    token,
                    RecordSeed {
                        sync_type: SyncType::Downstream,
                        bug,
                        upstream_range: CommitRange::new(head.clone(), head.clone()),
                        downstream_range: CommitRange::new(head.clone(), head.clone()),
                        data,
                    },
                )
            })
            .expect("seed downstream sync")
    }

    /// Seed an open upstream sync record whose downstream commits span
    /// `(base, head]` on the integration branch.
    pub fn seed_upstream_sync(&self, bug: u64, origin: u64, base: &str, head: &str) -> SyncRecord {
        self.store
            .with_lock(SyncType::Upstream, bug, |token| {
                let mut data = BTreeMap::new();
                data.insert(data_keys::ORIGIN_ID.to_string(), origin.to_string());
                self.store.create(
                    token,
                    RecordSeed {
                        sync_type: SyncType::Upstream,
                        bug,
                        upstream_range: CommitRange::new(
                            self.upstream_base.clone(),
                            self.upstream_base.clone(),
                        ),
                        downstream_range: CommitRange::new(base.to_string(), head.to_string()),
                        data,
                    },
                )
            })
            .expect("seed upstream sync")
    }
}

pub fn test_signature() -> Signature<'static> {
    Signature::now("Test Author", "test@example.com").expect("signature")
}

fn resolve_ref(repo: &Repository, refname: &str) -> String {
    repo.revparse_single(refname)
        .and_then(|obj| obj.peel_to_commit())
        .map(|commit| commit.id().to_string())
        .expect("resolve ref")
}

/// Commit a set of file edits (`Some` writes, `None` deletes) on top of
/// `refname` (or of `parent` for a new branch), without touching any
/// working directory.
pub fn commit_on_ref(
    repo: &Repository,
    refname: &str,
    parent: Option<&str>,
    files: &[(&str, Option<&str>)],
    message: &str,
) -> String {
    let parent_commit = match parent {
        Some(sha) => Some(repo.find_commit(Oid::from_str(sha).unwrap()).expect("parent")),
        None => repo
            .find_reference(refname)
            .ok()
            .and_then(|r| r.peel_to_commit().ok()),
    };
    let base_tree = parent_commit.as_ref().map(|c| c.tree().expect("tree"));

    let mut tree_oid = base_tree
        .as_ref()
        .map(|t| t.id())
        .unwrap_or_else(|| repo.treebuilder(None).unwrap().write().unwrap());
    for (path, content) in files {
        tree_oid = tree_with(repo, tree_oid, path, content.map(str::as_bytes));
    }

    let tree = repo.find_tree(tree_oid).expect("new tree");
    let sig = test_signature();
    let parents: Vec<&git2::Commit<'_>> = parent_commit.iter().collect();
    let oid = repo
        .commit(Some(refname), &sig, &sig, message, &tree, &parents)
        .expect("commit");
    oid.to_string()
}

/// Return a tree equal to `base` with `path` set to `content` (or removed).
fn tree_with(repo: &Repository, base: Oid, path: &str, content: Option<&[u8]>) -> Oid {
    let base_tree = repo.find_tree(base).expect("base tree");
    match path.split_once('/') {
        None => {
            let mut builder = repo.treebuilder(Some(&base_tree)).expect("builder");
            match content {
                Some(bytes) => {
                    let blob = repo.blob(bytes).expect("blob");
                    builder.insert(path, blob, 0o100644).expect("insert");
                }
                None => {
                    if base_tree.get_name(path).is_some() {
                        builder.remove(path).expect("remove");
                    }
                }
            }
            builder.write().expect("write tree")
        }
        Some((first, rest)) => {
            let sub_oid = base_tree
                .get_name(first)
                .filter(|entry| entry.kind() == Some(git2::ObjectType::Tree))
                .map(|entry| entry.id())
                .unwrap_or_else(|| repo.treebuilder(None).unwrap().write().unwrap());
            let new_sub = tree_with(repo, sub_oid, rest, content);
            let mut builder = repo.treebuilder(Some(&base_tree)).expect("builder");
            builder.insert(first, new_sub, 0o040000).expect("insert subtree");
            builder.write().expect("write tree")
        }
    }
}

// ---------------------------------------------------------------------------
// Mock collaborators
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockBugs {
    next: Cell<u64>,
    pub comments: RefCell<Vec<(u64, String)>>,
    pub edits: RefCell<Vec<(u64, BugEdit)>>,
}

impl BugTracker for MockBugs {
    fn create_bug(&self, _title: &str, _body: &str, _product: &str, _component: &str) -> Result<u64> {
        let id = 1000 + self.next.get();
        self.next.set(self.next.get() + 1);
        Ok(id)
    }

    fn comment(&self, bug: u64, text: &str) -> Result<()> {
        self.comments.borrow_mut().push((bug, text.to_string()));
        Ok(())
    }

    fn update_bug(&self, bug: u64, edit: BugEdit) -> Result<()> {
        self.edits.borrow_mut().push((bug, edit));
        Ok(())
    }
}

#[derive(Default)]
pub struct MockReview;

impl ReviewClient for MockReview {
    fn get_diff(&self, _revision: u64) -> Result<String> {
        Ok(String::new())
    }

    fn get_raw_diff(&self, _revision: u64) -> Result<String> {
        Ok(String::new())
    }

    fn get_commit_paths(&self, _revision: u64) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

pub struct MockHost {
    pub tree_open: Cell<bool>,
}

impl Default for MockHost {
    fn default() -> Self {
        Self {
            tree_open: Cell::new(true),
        }
    }
}

impl RepoHost for MockHost {
    fn get_pull(&self, number: u64) -> Result<PullInfo> {
        Ok(PullInfo {
            number,
            title: format!("Pull request {number}"),
            author: "Upstream Author".to_string(),
            head_sha: String::new(),
        })
    }

    fn tree_is_open(&self, _tree: &str) -> Result<bool> {
        Ok(self.tree_open.get())
    }
}

/// One scripted CI result, handed out for every `tasks` query until the
/// test changes it.
#[derive(Debug, Clone)]
pub struct TasksSpec {
    pub complete: bool,
    pub success: bool,
    pub failed_builds: Vec<String>,
    pub failure_rate: f64,
    pub retriggered: bool,
    pub retrigger_count: u32,
    pub logs: Vec<PathBuf>,
}

impl Default for TasksSpec {
    fn default() -> Self {
        Self {
            complete: true,
            success: true,
            failed_builds: Vec::new(),
            failure_rate: 0.0,
            retriggered: false,
            retrigger_count: 0,
            logs: Vec::new(),
        }
    }
}

pub struct ScriptedTasks(pub TasksSpec);

impl TaskSet for ScriptedTasks {
    fn complete(&self, _allow_unscheduled: bool) -> bool {
        self.0.complete
    }

    fn success(&self) -> bool {
        self.0.success
    }

    fn failed_builds(&self) -> Vec<String> {
        self.0.failed_builds.clone()
    }

    fn failure_limit_exceeded(&self, rate: f64) -> bool {
        self.0.failure_rate > rate
    }

    fn retriggered(&self) -> bool {
        self.0.retriggered
    }

    fn retrigger_failures(&self) -> Result<u32> {
        Ok(self.0.retrigger_count)
    }

    fn download_logs(&self) -> Result<Vec<PathBuf>> {
        Ok(self.0.logs.clone())
    }
}

#[derive(Default)]
pub struct MockCi {
    pub spec: RefCell<TasksSpec>,
    pub triggered: RefCell<Vec<TryRequest>>,
}

impl MockCi {
    pub fn set_result(&self, spec: TasksSpec) {
        *self.spec.borrow_mut() = spec;
    }
}

impl CiClient for MockCi {
    fn trigger(&self, _checkout: &Checkout, request: &TryRequest) -> Result<String> {
        self.triggered.borrow_mut().push(request.clone());
        Ok(format!("try://{}", self.triggered.borrow().len()))
    }

    fn tasks(&self, _treeherder_url: &str) -> Result<Box<dyn TaskSet>> {
        Ok(Box::new(ScriptedTasks(self.spec.borrow().clone())))
    }
}

#[derive(Default)]
pub struct MockDispatch {
    pub enqueued: RefCell<Vec<(&'static str, serde_json::Value)>>,
}

impl TaskDispatch for MockDispatch {
    fn enqueue(&self, kind: TaskKind, payload: serde_json::Value) -> Result<()> {
        self.enqueued.borrow_mut().push((kind.as_str(), payload));
        Ok(())
    }
}

#[derive(Default)]
pub struct NoopUpdater;

impl MetadataUpdater for NoopUpdater {
    fn update(
        &self,
        _checkout: &Checkout,
        _log_files: &[PathBuf],
        _update_intermittents: bool,
    ) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct NoopMergeTool;

impl MetadataMergeTool for NoopMergeTool {
    fn resolve(&self, _checkout_dir: &Path, paths: &[String]) -> Result<Vec<String>> {
        // Pretend everything resolved; unused unless a test sets up a
        // conflict that reaches the tool.
        let _ = paths;
        Ok(Vec::new())
    }
}

pub struct TestWorktrees {
    downstream_path: PathBuf,
    worktrees_dir: PathBuf,
}

impl Worktrees for TestWorktrees {
    fn downstream_checkout(&self, name: &str, branch_ref: &str) -> Result<Checkout> {
        let base = Repository::open(&self.downstream_path)?;
        Checkout::for_branch(&base, &self.worktrees_dir, name, branch_ref)
    }
}

/// All mocks plus the worktree provider, bundled for `Services`.
pub struct Mocks {
    pub bugs: MockBugs,
    pub review: MockReview,
    pub host: MockHost,
    pub ci: MockCi,
    pub dispatch: MockDispatch,
    pub updater: NoopUpdater,
    pub merge_tool: NoopMergeTool,
    pub worktrees: TestWorktrees,
}

impl Mocks {
    pub fn new(world: &TestWorld) -> Self {
        Self {
            bugs: MockBugs::default(),
            review: MockReview,
            host: MockHost::default(),
            ci: MockCi::default(),
            dispatch: MockDispatch::default(),
            updater: NoopUpdater,
            merge_tool: NoopMergeTool,
            worktrees: TestWorktrees {
                downstream_path: world.config.downstream.path.clone(),
                worktrees_dir: world.dir.path().join("worktrees"),
            },
        }
    }

    pub fn services(&self) -> Services<'_> {
        Services {
            bugs: &self.bugs,
            review: &self.review,
            host: &self.host,
            ci: &self.ci,
            dispatch: &self.dispatch,
            metadata_updater: &self.updater,
            merge_tool: &self.merge_tool,
            worktrees: &self.worktrees,
        }
    }
}
