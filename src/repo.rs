//! Repository access and commit plumbing.
//!
//! Everything the engine needs from git2 lives here: commit views with
//! trailer metadata, range walks, scratch checkouts (linked worktrees),
//! staging/commit/amend helpers, and the rebase used before pushing.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use git2::build::CheckoutBuilder;
use git2::{
    ErrorCode, IndexAddOption, ObjectType, Oid, RebaseOptions, Repository, ResetType, Signature,
    Sort, TreeWalkMode, TreeWalkResult, WorktreeAddOptions,
};
use regex::Regex;

use crate::config::Config;
use crate::{Error, Result, metadata};

/// Committer identity for commits the engine itself creates.
pub const BOT_NAME: &str = "landsync";
pub const BOT_EMAIL: &str = "landsync@localhost";

static MERGE_PR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Merge pull request #(\d+) from \S+").expect("merge pr regex"));
static SQUASH_PR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(#(\d+)\)\s*$").expect("squash pr regex"));
static LEGACY_SYNC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Merge pull request #\d+ from [^/\s]+/sync_[0-9a-fA-F]+").expect("legacy regex")
});

/// The two repositories one deployment operates on.
pub struct SyncRepos {
    pub upstream: Repository,
    pub downstream: Repository,
}

impl SyncRepos {
    pub fn open(config: &Config) -> Result<Self> {
        Ok(Self {
            upstream: Repository::open(&config.upstream.path)?,
            downstream: Repository::open(&config.downstream.path)?,
        })
    }
}

/// A commit loaded into plain data: sha, message, authorship, parents.
///
/// Provenance metadata is decoded lazily from the message trailer.
#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub sha: String,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    pub parents: Vec<String>,
}

impl CommitInfo {
    pub fn load(repo: &Repository, oid: Oid) -> Result<Self> {
        let commit = repo.find_commit(oid)?;
        let author = commit.author();
        Ok(Self {
            sha: oid.to_string(),
            message: commit.message().unwrap_or_default().to_string(),
            author_name: author.name().unwrap_or("unknown").to_string(),
            author_email: author.email().unwrap_or("unknown@localhost").to_string(),
            parents: commit.parent_ids().map(|id| id.to_string()).collect(),
        })
    }

    pub fn oid(&self) -> Oid {
        Oid::from_str(&self.sha).expect("sha came from git")
    }

    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or_default()
    }

    pub fn metadata(&self) -> BTreeMap<String, String> {
        metadata::decode(&self.message)
    }

    /// The originating change (pull request) this commit belongs to, if it
    /// can be determined from the message: a `wpt-pr` trailer, a GitHub
    /// merge-commit subject, or a squash-merge subject suffix.
    pub fn origin(&self) -> Option<u64> {
        if let Some(raw) = self.metadata().get(metadata::KEY_ORIGIN)
            && let Ok(pr) = raw.parse()
        {
            return Some(pr);
        }
        let subject = self.summary();
        if let Some(caps) = MERGE_PR_RE.captures(subject) {
            return caps[1].parse().ok();
        }
        SQUASH_PR_RE
            .captures(subject)
            .and_then(|caps| caps[1].parse().ok())
    }

    /// Merges produced by the historical bidirectional-sync bot; these carry
    /// no landable content of their own.
    pub fn is_legacy_sync(&self) -> bool {
        LEGACY_SYNC_RE.is_match(self.summary())
    }
}

/// The first non-merge commit of a group, in group order.
pub fn first_non_merge(commits: &[CommitInfo]) -> Option<&CommitInfo> {
    commits.iter().find(|commit| !commit.is_merge())
}

pub fn resolve(repo: &Repository, revish: &str) -> Result<Oid> {
    Ok(repo.revparse_single(revish)?.peel_to_commit()?.id())
}

pub fn is_ancestor(repo: &Repository, ancestor: Oid, descendant: Oid) -> Result<bool> {
    if ancestor == descendant {
        return Ok(true);
    }
    Ok(repo.graph_descendant_of(descendant, ancestor)?)
}

pub fn merge_base(repo: &Repository, a: Oid, b: Oid) -> Result<Oid> {
    Ok(repo.merge_base(a, b)?)
}

/// Commits in `(base, head]` along the first-parent chain, oldest first.
pub fn first_parent_range(repo: &Repository, base: Oid, head: Oid) -> Result<Vec<CommitInfo>> {
    let mut walk = repo.revwalk()?;
    walk.push(head)?;
    walk.hide(base)?;
    walk.simplify_first_parent()?;
    walk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)?;
    let mut out = Vec::new();
    for oid in walk {
        out.push(CommitInfo::load(repo, oid?)?);
    }
    Ok(out)
}

/// All commits in `(base, head]`, oldest first.
pub fn range_commits(repo: &Repository, base: Oid, head: Oid) -> Result<Vec<CommitInfo>> {
    let mut walk = repo.revwalk()?;
    walk.push(head)?;
    walk.hide(base)?;
    walk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)?;
    let mut out = Vec::new();
    for oid in walk {
        out.push(CommitInfo::load(repo, oid?)?);
    }
    Ok(out)
}

/// Read the blob at `path` in the tree of `commit_oid`, if present.
pub fn blob_at(repo: &Repository, commit_oid: Oid, path: &str) -> Result<Option<Vec<u8>>> {
    let tree = repo.find_commit(commit_oid)?.tree()?;
    let entry = match tree.get_path(Path::new(path)) {
        Ok(entry) => entry,
        Err(err) if err.code() == ErrorCode::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let object = entry.to_object(repo)?;
    let blob = object
        .peel_to_blob()
        .map_err(|_| Error::abort(format!("{path} is not a blob")))?;
    Ok(Some(blob.content().to_vec()))
}

pub fn default_signature() -> Result<Signature<'static>> {
    Ok(Signature::now(BOT_NAME, BOT_EMAIL)?)
}

/// An exclusively-owned scratch working copy, backed by a linked worktree.
///
/// The owning invocation must commit or discard its changes before
/// returning; `reset_hard` is the discard path.
pub struct Checkout {
    pub repo: Repository,
    pub path: PathBuf,
    pub branch_ref: String,
}

impl Checkout {
    /// Open (or create) the worktree for `branch_ref` under `worktrees_dir`.
    ///
    /// The branch must already exist in `base`. Reuses a worktree from a
    /// previous invocation of the same process, which is what makes resumed
    /// invocations see their earlier commits.
    pub fn for_branch(
        base: &Repository,
        worktrees_dir: &Path,
        name: &str,
        branch_ref: &str,
    ) -> Result<Self> {
        fs::create_dir_all(worktrees_dir)?;
        let path = worktrees_dir.join(name);
        if !path.exists() {
            let reference = base.find_reference(branch_ref)?;
            let mut opts = WorktreeAddOptions::new();
            opts.reference(Some(&reference));
            base.worktree(name, &path, Some(&opts))?;
        }
        let repo = Repository::open(&path)?;
        Ok(Self {
            repo,
            path,
            branch_ref: branch_ref.to_string(),
        })
    }

    pub fn head_oid(&self) -> Result<Oid> {
        Ok(self.repo.head()?.peel_to_commit()?.id())
    }

    pub fn head_commit(&self) -> Result<CommitInfo> {
        let oid = self.head_oid()?;
        CommitInfo::load(&self.repo, oid)
    }

    pub fn write_file(&self, rel: &str, contents: &[u8]) -> Result<()> {
        let dest = self.path.join(rel);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(dest, contents)?;
        Ok(())
    }

    pub fn remove_file(&self, rel: &str) -> Result<()> {
        let dest = self.path.join(rel);
        if dest.exists() {
            fs::remove_file(dest)?;
        }
        Ok(())
    }

    pub fn read_file(&self, rel: &str) -> Result<Option<Vec<u8>>> {
        let dest = self.path.join(rel);
        match fs::read(dest) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Stage every change (adds, modifications, deletions) under `prefix`.
    pub fn stage_all(&self, prefix: &str) -> Result<()> {
        let mut index = self.repo.index()?;
        index.add_all([prefix], IndexAddOption::DEFAULT, None)?;
        index.update_all([prefix], None)?;
        index.write()?;
        Ok(())
    }

    pub fn stage_path(&self, rel: &str) -> Result<()> {
        let mut index = self.repo.index()?;
        if self.path.join(rel).exists() {
            index.add_path(Path::new(rel))?;
        } else {
            index.remove_path(Path::new(rel))?;
        }
        index.write()?;
        Ok(())
    }

    /// Whether the staged tree differs from HEAD.
    pub fn is_dirty(&self) -> Result<bool> {
        let mut index = self.repo.index()?;
        let tree_oid = index.write_tree()?;
        Ok(self.repo.head()?.peel_to_commit()?.tree_id() != tree_oid)
    }

    /// Commit the staged tree onto HEAD.
    ///
    /// Returns `None` when nothing changed and `allow_empty` is false
    /// (no-op commits suppressed). `author` defaults to the bot identity.
    pub fn commit_staged(
        &self,
        message: &str,
        author: Option<(&str, &str)>,
        allow_empty: bool,
    ) -> Result<Option<Oid>> {
        let mut index = self.repo.index()?;
        let tree_oid = index.write_tree()?;
        index.write()?;
        let head = self.repo.head()?.peel_to_commit()?;
        if !allow_empty && head.tree_id() == tree_oid {
            return Ok(None);
        }
        let tree = self.repo.find_tree(tree_oid)?;
        let committer = default_signature()?;
        let author = match author {
            Some((name, email)) => Signature::now(name, email)?,
            None => committer.clone(),
        };
        let oid = self
            .repo
            .commit(Some("HEAD"), &author, &committer, message, &tree, &[&head])?;
        Ok(Some(oid))
    }

    /// Fold the staged tree into HEAD, optionally replacing its message.
    pub fn amend_head(&self, message: Option<&str>) -> Result<Oid> {
        let mut index = self.repo.index()?;
        let tree_oid = index.write_tree()?;
        index.write()?;
        let head = self.repo.head()?.peel_to_commit()?;
        let tree = self.repo.find_tree(tree_oid)?;
        let oid = head.amend(Some("HEAD"), None, None, None, message, Some(&tree))?;
        self.force_sync_workdir()?;
        Ok(oid)
    }

    /// Reset the given paths back to their HEAD state (index and workdir).
    pub fn checkout_head_paths(&self, paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let head = self.repo.head()?.peel(ObjectType::Commit)?;
        self.repo
            .reset_default(Some(&head), paths.iter().map(String::as_str))?;
        let mut builder = CheckoutBuilder::new();
        builder.force().update_index(false);
        for path in paths {
            builder.path(path.as_str());
        }
        self.repo.checkout_head(Some(&mut builder))?;
        Ok(())
    }

    /// Discard all uncommitted changes.
    pub fn reset_hard(&self) -> Result<()> {
        let head = self.repo.head()?.peel(ObjectType::Commit)?;
        self.repo.reset(&head, ResetType::Hard, None)?;
        Ok(())
    }

    fn force_sync_workdir(&self) -> Result<()> {
        let mut builder = CheckoutBuilder::new();
        builder.force();
        self.repo.checkout_head(Some(&mut builder))?;
        Ok(())
    }

    /// Rebase this checkout's branch onto `onto_ref`.
    ///
    /// Conflicts abort the rebase and surface as `Abort`; the working copy
    /// is left at its pre-rebase state.
    pub fn rebase_onto(&self, onto_ref: &str) -> Result<()> {
        let onto_oid = resolve(&self.repo, onto_ref)?;
        let head_oid = self.head_oid()?;
        if is_ancestor(&self.repo, onto_oid, head_oid)? {
            return Ok(());
        }

        let head_ref = self.repo.head()?;
        let branch = self.repo.reference_to_annotated_commit(&head_ref)?;
        let upstream = self.repo.find_annotated_commit(onto_oid)?;
        let mut opts = RebaseOptions::new();
        let mut rebase = self
            .repo
            .rebase(Some(&branch), Some(&upstream), None, Some(&mut opts))?;
        let committer = default_signature()?;
        while let Some(op) = rebase.next() {
            if let Err(err) = op {
                rebase.abort()?;
                return Err(Error::abort(format!("rebase failed: {err}")));
            }
            if self.repo.index()?.has_conflicts() {
                rebase.abort()?;
                return Err(Error::abort("rebase produced conflicts".to_string()));
            }
            match rebase.commit(None, &committer, None) {
                Ok(_) => {}
                // The patch is already present on the new base.
                Err(err) if err.code() == ErrorCode::Applied => {}
                Err(err) => {
                    rebase.abort()?;
                    return Err(err.into());
                }
            }
        }
        rebase.finish(None)?;
        self.force_sync_workdir()?;
        Ok(())
    }
}

/// Create `branch_ref` pointing at `target` (no-op if it exists already).
pub fn ensure_branch(repo: &Repository, branch_ref: &str, target: Oid) -> Result<()> {
    if repo.find_reference(branch_ref).is_err() {
        repo.reference(branch_ref, target, false, "landsync branch")?;
    }
    Ok(())
}

/// Fast-forward `dest_ref` to `src` after verifying the update is in fact a
/// fast-forward. A non-fast-forward target means someone else advanced the
/// branch since the rebase: a remote race, retryable after re-rebasing.
pub fn fast_forward(repo: &Repository, dest_ref: &str, src: Oid) -> Result<()> {
    let dest_oid = resolve(repo, dest_ref)?;
    if dest_oid == src {
        return Ok(());
    }
    if !is_ancestor(repo, dest_oid, src)? {
        return Err(Error::retryable(format!(
            "{dest_ref} moved since rebase; fetch and retry"
        )));
    }
    repo.reference(dest_ref, src, true, "landsync push")?;
    Ok(())
}

/// Materialise `tree_oid` (from `src_repo`) into `dest_dir`, skipping
/// `skip_paths` (tree-relative). Returns the written paths.
pub fn write_tree_to_dir(
    src_repo: &Repository,
    tree_oid: Oid,
    dest_dir: &Path,
    skip_paths: &[String],
) -> Result<Vec<String>> {
    let tree = src_repo.find_tree(tree_oid)?;
    let mut written = Vec::new();
    let mut failure: Option<Error> = None;
    tree.walk(TreeWalkMode::PreOrder, |dir, entry| {
        if entry.kind() != Some(ObjectType::Blob) {
            return TreeWalkResult::Ok;
        }
        let name = entry.name().unwrap_or_default();
        let rel = format!("{dir}{name}");
        if skip_paths.iter().any(|skip| *skip == rel) {
            return TreeWalkResult::Ok;
        }
        let result = (|| -> Result<()> {
            let blob = src_repo.find_blob(entry.id())?;
            let dest = dest_dir.join(&rel);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(dest, blob.content())?;
            Ok(())
        })();
        match result {
            Ok(()) => {
                written.push(rel);
                TreeWalkResult::Ok
            }
            Err(err) => {
                failure = Some(err);
                TreeWalkResult::Abort
            }
        }
    })?;
    if let Some(err) = failure {
        return Err(err);
    }
    Ok(written)
}
