//! Replaying landable groups into the downstream tree.
//!
//! Each origin group becomes one self-contained downstream commit carrying
//! `wpt-pr`/`wpt-commits` provenance, so a partially-applied batch can be
//! resumed by scanning the landing branch for what is already there. Every
//! step either commits its working-copy changes or rolls them back before
//! raising.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use git2::{Delta, DiffOptions, Oid, Repository};

use crate::config::{Config, ReplicateStrategy};
use crate::landable::{CorrelatedSync, LandableGroup};
use crate::landing::LandingSync;
use crate::record::{MutToken, SyncRecordStore, SyncType};
use crate::repo::{Checkout, SyncRepos, first_non_merge, merge_base, write_tree_to_dir};
use crate::services::Services;
use crate::unlanded::unlanded_origin_commits;
use crate::{Error, Result, metadata};

impl LandingSync {
    /// Replicate every group not already represented on the landing branch.
    ///
    /// For each unapplied group: create its replica commit (move or copy
    /// strategy), reapply local downstream commits when copying, and merge
    /// the correlated downstream sync's metadata commit. Running this over
    /// an already-complete batch is a no-op.
    pub fn apply_batch(
        &mut self,
        token: &MutToken,
        services: &Services<'_>,
        repos: &SyncRepos,
        store: &SyncRecordStore,
        config: &Config,
        prev_head: Option<String>,
        groups: &[LandableGroup],
    ) -> Result<()> {
        // Scan what this landing already holds, newest first. A landing
        // commit at the head means the whole batch (and its checkpoint)
        // went through.
        let mut last_origin: Option<u64> = None;
        let mut has_metadata = false;
        for commit in self.downstream_commits()?.iter().rev() {
            let meta = commit.metadata();
            if meta.get(metadata::KEY_TYPE).map(String::as_str) == Some(metadata::TYPE_LANDING) {
                return Ok(());
            }
            if let Some(origin) = meta.get(metadata::KEY_ORIGIN) {
                last_origin = origin.parse().ok();
                has_metadata = meta.get(metadata::KEY_TYPE).map(String::as_str)
                    == Some(metadata::TYPE_METADATA);
                break;
            }
        }

        // Downstream commits already mirrored upstream via these groups;
        // the reapply step must not replay them.
        let mut landed_backrefs: BTreeSet<String> = BTreeSet::new();
        let mut note_landed = |group: &LandableGroup| {
            if group
                .sync
                .as_ref()
                .is_some_and(|sync| sync.kind() == SyncType::Upstream)
            {
                for commit in &group.commits {
                    if let Some(backref) = commit.metadata().get(metadata::KEY_BACKREF) {
                        landed_backrefs.insert(backref.clone());
                    }
                }
            }
        };

        let mut prev_head = prev_head;
        let mut unapplied: Vec<(usize, &LandableGroup, bool)> = Vec::new();
        let mut last_applied_seen = last_origin.is_none();
        for (idx, group) in groups.iter().enumerate() {
            if last_applied_seen {
                unapplied.push((idx, group, false));
            } else {
                prev_head = Some(group.head_sha().to_string());
                if Some(group.origin) == last_origin {
                    last_applied_seen = true;
                    if !has_metadata {
                        // The replica commit exists but its metadata merge
                        // didn't happen yet.
                        unapplied.push((idx, group, true));
                    }
                }
            }
            note_landed(group);
        }

        for (idx, group, meta_only) in unapplied {
            tracing::info!(
                origin = group.origin,
                "applying group {} of {}",
                idx + 1,
                groups.len()
            );
            let mut replicated = None;
            if !meta_only {
                replicated = self.add_group(
                    token,
                    services,
                    repos,
                    store,
                    config,
                    group,
                    prev_head.as_deref(),
                )?;
            }
            prev_head = Some(group.head_sha().to_string());
            if replicated.is_some() && config.landing.strategy == ReplicateStrategy::Copy {
                self.reapply_local_commits(token, services, repos, store, config, &landed_backrefs)?;
            }
            if let Some(correlated) = &group.sync
                && correlated.kind() == SyncType::Downstream
            {
                self.merge_metadata(token, services, store, config, group.origin, correlated)?;
            }
        }
        Ok(())
    }

    /// Create the replica commit for one group. Returns `None` when there
    /// is nothing to replicate (no tree change, or the change originated
    /// downstream and round-tripped unmodified).
    fn add_group(
        &mut self,
        token: &MutToken,
        services: &Services<'_>,
        repos: &SyncRepos,
        store: &SyncRecordStore,
        config: &Config,
        group: &LandableGroup,
        prev_head: Option<&str>,
    ) -> Result<Option<Oid>> {
        // An upstream sync whose pull request head matches what we pushed
        // from downstream introduces no new upstream content.
        if let Some(correlated) = &group.sync
            && correlated.kind() == SyncType::Upstream
            && let Some(pr_head) = correlated.pr_head()
            && correlated.record.upstream_range.head == pr_head
        {
            tracing::info!(origin = group.origin, "upstream sync introduces no new changes");
            return Ok(None);
        }

        // Idempotence: the branch head may already be this group's replica.
        let head = self.checkout.head_commit()?;
        let head_meta = head.metadata();
        if head_meta.get(metadata::KEY_ORIGIN).map(String::as_str)
            == Some(group.origin.to_string().as_str())
            && !head_meta.contains_key(metadata::KEY_TYPE)
        {
            return Ok(None);
        }

        let pull = services.host.get_pull(group.origin)?;
        let author_commit = first_non_merge(&group.commits)
            .unwrap_or_else(|| group.commits.last().expect("groups are never empty"));
        let author = (
            author_commit.author_name.as_str(),
            author_commit.author_email.as_str(),
        );

        let bug = group
            .sync
            .as_ref()
            .map(CorrelatedSync::bug)
            .filter(|bug| *bug != 0)
            .unwrap_or(self.record.bug);
        let body = format!(
            "Bug {} [wpt PR {}] - {}, a=testonly\n\nAutomatic update from web-platform-tests\n{}\n--",
            bug,
            pull.number,
            pull.title,
            group
                .commits
                .iter()
                .map(|commit| commit.message.trim_end())
                .collect::<Vec<_>>()
                .join("\n--\n"),
        );
        let mut trailer = BTreeMap::new();
        trailer.insert(metadata::KEY_ORIGIN.to_string(), group.origin.to_string());
        trailer.insert(
            metadata::KEY_COMMITS.to_string(),
            metadata::join_list(group.commits.iter().map(|commit| commit.sha.as_str())),
        );
        let message = metadata::encode(&body, &trailer)?;

        let result = match config.landing.strategy {
            ReplicateStrategy::Copy => self.copy_group(repos, config, group, &message, author),
            ReplicateStrategy::Move => {
                self.move_group(repos, config, group, prev_head, &message, author)
            }
        };
        match result {
            Ok(Some(oid)) => {
                self.save_head(token, store)?;
                Ok(Some(oid))
            }
            Ok(None) => Ok(None),
            Err(err) => {
                self.checkout.reset_hard()?;
                Err(err)
            }
        }
    }

    /// Move strategy: replay the group's upstream diff under the mirrored
    /// subtree prefix.
    fn move_group(
        &self,
        repos: &SyncRepos,
        config: &Config,
        group: &LandableGroup,
        prev_head: Option<&str>,
        message: &str,
        author: (&str, &str),
    ) -> Result<Option<Oid>> {
        let head_oid = Oid::from_str(group.head_sha())?;
        let base_oid = match prev_head {
            Some(prev) => {
                let prev_oid = Oid::from_str(prev)?;
                merge_base(&repos.upstream, prev_oid, head_oid)?
            }
            None => {
                // First group of a resumed landing: diff from the parent of
                // the first non-merge commit (or of the lone merge).
                let anchor = first_non_merge(&group.commits)
                    .unwrap_or_else(|| group.commits.last().expect("groups are never empty"));
                Oid::from_str(anchor.parents.first().ok_or_else(|| {
                    Error::abort(format!("group commit {} has no parent", anchor.sha))
                })?)?
            }
        };

        tracing::info!(
            base = %base_oid,
            head = %head_oid,
            "moving upstream commits"
        );
        let changed = apply_tree_diff(
            &repos.upstream,
            Some(base_oid),
            head_oid,
            &self.checkout,
            None,
            Some(&config.downstream.subtree_path),
            &config.landing.preserved_paths,
        )?;
        if !changed {
            tracing::info!(origin = group.origin, "group didn't change the mirrored tree");
            return Ok(None);
        }
        self.checkout.stage_all(&config.downstream.subtree_path)?;
        self.checkout.commit_staged(message, Some(author), false)
    }

    /// Copy strategy: reset the mirrored subtree to the group's final tree
    /// state, keeping the preserve-list from the prior state.
    fn copy_group(
        &self,
        repos: &SyncRepos,
        config: &Config,
        group: &LandableGroup,
        message: &str,
        author: (&str, &str),
    ) -> Result<Option<Oid>> {
        let prefix = &config.downstream.subtree_path;
        let head_oid = Oid::from_str(group.head_sha())?;
        let tree_oid = repos.upstream.find_commit(head_oid)?.tree_id();

        // Remove everything first so deletions are handled, then write the
        // upstream tree state.
        let dest_dir = self.checkout.path.join(prefix);
        if dest_dir.exists() {
            std::fs::remove_dir_all(&dest_dir)?;
        }
        write_tree_to_dir(
            &repos.upstream,
            tree_oid,
            &dest_dir,
            &config.landing.preserved_paths,
        )?;
        self.checkout.stage_all(prefix)?;

        // Re-checkout the paths that must not change.
        let preserved: Vec<String> = config
            .landing
            .preserved_paths
            .iter()
            .map(|path| format!("{prefix}/{path}"))
            .collect();
        self.checkout.checkout_head_paths(&preserved)?;

        if !self.checkout.is_dirty()? {
            tracing::info!(origin = group.origin, "group didn't add any changes");
            return Ok(None);
        }
        self.checkout.commit_staged(message, Some(author), false)
    }

    /// Reapply local downstream commits that are not yet merged upstream on
    /// top of the landing head.
    ///
    /// The landing head's `reapplied-commits` trailer records progress
    /// after every successful reapplication, so an interrupted run resumes
    /// with only the remainder.
    pub fn reapply_local_commits(
        &mut self,
        token: &MutToken,
        services: &Services<'_>,
        repos: &SyncRepos,
        store: &SyncRecordStore,
        config: &Config,
        landed: &BTreeSet<String>,
    ) -> Result<()> {
        let last_sync_point = Oid::from_str(&self.record.upstream_range.base)?;
        let upstream_head = crate::repo::resolve(&repos.upstream, &config.upstream.main_branch)?;
        let commits: Vec<_> =
            unlanded_origin_commits(repos, store, config, last_sync_point, upstream_head)?
                .into_iter()
                .filter(|commit| !landed.contains(&commit.sha))
                .collect();
        if commits.is_empty() {
            return Ok(());
        }

        let head = self.checkout.head_commit()?;
        let already: Vec<String> = head
            .metadata()
            .get(metadata::KEY_REAPPLIED)
            .map(|raw| metadata::split_list(raw))
            .unwrap_or_default();
        let already_set: HashSet<&str> = already.iter().map(String::as_str).collect();
        let unapplied: Vec<_> = commits
            .iter()
            .filter(|commit| !already_set.contains(commit.sha.as_str()))
            .collect();
        tracing::debug!(
            total = commits.len(),
            unapplied = unapplied.len(),
            "reapplying local commits"
        );

        let prefix = &config.downstream.subtree_path;
        let mut applied = already.clone();
        for commit in unapplied {
            tracing::info!(sha = %commit.sha, "reapplying {}", commit.summary());
            let base = commit.parents.first().map(|p| Oid::from_str(p)).transpose()?;
            let result = apply_tree_diff(
                &repos.downstream,
                base,
                commit.oid(),
                &self.checkout,
                Some(prefix),
                Some(prefix),
                &[],
            );
            match result {
                Ok(_changed) => {
                    applied.push(commit.sha.clone());
                    let head_message = self.checkout.head_commit()?.message;
                    let message = metadata::replace_key(
                        &head_message,
                        metadata::KEY_REAPPLIED,
                        &metadata::join_list(applied.iter().map(String::as_str)),
                    )?;
                    self.checkout.stage_all(prefix)?;
                    self.checkout.amend_head(Some(&message))?;
                    self.save_head(token, store)?;
                }
                Err(err) => {
                    self.checkout.reset_hard()?;
                    let message = format!(
                        "Landing failed because reapplying commit {} failed:\n{err}",
                        commit.sha
                    );
                    services.bugs.comment(self.record.bug, &message)?;
                    return Err(Error::Abort(message));
                }
            }
        }
        Ok(())
    }

    /// Merge the correlated downstream sync's metadata commit into the
    /// landing branch.
    ///
    /// An ordered fallback chain, not nested handlers: (1) plain
    /// cherry-pick; (2) reset conflicting paths outside the sync's affected
    /// metadata back to HEAD and retry; (3) drop paths deleted by either
    /// side, hand the remainder to the external merge tool. An empty result
    /// is success without a commit.
    pub fn merge_metadata(
        &mut self,
        token: &MutToken,
        services: &Services<'_>,
        store: &SyncRecordStore,
        config: &Config,
        origin: u64,
        correlated: &CorrelatedSync,
    ) -> Result<()> {
        if self.has_metadata_for(origin)? {
            tracing::info!(origin, "metadata already applied");
            return Ok(());
        }
        let Some(meta_sha) = correlated.metadata_commit() else {
            tracing::info!(origin, "no metadata commit available");
            return Ok(());
        };
        let meta_oid = Oid::from_str(meta_sha)?;
        // The git2 handles borrow the checkout; keep them scoped so the
        // record update below can borrow it mutably.
        let committed = {
            let repo = &self.checkout.repo;
            let Ok(meta_commit) = repo.find_commit(meta_oid) else {
                tracing::info!(origin, sha = meta_sha, "metadata commit not found");
                return Ok(());
            };
            tracing::info!(origin, sha = meta_sha, "adding metadata from downstream sync");

            let author = meta_commit.author();
            let author = (
                author.name().unwrap_or("unknown").to_string(),
                author.email().unwrap_or("unknown@localhost").to_string(),
            );
            let mut trailer = BTreeMap::new();
            trailer.insert(metadata::KEY_ORIGIN.to_string(), origin.to_string());
            trailer.insert(
                metadata::KEY_TYPE.to_string(),
                metadata::TYPE_METADATA.to_string(),
            );
            let message = metadata::encode(
                meta_commit.message().unwrap_or_default().trim_end(),
                &trailer,
            )?;

            let outcome = self.merge_metadata_attempts(services, config, correlated, &meta_commit);
            match outcome {
                Ok(()) => {
                    let oid = self
                        .checkout
                        .commit_staged(&message, Some((&author.0, &author.1)), false)?;
                    repo.cleanup_state()?;
                    oid
                }
                Err(err) => {
                    self.checkout.reset_hard()?;
                    repo.cleanup_state()?;
                    if correlated.skip() {
                        tracing::info!(origin, "metadata merge failed on a skip sync; continuing");
                        return Ok(());
                    }
                    return Err(err);
                }
            }
        };

        if committed.is_some() {
            // A placeholder bug number would be rejected downstream;
            // rewrite it to a bug this landing actually owns.
            let head = self.checkout.head_commit()?;
            if head.message.starts_with("Bug None") {
                let bug = if correlated.bug() != 0 {
                    correlated.bug()
                } else {
                    self.record.bug
                };
                let rewritten =
                    format!("Bug {bug}{}", &head.message["Bug None".len()..]);
                self.checkout.amend_head(Some(&rewritten))?;
            }
            self.save_head(token, store)?;
        }
        Ok(())
    }

    /// The staged fallback chain for a metadata cherry-pick. On success the
    /// index holds the resolved result, ready to commit.
    fn merge_metadata_attempts(
        &self,
        services: &Services<'_>,
        config: &Config,
        correlated: &CorrelatedSync,
        meta_commit: &git2::Commit<'_>,
    ) -> Result<()> {
        let repo = &self.checkout.repo;
        repo.cherrypick(meta_commit, None)?;
        if !repo.index()?.has_conflicts() {
            return Ok(());
        }

        // Attempt 2: conflicts on paths the sync does not claim are
        // collateral; reset them to HEAD and keep the rest.
        tracing::info!("cherry-pick failed, retrying with only test-related changes");
        let affected: HashSet<String> = correlated
            .affected_meta_paths(&config.downstream.meta_path)
            .into_iter()
            .collect();
        let conflicts = index_conflicts(repo)?;
        let mut reset_paths = Vec::new();
        for conflict in &conflicts {
            if affected.contains(&conflict.path) {
                continue;
            }
            if conflict.ours_deleted {
                // Deleted on the landing branch; keep it deleted.
                self.checkout.remove_file(&conflict.path)?;
                let mut index = repo.index()?;
                index.remove_path(std::path::Path::new(&conflict.path))?;
                index.write()?;
            } else {
                reset_paths.push(conflict.path.clone());
            }
        }
        self.checkout.checkout_head_paths(&reset_paths)?;
        if !repo.index()?.has_conflicts() {
            return Ok(());
        }

        // Attempt 3: drop paths deleted by either side, then let the
        // external merge tool resolve the remainder.
        tracing::info!("cherry-pick still conflicted, running merge tool");
        let mut unresolved = Vec::new();
        for conflict in index_conflicts(repo)? {
            if conflict.ours_deleted || conflict.theirs_deleted {
                tracing::info!(path = %conflict.path, "removing path deleted on one side");
                self.checkout.remove_file(&conflict.path)?;
                let mut index = repo.index()?;
                index.remove_path(std::path::Path::new(&conflict.path))?;
                index.write()?;
            } else {
                unresolved.push(conflict.path);
            }
        }
        if !unresolved.is_empty() {
            let failed = services
                .merge_tool
                .resolve(&self.checkout.path, &unresolved)?;
            if !failed.is_empty() {
                return Err(Error::abort(format!(
                    "metadata merge tool could not resolve: {}",
                    failed.join(", ")
                )));
            }
            let mut index = repo.index()?;
            for path in &unresolved {
                index.add_path(std::path::Path::new(path))?;
            }
            index.write()?;
        }
        Ok(())
    }

    /// Whether a metadata commit for `origin` already exists on the landing
    /// branch.
    fn has_metadata_for(&self, origin: u64) -> Result<bool> {
        let origin = origin.to_string();
        for commit in self.downstream_commits()?.iter().rev() {
            let meta = commit.metadata();
            if meta.get(metadata::KEY_ORIGIN) == Some(&origin)
                && meta.get(metadata::KEY_TYPE).map(String::as_str)
                    == Some(metadata::TYPE_METADATA)
            {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// One conflicted index entry, reduced to what the fallback chain needs.
struct ConflictEntry {
    path: String,
    ours_deleted: bool,
    theirs_deleted: bool,
}

fn index_conflicts(repo: &Repository) -> Result<Vec<ConflictEntry>> {
    let index = repo.index()?;
    let mut out = Vec::new();
    for conflict in index.conflicts()? {
        let conflict = conflict?;
        let path_bytes = conflict
            .our
            .as_ref()
            .or(conflict.their.as_ref())
            .or(conflict.ancestor.as_ref())
            .map(|entry| entry.path.clone())
            .unwrap_or_default();
        out.push(ConflictEntry {
            path: String::from_utf8_lossy(&path_bytes).into_owned(),
            ours_deleted: conflict.our.is_none(),
            theirs_deleted: conflict.their.is_none(),
        });
    }
    Ok(out)
}

/// Replay the tree diff `base..head` from `src_repo` into `checkout`.
///
/// `src_prefix` restricts and strips the source paths; `dest_prefix`
/// re-roots them in the checkout. The application is file-level three-way:
/// a path already at its post-image is skipped, a path at its pre-image is
/// rewritten, anything else cannot be merged cleanly and aborts. Returns
/// whether any file changed.
pub fn apply_tree_diff(
    src_repo: &Repository,
    base: Option<Oid>,
    head: Oid,
    checkout: &Checkout,
    src_prefix: Option<&str>,
    dest_prefix: Option<&str>,
    excluded: &[String],
) -> Result<bool> {
    let head_tree = src_repo.find_commit(head)?.tree()?;
    let base_tree = base
        .map(|oid| src_repo.find_commit(oid).and_then(|commit| commit.tree()))
        .transpose()?;

    let mut opts = DiffOptions::new();
    if let Some(prefix) = src_prefix {
        opts.pathspec(prefix);
    }
    let diff =
        src_repo.diff_tree_to_tree(base_tree.as_ref(), Some(&head_tree), Some(&mut opts))?;

    let mut changed = false;
    for delta in diff.deltas() {
        let status = delta.status();
        let file = match status {
            Delta::Deleted => delta.old_file(),
            _ => delta.new_file(),
        };
        let Some(path) = file.path().and_then(|p| p.to_str()) else {
            return Err(Error::abort("diff contains a non-utf8 path".to_string()));
        };
        let rel = match src_prefix {
            Some(prefix) => path
                .strip_prefix(prefix)
                .map(|stripped| stripped.trim_start_matches('/'))
                .unwrap_or(path),
            None => path,
        };
        if excluded.iter().any(|skip| skip == rel) {
            continue;
        }
        let dest_rel = match dest_prefix {
            Some(prefix) => format!("{prefix}/{rel}"),
            None => rel.to_string(),
        };
        let current = checkout.read_file(&dest_rel)?;

        match status {
            Delta::Added | Delta::Modified | Delta::Typechange => {
                let new = blob_bytes(src_repo, delta.new_file().id())?;
                let old = if status == Delta::Added {
                    None
                } else {
                    Some(blob_bytes(src_repo, delta.old_file().id())?)
                };
                match current {
                    Some(cur) if cur == new => {}
                    Some(cur) if old.as_ref() == Some(&cur) => {
                        checkout.write_file(&dest_rel, &new)?;
                        changed = true;
                    }
                    None if old.is_none() => {
                        checkout.write_file(&dest_rel, &new)?;
                        changed = true;
                    }
                    _ => {
                        return Err(Error::abort(format!(
                            "cannot apply {dest_rel} cleanly: local modifications"
                        )));
                    }
                }
            }
            Delta::Deleted => {
                let old = blob_bytes(src_repo, delta.old_file().id())?;
                match current {
                    None => {}
                    Some(cur) if cur == old => {
                        checkout.remove_file(&dest_rel)?;
                        changed = true;
                    }
                    Some(_) => {
                        return Err(Error::abort(format!(
                            "cannot delete {dest_rel} cleanly: local modifications"
                        )));
                    }
                }
            }
            other => {
                return Err(Error::abort(format!(
                    "unsupported delta {other:?} for {dest_rel}"
                )));
            }
        }
    }
    Ok(changed)
}

fn blob_bytes(repo: &Repository, oid: Oid) -> Result<Vec<u8>> {
    Ok(repo.find_blob(oid)?.content().to_vec())
}
