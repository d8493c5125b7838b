//! Computing which commits have not yet crossed between the trees.
//!
//! Two directions:
//! - `unlanded_by_origin`: upstream commits not yet mirrored downstream,
//!   grouped by originating change, in first-parent walk order.
//! - `unlanded_origin_commits`: downstream commits on the integration
//!   history not yet reflected upstream; these get reapplied on top of a
//!   landing so local work is never silently dropped.

use std::collections::{HashMap, HashSet};

use git2::{Oid, Sort};

use crate::config::Config;
use crate::record::{SyncRecordStore, SyncStatus, SyncType};
use crate::repo::{CommitInfo, SyncRepos, first_parent_range, is_ancestor, range_commits, resolve};
use crate::{Result, metadata};

/// One group of upstream commits belonging to a single originating change
/// (or to none, for unattributable commits).
#[derive(Debug, Clone)]
pub struct OriginGroup {
    pub origin: Option<u64>,
    pub commits: Vec<CommitInfo>,
}

/// Ordered map of origin groups with move-to-end semantics.
///
/// Appending to an origin already present re-opens its group: the group
/// moves to the end of the order (internal commit order preserved, new
/// commits appended). The output is therefore ordered by each origin's
/// *last* appearance in the walk, keeping interleaved-but-related commits
/// contiguous.
#[derive(Debug, Default)]
pub struct OriginQueue {
    entries: Vec<OriginGroup>,
    index: HashMap<Option<u64>, usize>,
}

impl OriginQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, origin: Option<u64>) -> bool {
        self.index.contains_key(&origin)
    }

    pub fn append(&mut self, origin: Option<u64>, commits: Vec<CommitInfo>) {
        let mut group = match self.index.remove(&origin) {
            Some(idx) => {
                let group = self.entries.remove(idx);
                for stale in self.index.values_mut() {
                    if *stale > idx {
                        *stale -= 1;
                    }
                }
                group
            }
            None => OriginGroup {
                origin,
                commits: Vec::new(),
            },
        };
        group.commits.extend(commits);
        self.entries.push(group);
        self.index.insert(origin, self.entries.len() - 1);
    }

    pub fn into_groups(self) -> Vec<OriginGroup> {
        self.entries
    }
}

/// Group the upstream range `(prev_head, new_head]` by originating change.
///
/// Walks the first-parent chain oldest first. Legacy bidirectional-sync
/// merges are dropped. A merge commit opening a new group also pulls in the
/// commits reachable only through its non-first parent that share its
/// origin, so squash/merge workflows keep their internal commits attached
/// to the right group.
pub fn unlanded_by_origin(
    repos: &SyncRepos,
    prev_head: Oid,
    new_head: Oid,
) -> Result<Vec<OriginGroup>> {
    let commits = first_parent_range(&repos.upstream, prev_head, new_head)?;
    let mut queue = OriginQueue::new();

    for commit in commits {
        if commit.is_legacy_sync() {
            continue;
        }
        let origin = commit.origin();
        let mut group = Vec::new();
        if commit.is_merge() && origin.is_some() && !queue.contains(origin) {
            // Commits reachable only through the non-first parent belong to
            // this merge's pull request unless they say otherwise.
            let first_parent = Oid::from_str(&commit.parents[0])?;
            for merged in range_commits(&repos.upstream, first_parent, commit.oid())? {
                if merged.sha != commit.sha
                    && merged.origin().is_none_or(|other| Some(other) == origin)
                {
                    group.push(merged);
                }
            }
        }
        group.push(commit);
        queue.append(origin, group);
    }

    Ok(queue.into_groups())
}

/// Downstream commits that landed on the integration branch but are not yet
/// merged into the upstream commit we are updating to.
///
/// Sources, unioned then deduplicated by sha:
/// - commits of every open upstream sync that are ancestors of the
///   integration branch;
/// - commits in the upstream range `(last_sync_point, upstream_head]` whose
///   `gecko-commit` back-reference resolves to a downstream commit on the
///   integration branch.
///
/// The result is ordered by one newest-to-oldest walk of the integration
/// history, stopping as soon as the set is exhausted, then reversed: the
/// order the commits originally landed downstream.
pub fn unlanded_origin_commits(
    repos: &SyncRepos,
    store: &SyncRecordStore,
    config: &Config,
    last_sync_point: Oid,
    upstream_head: Oid,
) -> Result<Vec<CommitInfo>> {
    let integration = resolve(&repos.downstream, &config.downstream.integration_branch)?;
    let mut wanted: HashSet<String> = HashSet::new();

    for status in [SyncStatus::Open, SyncStatus::WptMerged] {
        for sync in store.load_by_status(SyncType::Upstream, status)? {
            let commits = match sync_downstream_commits(repos, &sync) {
                Ok(commits) => commits,
                Err(err) => {
                    tracing::warn!(name = %sync.name, %err, "skipping upstream sync with unresolvable range");
                    continue;
                }
            };
            let mut on_branch = Vec::new();
            for commit in commits {
                if is_ancestor(&repos.downstream, commit.oid(), integration)? {
                    on_branch.push(commit.sha);
                }
            }
            if !on_branch.is_empty() {
                tracing::info!(
                    bug = sync.bug,
                    origin = ?sync.origin_id(),
                    "commits from unlanded upstream sync will be reapplied"
                );
                wanted.extend(on_branch);
            }
        }
    }

    for commit in range_commits(&repos.upstream, last_sync_point, upstream_head)? {
        let Some(backref) = commit.metadata().get(metadata::KEY_BACKREF).cloned() else {
            continue;
        };
        let Ok(oid) = Oid::from_str(&backref) else {
            continue;
        };
        if repos.downstream.find_commit(oid).is_err() {
            continue;
        }
        if is_ancestor(&repos.downstream, oid, integration)? {
            wanted.insert(backref);
        }
    }

    if wanted.is_empty() {
        return Ok(Vec::new());
    }

    // One linear walk of the integration history determines the final
    // order; every member of the set touches the mirrored subtree, so the
    // walk is bounded by the set size and branch depth.
    let mut ordered = Vec::new();
    let mut walk = repos.downstream.revwalk()?;
    walk.push(integration)?;
    walk.set_sorting(Sort::TOPOLOGICAL)?;
    for oid in walk {
        let oid = oid?;
        let sha = oid.to_string();
        if wanted.remove(&sha) {
            ordered.push(CommitInfo::load(&repos.downstream, oid)?);
        }
        if wanted.is_empty() {
            break;
        }
    }

    ordered.reverse();
    Ok(ordered)
}

fn sync_downstream_commits(
    repos: &SyncRepos,
    sync: &crate::record::SyncRecord,
) -> Result<Vec<CommitInfo>> {
    let base = Oid::from_str(&sync.downstream_range.base)?;
    let head = Oid::from_str(&sync.downstream_range.head)?;
    range_commits(&repos.downstream, base, head)
}
