//! Deciding which origin groups may land.

use git2::Oid;

use crate::record::{SyncRecord, SyncRecordStore, SyncType, data_keys};
use crate::repo::SyncRepos;
use crate::unlanded::{OriginGroup, unlanded_by_origin};
use crate::{Result, metadata};

/// Why a group can or cannot land right now.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LandableStatus {
    /// Downstream sync finished its metadata update.
    Ready,
    /// Downstream sync is flagged to land without metadata.
    Skip,
    /// The change originated downstream; nothing gates it here.
    Upstream,
    /// No originating change could be attributed.
    NoOrigin,
    /// No correlated sync record exists yet.
    NoSync,
    /// Downstream sync exists but its metadata update has not finished.
    AwaitingMetadata,
}

impl LandableStatus {
    pub fn blocks_landing(self) -> bool {
        matches!(
            self,
            LandableStatus::NoSync | LandableStatus::AwaitingMetadata
        )
    }

    pub fn reason(self) -> &'static str {
        match self {
            LandableStatus::Ready => "ready",
            LandableStatus::Skip => "skip",
            LandableStatus::Upstream => "change originated downstream",
            LandableStatus::NoOrigin => "no originating change",
            LandableStatus::NoSync => "no corresponding sync",
            LandableStatus::AwaitingMetadata => "metadata update not complete",
        }
    }
}

/// A group's correlated upstream/downstream sync record, viewed through the
/// fields the landing engine needs.
#[derive(Debug, Clone)]
pub struct CorrelatedSync {
    pub record: SyncRecord,
}

impl CorrelatedSync {
    pub fn kind(&self) -> SyncType {
        self.record.sync_type()
    }

    pub fn bug(&self) -> u64 {
        self.record.bug
    }

    pub fn skip(&self) -> bool {
        self.record
            .data
            .get(data_keys::SKIP)
            .is_some_and(|v| v == "true")
    }

    pub fn landable_status(&self) -> LandableStatus {
        match self.kind() {
            SyncType::Upstream => LandableStatus::Upstream,
            SyncType::Downstream => {
                if self.skip() {
                    LandableStatus::Skip
                } else if self
                    .record
                    .data
                    .get(data_keys::METADATA_READY)
                    .is_some_and(|v| v == "true")
                {
                    LandableStatus::Ready
                } else {
                    LandableStatus::AwaitingMetadata
                }
            }
            SyncType::Landing => LandableStatus::NoSync,
        }
    }

    /// Sha of the downstream sync's metadata commit, if one exists.
    pub fn metadata_commit(&self) -> Option<&str> {
        self.record
            .data
            .get(data_keys::METADATA_COMMIT)
            .map(String::as_str)
    }

    /// Metadata paths belonging to tests this sync affects; conflicts on
    /// these paths are never auto-reset during a metadata merge.
    pub fn affected_meta_paths(&self, meta_prefix: &str) -> Vec<String> {
        self.record
            .data
            .get(data_keys::AFFECTED_TESTS)
            .map(|raw| {
                metadata::split_list(raw)
                    .into_iter()
                    .map(|test| format!("{meta_prefix}/{test}.ini"))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Head sha the origin pull request reached, recorded when the change
    /// was upstreamed. Lets the landing skip replaying changes that came
    /// from downstream in the first place.
    pub fn pr_head(&self) -> Option<&str> {
        self.record.data.get(data_keys::PR_HEAD).map(String::as_str)
    }
}

/// One group cleared for landing.
#[derive(Debug, Clone)]
pub struct LandableGroup {
    pub origin: u64,
    pub sync: Option<CorrelatedSync>,
    pub commits: Vec<crate::repo::CommitInfo>,
}

impl LandableGroup {
    pub fn head_sha(&self) -> &str {
        &self.commits.last().expect("groups are never empty").sha
    }
}

/// The ordered prefix of unlanded origin groups that may land now.
///
/// Unless `include_incomplete`, the first group with no correlated sync, or
/// whose downstream sync is neither ready nor skip, ends the batch (that
/// group excluded). Returns `None` when nothing is landable, otherwise the
/// tail boundary sha (the next checkpoint candidate) and the groups.
pub fn landable_commits(
    repos: &SyncRepos,
    store: &SyncRecordStore,
    prev_head: Oid,
    new_head: Oid,
    include_incomplete: bool,
) -> Result<Option<(String, Vec<LandableGroup>)>> {
    let groups = unlanded_by_origin(repos, prev_head, new_head)?;
    let mut landable: Vec<LandableGroup> = Vec::new();

    for OriginGroup { origin, commits } in groups {
        let Some(origin) = origin else {
            // Trivial, unattributable change; nothing to correlate.
            continue;
        };
        let sync = store.load_by_origin(origin)?.map(|record| CorrelatedSync { record });
        if !include_incomplete {
            let status = match &sync {
                None => LandableStatus::NoSync,
                Some(correlated) => correlated.landable_status(),
            };
            if status.blocks_landing() {
                tracing::info!(origin, reason = status.reason(), "stopping landable set");
                break;
            }
        }
        landable.push(LandableGroup {
            origin,
            sync,
            commits,
        });
    }

    if landable.is_empty() {
        tracing::info!("no new commits are landable");
        return Ok(None);
    }

    let head = landable.last().expect("non-empty").head_sha().to_string();
    tracing::info!(%head, groups = landable.len(), "landing up to commit");
    Ok(Some((head, landable)))
}
