//! Persistent synchronization process records.
//!
//! One `SyncRecord` tracks one logical synchronization process (a landing
//! batch, an upstreamed change, a downstreamed change). Records are mutated
//! only while the cross-process lock for their `(sync_type, object_id)` key
//! is held; mutators take a `MutToken` as proof.

mod lock;
mod store;

pub use lock::{MutToken, SyncLock};
pub use store::{RecordSeed, SyncRecordStore};

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Which kind of synchronization process a record tracks.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    /// A batch of upstream changes being replayed downstream.
    Landing,
    /// A downstream change being mirrored upstream.
    Upstream,
    /// An upstream change with downstream metadata in flight.
    Downstream,
}

impl SyncType {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncType::Landing => "landing",
            SyncType::Upstream => "upstream",
            SyncType::Downstream => "downstream",
        }
    }

    /// Landing is single-instance: at most one open record at a time.
    pub fn single_open(self) -> bool {
        matches!(self, SyncType::Landing)
    }
}

impl fmt::Display for SyncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process status. Values are shared across sync types; which transitions
/// are legal depends on the type (see `SyncStatus::can_transition`).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStatus {
    Open,
    /// Upstream change merged into the upstream tree, downstream merge
    /// pending.
    WptMerged,
    /// Downstream metadata update finished; the change may land.
    Ready,
    Complete,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Open => "open",
            SyncStatus::WptMerged => "wpt-merged",
            SyncStatus::Ready => "ready",
            SyncStatus::Complete => "complete",
        }
    }

    /// The per-type transition table. Everything not listed is illegal.
    pub fn can_transition(sync_type: SyncType, from: SyncStatus, to: SyncStatus) -> bool {
        use SyncStatus::*;
        match sync_type {
            SyncType::Landing => matches!((from, to), (Open, Complete)),
            SyncType::Upstream => {
                matches!((from, to), (Open, WptMerged) | (WptMerged, Complete) | (Open, Complete))
            }
            SyncType::Downstream => {
                matches!((from, to), (Open, Ready) | (Ready, Complete) | (Open, Complete))
            }
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SyncStatus::Complete)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one process: `(sync_type, object_id, seq)`.
///
/// `object_id` is the bug the process is attached to. `seq` distinguishes
/// repeated processes for the same object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessName {
    pub sync_type: SyncType,
    pub object_id: u64,
    pub seq: u64,
}

impl fmt::Display for ProcessName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.sync_type, self.object_id, self.seq)
    }
}

/// A `base..head` pair of commit shas in one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRange {
    pub base: String,
    pub head: String,
}

impl CommitRange {
    pub fn new(base: impl Into<String>, head: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            head: head.into(),
        }
    }
}

/// One persisted synchronization process.
///
/// Reads are free; every mutator takes a `MutToken` covering the record's
/// lock key and fails with `LockRequired` otherwise. Status changes are
/// validated against the transition table and leave the record unchanged on
/// rejection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRecord {
    pub name: ProcessName,
    pub status: SyncStatus,
    pub bug: u64,
    pub upstream_range: CommitRange,
    pub downstream_range: CommitRange,
    /// Process-specific fields (`origin-id`, `skip`, `metadata-commit`,
    /// `affected-tests`, `error`, ...).
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    pub created_at_ms: u64,
}

/// Well-known `data` keys.
pub mod data_keys {
    /// Originating change (pull request) id, as a decimal string.
    pub const ORIGIN_ID: &str = "origin-id";
    /// Set when a downstream sync should land without metadata.
    pub const SKIP: &str = "skip";
    /// Set once a downstream sync's metadata update finished.
    pub const METADATA_READY: &str = "metadata-ready";
    /// Sha of the downstream sync's metadata commit.
    pub const METADATA_COMMIT: &str = "metadata-commit";
    /// Comma-joined test paths a downstream sync's metadata touches.
    pub const AFFECTED_TESTS: &str = "affected-tests";
    /// Head sha of the origin pull request (upstream syncs).
    pub const PR_HEAD: &str = "pr-head";
    /// Last recorded failure, for operators.
    pub const ERROR: &str = "error";
}

impl SyncRecord {
    pub fn sync_type(&self) -> SyncType {
        self.name.sync_type
    }

    pub fn origin_id(&self) -> Option<u64> {
        self.data
            .get(data_keys::ORIGIN_ID)
            .and_then(|raw| raw.parse().ok())
    }

    pub fn is_open(&self) -> bool {
        self.status == SyncStatus::Open
    }

    fn check_token(&self, token: &MutToken) -> Result<()> {
        if token.covers(self.name.sync_type, self.name.object_id) {
            Ok(())
        } else {
            Err(Error::LockRequired {
                sync_type: self.name.sync_type,
                object_id: self.name.object_id,
            })
        }
    }

    pub fn set_status(&mut self, token: &MutToken, to: SyncStatus) -> Result<()> {
        self.check_token(token)?;
        if !SyncStatus::can_transition(self.name.sync_type, self.status, to) {
            return Err(Error::InvalidTransition {
                name: self.name.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn set_downstream_head(&mut self, token: &MutToken, head: impl Into<String>) -> Result<()> {
        self.check_token(token)?;
        self.downstream_range.head = head.into();
        Ok(())
    }

    pub fn set_data(
        &mut self,
        token: &MutToken,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<()> {
        self.check_token(token)?;
        self.data.insert(key.into(), value.into());
        Ok(())
    }

    pub fn record_error(&mut self, token: &MutToken, message: impl Into<String>) -> Result<()> {
        self.set_data(token, data_keys::ERROR, message)
    }
}

/// One CI validation attempt tied to a landing record.
///
/// Owned by its landing record and mutated under the same `(landing, bug)`
/// lock. The only legal transition is open -> complete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TryPush {
    /// Attempt number within the owning landing, starting at 0.
    pub seq: u64,
    pub status: SyncStatus,
    /// Repeated-run reliability check rather than a single pass/fail check.
    pub stability: bool,
    pub infra_fail: bool,
    /// Human override: classify despite infra or excess failures.
    pub accept_failures: bool,
    pub rebuild_count: u32,
    /// Opaque result-viewer reference for humans.
    pub treeherder_url: String,
}

impl TryPush {
    pub fn is_open(&self) -> bool {
        self.status == SyncStatus::Open
    }

    pub fn mark_complete(&mut self, token: &MutToken, landing: &SyncRecord) -> Result<()> {
        landing.check_token(token)?;
        if self.status != SyncStatus::Open {
            return Err(Error::InvalidTransition {
                name: landing.name.clone(),
                from: self.status,
                to: SyncStatus::Complete,
            });
        }
        self.status = SyncStatus::Complete;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table() {
        use SyncStatus::*;
        assert!(SyncStatus::can_transition(SyncType::Landing, Open, Complete));
        assert!(!SyncStatus::can_transition(SyncType::Landing, Complete, Open));
        assert!(!SyncStatus::can_transition(SyncType::Landing, Open, Ready));
        assert!(SyncStatus::can_transition(SyncType::Upstream, Open, WptMerged));
        assert!(SyncStatus::can_transition(SyncType::Upstream, WptMerged, Complete));
        assert!(!SyncStatus::can_transition(SyncType::Upstream, WptMerged, Open));
        assert!(SyncStatus::can_transition(SyncType::Downstream, Open, Ready));
        assert!(!SyncStatus::can_transition(SyncType::Downstream, Ready, Open));
    }

    #[test]
    fn process_name_display() {
        let name = ProcessName {
            sync_type: SyncType::Landing,
            object_id: 1234,
            seq: 0,
        };
        assert_eq!(name.to_string(), "landing/1234/0");
    }
}
