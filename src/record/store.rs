//! JSON-file persistence for sync records.
//!
//! Layout under the state directory:
//!
//! ```text
//! state/
//!   locks/<type>-<obj>.lock
//!   records/<type>/<obj>/<seq>.json
//!   trypush/<obj>/<seq>.json          (owned by the landing for <obj>)
//! ```
//!
//! Writes go through a tmp file + rename so a crashed invocation never
//! leaves a half-written record. Records are never deleted; terminal
//! statuses stay on disk as the audit trail.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::record::{
    CommitRange, MutToken, ProcessName, SyncLock, SyncRecord, SyncStatus, SyncType, TryPush,
};
use crate::{Error, Result};

/// Seed for creating a record; the store allocates the `seq`.
#[derive(Debug, Clone)]
pub struct RecordSeed {
    pub sync_type: SyncType,
    pub bug: u64,
    pub upstream_range: CommitRange,
    pub downstream_range: CommitRange,
    pub data: std::collections::BTreeMap<String, String>,
}

/// Owns all `SyncRecord` and `TryPush` documents under one state directory.
#[derive(Debug, Clone)]
pub struct SyncRecordStore {
    root: PathBuf,
}

impl SyncRecordStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    fn records_dir(&self, sync_type: SyncType) -> PathBuf {
        self.root.join("records").join(sync_type.as_str())
    }

    fn record_path(&self, name: &ProcessName) -> PathBuf {
        self.records_dir(name.sync_type)
            .join(name.object_id.to_string())
            .join(format!("{}.json", name.seq))
    }

    fn trypush_path(&self, object_id: u64, seq: u64) -> PathBuf {
        self.root
            .join("trypush")
            .join(object_id.to_string())
            .join(format!("{seq}.json"))
    }

    /// Run `fn` while holding the exclusive lock for `(sync_type, object_id)`.
    ///
    /// The lock is released on every exit path, including errors, when the
    /// guard drops.
    pub fn with_lock<T>(
        &self,
        sync_type: SyncType,
        object_id: u64,
        f: impl FnOnce(&MutToken) -> Result<T>,
    ) -> Result<T> {
        let lock = SyncLock::acquire(&self.locks_dir(), sync_type, object_id)?;
        f(lock.token())
    }

    /// Create a record, atomically allocating its `seq` and persisting it
    /// with status `open`. Must run under the `(sync_type, bug)` lock.
    ///
    /// Enforces the single-open invariant for single-instance types.
    pub fn create(&self, token: &MutToken, seed: RecordSeed) -> Result<SyncRecord> {
        if !token.covers(seed.sync_type, seed.bug) {
            return Err(Error::LockRequired {
                sync_type: seed.sync_type,
                object_id: seed.bug,
            });
        }
        if seed.sync_type.single_open() {
            let open = self.load_by_status(seed.sync_type, SyncStatus::Open)?;
            if let Some(existing) = open.first() {
                return Err(Error::abort(format!(
                    "an open {} record already exists: {}",
                    seed.sync_type, existing.name
                )));
            }
        }

        let obj_dir = self
            .records_dir(seed.sync_type)
            .join(seed.bug.to_string());
        fs::create_dir_all(&obj_dir)?;
        let seq = next_seq(&obj_dir)?;

        let record = SyncRecord {
            name: ProcessName {
                sync_type: seed.sync_type,
                object_id: seed.bug,
                seq,
            },
            status: SyncStatus::Open,
            bug: seed.bug,
            upstream_range: seed.upstream_range,
            downstream_range: seed.downstream_range,
            data: seed.data,
            created_at_ms: now_ms(),
        };
        write_json(&self.record_path(&record.name), &record)?;
        tracing::info!(name = %record.name, "created sync record");
        Ok(record)
    }

    /// Persist a mutated record.
    pub fn save(&self, token: &MutToken, record: &SyncRecord) -> Result<()> {
        if !token.covers(record.name.sync_type, record.name.object_id) {
            return Err(Error::LockRequired {
                sync_type: record.name.sync_type,
                object_id: record.name.object_id,
            });
        }
        write_json(&self.record_path(&record.name), record)
    }

    pub fn load(&self, name: &ProcessName) -> Result<SyncRecord> {
        let path = self.record_path(name);
        read_json(&path)?.ok_or_else(|| Error::RecordNotFound(name.clone()))
    }

    /// The highest-seq record for `(sync_type, object_id)`, if any.
    pub fn load_latest(&self, sync_type: SyncType, object_id: u64) -> Result<Option<SyncRecord>> {
        let dir = self.records_dir(sync_type).join(object_id.to_string());
        let mut latest: Option<SyncRecord> = None;
        for record in read_dir_json::<SyncRecord>(&dir)? {
            if latest.as_ref().is_none_or(|cur| record.name.seq > cur.name.seq) {
                latest = Some(record);
            }
        }
        Ok(latest)
    }

    /// All records of `sync_type` currently in `status`, ordered by identity.
    pub fn load_by_status(
        &self,
        sync_type: SyncType,
        status: SyncStatus,
    ) -> Result<Vec<SyncRecord>> {
        let dir = self.records_dir(sync_type);
        let mut out = Vec::new();
        for obj_dir in read_dirs(&dir)? {
            for record in read_dir_json::<SyncRecord>(&obj_dir)? {
                if record.status == status {
                    out.push(record);
                }
            }
        }
        out.sort_by_key(|record| (record.name.object_id, record.name.seq));
        Ok(out)
    }

    /// The upstream or downstream record correlated with an originating
    /// change, preferring the newest non-terminal one.
    pub fn load_by_origin(&self, origin: u64) -> Result<Option<SyncRecord>> {
        let mut best: Option<SyncRecord> = None;
        for sync_type in [SyncType::Downstream, SyncType::Upstream] {
            for obj_dir in read_dirs(&self.records_dir(sync_type))? {
                for record in read_dir_json::<SyncRecord>(&obj_dir)? {
                    if record.origin_id() != Some(origin) {
                        continue;
                    }
                    let better = match &best {
                        None => true,
                        Some(cur) => {
                            (!record.status.is_terminal(), record.created_at_ms)
                                > (!cur.status.is_terminal(), cur.created_at_ms)
                        }
                    };
                    if better {
                        best = Some(record);
                    }
                }
            }
        }
        Ok(best)
    }

    /// Create the next try push for a landing record. Runs under the
    /// landing's lock (same token as record mutations).
    pub fn create_try_push(
        &self,
        token: &MutToken,
        landing: &SyncRecord,
        stability: bool,
        rebuild_count: u32,
        treeherder_url: impl Into<String>,
    ) -> Result<TryPush> {
        if !token.covers(landing.name.sync_type, landing.name.object_id) {
            return Err(Error::LockRequired {
                sync_type: landing.name.sync_type,
                object_id: landing.name.object_id,
            });
        }
        let dir = self.root.join("trypush").join(landing.bug.to_string());
        fs::create_dir_all(&dir)?;
        let push = TryPush {
            seq: next_seq(&dir)?,
            status: SyncStatus::Open,
            stability,
            infra_fail: false,
            accept_failures: false,
            rebuild_count,
            treeherder_url: treeherder_url.into(),
        };
        write_json(&self.trypush_path(landing.bug, push.seq), &push)?;
        tracing::info!(bug = landing.bug, seq = push.seq, stability, "created try push");
        Ok(push)
    }

    pub fn save_try_push(&self, token: &MutToken, landing: &SyncRecord, push: &TryPush) -> Result<()> {
        if !token.covers(landing.name.sync_type, landing.name.object_id) {
            return Err(Error::LockRequired {
                sync_type: landing.name.sync_type,
                object_id: landing.name.object_id,
            });
        }
        write_json(&self.trypush_path(landing.bug, push.seq), push)
    }

    /// The newest try push for a landing record, if any.
    pub fn latest_try_push(&self, landing: &SyncRecord) -> Result<Option<TryPush>> {
        let dir = self.root.join("trypush").join(landing.bug.to_string());
        let mut latest: Option<TryPush> = None;
        for push in read_dir_json::<TryPush>(&dir)? {
            if latest.as_ref().is_none_or(|cur| push.seq > cur.seq) {
                latest = Some(push);
            }
        }
        Ok(latest)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Allocate the next sequence number from the files already in `dir`.
fn next_seq(dir: &Path) -> Result<u64> {
    let mut next = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
            continue;
        };
        if let Ok(seq) = stem.parse::<u64>() {
            next = next.max(seq + 1);
        }
    }
    Ok(next)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| Error::StoreCorrupt {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(Error::Io(err)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| Error::StoreCorrupt {
            path: path.to_path_buf(),
            source,
        })
}

fn read_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    match fs::read_dir(dir) {
        Ok(entries) => {
            for entry in entries {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    out.push(entry.path());
                }
            }
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(Error::Io(err)),
    }
    out.sort();
    Ok(out)
}

fn read_dir_json<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut out = Vec::new();
    match fs::read_dir(dir) {
        Ok(entries) => {
            for entry in entries {
                let entry = entry?;
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("json")
                    && let Some(value) = read_json(&path)?
                {
                    out.push(value);
                }
            }
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(Error::Io(err)),
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn store() -> (tempfile::TempDir, SyncRecordStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SyncRecordStore::new(dir.path().join("state"));
        (dir, store)
    }

    fn seed(sync_type: SyncType, bug: u64) -> RecordSeed {
        RecordSeed {
            sync_type,
            bug,
            upstream_range: CommitRange::new("base", "head"),
            downstream_range: CommitRange::new("dbase", "dhead"),
            data: BTreeMap::new(),
        }
    }

    #[test]
    fn create_load_round_trip() {
        let (_dir, store) = store();
        let record = store
            .with_lock(SyncType::Landing, 10, |token| {
                store.create(token, seed(SyncType::Landing, 10))
            })
            .expect("create");
        assert_eq!(record.name.seq, 0);
        let loaded = store.load(&record.name).expect("load");
        assert_eq!(loaded.status, SyncStatus::Open);
        assert_eq!(loaded.upstream_range.head, "head");
    }

    #[test]
    fn mutation_requires_matching_token() {
        let (_dir, store) = store();
        let mut record = store
            .with_lock(SyncType::Landing, 10, |token| {
                store.create(token, seed(SyncType::Landing, 10))
            })
            .expect("create");

        let err = store
            .with_lock(SyncType::Landing, 11, |other| {
                record.set_status(other, SyncStatus::Complete)
            })
            .unwrap_err();
        assert!(matches!(err, Error::LockRequired { .. }));
        // Record unchanged after the rejected mutation.
        assert_eq!(record.status, SyncStatus::Open);
    }

    #[test]
    fn illegal_transition_leaves_record_unchanged() {
        let (_dir, store) = store();
        store
            .with_lock(SyncType::Downstream, 5, |token| {
                let mut record = store.create(token, seed(SyncType::Downstream, 5))?;
                record.set_status(token, SyncStatus::Ready)?;
                let err = record.set_status(token, SyncStatus::WptMerged).unwrap_err();
                assert!(matches!(err, Error::InvalidTransition { .. }));
                assert_eq!(record.status, SyncStatus::Ready);
                Ok(())
            })
            .expect("lock");
    }

    #[test]
    fn single_open_landing_enforced() {
        let (_dir, store) = store();
        store
            .with_lock(SyncType::Landing, 1, |token| {
                store.create(token, seed(SyncType::Landing, 1))
            })
            .expect("first");
        let err = store
            .with_lock(SyncType::Landing, 2, |token| {
                store.create(token, seed(SyncType::Landing, 2))
            })
            .unwrap_err();
        assert!(matches!(err, Error::Abort(_)));
    }

    #[test]
    fn seq_allocation_increments() {
        let (_dir, store) = store();
        store
            .with_lock(SyncType::Upstream, 9, |token| {
                let first = store.create(token, seed(SyncType::Upstream, 9))?;
                let mut record = first.clone();
                record.set_status(token, SyncStatus::Complete)?;
                store.save(token, &record)?;
                let second = store.create(token, seed(SyncType::Upstream, 9))?;
                assert_eq!(first.name.seq, 0);
                assert_eq!(second.name.seq, 1);
                Ok(())
            })
            .expect("lock");
    }

    #[test]
    fn load_by_origin_prefers_open_records() {
        let (_dir, store) = store();
        store
            .with_lock(SyncType::Downstream, 20, |token| {
                let mut seed0 = seed(SyncType::Downstream, 20);
                seed0.data.insert(data_keys_origin(), "77".into());
                let mut done = store.create(token, seed0.clone())?;
                done.set_status(token, SyncStatus::Complete)?;
                store.save(token, &done)?;
                store.create(token, seed0)?;
                Ok(())
            })
            .expect("lock");

        let found = store.load_by_origin(77).expect("load").expect("some");
        assert!(found.is_open());
        assert!(store.load_by_origin(78).expect("load").is_none());
    }

    fn data_keys_origin() -> String {
        crate::record::data_keys::ORIGIN_ID.to_string()
    }

    #[test]
    fn try_push_lifecycle() {
        let (_dir, store) = store();
        store
            .with_lock(SyncType::Landing, 3, |token| {
                let landing = store.create(token, seed(SyncType::Landing, 3))?;
                let mut push =
                    store.create_try_push(token, &landing, false, 0, "https://ci.example/1")?;
                assert!(push.is_open());
                push.mark_complete(token, &landing)?;
                store.save_try_push(token, &landing, &push)?;
                let latest = store.latest_try_push(&landing)?.expect("latest");
                assert_eq!(latest.status, SyncStatus::Complete);
                let err = push.mark_complete(token, &landing).unwrap_err();
                assert!(matches!(err, Error::InvalidTransition { .. }));
                Ok(())
            })
            .expect("lock");
    }
}
