//! Cross-process advisory locks for sync records.
//!
//! One lock file per `(sync_type, object_id)` under `<state>/locks/`.
//! Acquisition blocks (cooperative flock wait) until the holder releases;
//! release happens on every exit path through the guard's `Drop`. Holding
//! the lock yields a `MutToken`, the capability every record mutator
//! demands — code without a token cannot mutate.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::record::SyncType;
use crate::{Error, Result};

/// Proof that the cross-process lock for `(sync_type, object_id)` is held.
///
/// Not `Clone` and lifetime-bound to the lock guard, so a token cannot
/// outlive its lock.
#[derive(Debug)]
pub struct MutToken {
    sync_type: SyncType,
    object_id: u64,
}

impl MutToken {
    pub fn covers(&self, sync_type: SyncType, object_id: u64) -> bool {
        self.sync_type == sync_type && self.object_id == object_id
    }

    pub fn sync_type(&self) -> SyncType {
        self.sync_type
    }

    pub fn object_id(&self) -> u64 {
        self.object_id
    }
}

/// An acquired `(sync_type, object_id)` lock.
#[derive(Debug)]
pub struct SyncLock {
    file: fs::File,
    path: PathBuf,
    token: MutToken,
}

impl SyncLock {
    /// Acquire the lock, blocking until it is available.
    pub fn acquire(locks_dir: &Path, sync_type: SyncType, object_id: u64) -> Result<Self> {
        fs::create_dir_all(locks_dir)?;
        let path = locks_dir.join(format!("{}-{}.lock", sync_type, object_id));
        reject_symlink(&path)?;
        let file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        file.lock_exclusive()?;
        tracing::debug!(%sync_type, object_id, "acquired sync lock");
        Ok(Self {
            file,
            path,
            token: MutToken {
                sync_type,
                object_id,
            },
        })
    }

    pub fn token(&self) -> &MutToken {
        &self.token
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SyncLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), %err, "failed to release sync lock");
        }
    }
}

fn reject_symlink(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => Err(Error::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("lock path is a symlink: {}", path.display()),
        ))),
        Ok(_) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(Error::Io(err)),
    }
}
