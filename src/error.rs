//! Crate error taxonomy.
//!
//! Four families matter to callers:
//! - `Abort`: the process cannot proceed; a human has been (or must be)
//!   notified and the sync stays in its last persisted state.
//! - `Retryable`: transient (closed tree, remote race); re-invoking later is
//!   expected to succeed with no human action.
//! - `InvalidTransition` / `LockRequired`: contract violations, fatal to the
//!   invocation.
//! - `Format`: strict-encode provenance failures.

use std::path::PathBuf;

use thiserror::Error;

use crate::record::{ProcessName, SyncStatus, SyncType};

/// Whether retrying this operation may succeed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Transience {
    /// Retry will never help without changing inputs/state.
    Permanent,
    /// Retry may help (transient contention/outage).
    Retryable,
    /// Unknown if retry will help.
    Unknown,
}

impl Transience {
    pub fn is_retryable(self) -> bool {
        matches!(self, Transience::Retryable)
    }
}

/// What we know about side effects when an error is returned.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Effect {
    /// Definitely no side effects occurred.
    None,
    /// Side effects definitely occurred (locally or remotely).
    Some,
    /// We don't know if side effects occurred.
    Unknown,
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The operation cannot proceed; surfaced to a human via the bug.
    /// Working-copy changes were either fully committed or rolled back.
    #[error("aborted: {0}")]
    Abort(String),

    /// Transient failure; the caller should re-invoke later.
    #[error("retryable: {0}")]
    Retryable(String),

    #[error("illegal status transition for {name}: {from} -> {to}")]
    InvalidTransition {
        name: ProcessName,
        from: SyncStatus,
        to: SyncStatus,
    },

    #[error("mutation of {sync_type}/{object_id} attempted without holding its lock")]
    LockRequired { sync_type: SyncType, object_id: u64 },

    /// Malformed provenance metadata on the strict (encode) path.
    #[error("provenance format error: {0}")]
    Format(String),

    #[error("record not found: {0}")]
    RecordNotFound(ProcessName),

    #[error("record store corrupted at {path}: {source}")]
    StoreCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn abort(msg: impl Into<String>) -> Self {
        Error::Abort(msg.into())
    }

    pub fn retryable(msg: impl Into<String>) -> Self {
        Error::Retryable(msg.into())
    }

    /// Whether re-invoking the failed entry point may succeed.
    pub fn transience(&self) -> Transience {
        match self {
            Error::Retryable(_) => Transience::Retryable,
            Error::Abort(_)
            | Error::InvalidTransition { .. }
            | Error::LockRequired { .. }
            | Error::Format(_)
            | Error::RecordNotFound(_)
            | Error::StoreCorrupt { .. } => Transience::Permanent,
            Error::Git(_) | Error::Io(_) => Transience::Unknown,
        }
    }

    /// What we know about side effects at the failure point.
    pub fn effect(&self) -> Effect {
        match self {
            // Contract violations are raised before any mutation happens.
            Error::InvalidTransition { .. } | Error::LockRequired { .. } | Error::Format(_) => {
                Effect::None
            }
            // An abort leaves the last persisted state; each replicate step
            // rolls back its own working copy before raising.
            Error::Abort(_) => Effect::Some,
            Error::Retryable(_) => Effect::None,
            Error::RecordNotFound(_) | Error::StoreCorrupt { .. } => Effect::None,
            Error::Git(_) | Error::Io(_) => Effect::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classified() {
        let err = Error::retryable("tree is closed");
        assert!(err.transience().is_retryable());
        assert_eq!(err.effect(), Effect::None);
    }

    #[test]
    fn abort_is_permanent_with_effects() {
        let err = Error::abort("rebase failed");
        assert_eq!(err.transience(), Transience::Permanent);
        assert_eq!(err.effect(), Effect::Some);
    }
}
