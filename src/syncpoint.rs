//! The persisted "last synced" checkpoint.
//!
//! A small `key: value` text blob stored inside the downstream tree so it
//! travels with the tree's history. The single recognised key is
//! `upstream`: the upstream commit sha most recently mirrored in full.

use std::collections::BTreeMap;

use git2::Repository;

use crate::repo::{blob_at, resolve};
use crate::{Error, Result};

pub const KEY_UPSTREAM: &str = "upstream";

/// Parsed checkpoint contents. Unrecognised keys round-trip untouched so an
/// operator can annotate the file without this engine discarding the notes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPoint {
    items: BTreeMap<String, String>,
}

impl SyncPoint {
    pub fn new(upstream_sha: impl Into<String>) -> Self {
        let mut items = BTreeMap::new();
        items.insert(KEY_UPSTREAM.to_string(), upstream_sha.into());
        Self { items }
    }

    pub fn parse(data: &str) -> Result<Self> {
        let mut items = BTreeMap::new();
        for line in data.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once(": ") else {
                return Err(Error::abort(format!("malformed sync point line {line:?}")));
            };
            items.insert(key.to_string(), value.to_string());
        }
        Ok(Self { items })
    }

    pub fn upstream(&self) -> Option<&str> {
        self.items.get(KEY_UPSTREAM).map(String::as_str)
    }

    pub fn set_upstream(&mut self, sha: impl Into<String>) {
        self.items.insert(KEY_UPSTREAM.to_string(), sha.into());
    }

    pub fn dumps(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.items {
            out.push_str(key);
            out.push_str(": ");
            out.push_str(value);
            out.push('\n');
        }
        out
    }
}

/// Load the checkpoint blob from the downstream tree at `branch_ref`.
pub fn load_sync_point(
    downstream: &Repository,
    branch_ref: &str,
    blob_path: &str,
) -> Result<SyncPoint> {
    let head = resolve(downstream, branch_ref)?;
    let bytes = blob_at(downstream, head, blob_path)?
        .ok_or_else(|| Error::abort(format!("no sync point blob at {blob_path}")))?;
    let text = String::from_utf8(bytes)
        .map_err(|_| Error::abort(format!("sync point blob at {blob_path} is not utf-8")))?;
    SyncPoint::parse(&text)
}
