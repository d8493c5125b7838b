//! Commit provenance metadata codec.
//!
//! Structured key-value pairs ride in the final paragraph of a commit
//! message as `key: value` trailer lines. Decoding is permissive (malformed
//! lines are skipped, an absent trailer yields an empty map) so arbitrary
//! human-written commits can be inspected safely; encoding is strict so
//! every commit this engine writes round-trips exactly.

use std::collections::BTreeMap;

use crate::{Error, Result};

/// Originating change (pull request) the commit belongs to.
pub const KEY_ORIGIN: &str = "wpt-pr";
/// Comma-joined source commit shas folded into this commit.
pub const KEY_COMMITS: &str = "wpt-commits";
/// Commit kind: `landing`, `metadata`, or absent for a plain replica.
pub const KEY_TYPE: &str = "wpt-type";
/// Upstream head sha a landing batch targets.
pub const KEY_HEAD: &str = "wpt-head";
/// Reverse pointer: downstream commit a mirrored-back upstream commit
/// originated from.
pub const KEY_BACKREF: &str = "gecko-commit";
/// Audit list of downstream commits already reapplied onto a landing head.
pub const KEY_REAPPLIED: &str = "reapplied-commits";

pub const TYPE_LANDING: &str = "landing";
pub const TYPE_METADATA: &str = "metadata";

/// Append a metadata trailer to `body`.
///
/// Keys are emitted in sorted order so the same map always produces the same
/// message. A key already present in `body`'s trailer with a different value
/// is a `Format` error; re-encoding an identical pair is a no-op.
pub fn encode(body: &str, metadata: &BTreeMap<String, String>) -> Result<String> {
    if metadata.is_empty() {
        return Ok(body.to_string());
    }

    let existing = decode(body);
    let mut fresh = Vec::new();
    for (key, value) in metadata {
        if key.is_empty() || key.contains(':') || key.contains('\n') {
            return Err(Error::Format(format!("invalid trailer key {key:?}")));
        }
        if value.contains('\n') {
            return Err(Error::Format(format!(
                "trailer value for {key} spans multiple lines"
            )));
        }
        match existing.get(key) {
            Some(present) if present != value => {
                return Err(Error::Format(format!(
                    "trailer key {key} already bound to {present:?}, refusing {value:?}"
                )));
            }
            Some(_) => {}
            None => fresh.push((key, value)),
        }
    }

    if fresh.is_empty() {
        return Ok(body.to_string());
    }

    let mut out = body.trim_end_matches('\n').to_string();
    // Keep the trailer attached to an existing trailer paragraph, otherwise
    // start a new paragraph.
    if existing.is_empty() {
        out.push_str("\n\n");
    } else {
        out.push('\n');
    }
    for (key, value) in fresh {
        out.push_str(key);
        out.push_str(": ");
        out.push_str(value);
        out.push('\n');
    }
    Ok(out)
}

/// Parse the trailer block of `message`.
///
/// Reads lines from the end until the first blank line; each `key: value`
/// line contributes an entry. Anything else is ignored.
pub fn decode(message: &str) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    for line in message.lines().rev() {
        if line.trim().is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once(": ")
            && !key.is_empty()
            && !key.contains(' ')
        {
            metadata.entry(key.to_string()).or_insert_with(|| value.to_string());
        }
    }
    metadata
}

/// Split `message` into its body and trailer map.
///
/// The body keeps everything above the trailer paragraph. Used by amend
/// flows that must rebind a key (`reapplied-commits`) to a new value, which
/// strict `encode` refuses to do in place.
pub fn strip_trailer(message: &str) -> (String, BTreeMap<String, String>) {
    let metadata = decode(message);
    if metadata.is_empty() {
        return (message.to_string(), metadata);
    }
    let mut lines: Vec<&str> = message.lines().collect();
    while let Some(last) = lines.last() {
        if last.trim().is_empty() {
            lines.pop();
            break;
        }
        lines.pop();
    }
    let mut body = lines.join("\n");
    while body.ends_with('\n') {
        body.pop();
    }
    (body, metadata)
}

/// Rebuild `message` with `key` bound to `value`, replacing any previous
/// binding.
pub fn replace_key(message: &str, key: &str, value: &str) -> Result<String> {
    let (body, mut metadata) = strip_trailer(message);
    metadata.insert(key.to_string(), value.to_string());
    encode(&body, &metadata)
}

/// The comma-joined list convention used by `wpt-commits` and
/// `reapplied-commits`.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

pub fn join_list<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items
        .into_iter()
        .map(|item| item.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
