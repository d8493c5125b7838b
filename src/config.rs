//! Config loading and persistence.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Top-level configuration for one sync deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub upstream: UpstreamConfig,
    pub downstream: DownstreamConfig,
    pub landing: LandingConfig,
    pub logging: LoggingConfig,
    /// Directory holding sync records, try pushes, and lock files.
    pub state_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            upstream: UpstreamConfig::default(),
            downstream: DownstreamConfig::default(),
            landing: LandingConfig::default(),
            logging: LoggingConfig::default(),
            state_dir: PathBuf::from("state"),
        }
    }
}

/// The upstream tree (the one changes are mirrored from).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub path: PathBuf,
    /// Ref of the branch new upstream content lands on.
    pub main_branch: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("repos/upstream"),
            main_branch: "refs/heads/master".into(),
        }
    }
}

/// The downstream tree (the one carrying the mirrored subtree).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownstreamConfig {
    pub path: PathBuf,
    /// Ref landings are pushed to.
    pub integration_branch: String,
    /// Ref a landing must reach before its record is finalized.
    pub target_branch: String,
    /// Subdirectory holding the mirrored copy of the upstream tree.
    pub subtree_path: String,
    /// Subdirectory holding expectation metadata for the mirrored tests.
    pub meta_path: String,
    /// File name of the sync checkpoint blob, relative to `meta_path`.
    pub sync_point_file: String,
    /// Name of the tree-status gate checked before pushing.
    pub landing_tree: String,
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("repos/downstream"),
            integration_branch: "refs/heads/integration".into(),
            target_branch: "refs/heads/central".into(),
            subtree_path: "testing/web-platform/tests".into(),
            meta_path: "testing/web-platform/meta".into(),
            sync_point_file: "mozilla-sync".into(),
            landing_tree: "integration".into(),
        }
    }
}

/// How replicated commits are produced and who hears about failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LandingConfig {
    pub strategy: ReplicateStrategy,
    /// Paths re-checked-out from the prior state by the copy strategy and
    /// excluded from moved diffs.
    pub preserved_paths: Vec<String>,
    /// Bug tracker routing for landing bugs.
    pub bug_product: String,
    pub bug_component: String,
    /// Users to needinfo when a landing needs a human.
    pub needinfo: Vec<String>,
    /// Upper bound on extra tasks a stability retrigger may schedule.
    pub max_retrigger_tasks: u32,
}

impl Default for LandingConfig {
    fn default() -> Self {
        Self {
            strategy: ReplicateStrategy::Move,
            preserved_paths: vec![
                "LICENSE".into(),
                "resources/testdriver_vendor.js".into(),
            ],
            bug_product: "Testing".into(),
            bug_component: "web-platform-tests".into(),
            needinfo: Vec::new(),
            max_retrigger_tasks: 20,
        }
    }
}

/// Replication strategy for a landable group.
///
/// `Move` replays the group's diff; `Copy` resets the mirrored subtree to
/// the group's final tree state. Copy is retained for operators mitigating
/// subtree drift; there is no automatic trigger.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicateStrategy {
    Move,
    Copy,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub stdout: bool,
    pub stdout_format: LogFormat,
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            stdout: true,
            stdout_format: LogFormat::Compact,
            filter: None,
        }
    }
}

pub fn load(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .map_err(|e| config_error(format!("failed to read {}: {e}", path.display())))?;
    toml::from_str(&contents)
        .map_err(|e| config_error(format!("failed to parse {}: {e}", path.display())))
}

pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load(path)
    } else {
        Ok(Config::default())
    }
}

fn config_error(message: String) -> Error {
    Error::abort(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_complete() {
        let config = Config::default();
        assert_eq!(config.landing.strategy, ReplicateStrategy::Move);
        assert!(config.downstream.integration_branch.starts_with("refs/heads/"));
        assert!(!config.landing.preserved_paths.is_empty());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [downstream]
            subtree_path = "vendor/mirror"

            [landing]
            strategy = "copy"
            needinfo = ["sync-admin"]
            "#,
        )
        .expect("parse");
        assert_eq!(config.downstream.subtree_path, "vendor/mirror");
        assert_eq!(config.landing.strategy, ReplicateStrategy::Copy);
        assert_eq!(config.landing.needinfo, vec!["sync-admin".to_string()]);
        // Untouched sections keep their defaults.
        assert_eq!(config.downstream.sync_point_file, "mozilla-sync");
        assert!(config.logging.stdout);
    }
}
