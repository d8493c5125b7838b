//! The landing driver: a resumable state machine replaying upstream
//! changes into the downstream tree behind a CI gate.
//!
//! Each `update_landing` invocation advances the open landing by at most
//! one step, persisting the result before returning, so the process can be
//! resumed by the next trigger (new upstream head, CI completion, retry
//! request) from whatever state the previous invocation left behind.

use git2::Oid;

use crate::config::Config;
use crate::landable::{LandableGroup, landable_commits};
use crate::record::{
    CommitRange, MutToken, RecordSeed, SyncRecord, SyncRecordStore, SyncStatus, SyncType, TryPush,
};
use crate::repo::{Checkout, CommitInfo, SyncRepos, ensure_branch, fast_forward, is_ancestor, resolve};
use crate::services::{BugEdit, Services, TaskKind, TaskSet, TryRequest};
use crate::syncpoint::{SyncPoint, load_sync_point};
use crate::trypush::{TryPushResult, try_result};
use crate::{Error, Result, metadata};

/// Reserved lock key serialising landing creation, which happens before a
/// bug (and therefore a per-bug lock key) exists.
const CREATION_LOCK_OBJECT: u64 = 0;

/// Caller-supplied knobs for one driver invocation.
#[derive(Debug, Clone, Default)]
pub struct LandingOpts {
    /// Checkpoint override; defaults to the persisted sync point.
    pub prev_upstream_head: Option<String>,
    /// Target upstream commit; defaults to the upstream main branch head.
    pub new_upstream_head: Option<String>,
    /// Land groups whose metadata update has not finished.
    pub include_incomplete: bool,
    /// Mark the current try push complete and request a fresh one.
    pub retry: bool,
    /// Allow the final push once CI is green.
    pub allow_push: bool,
    /// Human override: accept an existing try push's failures.
    pub accept_failures: bool,
}

impl LandingOpts {
    pub fn push() -> Self {
        Self {
            allow_push: true,
            ..Self::default()
        }
    }
}

/// One open landing, bound to its scratch checkout.
pub struct LandingSync {
    pub record: SyncRecord,
    pub checkout: Checkout,
}

impl LandingSync {
    pub fn branch_ref(bug: u64) -> String {
        format!("refs/heads/sync/landing/{bug}")
    }

    pub fn open(services: &Services<'_>, record: SyncRecord) -> Result<Self> {
        let checkout = services
            .worktrees
            .downstream_checkout(&format!("landing-{}", record.bug), &Self::branch_ref(record.bug))?;
        Ok(Self { record, checkout })
    }

    /// Commits this landing added on top of its downstream base, oldest
    /// first.
    pub fn downstream_commits(&self) -> Result<Vec<CommitInfo>> {
        let base = Oid::from_str(&self.record.downstream_range.base)?;
        let head = self.checkout.head_oid()?;
        crate::repo::range_commits(&self.checkout.repo, base, head)
    }

    /// The landing commit, when the head of the branch is one: a
    /// `wpt-type: landing` commit targeting this record's upstream head.
    pub fn landing_commit(&self) -> Result<Option<CommitInfo>> {
        let head = self.checkout.head_commit()?;
        let meta = head.metadata();
        let is_landing = meta.get(metadata::KEY_TYPE).map(String::as_str)
            == Some(metadata::TYPE_LANDING)
            && meta.get(metadata::KEY_HEAD).map(String::as_str)
                == Some(self.record.upstream_range.head.as_str());
        Ok(is_landing.then_some(head))
    }

    /// Create the landing commit, or fold the staged changes into it.
    pub fn update_landing_commit(&self, _token: &MutToken) -> Result<Oid> {
        match self.landing_commit()? {
            Some(_) => self.checkout.amend_head(None),
            None => {
                let mut trailer = std::collections::BTreeMap::new();
                trailer.insert(
                    metadata::KEY_TYPE.to_string(),
                    metadata::TYPE_LANDING.to_string(),
                );
                trailer.insert(
                    metadata::KEY_HEAD.to_string(),
                    self.record.upstream_range.head.clone(),
                );
                let body = format!(
                    "Bug {} - Update web-platform-tests to {}, a=testonly\n\nMANUAL PUSH: wpt sync bot",
                    self.record.bug, self.record.upstream_range.head
                );
                let message = metadata::encode(&body, &trailer)?;
                Ok(self
                    .checkout
                    .commit_staged(&message, None, true)?
                    .expect("allow_empty commit always produced"))
            }
        }
    }

    /// Write the in-tree checkpoint for this landing's upstream head.
    pub fn update_sync_point(
        &mut self,
        token: &MutToken,
        store: &SyncRecordStore,
        config: &Config,
    ) -> Result<()> {
        let new_head = self.record.upstream_range.head.clone();
        let blob_path = sync_point_path(config);
        let mut point = match self.checkout.read_file(&blob_path)? {
            Some(bytes) => SyncPoint::parse(&String::from_utf8_lossy(&bytes))?,
            None => SyncPoint::default(),
        };
        if point.upstream() == Some(new_head.as_str()) {
            return Ok(());
        }
        point.set_upstream(new_head);
        self.checkout.write_file(&blob_path, point.dumps().as_bytes())?;
        self.checkout.stage_path(&blob_path)?;
        if self.checkout.is_dirty()? {
            self.update_landing_commit(token)?;
        }
        self.save_head(token, store)
    }

    /// Persist the checkout's head as the record's downstream head.
    pub fn save_head(&mut self, token: &MutToken, store: &SyncRecordStore) -> Result<()> {
        let head = self.checkout.head_oid()?.to_string();
        self.record.set_downstream_head(token, head)?;
        store.save(token, &self.record)
    }

    pub fn finish(&mut self, token: &MutToken, store: &SyncRecordStore) -> Result<()> {
        self.record.set_status(token, SyncStatus::Complete)?;
        store.save(token, &self.record)?;
        tracing::info!(bug = self.record.bug, "landing complete");
        Ok(())
    }

    /// Schedule the next CI validation run, if the state machine calls for
    /// one: a first plain run, then one stability run once a plain run came
    /// back clean. Returns `None` when no further run is needed.
    pub fn next_try_push(
        &self,
        token: &MutToken,
        services: &Services<'_>,
        store: &SyncRecordStore,
        retry: bool,
    ) -> Result<Option<TryPush>> {
        if self.record.status != SyncStatus::Open {
            return Ok(None);
        }
        let latest = store.latest_try_push(&self.record)?;
        if let Some(latest) = &latest {
            if latest.status != SyncStatus::Complete {
                return Ok(None);
            }
            if latest.stability && !retry {
                return Ok(None);
            }
        }
        let stability = if retry {
            latest.as_ref().map(|push| push.stability).unwrap_or(false)
        } else {
            latest.as_ref().is_some_and(|push| !push.infra_fail)
        };
        let request = TryRequest {
            bug: self.record.bug,
            stability,
            rebuild_count: 0,
        };
        let url = services.ci.trigger(&self.checkout, &request)?;
        let push = store.create_try_push(token, &self.record, stability, 0, url)?;
        Ok(Some(push))
    }

    /// Fold expectation-metadata updates from the run's logs into the
    /// landing commit.
    pub fn update_metadata_from_logs(
        &mut self,
        token: &MutToken,
        services: &Services<'_>,
        store: &SyncRecordStore,
        config: &Config,
        tasks: &dyn TaskSet,
    ) -> Result<()> {
        let logs = tasks.download_logs()?;
        if logs.is_empty() {
            tracing::warn!(bug = self.record.bug, "no log files found for try push");
            return Ok(());
        }
        tracing::info!(bug = self.record.bug, logs = logs.len(), "updating metadata from logs");
        services
            .metadata_updater
            .update(&self.checkout, &logs, true)?;
        self.checkout.stage_all(&config.downstream.meta_path)?;
        if self.checkout.is_dirty()? {
            self.update_landing_commit(token)?;
        }
        self.checkout.reset_hard()?;
        self.save_head(token, store)
    }
}

pub fn sync_point_path(config: &Config) -> String {
    format!(
        "{}/{}",
        config.downstream.meta_path, config.downstream.sync_point_file
    )
}

/// The open landing record, if any. More than one open landing is a broken
/// invariant and aborts.
pub fn current(store: &SyncRecordStore) -> Result<Option<SyncRecord>> {
    let mut open = store.load_by_status(SyncType::Landing, SyncStatus::Open)?;
    if open.len() > 1 {
        return Err(Error::abort("multiple open landing records".to_string()));
    }
    Ok(open.pop())
}

/// Create or continue a landing. One state transition per invocation.
pub fn update_landing(
    services: &Services<'_>,
    repos: &SyncRepos,
    store: &SyncRecordStore,
    config: &Config,
    opts: &LandingOpts,
) -> Result<Option<SyncRecord>> {
    match current(store)? {
        None => create_landing(services, repos, store, config, opts),
        Some(record) => {
            validate_requested_range(&record, opts)?;
            let bug = record.bug;
            let result = store.with_lock(SyncType::Landing, bug, |token| {
                let record = store.load(&record.name)?;
                advance_landing(token, services, repos, store, config, record, opts)
            })?;
            Ok(result)
        }
    }
}

/// Step (a): no open landing. Compute the landable set and seed a new
/// record (bug, branch, blocking links); the next invocation replicates.
fn create_landing(
    services: &Services<'_>,
    repos: &SyncRepos,
    store: &SyncRecordStore,
    config: &Config,
    opts: &LandingOpts,
) -> Result<Option<SyncRecord>> {
    // Serialise creation: the per-bug lock key does not exist until the bug
    // does.
    let _guard = crate::record::SyncLock::acquire(
        &store.locks_dir(),
        SyncType::Landing,
        CREATION_LOCK_OBJECT,
    )?;
    if current(store)?.is_some() {
        // Lost the creation race; the next trigger continues the winner.
        return Ok(None);
    }

    let prev = match &opts.prev_upstream_head {
        Some(prev) => prev.clone(),
        None => {
            let point = load_sync_point(
                &repos.downstream,
                &config.downstream.integration_branch,
                &sync_point_path(config),
            )?;
            point
                .upstream()
                .ok_or_else(|| Error::abort("sync point has no upstream key"))?
                .to_string()
        }
    };
    let new_head = opts
        .new_upstream_head
        .clone()
        .unwrap_or_else(|| config.upstream.main_branch.clone());

    let prev_oid = resolve(&repos.upstream, &prev)?;
    let new_oid = resolve(&repos.upstream, &new_head)?;
    let Some((wpt_head, groups)) =
        landable_commits(repos, store, prev_oid, new_oid, opts.include_incomplete)?
    else {
        return Ok(None);
    };

    let bug = services.bugs.create_bug(
        &format!("Update web-platform-tests to {wpt_head}"),
        "",
        &config.landing.bug_product,
        &config.landing.bug_component,
    )?;
    let integration = resolve(&repos.downstream, &config.downstream.integration_branch)?;

    let record = store.with_lock(SyncType::Landing, bug, |token| {
        let record = store.create(
            token,
            RecordSeed {
                sync_type: SyncType::Landing,
                bug,
                upstream_range: CommitRange::new(prev_oid.to_string(), wpt_head.clone()),
                downstream_range: CommitRange::new(
                    integration.to_string(),
                    integration.to_string(),
                ),
                data: Default::default(),
            },
        )?;
        ensure_branch(&repos.downstream, &LandingSync::branch_ref(bug), integration)?;
        Ok(record)
    })?;

    // The landing blocks every bug that lands with it.
    let mut edit = BugEdit::default();
    for group in &groups {
        if let Some(sync) = &group.sync
            && sync.kind() == SyncType::Downstream
            && sync.bug() != 0
        {
            edit.add_blocking(sync.bug());
        }
    }
    if !edit.blocks.is_empty() {
        services.bugs.update_bug(bug, edit)?;
    }

    // Replication happens on the next invocation.
    services
        .dispatch
        .enqueue(TaskKind::Land, serde_json::json!({ "bug": bug }))?;
    Ok(Some(record))
}

fn validate_requested_range(record: &SyncRecord, opts: &LandingOpts) -> Result<()> {
    if let Some(prev) = &opts.prev_upstream_head
        && record.upstream_range.base != *prev
    {
        return Err(Error::abort(format!(
            "existing landing base {} doesn't match supplied previous head {prev}",
            record.upstream_range.base
        )));
    }
    if let Some(new) = &opts.new_upstream_head
        && record.upstream_range.head != *new
    {
        return Err(Error::abort(format!(
            "existing landing head {} doesn't match supplied head {new}",
            record.upstream_range.head
        )));
    }
    Ok(())
}

/// Steps (b)-(f) for an already-open landing.
fn advance_landing(
    token: &MutToken,
    services: &Services<'_>,
    repos: &SyncRepos,
    store: &SyncRecordStore,
    config: &Config,
    record: SyncRecord,
    opts: &LandingOpts,
) -> Result<Option<SyncRecord>> {
    let mut sync = LandingSync::open(services, record)?;
    let head = sync.checkout.head_oid()?;
    let target = resolve(&repos.downstream, &config.downstream.target_branch)?;
    let has_pushes = store.latest_try_push(&sync.record)?.is_some();
    // A freshly-seeded landing still sits at its downstream base; it has
    // not "reached" anything yet.
    let has_progress = head != Oid::from_str(&sync.record.downstream_range.base)?;

    // (b) finalize once the batch reached the permanent target branch.
    if has_progress && is_ancestor(&repos.downstream, head, target)? {
        tracing::info!(bug = sync.record.bug, "landing reached the target branch");
        sync.finish(token, store)?;
        return Ok(Some(sync.record));
    }
    let integration = resolve(&repos.downstream, &config.downstream.integration_branch)?;
    if has_progress
        && has_pushes
        && is_ancestor(&repos.downstream, head, integration)?
    {
        tracing::info!(
            bug = sync.record.bug,
            "landing is on the integration branch but not yet the target"
        );
        return Ok(Some(sync.record));
    }

    let base = Oid::from_str(&sync.record.upstream_range.base)?;
    let upstream_head = Oid::from_str(&sync.record.upstream_range.head)?;
    let Some((wpt_head, groups)) =
        landable_commits(repos, store, base, upstream_head, opts.include_incomplete)?
    else {
        return Err(Error::abort("open landing has no landable commits".to_string()));
    };
    if wpt_head != sync.record.upstream_range.head {
        return Err(Error::abort(format!(
            "landable head {wpt_head} diverged from landing head {}",
            sync.record.upstream_range.head
        )));
    }

    let mut pushed = false;
    match store.latest_try_push(&sync.record)? {
        // (c) replicate, checkpoint, request the first try push.
        None => {
            let prev_head = opts
                .prev_upstream_head
                .clone()
                .unwrap_or_else(|| sync.record.upstream_range.base.clone());
            sync.apply_batch(token, services, repos, store, config, Some(prev_head), &groups)?;
            sync.update_sync_point(token, store, config)?;
            sync.next_try_push(token, services, store, false)?;
        }
        // (f) explicit retry: retire the current push, request a fresh one.
        Some(mut push) if opts.retry => {
            rebase_or_record(token, services, store, config, &mut sync)?;
            if push.is_open() {
                push.mark_complete(token, &sync.record)?;
                store.save_try_push(token, &sync.record, &push)?;
            }
            sync.next_try_push(token, services, store, true)?;
        }
        Some(push) => {
            let tasks = services.ci.tasks(&push.treeherder_url)?;
            let result = try_result(&push, &*tasks);
            if push.status == SyncStatus::Complete && (result.is_ok() || opts.accept_failures) {
                // (e) rebase, then another try push or the final push.
                rebase_or_record(token, services, store, config, &mut sync)?;
                if sync.next_try_push(token, services, store, false)?.is_none() {
                    if opts.allow_push {
                        push_to_target(token, services, repos, store, config, &mut sync)?;
                        pushed = true;
                    } else {
                        tracing::info!(
                            bug = sync.record.bug,
                            checkout = %sync.checkout.path.display(),
                            "landing is ready for push"
                        );
                    }
                }
            } else if result == TryPushResult::Pending {
                // (d) try results outstanding; nothing to do.
                tracing::info!(url = %push.treeherder_url, "try push is waiting for results");
            } else {
                tracing::info!(url = %push.treeherder_url, "try push requires manual fixup");
            }
        }
    }

    notify_downstream(services, store, &groups, pushed);
    if pushed {
        if let Err(err) = services
            .dispatch
            .enqueue(TaskKind::Retrigger, serde_json::json!({ "bug": sync.record.bug }))
        {
            tracing::warn!(%err, "failed to enqueue retrigger of blocked syncs");
        }
    }
    Ok(Some(sync.record))
}

fn rebase_or_record(
    token: &MutToken,
    services: &Services<'_>,
    store: &SyncRecordStore,
    config: &Config,
    sync: &mut LandingSync,
) -> Result<()> {
    if let Err(err) = sync.checkout.rebase_onto(&config.downstream.integration_branch) {
        let message = record_failure(
            token,
            services,
            store,
            config,
            sync,
            "rebase failed".to_string(),
            "Landing failed due to conflicts during rebase".to_string(),
            Some("Resolve the conflicts in the worktree and re-run the landing"),
        )?;
        tracing::error!(%err, "rebase failed");
        return Err(Error::Abort(message));
    }
    sync.save_head(token, store)
}

/// Push the landing branch to the integration branch.
///
/// Loops on remote races (the integration branch advancing underneath us),
/// re-rebasing each time; a rebase that fails to move the head means the
/// loop cannot make progress and aborts instead of spinning.
fn push_to_target(
    token: &MutToken,
    services: &Services<'_>,
    repos: &SyncRepos,
    store: &SyncRecordStore,
    config: &Config,
    sync: &mut LandingSync,
) -> Result<()> {
    let mut old_head: Option<Oid> = None;
    loop {
        rebase_or_record(token, services, store, config, sync)?;
        let head = sync.checkout.head_oid()?;
        if old_head == Some(head) {
            let message = record_failure(
                token,
                services,
                store,
                config,
                sync,
                "landing push failed and rebase didn't change head".to_string(),
                "Landing push failed and the rebase made no progress".to_string(),
                None,
            )?;
            return Err(Error::Abort(message));
        }
        old_head = Some(head);

        if !services.host.tree_is_open(&config.downstream.landing_tree)? {
            tracing::info!(tree = %config.downstream.landing_tree, "tree is closed");
            return Err(Error::retryable("landing tree is closed"));
        }

        tracing::info!(bug = sync.record.bug, "pushing landing");
        match fast_forward(&repos.downstream, &config.downstream.integration_branch, head) {
            Ok(()) => {
                sync.save_head(token, store)?;
                // The landing is finalized once it reaches the target branch.
                return Ok(());
            }
            Err(Error::Retryable(reason)) => {
                tracing::info!(%reason, "push raced with another update; re-rebasing");
                continue;
            }
            Err(err) => return Err(err),
        }
    }
}

/// On landing completion, close out the downstream syncs that landed with
/// it. Per-sync failures are logged, not propagated.
fn notify_downstream(
    services: &Services<'_>,
    store: &SyncRecordStore,
    groups: &[LandableGroup],
    landing_is_complete: bool,
) {
    if !landing_is_complete {
        return;
    }
    for group in groups {
        let Some(correlated) = &group.sync else {
            continue;
        };
        if correlated.kind() != SyncType::Downstream {
            continue;
        }
        let name = correlated.record.name.clone();
        let result = store.with_lock(name.sync_type, name.object_id, |token| {
            let mut record = store.load(&name)?;
            if !record.status.is_terminal() {
                if record.status == SyncStatus::Open {
                    record.set_status(token, SyncStatus::Ready)?;
                }
                record.set_status(token, SyncStatus::Complete)?;
                store.save(token, &record)?;
            }
            Ok(())
        });
        if let Err(err) = result {
            tracing::error!(name = %name, %err, "failed to finish downstream sync");
        } else if let Err(err) = services.bugs.comment(
            correlated.bug(),
            "Upstream change landed with the latest web-platform-tests update.",
        ) {
            tracing::warn!(bug = correlated.bug(), %err, "failed to comment on sync bug");
        }
    }
}

/// Record a human-actionable failure on the landing bug: comment plus
/// needinfo, with the machine-readable context preserved in the record.
pub fn record_failure(
    token: &MutToken,
    services: &Services<'_>,
    store: &SyncRecordStore,
    config: &Config,
    sync: &mut LandingSync,
    log_msg: String,
    bug_msg: String,
    fixup_msg: Option<&str>,
) -> Result<String> {
    let fixup =
        fixup_msg.unwrap_or("Re-run the landing with either accept-failures or retry");
    tracing::error!(bug = sync.record.bug, "{log_msg}\n{fixup}");
    sync.record.record_error(token, &log_msg)?;
    store.save(token, &sync.record)?;
    let mut edit = BugEdit::default();
    edit.add_comment(format!("{bug_msg}\nThis requires fixup from a wpt sync admin."));
    edit.needinfo(&config.landing.needinfo);
    services.bugs.update_bug(sync.record.bug, edit)?;
    Ok(log_msg)
}

fn record_build_failures(
    token: &MutToken,
    services: &Services<'_>,
    store: &SyncRecordStore,
    config: &Config,
    sync: &mut LandingSync,
    push: &TryPush,
) -> Result<String> {
    record_failure(
        token,
        services,
        store,
        config,
        sync,
        format!("build failures in try push {}", push.treeherder_url),
        format!(
            "Landing failed due to build failures in try push {}",
            push.treeherder_url
        ),
        None,
    )
}

fn record_too_many_failures(
    token: &MutToken,
    services: &Services<'_>,
    store: &SyncRecordStore,
    config: &Config,
    sync: &mut LandingSync,
    push: &TryPush,
) -> Result<String> {
    record_failure(
        token,
        services,
        store,
        config,
        sync,
        format!("too many test failures in try push {}", push.treeherder_url),
        format!(
            "Landing failed due to too many test failures in try push {}",
            push.treeherder_url
        ),
        None,
    )
}

/// Handle a completed CI run: the driving half of the try push evaluator.
///
/// `pending` defers. Infra failures and excess failures on a plain push
/// escalate to a human and do not advance. Otherwise the run's logs feed a
/// metadata update (stability runs first retrigger failing jobs once), the
/// push is marked complete, and the landing driver takes its next step.
pub fn try_push_complete(
    services: &Services<'_>,
    repos: &SyncRepos,
    store: &SyncRecordStore,
    config: &Config,
    opts: &LandingOpts,
) -> Result<()> {
    let Some(record) = current(store)? else {
        return Ok(());
    };

    let advance = store.with_lock(SyncType::Landing, record.bug, |token| {
        let record = store.load(&record.name)?;
        let Some(mut push) = store.latest_try_push(&record)? else {
            return Ok(false);
        };
        if push.status == SyncStatus::Complete {
            tracing::warn!(url = %push.treeherder_url, "try push already complete");
            return Ok(false);
        }
        let mut sync = LandingSync::open(services, record)?;
        if opts.accept_failures && !push.accept_failures {
            push.accept_failures = true;
            store.save_try_push(token, &sync.record, &push)?;
        }

        let tasks = services.ci.tasks(&push.treeherder_url)?;
        let result = try_result(&push, &*tasks);
        if result == TryPushResult::Pending {
            tracing::info!(url = %push.treeherder_url, "try push results are pending");
            return Ok(false);
        }

        if result != TryPushResult::Success {
            if result == TryPushResult::InfraFail {
                push.infra_fail = true;
                store.save_try_push(token, &sync.record, &push)?;
                let message =
                    record_build_failures(token, services, store, config, &mut sync, &push)?;
                return Err(Error::Abort(message));
            }
            if result == TryPushResult::TooManyFailures && !push.stability {
                let message =
                    record_too_many_failures(token, services, store, config, &mut sync, &push)?;
                return Err(Error::Abort(message));
            }

            if !push.stability {
                sync.update_metadata_from_logs(token, services, store, config, &*tasks)?;
            } else {
                if !tasks.retriggered() {
                    if result == TryPushResult::TooManyFailures {
                        // Exhausting retriggers on a stability run with this
                        // many failures is a stop, not a metadata update.
                        record_too_many_failures(token, services, store, config, &mut sync, &push)?;
                        push.mark_complete(token, &sync.record)?;
                        store.save_try_push(token, &sync.record, &push)?;
                        return Ok(false);
                    }
                    let scheduled = tasks.retrigger_failures()?;
                    tracing::info!(
                        scheduled,
                        bug = sync.record.bug,
                        "retriggered failing tasks on try"
                    );
                    if scheduled > 0 {
                        services.bugs.comment(
                            sync.record.bug,
                            "Retriggered failing web-platform-test tasks on try before final metadata update.",
                        )?;
                        return Ok(false);
                    }
                }
                sync.update_metadata_from_logs(token, services, store, config, &*tasks)?;
            }
        }

        push.mark_complete(token, &sync.record)?;
        store.save_try_push(token, &sync.record, &push)?;
        Ok(true)
    })?;

    if advance {
        update_landing(services, repos, store, config, opts)?;
    }
    Ok(())
}
