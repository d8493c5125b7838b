//! Replication-layer properties: idempotence, resumable reapplication, and
//! the metadata merge chain.

mod common;

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use git2::Oid;

use common::{Mocks, TestWorld, commit_on_ref};
use landsync::landable::{CorrelatedSync, landable_commits};
use landsync::landing::{LandingOpts, LandingSync, update_landing};
use landsync::metadata;
use landsync::record::{CommitRange, RecordSeed, SyncRecord, SyncType, data_keys};
use landsync::repo::ensure_branch;
use landsync::services::Services;

fn oid(sha: &str) -> Oid {
    Oid::from_str(sha).expect("oid")
}

/// Seed an open landing record with its branch at the integration head,
/// bypassing the driver.
fn manual_landing(
    world: &TestWorld,
    bug: u64,
    upstream_base: &str,
    upstream_head: &str,
) -> SyncRecord {
    let integration = world.integration_head();
    let repos = world.repos();
    world
        .store
        .with_lock(SyncType::Landing, bug, |token| {
            let record = world.store.create(
                token,
                RecordSeed {
                    sync_type: SyncType::Landing,
                    bug,
                    upstream_range: CommitRange::new(upstream_base, upstream_head),
                    downstream_range: CommitRange::new(integration.clone(), integration.clone()),
                    data: BTreeMap::new(),
                },
            )?;
            ensure_branch(
                &repos.downstream,
                &LandingSync::branch_ref(bug),
                oid(&integration),
            )?;
            Ok(record)
        })
        .expect("manual landing")
}

fn branch_head_tree(world: &TestWorld, bug: u64) -> (String, Oid) {
    let repo = world.downstream();
    let head = repo
        .revparse_single(&LandingSync::branch_ref(bug))
        .and_then(|o| o.peel_to_commit())
        .expect("branch head");
    (
        head.message().unwrap_or_default().to_string(),
        head.tree_id(),
    )
}

#[test]
fn apply_batch_twice_is_a_noop() {
    let world = TestWorld::new();
    let mocks = Mocks::new(&world);
    let services = mocks.services();
    let repos = world.repos();
    let opts = LandingOpts::default();

    world.seed_downstream_sync(2001, 5, true, &[]);
    world.upstream_pr_commit(5, &[("css/flexbox/order.html", Some("v2\n"))], "Change");

    update_landing(&services, &repos, &world.store, &world.config, &opts).expect("create");
    update_landing(&services, &repos, &world.store, &world.config, &opts).expect("replicate");

    let record = landsync::landing::current(&world.store)
        .expect("current")
        .expect("open");
    let (_, tree_before) = branch_head_tree(&world, record.bug);
    let head_before = record.downstream_range.head.clone();

    // Replaying the already-replicated batch must change nothing.
    world
        .store
        .with_lock(SyncType::Landing, record.bug, |token| {
            let record = world.store.load(&record.name)?;
            let base = oid(&record.upstream_range.base);
            let head = oid(&record.upstream_range.head);
            let (_, groups) = landable_commits(&repos, &world.store, base, head, false)
                .expect("landable")
                .expect("some");
            let mut sync = LandingSync::open(&services, record)?;
            sync.apply_batch(
                token,
                &services,
                &repos,
                &world.store,
                &world.config,
                Some(base.to_string()),
                &groups,
            )
        })
        .expect("reapply batch");

    let record_after = landsync::landing::current(&world.store)
        .expect("current")
        .expect("open");
    let (_, tree_after) = branch_head_tree(&world, record_after.bug);
    assert_eq!(tree_before, tree_after);
    assert_eq!(head_before, record_after.downstream_range.head);
}

/// Run the reapplication scenario; when `interrupt` is set the first pass
/// is cut short after one commit (by marking the second as already landed)
/// and a second pass finishes the job.
fn run_reapply_scenario(interrupt: bool) -> (Oid, Vec<String>, Vec<String>) {
    let world = TestWorld::new();
    let mocks = Mocks::new(&world);
    let services: Services<'_> = mocks.services();
    let repos = world.repos();
    let subtree = world.config.downstream.subtree_path.clone();

    let d0 = world.integration_head();
    let a_path = format!("{subtree}/css/local/a.html");
    let b_path = format!("{subtree}/css/local/b.html");
    let d1 = world.downstream_commit(
        &[(a_path.as_str(), Some("<!-- local a -->\n"))],
        "Bug 111 - add a local test",
    );
    let d2 = world.downstream_commit(
        &[(b_path.as_str(), Some("<!-- local b -->\n"))],
        "Bug 112 - add another local test",
    );
    world.seed_upstream_sync(111, 201, &d0, &d2);

    let u1 = world.upstream_pr_commit(5, &[("css/flexbox/order.html", Some("v2\n"))], "Change");
    let record = manual_landing(&world, 1000, &world.upstream_base, &u1);

    let head_oid = world
        .store
        .with_lock(SyncType::Landing, record.bug, |token| {
            let mut sync = LandingSync::open(&services, record.clone())?;
            // Stand-in replica commit: the copy strategy wipes local-only
            // files, which is exactly what reapplication restores.
            sync.checkout.remove_file(&a_path)?;
            sync.checkout.remove_file(&b_path)?;
            sync.checkout.stage_all(&subtree)?;
            let mut trailer = BTreeMap::new();
            trailer.insert(metadata::KEY_ORIGIN.to_string(), "5".to_string());
            let message = metadata::encode("Bug 1000 [wpt PR 5] - replica, a=testonly", &trailer)?;
            sync.checkout
                .commit_staged(&message, None, false)?
                .expect("replica commit");

            if interrupt {
                // First pass stops after one commit.
                let skip: BTreeSet<String> = [d2.clone()].into();
                sync.reapply_local_commits(
                    token,
                    &services,
                    &repos,
                    &world.store,
                    &world.config,
                    &skip,
                )?;
                let head = sync.checkout.head_commit()?;
                let applied = head
                    .metadata()
                    .get(metadata::KEY_REAPPLIED)
                    .map(|raw| metadata::split_list(raw))
                    .unwrap_or_default();
                assert_eq!(applied, vec![d1.clone()]);
            }

            // Run (or re-run) to completion; only the remainder applies.
            sync.reapply_local_commits(
                token,
                &services,
                &repos,
                &world.store,
                &world.config,
                &BTreeSet::new(),
            )?;
            Ok(sync.checkout.head_oid()?)
        })
        .expect("reapply");

    let repo = world.downstream();
    let head = repo.find_commit(head_oid).expect("head");
    let applied = metadata::decode(head.message().unwrap_or_default())
        .get(metadata::KEY_REAPPLIED)
        .map(|raw| metadata::split_list(raw))
        .unwrap_or_default();
    (head.tree_id(), applied, vec![d1, d2])
}

#[test]
fn reapply_is_resumable_after_interruption() {
    let (uninterrupted_tree, applied_full, expected_full) = run_reapply_scenario(false);
    let (resumed_tree, applied_resumed, expected_resumed) = run_reapply_scenario(true);

    // Both runs recorded every local commit...
    assert_eq!(applied_full, expected_full);
    assert_eq!(applied_resumed, expected_resumed);
    // ...and produced the same final tree (content-addressed, so the ids
    // are comparable across repositories).
    assert_eq!(uninterrupted_tree, resumed_tree);
}

#[test]
fn merge_metadata_applies_and_rewrites_placeholder_bug() {
    let world = TestWorld::new();
    let mocks = Mocks::new(&world);
    let services = mocks.services();
    let meta_path = world.config.downstream.meta_path.clone();

    // A metadata commit produced by the downstream sync, parked on a side
    // ref with the placeholder bug number.
    let integration = world.integration_head();
    let ini_path = format!("{meta_path}/css/flexbox/order.html.ini");
    let meta_sha = {
        let repo = world.downstream();
        commit_on_ref(
            &repo,
            "refs/heads/sync/meta-tmp",
            Some(&integration),
            &[(ini_path.as_str(), Some("[order.html]\n  expected: FAIL\n"))],
            "Bug None - Update wpt metadata",
        )
    };
    let sync_record = world.seed_downstream_sync(
        2001,
        5,
        true,
        &[(data_keys::METADATA_COMMIT, meta_sha.as_str())],
    );

    let u1 = world.upstream_pr_commit(5, &[("README.md", Some("v2\n"))], "Change");
    let record = manual_landing(&world, 1000, &world.upstream_base, &u1);

    world
        .store
        .with_lock(SyncType::Landing, record.bug, |token| {
            let mut sync = LandingSync::open(&services, record.clone())?;
            let correlated = CorrelatedSync {
                record: sync_record.clone(),
            };
            sync.merge_metadata(token, &services, &world.store, &world.config, 5, &correlated)?;

            let head = sync.checkout.head_commit()?;
            // Placeholder rewritten to the sync's own bug.
            assert!(head.message.starts_with("Bug 2001 - Update wpt metadata"));
            let meta = head.metadata();
            assert_eq!(meta.get(metadata::KEY_ORIGIN).map(String::as_str), Some("5"));
            assert_eq!(
                meta.get(metadata::KEY_TYPE).map(String::as_str),
                Some(metadata::TYPE_METADATA)
            );

            // Second merge is a no-op: the metadata is already present.
            let before = sync.checkout.head_oid()?;
            sync.merge_metadata(token, &services, &world.store, &world.config, 5, &correlated)?;
            assert_eq!(before, sync.checkout.head_oid()?);
            Ok(())
        })
        .expect("merge metadata");

    // The expectation file landed on the branch.
    assert_eq!(
        world.downstream_blob(&LandingSync::branch_ref(1000), &ini_path),
        Some("[order.html]\n  expected: FAIL\n".to_string())
    );
}
