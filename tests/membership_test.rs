// Copyright 2022 The Engula Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

mod helper;

use std::{collections::HashSet, sync::Arc};

use storage_tracker::{
    registry::{ClusterRegistry, StorageStatus},
    BriefStatus, Error, Result, StorageReport, Tracker,
};

use crate::helper::context::*;

#[ctor::ctor]
fn init() {
    tracing_subscriber::fmt::init();
}

/// Join `addr` as a storage that was serving before, which puts it ONLINE.
fn join_online(ctx: &TestContext, tracker: &Tracker, addr: &str) -> Result<()> {
    let mut req = ctx.join_request("group1", addr);
    req.init_flag = false;
    req.status = StorageStatus::Offline.code() as i64;
    tracker.join(&req)?;
    Ok(())
}

fn assert_views_consistent(registry: &ClusterRegistry) {
    for group in registry.groups().iter() {
        let members = group.members();
        let sorted = members.sorted();
        assert_eq!(sorted.len(), members.all().len());
        assert!(sorted.windows(2).all(|w| w[0].addr < w[1].addr));
        let active = members.active();
        assert!(active.windows(2).all(|w| w[0].addr < w[1].addr));
        for member in active {
            assert!(members.get(&member.addr).is_some());
            assert_eq!(member.record.status(), StorageStatus::Active);
        }
    }
}

#[test]
fn join_inserts_once() -> Result<()> {
    let ctx = TestContext::new("join-inserts-once");
    let tracker = ctx.open_tracker();

    let (first, inserted) = tracker.join(&ctx.join_request("group1", "10.0.0.1"))?;
    assert!(inserted);
    assert_eq!(first.status(), StorageStatus::Init);

    let (second, inserted) = tracker.join(&ctx.join_request("group1", "10.0.0.1"))?;
    assert!(!inserted);
    assert!(Arc::ptr_eq(&first, &second));

    let group = tracker.registry().group("group1")?;
    assert_eq!(group.settings().storage_port, 23000);
    assert_eq!(group.settings().store_path_count, 1);
    assert_eq!(first.detail().path_free_mbs.len(), 1);
    Ok(())
}

#[test]
fn join_rejects_bad_status() {
    let ctx = TestContext::new("join-rejects-bad-status");
    let tracker = ctx.open_tracker();
    for status in [StorageStatus::Deleted, StorageStatus::IpChanged, StorageStatus::None] {
        let mut req = ctx.join_request("group1", "10.0.0.1");
        req.init_flag = false;
        req.status = status.code() as i64;
        assert!(matches!(tracker.join(&req), Err(Error::InvalidArgument(_))));
    }
    let mut req = ctx.join_request("group1", "10.0.0.1");
    req.init_flag = false;
    req.status = -1;
    assert!(matches!(tracker.join(&req), Err(Error::InvalidArgument(_))));
    assert_eq!(tracker.registry().group("group1").unwrap().count(), 0);

    // A status code newer than this tracker is not a tombstone.
    req.status = 8;
    let (record, inserted) = tracker.join(&req).unwrap();
    assert!(inserted);
    assert_eq!(record.status(), StorageStatus::Init);
}

#[test]
fn join_reconciles_group_settings() -> Result<()> {
    let ctx = TestContext::new("join-reconciles-group-settings");
    let tracker = ctx.open_tracker();
    tracker.join(&ctx.join_request("group1", "10.0.0.1"))?;

    // A second member may not diverge from the first.
    let mut req = ctx.join_request("group1", "10.0.0.2");
    req.storage_port = 23001;
    assert!(matches!(tracker.join(&req), Err(Error::InvalidArgument(_))));
    assert!(tracker.registry().storage("group1", "10.0.0.2").is_err());

    // The only member moving its port moves the group along.
    let mut req = ctx.join_request("group1", "10.0.0.1");
    req.storage_port = 23001;
    tracker.join(&req)?;
    let group = tracker.registry().group("group1")?;
    assert_eq!(group.settings().storage_port, 23001);

    let mut req = ctx.join_request("group1", "10.0.0.2");
    req.storage_port = 23001;
    tracker.join(&req)?;
    let mut req = ctx.join_request("group1", "10.0.0.2");
    req.store_path_count = 2;
    req.storage_port = 23001;
    assert!(matches!(tracker.join(&req), Err(Error::InvalidArgument(_))));
    Ok(())
}

#[test]
fn delete_rules() -> Result<()> {
    let ctx = TestContext::new("delete-rules");
    let tracker = ctx.open_tracker();
    join_online(&ctx, &tracker, "10.0.0.1")?;
    let record = tracker.registry().storage("group1", "10.0.0.1")?;
    assert_eq!(record.status(), StorageStatus::Online);

    assert!(matches!(
        tracker.delete_storage("group1", "10.0.0.1"),
        Err(Error::Busy(_))
    ));
    assert_eq!(record.status(), StorageStatus::Online);

    tracker.mark_offline("group1", "10.0.0.1")?;
    tracker.delete_storage("group1", "10.0.0.1")?;
    assert_eq!(record.status(), StorageStatus::Deleted);
    assert!(matches!(
        tracker.delete_storage("group1", "10.0.0.1"),
        Err(Error::AlreadyDone(_))
    ));
    assert!(matches!(
        tracker.delete_storage("group1", "10.0.0.9"),
        Err(Error::NotFound(_))
    ));

    let entries = tracker.persistence().changelog_entries(0, 4096)?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].addr, "10.0.0.1");
    assert_eq!(entries[0].status, StorageStatus::Deleted);

    // Joining again resurrects the same slot.
    let (again, inserted) = tracker.join(&ctx.join_request("group1", "10.0.0.1"))?;
    assert!(!inserted);
    assert!(Arc::ptr_eq(&record, &again));
    assert_eq!(again.status(), StorageStatus::Init);
    Ok(())
}

#[test]
fn change_address_rules() -> Result<()> {
    let ctx = TestContext::new("change-address-rules");
    let tracker = ctx.open_tracker();
    let (record, _) = tracker.join(&ctx.join_request("group1", "10.0.0.1"))?;
    tracker.join(&ctx.join_request("group1", "10.0.0.3"))?;

    let tombstone = tracker.change_address("group1", "10.0.0.1", "10.0.0.2")?;
    assert_eq!(record.addr(), "10.0.0.2");
    assert_eq!(tombstone.addr(), "10.0.0.1");
    assert_eq!(tombstone.status(), StorageStatus::IpChanged);
    assert_views_consistent(&tracker.registry());

    let registry = tracker.registry();
    assert!(Arc::ptr_eq(&registry.storage("group1", "10.0.0.2")?, &record));

    // The old address is a tombstone now.
    assert!(matches!(
        tracker.change_address("group1", "10.0.0.1", "10.0.0.4"),
        Err(Error::AlreadyDone(_))
    ));
    assert!(matches!(
        tracker.change_address("group1", "10.0.0.3", "10.0.0.2"),
        Err(Error::AlreadyExists(_))
    ));

    let entries = tracker.persistence().changelog_entries(0, 4096)?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, StorageStatus::IpChanged);
    assert_eq!(entries[0].arg, "10.0.0.2");
    Ok(())
}

#[test]
fn round_robin_write_cycles_active() -> Result<()> {
    let ctx = TestContext::new("round-robin-write-cycles-active");
    let tracker = ctx.open_tracker();
    for addr in ["10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.4"] {
        join_online(&ctx, &tracker, addr)?;
    }
    for addr in ["10.0.0.1", "10.0.0.2", "10.0.0.4"] {
        assert_eq!(tracker.mark_active("group1", addr)?, StorageStatus::Active);
    }
    assert_views_consistent(&tracker.registry());

    let picks = (0..6)
        .map(|_| tracker.select_write_target(Some("group1")).map(|t| t.storage.addr()))
        .collect::<Result<Vec<_>>>()?;
    let first_round = picks[..3].iter().cloned().collect::<HashSet<_>>();
    assert_eq!(first_round.len(), 3);
    assert!(!first_round.contains("10.0.0.3"));
    assert_eq!(picks[..3], picks[3..]);
    Ok(())
}

#[test]
fn heartbeat_and_liveness() -> Result<()> {
    let ctx = TestContext::new("heartbeat-and-liveness");
    let tracker = ctx.open_tracker();
    join_online(&ctx, &tracker, "10.0.0.1")?;
    tracker.mark_active("group1", "10.0.0.1")?;

    let now = 1_700_000_000;
    let report = StorageReport {
        total_mb: 1000,
        free_mb: 400,
        path_total_mbs: vec![1000],
        path_free_mbs: vec![400],
        stat: None,
    };
    assert_eq!(
        tracker.heartbeat("group1", "10.0.0.1", &report, now)?,
        StorageStatus::Active
    );
    let group = tracker.registry().group("group1")?;
    assert_eq!(group.free_mb(), 400);

    let threshold = tracker.config().check_active_interval_sec as i64;
    assert!(tracker.check_alive(now + threshold)?.is_empty());
    let expired = tracker.check_alive(now + threshold + 1)?;
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].status(), StorageStatus::Offline);
    assert_eq!(group.active_count(), 0);
    assert!(group.store_server().is_none());

    // A heartbeat brings it back online, not active.
    assert_eq!(
        tracker.heartbeat("group1", "10.0.0.1", &report, now + threshold + 2)?,
        StorageStatus::Online
    );
    Ok(())
}

#[test]
fn peer_reports_never_downgrade() -> Result<()> {
    let ctx = TestContext::new("peer-reports-never-downgrade");
    let tracker = ctx.open_tracker();
    join_online(&ctx, &tracker, "10.0.0.1")?;
    tracker.join(&ctx.join_request("group1", "10.0.0.2"))?;

    let changed = tracker.sync_storages(
        "group1",
        &[
            BriefStatus::new("10.0.0.1", StorageStatus::WaitSync),
            BriefStatus::new("10.0.0.2", StorageStatus::WaitSync),
            BriefStatus::new("10.0.0.3", StorageStatus::Syncing),
            BriefStatus::new("10.0.0.4", StorageStatus::Deleted),
            BriefStatus::new("10.0.0.5", StorageStatus::Active),
        ],
    )?;
    assert_eq!(changed, 2);
    let registry = tracker.registry();
    assert_eq!(registry.storage("group1", "10.0.0.1")?.status(), StorageStatus::Online);
    assert_eq!(registry.storage("group1", "10.0.0.2")?.status(), StorageStatus::WaitSync);
    assert_eq!(registry.storage("group1", "10.0.0.3")?.status(), StorageStatus::Syncing);
    assert!(registry.storage("group1", "10.0.0.4").is_err());
    assert!(registry.storage("group1", "10.0.0.5").is_err());
    assert_views_consistent(&registry);
    Ok(())
}

#[test]
fn sync_source_and_timestamps() -> Result<()> {
    let ctx = TestContext::new("sync-source-and-timestamps");
    let tracker = ctx.open_tracker();
    join_online(&ctx, &tracker, "10.0.0.1")?;
    tracker.mark_active("group1", "10.0.0.1")?;
    tracker.join(&ctx.join_request("group1", "10.0.0.2"))?;

    let source = tracker.assign_sync_source("group1", "10.0.0.2", 1_700_000_000)?;
    assert_eq!(source.addr(), "10.0.0.1");
    let dest = tracker.registry().storage("group1", "10.0.0.2")?;
    assert_eq!(dest.detail().sync_src, Some(source.slot()));
    assert_eq!(dest.detail().sync_until_timestamp, 1_700_000_000);

    tracker.report_sync_timestamps("group1", "10.0.0.2", &[("10.0.0.1".to_owned(), 1_650_000_000)])?;
    assert_eq!(dest.last_synced_timestamp(), 1_650_000_000);

    // Nobody else is active for the source to sync from.
    assert!(matches!(
        tracker.assign_sync_source("group1", "10.0.0.1", 1_700_000_000),
        Err(Error::NotFound(_))
    ));
    Ok(())
}

#[test]
fn changelog_catch_up() -> Result<()> {
    let ctx = TestContext::new("changelog-catch-up");
    let tracker = ctx.open_tracker();
    join_online(&ctx, &tracker, "10.0.0.1")?;
    join_online(&ctx, &tracker, "10.0.0.2")?;
    tracker.mark_offline("group1", "10.0.0.2")?;
    tracker.delete_storage("group1", "10.0.0.2")?;

    // A fresh storage starts at the end of the changelog.
    let (record, _) = tracker.join(&ctx.join_request("group1", "10.0.0.3"))?;
    let size = tracker.persistence().changelog_size();
    assert!(size > 0);
    assert_eq!(record.detail().changelog_offset, size);
    assert!(tracker.pending_changes("group1", "10.0.0.3", 4096)?.is_empty());

    tracker.mark_offline("group1", "10.0.0.1")?;
    tracker.change_address("group1", "10.0.0.1", "10.0.0.4")?;
    let pending = tracker.pending_changes("group1", "10.0.0.3", 4096)?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].group, "group1");
    assert_eq!(pending[0].addr, "10.0.0.1");
    assert_eq!(pending[0].status, StorageStatus::IpChanged);
    assert_eq!(pending[0].arg, "10.0.0.4");

    // The renamed storage never replayed anything.
    let pending = tracker.pending_changes("group1", "10.0.0.4", 4096)?;
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].addr, "10.0.0.2");
    assert_eq!(pending[0].status, StorageStatus::Deleted);

    let all = tracker.read_changelog(0, 4096)?;
    assert_eq!(all.len() as u64, tracker.persistence().changelog_size());
    let first_line = all.iter().position(|b| *b == b'\n').unwrap() + 1;
    let partial = tracker.read_changelog(0, first_line + 3)?;
    assert_eq!(partial, &all[..first_line]);
    assert!(tracker.read_changelog(0, first_line - 1)?.is_empty());
    assert!(tracker.read_changelog(size + 1_000, 4096)?.is_empty());
    Ok(())
}
