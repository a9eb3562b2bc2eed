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

use std::sync::Arc;

use storage_tracker::{
    peer::TrackerAddr,
    persist::{GROUPS_FILE, STORAGES_FILE, SYNC_TIMESTAMPS_FILE},
    registry::{ClusterRegistry, StorageDetail, StorageStat, StorageStatus},
    Error, Result, StorageReport, Tracker,
};

use crate::helper::{context::*, peer::FakeConnector};

#[ctor::ctor]
fn init() {
    tracing_subscriber::fmt::init();
}

/// What a reload is expected to restore of `detail`.
fn durable_view(mut detail: StorageDetail) -> StorageDetail {
    if !detail.status.is_durable() {
        detail.status = StorageStatus::Offline;
    }
    detail.up_time = 0;
    detail.current_write_path = 0;
    detail
}

fn assert_same_registry(a: &ClusterRegistry, b: &ClusterRegistry) {
    let (a_groups, b_groups) = (a.groups(), b.groups());
    assert_eq!(a_groups.len(), b_groups.len());
    for (a, b) in a_groups.iter().zip(b_groups.iter()) {
        assert_eq!(a.name(), b.name());
        assert_eq!(*a.settings(), *b.settings());
        let (a_members, b_members) = (a.members(), b.members());
        assert_eq!(a_members.count(), b_members.count());
        for (x, y) in a_members.all().iter().zip(b_members.all().iter()) {
            assert_eq!(x.slot(), y.slot());
            assert_eq!(durable_view(x.snapshot()), y.snapshot());
        }
        let count = a_members.count();
        for src in 0..count {
            assert_eq!(a.sync_matrix().row(src, count), b.sync_matrix().row(src, count));
        }
    }
}

fn build_cluster(ctx: &TestContext, tracker: &Tracker) -> Result<()> {
    let mut req = ctx.join_request("group1", "10.0.0.1");
    req.init_flag = false;
    req.status = StorageStatus::Offline.code() as i64;
    req.upload_priority = 5;
    req.domain_name = "storage1.example.com".to_owned();
    tracker.join(&req)?;
    tracker.mark_active("group1", "10.0.0.1")?;
    let stat = StorageStat {
        total_upload_count: 10,
        success_upload_count: 9,
        success_delete_count: 2,
        total_download_bytes: 1 << 40,
        last_source_update: 1_699_999_000,
        ..Default::default()
    };
    tracker.heartbeat(
        "group1",
        "10.0.0.1",
        &StorageReport {
            total_mb: 2048,
            free_mb: 1024,
            path_total_mbs: vec![2048],
            path_free_mbs: vec![1024],
            stat: Some(stat),
        },
        1_700_000_000,
    )?;

    tracker.join(&ctx.join_request("group1", "10.0.0.2"))?;
    tracker.assign_sync_source("group1", "10.0.0.2", 1_700_000_100)?;
    tracker.report_sync_timestamps("group1", "10.0.0.2", &[("10.0.0.1".to_owned(), 1_699_000_000)])?;

    let mut req = ctx.join_request("group2", "10.0.0.3");
    req.storage_port = 23001;
    req.store_path_count = 2;
    req.init_flag = false;
    req.status = StorageStatus::Syncing.code() as i64;
    tracker.join(&req)?;
    Ok(())
}

#[test]
fn save_and_reload_round_trip() -> Result<()> {
    let ctx = TestContext::new("save-and-reload-round-trip");
    let tracker = ctx.open_tracker();
    build_cluster(&ctx, &tracker)?;
    tracker.save_now()?;

    let reloaded = ctx.open_tracker();
    let (before, after) = (tracker.registry(), reloaded.registry());
    assert_eq!(after.group_count(), 2);
    assert_same_registry(&before, &after);

    let dest = after.storage("group1", "10.0.0.2")?;
    let source = after.storage("group1", "10.0.0.1")?;
    assert_eq!(dest.detail().sync_src, Some(source.slot()));
    assert_eq!(dest.last_synced_timestamp(), 1_699_000_000);
    assert_eq!(source.status(), StorageStatus::Offline);
    assert_eq!(
        after.storage("group2", "10.0.0.3")?.status(),
        StorageStatus::Syncing
    );
    Ok(())
}

#[test]
fn shutdown_saves_everything() -> Result<()> {
    let ctx = TestContext::new("shutdown-saves-everything");
    let tracker = ctx.open_tracker();
    build_cluster(&ctx, &tracker)?;

    // Heartbeats are not saved by themselves.
    tracker.heartbeat(
        "group1",
        "10.0.0.1",
        &StorageReport {
            total_mb: 4096,
            free_mb: 3000,
            ..Default::default()
        },
        1_700_000_500,
    )?;
    tracker.shutdown()?;

    let reloaded = ctx.open_tracker();
    let record = reloaded.registry().storage("group1", "10.0.0.1")?;
    assert_eq!(record.detail().free_mb, 3000);
    assert_eq!(record.last_heart_beat_time(), 1_700_000_500);
    assert_eq!(reloaded.last_status().up_time, tracker.up_time());
    assert!(reloaded.last_status().last_check_time >= tracker.up_time());
    Ok(())
}

#[test]
fn malformed_snapshot_is_fatal() {
    let ctx = TestContext::new("malformed-snapshot-is-fatal");
    std::fs::create_dir_all(ctx.data_path()).unwrap();
    std::fs::write(ctx.data_path().join(GROUPS_FILE), "group_count = 1\n").unwrap();
    let result = Tracker::open(ctx.config().clone(), Arc::new(FakeConnector::default()));
    assert!(result.is_err());

    std::fs::write(
        ctx.data_path().join(GROUPS_FILE),
        "[Global]\ngroup_count = 1\n[Group001]\ngroup_name = group1\n",
    )
    .unwrap();
    std::fs::write(
        ctx.data_path().join(STORAGES_FILE),
        "[Global]\nstorage_count = 1\n[Storage001]\ngroup_name = group1\nip_addr = 10.0.0.1\nstatus = 6\nsync_src_server = 10.0.0.9\n",
    )
    .unwrap();
    let result = Tracker::open(ctx.config().clone(), Arc::new(FakeConnector::default()));
    assert!(matches!(result, Err(Error::NotFound(_))));
}

#[test]
fn malformed_timestamp_rows_are_skipped() -> Result<()> {
    let ctx = TestContext::new("malformed-timestamp-rows-are-skipped");
    let tracker = ctx.open_tracker();
    build_cluster(&ctx, &tracker)?;
    tracker.save_now()?;

    let path = ctx.data_path().join(SYNC_TIMESTAMPS_FILE);
    let mut content = std::fs::read_to_string(&path)?;
    content.push_str("group9,10.0.0.9,1,2\nnot a row\n");
    std::fs::write(&path, content)?;

    let reloaded = ctx.open_tracker();
    let dest = reloaded.registry().storage("group1", "10.0.0.2")?;
    assert_eq!(dest.last_synced_timestamp(), 1_699_000_000);
    Ok(())
}

#[test]
fn peers_are_learned_from_first_join() -> Result<()> {
    let ctx = TestContext::new("peers-are-learned-from-first-join");
    let tracker = ctx.open_tracker();
    assert!(tracker.peers().is_empty());
    tracker.join(&ctx.join_request("group1", "10.0.0.1"))?;

    let mut req = ctx.join_request("group1", "10.0.0.2");
    req.trackers = vec![TrackerAddr::new("10.0.9.9", TRACKER_PORT)];
    tracker.join(&req)?;
    assert_eq!(tracker.peers(), ctx.trackers());
    Ok(())
}
