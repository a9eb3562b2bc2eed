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

use std::sync::Arc;

use tracing::{debug, warn};

use super::Tracker;
use crate::{
    registry::{StatusEvent, StorageRecord, StorageStat, StorageStatus},
    Error, Result,
};

/// Capacity and counters carried by a heartbeat.
#[derive(Clone, Debug, Default)]
pub struct StorageReport {
    pub total_mb: i64,
    pub free_mb: i64,
    pub path_total_mbs: Vec<i64>,
    pub path_free_mbs: Vec<i64>,
    pub stat: Option<StorageStat>,
}

/// The status one storage believes a peer of its group has.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BriefStatus {
    pub addr: String,
    pub status: StorageStatus,
}

impl BriefStatus {
    pub fn new(addr: &str, status: StorageStatus) -> Self {
        BriefStatus {
            addr: addr.to_owned(),
            status,
        }
    }
}

impl Tracker {
    pub fn heartbeat(
        &self,
        group: &str,
        addr: &str,
        report: &StorageReport,
        now: i64,
    ) -> Result<StorageStatus> {
        let (guard, registry) = self.lock_registry();
        let group = registry.group(group)?;
        let record = group
            .get(addr)
            .ok_or_else(|| Error::NotFound(format!("storage {} of group {}", addr, group.name())))?;
        {
            let mut detail = record.detail();
            if let Some(stat) = &report.stat {
                let last_synced_timestamp = detail.stat.last_synced_timestamp;
                detail.stat = stat.clone();
                detail.stat.last_synced_timestamp = last_synced_timestamp;
            }
            detail.stat.last_heart_beat_time = now;
            detail.total_mb = report.total_mb;
            detail.free_mb = report.free_mb;
            if !report.path_total_mbs.is_empty() {
                let count = report.path_total_mbs.len().min(report.path_free_mbs.len());
                detail.resize_paths(count as u32);
                detail.path_total_mbs.copy_from_slice(&report.path_total_mbs[..count]);
                detail.path_free_mbs.copy_from_slice(&report.path_free_mbs[..count]);
            }
        }
        if report.stat.is_some() {
            group.bump_change_count();
        }
        group.apply(&guard, &record, StatusEvent::Reconnect)
    }

    /// Merge the statuses a storage reports for the members of its group.
    /// Reported statuses never downgrade a serving member, and unknown
    /// tombstones are ignored. Returns how many records changed.
    pub fn sync_storages(&self, group: &str, briefs: &[BriefStatus]) -> Result<usize> {
        let (guard, registry) = self.lock_registry();
        let group = registry.group(group)?;
        group.ensure_capacity(&guard, briefs.len())?;

        let mut changed = 0;
        for brief in briefs {
            if matches!(
                brief.status,
                StorageStatus::None | StorageStatus::Active | StorageStatus::Online
            ) {
                continue;
            }
            match group.get(&brief.addr) {
                Some(record) => {
                    let before = record.status();
                    if group.apply(&guard, &record, StatusEvent::Report(brief.status))? != before {
                        changed += 1;
                    }
                }
                None if brief.status.is_tombstone() => {}
                None => {
                    let (record, _) = group.insert(&guard, &brief.addr, brief.status)?;
                    debug!(
                        "storage {} of group {} is learned from a peer, status {}",
                        brief.addr,
                        group.name(),
                        record.status()
                    );
                    changed += 1;
                }
            }
        }
        if changed > 0 {
            self.shared.persist.save_storages(&registry)?;
        }
        Ok(changed)
    }

    /// Record how far `dest` has synced from each source, and refresh the
    /// last synced timestamps of the group.
    pub fn report_sync_timestamps(
        &self,
        group: &str,
        dest: &str,
        timestamps: &[(String, i64)],
    ) -> Result<()> {
        let registry = self.registry();
        let group = registry.group(group)?;
        let members = group.members();
        let dest_slot = members
            .get(dest)
            .map(|r| r.slot())
            .ok_or_else(|| Error::NotFound(format!("storage {} of group {}", dest, group.name())))?;
        for (src, timestamp) in timestamps {
            match members.get(src) {
                Some(record) => group.set_sync_timestamp(record.slot(), dest_slot, *timestamp),
                None => warn!(
                    "sync timestamp of unknown storage {} in group {}, skip",
                    src,
                    group.name()
                ),
            }
        }
        group.refresh_last_synced();
        group.bump_change_count();
        Ok(())
    }

    /// Pick the member `dest` should replicate existing files from.
    pub fn assign_sync_source(&self, group: &str, dest: &str, now: i64) -> Result<Arc<StorageRecord>> {
        let (_guard, registry) = self.lock_registry();
        let group = registry.group(group)?;
        let members = group.members();
        let dest = members
            .get(dest)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("storage {} of group {}", dest, group.name())))?;
        let source = members
            .active()
            .iter()
            .find(|m| m.record.slot() != dest.slot())
            .map(|m| m.record.clone())
            .ok_or_else(|| Error::NotFound(format!("sync source in group {}", group.name())))?;
        {
            let mut detail = dest.detail();
            detail.sync_src = Some(source.slot());
            detail.sync_until_timestamp = now;
        }
        group.bump_change_count();
        self.shared.persist.save_storages(&registry)?;
        Ok(source)
    }
}
