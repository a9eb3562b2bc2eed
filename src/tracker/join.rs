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

use std::{fmt::Display, sync::Arc};

use tracing::{debug, info, warn};

use super::{metrics::*, new_registry, Tracker};
use crate::{
    bootstrap::STAGING_DIR,
    peer::{RunningStatus, TrackerAddr},
    persist::Persistence,
    registry::{
        unix_timestamp, GroupDirectory, GroupSettings, StatusEvent, StorageDetail,
        StorageRecord, StorageStatus,
    },
    Error, Result,
};

/// A decoded join message of a storage server.
#[derive(Clone, Debug, Default)]
pub struct JoinRequest {
    pub group: String,
    pub addr: String,
    pub storage_port: u16,
    pub storage_http_port: u16,
    pub store_path_count: u32,
    pub subdir_count_per_path: u32,
    pub upload_priority: i32,
    pub join_time: i64,
    pub up_time: i64,
    pub version: String,
    pub domain_name: String,
    /// Set by a storage joining with empty data for the first time.
    pub init_flag: bool,
    /// Status code the storage remembers, meaningful when `init_flag` is unset.
    pub status: i64,
    /// The trackers the storage is configured with, this one included.
    pub trackers: Vec<TrackerAddr>,
}

impl Tracker {
    /// Admit a storage into its group. Returns the record and whether it was
    /// inserted by this call.
    pub fn join(&self, req: &JoinRequest) -> Result<(Arc<StorageRecord>, bool)> {
        JOIN_TOTAL.inc();
        let _timer = JOIN_DURATION_SECONDS.start_timer();
        let result = self.join_inner(req);
        if let Err(err) = &result {
            JOIN_FAIL_TOTAL.inc();
            warn!(
                "storage {} join group {} fail: {}",
                req.addr, req.group, err
            );
        }
        result
    }

    fn join_inner(&self, req: &JoinRequest) -> Result<(Arc<StorageRecord>, bool)> {
        self.remember_peers(&req.trackers);
        self.bootstrap_if_needed(&req.trackers)?;

        let (guard, registry) = self.lock_registry();
        let persist = &self.shared.persist;
        let (group, created) = registry.insert_group(&guard, &req.group, GroupSettings::default())?;
        if created {
            persist.save_groups(&registry)?;
        }

        if let Some(record) = group.get(&req.addr) {
            let mut detail = record.detail();
            detail.storage_port = req.storage_port;
            detail.storage_http_port = req.storage_http_port;
        }
        let mut settings_changed = reconcile(
            &group,
            "storage port",
            req.storage_port,
            true,
            |s| &mut s.storage_port,
            |d| d.storage_port,
        )?;
        settings_changed |= reconcile(
            &group,
            "storage http port",
            req.storage_http_port,
            self.config().http.enabled,
            |s| &mut s.storage_http_port,
            |d| d.storage_http_port,
        )?;
        if settings_changed {
            persist.save_groups(&registry)?;
        }

        if group.get(&req.addr).is_none() && !req.init_flag {
            validate_join_status(req)?;
        }
        let (record, inserted) = group.insert(&guard, &req.addr, StorageStatus::Init)?;
        let priority_changed = {
            let mut detail = record.detail();
            let priority_changed = detail.upload_priority != req.upload_priority;
            fill_detail(&mut detail, req);
            priority_changed
        };
        if priority_changed && record.status() == StorageStatus::Active {
            group.refresh_store_server(&guard);
        }

        let mut settings_changed = reconcile(
            &group,
            "store path count",
            req.store_path_count,
            true,
            |s| &mut s.store_path_count,
            |d| d.store_path_count,
        )?;
        settings_changed |= reconcile(
            &group,
            "subdir count per path",
            req.subdir_count_per_path,
            true,
            |s| &mut s.subdir_count_per_path,
            |d| d.subdir_count_per_path,
        )?;
        if settings_changed {
            persist.save_groups(&registry)?;
        }

        if inserted {
            if !req.init_flag && req.status > 0 {
                if let Some(status) = StorageStatus::from_code(req.status) {
                    let status = match status {
                        StorageStatus::Active => StorageStatus::Online,
                        status => status,
                    };
                    group.force_status(&guard, &record, status);
                }
            }
            persist.save_all(&registry)?;
        }

        group.apply(&guard, &record, StatusEvent::Reconnect)?;
        let changelog_size = persist.changelog_size();
        let remain = {
            let mut detail = record.detail();
            if detail.status == StorageStatus::Init {
                detail.changelog_offset = changelog_size;
            }
            changelog_size.saturating_sub(detail.changelog_offset)
        };
        debug!(
            "storage {} join group {}, inserted {}, remain changelog bytes {}",
            req.addr, req.group, inserted, remain
        );
        Ok((record, inserted))
    }

    fn remember_peers(&self, trackers: &[TrackerAddr]) {
        let mut peers = self.shared.peers.lock().unwrap();
        if peers.is_empty() && !trackers.is_empty() {
            *peers = trackers.to_vec();
        }
    }

    /// Pull the system files from a peer when this is the first join after a
    /// long stop, or when the registry is empty.
    fn bootstrap_if_needed(&self, peers: &[TrackerAddr]) -> Result<()> {
        let mut state = self.shared.bootstrap.state();
        if state.need_check {
            let last = self.shared.last_status;
            let interval = self.config().sync_status_interval_sec as i64;
            if last.last_check_time > 0
                && self.shared.up_time - last.last_check_time > 2 * interval
            {
                let local = self.running_status(unix_timestamp());
                self.sync_from_peers(peers, Some(local))
                    .map_err(retry_later)?;
                state.done = true;
            }
            state.need_check = false;
        }

        if !state.done && self.registry().group_count() == 0 {
            self.sync_from_peers(peers, None).map_err(retry_later)?;
            state.done = true;
        }
        Ok(())
    }

    fn sync_from_peers(&self, peers: &[TrackerAddr], local: Option<RunningStatus>) -> Result<()> {
        let _timer = BOOTSTRAP_DURATION_SECONDS.start_timer();
        let persist = &self.shared.persist;
        let staging = persist.data_path().join(STAGING_DIR);
        let staged = match self
            .shared
            .bootstrap
            .fetch_if_behind(peers, local, &staging)?
        {
            Some(staged) => staged,
            None => return Ok(()),
        };

        let guard = self.shared.structure.lock();
        let registry = new_registry(self.config());
        {
            let staged_persist = Persistence::open(&staging)?;
            staged_persist.load(&registry, &guard)?;
        }
        persist.install_sys_files(&staged)?;
        self.shared.registry.store(Arc::new(registry));
        drop(guard);

        if let Err(err) = std::fs::remove_dir_all(&staging) {
            warn!("remove staging dir {:?}: {}", staging, err);
        }
        self.save_status(unix_timestamp())?;
        info!(
            "registry is replaced by system files of a peer, {} groups",
            self.registry().group_count()
        );
        Ok(())
    }
}

fn retry_later(err: Error) -> Error {
    BOOTSTRAP_FAIL_TOTAL.inc();
    warn!("sync system files from peer trackers fail: {}", err);
    Error::Retryable(format!("sync system files, {}", err))
}

/// A returning storage may not claim a tombstone status. Codes this tracker
/// does not know are let through; the record then stays INIT.
fn validate_join_status(req: &JoinRequest) -> Result<()> {
    let rejected = req.status < 0
        || matches!(
            StorageStatus::from_code(req.status),
            Some(StorageStatus::Deleted | StorageStatus::IpChanged | StorageStatus::None)
        );
    if rejected {
        return Err(Error::InvalidArgument(format!(
            "storage {} of group {} joins with status {}",
            req.addr, req.group, req.status
        )));
    }
    Ok(())
}

fn fill_detail(detail: &mut StorageDetail, req: &JoinRequest) {
    detail.resize_paths(req.store_path_count);
    detail.subdir_count_per_path = req.subdir_count_per_path;
    detail.upload_priority = req.upload_priority;
    detail.join_time = req.join_time;
    detail.up_time = req.up_time;
    detail.version = req.version.clone();
    detail.domain_name = req.domain_name.clone();
    detail.storage_port = req.storage_port;
    detail.storage_http_port = req.storage_http_port;
}

/// Bring one group wide setting in line with a joining storage. The group
/// adopts `wanted` when it has no value yet, or when every live member
/// already uses it. Returns whether the group setting changed.
fn reconcile<T>(
    group: &GroupDirectory,
    what: &str,
    wanted: T,
    strict: bool,
    setting: fn(&mut GroupSettings) -> &mut T,
    member: fn(&StorageDetail) -> T,
) -> Result<bool>
where
    T: Copy + Default + PartialEq + Display,
{
    let current = *setting(&mut group.settings());
    if current == wanted {
        return Ok(false);
    }
    if current != T::default() {
        let agree = group
            .members()
            .all()
            .iter()
            .map(|record| record.detail())
            .filter(|detail| !detail.status.is_tombstone())
            .all(|detail| member(&detail) == wanted);
        if !agree {
            let msg = format!(
                "{} {} of group {}, the group uses {}",
                what,
                wanted,
                group.name(),
                current
            );
            if strict {
                return Err(Error::InvalidArgument(msg));
            }
            warn!("inconsistent {}", msg);
            return Ok(false);
        }
        debug!(
            "all storages of group {} use {} {}, adjust",
            group.name(),
            what,
            wanted
        );
    }
    *setting(&mut group.settings()) = wanted;
    Ok(true)
}
