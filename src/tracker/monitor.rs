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

use serde::Serialize;

use super::Tracker;
use crate::{
    registry::{ClusterRegistry, GroupDirectory, MemberTable, StorageRecord, StorageStat},
    Error, Result,
};

#[derive(Debug, Serialize)]
pub struct ClusterView {
    pub groups: Vec<GroupView>,
}

#[derive(Debug, Serialize)]
pub struct GroupView {
    pub name: String,
    pub storage_port: u16,
    pub storage_http_port: u16,
    pub store_path_count: u32,
    pub subdir_count_per_path: u32,
    pub current_trunk_file_id: i64,
    pub storage_count: usize,
    pub active_count: usize,
    pub free_mb: i64,
    pub total_mb: i64,
    pub file_count: i64,
    pub store_server: Option<String>,
    pub storages: Vec<StorageView>,
}

#[derive(Debug, Serialize)]
pub struct StorageView {
    pub addr: String,
    pub status: String,
    pub domain_name: String,
    pub version: String,
    pub sync_src: Option<String>,
    pub join_time: i64,
    pub up_time: i64,
    pub upload_priority: i32,
    pub total_mb: i64,
    pub free_mb: i64,
    pub changelog_offset: u64,
    pub stat: StorageStat,
}

impl ClusterView {
    pub fn of(registry: &ClusterRegistry) -> Self {
        ClusterView {
            groups: registry.groups().iter().map(|g| GroupView::of(g)).collect(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidData(e.to_string()))
    }
}

impl GroupView {
    fn of(group: &GroupDirectory) -> Self {
        let settings = group.settings().clone();
        let members = group.members();
        GroupView {
            name: group.name().to_owned(),
            storage_port: settings.storage_port,
            storage_http_port: settings.storage_http_port,
            store_path_count: settings.store_path_count,
            subdir_count_per_path: settings.subdir_count_per_path,
            current_trunk_file_id: settings.current_trunk_file_id,
            storage_count: members.count(),
            active_count: members.active().len(),
            free_mb: group.free_mb(),
            total_mb: group.total_mb(),
            file_count: group.file_count(),
            store_server: members.store_server().map(|r| r.addr()),
            storages: members
                .sorted()
                .iter()
                .map(|m| StorageView::of(&members, &m.record))
                .collect(),
        }
    }
}

impl StorageView {
    fn of(members: &MemberTable, record: &StorageRecord) -> Self {
        let detail = record.snapshot();
        StorageView {
            sync_src: detail
                .sync_src
                .and_then(|slot| members.record_at(slot))
                .map(|r| r.addr()),
            status: detail.status.to_string(),
            addr: detail.addr,
            domain_name: detail.domain_name,
            version: detail.version,
            join_time: detail.join_time,
            up_time: detail.up_time,
            upload_priority: detail.upload_priority,
            total_mb: detail.total_mb,
            free_mb: detail.free_mb,
            changelog_offset: detail.changelog_offset,
            stat: detail.stat,
        }
    }
}

impl Tracker {
    pub fn cluster_view(&self) -> ClusterView {
        ClusterView::of(&self.registry())
    }
}
