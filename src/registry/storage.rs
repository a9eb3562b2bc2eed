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

use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use super::StorageStatus;

macro_rules! storage_stat {
    ($($field:ident),* $(,)?) => {
        /// The durable counters a storage reports with its heartbeats.
        #[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
        pub struct StorageStat {
            $(pub $field: i64,)*
        }

        impl StorageStat {
            /// All counters with their persisted key names.
            pub fn fields(&self) -> Vec<(&'static str, i64)> {
                vec![$((stringify!($field), self.$field),)*]
            }

            pub fn field_mut(&mut self, key: &str) -> Option<&mut i64> {
                match key {
                    $(stringify!($field) => Some(&mut self.$field),)*
                    _ => None,
                }
            }
        }
    };
}

storage_stat!(
    total_upload_count,
    success_upload_count,
    total_append_count,
    success_append_count,
    total_set_meta_count,
    success_set_meta_count,
    total_delete_count,
    success_delete_count,
    total_download_count,
    success_download_count,
    total_get_meta_count,
    success_get_meta_count,
    total_create_link_count,
    success_create_link_count,
    total_delete_link_count,
    success_delete_link_count,
    total_upload_bytes,
    success_upload_bytes,
    total_append_bytes,
    success_append_bytes,
    total_download_bytes,
    success_download_bytes,
    total_sync_in_bytes,
    success_sync_in_bytes,
    total_sync_out_bytes,
    success_sync_out_bytes,
    total_file_open_count,
    success_file_open_count,
    total_file_read_count,
    success_file_read_count,
    total_file_write_count,
    success_file_write_count,
    last_source_update,
    last_sync_update,
    last_synced_timestamp,
    last_heart_beat_time,
);

/// Everything known about one storage server. Guarded by the record mutex.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StorageDetail {
    pub addr: String,
    pub status: StorageStatus,
    pub storage_port: u16,
    pub storage_http_port: u16,
    pub domain_name: String,
    pub version: String,

    /// Slot of the storage this one replicates from, in the same group.
    pub sync_src: Option<usize>,
    pub sync_until_timestamp: i64,

    pub join_time: i64,
    pub up_time: i64,

    pub store_path_count: u32,
    pub subdir_count_per_path: u32,
    pub upload_priority: i32,

    pub total_mb: i64,
    pub free_mb: i64,
    pub path_total_mbs: Vec<i64>,
    pub path_free_mbs: Vec<i64>,

    pub stat: StorageStat,
    pub changelog_offset: u64,

    /// Round-robin cursor over store paths, never persisted.
    pub current_write_path: u32,
}

impl StorageDetail {
    pub fn new(addr: &str, status: StorageStatus) -> Self {
        StorageDetail {
            addr: addr.to_owned(),
            status,
            ..Default::default()
        }
    }

    /// Resize the per path capacity arrays, keeping values of surviving paths.
    pub fn resize_paths(&mut self, store_path_count: u32) {
        self.store_path_count = store_path_count;
        self.path_total_mbs.resize(store_path_count as usize, 0);
        self.path_free_mbs.resize(store_path_count as usize, 0);
    }

    /// Forget everything but the address and the ports.
    pub fn clear(&mut self) {
        let addr = std::mem::take(&mut self.addr);
        let storage_port = self.storage_port;
        let storage_http_port = self.storage_http_port;
        let status = self.status;
        *self = StorageDetail {
            addr,
            status,
            storage_port,
            storage_http_port,
            ..Default::default()
        };
    }
}

/// One physical storage server. Records are never removed from their group;
/// deletion and address changes are status transitions, and the slot is reused
/// when the address comes back.
#[derive(Debug)]
pub struct StorageRecord {
    slot: usize,
    group: String,
    detail: Mutex<StorageDetail>,
}

impl StorageRecord {
    pub fn new(slot: usize, group: &str, detail: StorageDetail) -> Self {
        StorageRecord {
            slot,
            group: group.to_owned(),
            detail: Mutex::new(detail),
        }
    }

    /// Index of this record in the group's insertion order view.
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn group_name(&self) -> &str {
        &self.group
    }

    pub fn detail(&self) -> MutexGuard<'_, StorageDetail> {
        self.detail.lock().unwrap()
    }

    pub fn snapshot(&self) -> StorageDetail {
        self.detail().clone()
    }

    pub fn addr(&self) -> String {
        self.detail().addr.clone()
    }

    pub fn status(&self) -> StorageStatus {
        self.detail().status
    }

    pub fn upload_priority(&self) -> i32 {
        self.detail().upload_priority
    }

    pub fn last_heart_beat_time(&self) -> i64 {
        self.detail().stat.last_heart_beat_time
    }

    pub fn last_synced_timestamp(&self) -> i64 {
        self.detail().stat.last_synced_timestamp
    }
}
