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

use std::{net::Ipv4Addr, sync::Arc};

use base64::{
    alphabet,
    engine::{general_purpose, GeneralPurpose},
    Engine,
};

use super::{ClusterRegistry, GroupDirectory, MemberTable, StorageRecord};
use crate::{
    config::{DownloadServerPolicy, StoreLookup, StorePathPolicy, StoreServerPolicy},
    Error, Result,
};

/// Length of the `M00/00/00/` prefix of a file name.
const LOGIC_FILE_PATH_LEN: usize = 10;
const FILENAME_BASE64_LENGTH: usize = 27;
const FILE_EXT_NAME_MAX_LEN: usize = 6;
const NORMAL_LOGIC_FILENAME_LENGTH: usize =
    LOGIC_FILE_PATH_LEN + FILENAME_BASE64_LENGTH + FILE_EXT_NAME_MAX_LEN + 1;
/// Names shorter than this carry no embedded origin.
const LEGACY_FILENAME_LENGTH: usize = 32 + FILE_EXT_NAME_MAX_LEN + 1;
const APPENDER_FILE_SIZE_FLAG: i64 = 1 << 58;

const FILENAME_ENGINE: GeneralPurpose =
    GeneralPurpose::new(&alphabet::URL_SAFE, general_purpose::NO_PAD);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadCommand {
    FetchOne,
    FetchAll,
    Update,
}

/// What a file name tells about where the file was first written.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileLocator {
    pub source_addr: Option<String>,
    pub create_timestamp: i64,
    pub file_size: i64,
    /// Slave and appender files are only guaranteed on their origin.
    pub normal: bool,
}

impl FileLocator {
    pub fn parse(filename: &str) -> Result<Self> {
        if filename.len() < LEGACY_FILENAME_LENGTH {
            return Ok(FileLocator {
                normal: true,
                ..Default::default()
            });
        }

        let encoded = filename
            .get(LOGIC_FILE_PATH_LEN..LOGIC_FILE_PATH_LEN + FILENAME_BASE64_LENGTH)
            .ok_or_else(|| Error::InvalidArgument(format!("file name {}", filename)))?;
        let buf = FILENAME_ENGINE
            .decode(encoded)
            .map_err(|e| Error::InvalidArgument(format!("file name {}: {}", filename, e)))?;
        if buf.len() < 16 {
            return Err(Error::InvalidArgument(format!("file name {}", filename)));
        }

        let source = Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]);
        let create_timestamp = i32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) as i64;
        let mut size = [0u8; 8];
        size.copy_from_slice(&buf[8..16]);
        let file_size = i64::from_be_bytes(size);

        let slave = filename.len() > NORMAL_LOGIC_FILENAME_LENGTH;
        let appender = file_size & APPENDER_FILE_SIZE_FLAG != 0;
        Ok(FileLocator {
            source_addr: Some(source.to_string()),
            create_timestamp,
            file_size,
            normal: !(slave || appender),
        })
    }

    /// Encode the origin part of a file name, the inverse of [`FileLocator::parse`].
    pub fn encode_name(source: Ipv4Addr, create_timestamp: i32, file_size: i64, ext: &str) -> String {
        let mut buf = Vec::with_capacity(20);
        buf.extend_from_slice(&source.octets());
        buf.extend_from_slice(&create_timestamp.to_be_bytes());
        buf.extend_from_slice(&file_size.to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes());
        format!("M00/00/00/{}.{}", FILENAME_ENGINE.encode(buf), ext)
    }
}

#[derive(Clone)]
pub struct WriteTarget {
    pub group: Arc<GroupDirectory>,
    pub storage: Arc<StorageRecord>,
    pub store_path_index: u32,
}

/// The member of `group` a new write should go to.
pub fn writable_storage(
    group: &GroupDirectory,
    members: &MemberTable,
    policy: StoreServerPolicy,
) -> Option<Arc<StorageRecord>> {
    if policy != StoreServerPolicy::RoundRobin {
        return members.store_server().cloned();
    }
    let active = members.active();
    if active.is_empty() {
        return None;
    }
    let index = group.next_write_index(active.len());
    Some(active[index].record.clone())
}

/// The store path of `storage` a new write should go to.
pub fn select_store_path(storage: &StorageRecord, policy: StorePathPolicy) -> u32 {
    let mut detail = storage.detail();
    if detail.store_path_count == 0 {
        return 0;
    }
    match policy {
        StorePathPolicy::RoundRobin => {
            let index = detail.current_write_path % detail.store_path_count;
            detail.current_write_path = (index + 1) % detail.store_path_count;
            index
        }
        StorePathPolicy::LoadBalance => detail
            .path_free_mbs
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(&a.0)))
            .map(|(i, _)| i as u32)
            .unwrap_or(0),
    }
}

impl ClusterRegistry {
    /// The group a write without an explicit group should go to.
    pub fn select_write_group(&self) -> Result<Arc<GroupDirectory>> {
        match self.placement().store_lookup {
            StoreLookup::SpecGroup => self
                .store_group()
                .filter(|g| g.store_server().is_some())
                .ok_or_else(|| {
                    Error::NotFound(format!("writable group {}", self.placement().store_group))
                }),
            StoreLookup::RoundRobin => {
                let groups = self.groups();
                let start = self.next_group_index(groups.len());
                (0..groups.len())
                    .map(|i| &groups[(start + i) % groups.len()])
                    .find(|g| g.store_server().is_some())
                    .cloned()
                    .ok_or_else(|| Error::NotFound("writable group".to_owned()))
            }
            StoreLookup::LoadBalance => self
                .groups()
                .iter()
                .filter(|g| g.store_server().is_some())
                .max_by_key(|g| g.free_mb())
                .cloned()
                .ok_or_else(|| Error::NotFound("writable group".to_owned())),
        }
    }

    pub fn select_write_target(&self, group: Option<&str>) -> Result<WriteTarget> {
        let group = match group {
            Some(name) => self.group(name)?,
            None => self.select_write_group()?,
        };
        let members = group.members();
        let storage = writable_storage(&group, &members, self.placement().store_server)
            .ok_or_else(|| Error::NotFound(format!("active storage of group {}", group.name())))?;
        let store_path_index = select_store_path(&storage, self.placement().store_path);
        Ok(WriteTarget {
            group,
            storage,
            store_path_index,
        })
    }

    /// The storages a client may read `filename` from, or update it on.
    pub fn select_read_targets(
        &self,
        group: &str,
        filename: &str,
        command: ReadCommand,
        now: i64,
    ) -> Result<Vec<Arc<StorageRecord>>> {
        let group = self.group(group)?;
        let members = group.members();
        let not_found = || Error::NotFound(format!("active storage of group {}", group.name()));
        if members.active().is_empty() {
            return Err(not_found());
        }
        let store_server = members.store_server().cloned().ok_or_else(not_found)?;
        let locator = FileLocator::parse(filename)?;

        let targets = match command {
            ReadCommand::FetchOne => vec![self.fetch_one(&group, &members, &locator, store_server, now)],
            ReadCommand::Update => {
                let source = locator
                    .source_addr
                    .as_deref()
                    .and_then(|addr| members.get_active(addr).cloned());
                match source {
                    Some(source) => vec![source],
                    None => writable_storage(&group, &members, self.placement().store_server)
                        .into_iter()
                        .collect(),
                }
            }
            ReadCommand::FetchAll => self.fetch_all(&members, &locator, store_server, now),
        };
        if targets.is_empty() {
            return Err(not_found());
        }
        Ok(targets)
    }

    fn caught_up(&self, storage: &StorageRecord, locator: &FileLocator, now: i64) -> bool {
        let placement = self.placement();
        let file_timestamp = locator.create_timestamp;
        let last_synced = storage.last_synced_timestamp();
        file_timestamp < now - placement.storage_sync_file_max_delay_sec
            || last_synced > file_timestamp
            || (last_synced + 1 >= file_timestamp
                && now - file_timestamp > placement.storage_sync_file_max_time_sec)
            || (locator.source_addr.is_none()
                && placement.store_server == StoreServerPolicy::RoundRobin)
    }

    fn fetch_one(
        &self,
        group: &GroupDirectory,
        members: &MemberTable,
        locator: &FileLocator,
        store_server: Arc<StorageRecord>,
        now: i64,
    ) -> Arc<StorageRecord> {
        let placement = self.placement();
        let source = locator.source_addr.as_deref();
        if placement.download_server == DownloadServerPolicy::SourceFirst {
            if let Some(record) = source.and_then(|addr| members.get_active(addr)) {
                return record.clone();
            }
        }

        let active = members.active();
        let index = group.read_index(active.len());
        let candidate = self.stale_guard(
            members,
            locator,
            active[index].record.clone(),
            store_server,
            now,
        );
        group.advance_read_cursor(active.len());
        candidate
    }

    fn stale_guard(
        &self,
        members: &MemberTable,
        locator: &FileLocator,
        candidate: Arc<StorageRecord>,
        store_server: Arc<StorageRecord>,
        now: i64,
    ) -> Arc<StorageRecord> {
        let placement = self.placement();
        if locator.normal {
            if self.caught_up(&candidate, locator, now) {
                return candidate;
            }
            if locator.source_addr.is_none() {
                return store_server;
            }
        }

        let source = match locator.source_addr.as_deref() {
            Some(source) => source,
            None => return candidate,
        };
        if candidate.addr() == source {
            return candidate;
        }
        if placement.download_server == DownloadServerPolicy::RoundRobin {
            if let Some(record) = members.get_active(source) {
                return record.clone();
            }
        }
        if placement.store_server != StoreServerPolicy::RoundRobin {
            return store_server;
        }
        candidate
    }

    fn fetch_all(
        &self,
        members: &MemberTable,
        locator: &FileLocator,
        store_server: Arc<StorageRecord>,
        now: i64,
    ) -> Vec<Arc<StorageRecord>> {
        let source = locator.source_addr.as_deref();
        let mut targets = if locator.normal {
            members
                .active()
                .iter()
                .filter(|m| self.caught_up(&m.record, locator, now) || Some(m.addr.as_str()) == source)
                .map(|m| m.record.clone())
                .collect::<Vec<_>>()
        } else {
            source
                .and_then(|addr| members.get_active(addr))
                .cloned()
                .into_iter()
                .collect()
        };
        if targets.is_empty() {
            targets.push(store_server);
        }
        targets
    }
}
