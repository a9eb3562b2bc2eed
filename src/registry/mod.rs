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

mod group;
mod liveness;
mod lock;
mod matrix;
mod metrics;
mod selector;
mod status;
mod storage;

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use arc_swap::{ArcSwap, ArcSwapOption};
use tracing::info;

pub use self::{
    group::{GroupDirectory, GroupSettings, Member, MemberTable, ALLOC_ONCE},
    liveness::unix_timestamp,
    lock::{StructureGuard, StructureLock},
    matrix::SyncMatrix,
    selector::{select_store_path, writable_storage, FileLocator, ReadCommand, WriteTarget},
    status::{Rejection, StatusEvent, StorageStatus, Transition},
    storage::{StorageDetail, StorageRecord, StorageStat},
};
use crate::{config::PlacementConfig, Error, Result};

pub const GROUP_NAME_MAX_LEN: usize = 16;

/// All groups known to this tracker, sorted by name.
pub struct ClusterRegistry {
    placement: PlacementConfig,
    independent_http: bool,

    groups: ArcSwap<Vec<Arc<GroupDirectory>>>,
    store_group: ArcSwapOption<GroupDirectory>,
    group_cursor: AtomicUsize,
}

impl ClusterRegistry {
    pub fn new(placement: PlacementConfig, independent_http: bool) -> Self {
        ClusterRegistry {
            placement,
            independent_http,
            groups: ArcSwap::from_pointee(Vec::new()),
            store_group: ArcSwapOption::empty(),
            group_cursor: AtomicUsize::new(0),
        }
    }

    pub fn placement(&self) -> &PlacementConfig {
        &self.placement
    }

    /// The groups sorted by name, as of the last structural change.
    pub fn groups(&self) -> Arc<Vec<Arc<GroupDirectory>>> {
        self.groups.load_full()
    }

    pub fn group_count(&self) -> usize {
        self.groups.load().len()
    }

    pub fn get_group(&self, name: &str) -> Option<Arc<GroupDirectory>> {
        let groups = self.groups.load();
        groups
            .binary_search_by(|g| g.name().cmp(name))
            .ok()
            .map(|i| groups[i].clone())
    }

    pub fn group(&self, name: &str) -> Result<Arc<GroupDirectory>> {
        self.get_group(name)
            .ok_or_else(|| Error::NotFound(format!("group {}", name)))
    }

    pub fn storage(&self, group: &str, addr: &str) -> Result<Arc<StorageRecord>> {
        self.group(group)?
            .get(addr)
            .ok_or_else(|| Error::NotFound(format!("storage {} of group {}", addr, group)))
    }

    /// The pinned write group, once it exists.
    pub fn store_group(&self) -> Option<Arc<GroupDirectory>> {
        self.store_group.load_full()
    }

    /// Insert a group unless it exists. Returns the group and whether it was
    /// created.
    pub fn insert_group(
        &self,
        _guard: &StructureGuard<'_>,
        name: &str,
        settings: GroupSettings,
    ) -> Result<(Arc<GroupDirectory>, bool)> {
        if let Some(group) = self.get_group(name) {
            return Ok((group, false));
        }
        validate_group_name(name)?;

        let group = Arc::new(GroupDirectory::new(
            name,
            settings,
            self.placement.store_server,
            self.independent_http,
        ));
        let current = self.groups.load_full();
        let mut next = Vec::new();
        next.try_reserve_exact(current.len() + 1)?;
        next.extend(current.iter().cloned());
        let pos = next
            .binary_search_by(|g| g.name().cmp(name))
            .unwrap_or_else(|pos| pos);
        next.insert(pos, group.clone());
        self.groups.store(Arc::new(next));

        if name == self.placement.store_group {
            self.store_group.store(Some(group.clone()));
        }
        info!("group {} is created", name);
        Ok((group, true))
    }

    /// Next index of the group round-robin over `count` groups.
    pub fn next_group_index(&self, count: usize) -> usize {
        let prev = self
            .group_cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                Some(if cur + 1 >= count { 0 } else { cur + 1 })
            })
            .unwrap_or_default();
        if prev >= count {
            0
        } else {
            prev
        }
    }
}

fn validate_group_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > GROUP_NAME_MAX_LEN {
        return Err(Error::InvalidArgument(format!(
            "group name {:?} must be 1 to {} bytes",
            name, GROUP_NAME_MAX_LEN
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(Error::InvalidArgument(format!(
            "group name {:?} contains invalid characters",
            name
        )));
    }
    Ok(())
}
