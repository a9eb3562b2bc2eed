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

use tracing::info;

use super::Tracker;
use crate::{
    persist::ChangelogEntry,
    registry::{unix_timestamp, StatusEvent, StorageRecord, StorageStatus},
    Error, Result,
};

impl Tracker {
    /// Let a storage serve traffic. Members still syncing stay as they are.
    pub fn mark_active(&self, group: &str, addr: &str) -> Result<StorageStatus> {
        self.apply_event(group, addr, StatusEvent::Activate)
    }

    pub fn mark_offline(&self, group: &str, addr: &str) -> Result<StorageStatus> {
        self.apply_event(group, addr, StatusEvent::Deactivate)
    }

    /// Returns whether the http-active view changed.
    pub fn mark_http_active(&self, group: &str, addr: &str) -> Result<bool> {
        let (guard, registry) = self.lock_registry();
        registry.group(group)?.mark_http(&guard, addr, true)
    }

    pub fn mark_http_inactive(&self, group: &str, addr: &str) -> Result<bool> {
        let (guard, registry) = self.lock_registry();
        registry.group(group)?.mark_http(&guard, addr, false)
    }

    fn apply_event(&self, group: &str, addr: &str, event: StatusEvent) -> Result<StorageStatus> {
        let (guard, registry) = self.lock_registry();
        let group = registry.group(group)?;
        let record = group
            .get(addr)
            .ok_or_else(|| Error::NotFound(format!("storage {} of group {}", addr, group.name())))?;
        group.apply(&guard, &record, event)
    }

    /// Delete a storage that does not serve traffic. The deletion is logged
    /// and saved before this returns.
    pub fn delete_storage(&self, group: &str, addr: &str) -> Result<Arc<StorageRecord>> {
        let (guard, registry) = self.lock_registry();
        let group = registry.group(group)?;
        let record = group.delete(&guard, addr)?;

        let persist = &self.shared.persist;
        persist.append_changelog(&ChangelogEntry {
            timestamp: unix_timestamp(),
            group: group.name().to_owned(),
            addr: addr.to_owned(),
            status: StorageStatus::Deleted,
            arg: String::new(),
        })?;
        persist.save_storages(&registry)?;
        info!("storage {} of group {} is deleted", addr, group.name());
        Ok(record)
    }

    /// Move a storage to a new address. The record of `old_addr` takes the new
    /// address; the returned record keeps the old one as a tombstone.
    pub fn change_address(
        &self,
        group: &str,
        old_addr: &str,
        new_addr: &str,
    ) -> Result<Arc<StorageRecord>> {
        let (guard, registry) = self.lock_registry();
        let group = registry.group(group)?;
        let tombstone = group.change_address(&guard, old_addr, new_addr)?;

        let persist = &self.shared.persist;
        persist.append_changelog(&ChangelogEntry {
            timestamp: unix_timestamp(),
            group: group.name().to_owned(),
            addr: old_addr.to_owned(),
            status: StorageStatus::IpChanged,
            arg: new_addr.to_owned(),
        })?;
        persist.save_all(&registry)?;
        info!(
            "storage {} of group {} changes address to {}",
            old_addr,
            group.name(),
            new_addr
        );
        Ok(tombstone)
    }

    /// Force offline the active storages whose heartbeat is too old.
    pub fn check_alive(&self, now: i64) -> Result<Vec<Arc<StorageRecord>>> {
        let (guard, registry) = self.lock_registry();
        registry.check_alive(&guard, now, self.config().check_active_interval())
    }
}
