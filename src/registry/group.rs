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

use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc, Mutex, MutexGuard,
};

use arc_swap::ArcSwap;
use tracing::{debug, info};

use super::{
    metrics::*, Rejection, StatusEvent, StorageDetail, StorageRecord, StorageStatus,
    StructureGuard, SyncMatrix, Transition,
};
use crate::{config::StoreServerPolicy, Error, Result};

/// Members are allocated in steps of this size on top of the requested growth.
pub const ALLOC_ONCE: usize = 2;

/// Settings every member of a group must agree on.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupSettings {
    pub storage_port: u16,
    pub storage_http_port: u16,
    pub store_path_count: u32,
    pub subdir_count_per_path: u32,
    pub current_trunk_file_id: i64,
}

#[derive(Clone, Debug)]
pub struct Member {
    pub addr: String,
    pub record: Arc<StorageRecord>,
}

/// An immutable snapshot of the members of a group. A new table is published
/// for every structural change, readers keep whatever table they loaded.
#[derive(Clone, Debug, Default)]
pub struct MemberTable {
    capacity: usize,
    all: Vec<Arc<StorageRecord>>,
    sorted: Vec<Member>,
    active: Vec<Member>,
    http_active: Option<Vec<Member>>,
    store_server: Option<Arc<StorageRecord>>,
}

impl MemberTable {
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn count(&self) -> usize {
        self.all.len()
    }

    /// Members in insertion order, indexed by slot.
    pub fn all(&self) -> &[Arc<StorageRecord>] {
        &self.all
    }

    pub fn sorted(&self) -> &[Member] {
        &self.sorted
    }

    pub fn active(&self) -> &[Member] {
        &self.active
    }

    pub fn http_active(&self) -> &[Member] {
        self.http_active.as_deref().unwrap_or(&self.active)
    }

    /// The member designated to take writes, if any member is active.
    pub fn store_server(&self) -> Option<&Arc<StorageRecord>> {
        self.store_server.as_ref()
    }

    pub fn get(&self, addr: &str) -> Option<&Arc<StorageRecord>> {
        search(&self.sorted, addr).ok().map(|i| &self.sorted[i].record)
    }

    pub fn get_active(&self, addr: &str) -> Option<&Arc<StorageRecord>> {
        search(&self.active, addr).ok().map(|i| &self.active[i].record)
    }

    pub fn get_http_active(&self, addr: &str) -> Option<&Arc<StorageRecord>> {
        let view = self.http_active();
        search(view, addr).ok().map(|i| &view[i].record)
    }

    pub fn record_at(&self, slot: usize) -> Option<&Arc<StorageRecord>> {
        self.all.get(slot)
    }

    fn is_active(&self, addr: &str) -> bool {
        search(&self.active, addr).is_ok()
    }

    fn insert_active(&mut self, member: Member) -> bool {
        insert_sorted(&mut self.active, member)
    }

    fn remove_active(&mut self, addr: &str) -> bool {
        let removed = remove_sorted(&mut self.active, addr);
        if let Some(http_active) = self.http_active.as_mut() {
            remove_sorted(http_active, addr);
        }
        removed
    }

    fn rebuild_sorted(&mut self) {
        let mut sorted = self
            .all
            .iter()
            .map(|record| Member {
                addr: record.addr(),
                record: record.clone(),
            })
            .collect::<Vec<_>>();
        sorted.sort_by(|a, b| a.addr.cmp(&b.addr));
        self.sorted = sorted;

        let mut active = self
            .active
            .iter()
            .map(|m| Member {
                addr: m.record.addr(),
                record: m.record.clone(),
            })
            .collect::<Vec<_>>();
        active.sort_by(|a, b| a.addr.cmp(&b.addr));
        self.active = active;
    }

    fn refresh_store_server(&mut self, policy: StoreServerPolicy) {
        self.store_server = find_store_server(&self.active, policy);
    }
}

fn search(view: &[Member], addr: &str) -> std::result::Result<usize, usize> {
    view.binary_search_by(|m| m.addr.as_str().cmp(addr))
}

fn insert_sorted(view: &mut Vec<Member>, member: Member) -> bool {
    match search(view, &member.addr) {
        Ok(_) => false,
        Err(pos) => {
            view.insert(pos, member);
            true
        }
    }
}

fn remove_sorted(view: &mut Vec<Member>, addr: &str) -> bool {
    match search(view, addr) {
        Ok(pos) => {
            view.remove(pos);
            true
        }
        Err(_) => false,
    }
}

fn find_store_server(active: &[Member], policy: StoreServerPolicy) -> Option<Arc<StorageRecord>> {
    let first = active.first()?;
    if policy != StoreServerPolicy::FirstByPriority {
        return Some(first.record.clone());
    }
    let mut best = &first.record;
    let mut best_priority = best.upload_priority();
    for member in &active[1..] {
        let priority = member.record.upload_priority();
        if priority < best_priority {
            best = &member.record;
            best_priority = priority;
        }
    }
    Some(best.clone())
}

/// One replication group.
pub struct GroupDirectory {
    name: String,
    policy: StoreServerPolicy,
    independent_http: bool,

    settings: Mutex<GroupSettings>,
    members: ArcSwap<MemberTable>,
    sync_matrix: Mutex<SyncMatrix>,
    change_count: AtomicU64,

    write_cursor: AtomicUsize,
    read_cursor: AtomicUsize,
}

impl GroupDirectory {
    pub fn new(
        name: &str,
        settings: GroupSettings,
        policy: StoreServerPolicy,
        independent_http: bool,
    ) -> Self {
        let members = MemberTable {
            capacity: ALLOC_ONCE,
            http_active: independent_http.then(Vec::new),
            ..Default::default()
        };
        GroupDirectory {
            name: name.to_owned(),
            policy,
            independent_http,
            settings: Mutex::new(settings),
            members: ArcSwap::from_pointee(members),
            sync_matrix: Mutex::new(SyncMatrix::new(ALLOC_ONCE)),
            change_count: AtomicU64::new(0),
            write_cursor: AtomicUsize::new(0),
            read_cursor: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store_server_policy(&self) -> StoreServerPolicy {
        self.policy
    }

    pub fn settings(&self) -> MutexGuard<'_, GroupSettings> {
        self.settings.lock().unwrap()
    }

    /// Load the current member table. The table stays valid for as long as
    /// the caller holds it, even if the group grows meanwhile.
    pub fn members(&self) -> Arc<MemberTable> {
        self.members.load_full()
    }

    pub fn sync_matrix(&self) -> MutexGuard<'_, SyncMatrix> {
        self.sync_matrix.lock().unwrap()
    }

    pub fn change_count(&self) -> u64 {
        self.change_count.load(Ordering::Acquire)
    }

    pub fn bump_change_count(&self) {
        self.change_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn get(&self, addr: &str) -> Option<Arc<StorageRecord>> {
        self.members.load().get(addr).cloned()
    }

    pub fn get_active(&self, addr: &str) -> Option<Arc<StorageRecord>> {
        self.members.load().get_active(addr).cloned()
    }

    pub fn count(&self) -> usize {
        self.members.load().count()
    }

    pub fn active_count(&self) -> usize {
        self.members.load().active().len()
    }

    pub fn store_server(&self) -> Option<Arc<StorageRecord>> {
        self.members.load().store_server().cloned()
    }

    /// Sum of successful uploads minus successful deletes over all members.
    pub fn file_count(&self) -> i64 {
        self.members
            .load()
            .all()
            .iter()
            .map(|r| {
                let d = r.detail();
                d.stat.success_upload_count - d.stat.success_delete_count
            })
            .sum()
    }

    /// Free space of the group, bounded by the fullest active member.
    pub fn free_mb(&self) -> i64 {
        self.members
            .load()
            .active()
            .iter()
            .map(|m| m.record.detail().free_mb)
            .min()
            .unwrap_or(0)
    }

    pub fn total_mb(&self) -> i64 {
        self.members
            .load()
            .active()
            .iter()
            .map(|m| m.record.detail().total_mb)
            .min()
            .unwrap_or(0)
    }

    /// Next index of the write round-robin over `active_count` members. The
    /// cursor wraps, and a stale cursor left behind by a shrink is clamped.
    pub fn next_write_index(&self, active_count: usize) -> usize {
        next_index(&self.write_cursor, active_count)
    }

    /// Current read cursor, clamped to `active_count`.
    pub fn read_index(&self, active_count: usize) -> usize {
        let index = self.read_cursor.load(Ordering::Acquire);
        if index >= active_count {
            0
        } else {
            index
        }
    }

    pub fn advance_read_cursor(&self, active_count: usize) {
        next_index(&self.read_cursor, active_count);
    }

    /// Make room for `additional` more members.
    pub fn ensure_capacity(&self, _guard: &StructureGuard<'_>, additional: usize) -> Result<()> {
        let current = self.members.load_full();
        if current.count() + additional <= current.capacity {
            return Ok(());
        }
        let capacity = current.capacity + additional + ALLOC_ONCE;
        let mut next = (*current).clone();
        next.all.try_reserve_exact(capacity - next.all.len())?;
        next.sorted.try_reserve_exact(capacity - next.sorted.len())?;
        next.capacity = capacity;
        self.sync_matrix().grow(capacity)?;
        self.members.store(Arc::new(next));
        debug!(
            "group {} grows member capacity from {} to {}",
            self.name, current.capacity, capacity
        );
        Ok(())
    }

    /// Add a storage, or resurrect the record of a deleted or renamed one.
    /// Returns the record and whether a new slot was taken.
    pub fn insert(
        &self,
        guard: &StructureGuard<'_>,
        addr: &str,
        status: StorageStatus,
    ) -> Result<(Arc<StorageRecord>, bool)> {
        if let Some(record) = self.get(addr) {
            let resurrected = {
                let mut detail = record.detail();
                match detail.status.next(StatusEvent::Rejoin) {
                    Transition::Move(next) => {
                        info!(
                            "group {} storage {} rejoins, status {} -> {}",
                            self.name, addr, detail.status, next
                        );
                        detail.clear();
                        detail.status = next;
                        true
                    }
                    _ => false,
                }
            };
            if resurrected {
                self.sync_matrix().clear_member(record.slot());
                self.bump_change_count();
            }
            return Ok((record, false));
        }

        let record = self.push(guard, StorageDetail::new(addr, status))?;
        Ok((record, true))
    }

    /// Add a fully populated record, as done when loading snapshots.
    pub fn insert_detail(
        &self,
        guard: &StructureGuard<'_>,
        detail: StorageDetail,
    ) -> Result<Arc<StorageRecord>> {
        if self.get(&detail.addr).is_some() {
            return Err(Error::AlreadyExists(format!(
                "storage {} of group {}",
                detail.addr, self.name
            )));
        }
        self.push(guard, detail)
    }

    fn push(&self, guard: &StructureGuard<'_>, detail: StorageDetail) -> Result<Arc<StorageRecord>> {
        self.ensure_capacity(guard, 1)?;
        let mut next = (*self.members.load_full()).clone();
        let addr = detail.addr.clone();
        let record = Arc::new(StorageRecord::new(next.all.len(), &self.name, detail));
        next.all.push(record.clone());
        insert_sorted(
            &mut next.sorted,
            Member {
                addr,
                record: record.clone(),
            },
        );
        self.members.store(Arc::new(next));
        self.bump_change_count();
        Ok(record)
    }

    /// Apply `event` to `record`, keeping the active view in line with the
    /// resulting status. Returns the status the record ends up with.
    pub fn apply(
        &self,
        _guard: &StructureGuard<'_>,
        record: &Arc<StorageRecord>,
        event: StatusEvent,
    ) -> Result<StorageStatus> {
        let (addr, from, to) = {
            let mut detail = record.detail();
            let from = detail.status;
            match from.next(event) {
                Transition::Keep => return Ok(from),
                Transition::Reject(rejection) => {
                    return Err(self.rejection(rejection, &detail.addr));
                }
                Transition::Move(to) => {
                    detail.status = to;
                    if event == StatusEvent::Deactivate {
                        detail.up_time = 0;
                    }
                    (detail.addr.clone(), from, to)
                }
            }
        };

        let current = self.members.load_full();
        let want_active = to == StorageStatus::Active;
        if want_active != current.is_active(&addr) {
            let mut next = (*current).clone();
            if want_active {
                next.insert_active(Member {
                    addr: addr.clone(),
                    record: record.clone(),
                });
            } else {
                next.remove_active(&addr);
            }
            next.refresh_store_server(self.policy);
            self.members.store(Arc::new(next));
            ACTIVE_STORAGE_GAUGE
                .with_label_values(&[self.name.as_str()])
                .set(self.active_count() as i64);
        } else if from == to {
            return Ok(to);
        }

        if from != to {
            STATUS_TRANSITION_TOTAL
                .with_label_values(&[to.to_string().as_str()])
                .inc();
            debug!(
                "group {} storage {} status {} -> {}",
                self.name, addr, from, to
            );
        }
        self.bump_change_count();
        Ok(to)
    }

    /// Force a status without consulting the state machine. Used when
    /// replaying persisted or peer provided state.
    pub fn force_status(
        &self,
        _guard: &StructureGuard<'_>,
        record: &Arc<StorageRecord>,
        status: StorageStatus,
    ) {
        let addr = {
            let mut detail = record.detail();
            if detail.status == status {
                return;
            }
            detail.status = status;
            detail.addr.clone()
        };
        let current = self.members.load_full();
        if (status == StorageStatus::Active) != current.is_active(&addr) {
            let mut next = (*current).clone();
            if status == StorageStatus::Active {
                next.insert_active(Member {
                    addr,
                    record: record.clone(),
                });
            } else {
                next.remove_active(&addr);
            }
            next.refresh_store_server(self.policy);
            self.members.store(Arc::new(next));
        }
        self.bump_change_count();
    }

    /// Recompute the store server, for instance after an upload priority changed.
    pub fn refresh_store_server(&self, _guard: &StructureGuard<'_>) {
        let mut next = (*self.members.load_full()).clone();
        next.refresh_store_server(self.policy);
        self.members.store(Arc::new(next));
    }

    pub fn mark_http(&self, _guard: &StructureGuard<'_>, addr: &str, up: bool) -> Result<bool> {
        if !self.independent_http {
            return Ok(false);
        }
        let current = self.members.load_full();
        let member = match search(&current.active, addr) {
            Ok(pos) => current.active[pos].clone(),
            Err(_) if up => {
                return Err(Error::NotFound(format!(
                    "active storage {} of group {}",
                    addr, self.name
                )))
            }
            Err(_) => return Ok(false),
        };
        let mut next = (*current).clone();
        let view = next.http_active.get_or_insert_with(Vec::new);
        let changed = if up {
            insert_sorted(view, member)
        } else {
            remove_sorted(view, addr)
        };
        if changed {
            self.members.store(Arc::new(next));
        }
        Ok(changed)
    }

    /// Delete a storage. The record stays as a tombstone.
    pub fn delete(&self, guard: &StructureGuard<'_>, addr: &str) -> Result<Arc<StorageRecord>> {
        let record = self
            .get(addr)
            .ok_or_else(|| Error::NotFound(format!("storage {} of group {}", addr, self.name)))?;
        self.apply(guard, &record, StatusEvent::Delete)?;
        record.detail().clear();

        let slot = record.slot();
        for other in self.members.load().all() {
            let mut detail = other.detail();
            if detail.sync_src == Some(slot) {
                detail.sync_src = None;
            }
        }
        self.sync_matrix().clear_member(slot);
        Ok(record)
    }

    /// Move the storage at `old_addr` to `new_addr`. The storage keeps its
    /// slot and its state under the new address; a second slot holds the old
    /// address with status `IP_CHANGED`. Returns that second record.
    pub fn change_address(
        &self,
        guard: &StructureGuard<'_>,
        old_addr: &str,
        new_addr: &str,
    ) -> Result<Arc<StorageRecord>> {
        let old = self.get(old_addr).ok_or_else(|| {
            Error::NotFound(format!("storage {} of group {}", old_addr, self.name))
        })?;
        if let Transition::Reject(rejection) = old.status().next(StatusEvent::ChangeAddress) {
            return Err(self.rejection(rejection, old_addr));
        }
        if let Some(existing) = self.get(new_addr) {
            if !existing.status().is_tombstone() {
                return Err(Error::AlreadyExists(format!(
                    "storage {} of group {}",
                    new_addr, self.name
                )));
            }
        }

        let (renamed, _) = self.insert(guard, new_addr, StorageStatus::Init)?;
        {
            let mut old_detail = old.detail();
            let mut renamed_detail = renamed.detail();
            std::mem::swap(&mut old_detail.addr, &mut renamed_detail.addr);
            renamed_detail.status = StorageStatus::IpChanged;
        }

        let mut next = (*self.members.load_full()).clone();
        next.rebuild_sorted();
        next.refresh_store_server(self.policy);
        self.members.store(Arc::new(next));
        self.bump_change_count();
        Ok(renamed)
    }

    /// Records `timestamp` as the last time content of `src` reached `dest`
    /// and recomputes what `dest` exposes to readers.
    pub fn set_sync_timestamp(&self, src: usize, dest: usize, timestamp: i64) {
        self.sync_matrix().set(src, dest, timestamp);
    }

    /// Recompute the last synced timestamp of every member from the matrix.
    pub fn refresh_last_synced(&self) {
        let members = self.members.load_full();
        let count = members.count();
        if count <= 1 {
            return;
        }
        let matrix = self.sync_matrix();
        for (dest, record) in members.all().iter().enumerate() {
            let ts = matrix.last_synced(dest, count, self.policy);
            record.detail().stat.last_synced_timestamp = ts;
        }
    }

    fn rejection(&self, rejection: Rejection, addr: &str) -> Error {
        let what = format!("storage {} of group {}", addr, self.name);
        match rejection {
            Rejection::Busy => Error::Busy(what),
            Rejection::AlreadyDone => Error::AlreadyDone(what),
            Rejection::NotFound => Error::NotFound(what),
        }
    }
}

fn next_index(cursor: &AtomicUsize, count: usize) -> usize {
    let prev = cursor
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
