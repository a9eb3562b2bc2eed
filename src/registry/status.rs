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

use std::fmt;

use serde::{Deserialize, Serialize};

/// The lifecycle status of a storage server. The numeric codes are part of the
/// on-disk formats and of the peer status reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageStatus {
    Init,
    WaitSync,
    Syncing,
    IpChanged,
    Deleted,
    Offline,
    Online,
    Active,
    Recovery,
    None,
}

/// Things that happen to a storage record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusEvent {
    /// A join message arrived for an address that already has a record.
    Rejoin,
    /// The storage finished joining or sent a heartbeat.
    Reconnect,
    /// A health check found the storage usable.
    Activate,
    /// The storage went away, explicitly or by heartbeat timeout.
    Deactivate,
    Delete,
    /// The storage is the old side of an address change.
    ChangeAddress,
    /// A peer storage reported this status in its brief list.
    Report(StorageStatus),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    Busy,
    AlreadyDone,
    NotFound,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    Move(StorageStatus),
    Keep,
    Reject(Rejection),
}

impl StorageStatus {
    pub fn code(self) -> i32 {
        match self {
            StorageStatus::Init => 0,
            StorageStatus::WaitSync => 1,
            StorageStatus::Syncing => 2,
            StorageStatus::IpChanged => 3,
            StorageStatus::Deleted => 4,
            StorageStatus::Offline => 5,
            StorageStatus::Online => 6,
            StorageStatus::Active => 7,
            StorageStatus::Recovery => 9,
            StorageStatus::None => 99,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        let status = match code {
            0 => StorageStatus::Init,
            1 => StorageStatus::WaitSync,
            2 => StorageStatus::Syncing,
            3 => StorageStatus::IpChanged,
            4 => StorageStatus::Deleted,
            5 => StorageStatus::Offline,
            6 => StorageStatus::Online,
            7 => StorageStatus::Active,
            9 => StorageStatus::Recovery,
            99 => StorageStatus::None,
            _ => return None,
        };
        Some(status)
    }

    /// Serving storages accept client traffic and can not be deleted or renamed.
    pub fn is_serving(self) -> bool {
        matches!(
            self,
            StorageStatus::Online | StorageStatus::Active | StorageStatus::Recovery
        )
    }

    pub fn is_tombstone(self) -> bool {
        matches!(self, StorageStatus::Deleted | StorageStatus::IpChanged)
    }

    /// Whether this status survives a reload as is. Anything else was a runtime
    /// status and comes back as offline.
    pub fn is_durable(self) -> bool {
        matches!(
            self,
            StorageStatus::Init
                | StorageStatus::WaitSync
                | StorageStatus::Syncing
                | StorageStatus::Deleted
                | StorageStatus::IpChanged
        )
    }

    pub fn next(self, event: StatusEvent) -> Transition {
        use StorageStatus::*;
        match event {
            StatusEvent::Rejoin => match self {
                Deleted | IpChanged => Transition::Move(Init),
                _ => Transition::Keep,
            },
            StatusEvent::Reconnect => match self {
                Offline | Recovery => Transition::Move(Online),
                _ => Transition::Keep,
            },
            StatusEvent::Activate => match self {
                Online | Offline | Recovery | Active | None => Transition::Move(Active),
                Init | WaitSync | Syncing | IpChanged | Deleted => Transition::Keep,
            },
            StatusEvent::Deactivate => match self {
                Online | Active | Recovery => Transition::Move(Offline),
                _ => Transition::Keep,
            },
            StatusEvent::Delete => match self {
                Online | Active | Recovery => Transition::Reject(Rejection::Busy),
                Deleted => Transition::Reject(Rejection::AlreadyDone),
                IpChanged => Transition::Reject(Rejection::NotFound),
                _ => Transition::Move(Deleted),
            },
            StatusEvent::ChangeAddress => match self {
                Online | Active | Recovery => Transition::Reject(Rejection::Busy),
                IpChanged => Transition::Reject(Rejection::AlreadyDone),
                Deleted => Transition::Reject(Rejection::NotFound),
                _ => Transition::Keep,
            },
            StatusEvent::Report(reported) => {
                if matches!(reported, None | Active | Online) {
                    return Transition::Keep;
                }
                if reported == self || self.is_serving() {
                    return Transition::Keep;
                }
                if reported.is_tombstone() || reported.code() > self.code() {
                    Transition::Move(reported)
                } else {
                    Transition::Keep
                }
            }
        }
    }
}

impl Default for StorageStatus {
    fn default() -> Self {
        StorageStatus::Init
    }
}

impl fmt::Display for StorageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StorageStatus::Init => "INIT",
            StorageStatus::WaitSync => "WAIT_SYNC",
            StorageStatus::Syncing => "SYNCING",
            StorageStatus::IpChanged => "IP_CHANGED",
            StorageStatus::Deleted => "DELETED",
            StorageStatus::Offline => "OFFLINE",
            StorageStatus::Online => "ONLINE",
            StorageStatus::Active => "ACTIVE",
            StorageStatus::Recovery => "RECOVERY",
            StorageStatus::None => "NONE",
        };
        f.write_str(name)
    }
}
