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

use std::{cmp::Ordering, fmt, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{persist::SysFile, Result};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct TrackerAddr {
    pub host: String,
    pub port: u16,
}

impl TrackerAddr {
    pub fn new(host: &str, port: u16) -> Self {
        TrackerAddr {
            host: host.to_owned(),
            port,
        }
    }
}

impl fmt::Display for TrackerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// How long a tracker has been up, and how long it was down before that.
/// Both are truncated to the status interval so trackers started around
/// the same time compare equal.
///
/// A status is greater when it is more authoritative: longer running, and
/// on ties, a shorter restart interval.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunningStatus {
    pub running_time: i64,
    pub restart_interval: i64,
}

impl RunningStatus {
    pub fn calc(up_time: i64, last_check_time: i64, now: i64, interval: i64) -> Self {
        let running_time = now - up_time;
        let restart_interval = if last_check_time == 0 {
            0
        } else {
            up_time - last_check_time
        };
        let interval = interval.max(1);
        RunningStatus {
            running_time: (running_time / interval) * interval,
            restart_interval: (restart_interval / interval) * interval,
        }
    }
}

impl Ord for RunningStatus {
    fn cmp(&self, other: &Self) -> Ordering {
        self.running_time
            .cmp(&other.running_time)
            .then_with(|| other.restart_interval.cmp(&self.restart_interval))
    }
}

impl PartialOrd for RunningStatus {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A piece of a system file, read from some offset.
#[derive(Clone, Debug, Default)]
pub struct SysFilePiece {
    /// The full size of the file at the peer.
    pub file_size: u64,
    pub content: Vec<u8>,
}

/// Opens sessions to peer trackers.
pub trait PeerConnector: Send + Sync {
    fn connect(&self, peer: &TrackerAddr, timeout: Duration) -> Result<Box<dyn PeerSession>>;
}

/// A connection to a peer tracker. Dropping it closes the connection.
pub trait PeerSession: Send {
    fn running_status(&mut self) -> Result<RunningStatus>;

    fn sys_files_start(&mut self) -> Result<()>;

    fn fetch_sys_file(&mut self, file: SysFile, offset: u64) -> Result<SysFilePiece>;

    fn sys_files_end(&mut self) -> Result<()>;
}
