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

use std::{sync::Arc, time::Duration};

use tracing::info;

use super::{metrics::*, ClusterRegistry, StatusEvent, StorageRecord, StructureGuard};
use crate::Result;

impl ClusterRegistry {
    /// Force offline every active storage whose last heartbeat is older than
    /// `threshold`. Returns the storages taken offline.
    pub fn check_alive(
        &self,
        guard: &StructureGuard<'_>,
        now: i64,
        threshold: Duration,
    ) -> Result<Vec<Arc<StorageRecord>>> {
        let _timer = LIVENESS_SWEEP_DURATION_SECONDS.start_timer();
        let threshold = threshold.as_secs() as i64;
        let mut expired = Vec::new();
        for group in self.groups().iter() {
            let members = group.members();
            for member in members.active() {
                let last_heart_beat_time = member.record.last_heart_beat_time();
                if now - last_heart_beat_time <= threshold {
                    continue;
                }
                group.apply(guard, &member.record, StatusEvent::Deactivate)?;
                info!(
                    "storage {} of group {} idle for {} seconds, set offline",
                    member.addr,
                    group.name(),
                    now - last_heart_beat_time
                );
                LIVENESS_OFFLINE_TOTAL.inc();
                expired.push(member.record.clone());
            }
        }
        Ok(expired)
    }
}

pub fn unix_timestamp() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let start = SystemTime::now();
    let since_the_epoch = start.duration_since(UNIX_EPOCH).unwrap_or_default();
    since_the_epoch.as_secs() as i64
}
