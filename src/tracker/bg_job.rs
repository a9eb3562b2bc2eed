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

use tokio::{sync::Notify, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::Tracker;
use crate::registry::unix_timestamp;

#[derive(Debug, Default, Clone, Copy)]
pub struct JobState {
    last_status_save: i64,
    saved_change_count: u64,
}

/// The periodic work of a tracker: liveness sweeps, the status file, and
/// saving registry changes that were not saved by their operation.
pub struct BackgroundJobs {
    stop: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl BackgroundJobs {
    /// Spawn the jobs on the current tokio runtime.
    pub fn spawn(tracker: Tracker) -> Self {
        let stop = Arc::new(Notify::new());
        let period = Duration::from_secs(tracker.config().check_active_interval_sec.max(1));
        let handle = tokio::spawn(run(tracker, stop.clone(), period));
        BackgroundJobs { stop, handle }
    }

    pub async fn stop(self) {
        self.stop.notify_one();
        if let Err(err) = self.handle.await {
            error!("background jobs of tracker: {}", err);
        }
    }
}

async fn run(tracker: Tracker, stop: Arc<Notify>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut state = JobState::default();
    info!("tracker background jobs start, period {:?}", period);
    loop {
        tokio::select! {
            _ = stop.notified() => break,
            _ = ticker.tick() => {}
        }
        tracker.run_jobs(unix_timestamp(), &mut state);
    }
    info!("tracker background jobs stop");
}

impl Tracker {
    /// One round of the background jobs.
    pub fn run_jobs(&self, now: i64, state: &mut JobState) {
        match self.check_alive(now) {
            Ok(expired) if !expired.is_empty() => {
                debug!("{} storages are set offline", expired.len());
            }
            Ok(_) => {}
            Err(err) => warn!("check storages alive: {}", err),
        }

        let interval = self.config().sync_status_interval_sec as i64;
        if now - state.last_status_save >= interval {
            match self.save_status(now) {
                Ok(()) => state.last_status_save = now,
                Err(err) => warn!("save tracker status: {}", err),
            }
        }

        let change_count = self
            .registry()
            .groups()
            .iter()
            .map(|g| g.change_count())
            .sum::<u64>();
        if change_count != state.saved_change_count {
            match self.save_now() {
                Ok(()) => state.saved_change_count = change_count,
                Err(err) => warn!("save registry: {}", err),
            }
        }
    }
}
