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

mod admin;
mod bg_job;
mod heartbeat;
mod join;
mod metrics;
mod monitor;
mod query;

use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use tracing::info;

pub use self::{
    bg_job::{BackgroundJobs, JobState},
    heartbeat::{BriefStatus, StorageReport},
    join::JoinRequest,
    monitor::{ClusterView, GroupView, StorageView},
};
use crate::{
    bootstrap::BootstrapSync,
    config::Config,
    peer::{PeerConnector, RunningStatus, TrackerAddr},
    persist::{Persistence, TrackerStatus},
    registry::{unix_timestamp, ClusterRegistry, StructureGuard, StructureLock},
    Result,
};

/// The tracker. Cloning it is cheap; every clone operates on the same state.
#[derive(Clone)]
pub struct Tracker {
    shared: Arc<TrackerShared>,
}

struct TrackerShared {
    config: Config,
    up_time: i64,
    /// What the previous run left in `tracker_status.dat`.
    last_status: TrackerStatus,

    structure: StructureLock,
    registry: ArcSwap<ClusterRegistry>,
    persist: Persistence,
    bootstrap: BootstrapSync,
    peers: Mutex<Vec<TrackerAddr>>,
}

impl Tracker {
    /// Open the data directory of `config` and load the registry from it.
    pub fn open(config: Config, connector: Arc<dyn PeerConnector>) -> Result<Self> {
        let persist = Persistence::open(config.data_path())?;
        let last_status = persist.load_tracker_status()?.unwrap_or_default();
        let structure = StructureLock::new();
        let registry = new_registry(&config);
        persist.load(&registry, &structure.lock())?;

        let up_time = unix_timestamp();
        info!(
            "tracker opened at {:?}, last check time {}",
            persist.data_path(),
            last_status.last_check_time
        );
        let bootstrap = BootstrapSync::new(&config, connector);
        Ok(Tracker {
            shared: Arc::new(TrackerShared {
                config,
                up_time,
                last_status,
                structure,
                registry: ArcSwap::from_pointee(registry),
                persist,
                bootstrap,
                peers: Mutex::new(vec![]),
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// The live registry. A bootstrap may replace it, so mutators must load it
    /// after taking the structural lock.
    pub fn registry(&self) -> Arc<ClusterRegistry> {
        self.shared.registry.load_full()
    }

    pub fn persistence(&self) -> &Persistence {
        &self.shared.persist
    }

    pub fn up_time(&self) -> i64 {
        self.shared.up_time
    }

    pub fn last_status(&self) -> TrackerStatus {
        self.shared.last_status
    }

    /// The peer trackers learned from the first join.
    pub fn peers(&self) -> Vec<TrackerAddr> {
        self.shared.peers.lock().unwrap().clone()
    }

    pub fn running_status(&self, now: i64) -> RunningStatus {
        RunningStatus::calc(
            self.shared.up_time,
            self.shared.last_status.last_check_time,
            now,
            self.shared.config.sync_status_interval_sec as i64,
        )
    }

    /// Lock the registry structure and return the live registry.
    fn lock_registry(&self) -> (StructureGuard<'_>, Arc<ClusterRegistry>) {
        let guard = self.shared.structure.lock();
        let registry = self.registry();
        (guard, registry)
    }

    /// Save groups, storages and sync timestamps.
    pub fn save_now(&self) -> Result<()> {
        let (_guard, registry) = self.lock_registry();
        self.shared.persist.save_all(&registry)
    }

    pub fn save_status(&self, now: i64) -> Result<()> {
        self.shared.persist.save_tracker_status(&TrackerStatus {
            up_time: self.shared.up_time,
            last_check_time: now,
        })
    }

    /// Final save before the process exits.
    pub fn shutdown(&self) -> Result<()> {
        self.save_now()?;
        self.save_status(unix_timestamp())?;
        info!("tracker is shutdown");
        Ok(())
    }
}

fn new_registry(config: &Config) -> ClusterRegistry {
    ClusterRegistry::new(config.placement.clone(), config.independent_http_check())
}
