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

use std::{path::PathBuf, sync::Arc};

use storage_tracker::{peer::TrackerAddr, Config, JoinRequest, Tracker};
use tempdir::TempDir;
use tracing::info;

use super::peer::{FakeConnector, FakePeer};

pub const TRACKER_PORT: u16 = 22122;

#[allow(dead_code)]
pub struct TestContext {
    name: String,
    root_dir: TempDir,
    config: Config,
    connector: FakeConnector,
}

#[allow(dead_code)]
impl TestContext {
    pub fn new(prefix: &str) -> Self {
        let root_dir = TempDir::new(prefix).unwrap();
        let config = Config {
            base_path: root_dir.path().to_owned(),
            port: TRACKER_PORT,
            local_hosts: vec!["10.0.1.1".to_owned()],
            ..Default::default()
        };
        // The remote peer knows nothing until a test gives it system files.
        let connector = FakeConnector::default();
        connector.add_peer(
            TrackerAddr::new("10.0.1.2", TRACKER_PORT),
            FakePeer::default(),
        );
        TestContext {
            name: prefix.to_owned(),
            root_dir,
            config,
            connector,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn mut_config(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn connector(&self) -> &FakeConnector {
        &self.connector
    }

    pub fn data_path(&self) -> PathBuf {
        self.config.data_path()
    }

    pub fn open_tracker(&self) -> Tracker {
        info!("{} open tracker at {:?}", self.name, self.root_dir.path());
        Tracker::open(self.config.clone(), Arc::new(self.connector.clone())).unwrap()
    }

    /// The tracker list a storage of this context reports: this tracker and
    /// one remote peer.
    pub fn trackers(&self) -> Vec<TrackerAddr> {
        vec![
            TrackerAddr::new("10.0.1.1", TRACKER_PORT),
            TrackerAddr::new("10.0.1.2", TRACKER_PORT),
        ]
    }

    pub fn join_request(&self, group: &str, addr: &str) -> JoinRequest {
        JoinRequest {
            group: group.to_owned(),
            addr: addr.to_owned(),
            storage_port: 23000,
            storage_http_port: 8888,
            store_path_count: 1,
            subdir_count_per_path: 256,
            join_time: 1_600_000_000,
            up_time: 1_600_000_000,
            version: "3.06".to_owned(),
            init_flag: true,
            trackers: self.trackers(),
            ..Default::default()
        }
    }
}
