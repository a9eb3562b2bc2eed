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

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::Result;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    /// The base dir of the tracker, snapshot files live in `<base_path>/data`.
    pub base_path: PathBuf,

    /// The port this tracker serves on, used to recognize itself in the peer list.
    pub port: u16,

    /// Host names and addresses which refer to this machine.
    #[serde(default)]
    pub local_hosts: Vec<String>,

    pub network_timeout_sec: u64,

    /// Heartbeat age after which an active storage is forced offline.
    pub check_active_interval_sec: u64,

    /// Granularity of the tracker running status, in seconds.
    pub sync_status_interval_sec: u64,

    #[serde(default)]
    pub placement: PlacementConfig,

    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreLookup {
    #[default]
    RoundRobin,
    SpecGroup,
    LoadBalance,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreServerPolicy {
    #[default]
    RoundRobin,
    FirstByIp,
    FirstByPriority,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorePathPolicy {
    #[default]
    RoundRobin,
    LoadBalance,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadServerPolicy {
    #[default]
    RoundRobin,
    SourceFirst,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct PlacementConfig {
    pub store_lookup: StoreLookup,

    /// The pinned group when `store_lookup` is `spec_group`.
    pub store_group: String,

    pub store_server: StoreServerPolicy,
    pub store_path: StorePathPolicy,
    pub download_server: DownloadServerPolicy,

    pub storage_sync_file_max_delay_sec: i64,
    pub storage_sync_file_max_time_sec: i64,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,

    /// Zero means the http-active view mirrors the active view.
    pub check_interval_sec: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            base_path: PathBuf::from("/tmp/storage-tracker"),
            port: 22122,
            local_hosts: vec![],
            network_timeout_sec: 30,
            check_active_interval_sec: 120,
            sync_status_interval_sec: 300,
            placement: PlacementConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl Default for PlacementConfig {
    fn default() -> Self {
        PlacementConfig {
            store_lookup: StoreLookup::RoundRobin,
            store_group: String::default(),
            store_server: StoreServerPolicy::RoundRobin,
            store_path: StorePathPolicy::RoundRobin,
            download_server: DownloadServerPolicy::RoundRobin,
            storage_sync_file_max_delay_sec: 86400,
            storage_sync_file_max_time_sec: 300,
        }
    }
}

impl Config {
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn data_path(&self) -> PathBuf {
        self.base_path.join("data")
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_sec)
    }

    pub fn check_active_interval(&self) -> Duration {
        Duration::from_secs(self.check_active_interval_sec)
    }

    /// Whether the http-active view is maintained independently of the active view.
    pub fn independent_http_check(&self) -> bool {
        self.http.enabled && self.http.check_interval_sec > 0
    }
}
