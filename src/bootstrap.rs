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
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use tracing::{debug, info, warn};

use crate::{
    config::Config,
    peer::{PeerConnector, PeerSession, RunningStatus, TrackerAddr},
    persist::SysFile,
    Error, Result,
};

/// Sub directory of `data/` that receives the system files of a peer.
pub const STAGING_DIR: &str = "sync";

const LOOPBACK_HOSTS: [&str; 2] = ["127.0.0.1", "localhost"];

#[derive(Debug, Clone, Copy)]
pub struct BootstrapState {
    /// The first join has not yet checked how long this tracker was stopped.
    pub need_check: bool,
    /// A fetch from a peer completed, or was found unnecessary.
    pub done: bool,
}

impl Default for BootstrapState {
    fn default() -> Self {
        BootstrapState {
            need_check: true,
            done: false,
        }
    }
}

/// Pulls the system files from the most authoritative peer tracker.
pub struct BootstrapSync {
    connector: Arc<dyn PeerConnector>,
    local_port: u16,
    local_hosts: Vec<String>,
    timeout: Duration,
    state: Mutex<BootstrapState>,
}

impl BootstrapSync {
    pub fn new(config: &Config, connector: Arc<dyn PeerConnector>) -> Self {
        BootstrapSync {
            connector,
            local_port: config.port,
            local_hosts: config.local_hosts.clone(),
            timeout: config.network_timeout(),
            state: Mutex::new(BootstrapState::default()),
        }
    }

    /// Holding the returned guard serializes bootstraps; only the first
    /// caller finds work to do.
    pub fn state(&self) -> MutexGuard<'_, BootstrapState> {
        self.state.lock().unwrap()
    }

    pub fn is_local(&self, peer: &TrackerAddr) -> bool {
        peer.port == self.local_port
            && (LOOPBACK_HOSTS.contains(&peer.host.as_str())
                || self.local_hosts.iter().any(|h| h == &peer.host))
    }

    /// Ask every remote peer for its running status and return the most
    /// authoritative one. `Ok(None)` when there is no peer to ask, or no peer
    /// knows anything.
    pub fn best_peer(&self, peers: &[TrackerAddr]) -> Result<Option<(TrackerAddr, RunningStatus)>> {
        let mut statuses = Vec::with_capacity(peers.len());
        let mut last_err = None;
        for peer in peers.iter().filter(|p| !self.is_local(p)) {
            let status = self
                .connector
                .connect(peer, self.timeout)
                .and_then(|mut session| session.running_status());
            match status {
                Ok(status) => {
                    debug!(
                        "peer tracker {} running time {}, restart interval {}",
                        peer, status.running_time, status.restart_interval
                    );
                    statuses.push((peer.clone(), status));
                }
                Err(Error::NotFound(_)) => {}
                Err(err) => {
                    warn!("get running status of peer tracker {}: {}", peer, err);
                    last_err = Some(err);
                }
            }
        }

        if statuses.is_empty() {
            return match last_err {
                Some(err) => Err(err),
                None => Ok(None),
            };
        }
        Ok(rank_peers(statuses))
    }

    /// Fetch the system files of the best peer into `staging`, unless `local`
    /// is at least as authoritative. Returns the staged files.
    pub fn fetch_if_behind(
        &self,
        peers: &[TrackerAddr],
        local: Option<RunningStatus>,
        staging: &Path,
    ) -> Result<Option<Vec<(SysFile, PathBuf)>>> {
        let (peer, status) = match self.best_peer(peers)? {
            Some(best) => best,
            None => {
                info!("no peer tracker to sync system files from");
                return Ok(None);
            }
        };
        if let Some(local) = local {
            if local >= status {
                info!(
                    "local running status {:?} is not behind peer tracker {} {:?}, skip sync",
                    local, peer, status
                );
                return Ok(None);
            }
        }

        info!("sync system files from peer tracker {}", peer);
        let staged = self.fetch_sys_files(&peer, staging)?;
        Ok(Some(staged))
    }

    /// Download all system files of `peer` into `staging`.
    pub fn fetch_sys_files(
        &self,
        peer: &TrackerAddr,
        staging: &Path,
    ) -> Result<Vec<(SysFile, PathBuf)>> {
        std::fs::create_dir_all(staging)?;
        let mut session = self.connector.connect(peer, self.timeout)?;
        session.sys_files_start()?;
        let mut staged = Vec::with_capacity(SysFile::ALL.len());
        let mut result = Ok(());
        for file in SysFile::ALL {
            let path = staging.join(file.file_name());
            if let Err(err) = fetch_one(session.as_mut(), file, &path) {
                warn!("fetch {} from peer tracker {}: {}", file.file_name(), peer, err);
                result = Err(err);
                break;
            }
            staged.push((file, path));
        }
        let end = session.sys_files_end();
        result?;
        end?;
        Ok(staged)
    }
}

/// The most authoritative peer. On ties the later one in `statuses` wins.
pub fn rank_peers(statuses: Vec<(TrackerAddr, RunningStatus)>) -> Option<(TrackerAddr, RunningStatus)> {
    statuses.into_iter().max_by(|a, b| a.1.cmp(&b.1))
}

fn fetch_one(session: &mut dyn PeerSession, file: SysFile, path: &Path) -> Result<()> {
    let mut out = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    let mut hasher = crc32fast::Hasher::new();
    let mut offset = 0;
    loop {
        let piece = session.fetch_sys_file(file, offset)?;
        out.write_all(&piece.content)?;
        hasher.update(&piece.content);
        offset += piece.content.len() as u64;
        if offset >= piece.file_size {
            break;
        }
        if piece.content.is_empty() {
            return Err(Error::InvalidData(format!(
                "{} piece at offset {} of {} is empty",
                file.file_name(),
                offset,
                piece.file_size
            )));
        }
    }
    out.sync_all()?;
    info!(
        "fetched {} bytes of {}, crc32 {:08x}",
        offset,
        file.file_name(),
        hasher.finalize()
    );
    Ok(())
}
