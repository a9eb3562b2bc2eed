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
    collections::HashMap,
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use storage_tracker::{
    peer::{PeerConnector, PeerSession, RunningStatus, SysFilePiece, TrackerAddr},
    persist::SysFile,
    Error, Result,
};

const PIECE_SIZE: usize = 64;

#[derive(Clone, Default)]
pub struct FakePeer {
    pub status: Option<RunningStatus>,
    pub files: HashMap<u8, Vec<u8>>,
}

#[allow(dead_code)]
impl FakePeer {
    pub fn new(running_time: i64, restart_interval: i64) -> Self {
        FakePeer {
            status: Some(RunningStatus {
                running_time,
                restart_interval,
            }),
            files: HashMap::default(),
        }
    }

    /// Serve the system files found in `data_path`.
    pub fn with_files_of(mut self, data_path: &Path) -> Self {
        for file in SysFile::ALL {
            let content = std::fs::read(data_path.join(file.file_name())).unwrap_or_default();
            self.files.insert(file.index(), content);
        }
        self
    }
}

/// An in memory peer network. Unknown peers refuse connections.
#[derive(Clone, Default)]
pub struct FakeConnector {
    peers: Arc<Mutex<HashMap<TrackerAddr, FakePeer>>>,
    fetches: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl FakeConnector {
    pub fn add_peer(&self, addr: TrackerAddr, peer: FakePeer) {
        self.peers.lock().unwrap().insert(addr, peer);
    }

    /// How many times a peer served a full set of system files.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Acquire)
    }
}

impl PeerConnector for FakeConnector {
    fn connect(&self, peer: &TrackerAddr, _timeout: Duration) -> Result<Box<dyn PeerSession>> {
        let fake = self
            .peers
            .lock()
            .unwrap()
            .get(peer)
            .cloned()
            .ok_or_else(|| Error::Io(std::io::ErrorKind::ConnectionRefused.into()))?;
        Ok(Box::new(FakeSession {
            peer: fake,
            fetches: self.fetches.clone(),
        }))
    }
}

struct FakeSession {
    peer: FakePeer,
    fetches: Arc<AtomicUsize>,
}

impl PeerSession for FakeSession {
    fn running_status(&mut self) -> Result<RunningStatus> {
        self.peer
            .status
            .ok_or_else(|| Error::NotFound("running status".to_owned()))
    }

    fn sys_files_start(&mut self) -> Result<()> {
        Ok(())
    }

    fn fetch_sys_file(&mut self, file: SysFile, offset: u64) -> Result<SysFilePiece> {
        let content = self
            .peer
            .files
            .get(&file.index())
            .ok_or_else(|| Error::NotFound(file.file_name().to_owned()))?;
        let start = (offset as usize).min(content.len());
        let end = (start + PIECE_SIZE).min(content.len());
        Ok(SysFilePiece {
            file_size: content.len() as u64,
            content: content[start..end].to_vec(),
        })
    }

    fn sys_files_end(&mut self) -> Result<()> {
        self.fetches.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}
