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

mod changelog;
mod groups;
mod kv;
mod legacy;
mod metrics;
mod status;
mod storages;
mod timestamps;

use std::{
    fs::OpenOptions,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use tracing::{debug, info, warn};

pub use self::{
    changelog::{Changelog, ChangelogEntry},
    status::TrackerStatus,
};
use self::{
    groups::{decode_groups, encode_groups},
    legacy::{decode_legacy_groups, decode_legacy_storages},
    metrics::*,
    storages::{decode_storages, encode_storages},
    timestamps::{decode_sync_timestamps, encode_sync_timestamps},
};
use crate::{
    registry::{ClusterRegistry, StructureGuard},
    Error, Result,
};

/// Column separator of the line oriented files.
pub const FIELD_SEPARATOR: char = ',';

pub const GROUPS_FILE: &str = "storage_groups.dat";
pub const STORAGES_FILE: &str = "storage_servers.dat";
pub const SYNC_TIMESTAMPS_FILE: &str = "sync_timestamps.dat";
pub const CHANGELOG_FILE: &str = "storage_servers_changelog.dat";
pub const LEGACY_GROUPS_FILE: &str = "storage_groups_old.dat";
pub const LEGACY_STORAGES_FILE: &str = "storage_servers_old.dat";
pub const TRACKER_STATUS_FILE: &str = "tracker_status.dat";

/// The system files a tracker hands out to its peers, by protocol index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SysFile {
    Groups,
    Storages,
    SyncTimestamps,
    Changelog,
}

impl SysFile {
    pub const ALL: [SysFile; 4] = [
        SysFile::Groups,
        SysFile::Storages,
        SysFile::SyncTimestamps,
        SysFile::Changelog,
    ];

    pub fn index(self) -> u8 {
        match self {
            SysFile::Groups => 0,
            SysFile::Storages => 1,
            SysFile::SyncTimestamps => 2,
            SysFile::Changelog => 3,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn file_name(self) -> &'static str {
        match self {
            SysFile::Groups => GROUPS_FILE,
            SysFile::Storages => STORAGES_FILE,
            SysFile::SyncTimestamps => SYNC_TIMESTAMPS_FILE,
            SysFile::Changelog => CHANGELOG_FILE,
        }
    }
}

/// The durable side of the tracker. The changelog mutex is the durable write
/// lock: every snapshot write and every changelog append holds it.
pub struct Persistence {
    data_path: PathBuf,
    durable: Mutex<Changelog>,
}

impl Persistence {
    pub fn open<P: AsRef<Path>>(data_path: P) -> Result<Self> {
        let data_path = data_path.as_ref().to_owned();
        std::fs::create_dir_all(&data_path)?;
        let changelog = Changelog::open(data_path.join(CHANGELOG_FILE))?;
        Ok(Persistence {
            data_path,
            durable: Mutex::new(changelog),
        })
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn path_of(&self, file: SysFile) -> PathBuf {
        self.data_path.join(file.file_name())
    }

    pub fn changelog_size(&self) -> u64 {
        self.durable.lock().unwrap().size()
    }

    /// Fill `registry` from the snapshot files, migrating first generation
    /// files on the way.
    pub fn load(&self, registry: &ClusterRegistry, guard: &StructureGuard<'_>) -> Result<()> {
        let changelog_size = self.changelog_size();

        match read_optional(&self.data_path.join(GROUPS_FILE))? {
            Some(content) => decode_groups(&content, registry, guard)?,
            None => {
                if let Some(content) = read_optional(&self.data_path.join(LEGACY_GROUPS_FILE))? {
                    info!("migrate {} to {}", LEGACY_GROUPS_FILE, GROUPS_FILE);
                    decode_legacy_groups(&content, registry, guard)?;
                    self.save_groups(registry)?;
                    std::fs::remove_file(self.data_path.join(LEGACY_GROUPS_FILE))?;
                }
            }
        }

        match read_optional(&self.data_path.join(STORAGES_FILE))? {
            Some(content) => decode_storages(&content, registry, guard, changelog_size)?,
            None => {
                if let Some(content) = read_optional(&self.data_path.join(LEGACY_STORAGES_FILE))?
                {
                    info!("migrate {} to {}", LEGACY_STORAGES_FILE, STORAGES_FILE);
                    decode_legacy_storages(&content, registry, guard, changelog_size)?;
                    self.save_storages(registry)?;
                    std::fs::remove_file(self.data_path.join(LEGACY_STORAGES_FILE))?;
                }
            }
        }

        if let Some(content) = read_optional(&self.data_path.join(SYNC_TIMESTAMPS_FILE))? {
            decode_sync_timestamps(&content, registry);
        }

        info!(
            "load {} groups from {:?}, changelog size {}",
            registry.group_count(),
            self.data_path,
            changelog_size
        );
        Ok(())
    }

    pub fn save_groups(&self, registry: &ClusterRegistry) -> Result<()> {
        let content = encode_groups(registry);
        let _durable = self.durable.lock().unwrap();
        self.write_atomic(GROUPS_FILE, content.as_bytes())
    }

    pub fn save_storages(&self, registry: &ClusterRegistry) -> Result<()> {
        let content = encode_storages(registry);
        let _durable = self.durable.lock().unwrap();
        self.write_atomic(STORAGES_FILE, content.as_bytes())
    }

    pub fn save_sync_timestamps(&self, registry: &ClusterRegistry) -> Result<()> {
        let content = encode_sync_timestamps(registry);
        let _durable = self.durable.lock().unwrap();
        self.write_atomic(SYNC_TIMESTAMPS_FILE, content.as_bytes())
    }

    /// Save groups, storages and sync timestamps.
    pub fn save_all(&self, registry: &ClusterRegistry) -> Result<()> {
        let groups = encode_groups(registry);
        let storages = encode_storages(registry);
        let timestamps = encode_sync_timestamps(registry);
        let _durable = self.durable.lock().unwrap();
        self.write_atomic(GROUPS_FILE, groups.as_bytes())?;
        self.write_atomic(STORAGES_FILE, storages.as_bytes())?;
        self.write_atomic(SYNC_TIMESTAMPS_FILE, timestamps.as_bytes())
    }

    pub fn append_changelog(&self, entry: &ChangelogEntry) -> Result<()> {
        let mut changelog = self.durable.lock().unwrap();
        changelog.append(entry)
    }

    pub fn read_changelog(&self, offset: u64, max_bytes: usize) -> Result<Vec<u8>> {
        self.durable.lock().unwrap().read_from(offset, max_bytes)
    }

    pub fn changelog_entries(&self, offset: u64, max_bytes: usize) -> Result<Vec<ChangelogEntry>> {
        self.durable.lock().unwrap().entries_from(offset, max_bytes)
    }

    /// Move files fetched from a peer into place and reopen the changelog.
    /// Either every file is installed or the call fails before the first
    /// rename.
    pub fn install_sys_files(&self, staged: &[(SysFile, PathBuf)]) -> Result<()> {
        let mut changelog = self.durable.lock().unwrap();
        for (file, path) in staged {
            if !path.exists() {
                return Err(Error::NotFound(format!("staged file {:?}", path)));
            }
            debug!("install {:?} as {}", path, file.file_name());
        }
        for (file, path) in staged {
            std::fs::rename(path, self.path_of(*file))?;
        }
        std::fs::File::open(&self.data_path)?.sync_all()?;
        changelog.reopen()
    }

    pub fn load_tracker_status(&self) -> Result<Option<TrackerStatus>> {
        match read_optional(&self.data_path.join(TRACKER_STATUS_FILE))? {
            Some(content) => Ok(Some(TrackerStatus::decode(&content)?)),
            None => Ok(None),
        }
    }

    pub fn save_tracker_status(&self, status: &TrackerStatus) -> Result<()> {
        let _durable = self.durable.lock().unwrap();
        self.write_atomic(TRACKER_STATUS_FILE, status.encode().as_bytes())
    }

    /// Write `content` to `<file>.tmp`, sync it, and rename it over `file`.
    /// On failure the previous file stays untouched.
    fn write_atomic(&self, file: &str, content: &[u8]) -> Result<()> {
        let _timer = SAVE_DURATION_SECONDS
            .with_label_values(&[file])
            .start_timer();
        let tmp = self.data_path.join(format!("{}.tmp", file));
        let target = self.data_path.join(file);
        if let Err(err) = write_and_rename(&self.data_path, &tmp, &target, content) {
            warn!("save {:?} fail: {}", target, err);
            SAVE_FAIL_TOTAL.inc();
            let _ = std::fs::remove_file(&tmp);
            return Err(err);
        }
        Ok(())
    }
}

fn write_and_rename(dir: &Path, tmp: &Path, target: &Path, content: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(tmp)?;
    file.write_all(content)?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(tmp, target)?;
    std::fs::File::open(dir)?.sync_all()?;
    Ok(())
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}
