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
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use tracing::warn;

use super::metrics::*;
use crate::{registry::StorageStatus, Result};

/// One status affecting event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangelogEntry {
    pub timestamp: i64,
    pub group: String,
    pub addr: String,
    pub status: StorageStatus,
    pub arg: String,
}

impl ChangelogEntry {
    pub fn encode(&self) -> String {
        format!(
            "{} {} {} {} {}\n",
            self.timestamp,
            self.group,
            self.addr,
            self.status.code(),
            self.arg
        )
    }

    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.trim_end_matches('\n').splitn(5, ' ');
        let timestamp = fields.next()?.parse().ok()?;
        let group = fields.next().filter(|s| !s.is_empty())?.to_owned();
        let addr = fields.next().filter(|s| !s.is_empty())?.to_owned();
        let status = StorageStatus::from_code(fields.next()?.parse().ok()?)?;
        let arg = fields.next().unwrap_or_default().trim().to_owned();
        Some(ChangelogEntry {
            timestamp,
            group,
            addr,
            status,
            arg,
        })
    }
}

/// The append only changelog. Its size is the join point of new storages
/// and bounds the replay offsets of existing ones.
pub struct Changelog {
    path: PathBuf,
    file: File,
    size: u64,
}

impl Changelog {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let size = file.metadata()?.len();
        CHANGELOG_SIZE_BYTES.set(size as i64);
        Ok(Changelog { path, file, size })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line. On failure the file is cut back to the last counted
    /// byte, so `size` keeps matching what readers find on disk.
    pub fn append(&mut self, entry: &ChangelogEntry) -> Result<()> {
        let line = entry.encode();
        let written = self
            .file
            .write_all(line.as_bytes())
            .and_then(|_| self.file.sync_data());
        if let Err(err) = written {
            warn!("append changelog {:?} fail: {}", self.path, err);
            self.rollback();
            return Err(err.into());
        }
        self.size += line.len() as u64;
        CHANGELOG_APPEND_TOTAL.inc();
        CHANGELOG_SIZE_BYTES.set(self.size as i64);
        Ok(())
    }

    /// Drop the bytes of a failed append. If the file can not be cut, count
    /// whatever it holds instead.
    fn rollback(&mut self) {
        if let Err(err) = self.file.set_len(self.size) {
            warn!("truncate changelog {:?} to {}: {}", self.path, self.size, err);
            match self.file.metadata() {
                Ok(meta) => self.size = meta.len(),
                Err(err) => warn!("stat changelog {:?}: {}", self.path, err),
            }
            CHANGELOG_SIZE_BYTES.set(self.size as i64);
        }
    }

    /// Reopen the file, after it was replaced underneath.
    pub fn reopen(&mut self) -> Result<()> {
        *self = Changelog::open(&self.path)?;
        Ok(())
    }

    /// Read whole lines starting at byte `offset`, at most `max_bytes` of
    /// them. Returns the raw bytes, which always end at a line boundary.
    pub fn read_from(&self, offset: u64, max_bytes: usize) -> Result<Vec<u8>> {
        if offset >= self.size {
            return Ok(vec![]);
        }
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let limit = max_bytes.min((self.size - offset) as usize);
        let mut buf = vec![0; limit];
        file.read_exact(&mut buf)?;
        if let Some(end) = buf.iter().rposition(|b| *b == b'\n') {
            buf.truncate(end + 1);
        } else {
            buf.clear();
        }
        Ok(buf)
    }

    /// Parse the entries starting at `offset`, skipping malformed lines.
    pub fn entries_from(&self, offset: u64, max_bytes: usize) -> Result<Vec<ChangelogEntry>> {
        let buf = self.read_from(offset, max_bytes)?;
        let content = String::from_utf8_lossy(&buf);
        let mut entries = Vec::new();
        for line in content.lines() {
            match ChangelogEntry::parse(line) {
                Some(entry) => entries.push(entry),
                None => warn!("changelog {:?} line {:?} is malformed, skip", self.path, line),
            }
        }
        Ok(entries)
    }
}
