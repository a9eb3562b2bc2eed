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

use std::sync::Arc;

use super::{metrics::*, Tracker};
use crate::{
    persist::ChangelogEntry,
    registry::{ReadCommand, StorageRecord, WriteTarget},
    Result,
};

impl Tracker {
    /// Where a new file goes. Without `group` the configured lookup picks one.
    pub fn select_write_target(&self, group: Option<&str>) -> Result<WriteTarget> {
        SELECT_TOTAL.with_label_values(&["write"]).inc();
        self.registry().select_write_target(group)
    }

    pub fn select_read_targets(
        &self,
        group: &str,
        filename: &str,
        command: ReadCommand,
        now: i64,
    ) -> Result<Vec<Arc<StorageRecord>>> {
        let kind = match command {
            ReadCommand::FetchOne => "fetch_one",
            ReadCommand::FetchAll => "fetch_all",
            ReadCommand::Update => "update",
        };
        SELECT_TOTAL.with_label_values(&[kind]).inc();
        self.registry()
            .select_read_targets(group, filename, command, now)
    }

    /// Raw changelog bytes from `offset`, cut at a line boundary.
    pub fn read_changelog(&self, offset: u64, max_bytes: usize) -> Result<Vec<u8>> {
        self.shared.persist.read_changelog(offset, max_bytes)
    }

    /// The changelog entries a storage has not replayed yet.
    pub fn pending_changes(&self, group: &str, addr: &str, max_bytes: usize) -> Result<Vec<ChangelogEntry>> {
        let offset = self.registry().storage(group, addr)?.detail().changelog_offset;
        self.shared.persist.changelog_entries(offset, max_bytes)
    }
}
