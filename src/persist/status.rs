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

use super::kv::{KvDocument, KvWriter};
use crate::Result;

const SECTION: &str = "Tracker";

/// What the previous run of this tracker left behind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrackerStatus {
    pub up_time: i64,
    pub last_check_time: i64,
}

impl TrackerStatus {
    pub fn encode(&self) -> String {
        let mut w = KvWriter::default();
        w.section(SECTION)
            .item("up_time", self.up_time)
            .item("last_check_time", self.last_check_time)
            .end_section();
        w.finish()
    }

    pub fn decode(content: &str) -> Result<Self> {
        let doc = KvDocument::parse(content)?;
        let section = doc.require_section(SECTION)?;
        Ok(TrackerStatus {
            up_time: section.get_parsed("up_time")?,
            last_check_time: section.get_parsed("last_check_time")?,
        })
    }
}
