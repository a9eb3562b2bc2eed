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

use tracing::debug;

use super::kv::{KvDocument, KvWriter};
use crate::{
    registry::{ClusterRegistry, GroupSettings, StructureGuard},
    Error, Result,
};

const GLOBAL_SECTION: &str = "Global";

pub fn encode_groups(registry: &ClusterRegistry) -> String {
    let groups = registry.groups();
    let mut w = KvWriter::default();
    w.comment("global section")
        .section(GLOBAL_SECTION)
        .item("group_count", groups.len())
        .end_section();
    for (i, group) in groups.iter().enumerate() {
        let settings = group.settings().clone();
        w.comment(format!("group: {}", group.name()))
            .section(format!("Group{:03}", i + 1))
            .item("group_name", group.name())
            .item("storage_port", settings.storage_port)
            .item("storage_http_port", settings.storage_http_port)
            .item("store_path_count", settings.store_path_count)
            .item("subdir_count_per_path", settings.subdir_count_per_path)
            .item("current_trunk_file_id", settings.current_trunk_file_id)
            .end_section();
    }
    w.finish()
}

pub fn decode_groups(
    content: &str,
    registry: &ClusterRegistry,
    guard: &StructureGuard<'_>,
) -> Result<()> {
    let doc = KvDocument::parse(content)?;
    let group_count: usize = doc.require_section(GLOBAL_SECTION)?.require("group_count")?;
    for i in 1..=group_count {
        let section = doc.require_section(&format!("Group{:03}", i))?;
        let name = section.get_str("group_name");
        if name.is_empty() {
            return Err(Error::NotFound(format!(
                "item \"group_name\" in section {}",
                section.name()
            )));
        }
        let settings = GroupSettings {
            storage_port: section.get_parsed("storage_port")?,
            storage_http_port: section.get_parsed("storage_http_port")?,
            store_path_count: section.get_parsed("store_path_count")?,
            subdir_count_per_path: section.get_parsed("subdir_count_per_path")?,
            current_trunk_file_id: section.get_parsed("current_trunk_file_id")?,
        };
        let (_, created) = registry.insert_group(guard, &name, settings)?;
        if !created {
            return Err(Error::AlreadyExists(format!("group {}", name)));
        }
        debug!("load group {}", name);
    }
    Ok(())
}
