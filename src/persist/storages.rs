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

use super::kv::{KvDocument, KvSection, KvWriter};
use crate::{
    registry::{ClusterRegistry, StorageDetail, StorageStatus, StructureGuard},
    Error, Result,
};

const GLOBAL_SECTION: &str = "Global";

/// A sync source which can only be resolved once every storage is loaded.
pub struct PendingSyncSource {
    pub group: String,
    pub addr: String,
    pub src_addr: String,
}

pub fn encode_storages(registry: &ClusterRegistry) -> String {
    let mut sections = Vec::new();
    for group in registry.groups().iter() {
        let members = group.members();
        for record in members.all() {
            let detail = record.snapshot();
            let sync_src = detail
                .sync_src
                .and_then(|slot| members.record_at(slot))
                .map(|r| r.addr())
                .unwrap_or_default();
            sections.push((group.name().to_owned(), detail, sync_src));
        }
    }

    let mut w = KvWriter::default();
    w.comment("global section")
        .section(GLOBAL_SECTION)
        .item("storage_count", sections.len())
        .end_section();
    for (i, (group_name, detail, sync_src)) in sections.iter().enumerate() {
        w.comment(format!("storage {}:{}", group_name, detail.addr))
            .section(format!("Storage{:03}", i + 1))
            .item("group_name", group_name)
            .item("ip_addr", &detail.addr)
            .item("status", detail.status.code())
            .item("domain_name", &detail.domain_name)
            .item("version", &detail.version)
            .item("sync_src_server", sync_src)
            .item("sync_until_timestamp", detail.sync_until_timestamp)
            .item("join_time", detail.join_time)
            .item("total_mb", detail.total_mb)
            .item("free_mb", detail.free_mb)
            .item("path_total_mb", join_list(&detail.path_total_mbs))
            .item("path_free_mb", join_list(&detail.path_free_mbs))
            .item("store_path_count", detail.store_path_count)
            .item("subdir_count_per_path", detail.subdir_count_per_path)
            .item("upload_priority", detail.upload_priority)
            .item("storage_port", detail.storage_port)
            .item("storage_http_port", detail.storage_http_port);
        for (key, value) in detail.stat.fields() {
            w.item(key, value);
        }
        w.item("changelog_offset", detail.changelog_offset)
            .end_section();
    }
    w.finish()
}

pub fn decode_storages(
    content: &str,
    registry: &ClusterRegistry,
    guard: &StructureGuard<'_>,
    changelog_size: u64,
) -> Result<()> {
    let doc = KvDocument::parse(content)?;
    let storage_count: usize = doc
        .require_section(GLOBAL_SECTION)?
        .require("storage_count")?;
    let mut pending = Vec::new();
    for i in 1..=storage_count {
        let section = doc.require_section(&format!("Storage{:03}", i))?;
        let group_name = section.get_str("group_name");
        let addr = section.get_str("ip_addr");
        if group_name.is_empty() || addr.is_empty() {
            return Err(Error::NotFound(format!(
                "item \"group_name\" or \"ip_addr\" in section {}",
                section.name()
            )));
        }
        let group = registry.group(&group_name)?;

        let mut detail = decode_detail(section, &addr)?;
        restore_detail(&mut detail, changelog_size);
        group.insert_detail(guard, detail)?;

        let src_addr = section.get_str("sync_src_server");
        if !src_addr.is_empty() {
            pending.push(PendingSyncSource {
                group: group_name,
                addr,
                src_addr,
            });
        }
    }
    resolve_sync_sources(registry, pending)
}

fn decode_detail(section: &KvSection, addr: &str) -> Result<StorageDetail> {
    let code: i64 = section.get_parsed("status")?;
    let status = StorageStatus::from_code(code).ok_or_else(|| {
        Error::InvalidData(format!("storage {} status {}", addr, code))
    })?;
    let mut detail = StorageDetail::new(addr, status);
    detail.domain_name = section.get_str("domain_name");
    detail.version = section.get_str("version");
    detail.sync_until_timestamp = section.get_parsed("sync_until_timestamp")?;
    detail.join_time = section.get_parsed("join_time")?;
    detail.total_mb = section.get_parsed("total_mb")?;
    detail.free_mb = section.get_parsed("free_mb")?;
    detail.path_total_mbs = parse_list(section, "path_total_mb")?;
    detail.path_free_mbs = parse_list(section, "path_free_mb")?;
    detail.resize_paths(section.get_parsed("store_path_count")?);
    detail.subdir_count_per_path = section.get_parsed("subdir_count_per_path")?;
    detail.upload_priority = section.get_parsed("upload_priority")?;
    detail.storage_port = section.get_parsed("storage_port")?;
    detail.storage_http_port = section.get_parsed("storage_http_port")?;
    detail.changelog_offset = section.get_parsed("changelog_offset")?;
    for (key, value) in section.items() {
        if let Some(field) = detail.stat.field_mut(key) {
            *field = value.parse().map_err(|_| {
                Error::InvalidData(format!("storage {} {} {:?}", addr, key, value))
            })?;
        }
    }
    Ok(detail)
}

/// Bring a loaded storage back to what a freshly started tracker may
/// assume: runtime statuses become offline and the replay offset must
/// lie within the changelog.
pub fn restore_detail(detail: &mut StorageDetail, changelog_size: u64) {
    if !detail.status.is_durable() {
        detail.status = StorageStatus::Offline;
    }
    if detail.changelog_offset > changelog_size {
        detail.changelog_offset = changelog_size;
    }
}

pub fn resolve_sync_sources(
    registry: &ClusterRegistry,
    pending: Vec<PendingSyncSource>,
) -> Result<()> {
    for p in pending {
        let group = registry.group(&p.group)?;
        let src = group.get(&p.src_addr).ok_or_else(|| {
            Error::NotFound(format!(
                "sync src server {} of storage {} in group {}",
                p.src_addr, p.addr, p.group
            ))
        })?;
        let record = registry.storage(&p.group, &p.addr)?;
        record.detail().sync_src = Some(src.slot());
    }
    Ok(())
}

fn join_list(values: &[i64]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn parse_list(section: &KvSection, key: &str) -> Result<Vec<i64>> {
    let value = section.get(key).unwrap_or_default();
    if value.is_empty() {
        return Ok(vec![]);
    }
    value
        .split(',')
        .map(|v| {
            v.trim().parse().map_err(|_| {
                Error::InvalidData(format!("section {} key {} value {:?}", section.name(), key, value))
            })
        })
        .collect()
}
