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

//! Readers of the first generation snapshot files: one storage or group per
//! line, a fixed number of separated columns.

use std::str::FromStr;

use super::{
    storages::{resolve_sync_sources, restore_detail, PendingSyncSource},
    FIELD_SEPARATOR,
};
use crate::{
    registry::{ClusterRegistry, GroupSettings, StorageDetail, StorageStatus, StructureGuard},
    Error, Result,
};

const GROUP_FIELDS: usize = 4;
const STORAGE_FIELDS: usize = 22;

/// Counters of the first generation storage file, in column order from 5.
const STAT_COLUMNS: [&str; 10] = [
    "total_upload_count",
    "success_upload_count",
    "total_set_meta_count",
    "success_set_meta_count",
    "total_delete_count",
    "success_delete_count",
    "total_download_count",
    "success_download_count",
    "total_get_meta_count",
    "success_get_meta_count",
];

fn split(line: &str) -> Vec<&str> {
    line.split(FIELD_SEPARATOR).map(str::trim).collect()
}

fn column<T: FromStr>(fields: &[&str], index: usize, lineno: usize) -> Result<T> {
    fields[index].parse().map_err(|_| {
        Error::InvalidData(format!(
            "legacy line {} column {} value {:?}",
            lineno, index, fields[index]
        ))
    })
}

pub fn decode_legacy_groups(
    content: &str,
    registry: &ClusterRegistry,
    guard: &StructureGuard<'_>,
) -> Result<()> {
    for (i, line) in content.lines().enumerate() {
        let lineno = i + 1;
        if line.trim().is_empty() {
            continue;
        }
        let fields = split(line);
        if fields.len() != GROUP_FIELDS && fields.len() != GROUP_FIELDS - 2 {
            return Err(Error::InvalidData(format!(
                "legacy groups line {} has {} columns, expect {} or {}",
                lineno,
                fields.len(),
                GROUP_FIELDS,
                GROUP_FIELDS - 2
            )));
        }
        let mut settings = GroupSettings {
            storage_port: column(&fields, 1, lineno)?,
            ..Default::default()
        };
        if fields.len() == GROUP_FIELDS {
            settings.store_path_count = column(&fields, 2, lineno)?;
            settings.subdir_count_per_path = column(&fields, 3, lineno)?;
        }
        let (_, created) = registry.insert_group(guard, fields[0], settings)?;
        if !created {
            return Err(Error::AlreadyExists(format!("group {}", fields[0])));
        }
    }
    Ok(())
}

pub fn decode_legacy_storages(
    content: &str,
    registry: &ClusterRegistry,
    guard: &StructureGuard<'_>,
    changelog_size: u64,
) -> Result<()> {
    let mut pending = Vec::new();
    for (i, line) in content.lines().enumerate() {
        let lineno = i + 1;
        if line.trim().is_empty() {
            continue;
        }
        let fields = split(line);
        let cols = fields.len();
        if ![
            STORAGE_FIELDS,
            STORAGE_FIELDS - 2,
            STORAGE_FIELDS - 4,
            STORAGE_FIELDS - 5,
        ]
        .contains(&cols)
        {
            return Err(Error::InvalidData(format!(
                "legacy storages line {} has {} columns",
                lineno, cols
            )));
        }

        let group = registry.group(fields[0])?;
        let code: i64 = column(&fields, 2, lineno)?;
        let status = StorageStatus::from_code(code).unwrap_or(StorageStatus::Offline);
        let mut detail = StorageDetail::new(fields[1], status);
        detail.sync_until_timestamp = column(&fields, 4, lineno)?;
        for (offset, key) in STAT_COLUMNS.iter().enumerate() {
            if let Some(field) = detail.stat.field_mut(key) {
                *field = column(&fields, 5 + offset, lineno)?;
            }
        }
        detail.stat.last_source_update = column(&fields, 15, lineno)?;
        detail.stat.last_sync_update = column(&fields, 16, lineno)?;
        if cols > STORAGE_FIELDS - 5 {
            let offset: i64 = column(&fields, 17, lineno)?;
            detail.changelog_offset = offset.max(0) as u64;
        }
        if cols > STORAGE_FIELDS - 4 {
            detail.storage_port = column(&fields, 18, lineno)?;
            detail.storage_http_port = column(&fields, 19, lineno)?;
        }
        if cols > STORAGE_FIELDS - 2 {
            detail.join_time = column(&fields, 20, lineno)?;
            detail.version = fields[21].to_owned();
        }
        restore_detail(&mut detail, changelog_size);
        group.insert_detail(guard, detail)?;

        if !fields[3].is_empty() {
            pending.push(PendingSyncSource {
                group: fields[0].to_owned(),
                addr: fields[1].to_owned(),
                src_addr: fields[3].to_owned(),
            });
        }
    }
    resolve_sync_sources(registry, pending)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::PlacementConfig, registry::StructureLock};

    #[test]
    fn read_every_generation() {
        let lock = StructureLock::new();
        let registry = ClusterRegistry::new(PlacementConfig::default(), false);
        let guard = lock.lock();
        decode_legacy_groups("group1,23000,2,256\ngroup2,23001\n", &registry, &guard).unwrap();
        let group1 = registry.group("group1").unwrap();
        assert_eq!(group1.settings().store_path_count, 2);
        assert_eq!(registry.group("group2").unwrap().settings().storage_port, 23001);

        let counters = "1,1,2,2,3,3,4,4,5,5";
        let storages = [
            format!("group1,10.0.0.1,7,,0,{},100,200", counters),
            format!("group1,10.0.0.2,1,10.0.0.1,9,{},100,200,5000", counters),
            format!("group2,10.0.0.3,2,,0,{},100,200,10,23001,8888", counters),
            format!("group2,10.0.0.4,5,10.0.0.3,0,{},100,200,10,23001,8888,1500,3.06", counters),
        ]
        .join("\n");
        decode_legacy_storages(&storages, &registry, &guard, 1000).unwrap();

        let a = registry.storage("group1", "10.0.0.1").unwrap();
        assert_eq!(a.status(), StorageStatus::Offline);
        assert_eq!(a.detail().stat.success_get_meta_count, 5);
        assert_eq!(a.detail().stat.last_sync_update, 200);

        let b = registry.storage("group1", "10.0.0.2").unwrap();
        assert_eq!(b.status(), StorageStatus::WaitSync);
        assert_eq!(b.detail().changelog_offset, 1000);
        assert_eq!(b.detail().sync_src, Some(a.slot()));

        let d = registry.storage("group2", "10.0.0.4").unwrap();
        assert_eq!(d.detail().storage_http_port, 8888);
        assert_eq!(d.detail().join_time, 1500);
        assert_eq!(d.detail().version, "3.06");
    }

    #[test]
    fn reject_wrong_column_count() {
        let lock = StructureLock::new();
        let registry = ClusterRegistry::new(PlacementConfig::default(), false);
        let guard = lock.lock();
        assert!(matches!(
            decode_legacy_groups("group1,23000,2\n", &registry, &guard),
            Err(Error::InvalidData(_))
        ));
        decode_legacy_groups("group1,23000\n", &registry, &guard).unwrap();
        assert!(matches!(
            decode_legacy_storages("group1,10.0.0.1,7\n", &registry, &guard, 0),
            Err(Error::InvalidData(_))
        ));
    }
}
