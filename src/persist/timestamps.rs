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

use tracing::warn;

use super::FIELD_SEPARATOR;
use crate::registry::ClusterRegistry;

/// One line per member of every group: group, source address, then the
/// timestamp for every destination in slot order.
pub fn encode_sync_timestamps(registry: &ClusterRegistry) -> String {
    let mut buf = String::new();
    for group in registry.groups().iter() {
        let members = group.members();
        let count = members.count();
        let matrix = group.sync_matrix();
        for (src, record) in members.all().iter().enumerate() {
            buf.push_str(group.name());
            buf.push(FIELD_SEPARATOR);
            buf.push_str(&record.addr());
            for ts in matrix.row(src, count) {
                buf.push(FIELD_SEPARATOR);
                buf.push_str(&ts.to_string());
            }
            buf.push('\n');
        }
    }
    buf
}

/// Fill the sync matrices of `registry`. Rows which can not be applied are
/// skipped.
pub fn decode_sync_timestamps(content: &str, registry: &ClusterRegistry) {
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields = line.split(FIELD_SEPARATOR).map(str::trim).collect::<Vec<_>>();
        if fields.len() < 2 {
            warn!("sync timestamps line {} {:?} is too short, skip", lineno + 1, line);
            continue;
        }
        let group = match registry.get_group(fields[0]) {
            Some(group) => group,
            None => {
                warn!("sync timestamps line {}: group {} not found, skip", lineno + 1, fields[0]);
                continue;
            }
        };
        let src = match group.get(fields[1]) {
            Some(record) => record.slot(),
            None => {
                warn!(
                    "sync timestamps line {}: storage {} of group {} not found, skip",
                    lineno + 1,
                    fields[1],
                    fields[0]
                );
                continue;
            }
        };
        let timestamps = match fields[2..]
            .iter()
            .map(|v| v.parse::<i64>())
            .collect::<std::result::Result<Vec<_>, _>>()
        {
            Ok(timestamps) => timestamps,
            Err(_) => {
                warn!("sync timestamps line {} {:?} is malformed, skip", lineno + 1, line);
                continue;
            }
        };
        let count = group.count();
        if timestamps.len() > count {
            warn!(
                "sync timestamps line {} has {} columns but group {} has {} storages",
                lineno + 1,
                timestamps.len(),
                group.name(),
                count
            );
        }
        for (dest, ts) in timestamps.into_iter().take(count).enumerate() {
            group.set_sync_timestamp(src, dest, ts);
        }
    }

    for group in registry.groups().iter() {
        group.refresh_last_synced();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::PlacementConfig,
        registry::{GroupSettings, StorageStatus, StructureLock},
    };

    #[test]
    fn skip_bad_rows() {
        let lock = StructureLock::new();
        let registry = ClusterRegistry::new(PlacementConfig::default(), false);
        let guard = lock.lock();
        let (group, _) = registry
            .insert_group(&guard, "group1", GroupSettings::default())
            .unwrap();
        group.insert(&guard, "10.0.0.1", StorageStatus::Offline).unwrap();
        group.insert(&guard, "10.0.0.2", StorageStatus::Offline).unwrap();

        let content = "group1,10.0.0.1,0,5\n\
                       group1,10.0.0.2,3,0\n\
                       group9,10.0.0.2,7,7\n\
                       group1,10.0.0.9,7,7\n\
                       group1,10.0.0.2,x,7\n\
                       garbage\n";
        decode_sync_timestamps(content, &registry);

        assert_eq!(group.sync_matrix().cell(0, 1), 5);
        assert_eq!(group.sync_matrix().cell(1, 0), 3);
        assert_eq!(group.get("10.0.0.1").unwrap().last_synced_timestamp(), 3);
        assert_eq!(group.get("10.0.0.2").unwrap().last_synced_timestamp(), 5);

        let encoded = encode_sync_timestamps(&registry);
        assert_eq!(encoded, "group1,10.0.0.1,0,5\ngroup1,10.0.0.2,3,0\n");
    }
}
