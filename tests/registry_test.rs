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
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};

use storage_tracker::{
    registry::{ClusterRegistry, GroupSettings, StorageStatus, StructureLock},
    Config, Result,
};

const READERS: usize = 4;
const INSERTS: usize = 200;

fn addr_of(i: usize) -> String {
    format!("10.1.{}.{}", i / 250, i % 250 + 1)
}

#[test]
fn lookups_during_growth() -> Result<()> {
    let lock = Arc::new(StructureLock::new());
    let registry = Arc::new(ClusterRegistry::new(Config::default().placement, false));
    let group = {
        let guard = lock.lock();
        let (group, _) = registry.insert_group(&guard, "group1", GroupSettings::default())?;
        let (record, _) = group.insert(&guard, "10.0.0.1", StorageStatus::Init)?;
        group.force_status(&guard, &record, StorageStatus::Active);
        group
    };

    let stop = Arc::new(AtomicBool::new(false));
    let readers = (0..READERS)
        .map(|_| {
            let group = group.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                let mut rounds = 0;
                while !stop.load(Ordering::Acquire) || rounds == 0 {
                    let record = group.get("10.0.0.1").expect("pre-inserted storage");
                    assert_eq!(record.addr(), "10.0.0.1");
                    assert!(group.get_active("10.0.0.1").is_some());
                    assert!(group.get("10.9.9.9").is_none());

                    let members = group.members();
                    for member in members.sorted().windows(2) {
                        assert!(member[0].addr < member[1].addr);
                    }
                    for (slot, record) in members.all().iter().enumerate() {
                        assert_eq!(record.slot(), slot);
                    }
                    rounds += 1;
                }
            })
        })
        .collect::<Vec<_>>();

    for i in 0..INSERTS {
        let guard = lock.lock();
        let (_, inserted) = group.insert(&guard, &addr_of(i), StorageStatus::Init)?;
        assert!(inserted);
    }
    stop.store(true, Ordering::Release);
    for reader in readers {
        reader.join().unwrap();
    }

    assert_eq!(group.count(), INSERTS + 1);
    assert_eq!(group.active_count(), 1);
    for i in 0..INSERTS {
        let record = group.get(&addr_of(i)).unwrap();
        assert_eq!(record.status(), StorageStatus::Init);
    }
    Ok(())
}

#[test]
fn groups_stay_sorted_while_created() -> Result<()> {
    let lock = Arc::new(StructureLock::new());
    let registry = Arc::new(ClusterRegistry::new(Config::default().placement, false));
    let names = (0..32).rev().map(|i| format!("g{:02}", i)).collect::<Vec<_>>();

    let reader = {
        let registry = registry.clone();
        thread::spawn(move || loop {
            let groups = registry.groups();
            for pair in groups.windows(2) {
                assert!(pair[0].name() < pair[1].name());
            }
            if groups.len() == 32 {
                break;
            }
        })
    };
    for name in &names {
        let guard = lock.lock();
        let (_, created) = registry.insert_group(&guard, name, GroupSettings::default())?;
        assert!(created);
    }
    reader.join().unwrap();

    let guard = lock.lock();
    let (_, created) = registry.insert_group(&guard, "g00", GroupSettings::default())?;
    assert!(!created);
    assert!(registry.get_group("g31").is_some());
    Ok(())
}
