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

use std::sync::{Mutex, MutexGuard};

/// The structural lock. Every change to the shape of the registry, to member
/// statuses or to the active views happens while holding it. Lookups never
/// take it, they read the last published member table instead.
#[derive(Debug, Default)]
pub struct StructureLock {
    inner: Mutex<()>,
}

/// Proof that the structural lock is held. Mutators of the registry take a
/// reference to it.
pub struct StructureGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl StructureLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> StructureGuard<'_> {
        StructureGuard {
            _guard: self.inner.lock().unwrap(),
        }
    }
}
