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

use crate::{config::StoreServerPolicy, Result};

/// Square matrix of sync timestamps, `cell(src, dest)` is the last timestamp
/// the content of `src` is known to be visible on `dest`. The dimension
/// follows the member capacity of the group, not the live member count.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncMatrix {
    dim: usize,
    cells: Vec<i64>,
}

impl SyncMatrix {
    pub fn new(dim: usize) -> Self {
        SyncMatrix {
            dim,
            cells: vec![0; dim * dim],
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Grow to `dim`, keeping existing cells in place.
    pub fn grow(&mut self, dim: usize) -> Result<()> {
        if dim <= self.dim {
            return Ok(());
        }
        let mut cells = Vec::new();
        cells.try_reserve_exact(dim * dim)?;
        cells.resize(dim * dim, 0);
        for src in 0..self.dim {
            let from = src * self.dim;
            cells[src * dim..src * dim + self.dim]
                .copy_from_slice(&self.cells[from..from + self.dim]);
        }
        self.dim = dim;
        self.cells = cells;
        Ok(())
    }

    pub fn cell(&self, src: usize, dest: usize) -> i64 {
        if src >= self.dim || dest >= self.dim {
            return 0;
        }
        self.cells[src * self.dim + dest]
    }

    pub fn set(&mut self, src: usize, dest: usize, timestamp: i64) {
        if src < self.dim && dest < self.dim {
            self.cells[src * self.dim + dest] = timestamp;
        }
    }

    pub fn row(&self, src: usize, count: usize) -> &[i64] {
        let count = count.min(self.dim);
        if src >= self.dim {
            return &[];
        }
        &self.cells[src * self.dim..src * self.dim + count]
    }

    /// Forget everything about `slot`, both as a source and as a destination.
    pub fn clear_member(&mut self, slot: usize) {
        if slot >= self.dim {
            return;
        }
        for other in 0..self.dim {
            self.cells[slot * self.dim + other] = 0;
            self.cells[other * self.dim + slot] = 0;
        }
    }

    /// The last synced timestamp `dest` exposes to readers, looking at the
    /// first `count` members as sources.
    ///
    /// When writes rotate over the group any source could have written the
    /// file, so the slowest known sync bounds freshness and the minimum of the
    /// non-zero cells is used. Otherwise a single source takes writes and the
    /// best known sync wins.
    pub fn last_synced(&self, dest: usize, count: usize, policy: StoreServerPolicy) -> i64 {
        let sources = (0..count.min(self.dim))
            .filter(|src| *src != dest)
            .map(|src| self.cell(src, dest));
        match policy {
            StoreServerPolicy::RoundRobin => sources.filter(|ts| *ts > 0).min().unwrap_or(0),
            StoreServerPolicy::FirstByIp | StoreServerPolicy::FirstByPriority => {
                sources.max().unwrap_or(0)
            }
        }
    }
}
