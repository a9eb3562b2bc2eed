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

//! The membership and metadata core of a storage tracker: the registry of
//! storage groups and their servers, the status machine of every server,
//! durable snapshots with a changelog, and the bootstrap from peer trackers.

mod bootstrap;
pub mod config;
mod error;
pub mod peer;
pub mod persist;
pub mod registry;
mod tracker;

pub use self::{
    bootstrap::{rank_peers, BootstrapState, BootstrapSync, STAGING_DIR},
    config::Config,
    error::{Error, Result},
    tracker::*,
};
