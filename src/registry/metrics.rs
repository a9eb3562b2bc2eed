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

use lazy_static::lazy_static;
use prometheus::*;

lazy_static! {
    pub static ref STATUS_TRANSITION_TOTAL: IntCounterVec = register_int_counter_vec!(
        "tracker_storage_status_transition_total",
        "the count of storage status transitions, by target status",
        &["status"]
    )
    .unwrap();
    pub static ref ACTIVE_STORAGE_GAUGE: IntGaugeVec = register_int_gauge_vec!(
        "tracker_active_storage_count",
        "the count of active storages, by group",
        &["group"]
    )
    .unwrap();
}

// liveness.

lazy_static! {
    pub static ref LIVENESS_OFFLINE_TOTAL: IntCounter = register_int_counter!(
        "tracker_liveness_offline_total",
        "the count of storages forced offline by heartbeat timeout"
    )
    .unwrap();
    pub static ref LIVENESS_SWEEP_DURATION_SECONDS: Histogram = register_histogram!(
        "tracker_liveness_sweep_duration_seconds",
        "the duration of a liveness sweep",
        exponential_buckets(0.00005, 1.8, 26).unwrap(),
    )
    .unwrap();
}
