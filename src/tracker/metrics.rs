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

// join.

lazy_static! {
    pub static ref JOIN_TOTAL: IntCounter =
        register_int_counter!("tracker_join_total", "the count of storage joins").unwrap();
    pub static ref JOIN_FAIL_TOTAL: IntCounter =
        register_int_counter!("tracker_join_fail_total", "the count of rejected joins").unwrap();
    pub static ref JOIN_DURATION_SECONDS: Histogram = register_histogram!(
        "tracker_join_duration_seconds",
        "the duration of handling a storage join",
        exponential_buckets(0.00005, 1.8, 26).unwrap(),
    )
    .unwrap();
}

// bootstrap.

lazy_static! {
    pub static ref BOOTSTRAP_DURATION_SECONDS: Histogram = register_histogram!(
        "tracker_bootstrap_duration_seconds",
        "the duration of fetching system files from a peer tracker",
        exponential_buckets(0.00005, 1.8, 26).unwrap(),
    )
    .unwrap();
    pub static ref BOOTSTRAP_FAIL_TOTAL: IntCounter = register_int_counter!(
        "tracker_bootstrap_fail_total",
        "the count of failed bootstraps"
    )
    .unwrap();
}

// selection.

lazy_static! {
    pub static ref SELECT_TOTAL: IntCounterVec = register_int_counter_vec!(
        "tracker_select_total",
        "the count of target selections, by kind",
        &["kind"]
    )
    .unwrap();
}
