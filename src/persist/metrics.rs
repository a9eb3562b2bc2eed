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
    pub static ref SAVE_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "tracker_snapshot_save_duration_seconds",
        "the duration of saving a snapshot file, by file",
        &["file"],
        exponential_buckets(0.00005, 1.8, 26).unwrap(),
    )
    .unwrap();
    pub static ref SAVE_FAIL_TOTAL: IntCounter = register_int_counter!(
        "tracker_snapshot_save_fail_total",
        "the count of failed snapshot saves"
    )
    .unwrap();
}

// changelog.

lazy_static! {
    pub static ref CHANGELOG_APPEND_TOTAL: IntCounter = register_int_counter!(
        "tracker_changelog_append_total",
        "the count of changelog appends"
    )
    .unwrap();
    pub static ref CHANGELOG_SIZE_BYTES: IntGauge = register_int_gauge!(
        "tracker_changelog_size_bytes",
        "the size of the changelog"
    )
    .unwrap();
}
