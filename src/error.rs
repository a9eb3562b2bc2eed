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

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("storage {0} is busy")]
    Busy(String),

    #[error("{0} already done")]
    AlreadyDone(String),

    #[error("invalid argument {0}")]
    InvalidArgument(String),

    #[error("invalid {0} data")]
    InvalidData(String),

    #[error("out of memory {0}")]
    OutOfMemory(String),

    #[error("retry later, {0}")]
    Retryable(String),

    #[error("invalid config {0}")]
    InvalidConfig(#[from] toml::de::Error),

    #[error("io {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the caller should back off and retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Retryable(_))
    }
}

impl From<std::collections::TryReserveError> for Error {
    fn from(e: std::collections::TryReserveError) -> Self {
        Error::OutOfMemory(e.to_string())
    }
}
