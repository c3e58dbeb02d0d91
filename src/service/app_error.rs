// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// broker transport errors, recoverable in the new-batch path
    #[error("broker connection failure: {0}")]
    ConnectionFailure(String),

    #[error("broker client is closed")]
    ConnectionClosed,

    /// configuration faults, fatal for the current callback
    #[error("unknown partition handle: {0}")]
    UnknownPartitionHandle(String),

    #[error("malformed tag expression: {0:?}")]
    MalformedTagExpression(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// pull results that break the offset bookkeeping relations
    #[error("inconsistent pull result: {0}")]
    InconsistentPullResult(String),

    #[error("replay failed: {0}")]
    ReplayFailed(String),

    #[error("telemetry setup error: {0}")]
    Telemetry(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("config file error: {0}")]
    ConfigFileError(#[from] config::ConfigError),
}

impl AppError {
    /// Errors a new-batch attempt absorbs by skipping the batch: broker
    /// transport trouble and pull results that could not be trusted.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::ConnectionFailure(_)
                | AppError::ConnectionClosed
                | AppError::InconsistentPullResult(_)
        )
    }
}
