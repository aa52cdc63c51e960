// Copyright 2026 Shardsearch Authors
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

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FanoutError {
    #[error("dispatcher needs at least one shard")]
    NoShards,

    #[error("build worker pool: {0}")]
    Pool(String),

    #[error("shard {shard} ({name}) failed: {message}")]
    ShardFailed {
        shard: usize,
        name: String,
        message: String,
    },

    #[error("shard {shard} ({name}) panicked: {message}")]
    ShardPanicked {
        shard: usize,
        name: String,
        message: String,
    },

    #[error("shard {shard} ({name}) timed out after {after_ms}ms")]
    ShardTimedOut {
        shard: usize,
        name: String,
        after_ms: u64,
    },
}

impl FanoutError {
    /// Stable code used in the JSON error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            FanoutError::NoShards => "no_shards",
            FanoutError::Pool(_) => "pool",
            FanoutError::ShardFailed { .. } => "shard_failed",
            FanoutError::ShardPanicked { .. } => "shard_panicked",
            FanoutError::ShardTimedOut { .. } => "shard_timeout",
        }
    }
}
