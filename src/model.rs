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

//! Result types produced by a fan-out query.

use serde::Serialize;

use crate::shard::DocId;
use crate::shard::ShardTimings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardStatus {
    Ok,
    Error,
    Panic,
    Timeout,
}

impl ShardStatus {
    pub fn as_label(self) -> &'static str {
        match self {
            ShardStatus::Ok => "ok",
            ShardStatus::Error => "error",
            ShardStatus::Panic => "panic",
            ShardStatus::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ShardReport {
    pub shard: usize,
    pub name: String,
    pub status: ShardStatus,
    pub hits: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timings: Option<ShardTimings>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShardFailure {
    pub shard: usize,
    pub name: String,
    pub kind: ShardStatus,
    pub message: String,
}

/// One list per timing key, one entry per shard that answered, in shard
/// order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TimingLists {
    pub parsing_took: Vec<f64>,
    pub validation_took: Vec<f64>,
    pub prefetch_took: Vec<f64>,
    pub query_took: Vec<f64>,
    pub response_took_total: Vec<f64>,
}

impl TimingLists {
    pub fn push(&mut self, timings: &ShardTimings) {
        self.parsing_took.push(timings.parsing_took);
        self.validation_took.push(timings.validation_took);
        self.prefetch_took.push(timings.prefetch_took);
        self.query_took.push(timings.query_took);
        self.response_took_total.push(timings.response_took_total);
    }
}

/// Globally ranked answer to one query.
///
/// `ids`, `scores` and `documents` are parallel when present; each is left
/// empty when the request did not ask for it. `count` is the window size
/// regardless of which lists were requested.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MergedResult {
    pub count: usize,
    pub ids: Vec<DocId>,
    pub scores: Vec<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub documents: Vec<serde_json::Value>,
    pub timings: TimingLists,
    pub shards: Vec<ShardReport>,
    pub failures: Vec<ShardFailure>,
    pub total_candidates: usize,
    pub took_ms: i64,
}

impl MergedResult {
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}
