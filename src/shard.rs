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

//! The contract every shard index satisfies.
//!
//! A shard answers a query with its own best hits, ordered by descending
//! score. The dispatcher trusts that ordering and never re-sorts a shard's
//! list before merging.

use std::fmt;

use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(pub u64);

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for DocId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardQuery {
    pub text: String,
    pub limit: usize,
    pub offset: usize,
    pub min_score: f32,
    pub return_scores: bool,
    pub return_doc_ids: bool,
    pub return_documents: bool,
    pub prefetch: bool,
}

/// Per-phase durations reported by a shard. Units are up to the shard; the
/// SQLite shard reports milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardTimings {
    pub parsing_took: f64,
    pub validation_took: f64,
    pub prefetch_took: f64,
    pub query_took: f64,
    pub response_took_total: f64,
}

/// A shard's answer. Missing `docs`/`scores` deserialize as empty lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardResponse {
    pub docs: Vec<DocId>,
    pub scores: Vec<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub documents: Vec<serde_json::Value>,
    #[serde(flatten)]
    pub timings: ShardTimings,
}

impl ShardResponse {
    /// Number of usable hits: the shorter of `docs` and `scores`.
    pub fn hit_count(&self) -> usize {
        self.docs.len().min(self.scores.len())
    }
}

pub trait Shard: Send + Sync {
    fn name(&self) -> &str;

    fn query(&self, query: &ShardQuery) -> Result<ShardResponse>;
}
