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

//! Sharded full-text search: one query is fanned out to every shard on a
//! bounded worker pool and the per-shard rankings are merged into one list
//! ordered by score.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod index;
pub mod ingest;
pub mod merge;
pub mod model;
pub mod output;
pub mod pool;
pub mod shard;
pub mod store;

pub use dispatch::DispatchOptions;
pub use dispatch::Dispatcher;
pub use dispatch::FailurePolicy;
pub use dispatch::SearchRequest;
pub use error::FanoutError;
pub use model::MergedResult;
pub use shard::DocId;
pub use shard::Shard;
pub use shard::ShardQuery;
pub use shard::ShardResponse;
