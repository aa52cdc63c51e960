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

//! Fan-out of one query to every shard, followed by a global merge.
//!
//! Each shard is asked for `limit + offset` hits with no offset and no score
//! floor, because the global window may be drawn entirely from one shard.
//! The caller's offset, limit and `min_score` apply only after the merge.

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use crate::error::FanoutError;
use crate::merge;
use crate::merge::ShardHits;
use crate::model::MergedResult;
use crate::model::ShardFailure;
use crate::model::ShardReport;
use crate::model::ShardStatus;
use crate::model::TimingLists;
use crate::pool::JobOutcome;
use crate::pool::WorkerPool;
use crate::shard::Shard;
use crate::shard::ShardQuery;
use crate::shard::ShardResponse;

pub const DEFAULT_MAX_THREADS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// A failed shard contributes nothing and is listed in the result.
    #[default]
    Isolate,
    /// The first failed shard, in shard order, fails the whole query.
    Abort,
}

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub max_threads: usize,
    pub shard_timeout: Option<Duration>,
    pub failure_policy: FailurePolicy,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            max_threads: DEFAULT_MAX_THREADS,
            shard_timeout: None,
            failure_policy: FailurePolicy::Isolate,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub text: String,
    pub limit: usize,
    pub offset: usize,
    pub min_score: Option<f32>,
    pub return_scores: bool,
    pub return_doc_ids: bool,
    pub return_documents: bool,
    pub prefetch: bool,
}

impl SearchRequest {
    pub fn new(text: impl Into<String>, limit: usize) -> Self {
        Self {
            text: text.into(),
            limit,
            offset: 0,
            min_score: None,
            return_scores: true,
            return_doc_ids: true,
            return_documents: false,
            prefetch: false,
        }
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = Some(min_score);
        self
    }

    pub fn with_documents(mut self, return_documents: bool) -> Self {
        self.return_documents = return_documents;
        self
    }

    pub fn with_prefetch(mut self, prefetch: bool) -> Self {
        self.prefetch = prefetch;
        self
    }

    /// How many merged hits the window needs before slicing.
    pub fn depth(&self) -> usize {
        self.limit.saturating_add(self.offset)
    }

    /// The query every shard receives.
    pub fn shard_query(&self) -> ShardQuery {
        ShardQuery {
            text: self.text.clone(),
            limit: self.depth(),
            offset: 0,
            min_score: 0.0,
            return_scores: true,
            return_doc_ids: true,
            return_documents: self.return_documents,
            prefetch: self.prefetch,
        }
    }
}

enum ShardOutcome {
    Answered(ShardResponse),
    Failed(ShardStatus, String),
}

pub struct Dispatcher {
    shards: Arc<Vec<Arc<dyn Shard>>>,
    pool: WorkerPool,
    options: DispatchOptions,
}

impl Dispatcher {
    pub fn new(shards: Vec<Arc<dyn Shard>>, options: DispatchOptions) -> Result<Self, FanoutError> {
        if shards.is_empty() {
            return Err(FanoutError::NoShards);
        }
        let pool = WorkerPool::new(shards.len(), options.max_threads)?;
        debug!(
            shards = shards.len(),
            workers = pool.size(),
            policy = ?options.failure_policy,
            "dispatcher ready"
        );
        Ok(Self {
            shards: Arc::new(shards),
            pool,
            options,
        })
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn pool_size(&self) -> usize {
        self.pool.size()
    }

    /// Runs `request` on every shard and merges the answers.
    ///
    /// Blocks until every shard has answered or the shard deadline passes.
    pub fn query(&self, request: &SearchRequest) -> Result<MergedResult, FanoutError> {
        let started = Instant::now();
        if request.limit == 0 {
            return Ok(MergedResult {
                took_ms: elapsed_ms(started),
                ..Default::default()
            });
        }

        let outcomes = self.scatter(request.shard_query());

        let mut reports = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        let mut timings = TimingLists::default();
        let mut responses: Vec<Option<ShardResponse>> = Vec::with_capacity(outcomes.len());
        for (index, outcome) in outcomes.into_iter().enumerate() {
            let name = self.shards[index].name().to_string();
            match outcome {
                ShardOutcome::Answered(resp) => {
                    timings.push(&resp.timings);
                    reports.push(ShardReport {
                        shard: index,
                        name,
                        status: ShardStatus::Ok,
                        hits: resp.hit_count(),
                        timings: Some(resp.timings),
                    });
                    responses.push(Some(resp));
                }
                ShardOutcome::Failed(status, message) => {
                    if self.options.failure_policy == FailurePolicy::Abort {
                        return Err(self.abort_error(index, name, status, message));
                    }
                    warn!(
                        shard = index,
                        name = %name,
                        kind = status.as_label(),
                        message = %message,
                        "shard excluded from merge"
                    );
                    reports.push(ShardReport {
                        shard: index,
                        name: name.clone(),
                        status,
                        hits: 0,
                        timings: None,
                    });
                    failures.push(ShardFailure {
                        shard: index,
                        name,
                        kind: status,
                        message,
                    });
                    responses.push(None);
                }
            }
        }

        let views: Vec<ShardHits<'_>> = responses
            .iter()
            .map(|resp| {
                resp.as_ref()
                    .map(ShardHits::from_response)
                    .unwrap_or_else(ShardHits::empty)
            })
            .collect();
        let total_candidates = views.iter().map(ShardHits::len).sum();
        let merged = merge::merge(&views, request.depth());
        let hits = merge::window(merged, request.offset, request.limit, request.min_score);

        let count = hits.len();
        let mut ids = Vec::new();
        let mut scores = Vec::new();
        let mut documents = Vec::new();
        for hit in hits {
            if request.return_doc_ids {
                ids.push(hit.id);
            }
            if request.return_scores {
                scores.push(hit.score);
            }
            if request.return_documents {
                documents.push(hit.document.unwrap_or(serde_json::Value::Null));
            }
        }

        Ok(MergedResult {
            count,
            ids,
            scores,
            documents,
            timings,
            shards: reports,
            failures,
            total_candidates,
            took_ms: elapsed_ms(started),
        })
    }

    fn scatter(&self, query: ShardQuery) -> Vec<ShardOutcome> {
        let query = Arc::new(query);
        let shards = Arc::clone(&self.shards);
        let outcomes = self
            .pool
            .scatter(shards.len(), self.options.shard_timeout, move |index| {
                let shard = &shards[index];
                let started = Instant::now();
                let result = shard.query(&query);
                debug!(
                    shard = index,
                    name = shard.name(),
                    ok = result.is_ok(),
                    elapsed_ms = elapsed_ms(started),
                    "shard query finished"
                );
                result.map_err(|err| format!("{err:#}"))
            });

        outcomes
            .into_iter()
            .map(|outcome| match outcome {
                JobOutcome::Done(Ok(resp)) => ShardOutcome::Answered(resp),
                JobOutcome::Done(Err(message)) => ShardOutcome::Failed(ShardStatus::Error, message),
                JobOutcome::Panicked(message) => ShardOutcome::Failed(ShardStatus::Panic, message),
                JobOutcome::TimedOut => {
                    let after = self.options.shard_timeout.unwrap_or_default();
                    ShardOutcome::Failed(
                        ShardStatus::Timeout,
                        format!("no answer within {}ms", after.as_millis()),
                    )
                }
            })
            .collect()
    }

    fn abort_error(
        &self,
        shard: usize,
        name: String,
        status: ShardStatus,
        message: String,
    ) -> FanoutError {
        match status {
            ShardStatus::Panic => FanoutError::ShardPanicked {
                shard,
                name,
                message,
            },
            ShardStatus::Timeout => FanoutError::ShardTimedOut {
                shard,
                name,
                after_ms: self
                    .options
                    .shard_timeout
                    .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
                    .unwrap_or(0),
            },
            ShardStatus::Ok | ShardStatus::Error => FanoutError::ShardFailed {
                shard,
                name,
                message,
            },
        }
    }
}

fn elapsed_ms(started: Instant) -> i64 {
    i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::thread::sleep;

    use serde_json::json;

    use super::*;
    use crate::shard::DocId;

    struct StaticShard {
        name: String,
        hits: Vec<(u64, f32)>,
        seen: Mutex<Vec<ShardQuery>>,
    }

    impl StaticShard {
        fn new(name: &str, hits: &[(u64, f32)]) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                hits: hits.to_vec(),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl Shard for StaticShard {
        fn name(&self) -> &str {
            &self.name
        }

        fn query(&self, query: &ShardQuery) -> anyhow::Result<ShardResponse> {
            self.seen.lock().expect("seen lock").push(query.clone());
            let hits: Vec<(u64, f32)> = self
                .hits
                .iter()
                .copied()
                .filter(|(_, score)| *score >= query.min_score)
                .skip(query.offset)
                .take(query.limit)
                .collect();
            let documents = if query.return_documents {
                hits.iter()
                    .map(|(id, _)| json!({ "shard": self.name, "id": id }))
                    .collect()
            } else {
                Vec::new()
            };
            Ok(ShardResponse {
                docs: hits.iter().map(|(id, _)| DocId(*id)).collect(),
                scores: hits.iter().map(|(_, score)| *score).collect(),
                documents,
                timings: crate::shard::ShardTimings {
                    query_took: 1.0,
                    response_took_total: 2.0,
                    ..Default::default()
                },
            })
        }
    }

    struct FailingShard;

    impl Shard for FailingShard {
        fn name(&self) -> &str {
            "broken"
        }

        fn query(&self, _query: &ShardQuery) -> anyhow::Result<ShardResponse> {
            anyhow::bail!("index file missing")
        }
    }

    struct PanickingShard;

    impl Shard for PanickingShard {
        fn name(&self) -> &str {
            "panicky"
        }

        fn query(&self, _query: &ShardQuery) -> anyhow::Result<ShardResponse> {
            panic!("corrupt posting list")
        }
    }

    struct SlowShard(Duration);

    impl Shard for SlowShard {
        fn name(&self) -> &str {
            "slow"
        }

        fn query(&self, _query: &ShardQuery) -> anyhow::Result<ShardResponse> {
            sleep(self.0);
            Ok(ShardResponse {
                docs: vec![DocId(99)],
                scores: vec![100.0],
                ..Default::default()
            })
        }
    }

    fn two_shards() -> Vec<Arc<dyn Shard>> {
        vec![
            StaticShard::new("a", &[(1, 0.9), (3, 0.4)]),
            StaticShard::new("b", &[(2, 0.8), (4, 0.3)]),
        ]
    }

    fn ids(result: &MergedResult) -> Vec<u64> {
        result.ids.iter().map(|id| id.0).collect()
    }

    #[test]
    fn merges_two_shards() {
        let dispatcher = Dispatcher::new(two_shards(), DispatchOptions::default()).expect("new");
        let result = dispatcher
            .query(&SearchRequest::new("q", 4))
            .expect("query");
        assert_eq!(ids(&result), vec![1, 2, 3, 4]);
        assert_eq!(result.scores, vec![0.9, 0.8, 0.4, 0.3]);
        assert_eq!(result.count, 4);
        assert_eq!(result.total_candidates, 4);
        assert!(result.failures.is_empty());
        assert_eq!(result.timings.query_took, vec![1.0, 1.0]);
        assert_eq!(result.timings.response_took_total.len(), 2);
    }

    #[test]
    fn offset_is_applied_globally() {
        let dispatcher = Dispatcher::new(two_shards(), DispatchOptions::default()).expect("new");
        let result = dispatcher
            .query(&SearchRequest::new("q", 2).with_offset(1))
            .expect("query");
        assert_eq!(ids(&result), vec![2, 3]);
    }

    #[test]
    fn shards_see_widened_unpruned_query() {
        let a = StaticShard::new("a", &[(1, 0.9)]);
        let b = StaticShard::new("b", &[(2, 0.8)]);
        let shards: Vec<Arc<dyn Shard>> = vec![a.clone(), b.clone()];
        let dispatcher = Dispatcher::new(shards, DispatchOptions::default()).expect("new");
        let mut request = SearchRequest::new("needle", 3)
            .with_offset(2)
            .with_min_score(0.85)
            .with_prefetch(true);
        request.return_scores = false;
        request.return_doc_ids = false;
        dispatcher.query(&request).expect("query");

        for shard in [&a, &b] {
            let seen = shard.seen.lock().expect("seen lock");
            assert_eq!(seen.len(), 1);
            let q = &seen[0];
            assert_eq!(q.text, "needle");
            assert_eq!(q.limit, 5);
            assert_eq!(q.offset, 0);
            assert_eq!(q.min_score, 0.0);
            assert!(q.return_scores);
            assert!(q.return_doc_ids);
            assert!(!q.return_documents);
            assert!(q.prefetch);
        }
    }

    #[test]
    fn min_score_applies_after_merge() {
        let dispatcher = Dispatcher::new(two_shards(), DispatchOptions::default()).expect("new");
        let result = dispatcher
            .query(&SearchRequest::new("q", 10).with_min_score(0.5))
            .expect("query");
        assert_eq!(ids(&result), vec![1, 2]);
    }

    #[test]
    fn zero_limit_skips_shards() {
        let a = StaticShard::new("a", &[(1, 0.9)]);
        let shards: Vec<Arc<dyn Shard>> = vec![a.clone()];
        let dispatcher = Dispatcher::new(shards, DispatchOptions::default()).expect("new");
        let result = dispatcher
            .query(&SearchRequest::new("q", 0).with_offset(5))
            .expect("query");
        assert!(result.is_empty());
        assert!(result.ids.is_empty());
        assert!(a.seen.lock().expect("seen lock").is_empty());
    }

    #[test]
    fn empty_shard_does_not_break_merge() {
        let shards: Vec<Arc<dyn Shard>> = vec![
            StaticShard::new("a", &[(1, 0.9), (3, 0.4)]),
            StaticShard::new("empty", &[]),
            StaticShard::new("b", &[(2, 0.8)]),
        ];
        let dispatcher = Dispatcher::new(shards, DispatchOptions::default()).expect("new");
        let result = dispatcher
            .query(&SearchRequest::new("q", 10))
            .expect("query");
        assert_eq!(ids(&result), vec![1, 2, 3]);
        assert_eq!(result.shards[1].hits, 0);
        assert_eq!(result.shards[1].status, ShardStatus::Ok);
    }

    #[test]
    fn output_flags_shape_result() {
        let dispatcher = Dispatcher::new(two_shards(), DispatchOptions::default()).expect("new");
        let mut request = SearchRequest::new("q", 2).with_documents(true);
        request.return_scores = false;
        let result = dispatcher.query(&request).expect("query");
        assert_eq!(result.count, 2);
        assert_eq!(ids(&result), vec![1, 2]);
        assert!(result.scores.is_empty());
        assert_eq!(
            result.documents,
            vec![json!({ "shard": "a", "id": 1 }), json!({ "shard": "b", "id": 2 })]
        );

        let mut request = SearchRequest::new("q", 2);
        request.return_doc_ids = false;
        let result = dispatcher.query(&request).expect("query");
        assert!(result.ids.is_empty());
        assert_eq!(result.scores, vec![0.9, 0.8]);
        assert!(result.documents.is_empty());
    }

    #[test]
    fn failing_shard_is_isolated() {
        let shards: Vec<Arc<dyn Shard>> = vec![
            StaticShard::new("a", &[(1, 0.9), (3, 0.4)]),
            Arc::new(FailingShard),
            StaticShard::new("b", &[(2, 0.8)]),
        ];
        let dispatcher = Dispatcher::new(shards, DispatchOptions::default()).expect("new");
        let result = dispatcher
            .query(&SearchRequest::new("q", 10))
            .expect("query");
        assert_eq!(ids(&result), vec![1, 2, 3]);
        assert!(result.is_partial());
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].shard, 1);
        assert_eq!(result.failures[0].kind, ShardStatus::Error);
        assert!(result.failures[0].message.contains("index file missing"));
        assert_eq!(result.shards[1].status, ShardStatus::Error);
        assert_eq!(result.timings.query_took.len(), 2);
    }

    #[test]
    fn panicking_shard_is_isolated() {
        let shards: Vec<Arc<dyn Shard>> = vec![
            Arc::new(PanickingShard),
            StaticShard::new("b", &[(2, 0.8)]),
        ];
        let dispatcher = Dispatcher::new(shards, DispatchOptions::default()).expect("new");
        let result = dispatcher
            .query(&SearchRequest::new("q", 10))
            .expect("query");
        assert_eq!(ids(&result), vec![2]);
        assert_eq!(result.failures[0].kind, ShardStatus::Panic);
        assert_eq!(result.failures[0].message, "corrupt posting list");
    }

    #[test]
    fn abort_policy_fails_whole_query() {
        let shards: Vec<Arc<dyn Shard>> = vec![
            StaticShard::new("a", &[(1, 0.9)]),
            Arc::new(FailingShard),
        ];
        let options = DispatchOptions {
            failure_policy: FailurePolicy::Abort,
            ..Default::default()
        };
        let dispatcher = Dispatcher::new(shards, options).expect("new");
        let err = dispatcher
            .query(&SearchRequest::new("q", 10))
            .unwrap_err();
        assert!(matches!(err, FanoutError::ShardFailed { shard: 1, .. }));
        assert_eq!(err.code(), "shard_failed");
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn slow_shard_times_out() {
        let shards: Vec<Arc<dyn Shard>> = vec![
            StaticShard::new("a", &[(1, 0.9)]),
            Arc::new(SlowShard(Duration::from_millis(1500))),
        ];
        let options = DispatchOptions {
            shard_timeout: Some(Duration::from_millis(100)),
            ..Default::default()
        };
        let dispatcher = Dispatcher::new(shards, options).expect("new");
        let result = dispatcher
            .query(&SearchRequest::new("q", 10))
            .expect("query");
        assert_eq!(ids(&result), vec![1]);
        assert_eq!(result.failures[0].kind, ShardStatus::Timeout);
        assert_eq!(result.shards[1].status, ShardStatus::Timeout);
    }

    #[test]
    fn timeout_counts_from_each_shard_start() {
        let shards: Vec<Arc<dyn Shard>> = (0..4)
            .map(|_| Arc::new(SlowShard(Duration::from_millis(60))) as Arc<dyn Shard>)
            .collect();
        let options = DispatchOptions {
            max_threads: 1,
            shard_timeout: Some(Duration::from_millis(150)),
            ..Default::default()
        };
        let dispatcher = Dispatcher::new(shards, options).expect("new");
        assert_eq!(dispatcher.pool_size(), 1);
        let result = dispatcher
            .query(&SearchRequest::new("q", 10))
            .expect("query");
        let statuses: Vec<ShardStatus> = result.shards.iter().map(|s| s.status).collect();
        assert_eq!(statuses, vec![ShardStatus::Ok; 4]);
        assert!(result.failures.is_empty());
        assert_eq!(result.count, 4);
    }

    #[test]
    fn abort_policy_reports_timeout() {
        let shards: Vec<Arc<dyn Shard>> = vec![Arc::new(SlowShard(Duration::from_millis(1500)))];
        let options = DispatchOptions {
            shard_timeout: Some(Duration::from_millis(50)),
            failure_policy: FailurePolicy::Abort,
            ..Default::default()
        };
        let dispatcher = Dispatcher::new(shards, options).expect("new");
        let err = dispatcher
            .query(&SearchRequest::new("q", 1))
            .unwrap_err();
        assert!(matches!(
            err,
            FanoutError::ShardTimedOut { shard: 0, after_ms: 50, .. }
        ));
    }

    #[test]
    fn no_shards_is_rejected() {
        let err = Dispatcher::new(Vec::new(), DispatchOptions::default())
            .err()
            .expect("error");
        assert!(matches!(err, FanoutError::NoShards));
    }

    #[test]
    fn pool_is_bounded() {
        let shards: Vec<Arc<dyn Shard>> = (0..6)
            .map(|i| StaticShard::new(&format!("s{i}"), &[]) as Arc<dyn Shard>)
            .collect();
        let dispatcher = Dispatcher::new(shards, DispatchOptions::default()).expect("new");
        assert_eq!(dispatcher.shard_count(), 6);
        assert_eq!(dispatcher.pool_size(), DEFAULT_MAX_THREADS);

        let dispatcher = Dispatcher::new(two_shards(), DispatchOptions::default()).expect("new");
        assert_eq!(dispatcher.pool_size(), 2);
    }

    #[test]
    fn many_shards_merge_globally() {
        let shards: Vec<Arc<dyn Shard>> = (0..8u64)
            .map(|i| {
                let hits: Vec<(u64, f32)> = (0..5u64)
                    .map(|j| (i * 100 + j, 1.0 - (j * 8 + i) as f32 / 100.0))
                    .collect();
                StaticShard::new(&format!("s{i}"), &hits) as Arc<dyn Shard>
            })
            .collect();
        let options = DispatchOptions {
            max_threads: 3,
            ..Default::default()
        };
        let dispatcher = Dispatcher::new(shards, options).expect("new");
        let result = dispatcher
            .query(&SearchRequest::new("q", 10).with_offset(5))
            .expect("query");
        assert_eq!(
            ids(&result),
            vec![500, 600, 700, 1, 101, 201, 301, 401, 501, 601]
        );
        for pair in result.scores.windows(2) {
            assert!(pair[0] >= pair[1]);
        }
    }
}
