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

//! k-way merge of per-shard result lists.
//!
//! Every shard hands back its hits sorted by descending score. The merge
//! keeps one cursor per shard in a max-heap keyed on the cursor's current
//! score, so producing `n` merged hits over `k` shards costs
//! `O(n log k)`.
//!
//! Equal scores resolve to the lower shard index, and within one shard to
//! the earlier position. A NaN score ranks as negative infinity.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use serde::Serialize;

use crate::shard::DocId;
use crate::shard::ShardResponse;

/// Borrowed view of one shard's sorted hits.
#[derive(Debug, Clone, Copy)]
pub struct ShardHits<'a> {
    pub ids: &'a [DocId],
    pub scores: &'a [f32],
    pub documents: &'a [serde_json::Value],
}

impl<'a> ShardHits<'a> {
    pub fn new(ids: &'a [DocId], scores: &'a [f32]) -> Self {
        Self {
            ids,
            scores,
            documents: &[],
        }
    }

    pub fn from_response(resp: &'a ShardResponse) -> Self {
        Self {
            ids: &resp.docs,
            scores: &resp.scores,
            documents: &resp.documents,
        }
    }

    pub fn empty() -> Self {
        Self::new(&[], &[])
    }

    pub fn len(&self) -> usize {
        self.ids.len().min(self.scores.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedHit {
    pub id: DocId,
    pub score: f32,
    pub shard: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<serde_json::Value>,
}

struct Cursor {
    score: f32,
    shard: usize,
    pos: usize,
}

impl Cursor {
    fn rank(&self) -> f32 {
        if self.score.is_nan() {
            f32::NEG_INFINITY
        } else {
            self.score
        }
    }
}

// The heap holds at most one cursor per shard, so shard index alone breaks
// score ties.
impl Ord for Cursor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank()
            .total_cmp(&other.rank())
            .then_with(|| other.shard.cmp(&self.shard))
    }
}

impl PartialOrd for Cursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Cursor {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Cursor {}

/// Merges up to `window` hits across `lists`, best first.
pub fn merge(lists: &[ShardHits<'_>], window: usize) -> Vec<MergedHit> {
    let available: usize = lists.iter().map(ShardHits::len).sum();
    let mut out = Vec::with_capacity(window.min(available));
    if window == 0 {
        return out;
    }

    let mut heap = BinaryHeap::with_capacity(lists.len());
    for (shard, hits) in lists.iter().enumerate() {
        if !hits.is_empty() {
            heap.push(Cursor {
                score: hits.scores[0],
                shard,
                pos: 0,
            });
        }
    }

    while out.len() < window {
        let Some(cursor) = heap.pop() else {
            break;
        };
        let hits = &lists[cursor.shard];
        out.push(MergedHit {
            id: hits.ids[cursor.pos],
            score: cursor.score,
            shard: cursor.shard,
            document: hits.documents.get(cursor.pos).cloned(),
        });

        let next = cursor.pos + 1;
        if next < hits.len() {
            heap.push(Cursor {
                score: hits.scores[next],
                shard: cursor.shard,
                pos: next,
            });
        }
    }

    out
}

/// Drops hits under `min_score`, then keeps `[offset, offset + limit)`.
pub fn window(
    hits: Vec<MergedHit>,
    offset: usize,
    limit: usize,
    min_score: Option<f32>,
) -> Vec<MergedHit> {
    hits.into_iter()
        .filter(|hit| min_score.is_none_or(|min| hit.score >= min))
        .skip(offset)
        .take(limit)
        .collect()
}
