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

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;

use crate::dispatch::SearchRequest;
use crate::model::MergedResult;
use crate::model::TimingLists;

pub const SCHEMA_VERSION: &str = "1";

#[derive(Debug, Clone, Serialize, Default)]
pub struct StatsOut {
    pub took_ms: i64,
    pub total_hits: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_candidates: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs_updated: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs_skipped: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_shard: Option<Vec<usize>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timings: Option<TimingLists>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryOut {
    pub text: String,
    pub limit: i64,
    pub offset: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f32>,
    pub return_scores: bool,
    pub return_doc_ids: bool,
    pub return_documents: bool,
    pub prefetch: bool,
}

impl From<&SearchRequest> for QueryOut {
    fn from(request: &SearchRequest) -> Self {
        Self {
            text: request.text.clone(),
            limit: request.limit as i64,
            offset: request.offset as i64,
            min_score: request.min_score,
            return_scores: request.return_scores,
            return_doc_ids: request.return_doc_ids,
            return_documents: request.return_documents,
            prefetch: request.prefetch,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorOut {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct JsonResponse {
    pub ok: bool,
    pub schema_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<QueryOut>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<StatsOut>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shards: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorOut>,
}

impl JsonResponse {
    pub fn ok() -> Self {
        Self {
            ok: true,
            schema_version: SCHEMA_VERSION.to_string(),
            ..Default::default()
        }
    }

    pub fn error(code: &str, message: &str) -> Self {
        Self {
            ok: false,
            schema_version: SCHEMA_VERSION.to_string(),
            error: Some(ErrorOut {
                code: code.to_string(),
                message: message.to_string(),
                details: None,
                hint: None,
            }),
            ..Default::default()
        }
    }

    pub fn with_hint(mut self, hint: &str) -> Self {
        if let Some(error) = &mut self.error {
            error.hint = Some(hint.to_string());
        }
        self
    }

    pub fn with_query(mut self, request: &SearchRequest) -> Self {
        self.query = Some(QueryOut::from(request));
        self
    }

    pub fn with_results(mut self, results: Vec<Value>) -> Self {
        self.results = Some(results);
        self
    }

    pub fn with_stats(mut self, stats: StatsOut) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn with_shards(mut self, shards: Vec<Value>) -> Self {
        self.shards = Some(shards);
        self
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }

    /// Envelope for a merged search answer.
    pub fn from_search(request: &SearchRequest, result: &MergedResult) -> Result<Self> {
        let shards = result
            .shards
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        let warnings = result
            .failures
            .iter()
            .map(|f| {
                format!(
                    "shard {} ({}) {}: {}",
                    f.shard,
                    f.name,
                    f.kind.as_label(),
                    f.message
                )
            })
            .collect();
        let stats = StatsOut {
            took_ms: result.took_ms,
            total_hits: result.count as i64,
            total_candidates: Some(result.total_candidates as i64),
            partial: Some(result.is_partial()),
            shard_count: Some(result.shards.len()),
            timings: Some(result.timings.clone()),
            ..Default::default()
        };
        Ok(Self::ok()
            .with_query(request)
            .with_results(result_rows(result))
            .with_stats(stats)
            .with_shards(shards)
            .with_warnings(warnings))
    }
}

/// One row per hit; `id`, `score` and `document` appear only when they were
/// requested.
pub fn result_rows(result: &MergedResult) -> Vec<Value> {
    (0..result.count)
        .map(|i| {
            let mut row = serde_json::Map::new();
            row.insert("rank".to_string(), json!(i + 1));
            if let Some(id) = result.ids.get(i) {
                row.insert("id".to_string(), json!(id));
            }
            if let Some(score) = result.scores.get(i) {
                row.insert("score".to_string(), json!(score));
            }
            if let Some(document) = result.documents.get(i) {
                row.insert("document".to_string(), document.clone());
            }
            Value::Object(row)
        })
        .collect()
}

pub fn print_json(resp: &JsonResponse) -> Result<()> {
    let text = serde_json::to_string_pretty(resp)?;
    println!("{text}");
    Ok(())
}

pub fn print_table(result: &MergedResult) {
    for (i, row) in result_rows(result).iter().enumerate() {
        let id = row
            .get("id")
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".to_string());
        let score = row
            .get("score")
            .and_then(Value::as_f64)
            .map(|s| format!("{s:.4}"))
            .unwrap_or_else(|| "-".to_string());
        let path = row
            .get("document")
            .and_then(|d| d.get("path"))
            .and_then(Value::as_str)
            .unwrap_or("");
        println!("{:>3}  {:<20}  {:>8}  {}", i + 1, id, score, path);
    }
    for failure in &result.failures {
        eprintln!(
            "warning: shard {} ({}) {}: {}",
            failure.shard,
            failure.name,
            failure.kind.as_label(),
            failure.message
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ShardFailure;
    use crate::model::ShardStatus;
    use crate::shard::DocId;

    fn sample() -> MergedResult {
        MergedResult {
            count: 2,
            ids: vec![DocId(7), DocId(3)],
            scores: vec![2.5, 1.0],
            failures: vec![ShardFailure {
                shard: 1,
                name: "shard-001".to_string(),
                kind: ShardStatus::Timeout,
                message: "no answer within 50ms".to_string(),
            }],
            total_candidates: 4,
            ..Default::default()
        }
    }

    #[test]
    fn rows_follow_requested_fields() {
        let rows = result_rows(&sample());
        assert_eq!(rows[0], json!({"rank": 1, "id": 7, "score": 2.5}));
        assert_eq!(rows[1], json!({"rank": 2, "id": 3, "score": 1.0}));

        let bare = MergedResult {
            count: 1,
            ..Default::default()
        };
        assert_eq!(result_rows(&bare), vec![json!({"rank": 1})]);
    }

    #[test]
    fn failures_become_warnings() -> Result<()> {
        let request = SearchRequest::new("alpha", 2);
        let resp = JsonResponse::from_search(&request, &sample())?;
        assert_eq!(
            resp.warnings,
            vec!["shard 1 (shard-001) timeout: no answer within 50ms".to_string()]
        );
        let stats = resp.stats.expect("stats");
        assert_eq!(stats.partial, Some(true));
        assert_eq!(stats.total_candidates, Some(4));
        Ok(())
    }

    #[test]
    fn error_envelope_shape() {
        let value = serde_json::to_value(JsonResponse::error("shard_failed", "boom"))
            .expect("serialize");
        assert_eq!(value["ok"], json!(false));
        assert_eq!(value["error"]["code"], json!("shard_failed"));
        assert!(value.get("results").is_none());
        assert!(value.get("warnings").is_none());
    }
}
