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

use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use globset::Glob;
use globset::GlobSet;
use globset::GlobSetBuilder;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::debug;
use walkdir::WalkDir;

use crate::index::Index;
use crate::shard::DocId;
use crate::store::NewDoc;
use crate::store::Store;
use crate::store::StoreMode;
use crate::store::Upsert;

#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    pub glob: Option<String>,
    pub ignore: Vec<String>,
    pub tag: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub docs_added: usize,
    pub docs_updated: usize,
    pub docs_skipped: usize,
    pub per_shard: Vec<usize>,
    #[serde(skip)]
    pub warnings: Vec<String>,
}

struct Filters {
    include: Option<GlobSet>,
    ignore: GlobSet,
    index_dir: PathBuf,
}

impl Filters {
    fn is_index_dir(&self, path: &Path) -> bool {
        path.canonicalize()
            .map(|p| p == self.index_dir)
            .unwrap_or(false)
    }

    fn accepts(&self, path: &Path) -> bool {
        if !self.ignore.is_empty() && self.ignore.is_match(path) {
            return false;
        }
        match &self.include {
            Some(set) => set.is_match(path),
            None => true,
        }
    }
}

/// Indexes every file under `paths` into the shard that owns it.
pub fn ingest_paths(index: &Index, paths: Vec<PathBuf>, opts: &IngestOptions) -> Result<IngestReport> {
    let filters = Filters {
        include: build_globset(opts.glob.as_deref())?,
        ignore: build_ignore_set(&opts.ignore)?,
        index_dir: index.dir.canonicalize().unwrap_or_else(|_| index.dir.clone()),
    };
    let stores = index.open_stores(StoreMode::ReadWrite)?;

    let mut report = IngestReport {
        per_shard: vec![0; stores.len()],
        ..Default::default()
    };

    for path in resolve_paths(paths) {
        if path.is_file() {
            ingest_file(index, &stores, &path, &filters, opts, &mut report)?;
        } else if path.is_dir() {
            let walker = WalkDir::new(&path)
                .into_iter()
                .filter_entry(|e| !(e.file_type().is_dir() && filters.is_index_dir(e.path())));
            for entry in walker.filter_map(|e| e.ok()) {
                if entry.file_type().is_file() {
                    ingest_file(index, &stores, entry.path(), &filters, opts, &mut report)?;
                }
            }
        } else {
            report
                .warnings
                .push(format!("path not found: {}", path.display()));
        }
    }

    Ok(report)
}

fn resolve_paths(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    if paths.is_empty() {
        vec![PathBuf::from(".")]
    } else {
        paths
    }
}

fn build_globset(pattern: Option<&str>) -> Result<Option<GlobSet>> {
    if let Some(pat) = pattern {
        let mut builder = GlobSetBuilder::new();
        builder.add(Glob::new(pat)?);
        let set = builder.build()?;
        Ok(Some(set))
    } else {
        Ok(None)
    }
}

fn build_ignore_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        builder.add(Glob::new(pat)?);
    }
    Ok(builder.build()?)
}

fn ingest_file(
    index: &Index,
    stores: &[Store],
    path: &Path,
    filters: &Filters,
    opts: &IngestOptions,
    report: &mut IngestReport,
) -> Result<()> {
    if !filters.accepts(path) {
        debug!(path = %path.display(), "filtered out");
        return Ok(());
    }

    let canonical = path
        .canonicalize()
        .with_context(|| format!("canonicalize {}", path.display()))?;
    if canonical.starts_with(&filters.index_dir) {
        debug!(path = %canonical.display(), "inside the index directory");
        return Ok(());
    }
    let path_str = canonical.to_string_lossy().into_owned();

    let text = match std::fs::read_to_string(&canonical) {
        Ok(t) => t,
        Err(_) => {
            debug!(path = %path_str, "skipping unreadable or non-text file");
            report
                .warnings
                .push(format!("skip non-text file: {path_str}"));
            return Ok(());
        }
    };

    let metadata =
        std::fs::metadata(&canonical).with_context(|| format!("metadata {path_str}"))?;
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| OffsetDateTime::from(t).format(&Rfc3339).ok())
        .unwrap_or_default();

    let id = doc_id_for(&path_str);
    let shard = index.shard_for(id);
    let doc = NewDoc {
        id,
        path: path_str,
        mtime,
        size: metadata.len(),
        hash: sha256_hex(text.as_bytes()),
        tag: opts.tag.clone(),
        text,
    };

    match stores[shard].upsert_doc(&doc)? {
        Upsert::Inserted => {
            report.docs_added += 1;
            report.per_shard[shard] += 1;
        }
        Upsert::Updated => {
            report.docs_updated += 1;
            report.per_shard[shard] += 1;
        }
        Upsert::Unchanged => {
            debug!(path = %doc.path, shard, "content unchanged");
            report.docs_skipped += 1;
        }
    }
    Ok(())
}

/// Stable id for a document path: the low 63 bits of its SHA-256, so it
/// round-trips through SQLite's signed integers.
pub fn doc_id_for(path: &str) -> DocId {
    let digest = Sha256::digest(path.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    DocId(u64::from_le_bytes(bytes) & (u64::MAX >> 1))
}

fn sha256_hex(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    let digest = hasher.finalize();
    hex::encode(digest)
}
