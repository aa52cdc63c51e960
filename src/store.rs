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

use std::fs;
use std::fs::File;
use std::fs::OpenOptions;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::thread::sleep;
use std::time::Duration;
use std::time::Instant;

use anyhow::Context;
use anyhow::Result;
use fs2::FileExt;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::ToSql;
use rusqlite::params;
use serde_json::json;
use sha2::Digest;
use sha2::Sha256;

use crate::shard::DocId;
use crate::shard::Shard;
use crate::shard::ShardQuery;
use crate::shard::ShardResponse;
use crate::shard::ShardTimings;

pub struct Store {
    pub conn: Connection,
    pub path: PathBuf,
    lock: Option<StoreLock>,
}

struct StoreLock {
    _file: File,
    path: PathBuf,
    mode: StoreMode,
}

impl StoreLock {
    fn new(file: File, path: PathBuf, mode: StoreMode) -> Self {
        Self {
            _file: file,
            path,
            mode,
        }
    }
}

const SCHEMA_VERSION: i64 = 1;
const FTS_VERSION: &str = "fts5-v1";

#[derive(Debug, Clone, Copy)]
pub enum StoreMode {
    ReadOnly,
    ReadWrite,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreStats {
    pub doc_count: i64,
    pub db_size_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct NewDoc {
    pub id: DocId,
    pub path: String,
    pub mtime: String,
    pub size: u64,
    pub hash: String,
    pub tag: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
    Unchanged,
}

impl Store {
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("shard already exists at {}", path.display());
        }
        let _lock = Self::acquire_lock(path, StoreMode::ReadWrite)?;
        let conn = Self::open_connection(path, StoreMode::ReadWrite)?;
        Self::apply_pragmas(&conn, StoreMode::ReadWrite)?;
        Self::create_schema(&conn)?;
        Self::set_meta(&conn, "schema_version", &SCHEMA_VERSION.to_string())?;
        Self::set_meta(&conn, "fts_version", FTS_VERSION)?;
        Ok(())
    }

    pub fn open(path: &Path, mode: StoreMode) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("shard not found at {}", path.display());
        }
        let lock = Self::acquire_lock(path, mode)?;
        let conn = Self::open_connection(path, mode)?;
        Self::apply_pragmas(&conn, mode)?;
        let version = Self::schema_version(&conn)?;
        if version != SCHEMA_VERSION {
            anyhow::bail!(
                "shard {} has schema version {}, expected {}",
                path.display(),
                version,
                SCHEMA_VERSION
            );
        }
        Ok(Self {
            conn,
            path: path.to_path_buf(),
            lock: Some(lock),
        })
    }

    fn open_connection(path: &Path, mode: StoreMode) -> Result<Connection> {
        let flags = match mode {
            StoreMode::ReadOnly => OpenFlags::SQLITE_OPEN_READ_ONLY,
            StoreMode::ReadWrite => {
                OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
            }
        };
        let conn = Connection::open_with_flags(path, flags)
            .with_context(|| format!("open {}", path.display()))?;
        conn.busy_timeout(Duration::from_millis(5000))
            .context("set busy timeout")?;
        Ok(conn)
    }

    fn apply_pragmas(conn: &Connection, mode: StoreMode) -> Result<()> {
        if matches!(mode, StoreMode::ReadWrite) {
            conn.execute_batch("PRAGMA journal_mode=DELETE;\nPRAGMA synchronous=NORMAL;")
                .context("apply pragmas")?;
        }
        Ok(())
    }

    fn lock_path_for(path: &Path) -> Result<PathBuf> {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string_lossy().as_bytes());
        let hash = hex::encode(hasher.finalize());
        let mut dir = std::env::temp_dir();
        dir.push("shardsearch");
        fs::create_dir_all(&dir).with_context(|| format!("create lock dir {}", dir.display()))?;
        Ok(dir.join(format!("shard-{hash}.lock")))
    }

    fn acquire_lock(path: &Path, mode: StoreMode) -> Result<StoreLock> {
        let lock_path = Self::lock_path_for(path)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("open lock file {}", lock_path.display()))?;
        let deadline = Instant::now() + Duration::from_millis(5000);
        loop {
            let locked = match mode {
                StoreMode::ReadOnly => FileExt::try_lock_shared(&file),
                StoreMode::ReadWrite => FileExt::try_lock_exclusive(&file),
            };
            match locked {
                Ok(()) => return Ok(StoreLock::new(file, lock_path, mode)),
                Err(_) if Instant::now() >= deadline => {
                    let mode_label = match mode {
                        StoreMode::ReadOnly => "read",
                        StoreMode::ReadWrite => "write",
                    };
                    anyhow::bail!(
                        "shard is locked for {mode_label} access; another process may be using {}",
                        path.display()
                    );
                }
                Err(_) => {
                    sleep(Duration::from_millis(50));
                }
            }
        }
    }

    fn create_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS meta (\n  key TEXT PRIMARY KEY,\n  value TEXT\n);\n\nCREATE TABLE IF NOT EXISTS doc (\n  rowid INTEGER PRIMARY KEY,\n  id INTEGER UNIQUE NOT NULL,\n  path TEXT NOT NULL,\n  mtime TEXT,\n  size INTEGER,\n  hash TEXT,\n  tag TEXT,\n  text TEXT NOT NULL\n);\n\nCREATE INDEX IF NOT EXISTS idx_doc_path ON doc(path);\n\nCREATE VIRTUAL TABLE IF NOT EXISTS doc_fts USING fts5(text, content='doc', content_rowid='rowid');\n\nCREATE TRIGGER IF NOT EXISTS doc_ai AFTER INSERT ON doc BEGIN\n  INSERT INTO doc_fts(rowid, text) VALUES (new.rowid, new.text);\nEND;\n\nCREATE TRIGGER IF NOT EXISTS doc_ad AFTER DELETE ON doc BEGIN\n  INSERT INTO doc_fts(doc_fts, rowid, text) VALUES('delete', old.rowid, old.text);\nEND;\n\nCREATE TRIGGER IF NOT EXISTS doc_au AFTER UPDATE ON doc BEGIN\n  INSERT INTO doc_fts(doc_fts, rowid, text) VALUES('delete', old.rowid, old.text);\n  INSERT INTO doc_fts(rowid, text) VALUES (new.rowid, new.text);\nEND;",
        )
        .context("create schema")?;
        Ok(())
    }

    fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
            params![key, value],
        )
        .context("set meta")?;
        Ok(())
    }

    fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                params![name],
                |row| row.get(0),
            )
            .context("check table")?;
        Ok(count > 0)
    }

    fn schema_version(conn: &Connection) -> Result<i64> {
        if !Self::table_exists(conn, "meta")? {
            return Ok(0);
        }
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key='schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()
            .context("read schema_version")?;
        Ok(value.and_then(|v| v.parse::<i64>().ok()).unwrap_or(0))
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let doc_count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM doc", [], |row| row.get(0))
            .context("count docs")?;
        let db_size_bytes = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        Ok(StoreStats {
            doc_count,
            db_size_bytes,
        })
    }

    pub fn doc_hash(&self, id: DocId) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT hash FROM doc WHERE id = ?1",
                params![id.0 as i64],
                |row| row.get(0),
            )
            .optional()
            .context("read doc hash")
            .map(Option::flatten)
    }

    pub fn upsert_doc(&self, doc: &NewDoc) -> Result<Upsert> {
        let existing = self.doc_hash(doc.id)?;
        if existing.as_deref() == Some(doc.hash.as_str()) {
            return Ok(Upsert::Unchanged);
        }
        self.conn
            .execute(
                "INSERT INTO doc (id, path, mtime, size, hash, tag, text)\n             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)\n             ON CONFLICT(id) DO UPDATE SET\n               path=excluded.path, mtime=excluded.mtime, size=excluded.size,\n               hash=excluded.hash, tag=excluded.tag, text=excluded.text",
                params![
                    doc.id.0 as i64,
                    doc.path,
                    doc.mtime,
                    doc.size as i64,
                    doc.hash,
                    doc.tag,
                    doc.text
                ],
            )
            .with_context(|| format!("upsert {}", doc.path))?;
        Ok(if existing.is_some() {
            Upsert::Updated
        } else {
            Upsert::Inserted
        })
    }

    /// Ranks documents matching `query.text` by BM25, best first.
    ///
    /// With `prefetch`, document payloads are read by the ranking statement
    /// itself. Without it they are looked up afterwards for the returned ids
    /// only, and that lookup is what `prefetch_took` measures.
    pub fn search(&self, query: &ShardQuery) -> Result<ShardResponse> {
        let started = Instant::now();
        let mut timings = ShardTimings::default();

        let phase = Instant::now();
        let terms = literal_terms(&query.text);
        timings.parsing_took = elapsed_ms(phase);

        let phase = Instant::now();
        if !query.min_score.is_finite() {
            anyhow::bail!("min_score must be finite, got {}", query.min_score);
        }
        let limit = i64::try_from(query.limit).context("limit out of range")?;
        let offset = i64::try_from(query.offset).context("offset out of range")?;
        timings.validation_took = elapsed_ms(phase);

        if terms.is_empty() || limit == 0 {
            timings.response_took_total = elapsed_ms(started);
            return Ok(ShardResponse {
                timings,
                ..Default::default()
            });
        }

        let inline_docs = query.prefetch && query.return_documents;
        let columns = if inline_docs {
            ", doc.path, doc.mtime, doc.tag, doc.text"
        } else {
            ""
        };
        let min_score = f64::from(query.min_score);
        let filter = if min_score > 0.0 {
            "\n         WHERE score >= ?4"
        } else {
            ""
        };
        let sql = format!(
            "SELECT * FROM (\n           SELECT doc.id AS id, -bm25(doc_fts) AS score{columns}\n           FROM doc_fts JOIN doc ON doc.rowid = doc_fts.rowid\n           WHERE doc_fts MATCH ?1\n         ){filter}\n         ORDER BY score DESC, id ASC\n         LIMIT ?2 OFFSET ?3"
        );

        let phase = Instant::now();
        let match_expr = terms.join(" ");
        let mut bound: Vec<&dyn ToSql> = vec![&match_expr, &limit, &offset];
        if min_score > 0.0 {
            bound.push(&min_score);
        }
        let mut stmt = self.conn.prepare_cached(&sql).context("prepare search")?;
        let rows = stmt.query_map(
            bound.as_slice(),
            |row| {
                let id: i64 = row.get(0)?;
                let score: f64 = row.get(1)?;
                let document = if inline_docs {
                    Some(document_json(
                        id,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                } else {
                    None
                };
                Ok((DocId(id as u64), score as f32, document))
            },
        )?;
        let mut docs = Vec::new();
        let mut scores = Vec::new();
        let mut documents = Vec::new();
        for row in rows {
            let (id, score, document) = row?;
            docs.push(id);
            scores.push(score);
            if let Some(document) = document {
                documents.push(document);
            }
        }
        timings.query_took = elapsed_ms(phase);

        if query.return_documents && !inline_docs {
            let phase = Instant::now();
            documents = self.fetch_documents(&docs)?;
            timings.prefetch_took = elapsed_ms(phase);
        }

        if !query.return_doc_ids {
            docs.clear();
        }
        if !query.return_scores {
            scores.clear();
        }
        timings.response_took_total = elapsed_ms(started);
        Ok(ShardResponse {
            docs,
            scores,
            documents,
            timings,
        })
    }

    pub fn fetch_documents(&self, ids: &[DocId]) -> Result<Vec<serde_json::Value>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT path, mtime, tag, text FROM doc WHERE id = ?1")
            .context("prepare document lookup")?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let document = stmt
                .query_row(params![id.0 as i64], |row| {
                    Ok(document_json(
                        id.0 as i64,
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                    ))
                })
                .optional()
                .with_context(|| format!("load document {id}"))?;
            out.push(document.unwrap_or(serde_json::Value::Null));
        }
        Ok(out)
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Some(lock) = self.lock.take() {
            let path = lock.path.clone();
            let mode = lock.mode;
            drop(lock);
            if matches!(mode, StoreMode::ReadWrite) {
                let _ = fs::remove_file(path);
            }
        }
    }
}

fn document_json(
    id: i64,
    path: String,
    mtime: Option<String>,
    tag: Option<String>,
    text: String,
) -> serde_json::Value {
    json!({
        "id": id,
        "path": path,
        "mtime": mtime,
        "tag": tag,
        "text": text,
    })
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}

/// Splits free text into quoted FTS5 terms so operators and punctuation in
/// user input are matched literally.
pub fn literal_terms(query: &str) -> Vec<String> {
    let mut terms = Vec::new();
    let mut current = String::new();
    for ch in query.chars() {
        if ch.is_alphanumeric() || ch == '_' {
            current.push(ch);
        } else if !current.is_empty() {
            terms.push(format!("\"{current}\""));
            current.clear();
        }
    }
    if !current.is_empty() {
        terms.push(format!("\"{current}\""));
    }
    terms
}

/// A `Store` exposed through the shard contract.
pub struct SqliteShard {
    name: String,
    store: Mutex<Store>,
}

impl SqliteShard {
    pub fn open(path: &Path) -> Result<Self> {
        let store = Store::open(path, StoreMode::ReadOnly)?;
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self {
            name,
            store: Mutex::new(store),
        })
    }
}

impl Shard for SqliteShard {
    fn name(&self) -> &str {
        &self.name
    }

    fn query(&self, query: &ShardQuery) -> Result<ShardResponse> {
        let store = self
            .store
            .lock()
            .map_err(|_| anyhow::anyhow!("shard {} connection poisoned", self.name))?;
        store
            .search(query)
            .with_context(|| format!("search {}", self.name))
    }
}
