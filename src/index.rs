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

//! On-disk layout of a sharded index: a manifest plus one SQLite file per
//! shard. The shard count is fixed when the index is created, since it
//! decides which shard owns each document.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::dispatch::DispatchOptions;
use crate::dispatch::Dispatcher;
use crate::shard::DocId;
use crate::shard::Shard;
use crate::store::SqliteShard;
use crate::store::Store;
use crate::store::StoreMode;

pub const MANIFEST_FILE: &str = "manifest.toml";
const MANIFEST_VERSION: i64 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub schema_version: i64,
    pub shard_count: usize,
    pub created: String,
}

#[derive(Debug, Clone)]
pub struct Index {
    pub dir: PathBuf,
    pub manifest: Manifest,
}

impl Index {
    pub fn init(dir: &Path, shard_count: usize) -> Result<Self> {
        if shard_count == 0 {
            anyhow::bail!("shard count must be at least 1");
        }
        let manifest_path = dir.join(MANIFEST_FILE);
        if manifest_path.exists() {
            anyhow::bail!("index already exists at {}", dir.display());
        }
        std::fs::create_dir_all(dir).with_context(|| format!("create dir {}", dir.display()))?;

        let manifest = Manifest {
            schema_version: MANIFEST_VERSION,
            shard_count,
            created: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .context("format timestamp")?,
        };
        let index = Self {
            dir: dir.to_path_buf(),
            manifest,
        };
        for shard in 0..shard_count {
            Store::init(&index.shard_path(shard))?;
        }
        let text = toml::to_string(&index.manifest).context("serialize manifest")?;
        std::fs::write(&manifest_path, text)
            .with_context(|| format!("write {}", manifest_path.display()))?;
        Ok(index)
    }

    pub fn open(dir: &Path) -> Result<Self> {
        let manifest_path = dir.join(MANIFEST_FILE);
        let text = std::fs::read_to_string(&manifest_path)
            .with_context(|| format!("read {}", manifest_path.display()))?;
        let manifest: Manifest = toml::from_str(&text).context("parse manifest.toml")?;
        if manifest.schema_version != MANIFEST_VERSION {
            anyhow::bail!(
                "index manifest version {} is not supported (expected {})",
                manifest.schema_version,
                MANIFEST_VERSION
            );
        }
        if manifest.shard_count == 0 {
            anyhow::bail!("index manifest declares zero shards");
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            manifest,
        })
    }

    pub fn shard_count(&self) -> usize {
        self.manifest.shard_count
    }

    pub fn shard_path(&self, shard: usize) -> PathBuf {
        self.dir.join(format!("shard-{shard:03}.db"))
    }

    pub fn shard_for(&self, id: DocId) -> usize {
        (id.0 % self.shard_count() as u64) as usize
    }

    pub fn open_stores(&self, mode: StoreMode) -> Result<Vec<Store>> {
        (0..self.shard_count())
            .map(|shard| Store::open(&self.shard_path(shard), mode))
            .collect()
    }

    pub fn open_shards(&self) -> Result<Vec<Arc<dyn Shard>>> {
        (0..self.shard_count())
            .map(|shard| {
                SqliteShard::open(&self.shard_path(shard)).map(|s| Arc::new(s) as Arc<dyn Shard>)
            })
            .collect()
    }

    pub fn dispatcher(&self, options: DispatchOptions) -> Result<Dispatcher> {
        let shards = self.open_shards()?;
        Ok(Dispatcher::new(shards, options)?)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn init_creates_every_shard() -> Result<()> {
        let dir = tempdir()?;
        let index_dir = dir.path().join("shards");
        let index = Index::init(&index_dir, 3)?;
        for shard in 0..3 {
            assert!(index.shard_path(shard).exists());
        }
        assert!(!index.shard_path(3).exists());

        let reopened = Index::open(&index_dir)?;
        assert_eq!(reopened.manifest, index.manifest);
        assert_eq!(reopened.open_stores(StoreMode::ReadOnly)?.len(), 3);
        Ok(())
    }

    #[test]
    fn init_twice_fails() -> Result<()> {
        let dir = tempdir()?;
        Index::init(dir.path(), 2)?;
        let err = Index::init(dir.path(), 2).unwrap_err();
        assert!(err.to_string().contains("already exists"));
        Ok(())
    }

    #[test]
    fn zero_shards_rejected() {
        let dir = tempdir().expect("tempdir");
        assert!(Index::init(dir.path(), 0).is_err());
    }

    #[test]
    fn shard_for_is_modulo() -> Result<()> {
        let dir = tempdir()?;
        let index = Index::init(dir.path(), 4)?;
        assert_eq!(index.shard_for(DocId(0)), 0);
        assert_eq!(index.shard_for(DocId(7)), 3);
        assert_eq!(index.shard_for(DocId(u64::MAX >> 1)), ((u64::MAX >> 1) % 4) as usize);
        Ok(())
    }

    #[test]
    fn dispatcher_covers_all_shards() -> Result<()> {
        let dir = tempdir()?;
        let index = Index::init(dir.path(), 5)?;
        let dispatcher = index.dispatcher(DispatchOptions::default())?;
        assert_eq!(dispatcher.shard_count(), 5);
        assert_eq!(dispatcher.pool_size(), 4);
        Ok(())
    }
}
