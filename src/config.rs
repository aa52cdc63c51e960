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
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;

use crate::dispatch::DEFAULT_MAX_THREADS;
use crate::dispatch::DispatchOptions;
use crate::dispatch::FailurePolicy;
use crate::index::MANIFEST_FILE;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub index_dir: PathBuf,
    pub shard_count: usize,
    pub max_threads: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard_timeout_ms: Option<u64>,
    pub failure_policy: FailurePolicy,
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            index_dir: PathBuf::from("shards"),
            shard_count: 4,
            max_threads: DEFAULT_MAX_THREADS,
            shard_timeout_ms: None,
            failure_policy: FailurePolicy::Isolate,
            default_limit: 10,
            max_limit: 1000,
        }
    }
}

impl Config {
    pub fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions {
            max_threads: self.max_threads,
            shard_timeout: self.shard_timeout_ms.map(Duration::from_millis),
            failure_policy: self.failure_policy,
        }
    }

    fn normalize(mut self) -> Self {
        self.shard_count = self.shard_count.max(1);
        self.max_threads = self.max_threads.max(1);
        if self.default_limit > self.max_limit {
            self.default_limit = self.max_limit;
        }
        self
    }
}

#[derive(Debug, Clone)]
pub struct ConfigCtx {
    pub root: PathBuf,
    pub config: Config,
}

impl ConfigCtx {
    pub fn load_from_cwd() -> Result<Self> {
        let cwd = std::env::current_dir().context("get current dir")?;
        Self::load_from(&cwd)
    }

    pub fn load_from(start: &Path) -> Result<Self> {
        let config = load_global_config()?;
        let root = find_index_root(start, &config.index_dir)
            .ok_or_else(|| anyhow::anyhow!("index not found; run `shardsearch init` first"))?;
        Ok(Self { root, config })
    }

    pub fn index_path(&self) -> PathBuf {
        if self.config.index_dir.is_absolute() {
            self.config.index_dir.clone()
        } else {
            self.root.join(&self.config.index_dir)
        }
    }
}

fn config_dir() -> Option<PathBuf> {
    if cfg!(target_os = "windows") {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return Some(PathBuf::from(appdata));
        }
        if let Ok(profile) = std::env::var("USERPROFILE") {
            return Some(PathBuf::from(profile).join("AppData").join("Roaming"));
        }
        return None;
    }

    if cfg!(target_os = "macos") {
        let home = std::env::var("HOME").ok()?;
        return Some(
            PathBuf::from(home)
                .join("Library")
                .join("Application Support"),
        );
    }

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg));
    }
    let home = std::env::var("HOME").ok()?;
    Some(PathBuf::from(home).join(".config"))
}

pub fn global_config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("shardsearch").join("shardsearch.toml"))
}

pub fn load_global_config() -> Result<Config> {
    let Some(path) = global_config_path() else {
        return Ok(Config::default());
    };
    if !path.exists() {
        return Ok(Config::default());
    }
    read_config(&path)
}

/// Walks up from `start` looking for `index_dir/manifest.toml`.
pub fn find_index_root(start: &Path, index_dir: &Path) -> Option<PathBuf> {
    if index_dir.is_absolute() {
        return index_dir
            .join(MANIFEST_FILE)
            .exists()
            .then(|| index_dir.parent().unwrap_or(index_dir).to_path_buf());
    }

    let mut cur = start.canonicalize().unwrap_or_else(|_| start.to_path_buf());
    loop {
        if cur.join(index_dir).join(MANIFEST_FILE).exists() {
            return Some(cur);
        }
        match cur.parent() {
            Some(parent) => cur = parent.to_path_buf(),
            None => return None,
        }
    }
}

pub fn read_config(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let config: Config = toml::from_str(&text).context("parse shardsearch.toml")?;
    Ok(config.normalize())
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::path::PathBuf;
    use std::sync::Mutex;

    use tempfile::tempdir;

    use super::*;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn config_path(config_root: &Path) -> PathBuf {
        let base = if cfg!(target_os = "macos") {
            config_root.join("Library").join("Application Support")
        } else {
            config_root.to_path_buf()
        };
        base.join("shardsearch").join("shardsearch.toml")
    }

    fn with_env<T>(config_root: &Path, f: impl FnOnce() -> T) -> T {
        let _guard = ENV_LOCK.lock().expect("env lock");
        let old_xdg = std::env::var("XDG_CONFIG_HOME").ok();
        let old_home = std::env::var("HOME").ok();
        let old_appdata = std::env::var("APPDATA").ok();
        set_env_var("XDG_CONFIG_HOME", config_root);
        set_env_var("HOME", config_root);
        set_env_var("APPDATA", config_root);
        let result = f();
        match old_xdg {
            Some(val) => set_env_var("XDG_CONFIG_HOME", val),
            None => remove_env_var("XDG_CONFIG_HOME"),
        }
        match old_home {
            Some(val) => set_env_var("HOME", val),
            None => remove_env_var("HOME"),
        }
        match old_appdata {
            Some(val) => set_env_var("APPDATA", val),
            None => remove_env_var("APPDATA"),
        }
        result
    }

    fn set_env_var(key: &str, value: impl AsRef<std::ffi::OsStr>) {
        unsafe {
            std::env::set_var(key, value);
        }
    }

    fn remove_env_var(key: &str) {
        unsafe {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn find_index_root_walks_up() {
        let dir = tempdir().expect("tempdir");
        let root = dir.path().join("repo");
        let nested = root.join("a").join("b");
        std::fs::create_dir_all(&nested).expect("mkdir");
        std::fs::create_dir_all(root.join("shards")).expect("mkdir shards");
        std::fs::write(root.join("shards").join(MANIFEST_FILE), "shard_count = 2").expect("write");

        let found = find_index_root(&nested, Path::new("shards"));
        let expected = root.canonicalize().unwrap_or(root);
        assert_eq!(found, Some(expected));
    }

    #[test]
    fn bare_index_dir_is_not_an_index() {
        let dir = tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("shards")).expect("mkdir");
        assert_eq!(find_index_root(dir.path(), Path::new("shards")), None);
    }

    #[test]
    fn load_from_errors_when_index_missing() {
        let config_dir = tempdir().expect("config dir");
        let work_dir = tempdir().expect("work dir");
        with_env(config_dir.path(), || {
            let err = ConfigCtx::load_from(work_dir.path()).unwrap_err();
            assert!(err.to_string().contains("index not found"));
        });
    }

    #[test]
    fn global_config_overrides_defaults() {
        let config_dir = tempdir().expect("config dir");
        let path = config_path(config_dir.path());
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(
            &path,
            "max_threads = 0\nshard_timeout_ms = 250\nfailure_policy = \"abort\"\n",
        )
        .expect("write config");
        let config = with_env(config_dir.path(), || load_global_config().expect("load"));
        assert_eq!(config.max_threads, 1);
        assert_eq!(config.shard_count, 4);
        assert_eq!(config.failure_policy, FailurePolicy::Abort);

        let options = config.dispatch_options();
        assert_eq!(options.shard_timeout, Some(Duration::from_millis(250)));
        assert_eq!(options.max_threads, 1);
    }

    #[test]
    fn missing_global_config_uses_defaults() {
        let config_dir = tempdir().expect("config dir");
        let config = with_env(config_dir.path(), || load_global_config().expect("load"));
        assert_eq!(config.index_dir, PathBuf::from("shards"));
        assert_eq!(config.max_threads, DEFAULT_MAX_THREADS);
        assert_eq!(config.shard_timeout_ms, None);
    }
}
