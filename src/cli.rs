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

use std::path::PathBuf;

use clap::Args;
use clap::Parser;
use clap::Subcommand;

#[derive(Parser, Debug)]
#[command(
    name = "shardsearch",
    version,
    about = "Full-text search fanned out over a sharded SQLite index"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new sharded index
    Init {
        /// Directory that will hold the index
        path: Option<PathBuf>,

        /// Number of shards (defaults to the configured shard_count)
        #[arg(long)]
        shards: Option<usize>,
    },

    /// Add documents to the index
    Add(AddArgs),

    /// Search every shard and merge by score
    Search(SearchArgs),

    /// Show per-shard stats
    Stats {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Files or directories to add
    pub paths: Vec<PathBuf>,

    /// Glob to include
    #[arg(long)]
    pub glob: Option<String>,

    /// Ignore globs
    #[arg(long)]
    pub ignore: Vec<String>,

    /// Tag for documents
    #[arg(long)]
    pub tag: Option<String>,

    /// Output JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Query text
    pub query: String,

    /// Number of results (defaults to the configured default_limit)
    #[arg(long)]
    pub limit: Option<usize>,

    /// Skip this many merged results
    #[arg(long, default_value_t = 0)]
    pub offset: usize,

    /// Drop results scoring below this value
    #[arg(long)]
    pub min_score: Option<f32>,

    /// Leave scores out of the results
    #[arg(long)]
    pub no_scores: bool,

    /// Leave document ids out of the results
    #[arg(long)]
    pub no_ids: bool,

    /// Include stored documents
    #[arg(long)]
    pub documents: bool,

    /// Read documents while ranking instead of afterwards
    #[arg(long)]
    pub prefetch: bool,

    /// Give up on a shard this many milliseconds after it starts running
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Fail the whole search when any shard fails
    #[arg(long)]
    pub fail_fast: bool,

    /// Output JSON
    #[arg(long)]
    pub json: bool,
}
