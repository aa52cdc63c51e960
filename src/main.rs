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

mod cli;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;
use anyhow::Result;
use clap::Parser;
use serde_json::json;
use shardsearch::FailurePolicy;
use shardsearch::FanoutError;
use shardsearch::SearchRequest;
use shardsearch::config;
use shardsearch::config::ConfigCtx;
use shardsearch::index::Index;
use shardsearch::ingest;
use shardsearch::output::JsonResponse;
use shardsearch::output::StatsOut;
use shardsearch::output::print_json;
use shardsearch::output::print_table;
use shardsearch::store::StoreMode;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use crate::cli::AddArgs;
use crate::cli::Cli;
use crate::cli::Commands;
use crate::cli::SearchArgs;

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("SHARDSEARCH_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init { path, shards } => cmd_init(path, shards),
        Commands::Add(args) => {
            let json = args.json;
            handle_result(cmd_add(args), json)
        }
        Commands::Search(args) => {
            let json = args.json;
            handle_result(cmd_search(args), json)
        }
        Commands::Stats { json } => handle_result(cmd_stats(json), json),
    }
}

fn handle_result(result: Result<()>, json: bool) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(err) => {
            if json {
                let code = err
                    .downcast_ref::<FanoutError>()
                    .map(FanoutError::code)
                    .unwrap_or("error");
                let mut resp = JsonResponse::error(code, &format!("{err:#}"));
                if err.to_string().starts_with("index not found") {
                    resp = resp.with_hint("run `shardsearch init` first");
                }
                print_json(&resp)?;
                Ok(())
            } else {
                Err(err)
            }
        }
    }
}

fn cmd_init(path: Option<PathBuf>, shards: Option<usize>) -> Result<()> {
    let root = path.unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&root).with_context(|| format!("create dir {root:?}"))?;

    let config = config::load_global_config()?;
    let index_dir = if config.index_dir.is_absolute() {
        config.index_dir.clone()
    } else {
        root.join(&config.index_dir)
    };
    let shard_count = shards.unwrap_or(config.shard_count);
    let index = Index::init(&index_dir, shard_count)?;

    println!(
        "Initialized shardsearch index with {} shards at {}",
        index.shard_count(),
        index_dir.display()
    );
    Ok(())
}

fn cmd_add(args: AddArgs) -> Result<()> {
    let ctx = ConfigCtx::load_from_cwd()?;
    let index = Index::open(&ctx.index_path())?;

    let opts = ingest::IngestOptions {
        glob: args.glob,
        ignore: args.ignore,
        tag: args.tag,
    };
    let report = ingest::ingest_paths(&index, args.paths, &opts)?;

    if args.json {
        let stats = StatsOut {
            total_hits: report.docs_added as i64,
            shard_count: Some(index.shard_count()),
            docs_updated: Some(report.docs_updated as i64),
            docs_skipped: Some(report.docs_skipped as i64),
            per_shard: Some(report.per_shard.clone()),
            ..Default::default()
        };
        let resp = JsonResponse::ok()
            .with_stats(stats)
            .with_warnings(report.warnings);
        print_json(&resp)?;
    } else {
        println!(
            "Added {} docs, updated {}, unchanged {}",
            report.docs_added, report.docs_updated, report.docs_skipped
        );
        for warn in report.warnings {
            eprintln!("warning: {warn}");
        }
    }

    Ok(())
}

fn cmd_search(args: SearchArgs) -> Result<()> {
    let ctx = ConfigCtx::load_from_cwd()?;
    let limit = args.limit.unwrap_or(ctx.config.default_limit);
    if limit > ctx.config.max_limit {
        anyhow::bail!("limit {limit} exceeds max_limit {}", ctx.config.max_limit);
    }

    let mut request = SearchRequest::new(args.query, limit)
        .with_offset(args.offset)
        .with_documents(args.documents)
        .with_prefetch(args.prefetch);
    if let Some(min_score) = args.min_score {
        if !min_score.is_finite() {
            anyhow::bail!("min-score must be a finite number");
        }
        request = request.with_min_score(min_score);
    }
    request.return_scores = !args.no_scores;
    request.return_doc_ids = !args.no_ids;

    let mut options = ctx.config.dispatch_options();
    if let Some(ms) = args.timeout_ms {
        options.shard_timeout = Some(Duration::from_millis(ms));
    }
    if args.fail_fast {
        options.failure_policy = FailurePolicy::Abort;
    }

    let index = Index::open(&ctx.index_path())?;
    let dispatcher = index.dispatcher(options)?;
    let result = dispatcher.query(&request)?;

    if args.json {
        print_json(&JsonResponse::from_search(&request, &result)?)?;
    } else {
        print_table(&result);
    }
    Ok(())
}

fn cmd_stats(json: bool) -> Result<()> {
    let ctx = ConfigCtx::load_from_cwd()?;
    let index = Index::open(&ctx.index_path())?;
    let stores = index.open_stores(StoreMode::ReadOnly)?;

    let mut shards = Vec::with_capacity(stores.len());
    let mut doc_count = 0i64;
    let mut db_size_bytes = 0u64;
    for (shard, store) in stores.iter().enumerate() {
        let stats = store.stats()?;
        doc_count += stats.doc_count;
        db_size_bytes += stats.db_size_bytes;
        shards.push(json!({
            "shard": shard,
            "doc_count": stats.doc_count,
            "db_size_bytes": stats.db_size_bytes,
        }));
    }

    if json {
        let stats = StatsOut {
            shard_count: Some(index.shard_count()),
            doc_count: Some(doc_count),
            db_size_bytes: Some(db_size_bytes),
            ..Default::default()
        };
        let resp = JsonResponse::ok().with_stats(stats).with_shards(shards);
        print_json(&resp)?;
    } else {
        println!("Shards: {}", index.shard_count());
        println!("Docs: {doc_count}");
        println!("DB size: {db_size_bytes} bytes");
        for row in &shards {
            println!(
                "  shard {}: {} docs",
                row["shard"], row["doc_count"]
            );
        }
    }

    Ok(())
}
