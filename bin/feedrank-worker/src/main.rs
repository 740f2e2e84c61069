//! FeedRank worker
//!
//! Runs a file of merge jobs against an in-process store: each job's
//! candidates are dispatched to the ranker in batches and merged into the
//! user's cached feed. All jobs run concurrently.

mod jobs;

use anyhow::{Context, Result};
use clap::Parser;
use feedrank_common::{Config, Mode, UserId};
use feedrank_merge::{BatchDispatcher, MergeCacheEngine};
use feedrank_store::{MemoryStore, RankedCacheStore, keys};
use futures::future::join_all;
use jobs::{Job, JobFile, TableRanker};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "feedrank-worker")]
#[command(about = "FeedRank feed merge worker")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/feedrank/worker.toml")]
    config: PathBuf,

    /// Job file (JSON)
    #[arg(short, long)]
    jobs: PathBuf,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print merge metrics in Prometheus format after the run
    #[arg(long)]
    metrics: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load config file if it exists
    let config: Config = if args.config.exists() {
        let config_str = std::fs::read_to_string(&args.config)
            .with_context(|| format!("Failed to read config {}", args.config.display()))?;
        toml::from_str(&config_str).unwrap_or_else(|e| {
            eprintln!("Warning: Failed to parse config file: {}", e);
            Config::default()
        })
    } else {
        Config::default()
    };
    config.validate()?;

    // CLI takes precedence over the config file
    let log_level = if args.log_level != "info" {
        args.log_level.clone()
    } else {
        config.logging.level.clone()
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting FeedRank worker");
    info!("Config file: {}", args.config.display());

    let job_str = std::fs::read_to_string(&args.jobs)
        .with_context(|| format!("Failed to read job file {}", args.jobs.display()))?;
    let job_file: JobFile = serde_json::from_str(&job_str)
        .with_context(|| format!("Failed to parse job file {}", args.jobs.display()))?;
    info!("Loaded {} jobs from {}", job_file.jobs.len(), args.jobs.display());

    let store = Arc::new(MemoryStore::new());
    let shared: Arc<dyn RankedCacheStore> = store.clone();
    let engine = Arc::new(MergeCacheEngine::new(shared, config.clone()));

    let feeds: BTreeSet<(String, String)> = job_file
        .jobs
        .iter()
        .map(|job| (job.user.clone(), job.mode.clone()))
        .collect();

    let runs = job_file.jobs.into_iter().enumerate().map(|(index, job)| {
        let engine = engine.clone();
        let config = config.clone();
        tokio::spawn(async move {
            let label = format!("{}/{}", job.user, job.mode);
            let outcome = run_job(&engine, &config, job).await;
            (index, label, outcome)
        })
    });

    let mut failed = 0;
    for joined in join_all(runs).await {
        match joined {
            Ok((index, label, Ok(true))) => info!("Job {} ({}) committed", index, label),
            Ok((index, label, Ok(false))) => {
                warn!("Job {} ({}) abandoned: lock budget exhausted", index, label);
            }
            Ok((index, label, Err(e))) => {
                error!("Job {} ({}) failed: {:#}", index, label, e);
                failed += 1;
            }
            Err(e) => {
                error!("Job task failed: {}", e);
                failed += 1;
            }
        }
    }

    let purged = store.purge_expired();
    info!(
        "Purged {} expired keys, {} keys remain",
        purged,
        store.key_count()
    );

    for (user, mode) in &feeds {
        let (Ok(user_id), Ok(mode_id)) = (UserId::new(user.as_str()), Mode::new(mode.as_str()))
        else {
            continue;
        };
        let pool = engine.read_pool(&user_id, &mode_id).await?;
        let counts = engine.read_category_counts(&user_id, &mode_id).await?;
        match store.ttl(&keys::pool_key(&user_id, &mode_id)) {
            Some(ttl) => println!("{user}/{mode} (expires in {}s):", ttl.as_secs()),
            None => println!("{user}/{mode}:"),
        }
        for (rank, entry) in pool.iter().enumerate() {
            println!("  {:>3}. {} ({})", rank + 1, entry.id, entry.score);
        }
        for (category, count) in &counts {
            println!("  category {category}: {count}");
        }
    }

    if args.metrics {
        print!("{}", engine.metrics().export_prometheus());
    }

    if failed > 0 {
        anyhow::bail!("{} jobs failed", failed);
    }
    Ok(())
}

async fn run_job(engine: &MergeCacheEngine, config: &Config, job: Job) -> Result<bool> {
    let user = job
        .user_id()
        .with_context(|| format!("Invalid user {:?}", job.user))?;
    let mode = job
        .mode()
        .with_context(|| format!("Invalid mode {:?}", job.mode))?;

    if let Some(capacity) = job.stored_capacity {
        engine.set_capacity(&user, &mode, capacity).await?;
    }

    let dispatcher = BatchDispatcher::new(
        Arc::new(TableRanker::new(&job.candidates)),
        config.dispatch.clone(),
    );
    let output_size = job.output_size.unwrap_or(config.dispatch.output_size);
    let pending = dispatcher.dispatch(&user, &mode, job.candidate_ids(), output_size)?;

    Ok(engine
        .process_batches(&user, &mode, pending, job.capacity)
        .await?)
}
