//! shardtable load generator
//!
//! Drives concurrent upserts and retrieves through a ShardedStore backed by
//! the in-memory table service and reports how they were batched.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use shardtable::service::memory::InMemoryTableService;
use shardtable::{Entity, ShardedStore, StoreConfig};
use tracing_subscriber::{fmt, EnvFilter};

/// shardtable load generator
#[derive(Parser, Debug)]
#[command(name = "shardtable-load")]
#[command(about = "Batching/sharding load generator against an in-memory table service")]
#[command(version)]
struct Args {
    /// Number of partitions
    #[arg(short, long, default_value = "200")]
    shards: u64,

    /// Keys written and read back per worker
    #[arg(short, long, default_value = "1000")]
    keys: usize,

    /// Concurrent worker threads
    #[arg(short, long, default_value = "8")]
    workers: usize,

    /// Value size in bytes
    #[arg(short = 'z', long, default_value = "64")]
    value_size: usize,

    /// Rows per query page returned by the service
    #[arg(short, long, default_value = "1000")]
    page_size: usize,

    /// Simulated latency per service call, in milliseconds
    #[arg(short, long, default_value = "0")]
    latency_ms: u64,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,shardtable=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("shardtable load v{}", shardtable::VERSION);
    tracing::info!(
        shards = args.shards,
        workers = args.workers,
        keys = args.keys,
        "starting"
    );

    let mut service = InMemoryTableService::with_page_size(args.page_size);
    if args.latency_ms > 0 {
        service = service.with_latency(Duration::from_millis(args.latency_ms));
    }
    let service = Arc::new(service);

    let config = StoreConfig::builder().shard_count(args.shards).build();
    let store = match ShardedStore::open(Arc::clone(&service), config) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!("Failed to open store: {}", e);
            std::process::exit(1);
        }
    };

    let started = Instant::now();
    if let Err(e) = run_phase(&store, &args, Phase::Write) {
        tracing::error!("Write phase failed: {}", e);
        std::process::exit(1);
    }
    let write_elapsed = started.elapsed();
    let write_stats = service.stats();
    service.reset_stats();

    let started = Instant::now();
    if let Err(e) = run_phase(&store, &args, Phase::Read) {
        tracing::error!("Read phase failed: {}", e);
        std::process::exit(1);
    }
    let read_elapsed = started.elapsed();
    let read_stats = service.stats();

    let total = args.keys * args.workers;
    tracing::info!(
        operations = total,
        batch_calls = write_stats.batch_calls(),
        elapsed_ms = write_elapsed.as_millis() as u64,
        "write phase"
    );
    tracing::info!(
        operations = total,
        page_calls = read_stats.page_calls(),
        elapsed_ms = read_elapsed.as_millis() as u64,
        "read phase"
    );
    tracing::info!(cycles = store.cycles_completed(), rows = service.row_count(), "done");

    store.dispose();
}

#[derive(Clone, Copy)]
enum Phase {
    Write,
    Read,
}

fn run_phase(
    store: &Arc<ShardedStore<Arc<InMemoryTableService>>>,
    args: &Args,
    phase: Phase,
) -> shardtable::Result<()> {
    let handles: Vec<_> = (0..args.workers)
        .map(|worker| {
            let store = Arc::clone(store);
            let keys = args.keys;
            let value = vec![b'x'; args.value_size];
            thread::spawn(move || -> shardtable::Result<()> {
                let entities = (0..keys).map(|i| {
                    let key = format!("w{}-k{}", worker, i).into_bytes();
                    match phase {
                        Phase::Write => Entity::new(key, value.clone()),
                        Phase::Read => Entity::key_only(key),
                    }
                });
                match phase {
                    Phase::Write => store.upsert(entities),
                    Phase::Read => {
                        let found = store.retrieve_entities(entities)?;
                        let missing = found.iter().filter(|e| !e.is_found()).count();
                        if missing > 0 {
                            tracing::warn!(worker, missing, "keys missing on read back");
                        }
                        Ok(())
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle
            .join()
            .map_err(|_| shardtable::StoreError::Runtime("worker thread panicked".to_string()))??;
    }
    Ok(())
}
