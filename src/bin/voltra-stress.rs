//! VOLTRA Stress Binary
//!
//! Fills databases past the memory budget and drives the eviction
//! engine, printing what it reclaimed.

use bytes::Bytes;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};
use voltra::clock::wall_clock_ms;
use voltra::{Config, MaxmemoryPolicy, ServerContext};

/// VOLTRA Stress - eviction engine load driver
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Memory budget in bytes
    #[arg(long, default_value_t = 1024 * 1024)]
    maxmemory: u64,

    /// Replacement policy (e.g. allkeys-lru, volatile-ttl)
    #[arg(long, default_value = "allkeys-lru")]
    policy: String,

    /// Keys to load per database
    #[arg(long, default_value_t = 10_000)]
    keys: usize,

    /// Value size in bytes
    #[arg(long, default_value_t = 256)]
    value_size: usize,

    /// Number of logical databases
    #[arg(long, default_value_t = 4)]
    dbs: usize,

    /// Route eviction deletes to the background free worker
    #[arg(long)]
    lazy: bool,
}

fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("voltra=info".parse()?))
        .init();

    let args = Args::parse();
    let policy: MaxmemoryPolicy = args.policy.parse()?;

    let config = Config::default()
        .with_maxmemory(args.maxmemory)
        .with_policy(policy)
        .with_lazy_eviction(args.lazy)
        .with_dbnum(args.dbs);
    let mut ctx = ServerContext::new(config)?;

    info!(
        maxmemory = args.maxmemory,
        %policy,
        keys = args.keys * args.dbs,
        "loading dataset"
    );

    // Half the keys carry a TTL so volatile policies have candidates.
    let value = Bytes::from(vec![b'v'; args.value_size]);
    let now = wall_clock_ms();
    for dbid in 0..args.dbs {
        for i in 0..args.keys {
            let key = Bytes::from(format!("key:{dbid}:{i:08}"));
            let expire = (i % 2 == 0).then(|| now + 60_000 + (i as u64 * 1000));
            ctx.db(dbid).insert(key, value.clone(), expire);
        }
    }

    let before = ctx.memory_state();
    info!(
        used = before.total,
        over = before.over_limit,
        to_free = before.to_free,
        "dataset loaded"
    );

    let outcome = ctx.try_free_memory_safely();
    let after = ctx.memory_state();

    info!(
        outcome = ?outcome,
        used = after.total,
        logical = after.logical,
        level = format!("{:.3}", after.level),
        pending_lazy = ctx.lazyfree().pending_jobs(),
        "eviction finished"
    );
    info!("{}", ctx.metrics().summary());

    Ok(())
}
