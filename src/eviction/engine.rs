//! Eviction Engine
//!
//! Budget checks, victim selection, and the free loop tying the pool,
//! tables, replication feed, and lazy free worker together.

use bytes::Bytes;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use super::lfu::decay;
use super::pool::EvictionPool;
use crate::clock::{estimate_idle_ms, lfu_now_minutes, wall_clock_ms, LruClock};
use crate::config::{Config, ConfigError, MaxmemoryPolicy};
use crate::lazyfree::LazyFree;
use crate::memory::{maxmemory_state, MemoryState, MemoryTracker};
use crate::metrics::{
    Metrics, LATENCY_EVICTION_CYCLE, LATENCY_EVICTION_DEL, LATENCY_EVICTION_LAZYFREE,
};
use crate::notify::KeyspaceNotifier;
use crate::persistence::AofBuffer;
use crate::repl::ReplicationFeed;
use crate::storage::{AccessMode, Db, SampleSource};

const REPL_BACKLOG_CAP: usize = 4096;
const EVENT_RING_CAPACITY: usize = 128;

/// Outcome of an eviction attempt that could not reach the budget.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EvictError {
    #[error("memory over budget and policy forbids eviction")]
    PolicyForbids,
    #[error("no eligible keys to evict")]
    NoCandidates,
    #[error("freed less than the required bytes")]
    InsufficientProgress,
}

/// Server states that suspend or skip eviction.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeFlags {
    /// Loading persistent state; the dataset is not ours to shrink yet
    pub loading: bool,
    /// An embedded script ran past its timeout
    pub script_timed_out: bool,
    /// Clients are paused and expect a static dataset
    pub clients_paused: bool,
    /// This process replicates a master's dataset
    pub is_replica: bool,
}

/// Candidate pool plus the rotating database cursor for random picks.
struct EvictionState {
    pool: EvictionPool,
    next_db: usize,
}

/// Owner of the databases and every eviction collaborator.
///
/// The engine is single-threaded cooperative: one call holds logical
/// ownership of the tables from start to finish, and the only cross-
/// thread state is the used-bytes counter shared with the free worker.
pub struct ServerContext {
    config: Config,
    dbs: Vec<Db>,
    tracker: MemoryTracker,
    clock: Arc<LruClock>,
    repl: ReplicationFeed,
    aof: AofBuffer,
    lazyfree: LazyFree,
    notifier: KeyspaceNotifier,
    metrics: Metrics,
    flags: RuntimeFlags,
    evict: EvictionState,
    rng: SmallRng,
}

impl ServerContext {
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        Self::build(config, SmallRng::from_os_rng())
    }

    /// Context with deterministic sampling, for tests and benchmarks.
    pub fn with_seed(config: Config, seed: u64) -> Result<Self, ConfigError> {
        Self::build(config, SmallRng::seed_from_u64(seed))
    }

    fn build(config: Config, rng: SmallRng) -> Result<Self, ConfigError> {
        config.validate()?;
        let tracker = MemoryTracker::new();
        let clock = Arc::new(LruClock::new(config.hz));
        let mode = if config.maxmemory_policy.is_lfu() {
            AccessMode::Lfu
        } else {
            AccessMode::Lru
        };
        let dbs = (0..config.dbnum)
            .map(|_| {
                Db::new(
                    mode,
                    tracker.clone(),
                    clock.clone(),
                    config.lfu_log_factor,
                    config.lfu_decay_time,
                )
            })
            .collect();
        let lazyfree = LazyFree::spawn(tracker.clone());
        Ok(Self {
            config,
            dbs,
            tracker,
            clock,
            repl: ReplicationFeed::new(REPL_BACKLOG_CAP),
            aof: AofBuffer::new(),
            lazyfree,
            notifier: KeyspaceNotifier::new(EVENT_RING_CAPACITY),
            metrics: Metrics::new(),
            flags: RuntimeFlags::default(),
            evict: EvictionState {
                pool: EvictionPool::new(),
                next_db: 0,
            },
            rng,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn db(&self, dbid: usize) -> &Db {
        &self.dbs[dbid]
    }

    pub fn dbnum(&self) -> usize {
        self.dbs.len()
    }

    pub fn tracker(&self) -> &MemoryTracker {
        &self.tracker
    }

    pub fn clock(&self) -> &LruClock {
        &self.clock
    }

    pub fn repl(&self) -> &ReplicationFeed {
        &self.repl
    }

    pub fn aof(&self) -> &AofBuffer {
        &self.aof
    }

    pub fn lazyfree(&self) -> &LazyFree {
        &self.lazyfree
    }

    pub fn notifier(&self) -> &KeyspaceNotifier {
        &self.notifier
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn flags(&self) -> RuntimeFlags {
        self.flags
    }

    pub fn flags_mut(&mut self) -> &mut RuntimeFlags {
        &mut self.flags
    }

    /// Current budget state. Replica output and append-log buffers are
    /// discounted as transient overhead.
    pub fn memory_state(&self) -> MemoryState {
        let overhead = self.repl.buffer_bytes()
            + self.aof.buffer_bytes()
            + self.aof.rewrite_buffer_bytes();
        maxmemory_state(self.tracker.used_bytes(), self.config.maxmemory, overhead)
    }

    /// Periodic housekeeping: refresh the cached LRU clock and sweep
    /// expired keys. Returns the number of keys removed.
    pub fn cron_tick(&self) -> usize {
        self.clock.update();
        let now = wall_clock_ms();
        self.dbs.iter().map(|db| db.sweep_expired(now)).sum()
    }

    /// Evict keys until usage is back under budget.
    ///
    /// Ok means the accountant reported under budget on entry or after
    /// work; the error variants say why the target was missed. Each call
    /// is a single bounded attempt with no internal retry.
    pub fn try_free_memory(&mut self) -> Result<(), EvictError> {
        let cycle_start = Instant::now();

        // A replica mirrors its master's deletions instead of evicting
        // on its own, and a paused server must appear static.
        if self.flags.is_replica && self.config.replica_ignore_maxmemory {
            return Ok(());
        }
        if self.flags.clients_paused {
            return Ok(());
        }

        let state = self.memory_state();
        if !state.over_limit {
            return Ok(());
        }

        let mut result = if self.config.maxmemory_policy == MaxmemoryPolicy::NoEviction {
            Err(EvictError::PolicyForbids)
        } else {
            self.evict_until(state.to_free)
        };

        // The free worker may still be retiring bytes; wait on it
        // before reporting failure.
        if result.is_err() {
            let wait_start = Instant::now();
            let mut waited = false;
            loop {
                if !self.memory_state().over_limit {
                    result = Ok(());
                    break;
                }
                if self.lazyfree.pending_jobs() == 0 {
                    break;
                }
                waited = true;
                thread::sleep(Duration::from_millis(1));
            }
            if waited {
                self.metrics
                    .record_latency(LATENCY_EVICTION_LAZYFREE, wait_start.elapsed());
            }
        }

        if let Err(err) = &result {
            warn!(%err, "eviction missed the memory target");
        }
        self.metrics
            .record_latency(LATENCY_EVICTION_CYCLE, cycle_start.elapsed());
        result
    }

    /// Like [`try_free_memory`](Self::try_free_memory), but declines to
    /// act while the server is loading or a script overran its timeout.
    pub fn try_free_memory_safely(&mut self) -> Result<(), EvictError> {
        if self.flags.script_timed_out || self.flags.loading {
            return Ok(());
        }
        self.try_free_memory()
    }

    fn evict_until(&mut self, target: usize) -> Result<(), EvictError> {
        let policy = self.config.maxmemory_policy;
        let lazy = self.config.lazyfree_lazy_eviction;
        let mut freed = 0usize;
        let mut freed_keys = 0u64;

        while freed < target {
            let victim = if policy.uses_pool() {
                self.pick_pooled_victim()
            } else {
                self.pick_random_victim()
            };
            let Some((dbid, key)) = victim else {
                return Err(if freed_keys == 0 {
                    EvictError::NoCandidates
                } else {
                    EvictError::InsufficientProgress
                });
            };

            let del_start = Instant::now();
            let used_before = self.tracker.used_bytes();

            // Replicas and the append log must drop the key too, in
            // this order: propagate, delete, stats, event.
            self.repl.propagate_expire(dbid, &key, lazy);
            self.aof.feed_del(dbid, &key, lazy);

            let deleted = if lazy {
                match self.dbs[dbid].take_for_async(&key) {
                    Some((obj, bytes)) => {
                        self.lazyfree.enqueue(obj, bytes);
                        true
                    }
                    None => false,
                }
            } else {
                self.dbs[dbid].remove_sync(&key)
            };
            freed += used_before.saturating_sub(self.tracker.used_bytes());

            if deleted {
                freed_keys += 1;
                self.metrics.incr_evicted(1);
                self.notifier.notify_keyspace_event("evicted", &key, dbid);
                self.notifier.signal_modified_key(dbid, &key);
                self.metrics
                    .record_latency(LATENCY_EVICTION_DEL, del_start.elapsed());
                debug!(
                    db = dbid,
                    key = %String::from_utf8_lossy(&key),
                    freed,
                    "evicted key"
                );
            }

            // Large eviction bursts must not starve replicas of their
            // own delete stream.
            if self.repl.replica_count() > 0 {
                self.repl.flush_buffers();
            }

            // Under lazy eviction the per-victim delta misses bytes the
            // worker retires concurrently, so trust the accountant over
            // the local counter every few keys.
            if lazy && deleted && freed_keys % 16 == 0 && !self.memory_state().over_limit {
                break;
            }
        }
        Ok(())
    }

    /// Pool-based selection: sample every database into the pool, then
    /// consume it best-first, skipping ghosts.
    fn pick_pooled_victim(&mut self) -> Option<(usize, Bytes)> {
        let policy = self.config.maxmemory_policy;
        let source = if policy.scans_all_keys() {
            SampleSource::AllKeys
        } else {
            SampleSource::Expiring
        };

        loop {
            let now_tick = self.clock.now();
            let now_minutes = lfu_now_minutes();
            let mut total_keys = 0;

            // The policy is process-global; every database contributes
            // candidates or eviction would skew toward early databases.
            for dbid in 0..self.dbs.len() {
                let db = &self.dbs[dbid];
                let len = db.source_len(source);
                if len == 0 {
                    continue;
                }
                total_keys += len;
                let keys =
                    db.sample_keys(source, self.config.maxmemory_samples, &mut self.rng);
                for key in keys {
                    let Some(idle) = candidate_idle(
                        db,
                        &key,
                        policy,
                        now_tick,
                        now_minutes,
                        self.config.lfu_decay_time,
                    ) else {
                        continue;
                    };
                    self.evict.pool.try_insert(idle, dbid, &key);
                }
            }
            if total_keys == 0 {
                return None;
            }

            // Pool entries are snapshots; clear every visited slot and
            // keep only a key that still resolves.
            while let Some((dbid, key)) = self.evict.pool.take_best() {
                let db = &self.dbs[dbid];
                let live = if policy.scans_all_keys() {
                    db.contains_key(&key)
                } else {
                    db.has_expiry(&key)
                };
                if live {
                    return Some((dbid, key));
                }
                debug!(db = dbid, "skipped ghost pool entry");
            }
        }
    }

    /// Random selection: rotate the database cursor and take one random
    /// key from the first non-empty table.
    fn pick_random_victim(&mut self) -> Option<(usize, Bytes)> {
        let source = if self.config.maxmemory_policy.scans_all_keys() {
            SampleSource::AllKeys
        } else {
            SampleSource::Expiring
        };
        let dbnum = self.dbs.len();
        for _ in 0..dbnum {
            let dbid = self.evict.next_db % dbnum;
            self.evict.next_db = self.evict.next_db.wrapping_add(1);
            if let Some(key) = self.dbs[dbid].random_key(source, &mut self.rng) {
                return Some((dbid, key));
            }
        }
        None
    }
}

/// Score a sampled key under the active policy; higher is more
/// evictable. None when the key vanished between sample and scoring.
fn candidate_idle(
    db: &Db,
    key: &Bytes,
    policy: MaxmemoryPolicy,
    now_tick: u32,
    now_minutes: u16,
    lfu_decay_time: u64,
) -> Option<u64> {
    if policy.is_lru() {
        let meta = db.access_meta(key)?;
        Some(estimate_idle_ms(now_tick, meta.decode_lru()))
    } else if policy.is_lfu() {
        let meta = db.access_meta(key)?;
        let (ldt, counter) = meta.decode_lfu();
        Some(255 - decay(ldt, counter, now_minutes, lfu_decay_time) as u64)
    } else if policy == MaxmemoryPolicy::VolatileTtl {
        // The expiring table's mapped expiry is the scoring value.
        let expiry = db.expiry_of(key)?;
        Some(u64::MAX - expiry)
    } else {
        unreachable!("policy {policy} does not rank candidates")
    }
}
