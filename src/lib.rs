//! VOLTRA - Memory-Bounded Eviction Engine
//!
//! The eviction core of an in-memory key/value server: approximate
//! LRU/LFU/TTL/random victim selection over sampled candidates, memory
//! accounting that discounts transient replication and append-log
//! buffers, and integration with a background free worker.

pub mod clock;
pub mod config;
pub mod eviction;
pub mod lazyfree;
pub mod memory;
pub mod metrics;
pub mod notify;
pub mod persistence;
pub mod repl;
pub mod storage;

pub use clock::{LruClock, LRU_CLOCK_MAX, LRU_CLOCK_RESOLUTION_MS};
pub use config::{Config, ConfigError, MaxmemoryPolicy};
pub use eviction::{EvictError, EvictionPool, RuntimeFlags, ServerContext, EVPOOL_SIZE};
pub use lazyfree::LazyFree;
pub use memory::{MemoryState, MemoryTracker};
pub use metrics::Metrics;
pub use notify::KeyspaceNotifier;
pub use persistence::AofBuffer;
pub use repl::ReplicationFeed;
pub use storage::{AccessMeta, AccessMode, Db, Object, SampleSource};
