//! Eviction Core
//!
//! Candidate pool, LFU arithmetic, and the eviction loop.

mod engine;
mod lfu;
mod pool;

pub use engine::{EvictError, RuntimeFlags, ServerContext};
pub use lfu::{decay, elapsed_minutes, log_incr, LFU_COUNTER_MAX, LFU_INIT_VAL};
pub use pool::{EvictionPool, EVPOOL_CACHED_SIZE, EVPOOL_SIZE};
