//! Memory Accounting
//!
//! Used-bytes tracking and the over/under-budget decision.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared used-bytes counter.
///
/// Charged by the key tables on insert and released on delete. The
/// background free worker releases bytes from its own thread, so the
/// counter is the one piece of state read across threads.
#[derive(Debug, Clone, Default)]
pub struct MemoryTracker {
    used: Arc<AtomicUsize>,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn charge(&self, bytes: usize) {
        self.used.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn release(&self, bytes: usize) {
        self.used.fetch_sub(bytes, Ordering::Relaxed);
    }

    pub fn used_bytes(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }
}

/// Snapshot of the memory budget decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryState {
    /// Logical usage exceeds the budget
    pub over_limit: bool,
    /// Total tracked bytes
    pub total: usize,
    /// Total minus transient replication/append-log buffers
    pub logical: usize,
    /// Bytes to free to get back under budget
    pub to_free: usize,
    /// logical / maxmemory (0 when unlimited)
    pub level: f64,
}

/// Compute the budget state from raw inputs.
///
/// Replication output buffers and append-log buffers are transient and
/// self-draining; charging them against the data budget would trigger
/// eviction storms that grow the buffers further, so they are subtracted
/// before the limit comparison. The fast path ignores overhead entirely:
/// if raw usage fits the budget, so does logical usage.
pub fn maxmemory_state(total: usize, maxmemory: u64, overhead: usize) -> MemoryState {
    let under = |logical: usize| MemoryState {
        over_limit: false,
        total,
        logical,
        to_free: 0,
        level: if maxmemory == 0 {
            0.0
        } else {
            logical as f64 / maxmemory as f64
        },
    };

    if maxmemory == 0 || total as u64 <= maxmemory {
        return under(total);
    }

    let logical = total.saturating_sub(overhead);
    if logical as u64 <= maxmemory {
        return under(logical);
    }

    MemoryState {
        over_limit: true,
        total,
        logical,
        to_free: logical - maxmemory as usize,
        level: logical as f64 / maxmemory as f64,
    }
}
