//! Replication Feed
//!
//! Propagates eviction deletes to replicas and accounts the pending
//! output bytes that must not count against the data budget.

use bytes::Bytes;
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::clock::wall_clock_ms;

pub type ReplicaId = u64;

/// Per-entry framing overhead charged to replica output buffers.
const FEED_ENTRY_OVERHEAD: usize = 32;

/// Delete form propagated downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOp {
    /// Synchronous delete
    Del,
    /// Background delete
    Unlink,
}

/// One replicated operation.
#[derive(Debug, Clone)]
pub struct FeedEntry {
    pub seq: u64,
    pub op: FeedOp,
    pub db: usize,
    pub key: Bytes,
    pub timestamp_ms: u64,
}

impl FeedEntry {
    fn wire_bytes(&self) -> usize {
        self.key.len() + FEED_ENTRY_OVERHEAD
    }
}

#[derive(Debug, Default)]
struct ReplicaState {
    pending_bytes: usize,
}

/// Sequenced backlog of deletes plus per-replica pending output.
///
/// Output bytes accumulate as operations are recorded and drop to zero
/// when the buffers are flushed to the transport; the accountant reads
/// them as transient overhead.
pub struct ReplicationFeed {
    offset: AtomicU64,
    backlog: Mutex<VecDeque<FeedEntry>>,
    backlog_cap: usize,
    replicas: RwLock<HashMap<ReplicaId, ReplicaState>>,
}

impl ReplicationFeed {
    pub fn new(backlog_cap: usize) -> Self {
        Self {
            offset: AtomicU64::new(0),
            backlog: Mutex::new(VecDeque::new()),
            backlog_cap,
            replicas: RwLock::new(HashMap::new()),
        }
    }

    pub fn add_replica(&self, id: ReplicaId) {
        self.replicas.write().insert(id, ReplicaState::default());
    }

    pub fn remove_replica(&self, id: ReplicaId) {
        self.replicas.write().remove(&id);
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.read().len()
    }

    /// Record a delete for an evicted or expired key so every replica
    /// and the downstream log remove it too. Returns the sequence number.
    pub fn propagate_expire(&self, db: usize, key: &Bytes, lazy: bool) -> u64 {
        let seq = self.offset.fetch_add(1, Ordering::SeqCst) + 1;
        let entry = FeedEntry {
            seq,
            op: if lazy { FeedOp::Unlink } else { FeedOp::Del },
            db,
            key: key.clone(),
            timestamp_ms: wall_clock_ms(),
        };
        let wire = entry.wire_bytes();

        let mut backlog = self.backlog.lock();
        backlog.push_back(entry);
        while backlog.len() > self.backlog_cap {
            backlog.pop_front();
        }
        drop(backlog);

        for state in self.replicas.write().values_mut() {
            state.pending_bytes += wire;
        }
        seq
    }

    /// Total pending output bytes across replicas.
    pub fn buffer_bytes(&self) -> usize {
        self.replicas.read().values().map(|r| r.pending_bytes).sum()
    }

    /// Hand pending output to the transport. Returns the bytes drained.
    pub fn flush_buffers(&self) -> usize {
        let mut drained = 0;
        for state in self.replicas.write().values_mut() {
            drained += state.pending_bytes;
            state.pending_bytes = 0;
        }
        drained
    }

    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::SeqCst)
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.lock().len()
    }
}
