//! Keyspace Notifications
//!
//! Bounded ring of keyspace events plus the modified-key signal that
//! invalidates watchers.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::clock::wall_clock_ms;

/// One keyspace event.
#[derive(Debug, Clone)]
pub struct KeyspaceEvent {
    pub event: &'static str,
    pub key: Bytes,
    pub db: usize,
    pub timestamp_ms: u64,
}

/// In-memory event sink.
///
/// The ring keeps the most recent events for inspection; older events
/// fall off the front. Counters never reset.
pub struct KeyspaceNotifier {
    ring: Mutex<VecDeque<KeyspaceEvent>>,
    capacity: usize,
    total: AtomicU64,
    dirty: AtomicU64,
}

impl KeyspaceNotifier {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            total: AtomicU64::new(0),
            dirty: AtomicU64::new(0),
        }
    }

    /// Publish an event for a key in a database.
    pub fn notify_keyspace_event(&self, event: &'static str, key: &Bytes, db: usize) {
        let mut ring = self.ring.lock();
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(KeyspaceEvent {
            event,
            key: key.clone(),
            db,
            timestamp_ms: wall_clock_ms(),
        });
        drop(ring);
        self.total.fetch_add(1, Ordering::Relaxed);
        debug!(event, db, "keyspace event");
    }

    /// Mark a key as modified so watching clients are invalidated.
    pub fn signal_modified_key(&self, db: usize, key: &Bytes) {
        self.dirty.fetch_add(1, Ordering::Relaxed);
        debug!(db, key = %String::from_utf8_lossy(key), "key modified");
    }

    /// Most recent events, oldest first.
    pub fn recent_events(&self) -> Vec<KeyspaceEvent> {
        self.ring.lock().iter().cloned().collect()
    }

    pub fn total_events(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn dirty(&self) -> u64 {
        self.dirty.load(Ordering::Relaxed)
    }
}
