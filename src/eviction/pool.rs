//! Eviction Candidate Pool
//!
//! Fixed-size ordered buffer of sampled eviction candidates.

use bytes::Bytes;

/// Number of candidate slots.
pub const EVPOOL_SIZE: usize = 16;

/// Size of the per-slot reusable key buffer. Keys longer than this are
/// copied to the heap instead.
pub const EVPOOL_CACHED_SIZE: usize = 255;

#[derive(Debug)]
enum KeyRef {
    Empty,
    /// Key bytes live in the slot's own `cached` buffer.
    Inline(usize),
    Heap(Vec<u8>),
}

#[derive(Debug)]
struct PoolSlot {
    idle: u64,
    dbid: usize,
    key: KeyRef,
    cached: [u8; EVPOOL_CACHED_SIZE],
}

impl PoolSlot {
    fn new() -> Self {
        Self {
            idle: 0,
            dbid: 0,
            key: KeyRef::Empty,
            cached: [0; EVPOOL_CACHED_SIZE],
        }
    }

    fn is_populated(&self) -> bool {
        !matches!(self.key, KeyRef::Empty)
    }

    fn key_bytes(&self) -> Option<&[u8]> {
        match &self.key {
            KeyRef::Empty => None,
            KeyRef::Inline(len) => Some(&self.cached[..*len]),
            KeyRef::Heap(v) => Some(v),
        }
    }

    /// Empty the slot. The reusable buffer stays with the slot index.
    fn clear(&mut self) {
        self.key = KeyRef::Empty;
        self.idle = 0;
    }
}

/// Ordered buffer of eviction candidates.
///
/// Populated slots form a prefix starting at index 0, sorted by ascending
/// `idle` score, so the rightmost populated slot is always the best
/// eviction candidate. Entries are snapshots of the key tables: a pooled
/// key may be deleted before it is consumed, and such ghosts are simply
/// skipped by the consumer.
#[derive(Debug)]
pub struct EvictionPool {
    slots: Vec<PoolSlot>,
}

impl Default for EvictionPool {
    fn default() -> Self {
        Self::new()
    }
}

impl EvictionPool {
    pub fn new() -> Self {
        Self {
            slots: (0..EVPOOL_SIZE).map(|_| PoolSlot::new()).collect(),
        }
    }

    /// Number of populated slots.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_populated()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Scores of populated slots in index order.
    pub fn scores(&self) -> Vec<u64> {
        self.slots
            .iter()
            .filter(|s| s.is_populated())
            .map(|s| s.idle)
            .collect()
    }

    /// Offer a scored candidate to the pool.
    ///
    /// Returns false when the candidate is dropped: either it is already
    /// pooled, or the pool is full and every entry scores at least as
    /// high.
    pub fn try_insert(&mut self, idle: u64, dbid: usize, key: &[u8]) -> bool {
        // A key already pooled keeps its original slot and score.
        if self
            .slots
            .iter()
            .any(|s| s.dbid == dbid && s.key_bytes() == Some(key))
        {
            return false;
        }

        // First slot that is empty or scores at least as high.
        let mut k = 0;
        while k < EVPOOL_SIZE && self.slots[k].is_populated() && self.slots[k].idle < idle {
            k += 1;
        }

        if k == 0 && self.slots[EVPOOL_SIZE - 1].is_populated() {
            // Less idle than everything in a full pool.
            return false;
        }

        if k < EVPOOL_SIZE && !self.slots[k].is_populated() {
            self.write_slot(k, idle, dbid, key);
            return true;
        }

        if !self.slots[EVPOOL_SIZE - 1].is_populated() {
            // Room on the right: open slot k by shifting the tail right.
            for i in (k..EVPOOL_SIZE - 1).rev() {
                self.move_slot(i, i + 1);
            }
        } else {
            // Pool full: discard the least idle entry at slot 0 and
            // shift the prefix left to open slot k-1.
            k -= 1;
            self.slots[0].clear();
            for i in 1..=k {
                self.move_slot(i, i - 1);
            }
        }
        self.write_slot(k, idle, dbid, key);
        true
    }

    /// Return and clear the rightmost populated slot.
    pub fn take_best(&mut self) -> Option<(usize, Bytes)> {
        for k in (0..EVPOOL_SIZE).rev() {
            let dbid = self.slots[k].dbid;
            if let Some(bytes) = self.slots[k].key_bytes() {
                let key = Bytes::copy_from_slice(bytes);
                self.slots[k].clear();
                return Some((dbid, key));
            }
        }
        None
    }

    /// Move slot contents between indexes. Each slot keeps its own
    /// reusable buffer; inline key bytes are copied across.
    fn move_slot(&mut self, from: usize, to: usize) {
        let key = std::mem::replace(&mut self.slots[from].key, KeyRef::Empty);
        let idle = self.slots[from].idle;
        let dbid = self.slots[from].dbid;
        match key {
            KeyRef::Inline(len) => {
                let buf = self.slots[from].cached;
                self.slots[to].cached[..len].copy_from_slice(&buf[..len]);
                self.slots[to].key = KeyRef::Inline(len);
            }
            other => self.slots[to].key = other,
        }
        self.slots[to].idle = idle;
        self.slots[to].dbid = dbid;
        self.slots[from].idle = 0;
    }

    fn write_slot(&mut self, k: usize, idle: u64, dbid: usize, key: &[u8]) {
        let slot = &mut self.slots[k];
        if key.len() > EVPOOL_CACHED_SIZE {
            slot.key = KeyRef::Heap(key.to_vec());
        } else {
            slot.cached[..key.len()].copy_from_slice(key);
            slot.key = KeyRef::Inline(key.len());
        }
        slot.idle = idle;
        slot.dbid = dbid;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    fn assert_invariants(pool: &EvictionPool) {
        // Populated slots form a prefix.
        let mut seen_empty = false;
        for slot in &pool.slots {
            if slot.is_populated() {
                assert!(!seen_empty, "hole in populated prefix");
            } else {
                seen_empty = true;
            }
        }
        // Scores ascend across populated slots.
        let scores = pool.scores();
        for pair in scores.windows(2) {
            assert!(pair[0] <= pair[1], "scores out of order: {scores:?}");
        }
    }

    #[test]
    fn test_ordering_under_random_inserts() {
        let mut rng = SmallRng::seed_from_u64(99);
        let mut pool = EvictionPool::new();
        for i in 0..200u32 {
            let idle = rng.random_range(0..10_000u64);
            pool.try_insert(idle, 0, format!("key-{i}").as_bytes());
            assert_invariants(&pool);
        }
        assert_eq!(pool.len(), EVPOOL_SIZE);
    }

    #[test]
    fn test_full_pool_rejects_worse_candidate() {
        let mut pool = EvictionPool::new();
        for i in 0..EVPOOL_SIZE as u64 {
            assert!(pool.try_insert(100 + i, 0, format!("k{i}").as_bytes()));
        }
        assert!(!pool.try_insert(50, 0, b"worse"));
        assert_eq!(pool.len(), EVPOOL_SIZE);
    }

    #[test]
    fn test_full_pool_displaces_least_idle() {
        let mut pool = EvictionPool::new();
        for i in 0..EVPOOL_SIZE as u64 {
            pool.try_insert(100 + i, 0, format!("k{i}").as_bytes());
        }
        assert!(pool.try_insert(5000, 0, b"better"));
        assert_invariants(&pool);
        let scores = pool.scores();
        assert!(!scores.contains(&100));
        assert_eq!(*scores.last().unwrap(), 5000);
        assert_eq!(pool.len(), EVPOOL_SIZE);
    }

    #[test]
    fn test_duplicate_key_occupies_one_slot() {
        let mut pool = EvictionPool::new();
        assert!(pool.try_insert(10, 3, b"dup"));
        assert!(!pool.try_insert(20, 3, b"dup"));
        assert_eq!(pool.len(), 1);
        // Same key in a different database is a distinct candidate.
        assert!(pool.try_insert(20, 4, b"dup"));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_take_best_returns_highest_score_first() {
        let mut pool = EvictionPool::new();
        pool.try_insert(10, 0, b"cool");
        pool.try_insert(300, 1, b"hot");
        pool.try_insert(40, 2, b"warm");

        let (dbid, key) = pool.take_best().unwrap();
        assert_eq!((dbid, key.as_ref()), (1, b"hot".as_ref()));
        let (dbid, key) = pool.take_best().unwrap();
        assert_eq!((dbid, key.as_ref()), (2, b"warm".as_ref()));
        let (dbid, key) = pool.take_best().unwrap();
        assert_eq!((dbid, key.as_ref()), (0, b"cool".as_ref()));
        assert!(pool.take_best().is_none());
    }

    #[test]
    fn test_long_key_spills_to_heap() {
        let mut pool = EvictionPool::new();
        let long_key = vec![b'x'; EVPOOL_CACHED_SIZE + 45];
        assert!(pool.try_insert(7, 0, &long_key));
        let (_, key) = pool.take_best().unwrap();
        assert_eq!(key.as_ref(), long_key.as_slice());
    }

    #[test]
    fn test_inline_keys_survive_shifts() {
        let mut pool = EvictionPool::new();
        pool.try_insert(10, 0, b"alpha");
        pool.try_insert(30, 0, b"gamma");
        // Middle insertion shifts "gamma" right by one slot.
        pool.try_insert(20, 0, b"beta");
        assert_invariants(&pool);
        assert_eq!(pool.scores(), vec![10, 20, 30]);

        let keys: Vec<_> = std::iter::from_fn(|| pool.take_best())
            .map(|(_, k)| k)
            .collect();
        assert_eq!(keys, vec!["gamma", "beta", "alpha"]);
    }

    #[test]
    fn test_cleared_slot_keeps_buffer_usable() {
        let mut pool = EvictionPool::new();
        pool.try_insert(10, 0, b"first");
        pool.take_best();
        assert!(pool.is_empty());
        assert!(pool.try_insert(20, 0, b"second"));
        let (_, key) = pool.take_best().unwrap();
        assert_eq!(key.as_ref(), b"second");
    }
}
