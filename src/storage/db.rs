//! Logical Database
//!
//! Sharded key table plus expiring subset, with access-metadata updates
//! and random sampling for the eviction engine.

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tracing::debug;

use crate::clock::{lfu_now_minutes, wall_clock_ms, LruClock};
use crate::eviction::{decay, log_incr};
use crate::memory::MemoryTracker;
use crate::storage::object::{AccessMeta, Object};

/// Which key table a sampling pass draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleSource {
    AllKeys,
    Expiring,
}

/// How lookups stamp access metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Lru,
    Lfu,
}

/// One logical database.
///
/// `all_keys` maps every key to its object; `expiring_keys` maps the
/// subset carrying a TTL to its absolute expiry in milliseconds. The
/// expiry timestamp doubles as the scoring value for TTL-based eviction.
pub struct Db {
    all_keys: DashMap<Bytes, Object>,
    expiring_keys: DashMap<Bytes, u64>,
    tracker: MemoryTracker,
    clock: Arc<LruClock>,
    mode: AccessMode,
    lfu_log_factor: u32,
    lfu_decay_time: u64,
    rng: Mutex<SmallRng>,
}

impl Db {
    pub fn new(
        mode: AccessMode,
        tracker: MemoryTracker,
        clock: Arc<LruClock>,
        lfu_log_factor: u32,
        lfu_decay_time: u64,
    ) -> Self {
        Self {
            all_keys: DashMap::new(),
            expiring_keys: DashMap::new(),
            tracker,
            clock,
            mode,
            lfu_log_factor,
            lfu_decay_time,
            rng: Mutex::new(SmallRng::from_os_rng()),
        }
    }

    /// Store a key, replacing any previous value, and charge its bytes.
    pub fn insert(&self, key: Bytes, value: Bytes, expire_at_ms: Option<u64>) {
        let obj = match self.mode {
            AccessMode::Lru => Object::new_lru(value, self.clock.now()),
            AccessMode::Lfu => Object::new_lfu(value, lfu_now_minutes()),
        };
        let bytes = obj.mem_usage(key.len());
        if let Some(old) = self.all_keys.insert(key.clone(), obj) {
            self.tracker.release(old.mem_usage(key.len()));
        }
        self.tracker.charge(bytes);
        match expire_at_ms {
            Some(at) => {
                self.expiring_keys.insert(key, at);
            }
            None => {
                self.expiring_keys.remove(&key);
            }
        }
    }

    /// Fetch a value, updating its access metadata.
    ///
    /// In LFU mode the pending decay is realized first and the counter
    /// then probabilistically incremented; this is the only place decay
    /// is written back. Expired keys are removed and read as missing.
    pub fn lookup(&self, key: &Bytes) -> Option<Bytes> {
        if self.is_expired(key, wall_clock_ms()) {
            self.remove_sync(key);
            return None;
        }
        let mut entry = self.all_keys.get_mut(key)?;
        let meta = match self.mode {
            AccessMode::Lru => AccessMeta::encode_lru(self.clock.now()),
            AccessMode::Lfu => {
                let (ldt, counter) = entry.access().decode_lfu();
                let now = lfu_now_minutes();
                let counter = decay(ldt, counter, now, self.lfu_decay_time);
                let counter = log_incr(counter, self.lfu_log_factor, &mut *self.rng.lock());
                AccessMeta::encode_lfu(now, counter)
            }
        };
        entry.set_access(meta);
        Some(entry.value().value().clone())
    }

    /// Raw existence check. Does not touch access metadata.
    pub fn contains_key(&self, key: &Bytes) -> bool {
        self.all_keys.contains_key(key)
    }

    pub fn has_expiry(&self, key: &Bytes) -> bool {
        self.expiring_keys.contains_key(key)
    }

    /// Absolute expiry in milliseconds, if the key has a TTL.
    pub fn expiry_of(&self, key: &Bytes) -> Option<u64> {
        self.expiring_keys.get(key).map(|e| *e)
    }

    /// Access metadata without touching it.
    pub fn access_meta(&self, key: &Bytes) -> Option<AccessMeta> {
        self.all_keys.get(key).map(|e| e.access())
    }

    pub(crate) fn set_access_meta(&self, key: &Bytes, meta: AccessMeta) -> bool {
        match self.all_keys.get_mut(key) {
            Some(mut entry) => {
                entry.set_access(meta);
                true
            }
            None => false,
        }
    }

    pub fn set_expire(&self, key: &Bytes, at_ms: u64) -> bool {
        if !self.all_keys.contains_key(key) {
            return false;
        }
        self.expiring_keys.insert(key.clone(), at_ms);
        true
    }

    /// Delete a key and release its bytes immediately.
    pub fn remove_sync(&self, key: &Bytes) -> bool {
        self.expiring_keys.remove(key);
        match self.all_keys.remove(key) {
            Some((k, obj)) => {
                self.tracker.release(obj.mem_usage(k.len()));
                true
            }
            None => false,
        }
    }

    /// Detach a key for background destruction.
    ///
    /// The entry leaves the tables now but its bytes stay charged; the
    /// free worker releases them when it drops the object.
    pub fn take_for_async(&self, key: &Bytes) -> Option<(Object, usize)> {
        self.expiring_keys.remove(key);
        let (k, obj) = self.all_keys.remove(key)?;
        let bytes = obj.mem_usage(k.len());
        Some((obj, bytes))
    }

    /// Remove every key whose expiry has passed.
    pub fn sweep_expired(&self, now_ms: u64) -> usize {
        let expired: Vec<Bytes> = self
            .expiring_keys
            .iter()
            .filter(|e| *e.value() <= now_ms)
            .map(|e| e.key().clone())
            .collect();
        let mut removed = 0;
        for key in expired {
            if self.remove_sync(&key) {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "removed expired keys");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.all_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all_keys.is_empty()
    }

    pub fn expiring_len(&self) -> usize {
        self.expiring_keys.len()
    }

    pub fn source_len(&self, source: SampleSource) -> usize {
        match source {
            SampleSource::AllKeys => self.len(),
            SampleSource::Expiring => self.expiring_len(),
        }
    }

    /// One pseudo-random key from the chosen table.
    pub fn random_key<R: Rng + ?Sized>(&self, source: SampleSource, rng: &mut R) -> Option<Bytes> {
        self.sample_keys(source, 1, rng).pop()
    }

    /// Up to `n` distinct keys drawn at a pseudo-random position.
    ///
    /// Returns fewer than `n` when the table is sparse; never returns
    /// duplicates within one call, and gives no ordering guarantee.
    pub fn sample_keys<R: Rng + ?Sized>(
        &self,
        source: SampleSource,
        n: usize,
        rng: &mut R,
    ) -> Vec<Bytes> {
        match source {
            SampleSource::AllKeys => sample_table(
                self.all_keys.len(),
                || self.all_keys.iter().map(|e| e.key().clone()),
                n,
                rng,
            ),
            SampleSource::Expiring => sample_table(
                self.expiring_keys.len(),
                || self.expiring_keys.iter().map(|e| e.key().clone()),
                n,
                rng,
            ),
        }
    }

    fn is_expired(&self, key: &Bytes, now_ms: u64) -> bool {
        self.expiring_keys
            .get(key)
            .map(|at| *at <= now_ms)
            .unwrap_or(false)
    }
}

/// Take `n` entries starting at a random position, wrapping around the
/// front of the iteration order when the tail runs short.
fn sample_table<R, F, I>(len: usize, make_iter: F, n: usize, rng: &mut R) -> Vec<Bytes>
where
    R: Rng + ?Sized,
    F: Fn() -> I,
    I: Iterator<Item = Bytes>,
{
    if len == 0 || n == 0 {
        return Vec::new();
    }
    let want = n.min(len);
    let start = rng.random_range(0..len);
    let mut keys: Vec<Bytes> = make_iter().skip(start).take(want).collect();
    if keys.len() < want {
        let remaining = want - keys.len();
        keys.extend(make_iter().take(remaining));
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTracker;
    use crate::storage::object::ENTRY_OVERHEAD;

    fn lru_db(tracker: MemoryTracker, clock: Arc<LruClock>) -> Db {
        Db::new(AccessMode::Lru, tracker, clock, 10, 1)
    }

    #[test]
    fn test_insert_charges_and_remove_releases() {
        let tracker = MemoryTracker::new();
        let db = lru_db(tracker.clone(), Arc::new(LruClock::new(10)));
        let key = Bytes::from_static(b"key");
        db.insert(key.clone(), Bytes::from_static(b"value"), None);
        assert_eq!(tracker.used_bytes(), 3 + 5 + ENTRY_OVERHEAD);

        // Replacing a value does not double-charge.
        db.insert(key.clone(), Bytes::from_static(b"v2"), None);
        assert_eq!(tracker.used_bytes(), 3 + 2 + ENTRY_OVERHEAD);

        assert!(db.remove_sync(&key));
        assert_eq!(tracker.used_bytes(), 0);
    }

    #[test]
    fn test_lookup_stamps_lru_tick() {
        let clock = Arc::new(LruClock::new(10));
        let db = lru_db(MemoryTracker::new(), clock.clone());
        let key = Bytes::from_static(b"k");
        clock.set_cached(100);
        db.insert(key.clone(), Bytes::from_static(b"v"), None);
        clock.set_cached(175);
        db.lookup(&key);
        let meta = db.access_meta(&key).unwrap();
        assert_eq!(meta.decode_lru(), 175);
    }

    #[test]
    fn test_lookup_advances_lfu_counter() {
        let tracker = MemoryTracker::new();
        let db = Db::new(
            AccessMode::Lfu,
            tracker,
            Arc::new(LruClock::new(10)),
            10,
            1,
        );
        let key = Bytes::from_static(b"k");
        db.insert(key.clone(), Bytes::from_static(b"v"), None);
        for _ in 0..50 {
            db.lookup(&key);
        }
        let (_, counter) = db.access_meta(&key).unwrap().decode_lfu();
        // The first access past the init value is a certain increment.
        assert!(counter > crate::eviction::LFU_INIT_VAL);
    }

    #[test]
    fn test_expired_key_reads_as_missing() {
        let tracker = MemoryTracker::new();
        let db = lru_db(tracker.clone(), Arc::new(LruClock::new(10)));
        let key = Bytes::from_static(b"gone");
        db.insert(key.clone(), Bytes::from_static(b"v"), Some(1));
        assert_eq!(db.lookup(&key), None);
        assert!(!db.contains_key(&key));
        assert_eq!(tracker.used_bytes(), 0);
    }

    #[test]
    fn test_sweep_expired() {
        let db = lru_db(MemoryTracker::new(), Arc::new(LruClock::new(10)));
        let now = wall_clock_ms();
        for i in 0..10 {
            let key = Bytes::from(format!("key{i}"));
            let at = if i < 4 { now - 1 } else { now + 60_000 };
            db.insert(key, Bytes::from_static(b"v"), Some(at));
        }
        assert_eq!(db.sweep_expired(now), 4);
        assert_eq!(db.len(), 6);
        assert_eq!(db.expiring_len(), 6);
    }

    #[test]
    fn test_set_expire_moves_key_into_expiring_set() {
        let db = lru_db(MemoryTracker::new(), Arc::new(LruClock::new(10)));
        let key = Bytes::from_static(b"k");
        let at = wall_clock_ms() + 60_000;
        assert!(!db.set_expire(&key, at), "missing key gets no expiry");

        db.insert(key.clone(), Bytes::from_static(b"v"), None);
        assert!(!db.has_expiry(&key));
        assert!(db.set_expire(&key, at));
        assert_eq!(db.expiry_of(&key), Some(at));
        assert_eq!(db.expiring_len(), 1);
    }

    #[test]
    fn test_take_for_async_keeps_bytes_charged() {
        let tracker = MemoryTracker::new();
        let db = lru_db(tracker.clone(), Arc::new(LruClock::new(10)));
        let key = Bytes::from_static(b"key");
        db.insert(key.clone(), Bytes::from_static(b"value"), None);
        let charged = tracker.used_bytes();

        let (obj, bytes) = db.take_for_async(&key).unwrap();
        assert!(!db.contains_key(&key));
        assert_eq!(bytes, charged);
        assert_eq!(tracker.used_bytes(), charged);
        drop(obj);
    }

    #[test]
    fn test_sampling_is_distinct_and_bounded() {
        let db = lru_db(MemoryTracker::new(), Arc::new(LruClock::new(10)));
        for i in 0..100 {
            db.insert(Bytes::from(format!("key{i}")), Bytes::from_static(b"v"), None);
        }
        let mut rng = SmallRng::seed_from_u64(5);
        for _ in 0..20 {
            let sample = db.sample_keys(SampleSource::AllKeys, 10, &mut rng);
            assert_eq!(sample.len(), 10);
            let mut unique = sample.clone();
            unique.sort();
            unique.dedup();
            assert_eq!(unique.len(), 10);
        }
    }

    #[test]
    fn test_sparse_table_returns_fewer() {
        let db = lru_db(MemoryTracker::new(), Arc::new(LruClock::new(10)));
        let now = wall_clock_ms();
        for i in 0..3 {
            db.insert(
                Bytes::from(format!("key{i}")),
                Bytes::from_static(b"v"),
                Some(now + 60_000),
            );
        }
        let mut rng = SmallRng::seed_from_u64(5);
        let sample = db.sample_keys(SampleSource::Expiring, 10, &mut rng);
        assert_eq!(sample.len(), 3);
        assert!(db
            .sample_keys(SampleSource::AllKeys, 0, &mut rng)
            .is_empty());
    }
}
