//! Eviction Metrics
//!
//! Eviction counters and named latency samples.

use hashbrown::HashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Latency sample name for a whole eviction call.
pub const LATENCY_EVICTION_CYCLE: &str = "eviction-cycle";
/// Latency sample name for one victim delete.
pub const LATENCY_EVICTION_DEL: &str = "eviction-del";
/// Latency sample name for the backstop wait on the free worker.
pub const LATENCY_EVICTION_LAZYFREE: &str = "eviction-lazyfree";

#[derive(Debug, Default)]
struct SampleCell {
    count: AtomicU64,
    sum_us: AtomicU64,
    min_us: AtomicU64,
    max_us: AtomicU64,
}

/// Aggregated view of one latency sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyStats {
    pub count: u64,
    pub sum_us: u64,
    pub min_us: u64,
    pub max_us: u64,
}

impl LatencyStats {
    pub fn avg_us(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum_us as f64 / self.count as f64
        }
    }
}

/// Metrics collector
#[derive(Debug, Default)]
pub struct Metrics {
    evicted_keys: AtomicU64,
    samples: RwLock<HashMap<&'static str, Arc<SampleCell>>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count evicted keys.
    pub fn incr_evicted(&self, n: u64) {
        self.evicted_keys.fetch_add(n, Ordering::Relaxed);
    }

    pub fn evicted_keys(&self) -> u64 {
        self.evicted_keys.load(Ordering::Relaxed)
    }

    /// Record a latency sample under a fixed name.
    pub fn record_latency(&self, name: &'static str, latency: Duration) {
        let cell = {
            let samples = self.samples.read();
            samples.get(name).cloned()
        };
        let cell = match cell {
            Some(cell) => cell,
            None => self
                .samples
                .write()
                .entry(name)
                .or_insert_with(|| {
                    Arc::new(SampleCell {
                        min_us: AtomicU64::new(u64::MAX),
                        ..SampleCell::default()
                    })
                })
                .clone(),
        };

        let us = latency.as_micros() as u64;
        cell.count.fetch_add(1, Ordering::Relaxed);
        cell.sum_us.fetch_add(us, Ordering::Relaxed);

        let mut current = cell.min_us.load(Ordering::Relaxed);
        while us < current {
            match cell.min_us.compare_exchange_weak(
                current,
                us,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(c) => current = c,
            }
        }

        let mut current = cell.max_us.load(Ordering::Relaxed);
        while us > current {
            match cell.max_us.compare_exchange_weak(
                current,
                us,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(c) => current = c,
            }
        }
    }

    /// Aggregated stats for one sample name.
    pub fn latency(&self, name: &str) -> Option<LatencyStats> {
        let samples = self.samples.read();
        let cell = samples.get(name)?;
        let count = cell.count.load(Ordering::Relaxed);
        let min = cell.min_us.load(Ordering::Relaxed);
        Some(LatencyStats {
            count,
            sum_us: cell.sum_us.load(Ordering::Relaxed),
            min_us: if min == u64::MAX { 0 } else { min },
            max_us: cell.max_us.load(Ordering::Relaxed),
        })
    }

    /// One-line summary of eviction activity.
    pub fn summary(&self) -> String {
        let cycle = self.latency(LATENCY_EVICTION_CYCLE);
        format!(
            "Evicted: {} | Cycles: {} | Cycle latency (µs): avg={:.1}, max={}",
            self.evicted_keys(),
            cycle.map(|s| s.count).unwrap_or(0),
            cycle.map(|s| s.avg_us()).unwrap_or(0.0),
            cycle.map(|s| s.max_us).unwrap_or(0),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicted_counter() {
        let metrics = Metrics::new();
        metrics.incr_evicted(3);
        metrics.incr_evicted(1);
        assert_eq!(metrics.evicted_keys(), 4);
    }

    #[test]
    fn test_latency_samples() {
        let metrics = Metrics::new();
        metrics.record_latency(LATENCY_EVICTION_DEL, Duration::from_micros(100));
        metrics.record_latency(LATENCY_EVICTION_DEL, Duration::from_micros(300));

        let stats = metrics.latency(LATENCY_EVICTION_DEL).unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.min_us, 100);
        assert_eq!(stats.max_us, 300);
        assert!((stats.avg_us() - 200.0).abs() < 0.1);
    }

    #[test]
    fn test_unknown_sample_is_none() {
        let metrics = Metrics::new();
        assert!(metrics.latency("no-such-sample").is_none());
    }
}
