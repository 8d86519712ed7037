//! LRU Clock
//!
//! Coarse wrapping clocks backing idle-time estimates and LFU decay.

use chrono::Utc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Granularity of one LRU clock tick.
pub const LRU_CLOCK_RESOLUTION_MS: u64 = 1000;

/// The LRU clock is 24 bits wide and wraps at this value.
pub const LRU_CLOCK_MAX: u32 = (1 << 24) - 1;

/// Current wall clock in milliseconds since the epoch.
pub fn wall_clock_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Wall clock in minutes, truncated to 16 bits for LFU decay timestamps.
pub fn lfu_now_minutes() -> u16 {
    ((Utc::now().timestamp() / 60) & 0xFFFF) as u16
}

/// Cached 24-bit LRU clock.
///
/// The cached tick is refreshed by the periodic tick running at `hz`.
/// Readers take the cached value when the refresh period is at least as
/// fine as the clock resolution, otherwise they fall through to the
/// system clock.
#[derive(Debug)]
pub struct LruClock {
    cached: AtomicU32,
    hz: u32,
}

impl LruClock {
    pub fn new(hz: u32) -> Self {
        Self {
            cached: AtomicU32::new(Self::system_tick()),
            hz: hz.max(1),
        }
    }

    /// Refresh the cached tick from the system clock.
    pub fn update(&self) {
        self.cached.store(Self::system_tick(), Ordering::Relaxed);
    }

    /// Current LRU clock tick.
    pub fn now(&self) -> u32 {
        if 1000 / self.hz as u64 <= LRU_CLOCK_RESOLUTION_MS {
            self.cached.load(Ordering::Relaxed)
        } else {
            Self::system_tick()
        }
    }

    /// Convert a millisecond timestamp into a wrapped clock tick.
    pub fn tick_from_ms(ms: u64) -> u32 {
        ((ms / LRU_CLOCK_RESOLUTION_MS) & LRU_CLOCK_MAX as u64) as u32
    }

    fn system_tick() -> u32 {
        Self::tick_from_ms(wall_clock_ms())
    }

    pub(crate) fn set_cached(&self, tick: u32) {
        self.cached.store(tick & LRU_CLOCK_MAX, Ordering::Relaxed);
    }
}

/// Estimated idle time in milliseconds for an object last stamped at `stamp`.
///
/// Handles a single wrap of the 24-bit clock. Multiple wraps are not
/// distinguishable; the clock period is roughly 194 days at 1 s resolution.
pub fn estimate_idle_ms(now: u32, stamp: u32) -> u64 {
    let ticks = if now >= stamp {
        (now - stamp) as u64
    } else {
        now as u64 + ((LRU_CLOCK_MAX as u64 + 1) - stamp as u64)
    };
    ticks * LRU_CLOCK_RESOLUTION_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_wraps_at_24_bits() {
        assert_eq!(LruClock::tick_from_ms(0), 0);
        assert_eq!(
            LruClock::tick_from_ms((LRU_CLOCK_MAX as u64 + 1) * 1000),
            0
        );
        assert_eq!(
            LruClock::tick_from_ms((LRU_CLOCK_MAX as u64 + 2) * 1000),
            1
        );
    }

    #[test]
    fn test_idle_zero_when_stamp_is_now() {
        assert_eq!(estimate_idle_ms(42, 42), 0);
    }

    #[test]
    fn test_idle_grows_with_elapsed_ticks() {
        assert_eq!(estimate_idle_ms(100, 90), 10 * LRU_CLOCK_RESOLUTION_MS);
        assert!(estimate_idle_ms(100, 80) > estimate_idle_ms(100, 90));
    }

    #[test]
    fn test_idle_across_wrap() {
        // Stamped one tick before the wrap, read one tick after it.
        let idle = estimate_idle_ms(0, LRU_CLOCK_MAX);
        assert_eq!(idle, LRU_CLOCK_RESOLUTION_MS);
        assert_eq!(estimate_idle_ms(5, LRU_CLOCK_MAX), 6 * LRU_CLOCK_RESOLUTION_MS);
    }

    #[test]
    fn test_cached_read() {
        let clock = LruClock::new(10);
        clock.set_cached(1234);
        assert_eq!(clock.now(), 1234);
        clock.update();
        // After a refresh the tick tracks the system clock again.
        let now_tick = LruClock::tick_from_ms(wall_clock_ms());
        assert!(estimate_idle_ms(now_tick, clock.now()) <= LRU_CLOCK_RESOLUTION_MS);
    }

    #[test]
    fn test_lfu_minutes_fits_16_bits() {
        let m = lfu_now_minutes();
        assert!(u32::from(m) <= 0xFFFF);
    }
}
