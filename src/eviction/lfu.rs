//! LFU Counter Arithmetic
//!
//! Probabilistic log-counter increment and time-based decay.

use rand::Rng;

/// Counter value given to newly created objects.
///
/// Starting above zero gives fresh keys a grace period before they look
/// colder than keys that were simply never accessed again.
pub const LFU_INIT_VAL: u8 = 5;

/// Saturation point of the 8-bit log counter.
pub const LFU_COUNTER_MAX: u8 = 255;

/// Probabilistically advance a log counter after an access.
///
/// The chance of an increment is `1 / (base * log_factor + 1)` where
/// `base` is the counter's distance above [`LFU_INIT_VAL`], so higher
/// counters advance increasingly rarely. Saturates at 255.
pub fn log_incr<R: Rng + ?Sized>(counter: u8, log_factor: u32, rng: &mut R) -> u8 {
    if counter == LFU_COUNTER_MAX {
        return LFU_COUNTER_MAX;
    }
    let base = counter.saturating_sub(LFU_INIT_VAL) as f64;
    let p = 1.0 / (base * log_factor as f64 + 1.0);
    if rng.random::<f64>() < p {
        counter + 1
    } else {
        counter
    }
}

/// Minutes elapsed since `ldt` on the wrapping 16-bit minutes clock.
pub fn elapsed_minutes(now: u16, ldt: u16) -> u16 {
    if now >= ldt {
        now - ldt
    } else {
        ((1u32 << 16) - ldt as u32 + now as u32) as u16
    }
}

/// Effective counter after time decay, for scoring.
///
/// One decrement per full `decay_time` period elapsed since `ldt`;
/// `decay_time == 0` disables decay. The result is never written back
/// here: decay is only persisted when the object is actually accessed.
pub fn decay(ldt: u16, counter: u8, now_minutes: u16, decay_time: u64) -> u8 {
    if decay_time == 0 {
        return counter;
    }
    let periods = elapsed_minutes(now_minutes, ldt) as u64 / decay_time;
    counter.saturating_sub(periods.min(u8::MAX as u64) as u8)
}
