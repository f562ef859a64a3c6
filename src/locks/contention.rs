/*!
 * Contention Tracking
 *
 * Per-lock exponentially weighted estimates feeding the adaptive spin budget
 * and the fairness timeout.
 *
 * # Scope
 *
 * The estimate is **per-lock**, not per-thread: it tracks the lock's
 * aggregate pressure, which is what the tier thresholds are calibrated
 * against. Updates happen only on the thread currently attempting (or
 * releasing) an acquisition; reads elsewhere are unsynchronized and
 * best-effort, so everything here is Relaxed.
 */

use crate::config::settings;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

/// Contention sample recorded when a thread exhausts its spin budget.
/// The EMA therefore ranges over [0, 256].
const PARK_SAMPLE: u32 = 256;

/// EMA weight denominator: 7/8 old, 1/8 new
const EMA_SHIFT: u32 = 3;

/// Per-lock contention and wait-time estimator
#[derive(Debug, Default)]
pub struct ContentionMeter {
    /// EMA of contention samples (0 = uncontended, 256 = always parking)
    contention: AtomicU32,
    /// EMA of observed waiter wait times, in nanoseconds
    avg_wait_ns: AtomicU64,
}

impl ContentionMeter {
    pub const fn new() -> Self {
        Self {
            contention: AtomicU32::new(0),
            avg_wait_ns: AtomicU64::new(0),
        }
    }

    /// Spin budget for the next acquisition attempt, re-evaluated per attempt
    ///
    /// Three tiers: low contention earns a small budget (spinning rarely
    /// helps when the lock is mostly free anyway), high contention a larger
    /// one (the holder is likely to release soon, parking would be wasted).
    #[inline]
    pub fn spin_budget(&self) -> u32 {
        let config = settings();
        let contention = self.contention.load(Ordering::Relaxed);
        if contention < config.contention_low {
            config.spin_low
        } else if contention < config.contention_high {
            config.spin_medium
        } else {
            config.spin_high
        }
    }

    /// Record a cheap acquisition (fast path or spin phase succeeded)
    #[inline]
    pub fn record_uncontended(&self) {
        self.update_contention(0);
    }

    /// Record a spin exhaustion (the thread is about to park)
    #[inline]
    pub fn record_parked(&self) {
        self.update_contention(PARK_SAMPLE);
    }

    fn update_contention(&self, sample: u32) {
        let old = self.contention.load(Ordering::Relaxed);
        let new = old - (old >> EMA_SHIFT) + (sample >> EMA_SHIFT);
        self.contention.store(new, Ordering::Relaxed);
    }

    /// Record how long a woken waiter had been parked
    #[inline]
    pub fn record_wait(&self, waited: Duration) {
        let sample = waited.as_nanos().min(u64::MAX as u128) as u64;
        let old = self.avg_wait_ns.load(Ordering::Relaxed);
        let new = old - (old >> EMA_SHIFT) + (sample >> EMA_SHIFT);
        self.avg_wait_ns.store(new, Ordering::Relaxed);
    }

    /// Adaptive fairness timeout: waiters older than this get the lock
    /// handed to them directly on release
    ///
    /// Twice the average observed wait, clamped to the configured range so a
    /// misconfigured or cold estimate can never disable the fairness bound.
    #[inline]
    pub fn fair_timeout(&self) -> Duration {
        let config = settings();
        let avg = Duration::from_nanos(self.avg_wait_ns.load(Ordering::Relaxed));
        (avg * 2).clamp(config.fair_timeout_min, config.fair_timeout_max)
    }

    /// Current contention estimate (diagnostics)
    #[inline]
    pub fn contention(&self) -> u32 {
        self.contention.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_tiers() {
        let config = settings();
        let meter = ContentionMeter::new();
        assert_eq!(meter.spin_budget(), config.spin_low);

        // Sustained parking drives the estimate into the high tier
        for _ in 0..64 {
            meter.record_parked();
        }
        assert_eq!(meter.spin_budget(), config.spin_high);

        // Sustained cheap acquisitions decay it back down
        for _ in 0..64 {
            meter.record_uncontended();
        }
        assert_eq!(meter.spin_budget(), config.spin_low);
    }

    #[test]
    fn test_ema_converges_to_sample() {
        let meter = ContentionMeter::new();
        for _ in 0..128 {
            meter.record_parked();
        }
        // EMA of a constant input converges just below the input
        let c = meter.contention();
        assert!(c > PARK_SAMPLE - 16 && c <= PARK_SAMPLE, "EMA was {c}");
    }

    #[test]
    fn test_fair_timeout_clamped() {
        let config = settings();
        let meter = ContentionMeter::new();

        // Cold estimate clamps to the minimum
        assert_eq!(meter.fair_timeout(), config.fair_timeout_min);

        // Enormous waits clamp to the maximum
        for _ in 0..128 {
            meter.record_wait(Duration::from_secs(1));
        }
        assert_eq!(meter.fair_timeout(), config.fair_timeout_max);
    }
}
