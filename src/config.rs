/*!
 * Synchronization Configuration
 *
 * Process-wide tuning knobs for the sync substrate, computed once at startup
 * from a hardware-parallelism probe and immutable thereafter.
 *
 * # Design
 *
 * Bucket count, spin tiers, and fairness clamp bounds live in a single
 * `SyncConfig` stored in a `OnceLock`. Nothing re-derives these values at
 * runtime: changing the bucket count after initialization would require
 * rehashing live waiters, which is not supported.
 */

use std::sync::OnceLock;
use std::time::Duration;

/// Prime bucket counts for the parking table.
///
/// Odd/prime counts reduce collision clustering when lock addresses share
/// low-order alignment bits. Chosen as the smallest entry >= 4x CPU count.
const BUCKET_PRIMES: &[usize] = &[53, 97, 193, 389, 769, 1543, 3079];

/// Synchronization configuration
///
/// Constructed once (usually via [`settings`]) and never mutated. All
/// consumers read through shared references.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Number of parking-table buckets (prime, fixed at startup)
    pub bucket_count: usize,
    /// Spin budget under low contention
    pub spin_low: u32,
    /// Spin budget under medium contention
    pub spin_medium: u32,
    /// Spin budget under high contention
    pub spin_high: u32,
    /// Contention estimate below this is "low"
    pub contention_low: u32,
    /// Contention estimate below this is "medium"; at or above, "high"
    pub contention_high: u32,
    /// Lower clamp for the adaptive fairness timeout
    pub fair_timeout_min: Duration,
    /// Upper clamp for the adaptive fairness timeout
    pub fair_timeout_max: Duration,
    /// Maximum items drained per batch by the dispatcher
    pub max_batch: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            bucket_count: bucket_count_for(cpu_count()),
            spin_low: 20,
            spin_medium: 40,
            spin_high: 60,
            contention_low: 10,
            contention_high: 100,
            fair_timeout_min: Duration::from_micros(100),
            fair_timeout_max: Duration::from_millis(10),
            max_batch: 16,
        }
    }
}

impl SyncConfig {
    /// Install a custom configuration before first use
    ///
    /// Returns `false` if the process-wide settings were already initialized,
    /// in which case the installed defaults remain in effect.
    pub fn install(self) -> bool {
        SETTINGS.set(self).is_ok()
    }
}

static SETTINGS: OnceLock<SyncConfig> = OnceLock::new();

/// Process-wide settings, initialized from defaults on first access
#[inline]
pub fn settings() -> &'static SyncConfig {
    SETTINGS.get_or_init(SyncConfig::default)
}

/// Query hardware parallelism (called once per config construction)
#[inline]
pub fn cpu_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or_else(|_| {
            log::warn!("Failed to detect CPU count, defaulting to 8");
            8
        })
}

/// Smallest prime bucket count >= 4x the CPU count, clamped to the table
fn bucket_count_for(cpus: usize) -> usize {
    let target = cpus.saturating_mul(4);
    BUCKET_PRIMES
        .iter()
        .copied()
        .find(|&p| p >= target)
        .unwrap_or(3079)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_count_is_prime_table_entry() {
        let config = SyncConfig::default();
        assert!(BUCKET_PRIMES.contains(&config.bucket_count));
        assert!(config.bucket_count % 2 == 1, "Bucket count must be odd");
    }

    #[test]
    fn test_bucket_count_scales_with_cpus() {
        assert_eq!(bucket_count_for(1), 53);
        assert_eq!(bucket_count_for(8), 53);
        assert_eq!(bucket_count_for(16), 97);
        assert_eq!(bucket_count_for(64), 389);
        // Absurd counts clamp to the largest table entry
        assert_eq!(bucket_count_for(100_000), 3079);
    }

    #[test]
    fn test_tier_ordering() {
        let config = SyncConfig::default();
        assert!(config.spin_low < config.spin_medium);
        assert!(config.spin_medium < config.spin_high);
        assert!(config.contention_low < config.contention_high);
        assert!(config.fair_timeout_min < config.fair_timeout_max);
    }

    #[test]
    fn test_settings_stable() {
        let a = settings().bucket_count;
        let b = settings().bucket_count;
        assert_eq!(a, b);
    }
}
