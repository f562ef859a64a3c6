/*!
 * Locks
 *
 * Parking-based mutual exclusion with contention-adaptive spinning.
 */

mod adaptive;
mod contention;

pub use adaptive::{AdaptiveMutex, AdaptiveMutexGuard, RawAdaptiveMutex};
pub use contention::ContentionMeter;
