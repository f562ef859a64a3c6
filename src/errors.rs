/*!
 * Error Types
 * Centralized error handling with thiserror
 */

use std::fmt;
use thiserror::Error;

/// Result type for lock acquisition
pub type LockResult<T> = Result<T, LockError>;

/// Lock acquisition errors
///
/// Neither variant is fatal: `WouldBlock` is the expected outcome of a failed
/// `try_acquire`, and `TimedOut` means the caller's deadline elapsed while
/// parked. Empty pops/steals are expressed as `Option::None`, not errors.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockError {
    #[error("Lock is held by another thread")]
    WouldBlock,

    #[error("Acquire deadline elapsed")]
    TimedOut,
}

/// Rejected push on a full work-stealing deque
///
/// Carries the rejected item back so the owner can spill it to a shared
/// overflow queue instead of dropping it. Display and Debug never touch the
/// payload, so `T` needs no bounds to report the error.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Full<T>(pub T);

impl<T> Full<T> {
    /// Take back the rejected item
    #[inline]
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for Full<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Full(..)")
    }
}

impl<T> fmt::Display for Full<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Deque is at capacity")
    }
}

impl<T> std::error::Error for Full<T> {}
