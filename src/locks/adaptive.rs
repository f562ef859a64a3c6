/*!
 * Adaptive Mutex
 *
 * Compact parking-based mutex with a spin phase whose budget tracks recent
 * observed contention instead of a fixed constant.
 *
 * # Design
 *
 * The lock word is a single `AtomicU8` with two flag bits. Acquisition is a
 * CAS fast path, then a tiered spin phase (budget from [`ContentionMeter`]),
 * then a park in the process-wide [`ParkingTable`]. The release path makes
 * all state transitions inside the unpark callback, i.e. under the bucket
 * guard, so `HAS_PARKED` is cleared exactly when the last waiter leaves and
 * a concurrently arriving parker can never miss its wakeup.
 *
 * # Fairness
 *
 * Barging is allowed (a releasing thread's wake races spinners), but a
 * waiter that has been parked longer than the adaptive fairness timeout is
 * granted the lock directly: release leaves `LOCKED` set and delivers a
 * handoff token, bypassing any spinner. The timeout follows a moving average
 * of observed wait times, clamped so it can never be disabled.
 */

use super::contention::ContentionMeter;
use crate::errors::{LockError, LockResult};
use crate::park::{table, ParkResult, UnparkToken};
use std::cell::UnsafeCell;
use std::fmt;
use std::hint;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;

/// Lock word bit: held by some thread
const LOCKED: u8 = 0b01;
/// Lock word bit: at least one waiter is parked on this lock's identity
const HAS_PARKED: u8 = 0b10;

/// Ordinary wakeup: the woken thread must race for the lock again
const TOKEN_NORMAL: UnparkToken = UnparkToken(0);
/// Direct handoff: `LOCKED` was left set on the woken thread's behalf
const TOKEN_HANDOFF: UnparkToken = UnparkToken(1);

/// Raw adaptive mutex: the 2-bit lock word plus contention state
///
/// Most users want the data-carrying [`AdaptiveMutex`]; the raw form exists
/// for embedding into structures that manage their own data placement.
pub struct RawAdaptiveMutex {
    state: AtomicU8,
    meter: ContentionMeter,
}

impl RawAdaptiveMutex {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(0),
            meter: ContentionMeter::new(),
        }
    }

    /// Parking identity: the lock word's address
    #[inline]
    fn key(&self) -> usize {
        &self.state as *const AtomicU8 as usize
    }

    /// Single CAS attempt; succeeds or fails immediately, never blocks
    #[inline]
    pub fn try_acquire(&self) -> LockResult<()> {
        let state = self.state.load(Ordering::Relaxed);
        if state & LOCKED == 0
            && self
                .state
                .compare_exchange(state, state | LOCKED, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
        {
            Ok(())
        } else {
            Err(LockError::WouldBlock)
        }
    }

    /// Acquire, blocking (spin-then-park) until the lock is held
    #[inline]
    pub fn acquire(&self) {
        if self.try_acquire().is_ok() {
            self.meter.record_uncontended();
            return;
        }
        // No deadline, so TimedOut is impossible
        let _ = self.acquire_slow(None);
    }

    /// Acquire with a deadline
    ///
    /// On expiry the thread removes itself from its parking bucket and
    /// returns [`LockError::TimedOut`]; it never relies on a spurious wakeup.
    #[inline]
    pub fn acquire_until(&self, deadline: Instant) -> LockResult<()> {
        if self.try_acquire().is_ok() {
            self.meter.record_uncontended();
            return Ok(());
        }
        self.acquire_slow(Some(deadline))
    }

    #[cold]
    fn acquire_slow(&self, deadline: Option<Instant>) -> LockResult<()> {
        let since = Instant::now();
        loop {
            // Spin phase: budget re-evaluated per attempt from the meter
            let budget = self.meter.spin_budget();
            for _ in 0..budget {
                let state = self.state.load(Ordering::Relaxed);
                if state & LOCKED == 0
                    && self
                        .state
                        .compare_exchange_weak(
                            state,
                            state | LOCKED,
                            Ordering::Acquire,
                            Ordering::Relaxed,
                        )
                        .is_ok()
                {
                    self.meter.record_uncontended();
                    return Ok(());
                }
                hint::spin_loop();
            }

            // Spin exhausted: mark the word and park
            self.meter.record_parked();
            let mut state = self.state.load(Ordering::Relaxed);
            loop {
                if state & LOCKED == 0 {
                    match self.state.compare_exchange_weak(
                        state,
                        state | LOCKED,
                        Ordering::Acquire,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => {
                            self.meter.record_uncontended();
                            return Ok(());
                        }
                        Err(actual) => state = actual,
                    }
                    continue;
                }
                if state & HAS_PARKED != 0 {
                    break;
                }
                match self.state.compare_exchange_weak(
                    state,
                    state | HAS_PARKED,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => break,
                    Err(actual) => state = actual,
                }
            }

            let result = table().park(
                self.key(),
                since,
                // Re-checked under the bucket guard: a release that slipped in
                // between our check and bucket entry aborts the park.
                || self.state.load(Ordering::Relaxed) == LOCKED | HAS_PARKED,
                // Timed out as the last waiter: clear the bit so release
                // stops signalling into an empty bucket. Runs under the
                // bucket guard, so it cannot race a new parker's validate.
                |was_last| {
                    if was_last {
                        self.state.fetch_and(!HAS_PARKED, Ordering::Relaxed);
                    }
                },
                deadline,
            );

            match result {
                ParkResult::Unparked(TOKEN_HANDOFF) => {
                    // Ownership was transferred directly; LOCKED is already
                    // set on our behalf.
                    return Ok(());
                }
                ParkResult::TimedOut => return Err(LockError::TimedOut),
                // Ordinary wakeup or aborted park: race for the lock again
                ParkResult::Unparked(_) | ParkResult::Invalid => {}
            }
        }
    }

    /// Release the lock
    ///
    /// Caller must hold it. Fast path is a single CAS; the slow path wakes
    /// the eldest waiter, handing the lock over directly when that waiter
    /// has exceeded the fairness timeout.
    #[inline]
    pub fn release(&self) {
        if self
            .state
            .compare_exchange(LOCKED, 0, Ordering::Release, Ordering::Relaxed)
            .is_ok()
        {
            return;
        }
        self.release_slow();
    }

    #[cold]
    fn release_slow(&self) {
        let fair_timeout = self.meter.fair_timeout();
        table().unpark_one(self.key(), |summary| {
            if summary.unparked == 1 {
                self.meter.record_wait(summary.waited);
                if summary.waited >= fair_timeout {
                    log::trace!("fair handoff after {:?} wait", summary.waited);
                    let next = LOCKED | if summary.have_more { HAS_PARKED } else { 0 };
                    self.state.store(next, Ordering::Release);
                    return TOKEN_HANDOFF;
                }
            }
            // Ordinary release: drop LOCKED, keep HAS_PARKED only while
            // waiters remain. Runs under the bucket guard, atomically with
            // the removal that produced `summary`.
            let next = if summary.have_more { HAS_PARKED } else { 0 };
            self.state.store(next, Ordering::Release);
            TOKEN_NORMAL
        });
    }

    /// Whether the lock is currently held (diagnostics; racy by nature)
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed) & LOCKED != 0
    }

    /// Current contention estimate (diagnostics)
    #[inline]
    pub fn contention(&self) -> u32 {
        self.meter.contention()
    }
}

impl Default for RawAdaptiveMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RawAdaptiveMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawAdaptiveMutex")
            .field("locked", &self.is_locked())
            .field("contention", &self.contention())
            .finish()
    }
}

/// Data-carrying adaptive mutex with RAII guard
pub struct AdaptiveMutex<T: ?Sized> {
    raw: RawAdaptiveMutex,
    data: UnsafeCell<T>,
}

// Safety: the raw lock serializes access to `data`
unsafe impl<T: ?Sized + Send> Send for AdaptiveMutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for AdaptiveMutex<T> {}

impl<T> AdaptiveMutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            raw: RawAdaptiveMutex::new(),
            data: UnsafeCell::new(value),
        }
    }

    /// Consume the mutex, returning the inner value
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> AdaptiveMutex<T> {
    /// Acquire the lock, blocking until held
    #[inline]
    pub fn lock(&self) -> AdaptiveMutexGuard<'_, T> {
        self.raw.acquire();
        AdaptiveMutexGuard { mutex: self }
    }

    /// Try to acquire without blocking
    #[inline]
    pub fn try_lock(&self) -> LockResult<AdaptiveMutexGuard<'_, T>> {
        self.raw.try_acquire()?;
        Ok(AdaptiveMutexGuard { mutex: self })
    }

    /// Acquire with a deadline
    #[inline]
    pub fn lock_until(&self, deadline: Instant) -> LockResult<AdaptiveMutexGuard<'_, T>> {
        self.raw.acquire_until(deadline)?;
        Ok(AdaptiveMutexGuard { mutex: self })
    }

    /// Access the raw lock (diagnostics)
    #[inline]
    pub fn raw(&self) -> &RawAdaptiveMutex {
        &self.raw
    }

    /// Mutable access without locking (requires exclusive borrow)
    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: fmt::Debug> fmt::Debug for AdaptiveMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_lock() {
            Ok(guard) => f.debug_struct("AdaptiveMutex").field("data", &*guard).finish(),
            Err(_) => f.write_str("AdaptiveMutex { <locked> }"),
        }
    }
}

/// RAII guard; releases on drop
pub struct AdaptiveMutexGuard<'a, T: ?Sized> {
    mutex: &'a AdaptiveMutex<T>,
}

impl<T: ?Sized> Deref for AdaptiveMutexGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // Safety: the guard holds the lock
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for AdaptiveMutexGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // Safety: the guard holds the lock exclusively
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for AdaptiveMutexGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.mutex.raw.release();
    }
}
