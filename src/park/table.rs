/*!
 * Parking Table
 *
 * Fixed array of hash buckets mapping a lock's identity (its address) to a
 * FIFO list of parked waiter records.
 *
 * # Design
 *
 * - Bucket count is prime (from [`SyncConfig`]) and fixed at construction;
 *   resizing would require rehashing live waiters, which is not supported.
 * - Bucket guards are short-held `parking_lot::Mutex`es. No operation blocks
 *   while holding a guard except the parked thread itself, which always
 *   releases the guard before sleeping.
 * - Lost wakeups are prevented by running the caller's `validate` predicate
 *   under the bucket guard: a wakeup arriving between the caller's earlier
 *   check and bucket entry is observed by `validate` and aborts the park.
 * - A waiter record is owned by the table while parked; removal transfers
 *   ownership to the waking (or timed-out) thread. Records never persist
 *   across a park/unpark cycle.
 */

use crate::config::{settings, SyncConfig};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

/// Value delivered from an unparker to the thread it wakes
///
/// Lets the waking side hand context to the woken side while both are
/// synchronized through the bucket guard (e.g. a direct lock handoff).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnparkToken(pub usize);

/// Outcome of a park operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParkResult {
    /// Woken by an unparker, carrying its token
    Unparked(UnparkToken),
    /// The validate predicate said not to block; nothing was enqueued
    Invalid,
    /// Deadline elapsed; the waiter removed itself from its bucket
    TimedOut,
}

/// What an unpark operation found, observed under the bucket guard
#[derive(Debug, Clone, Copy)]
pub struct UnparkSummary {
    /// Number of waiters removed (0 or 1 for `unpark_one`)
    pub unparked: usize,
    /// Whether waiters for the same key remain after removal
    pub have_more: bool,
    /// How long the removed waiter had been waiting (zero if none)
    pub waited: Duration,
}

/// A parked thread, owned by its bucket until removed
struct Waiter {
    /// Identity of the lock this thread is blocked on
    key: usize,
    /// Handle used to resume the thread
    thread: Thread,
    /// When the waiter first failed to acquire (fairness accounting)
    since: Instant,
    /// Set by the unparker after `token`; the handshake that ends the park
    unparked: AtomicBool,
    token: AtomicUsize,
}

impl Waiter {
    fn new(key: usize, since: Instant) -> Self {
        Self {
            key,
            thread: thread::current(),
            since,
            unparked: AtomicBool::new(false),
            token: AtomicUsize::new(0),
        }
    }

    /// Token store must precede the flag store; readers pair Acquire on the
    /// flag with a Relaxed token load.
    fn wake(&self, token: UnparkToken) {
        self.token.store(token.0, Ordering::Relaxed);
        self.unparked.store(true, Ordering::Release);
        self.thread.unpark();
    }
}

#[repr(C, align(64))] // Cache-line aligned to prevent false sharing
struct Bucket {
    waiters: Mutex<VecDeque<Arc<Waiter>>>,
}

impl Bucket {
    fn new() -> Self {
        Self {
            waiters: Mutex::new(VecDeque::new()),
        }
    }
}

/// Bucketed parking table
///
/// Most callers use the process-wide [`table`]; standalone instances exist
/// for tests and embedders with their own configuration.
pub struct ParkingTable {
    buckets: Box<[Bucket]>,
}

impl ParkingTable {
    /// Create a table with `config.bucket_count` buckets
    pub fn new(config: &SyncConfig) -> Self {
        let buckets = (0..config.bucket_count).map(|_| Bucket::new()).collect();
        Self { buckets }
    }

    #[inline]
    fn bucket_for(&self, key: usize) -> &Bucket {
        let mut hasher = ahash::AHasher::default();
        key.hash(&mut hasher);
        // Prime bucket count, so plain modulo rather than a mask
        &self.buckets[hasher.finish() as usize % self.buckets.len()]
    }

    /// Park the calling thread until a matching unpark or the deadline
    ///
    /// `validate` runs under the bucket guard and must re-check that blocking
    /// is still warranted; returning `false` aborts with [`ParkResult::Invalid`]
    /// without enqueueing. `since` is the instant the caller first failed to
    /// make progress, reported to unparkers for fairness decisions.
    ///
    /// On deadline expiry the waiter removes itself under the bucket guard and
    /// `timed_out` runs (still under the guard) with whether it was the last
    /// waiter for `key` — callers use this to clear a "has parked" bit without
    /// racing a concurrent parker. If an unparker claimed the waiter before it
    /// could remove itself, the park completes as `Unparked` instead.
    pub fn park(
        &self,
        key: usize,
        since: Instant,
        validate: impl FnOnce() -> bool,
        timed_out: impl FnOnce(bool),
        deadline: Option<Instant>,
    ) -> ParkResult {
        let bucket = self.bucket_for(key);
        let mut waiters = bucket.waiters.lock();
        if !validate() {
            return ParkResult::Invalid;
        }
        let waiter = Arc::new(Waiter::new(key, since));
        waiters.push_back(Arc::clone(&waiter));
        drop(waiters);

        loop {
            if waiter.unparked.load(Ordering::Acquire) {
                return ParkResult::Unparked(UnparkToken(waiter.token.load(Ordering::Relaxed)));
            }
            match deadline {
                None => thread::park(),
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        let mut waiters = bucket.waiters.lock();
                        if let Some(idx) =
                            waiters.iter().position(|w| Arc::ptr_eq(w, &waiter))
                        {
                            waiters.remove(idx);
                            let was_last = !waiters.iter().any(|w| w.key == key);
                            timed_out(was_last);
                            return ParkResult::TimedOut;
                        }
                        drop(waiters);
                        // An unparker already took us out of the bucket;
                        // finish the handshake and report the wakeup.
                        while !waiter.unparked.load(Ordering::Acquire) {
                            thread::park();
                        }
                        return ParkResult::Unparked(UnparkToken(
                            waiter.token.load(Ordering::Relaxed),
                        ));
                    }
                    thread::park_timeout(d - now);
                }
            }
        }
    }

    /// Remove and resume the earliest-inserted waiter for `key` (FIFO)
    ///
    /// `callback` runs under the bucket guard with what the unpark found and
    /// chooses the token delivered to the woken thread; state transitions made
    /// inside it are therefore atomic with respect to parking threads'
    /// `validate` checks. Finding no waiter is a normal result, not an error.
    pub fn unpark_one(
        &self,
        key: usize,
        callback: impl FnOnce(&UnparkSummary) -> UnparkToken,
    ) -> UnparkSummary {
        let bucket = self.bucket_for(key);
        let mut waiters = bucket.waiters.lock();
        let found = waiters
            .iter()
            .position(|w| w.key == key)
            .and_then(|idx| waiters.remove(idx));
        match found {
            Some(waiter) => {
                let summary = UnparkSummary {
                    unparked: 1,
                    have_more: waiters.iter().any(|w| w.key == key),
                    waited: waiter.since.elapsed(),
                };
                let token = callback(&summary);
                drop(waiters);
                waiter.wake(token);
                summary
            }
            None => {
                let summary = UnparkSummary {
                    unparked: 0,
                    have_more: false,
                    waited: Duration::ZERO,
                };
                callback(&summary);
                summary
            }
        }
    }

    /// Remove and resume all waiters for `key` in insertion order
    ///
    /// Used for broadcast wakeups and lock teardown. Returns the number of
    /// waiters resumed.
    pub fn unpark_all(&self, key: usize, token: UnparkToken) -> usize {
        let bucket = self.bucket_for(key);
        let mut waiters = bucket.waiters.lock();
        let mut woken = Vec::new();
        let mut idx = 0;
        while idx < waiters.len() {
            if waiters[idx].key == key {
                if let Some(waiter) = waiters.remove(idx) {
                    woken.push(waiter);
                }
            } else {
                idx += 1;
            }
        }
        drop(waiters);
        for waiter in &woken {
            waiter.wake(token);
        }
        woken.len()
    }

    /// Approximate number of waiters parked on `key` (diagnostics only)
    pub fn waiter_count(&self, key: usize) -> usize {
        let bucket = self.bucket_for(key);
        bucket.waiters.lock().iter().filter(|w| w.key == key).count()
    }
}

static TABLE: OnceLock<ParkingTable> = OnceLock::new();

/// Process-wide parking table, built from [`settings`] on first use
#[inline]
pub fn table() -> &'static ParkingTable {
    TABLE.get_or_init(|| ParkingTable::new(settings()))
}
