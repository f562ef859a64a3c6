/*!
 * Runtime Sync Substrate
 *
 * Adaptive concurrency primitives for a multithreaded runtime's scheduler:
 * a bucketed parking table, a parking-based mutex with contention-adaptive
 * spinning, a lock-free MPMC queue, a bounded work-stealing deque, and a
 * batch dispatcher that amortizes critical sections.
 *
 * # Architecture
 *
 * [`park::ParkingTable`] is the foundation: threads block and wake keyed by
 * a lock's identity, without one OS synchronization object per lock.
 * [`locks::AdaptiveMutex`] builds mutual exclusion on top of it, with a spin
 * budget that follows recently observed contention and an adaptive fairness
 * bound. [`lockfree::LockFreeQueue`] and [`lockfree::WorkStealingDeque`]
 * move ready work between threads without blocking producers; the deque
 * spills to the queue when full. [`batch::BatchDispatcher`] drains a guarded
 * pool in bounded groups, executing items outside any lock.
 *
 * This crate is the synchronization substrate a scheduler is built on, not a
 * scheduler itself: it exposes no event loop and spawns no threads.
 */

pub mod batch;
pub mod config;
pub mod errors;
pub mod lockfree;
pub mod locks;
pub mod park;

// Re-exports
pub use batch::{Batch, BatchDispatcher, SharedPool};
pub use config::{settings, SyncConfig};
pub use errors::{Full, LockError, LockResult};
pub use lockfree::{LockFreeQueue, Stealer, Worker, WorkStealingDeque};
pub use locks::{AdaptiveMutex, AdaptiveMutexGuard, RawAdaptiveMutex};
pub use park::{ParkResult, ParkingTable, UnparkSummary, UnparkToken};
