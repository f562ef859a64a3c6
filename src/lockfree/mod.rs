/*!
 * Lock-Free Structures
 *
 * Non-blocking queues for cross-thread work handoff:
 * - [`LockFreeQueue`]: unbounded MPMC FIFO (Michael–Scott, epoch-reclaimed)
 * - [`WorkStealingDeque`]: bounded deque, owner at one end, stealers at the other
 */

mod deque;
mod queue;

pub use deque::{Stealer, Worker, WorkStealingDeque};
pub use queue::LockFreeQueue;
