/*!
 * Batch Dispatch
 *
 * Amortizes synchronization cost by draining a guarded source in bounded
 * groups under one critical section, then executing items outside any lock.
 *
 * # Design
 *
 * `collect` takes the source guard exactly once per batch, regardless of
 * batch size; item logic always runs after the guard is released, so a slow
 * item never extends the critical section. The batch bound is fixed at
 * dispatcher construction — a deliberate simplicity tradeoff versus the
 * adaptive lock: batch sizing has no starvation hazard to adapt against.
 *
 * # Ordering
 *
 * Within a batch, execution follows the source's pop order. Across batches
 * collected by concurrent dispatcher threads, no ordering is guaranteed.
 */

use crate::config::settings;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// A guarded FIFO source that dispatchers drain in batches
///
/// The slow-path companion to the lock-free queues: producers that lose a
/// capacity race (e.g. a full work-stealing deque) spill here.
#[derive(Debug, Default)]
pub struct SharedPool<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> SharedPool<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }

    /// Add an item at the back of the pool
    pub fn push(&self, item: T) {
        self.items.lock().push_back(item);
    }

    /// Number of items currently pooled (approximate under concurrency)
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

/// A collected group of items; transient and stack-scoped, never shared
#[derive(Debug)]
pub struct Batch<T> {
    items: Vec<T>,
}

impl<T> Batch<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T> IntoIterator for Batch<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

/// Drains a [`SharedPool`] in bounded batches
#[derive(Debug, Clone, Copy)]
pub struct BatchDispatcher {
    max_batch: usize,
}

impl BatchDispatcher {
    /// Create a dispatcher with a fixed batch bound
    pub fn new(max_batch: usize) -> Self {
        assert!(max_batch > 0, "Batch bound must be greater than 0");
        Self { max_batch }
    }

    /// Create with the process-wide configured bound
    pub fn from_settings() -> Self {
        Self::new(settings().max_batch)
    }

    pub fn max_batch(&self) -> usize {
        self.max_batch
    }

    /// Pop up to `max_batch` items under a single guard acquisition
    ///
    /// Stops early if the source runs dry; the guard is released before
    /// returning and is never held during item execution.
    pub fn collect<T>(&self, source: &SharedPool<T>) -> Batch<T> {
        let mut queue = source.items.lock();
        let take = self.max_batch.min(queue.len());
        let items = queue.drain(..take).collect();
        drop(queue);
        Batch { items }
    }

    /// Run `work` on each item in collection order, outside any lock
    pub fn execute<T>(&self, batch: Batch<T>, mut work: impl FnMut(T)) {
        for item in batch {
            work(item);
        }
    }

    /// Collect one batch and execute it; returns the batch size
    ///
    /// A zero return means the source was empty.
    pub fn dispatch<T>(&self, source: &SharedPool<T>, work: impl FnMut(T)) -> usize {
        let batch = self.collect(source);
        let count = batch.len();
        self.execute(batch, work);
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_sizes_bounded() {
        let pool = SharedPool::new();
        for i in 0..50 {
            pool.push(i);
        }

        let dispatcher = BatchDispatcher::new(16);
        let mut sizes = Vec::new();
        loop {
            let batch = dispatcher.collect(&pool);
            if batch.is_empty() {
                break;
            }
            sizes.push(batch.len());
        }
        assert_eq!(sizes, vec![16, 16, 16, 2]);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_execute_preserves_collection_order() {
        let pool = SharedPool::new();
        for i in 0..10 {
            pool.push(i);
        }

        let dispatcher = BatchDispatcher::new(4);
        let mut seen = Vec::new();
        while dispatcher.dispatch(&pool, |i| seen.push(i)) > 0 {}
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_execution_runs_outside_guard() {
        let pool = SharedPool::new();
        pool.push(1);
        pool.push(2);

        let dispatcher = BatchDispatcher::new(8);
        // Re-entrant pushes during execution must not deadlock, since the
        // guard is released before items run
        let count = dispatcher.dispatch(&pool, |i| {
            if i == 1 {
                pool.push(10);
            }
        });
        assert_eq!(count, 2);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_from_settings_bound() {
        let dispatcher = BatchDispatcher::from_settings();
        assert_eq!(dispatcher.max_batch(), settings().max_batch);
    }
}
