/*!
 * Lock-Free Queue
 *
 * Unbounded multi-producer multi-consumer FIFO linked queue (Michael–Scott)
 * with epoch-based node reclamation.
 *
 * # Design
 *
 * A permanent sentinel node keeps head and tail non-null. Enqueue links a
 * node at the tail with a CAS on the tail's `next`; when a thread observes a
 * tail whose `next` is already linked, it *helps* by swinging the tail
 * pointer forward on the stalled producer's behalf before retrying. The
 * helping branch is a correctness requirement, not an optimization: without
 * it a preempted producer blocks every other producer's progress and the
 * lock-free guarantee is lost.
 *
 * # Ordering
 *
 * FIFO across all producers: dequeuers observe items in the order they were
 * successfully linked. Node ownership passes to the consumer on dequeue;
 * freed nodes are reclaimed via deferred epoch destruction so concurrent
 * readers never touch freed memory.
 */

use crossbeam_epoch::{self as epoch, Atomic, Owned, Shared};
use std::mem::MaybeUninit;
use std::sync::atomic::Ordering;

struct Node<T> {
    /// Uninitialized in the sentinel; moved out when the node's successor
    /// role ends (its payload is consumed as its predecessor is retired)
    value: MaybeUninit<T>,
    next: Atomic<Node<T>>,
}

/// Unbounded MPMC FIFO queue
///
/// # Thread Safety
///
/// Any number of producers and consumers; no operation blocks. `dequeue`
/// returns `None` on empty, which is a normal result.
#[repr(C)]
pub struct LockFreeQueue<T> {
    head: Atomic<Node<T>>,
    _pad: [u8; 48], // Keep head and tail on separate cache lines
    tail: Atomic<Node<T>>,
}

// Safety: nodes are only dereferenced under an epoch guard and payloads are
// moved out exactly once, by the winning dequeuer
unsafe impl<T: Send> Send for LockFreeQueue<T> {}
unsafe impl<T: Send> Sync for LockFreeQueue<T> {}

impl<T> LockFreeQueue<T> {
    /// Create an empty queue (allocates the sentinel node)
    pub fn new() -> Self {
        let sentinel = Owned::new(Node {
            value: MaybeUninit::uninit(),
            next: Atomic::null(),
        });
        // Safety: the queue is not shared yet
        let guard = unsafe { epoch::unprotected() };
        let sentinel = sentinel.into_shared(guard);
        Self {
            head: Atomic::from(sentinel),
            _pad: [0; 48],
            tail: Atomic::from(sentinel),
        }
    }

    /// Append an item at the tail
    ///
    /// Never blocks. Lock-free: if the tail lags behind a half-finished
    /// insertion, the caller completes that insertion before retrying its own.
    pub fn enqueue(&self, value: T) {
        let guard = &epoch::pin();
        let new = Owned::new(Node {
            value: MaybeUninit::new(value),
            next: Atomic::null(),
        })
        .into_shared(guard);

        loop {
            let tail = self.tail.load(Ordering::Acquire, guard);
            // Safety: tail is never null (sentinel) and epoch-protected
            let tail_ref = unsafe { tail.deref() };
            let next = tail_ref.next.load(Ordering::Acquire, guard);

            // Snapshot consistency check: tail moved under us, start over
            if tail != self.tail.load(Ordering::Acquire, guard) {
                continue;
            }

            if next.is_null() {
                if tail_ref
                    .next
                    .compare_exchange(
                        Shared::null(),
                        new,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                        guard,
                    )
                    .is_ok()
                {
                    // Link succeeded; swinging the tail is best-effort since
                    // any other thread can (and will) help
                    let _ = self.tail.compare_exchange(
                        tail,
                        new,
                        Ordering::Release,
                        Ordering::Relaxed,
                        guard,
                    );
                    return;
                }
            } else {
                // Help the stalled producer: advance the tail past its
                // already-linked node, then retry our own insertion
                let _ = self.tail.compare_exchange(
                    tail,
                    next,
                    Ordering::Release,
                    Ordering::Relaxed,
                    guard,
                );
            }
        }
    }

    /// Remove the item at the head
    ///
    /// Returns `None` when the queue has no items; never blocks.
    pub fn dequeue(&self) -> Option<T> {
        let guard = &epoch::pin();
        loop {
            let head = self.head.load(Ordering::Acquire, guard);
            // Safety: head is never null (sentinel) and epoch-protected
            let head_ref = unsafe { head.deref() };
            let next = head_ref.next.load(Ordering::Acquire, guard);
            let tail = self.tail.load(Ordering::Acquire, guard);

            if head != self.head.load(Ordering::Acquire, guard) {
                continue;
            }

            if next.is_null() {
                return None;
            }

            if head == tail {
                // Tail lags behind a half-finished enqueue; help first
                let _ = self.tail.compare_exchange(
                    tail,
                    next,
                    Ordering::Release,
                    Ordering::Relaxed,
                    guard,
                );
                continue;
            }

            if self
                .head
                .compare_exchange(head, next, Ordering::AcqRel, Ordering::Acquire, guard)
                .is_ok()
            {
                // Safety: we won the CAS, so we are the only thread that will
                // ever take this payload; `next` becomes the new sentinel and
                // its value slot is treated as vacated from here on
                let value = unsafe { next.deref().value.assume_init_read() };
                // Retire the old sentinel once no thread can still read it
                unsafe {
                    guard.defer_destroy(head);
                }
                return Some(value);
            }
        }
    }

    /// Whether the queue currently has no items (racy by nature)
    pub fn is_empty(&self) -> bool {
        let guard = &epoch::pin();
        let head = self.head.load(Ordering::Acquire, guard);
        // Safety: head is never null and epoch-protected
        let next = unsafe { head.deref() }.next.load(Ordering::Acquire, guard);
        next.is_null()
    }
}

impl<T> Default for LockFreeQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for LockFreeQueue<T> {
    fn drop(&mut self) {
        // Safety: exclusive access; no other thread can touch the queue
        unsafe {
            let guard = epoch::unprotected();
            let mut node = self.head.load(Ordering::Relaxed, guard);
            let mut is_sentinel = true;
            while !node.is_null() {
                let next = node.deref().next.load(Ordering::Relaxed, guard);
                let mut owned = node.into_owned();
                // The sentinel's value slot is vacant; every other node
                // still owns its payload
                if !is_sentinel {
                    owned.value.assume_init_drop();
                }
                drop(owned);
                is_sentinel = false;
                node = next;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_single_thread() {
        let queue = LockFreeQueue::new();
        assert!(queue.is_empty());
        assert_eq!(queue.dequeue(), None);

        for i in 0..100 {
            queue.enqueue(i);
        }
        assert!(!queue.is_empty());
        for i in 0..100 {
            assert_eq!(queue.dequeue(), Some(i));
        }
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn test_drop_releases_remaining_items() {
        let queue = LockFreeQueue::new();
        let payload = Arc::new(());
        for _ in 0..10 {
            queue.enqueue(Arc::clone(&payload));
        }
        // Consume a few so the sentinel has rotated
        let _ = queue.dequeue();
        let _ = queue.dequeue();
        drop(queue);
        assert_eq!(Arc::strong_count(&payload), 1);
    }

    #[test]
    fn test_concurrent_producers_no_loss() {
        let queue = Arc::new(LockFreeQueue::new());
        let mut handles = vec![];

        for producer in 0..4u64 {
            let queue = queue.clone();
            handles.push(thread::spawn(move || {
                for i in 0..1000 {
                    queue.enqueue(producer * 1000 + i);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let mut seen = HashSet::new();
        while let Some(value) = queue.dequeue() {
            assert!(seen.insert(value), "Duplicate item {value}");
        }
        assert_eq!(seen.len(), 4000);
    }

    #[test]
    fn test_concurrent_producers_and_consumers() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let queue = Arc::new(LockFreeQueue::new());
        let total = 4 * 1000;
        let consumed = Arc::new(AtomicUsize::new(0));

        let producers: Vec<_> = (0..4u64)
            .map(|p| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for i in 0..1000 {
                        queue.enqueue(p * 1000 + i);
                    }
                })
            })
            .collect();

        let consumers: Vec<_> = (0..2)
            .map(|_| {
                let queue = queue.clone();
                let consumed = consumed.clone();
                thread::spawn(move || {
                    let mut taken = Vec::new();
                    loop {
                        if let Some(value) = queue.dequeue() {
                            taken.push(value);
                            consumed.fetch_add(1, Ordering::Relaxed);
                        } else if consumed.load(Ordering::Relaxed) >= total {
                            break;
                        } else {
                            thread::yield_now();
                        }
                    }
                    taken
                })
            })
            .collect();

        for handle in producers {
            handle.join().unwrap();
        }
        let mut all = Vec::new();
        for handle in consumers {
            all.extend(handle.join().unwrap());
        }
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), total, "No item lost or duplicated");
    }
}
