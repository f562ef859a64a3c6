/*!
 * Work-Stealing Deque
 *
 * Bounded Chase–Lev deque: the owning thread pushes and pops its own end
 * cheaply, idle threads steal from the opposite end.
 *
 * # Design
 *
 * A fixed power-of-two ring of payload slots plus two monotonically
 * increasing indices: `top` (steal side) and `bottom` (owner side). Logical
 * size is `bottom - top`; empty when `top >= bottom`; full when
 * `bottom - top == capacity`.
 *
 * Owner-only operations are enforced by the type system: construction
 * returns a split `(Worker, Stealer)` pair, with `Worker` neither `Sync` nor
 * `Clone` and `Stealer` freely clonable across threads.
 *
 * # Capacity policy
 *
 * **Reject.** `push` on a full deque returns [`Full`] carrying the item back
 * so the owner can spill it to a shared [`LockFreeQueue`](super::LockFreeQueue).
 * The buffer never grows; the bounded buffer is also what makes the
 * steal-side slot read safe against wrap-around (the owner cannot reuse a
 * slot the stealers may still read without observing their `top` advance).
 *
 * # Ordering
 *
 * Steal order across threads is best-effort, not FIFO. A `pop`/`steal` that
 * loses the last-item race returns `None`; callers retry elsewhere rather
 * than spinning on one deque.
 */

use crate::errors::Full;
use std::cell::{Cell, UnsafeCell};
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::sync::atomic::{fence, AtomicIsize, Ordering};
use std::sync::Arc;

#[repr(C)]
struct Inner<T> {
    /// Steal-side index, advanced by CAS only
    top: AtomicIsize,
    _pad1: [u8; 56], // Keep the contended indices on separate cache lines
    /// Owner-side index, written by the owner only
    bottom: AtomicIsize,
    _pad2: [u8; 56],
    buffer: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
}

// Safety: slot access is coordinated by the top/bottom index protocol
unsafe impl<T: Send> Send for Inner<T> {}
unsafe impl<T: Send> Sync for Inner<T> {}

impl<T> Inner<T> {
    #[inline]
    fn capacity(&self) -> usize {
        self.buffer.len()
    }

    #[inline]
    fn slot(&self, index: isize) -> *mut MaybeUninit<T> {
        self.buffer[index as usize & self.mask].get()
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        let top = *self.top.get_mut();
        let bottom = *self.bottom.get_mut();
        let mut index = top;
        while index != bottom {
            // Safety: exclusive access; [top, bottom) slots are initialized
            unsafe {
                (*self.slot(index)).assume_init_drop();
            }
            index = index.wrapping_add(1);
        }
    }
}

/// Bounded work-stealing deque; construct via [`WorkStealingDeque::new`]
pub struct WorkStealingDeque<T>(PhantomData<T>);

impl<T> WorkStealingDeque<T> {
    /// Create a deque with at least `capacity` slots (rounded up to a power
    /// of two), returning the owner and stealer handles
    pub fn new(capacity: usize) -> (Worker<T>, Stealer<T>) {
        assert!(capacity > 0, "Capacity must be greater than 0");
        let capacity = capacity.next_power_of_two();
        let buffer = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect();
        let inner = Arc::new(Inner {
            top: AtomicIsize::new(0),
            _pad1: [0; 56],
            bottom: AtomicIsize::new(0),
            _pad2: [0; 56],
            buffer,
            mask: capacity - 1,
        });
        (
            Worker {
                inner: Arc::clone(&inner),
                _not_sync: PhantomData,
            },
            Stealer { inner },
        )
    }
}

/// Owner-side handle: push and pop, single thread at a time
pub struct Worker<T> {
    inner: Arc<Inner<T>>,
    /// Worker moves between threads but is never shared
    _not_sync: PhantomData<Cell<()>>,
}

// Safety: Worker is exclusive (not Clone, not Sync); moving it is fine
unsafe impl<T: Send> Send for Worker<T> {}

impl<T> Worker<T> {
    /// Push an item onto the owner's end
    ///
    /// Rejects with [`Full`] at capacity; the caller spills to a shared
    /// queue. The publish uses release ordering so stealers observe the slot
    /// write before the index.
    pub fn push(&self, item: T) -> Result<(), Full<T>> {
        let bottom = self.inner.bottom.load(Ordering::Relaxed);
        let top = self.inner.top.load(Ordering::Acquire);
        if bottom.wrapping_sub(top) >= self.inner.capacity() as isize {
            return Err(Full(item));
        }
        // Safety: the slot at `bottom` is vacant (size < capacity) and no
        // stealer reads past `bottom`
        unsafe {
            (*self.inner.slot(bottom)).write(item);
        }
        self.inner.bottom.store(bottom.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Pop from the owner's end (LIFO)
    ///
    /// Races stealers for the last remaining item; returns `None` if the
    /// deque is empty or a stealer won that race.
    pub fn pop(&self) -> Option<T> {
        let bottom = self.inner.bottom.load(Ordering::Relaxed).wrapping_sub(1);
        // Reserve the slot before reading top; the fence orders this store
        // against the stealers' top read
        self.inner.bottom.store(bottom, Ordering::Relaxed);
        fence(Ordering::SeqCst);
        let top = self.inner.top.load(Ordering::Relaxed);

        let size = bottom.wrapping_sub(top);
        if size < 0 {
            // Empty: undo the reservation
            self.inner.bottom.store(top, Ordering::Relaxed);
            return None;
        }

        // Safety: the slot holds the last pushed item; whether we may keep
        // the copy is decided below
        let value = unsafe { self.inner.slot(bottom).read() };
        if size == 0 {
            // Single-item case: race the stealers via CAS on top
            let won = self
                .inner
                .top
                .compare_exchange(
                    top,
                    top.wrapping_add(1),
                    Ordering::SeqCst,
                    Ordering::Relaxed,
                )
                .is_ok();
            self.inner.bottom.store(bottom.wrapping_add(1), Ordering::Relaxed);
            if !won {
                // A stealer took it; our bitwise copy is never claimed
                return None;
            }
        }
        // Safety: we own this copy (either size > 0 or we won the CAS)
        Some(unsafe { value.assume_init() })
    }

    /// Logical number of items (approximate under concurrent steals)
    pub fn len(&self) -> usize {
        let bottom = self.inner.bottom.load(Ordering::Relaxed);
        let top = self.inner.top.load(Ordering::Relaxed);
        bottom.wrapping_sub(top).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }
}

/// Steal-side handle: clonable, shared across threads
pub struct Stealer<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Stealer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

// Safety: steal coordinates with the owner purely through atomics
unsafe impl<T: Send> Send for Stealer<T> {}
unsafe impl<T: Send> Sync for Stealer<T> {}

impl<T> Stealer<T> {
    /// Steal one item from the far end
    ///
    /// Returns `None` when the deque looks empty or another thread (stealer
    /// or the owner's pop) won the race; the caller should try another deque
    /// rather than retry here.
    pub fn steal(&self) -> Option<T> {
        let top = self.inner.top.load(Ordering::Acquire);
        fence(Ordering::SeqCst);
        let bottom = self.inner.bottom.load(Ordering::Acquire);
        if bottom.wrapping_sub(top) <= 0 {
            return None;
        }

        // Safety: read before the CAS; only claimed if the CAS wins, and the
        // bounded buffer means the owner cannot have recycled this slot
        // without our top advancing first
        let value = unsafe { self.inner.slot(top).read() };
        if self
            .inner
            .top
            .compare_exchange(
                top,
                top.wrapping_add(1),
                Ordering::SeqCst,
                Ordering::Relaxed,
            )
            .is_err()
        {
            return None;
        }
        Some(unsafe { value.assume_init() })
    }

    /// Logical number of items (approximate)
    pub fn len(&self) -> usize {
        let bottom = self.inner.bottom.load(Ordering::Relaxed);
        let top = self.inner.top.load(Ordering::Relaxed);
        bottom.wrapping_sub(top).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn test_lifo_round_trip() {
        let (worker, _stealer) = WorkStealingDeque::new(64);
        for i in 0..50 {
            worker.push(i).unwrap();
        }
        // Owner pops LIFO
        for i in (0..50).rev() {
            assert_eq!(worker.pop(), Some(i));
        }
        assert_eq!(worker.pop(), None);
    }

    #[test]
    fn test_steal_takes_oldest() {
        let (worker, stealer) = WorkStealingDeque::new(8);
        worker.push(1).unwrap();
        worker.push(2).unwrap();
        worker.push(3).unwrap();

        assert_eq!(stealer.steal(), Some(1));
        assert_eq!(worker.pop(), Some(3));
        assert_eq!(stealer.steal(), Some(2));
        assert_eq!(stealer.steal(), None);
    }

    #[test]
    fn test_full_rejects_with_item() {
        let (worker, _stealer) = WorkStealingDeque::new(4);
        for i in 0..4 {
            worker.push(i).unwrap();
        }
        assert_eq!(worker.capacity(), 4);
        assert_eq!(worker.push(99), Err(Full(99)));
        // Rejected item comes back intact for spilling
        let rejected = worker.push(42).unwrap_err().into_inner();
        assert_eq!(rejected, 42);

        // Draining one slot makes room again
        let _ = worker.pop();
        assert!(worker.push(99).is_ok());
    }

    #[test]
    fn test_capacity_rounds_to_power_of_two() {
        let (worker, _stealer) = WorkStealingDeque::<u32>::new(5);
        assert_eq!(worker.capacity(), 8);
    }

    #[test]
    fn test_concurrent_steal_accounting() {
        const PUSHES: usize = 10_000;
        let (worker, stealer) = WorkStealingDeque::new(128);
        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let stealers: Vec<_> = (0..3)
            .map(|_| {
                let stealer = stealer.clone();
                let done = done.clone();
                thread::spawn(move || {
                    let mut taken = Vec::new();
                    loop {
                        match stealer.steal() {
                            Some(value) => taken.push(value),
                            None => {
                                if done.load(Ordering::Relaxed) {
                                    break;
                                }
                                thread::yield_now();
                            }
                        }
                    }
                    taken
                })
            })
            .collect();

        let mut popped = Vec::new();
        let mut next = 0usize;
        while next < PUSHES {
            match worker.push(next) {
                Ok(()) => next += 1,
                Err(Full(_)) => {
                    // Drain our own end while the deque is saturated
                    if let Some(value) = worker.pop() {
                        popped.push(value);
                    }
                }
            }
        }
        while let Some(value) = worker.pop() {
            popped.push(value);
        }
        done.store(true, Ordering::Relaxed);

        let mut seen: HashSet<usize> = popped.into_iter().collect();
        for handle in stealers {
            for value in handle.join().unwrap() {
                assert!(seen.insert(value), "Duplicate removal of {value}");
            }
        }
        assert_eq!(seen.len(), PUSHES, "Every pushed item removed exactly once");
    }

    #[test]
    fn test_drop_releases_remaining_items() {
        let payload = Arc::new(());
        let (worker, stealer) = WorkStealingDeque::new(16);
        for _ in 0..10 {
            worker.push(Arc::clone(&payload)).unwrap();
        }
        let _ = stealer.steal();
        let _ = worker.pop();
        drop(worker);
        drop(stealer);
        assert_eq!(Arc::strong_count(&payload), 1);
    }
}
