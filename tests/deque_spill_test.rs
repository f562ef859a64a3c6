/*!
 * Work-Stealing Deque Tests
 *
 * Owner/stealer accounting and the spill-to-shared-queue overflow path
 */

use pretty_assertions::assert_eq;
use runtime_sync::{Full, LockFreeQueue, WorkStealingDeque};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

#[test]
fn test_single_thread_round_trip_lifo() {
    const N: u32 = 40;
    let (worker, _stealer) = WorkStealingDeque::new(64);

    for i in 0..N {
        worker.push(i).unwrap();
    }
    let popped: Vec<_> = std::iter::from_fn(|| worker.pop()).collect();
    assert_eq!(popped, (0..N).rev().collect::<Vec<_>>());
}

#[test]
fn test_overflow_spills_to_shared_queue() {
    let (worker, _stealer) = WorkStealingDeque::new(8);
    let overflow = LockFreeQueue::new();

    for i in 0..100u32 {
        if let Err(Full(item)) = worker.push(i) {
            overflow.enqueue(item);
        }
    }

    let mut recovered = HashSet::new();
    while let Some(item) = worker.pop() {
        assert!(recovered.insert(item));
    }
    while let Some(item) = overflow.dequeue() {
        assert!(recovered.insert(item));
    }
    assert_eq!(recovered.len(), 100, "Nothing dropped on overflow");
}

#[test]
fn test_pop_plus_steals_equals_pushes() {
    const PUSHES: usize = 50_000;
    let (worker, stealer) = WorkStealingDeque::new(256);
    let done = Arc::new(AtomicBool::new(false));

    let stealers: Vec<_> = (0..4)
        .map(|_| {
            let stealer = stealer.clone();
            let done = done.clone();
            thread::spawn(move || {
                let mut taken = Vec::new();
                loop {
                    match stealer.steal() {
                        Some(value) => taken.push(value),
                        None if done.load(Ordering::Relaxed) => break,
                        None => thread::yield_now(),
                    }
                }
                taken
            })
        })
        .collect();

    let mut removed_by_owner = Vec::new();
    let mut next = 0usize;
    while next < PUSHES {
        match worker.push(next) {
            Ok(()) => next += 1,
            Err(Full(_)) => {
                if let Some(value) = worker.pop() {
                    removed_by_owner.push(value);
                }
            }
        }
    }
    while let Some(value) = worker.pop() {
        removed_by_owner.push(value);
    }
    done.store(true, Ordering::Relaxed);

    let mut seen = HashSet::new();
    for value in removed_by_owner {
        assert!(seen.insert(value), "Owner removed {value} twice");
    }
    for handle in stealers {
        for value in handle.join().unwrap() {
            assert!(seen.insert(value), "Item {value} removed twice");
        }
    }
    assert_eq!(seen.len(), PUSHES, "Removals must equal pushes");
}
