//! Loom-based concurrency tests for the Michael-Scott queue's head/tail CAS
//! protocol.
//!
//! Run with: `cargo test --features loom --test loom_lfu --release`
//!
//! `LfUnboundedQueue` itself is built on `crossbeam-epoch`, which loom can't
//! instrument, so this re-implements just the sentinel-node CAS protocol
//! (push via tail-helping, pop via head-swing with tail-lag help-advance) at
//! a loom-tractable scale: a fixed two-node-capacity list reached through
//! `loom::sync::Arc` and `loom::cell::UnsafeCell` in place of atomic pointers
//! to heap nodes, since loom models interleavings rather than real memory
//! reclamation.

#![cfg(feature = "loom")]

use loom::cell::UnsafeCell;
use loom::sync::atomic::{AtomicUsize, Ordering};
use loom::sync::Arc;
use loom::thread;

/// A two-slot stand-in for the Michael-Scott list: slot 0 is the sentinel,
/// slot 1 is the one real data node a push can link in. `next` mirrors the
/// sentinel's `next` pointer as an index (0 = null, 1 = slot 1 linked),
/// `head`/`tail` mirror the queue's head/tail indices (0 or 1).
struct LoomNode {
    value: UnsafeCell<usize>,
    occupied: AtomicUsize,
}

struct LoomMsQueue {
    slots: [LoomNode; 2],
    next: AtomicUsize,
    head: AtomicUsize,
    tail: AtomicUsize,
}

unsafe impl Send for LoomMsQueue {}
unsafe impl Sync for LoomMsQueue {}

impl LoomMsQueue {
    fn new() -> Self {
        Self {
            slots: [
                LoomNode { value: UnsafeCell::new(0), occupied: AtomicUsize::new(0) },
                LoomNode { value: UnsafeCell::new(0), occupied: AtomicUsize::new(0) },
            ],
            next: AtomicUsize::new(0),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    /// Links the single available data slot onto the sentinel's `next`,
    /// mirroring `push_internal`'s "is `next` already set" CAS. Returns
    /// `false` if some other push already won the race.
    fn try_enqueue(&self, value: usize) -> bool {
        if self.next.load(Ordering::Acquire) != 0 {
            return false;
        }
        self.slots[1].value.with_mut(|v| unsafe { *v = value });
        self.slots[1].occupied.store(1, Ordering::Release);
        self.next.compare_exchange(0, 1, Ordering::Release, Ordering::Relaxed).is_ok()
    }

    /// Swings `head` from the sentinel (0) to the linked node (1) and helps
    /// `tail` advance if it still lags, mirroring `pop_internal`.
    fn try_dequeue(&self) -> Option<usize> {
        let head = self.head.load(Ordering::Acquire);
        let next = self.next.load(Ordering::Acquire);
        if next == 0 {
            return None;
        }
        let tail = self.tail.load(Ordering::Relaxed);
        if tail == head {
            let _ = self.tail.compare_exchange(tail, next, Ordering::Release, Ordering::Relaxed);
        }
        if self.head.compare_exchange(head, next, Ordering::Release, Ordering::Relaxed).is_ok() {
            Some(self.slots[next].value.with(|v| unsafe { *v }))
        } else {
            None
        }
    }
}

#[test]
fn loom_spsc_single_item() {
    loom::model(|| {
        let queue = Arc::new(LoomMsQueue::new());
        let queue2 = Arc::clone(&queue);

        let producer = thread::spawn(move || queue2.try_enqueue(7));

        let consumer = thread::spawn(move || {
            let mut popped = None;
            for _ in 0..4 {
                if let Some(v) = queue.try_dequeue() {
                    popped = Some(v);
                    break;
                }
                loom::thread::yield_now();
            }
            popped
        });

        let enqueued = producer.join().unwrap();
        let popped = consumer.join().unwrap();
        if enqueued {
            assert_eq!(popped, Some(7));
        } else {
            assert_eq!(popped, None);
        }
    });
}

#[test]
fn loom_empty_queue_never_pops() {
    loom::model(|| {
        let queue = Arc::new(LoomMsQueue::new());
        let queue2 = Arc::clone(&queue);
        let consumer = thread::spawn(move || queue2.try_dequeue());
        assert_eq!(consumer.join().unwrap(), None);
    });
}

#[test]
fn loom_two_producers_race_only_one_wins() {
    loom::model(|| {
        let queue = Arc::new(LoomMsQueue::new());
        let producer1 = Arc::clone(&queue);
        let producer2 = Arc::clone(&queue);

        let p1 = thread::spawn(move || producer1.try_enqueue(1));
        let p2 = thread::spawn(move || producer2.try_enqueue(2));

        let won1 = p1.join().unwrap();
        let won2 = p2.join().unwrap();

        // The sentinel's `next` link has room for exactly one data node at
        // this loom-tractable scale, so at most one push can ever succeed.
        assert!(!(won1 && won2));

        let popped = queue.try_dequeue();
        if won1 || won2 {
            assert!(popped.is_some());
        } else {
            assert_eq!(popped, None);
        }
        assert_eq!(queue.try_dequeue(), None);
    });
}
