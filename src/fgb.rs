//! Fine-grained-lock bounded queue: the two-lock list of [`crate::fgu`] plus
//! an approximate size counter, a fixed capacity, and a shutdown flag so
//! `Drop` can wake any parked waiters.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::contracts::{self, BoundedQueue, WaitHandle};
use crate::invariants::debug_assert_bounded_count;

struct Node<T> {
    value: Option<T>,
    next: Option<Box<Node<T>>>,
}

impl<T> Node<T> {
    fn dummy() -> Self {
        Self { value: None, next: None }
    }
}

struct Head<T> {
    node: Box<Node<T>>,
}

/// Fine-grained-lock bounded FIFO queue with a fixed capacity.
///
/// An approximate `AtomicUsize` counter lets `try_enqueue`/`try_dequeue`
/// reject fast without taking a lock in the common full/empty case; a live
/// flag set by `Drop` wakes every parked waiter with a `None` result rather
/// than leaving them blocked past the queue's lifetime.
pub struct FgBoundedQueue<T> {
    head: Mutex<Head<T>>,
    tail: Mutex<*mut Node<T>>,
    not_empty: Condvar,
    size_counter: AtomicUsize,
    size_limit: usize,
    live: AtomicBool,
}

// SAFETY: see `FgUnboundedQueue` — identical pointer discipline, with the
// additional guarantee that `live` being cleared stops all further linking.
unsafe impl<T: Send> Send for FgBoundedQueue<T> {}
unsafe impl<T: Send> Sync for FgBoundedQueue<T> {}

impl<T> FgBoundedQueue<T> {
    /// # Panics
    /// Panics if `size_limit` is zero.
    pub fn new(size_limit: usize) -> Self {
        assert!(size_limit > 0, "FgBoundedQueue size_limit must be non-zero");
        let mut dummy = Box::new(Node::dummy());
        let tail_ptr: *mut Node<T> = &mut *dummy;
        Self {
            head: Mutex::new(Head { node: dummy }),
            tail: Mutex::new(tail_ptr),
            not_empty: Condvar::new(),
            size_counter: AtomicUsize::new(0),
            size_limit,
            live: AtomicBool::new(true),
        }
    }

    fn unsafe_dequeue(head: &mut Head<T>) -> Option<T> {
        let mut next = head.node.next.take()?;
        let value = next.value.take();
        head.node = next;
        value
    }

    pub fn try_enqueue(&self, value: T) -> Result<(), T> {
        if self.size_counter.load(Ordering::Relaxed) >= self.size_limit {
            return Err(value);
        }
        if !self.live.load(Ordering::Acquire) {
            return Err(value);
        }

        // Reserve a slot optimistically, rolling back on overflow.
        let reserved = self.size_counter.fetch_add(1, Ordering::AcqRel) + 1;
        if reserved > self.size_limit {
            self.size_counter.fetch_sub(1, Ordering::AcqRel);
            return Err(value);
        }
        debug_assert_bounded_count!(reserved, self.size_limit);

        let mut node = Box::new(Node { value: Some(value), next: None });
        let node_ptr: *mut Node<T> = &mut *node;

        let mut tail = self.tail.lock().unwrap();
        if !self.live.load(Ordering::Acquire) {
            self.size_counter.fetch_sub(1, Ordering::AcqRel);
            // `node` still owns the value; hand it back via the Option.
            return Err(node.value.take().expect("node always holds a value here"));
        }
        // SAFETY: `*tail` points at the current last node, kept alive by
        // `head`'s ownership chain; only the thread holding `tail` follows
        // this pointer, and it is repointed below before the lock drops.
        unsafe {
            (**tail).next = Some(node);
        }
        *tail = node_ptr;
        drop(tail);

        self.not_empty.notify_one();
        Ok(())
    }

    pub fn try_dequeue(&self) -> Option<T> {
        if self.size_counter.load(Ordering::Relaxed) == 0 {
            return None;
        }
        let mut head = self.head.lock().unwrap();
        let value = Self::unsafe_dequeue(&mut head)?;
        self.size_counter.fetch_sub(1, Ordering::AcqRel);
        Some(value)
    }

    pub fn wait_dequeue(&self, timeout: Duration) -> Option<T> {
        let head = self.head.lock().unwrap();
        let (mut head, _timed_out) = self
            .not_empty
            .wait_timeout_while(head, timeout, |h| {
                h.node.next.is_none() && self.live.load(Ordering::Acquire)
            })
            .unwrap();
        if !self.live.load(Ordering::Acquire) && head.node.next.is_none() {
            return None;
        }
        let value = Self::unsafe_dequeue(&mut head)?;
        self.size_counter.fetch_sub(1, Ordering::AcqRel);
        Some(value)
    }

    pub fn wait_dequeue_async(self: &Arc<Self>, timeout: Duration) -> WaitHandle<T>
    where
        T: Send + 'static,
    {
        contracts::spawn_wait_dequeue_bounded(Arc::clone(self), timeout)
    }

    pub fn is_empty(&self, precise: bool) -> bool {
        if !precise {
            return self.size_counter.load(Ordering::Relaxed) == 0;
        }
        let head = self.head.lock().unwrap();
        head.node.next.is_none()
    }

    pub fn is_full(&self, precise: bool) -> bool {
        if !precise {
            return self.size_counter.load(Ordering::Relaxed) >= self.size_limit;
        }
        let _tail = self.tail.lock().unwrap();
        self.size_counter.load(Ordering::Acquire) >= self.size_limit
    }

    /// Marks the queue dead and wakes every waiter, which then observe the
    /// flag and return `None`.
    ///
    /// A uniquely-owned `FgBoundedQueue` can only be dropped once every
    /// borrow of it (including one held by a blocked `wait_dequeue` caller)
    /// has ended, so `Drop` alone can never race with an active waiter.
    /// This method is the mechanism for the common real case: a queue
    /// shared via `Arc` whose owner wants to unblock outstanding waiters
    /// before the last `Arc` clone is dropped.
    pub fn shutdown(&self) {
        self.live.store(false, Ordering::Release);
        self.not_empty.notify_all();
    }
}

impl<T> Drop for FgBoundedQueue<T> {
    fn drop(&mut self) {
        self.shutdown();
        // Box's own Drop impl frees the remaining chain, including the
        // dummy sentinel, once `head`/`tail` (and their guards) go away.
    }
}

impl<T: Send + 'static> BoundedQueue<T> for FgBoundedQueue<T> {
    fn try_enqueue(&self, value: T) -> Result<(), T> {
        FgBoundedQueue::try_enqueue(self, value)
    }

    fn try_dequeue(&self) -> Option<T> {
        FgBoundedQueue::try_dequeue(self)
    }

    fn wait_dequeue(&self, timeout: Duration) -> Option<T> {
        FgBoundedQueue::wait_dequeue(self, timeout)
    }

    fn is_empty(&self, precise: bool) -> bool {
        FgBoundedQueue::is_empty(self, precise)
    }

    fn is_full(&self, precise: bool) -> bool {
        FgBoundedQueue::is_full(self, precise)
    }
}
