//! Lock-free unbounded queue: Michael-Scott singly-linked list with a
//! sentinel node, CAS-based head/tail advancement, and epoch-based
//! reclamation via `crossbeam-epoch` in place of the unsafe immediate free
//! a naive port of the algorithm would use.

use std::mem::MaybeUninit;
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_epoch::{self as epoch, Atomic, Owned, Shared};
use crossbeam_utils::CachePadded;

use crate::backoff::Backoff;
use crate::clock::{Clock, SteadyClock};
use crate::contracts::{self, UnboundedQueue, WaitHandle};
use crate::error::QueueError;
use crate::semaphore::CountingSemaphore;

const DEFAULT_MAX_UPDATE_DEPTH: usize = 100;

struct Node<T> {
    data: MaybeUninit<T>,
    next: Atomic<Node<T>>,
}

/// Lock-free unbounded FIFO queue (Michael & Scott, 1996).
///
/// `head`/`tail` are independent cache-line-padded atomic pointers. Every
/// traversal happens under a pinned epoch guard, and retired nodes are
/// freed through `guard.defer_destroy` rather than an immediate drop, so a
/// thread mid-traversal never observes a freed node.
pub struct LfUnboundedQueue<T> {
    head: CachePadded<Atomic<Node<T>>>,
    tail: CachePadded<Atomic<Node<T>>>,
    items_available: CountingSemaphore,
    max_update_depth: usize,
}

unsafe impl<T: Send> Send for LfUnboundedQueue<T> {}
unsafe impl<T: Send> Sync for LfUnboundedQueue<T> {}

impl<T> LfUnboundedQueue<T> {
    pub fn new() -> Self {
        Self::with_max_update_depth(DEFAULT_MAX_UPDATE_DEPTH)
    }

    /// # Panics
    /// Panics if `max_update_depth` is zero.
    pub fn with_max_update_depth(max_update_depth: usize) -> Self {
        assert!(max_update_depth > 0, "max_update_depth must be non-zero");
        let queue = Self {
            head: CachePadded::new(Atomic::null()),
            tail: CachePadded::new(Atomic::null()),
            items_available: CountingSemaphore::new(0),
            max_update_depth,
        };
        let sentinel = Owned::new(Node { data: MaybeUninit::uninit(), next: Atomic::null() });
        // SAFETY: no other thread can observe `queue` yet; this is the
        // construction-time initialization of the sentinel, identical in
        // spirit to `crossbeam_epoch::unprotected()`'s documented use case.
        let guard = unsafe { epoch::unprotected() };
        let sentinel = sentinel.into_shared(guard);
        queue.head.store(sentinel, Relaxed);
        queue.tail.store(sentinel, Relaxed);
        queue
    }

    /// One push attempt against a `tail` snapshot. Returns `true` on success,
    /// possibly helping the `tail` pointer advance either way.
    fn push_internal<'g>(
        &self,
        onto: Shared<'g, Node<T>>,
        new: Shared<'g, Node<T>>,
        guard: &'g epoch::Guard,
    ) -> bool {
        // SAFETY: `onto` is a snapshot read under `guard`; it remains valid
        // for the guard's lifetime even if concurrently retired elsewhere.
        let o = unsafe { onto.deref() };
        let next = o.next.load(Acquire, guard);
        if unsafe { next.as_ref().is_some() } {
            let _ = self.tail.compare_exchange(onto, next, Release, Relaxed, guard);
            false
        } else {
            let linked =
                o.next.compare_exchange(Shared::null(), new, Release, Relaxed, guard).is_ok();
            if linked {
                let _ = self.tail.compare_exchange(onto, new, Release, Relaxed, guard);
            }
            linked
        }
    }

    /// One pop attempt. `Ok(None)` if the queue is empty; `Err(())` if this
    /// call lost the race for the head CAS and should retry.
    fn pop_internal(&self, guard: &epoch::Guard) -> Result<Option<T>, ()> {
        let head = self.head.load(Acquire, guard);
        // SAFETY: `head` is read under `guard`; it stays valid for the
        // guard's lifetime regardless of concurrent retirement.
        let h = unsafe { head.deref() };
        let next = h.next.load(Acquire, guard);
        match unsafe { next.as_ref() } {
            Some(n) => {
                let tail = self.tail.load(Relaxed, guard);
                if head == tail {
                    // Tail lags the real end of the list; help advance it
                    // before retiring `head`, so we never retire a node
                    // still reachable from `tail`.
                    let _ = self.tail.compare_exchange(tail, next, Release, Relaxed, guard);
                }
                match self.head.compare_exchange(head, next, Release, Relaxed, guard) {
                    Ok(_) => {
                        // SAFETY: winning this CAS makes `head` (the old
                        // sentinel) unreachable from `self.head`; `n`
                        // (the new sentinel) was linked with its `data`
                        // already initialized by whichever push created it,
                        // and only the winner of this CAS ever reads it.
                        let value = unsafe { n.data.assume_init_read() };
                        // SAFETY: deferring destruction until the epoch
                        // advances past every thread that might still hold
                        // a reference to `head` from before the CAS.
                        unsafe {
                            guard.defer_destroy(head);
                        }
                        Ok(Some(value))
                    }
                    Err(_) => Err(()),
                }
            }
            None => Ok(None),
        }
    }

    /// Fallible enqueue surfacing the contention-exceeded fault directly
    /// instead of retrying past `max_update_depth`.
    pub fn enqueue_or_err(&self, value: T) -> Result<(), QueueError> {
        let guard = &epoch::pin();
        let new = Owned::new(Node { data: MaybeUninit::new(value), next: Atomic::null() });
        let new = new.into_shared(guard);

        for _ in 0..self.max_update_depth {
            let tail = self.tail.load(Acquire, guard);
            if self.push_internal(tail, new, guard) {
                self.items_available.release(1);
                return Ok(());
            }
        }
        // SAFETY: `new` was never linked into the list on any path that
        // reaches here, so it is still exclusively owned by this call.
        unsafe {
            drop(new.into_owned());
        }
        Err(QueueError::ContentionExceeded { op: "enqueue" })
    }

    /// Fallible dequeue surfacing the contention-exceeded fault directly
    /// instead of retrying past `max_update_depth`.
    pub fn try_dequeue_or_err(&self) -> Result<Option<T>, QueueError> {
        let guard = &epoch::pin();
        for _ in 0..self.max_update_depth {
            if let Ok(result) = self.pop_internal(guard) {
                if result.is_some() {
                    self.items_available.release(-1);
                }
                return Ok(result);
            }
        }
        Err(QueueError::ContentionExceeded { op: "try_dequeue" })
    }

    /// Always succeeds. The unbounded contract has no failure channel, so
    /// past `max_update_depth` this keeps retrying with escalating backoff
    /// rather than dropping the value; see `enqueue_or_err` to observe
    /// contention instead of masking it.
    pub fn enqueue(&self, value: T) {
        let guard = &epoch::pin();
        let new = Owned::new(Node { data: MaybeUninit::new(value), next: Atomic::null() });
        let new = new.into_shared(guard);
        let mut backoff = Backoff::new();
        loop {
            let tail = self.tail.load(Acquire, guard);
            if self.push_internal(tail, new, guard) {
                self.items_available.release(1);
                return;
            }
            backoff.snooze();
        }
    }

    /// Retries past `max_update_depth` with escalating backoff until a value
    /// is popped or the queue is observed empty. Does not touch
    /// `items_available`; callers that already hold an acquired permit (i.e.
    /// `wait_dequeue`) use this directly, callers that didn't acquire one
    /// (plain `try_dequeue`) must correct the count themselves.
    fn retry_pop(&self) -> Option<T> {
        let guard = &epoch::pin();
        let mut backoff = Backoff::new();
        loop {
            if let Ok(result) = self.pop_internal(guard) {
                return result;
            }
            backoff.snooze();
        }
    }

    /// Never fails; retries past `max_update_depth` with escalating backoff.
    ///
    /// This bypasses `wait_dequeue`'s permit acquisition, so a successful
    /// pop releases a negative permit to keep `items_available` in step with
    /// the true number of outstanding items.
    pub fn try_dequeue(&self) -> Option<T> {
        let value = self.retry_pop();
        if value.is_some() {
            self.items_available.release(-1);
        }
        value
    }

    pub fn wait_dequeue(&self, timeout: Duration) -> Option<T> {
        let clock = SteadyClock;
        let deadline = crate::clock::deadline(&clock, timeout);
        loop {
            let now = clock.now();
            if now >= deadline {
                break;
            }
            if self.items_available.try_acquire_for(deadline - now) {
                if let Some(value) = self.retry_pop() {
                    return Some(value);
                }
                // Acquired a permit but lost the pop race to another
                // dequeuer; that permit matched a different, still-available
                // item, so loop back and acquire again rather than return.
            } else {
                break;
            }
        }
        self.try_dequeue()
    }

    pub fn wait_dequeue_async(self: &Arc<Self>, timeout: Duration) -> WaitHandle<T>
    where
        T: Send + 'static,
    {
        contracts::spawn_wait_dequeue_unbounded(Arc::clone(self), timeout)
    }

    /// Approximate emptiness check, sharing the same retry budget as the
    /// CAS operations above since it reads a consistent `(head, head.next)`
    /// pair rather than locking anything.
    pub fn is_empty(&self, _precise: bool) -> bool {
        let guard = &epoch::pin();
        let mut backoff = Backoff::new();
        loop {
            let head = self.head.load(Acquire, guard);
            // SAFETY: see `pop_internal`.
            let h = unsafe { head.deref() };
            let next = h.next.load(Acquire, guard);
            if self.head.load(Acquire, guard) == head {
                return unsafe { next.as_ref().is_none() };
            }
            backoff.snooze();
        }
    }

    /// Fallible emptiness check surfacing the contention-exceeded fault
    /// directly instead of retrying past `max_update_depth`.
    pub fn is_empty_or_err(&self) -> Result<bool, QueueError> {
        let guard = &epoch::pin();
        for _ in 0..self.max_update_depth {
            let head = self.head.load(Acquire, guard);
            // SAFETY: see `pop_internal`.
            let h = unsafe { head.deref() };
            let next = h.next.load(Acquire, guard);
            if self.head.load(Acquire, guard) == head {
                return Ok(unsafe { next.as_ref().is_none() });
            }
        }
        Err(QueueError::ContentionExceeded { op: "is_empty" })
    }
}

impl<T> Default for LfUnboundedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for LfUnboundedQueue<T> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` means no other thread can be concurrently
        // accessing the queue, so an unprotected guard is sound here,
        // matching `crossbeam-epoch`'s own documented Drop pattern. Draining
        // through `pop_internal` (rather than a raw pointer walk) ensures
        // every data node's `T` is properly read out and dropped instead of
        // being silently leaked inside its `MaybeUninit`.
        unsafe {
            let guard = epoch::unprotected();
            while let Ok(Some(value)) = self.pop_internal(guard) {
                drop(value);
            }
            let sentinel = self.head.load(Relaxed, guard);
            drop(sentinel.into_owned());
        }
    }
}

impl<T: Send + 'static> UnboundedQueue<T> for LfUnboundedQueue<T> {
    fn enqueue(&self, value: T) {
        LfUnboundedQueue::enqueue(self, value)
    }

    fn try_dequeue(&self) -> Option<T> {
        LfUnboundedQueue::try_dequeue(self)
    }

    fn wait_dequeue(&self, timeout: Duration) -> Option<T> {
        LfUnboundedQueue::wait_dequeue(self, timeout)
    }

    fn is_empty(&self, precise: bool) -> bool {
        LfUnboundedQueue::is_empty(self, precise)
    }
}
