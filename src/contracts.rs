//! The two queue contracts every engine implements, plus the async wait
//! bridge shared by all of them.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// A FIFO queue with a fixed capacity.
///
/// `try_enqueue` may fail (capacity reached, or the queue has been shut
/// down); everything else mirrors [`UnboundedQueue`].
pub trait BoundedQueue<T: Send + 'static>: Send + Sync + 'static {
    /// Adds `value` if there is room, handing it back on failure.
    fn try_enqueue(&self, value: T) -> Result<(), T>;

    /// Removes and returns the head value, or `None` if empty.
    fn try_dequeue(&self) -> Option<T>;

    /// Removes and returns the head value, blocking up to `timeout`.
    fn wait_dequeue(&self, timeout: Duration) -> Option<T>;

    /// Approximate by default; `precise` re-reads under the relevant lock
    /// (fine-grained engines) or a consistency-checked snapshot (lock-free
    /// engines).
    fn is_empty(&self, precise: bool) -> bool;

    /// Approximate by default; see [`is_empty`](Self::is_empty).
    fn is_full(&self, precise: bool) -> bool;
}

/// A FIFO queue that grows without bound; `enqueue` always succeeds.
pub trait UnboundedQueue<T: Send + 'static>: Send + Sync + 'static {
    /// Adds `value`. Never fails (the allocator aside).
    fn enqueue(&self, value: T);

    /// Removes and returns the head value, or `None` if empty.
    fn try_dequeue(&self) -> Option<T>;

    /// Removes and returns the head value, blocking up to `timeout`.
    fn wait_dequeue(&self, timeout: Duration) -> Option<T>;

    /// Approximate by default; see [`BoundedQueue::is_empty`].
    fn is_empty(&self, precise: bool) -> bool;
}

/// A handle to a `wait_dequeue` running on a background thread.
///
/// Backed by a one-shot `std::thread::spawn`, the direct analogue of the
/// original's `std::async(std::launch::async, ...)`. Dropping the handle
/// without joining detaches the worker, matching `JoinHandle`'s own drop
/// semantics; the result is simply discarded.
pub struct WaitHandle<T> {
    inner: JoinHandle<Option<T>>,
}

impl<T> WaitHandle<T> {
    fn new(inner: JoinHandle<Option<T>>) -> Self {
        Self { inner }
    }

    /// Blocks until the background `wait_dequeue` completes.
    ///
    /// # Panics
    /// Panics if the worker thread itself panicked.
    pub fn join(self) -> Option<T> {
        self.inner.join().expect("wait_dequeue worker panicked")
    }

    /// Returns true once the worker has finished (best-effort; there is no
    /// portable non-blocking `JoinHandle` poll, so this only ever reports
    /// `false` until joined).
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}

/// Spawns `wait_dequeue(timeout)` against a shared bounded queue handle.
pub fn spawn_wait_dequeue_bounded<T, Q>(queue: Arc<Q>, timeout: Duration) -> WaitHandle<T>
where
    T: Send + 'static,
    Q: BoundedQueue<T> + ?Sized,
{
    let handle = std::thread::spawn(move || queue.wait_dequeue(timeout));
    WaitHandle::new(handle)
}

/// Spawns `wait_dequeue(timeout)` against a shared unbounded queue handle.
pub fn spawn_wait_dequeue_unbounded<T, Q>(queue: Arc<Q>, timeout: Duration) -> WaitHandle<T>
where
    T: Send + 'static,
    Q: UnboundedQueue<T> + ?Sized,
{
    let handle = std::thread::spawn(move || queue.wait_dequeue(timeout));
    WaitHandle::new(handle)
}
