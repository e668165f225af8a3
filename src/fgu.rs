//! Fine-grained-lock unbounded queue: a two-lock linked list with a dummy
//! sentinel, so enqueue (tail lock) and dequeue (head lock) never contend
//! with each other except in the single-element case.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::contracts::{self, UnboundedQueue, WaitHandle};

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

/// Fine-grained-lock unbounded FIFO queue.
///
/// Grounded on the classic two-lock queue algorithm: a `head` mutex gates
/// dequeues, a `tail` mutex gates enqueues, and a dummy sentinel node
/// decouples the two so they don't need to coordinate in the one-element
/// case.
pub struct FgUnboundedQueue<T> {
    head: Mutex<Head<T>>,
    tail: Mutex<*mut Node<T>>,
    not_empty: Condvar,
}

// SAFETY: `tail` is a raw pointer into the list owned by `head`'s chain of
// `Box<Node<T>>`s; it is only ever dereferenced while holding both the head
// and tail locks (enqueue) or is never dereferenced at all (dequeue only
// reads through `head`). The pointer is never aliased outside the struct.
unsafe impl<T: Send> Send for FgUnboundedQueue<T> {}
unsafe impl<T: Send> Sync for FgUnboundedQueue<T> {}

impl<T> FgUnboundedQueue<T> {
    pub fn new() -> Self {
        let mut dummy = Box::new(Node::dummy());
        let tail_ptr: *mut Node<T> = &mut *dummy;
        Self {
            head: Mutex::new(Head { node: dummy }),
            tail: Mutex::new(tail_ptr),
            not_empty: Condvar::new(),
        }
    }

    fn unsafe_dequeue(head: &mut Head<T>) -> Option<T> {
        let mut next = head.node.next.take()?;
        let value = next.value.take();
        head.node = next;
        value
    }

    pub fn enqueue(&self, value: T) {
        let mut node = Box::new(Node { value: Some(value), next: None });
        let node_ptr: *mut Node<T> = &mut *node;

        let mut tail = self.tail.lock().unwrap();
        // SAFETY: `*tail` always points at the current last node, which is
        // kept alive by `head`'s ownership chain; only the thread holding
        // `tail` ever follows this pointer, and it is updated below before
        // the lock is released.
        unsafe {
            (**tail).next = Some(node);
        }
        *tail = node_ptr;
        drop(tail);

        self.not_empty.notify_one();
    }

    pub fn try_dequeue(&self) -> Option<T> {
        let mut head = self.head.lock().unwrap();
        Self::unsafe_dequeue(&mut head)
    }

    pub fn wait_dequeue(&self, timeout: Duration) -> Option<T> {
        let head = self.head.lock().unwrap();
        let (mut head, timed_out) = self
            .not_empty
            .wait_timeout_while(head, timeout, |h| h.node.next.is_none())
            .unwrap();
        if timed_out.timed_out() && head.node.next.is_none() {
            return None;
        }
        Self::unsafe_dequeue(&mut head)
    }

    pub fn wait_dequeue_async(self: &Arc<Self>, timeout: Duration) -> WaitHandle<T>
    where
        T: Send + 'static,
    {
        contracts::spawn_wait_dequeue_unbounded(Arc::clone(self), timeout)
    }

    pub fn is_empty(&self, _precise: bool) -> bool {
        let head = self.head.lock().unwrap();
        head.node.next.is_none()
    }
}

impl<T> Default for FgUnboundedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> UnboundedQueue<T> for FgUnboundedQueue<T> {
    fn enqueue(&self, value: T) {
        FgUnboundedQueue::enqueue(self, value)
    }

    fn try_dequeue(&self) -> Option<T> {
        FgUnboundedQueue::try_dequeue(self)
    }

    fn wait_dequeue(&self, timeout: Duration) -> Option<T> {
        FgUnboundedQueue::wait_dequeue(self, timeout)
    }

    fn is_empty(&self, precise: bool) -> bool {
        FgUnboundedQueue::is_empty(self, precise)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn single_threaded_fifo() {
        let q = FgUnboundedQueue::new();
        q.enqueue(1);
        q.enqueue(2);
        q.enqueue(3);
        assert_eq!(q.try_dequeue(), Some(1));
        assert_eq!(q.try_dequeue(), Some(2));
        assert_eq!(q.try_dequeue(), Some(3));
        assert_eq!(q.try_dequeue(), None);
    }

    #[test]
    fn empty_queue_reports_empty() {
        let q: FgUnboundedQueue<i32> = FgUnboundedQueue::new();
        assert!(q.is_empty(true));
        q.enqueue(1);
        assert!(!q.is_empty(true));
    }

    #[test]
    fn wait_dequeue_times_out_on_empty() {
        let q: FgUnboundedQueue<i32> = FgUnboundedQueue::new();
        let result = q.wait_dequeue(Duration::from_millis(30));
        assert_eq!(result, None);
    }

    #[test]
    fn wait_dequeue_wakes_on_enqueue() {
        let q = Arc::new(FgUnboundedQueue::new());
        let q2 = Arc::clone(&q);
        let handle = thread::spawn(move || q2.wait_dequeue(Duration::from_secs(1)));
        thread::sleep(Duration::from_millis(20));
        q.enqueue(7);
        assert_eq!(handle.join().unwrap(), Some(7));
    }

    #[test]
    fn multi_producer_preserves_per_producer_order() {
        let q = Arc::new(FgUnboundedQueue::new());
        let producers = 4;
        let per_producer = 2000;

        let handles: Vec<_> = (0..producers)
            .map(|p| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    for i in 0..per_producer {
                        q.enqueue((p, i));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut last_seen = vec![-1i64; producers];
        let mut total = 0;
        while let Some((p, i)) = q.try_dequeue() {
            assert!(i as i64 > last_seen[p]);
            last_seen[p] = i as i64;
            total += 1;
        }
        assert_eq!(total, producers * per_producer);
    }
}
