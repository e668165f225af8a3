//! mpmc-queues - fine-grained-lock and lock-free FIFO queues
//!
//! Four FIFO queue engines behind two contracts: [`BoundedQueue`] (fixed
//! capacity, enqueue may fail) and [`UnboundedQueue`] (grows on demand,
//! enqueue always succeeds).
//!
//! - [`FgUnboundedQueue`] / [`FgBoundedQueue`] — two-lock linked list with a
//!   dummy sentinel, blocking waits via a condition variable.
//! - [`LfUnboundedQueue`] — Michael & Scott lock-free list, CAS-based, node
//!   reclamation via `crossbeam-epoch`.
//! - [`LfBoundedQueue`] — Vyukov-style array-based MPMC ring buffer using a
//!   per-slot sequence number as the only synchronization anchor.
//!
//! # Example
//!
//! ```
//! use mpmc_queues::FgBoundedQueue;
//! use std::time::Duration;
//!
//! let queue = FgBoundedQueue::new(4);
//! queue.try_enqueue(1).unwrap();
//! queue.try_enqueue(2).unwrap();
//!
//! assert_eq!(queue.wait_dequeue(Duration::from_millis(10)), Some(1));
//! assert_eq!(queue.try_dequeue(), Some(2));
//! ```

mod backoff;
mod clock;
mod contracts;
mod error;
mod fgb;
mod fgu;
mod invariants;
mod lfb;
mod lfu;
mod semaphore;

pub use backoff::Backoff;
pub use clock::{Clock, SteadyClock};
pub use contracts::{BoundedQueue, UnboundedQueue, WaitHandle};
pub use error::QueueError;
pub use fgb::FgBoundedQueue;
pub use fgu::FgUnboundedQueue;
pub use lfb::LfBoundedQueue;
pub use lfu::LfUnboundedQueue;
pub use semaphore::CountingSemaphore;
