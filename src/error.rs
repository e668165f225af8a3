use thiserror::Error;

/// Failures raised by the lock-free engines' `_or_err` entry points.
///
/// The plain trait methods (`enqueue`, `try_dequeue`, `is_empty`, ...) never
/// return this type: absence (empty/full/timed out) is signaled through
/// `None`/`Err(value)`, matching the bounded/unbounded contracts. Only the
/// bounded-retry escape hatch on the lock-free engines surfaces as a typed
/// error.
#[derive(Debug, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The internal CAS-retry budget was exhausted before `op` made progress.
    #[error("contention budget exceeded during {op}")]
    ContentionExceeded { op: &'static str },
}
