//! Counting semaphore used by the lock-free engines to implement blocking
//! `wait_dequeue`. A successful enqueue releases one permit; a successful
//! non-blocking dequeue that bypassed the semaphore (every call to
//! `try_dequeue` outside of `wait_dequeue`'s loop) corrects the count back
//! down by releasing a negative delta, keeping the permit count in step
//! with the true number of outstanding items without requiring every
//! dequeue path to acquire first.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::clock::{Clock, SteadyClock};

pub struct CountingSemaphore {
    permits: AtomicI64,
    /// Count of threads currently parked in `signal.wait`/`wait_timeout`,
    /// incremented just before parking and decremented as soon as a thread
    /// wakes (spuriously, timed out, or notified) — never left to
    /// accumulate stale entries the way a per-waiter id list would.
    waiters: Mutex<usize>,
    signal: Condvar,
}

impl CountingSemaphore {
    pub fn new(initial: i64) -> Self {
        Self { permits: AtomicI64::new(initial), waiters: Mutex::new(0), signal: Condvar::new() }
    }

    /// Adjusts the available-permit count by `delta`. A positive delta wakes
    /// one waiter (if any); a negative delta (used to correct the count
    /// after a dequeue that bypassed `acquire`) never blocks or panics even
    /// if it drives the count negative.
    pub fn release(&self, delta: i64) {
        self.permits.fetch_add(delta, Ordering::Release);
        if delta > 0 {
            let waiters = self.waiters.lock().unwrap();
            if *waiters > 0 {
                self.signal.notify_one();
            }
        }
    }

    /// Attempts to claim one permit without blocking.
    pub fn try_acquire(&self) -> bool {
        let mut permits = self.permits.load(Ordering::Relaxed);
        loop {
            if permits <= 0 {
                return false;
            }
            match self.permits.compare_exchange_weak(
                permits,
                permits - 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(p) => permits = p,
            }
        }
    }

    /// Blocks until a permit is available.
    pub fn acquire(&self) {
        while !self.try_acquire() {
            let mut waiters = self.waiters.lock().unwrap();
            *waiters += 1;
            let mut waiters = self.signal.wait(waiters).unwrap();
            *waiters -= 1;
        }
    }

    /// Blocks until a permit is available or `timeout` elapses, returning
    /// whether a permit was claimed.
    pub fn try_acquire_for(&self, timeout: Duration) -> bool {
        self.try_acquire_until(&SteadyClock, timeout)
    }

    /// Same as [`try_acquire_for`](Self::try_acquire_for) but driven by a
    /// caller-supplied clock, so deadline arithmetic is testable.
    pub fn try_acquire_until(&self, clock: &dyn Clock, timeout: Duration) -> bool {
        let deadline = crate::clock::deadline(clock, timeout);
        loop {
            if self.try_acquire() {
                return true;
            }
            let now = clock.now();
            if now >= deadline {
                return false;
            }
            let remaining = deadline - now;
            let mut waiters = self.waiters.lock().unwrap();
            // Re-check after taking the lock: a release() may have landed
            // between the failed try_acquire above and this wait.
            if self.try_acquire() {
                return true;
            }
            *waiters += 1;
            let (mut waiters, timeout_result) =
                self.signal.wait_timeout(waiters, remaining).unwrap();
            *waiters -= 1;
            drop(waiters);
            if timeout_result.timed_out() && clock.now() >= deadline {
                return false;
            }
        }
    }
}
