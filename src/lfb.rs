//! Lock-free bounded queue: a Vyukov-style array-based MPMC ring buffer.
//! Each slot carries an atomic sequence number that simultaneously encodes
//! occupancy and lap, and is the sole synchronization anchor for the
//! slot's value — no separate lock or flag is needed.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_utils::CachePadded;

use crate::clock::{Clock, SteadyClock};
use crate::contracts::{self, BoundedQueue, WaitHandle};
use crate::invariants::{debug_assert_sequence_monotonic, debug_assert_slot_owned};
use crate::semaphore::CountingSemaphore;

struct Slot<T> {
    sequence: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

// SAFETY: access to `value` is always gated by `sequence`, which acts as
// the handoff point between the producer that writes it and the single
// consumer that claims it (Acquire load pairs with the writer's Release
// store). No two threads ever read or write the same slot's `value`
// concurrently.
unsafe impl<T: Send> Sync for Slot<T> {}

/// Lock-free bounded FIFO queue (Vyukov MPMC ring buffer).
pub struct LfBoundedQueue<T> {
    capacity: usize,
    mask: usize,
    slots: Box<[Slot<T>]>,
    enqueue_pos: CachePadded<AtomicUsize>,
    dequeue_pos: CachePadded<AtomicUsize>,
    items_available: CountingSemaphore,
}

unsafe impl<T: Send> Send for LfBoundedQueue<T> {}
unsafe impl<T: Send> Sync for LfBoundedQueue<T> {}

impl<T> LfBoundedQueue<T> {
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "LfBoundedQueue capacity must be non-zero");
        let slots: Box<[Slot<T>]> = (0..capacity)
            .map(|i| Slot { sequence: AtomicUsize::new(i), value: UnsafeCell::new(MaybeUninit::uninit()) })
            .collect();
        Self {
            capacity,
            mask: capacity.wrapping_sub(1),
            slots,
            enqueue_pos: CachePadded::new(AtomicUsize::new(0)),
            dequeue_pos: CachePadded::new(AtomicUsize::new(0)),
            items_available: CountingSemaphore::new(0),
        }
    }

    #[inline]
    fn slot_index(&self, position: usize) -> usize {
        // `capacity` need not be a power of two (unlike the reference this
        // engine is modeled on); fall back to modulo when it isn't.
        if self.capacity.is_power_of_two() {
            position & self.mask
        } else {
            position % self.capacity
        }
    }

    pub fn try_enqueue(&self, value: T) -> Result<(), T> {
        let mut position = self.enqueue_pos.load(Relaxed);
        loop {
            let slot = &self.slots[self.slot_index(position)];
            let sequence = slot.sequence.load(Acquire);
            let diff = sequence as isize - position as isize;

            if diff == 0 {
                match self.enqueue_pos.compare_exchange_weak(
                    position,
                    position + 1,
                    Relaxed,
                    Relaxed,
                ) {
                    Ok(_) => {
                        debug_assert_slot_owned!(sequence, position);
                        // SAFETY: winning the CAS makes this the exclusive
                        // writer of `slot` until its sequence store below
                        // publishes the value to a consumer.
                        unsafe {
                            (*slot.value.get()).write(value);
                        }
                        debug_assert_sequence_monotonic!(sequence, position + 1);
                        slot.sequence.store(position + 1, Release);
                        self.items_available.release(1);
                        return Ok(());
                    }
                    Err(observed) => position = observed,
                }
            } else if diff < 0 {
                // Slot still on the previous lap: queue is full, unless the
                // position moved on since our first read. Re-check once.
                if self.enqueue_pos.load(Acquire) == position {
                    return Err(value);
                }
                position = self.enqueue_pos.load(Relaxed);
            } else {
                position = self.enqueue_pos.load(Relaxed);
            }
        }
    }

    /// One dequeue attempt, not touching `items_available`. Used directly by
    /// `wait_dequeue`, which has already acquired a permit for this pop;
    /// plain `try_dequeue` wraps this and corrects the permit count itself.
    fn dequeue_internal(&self) -> Option<T> {
        let mut position = self.dequeue_pos.load(Relaxed);
        loop {
            let slot = &self.slots[self.slot_index(position)];
            let sequence = slot.sequence.load(Acquire);
            let diff = sequence as isize - (position + 1) as isize;

            if diff == 0 {
                match self.dequeue_pos.compare_exchange_weak(
                    position,
                    position + 1,
                    Relaxed,
                    Relaxed,
                ) {
                    Ok(_) => {
                        debug_assert_slot_owned!(sequence, position + 1);
                        // SAFETY: winning the CAS makes this the exclusive
                        // reader of `slot`; the producer's Release store of
                        // `sequence == position + 1` happened-before this
                        // Acquire load, so the value write is visible.
                        let value = unsafe { (*slot.value.get()).assume_init_read() };
                        let next_sequence = position + self.capacity;
                        debug_assert_sequence_monotonic!(sequence, next_sequence);
                        slot.sequence.store(next_sequence, Release);
                        return Some(value);
                    }
                    Err(observed) => position = observed,
                }
            } else if diff < 0 {
                // Slot is on this lap but still marked empty: queue empty.
                return None;
            } else {
                position = self.dequeue_pos.load(Relaxed);
            }
        }
    }

    /// This bypasses `wait_dequeue`'s permit acquisition, so a successful
    /// pop releases a negative permit to keep `items_available` in step with
    /// the true number of outstanding items.
    pub fn try_dequeue(&self) -> Option<T> {
        let value = self.dequeue_internal();
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
                if let Some(value) = self.dequeue_internal() {
                    return Some(value);
                }
                // Acquired a permit but lost the pop race to another
                // dequeuer; loop back and acquire again for a different,
                // still-available item.
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
        contracts::spawn_wait_dequeue_bounded(Arc::clone(self), timeout)
    }

    /// Single-shot consistency-checked read; a torn read here just means
    /// the caller observes a slightly stale snapshot, which the non-precise
    /// contract already allows for.
    pub fn is_empty(&self, _precise: bool) -> bool {
        loop {
            let position = self.dequeue_pos.load(Relaxed);
            let sequence = self.slots[self.slot_index(position)].sequence.load(Acquire);
            if position == self.dequeue_pos.load(Acquire) {
                return sequence == position;
            }
        }
    }

    /// See [`is_empty`](Self::is_empty).
    pub fn is_full(&self, _precise: bool) -> bool {
        loop {
            let position = self.enqueue_pos.load(Relaxed);
            let sequence = self.slots[self.slot_index(position)].sequence.load(Acquire);
            if position == self.enqueue_pos.load(Acquire) {
                return (sequence as isize) < position as isize;
            }
        }
    }
}

impl<T> Drop for LfBoundedQueue<T> {
    fn drop(&mut self) {
        while self.try_dequeue().is_some() {}
    }
}

impl<T: Send + 'static> BoundedQueue<T> for LfBoundedQueue<T> {
    fn try_enqueue(&self, value: T) -> Result<(), T> {
        LfBoundedQueue::try_enqueue(self, value)
    }

    fn try_dequeue(&self) -> Option<T> {
        LfBoundedQueue::try_dequeue(self)
    }

    fn wait_dequeue(&self, timeout: Duration) -> Option<T> {
        LfBoundedQueue::wait_dequeue(self, timeout)
    }

    fn is_empty(&self, precise: bool) -> bool {
        LfBoundedQueue::is_empty(self, precise)
    }

    fn is_full(&self, precise: bool) -> bool {
        LfBoundedQueue::is_full(self, precise)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wrap_around_two_slots() {
        let q = LfBoundedQueue::new(2);
        assert_eq!(q.try_enqueue('A'), Ok(()));
        assert_eq!(q.try_enqueue('B'), Ok(()));
        assert_eq!(q.try_enqueue('C'), Err('C'));

        assert_eq!(q.try_dequeue(), Some('A'));
        assert_eq!(q.try_enqueue('C'), Ok(()));
        assert_eq!(q.try_dequeue(), Some('B'));
        assert_eq!(q.try_dequeue(), Some('C'));
        assert_eq!(q.try_dequeue(), None);
    }

    #[test]
    fn non_power_of_two_capacity() {
        let q = LfBoundedQueue::new(3);
        assert_eq!(q.try_enqueue(1), Ok(()));
        assert_eq!(q.try_enqueue(2), Ok(()));
        assert_eq!(q.try_enqueue(3), Ok(()));
        assert_eq!(q.try_enqueue(4), Err(4));
        assert_eq!(q.try_dequeue(), Some(1));
        assert_eq!(q.try_enqueue(4), Ok(()));
        assert_eq!(q.try_dequeue(), Some(2));
        assert_eq!(q.try_dequeue(), Some(3));
        assert_eq!(q.try_dequeue(), Some(4));
        assert_eq!(q.try_dequeue(), None);
    }

    #[test]
    #[should_panic(expected = "non-zero")]
    fn zero_capacity_panics() {
        let _q: LfBoundedQueue<i32> = LfBoundedQueue::new(0);
    }

    #[test]
    fn wait_dequeue_times_out_on_empty() {
        let q: LfBoundedQueue<i32> = LfBoundedQueue::new(4);
        assert_eq!(q.wait_dequeue(Duration::from_millis(30)), None);
    }

    #[test]
    fn wait_dequeue_wakes_on_enqueue() {
        let q = Arc::new(LfBoundedQueue::new(4));
        let q2 = Arc::clone(&q);
        let handle = thread::spawn(move || q2.wait_dequeue(Duration::from_secs(1)));
        thread::sleep(Duration::from_millis(20));
        q.try_enqueue(7).unwrap();
        assert_eq!(handle.join().unwrap(), Some(7));
    }

    #[test]
    fn precise_and_approximate_agree_single_threaded() {
        let q = LfBoundedQueue::new(2);
        assert!(q.is_empty(true));
        q.try_enqueue(1).unwrap();
        q.try_enqueue(2).unwrap();
        assert!(q.is_full(true));
    }

    #[test]
    fn mpmc_stress_preserves_all_values_no_duplicates() {
        let q = Arc::new(LfBoundedQueue::new(64));
        let producers = 8u64;
        let per_producer = 2000u64;

        let producer_handles: Vec<_> = (0..producers)
            .map(|p| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    for i in 0..per_producer {
                        let mut value = (p, i);
                        loop {
                            match q.try_enqueue(value) {
                                Ok(()) => break,
                                Err(back) => {
                                    value = back;
                                    thread::yield_now();
                                }
                            }
                        }
                    }
                })
            })
            .collect();

        let total = producers * per_producer;
        let dequeued_total = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let consumer_count = 4;
        let consumer_handles: Vec<_> = (0..consumer_count)
            .map(|_| {
                let q = Arc::clone(&q);
                let dequeued_total = Arc::clone(&dequeued_total);
                thread::spawn(move || {
                    let mut collected = Vec::new();
                    while dequeued_total.load(std::sync::atomic::Ordering::Relaxed) < total {
                        match q.try_dequeue() {
                            Some(v) => {
                                collected.push(v);
                                dequeued_total.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                            }
                            None => thread::yield_now(),
                        }
                    }
                    collected
                })
            })
            .collect();

        for h in producer_handles {
            h.join().unwrap();
        }

        let mut all = Vec::new();
        for h in consumer_handles {
            all.extend(h.join().unwrap());
        }
        while let Some(v) = q.try_dequeue() {
            all.push(v);
        }

        assert_eq!(all.len() as u64, total);
        let unique: HashSet<_> = all.iter().copied().collect();
        assert_eq!(unique.len(), all.len());
    }
}
