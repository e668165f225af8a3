//! Debug assertion macros for the structural invariants of §3.
//!
//! Active only in debug builds (`debug_assert!`), zero overhead in release.

// =============================================================================
// INV-NODE-01: Single occupancy
// =============================================================================

/// Assert that a ring slot's sequence number matches the position a producer
/// or consumer is about to claim, i.e. the slot is in the expected state
/// before the operation mutates it.
///
/// Used in: `LfBoundedQueue::try_enqueue`, `try_dequeue` just before the CAS.
macro_rules! debug_assert_slot_owned {
    ($sequence:expr, $expected:expr) => {
        debug_assert!(
            $sequence == $expected,
            "INV-NODE-01 violated: slot sequence {} does not match expected claim {}",
            $sequence,
            $expected
        )
    };
}

// =============================================================================
// INV-SEQ-01: Monotonic sequence progress (LFB)
// =============================================================================

/// Assert that a ring slot's sequence number only increases across an
/// enqueue/dequeue cycle.
///
/// Used in: `LfBoundedQueue::try_enqueue`, `try_dequeue` after the store.
macro_rules! debug_assert_sequence_monotonic {
    ($old:expr, $new:expr) => {
        debug_assert!(
            $new > $old,
            "INV-SEQ-01 violated: sequence went from {} to {}",
            $old,
            $new
        )
    };
}

// =============================================================================
// INV-CNT-01: Bounded count (FGB)
// =============================================================================

/// Assert that the approximate size counter never exceeds the configured
/// capacity once a reservation succeeds.
///
/// Used in: `FgBoundedQueue::try_enqueue` after the counter reservation.
macro_rules! debug_assert_bounded_count {
    ($count:expr, $capacity:expr) => {
        debug_assert!(
            $count <= $capacity,
            "INV-CNT-01 violated: count {} exceeds capacity {}",
            $count,
            $capacity
        )
    };
}

pub(crate) use debug_assert_bounded_count;
pub(crate) use debug_assert_sequence_monotonic;
pub(crate) use debug_assert_slot_owned;
