//! Debug assertion macros for ring and dispatch invariants.
//!
//! Only active in debug builds (`debug_assert!`), so there is no overhead in
//! release builds.

// =============================================================================
// Ring: bounded occupancy
// =============================================================================

/// Assert that the ring never holds more spans than its capacity.
///
/// **Invariant**: `len ≤ capacity`
///
/// Used in: `SpanRing::push()` after every write
macro_rules! debug_assert_ring_bounded {
    ($len:expr, $capacity:expr) => {
        debug_assert!(
            $len <= $capacity,
            "ring holds {} spans but capacity is {}",
            $len,
            $capacity
        )
    };
}

// =============================================================================
// Ring: cursor in range
// =============================================================================

/// Assert that the write cursor points at a valid slot.
///
/// **Invariant**: `cursor < capacity`
macro_rules! debug_assert_cursor_in_range {
    ($cursor:expr, $capacity:expr) => {
        debug_assert!(
            $cursor < $capacity,
            "write cursor {} out of range for capacity {}",
            $cursor,
            $capacity
        )
    };
}

// =============================================================================
// Dispatch: chunk coverage
// =============================================================================

/// Assert that a chunk plan covers every record exactly once and no chunk
/// exceeds the per-request limit.
///
/// **Invariant**: `Σ sizes = N ∧ ∀ size: size ≤ max_per_chunk`
///
/// Used in: `ChunkPlan::new()`
macro_rules! debug_assert_chunks_cover {
    ($plan:expr, $total:expr, $max:expr) => {
        debug_assert!(
            $plan.sizes().sum::<usize>() == $total && $plan.sizes().all(|s| s <= $max),
            "chunk plan {:?} does not cover {} records within {} per chunk",
            $plan,
            $total,
            $max
        )
    };
}

pub(crate) use debug_assert_chunks_cover;
pub(crate) use debug_assert_cursor_in_range;
pub(crate) use debug_assert_ring_bounded;
