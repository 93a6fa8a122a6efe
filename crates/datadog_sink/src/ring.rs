//! Fixed-capacity span staging ring.
//!
//! [`SpanRing`] is the plain data structure: once full, each push overwrites
//! the oldest span. [`SharedRing`] puts it behind a single mutex and exposes
//! the two operations producers and the flusher need. The lock is held only
//! for a slot write or a buffer swap, never across grouping or I/O.

use std::mem;
use std::sync::PoisonError;

#[cfg(feature = "loom")]
use loom::sync::Mutex;
#[cfg(not(feature = "loom"))]
use std::sync::Mutex;

use crate::config::DEFAULT_SPAN_BUFFER_SIZE;
use crate::invariants::{debug_assert_cursor_in_range, debug_assert_ring_bounded};
use crate::span::Span;

/// Circular span store that overwrites the oldest entry when full.
#[derive(Debug)]
pub struct SpanRing {
    /// Filled up to `capacity`, then overwritten in place
    slots: Vec<Span>,
    /// Next slot to write once the ring is full
    cursor: usize,
    capacity: usize,
}

impl SpanRing {
    /// Creates an empty ring. A zero capacity selects the default (16384).
    ///
    /// All slots are allocated up front so `push` never reallocates.
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            DEFAULT_SPAN_BUFFER_SIZE
        } else {
            capacity
        };
        Self {
            slots: Vec::with_capacity(capacity),
            cursor: 0,
            capacity,
        }
    }

    /// Writes a span into the next slot, returning the span it displaced.
    pub fn push(&mut self, span: Span) -> Option<Span> {
        debug_assert_cursor_in_range!(self.cursor, self.capacity);

        let evicted = if self.slots.len() < self.capacity {
            self.slots.push(span);
            None
        } else {
            Some(mem::replace(&mut self.slots[self.cursor], span))
        };
        self.cursor = (self.cursor + 1) % self.capacity;

        debug_assert_ring_bounded!(self.slots.len(), self.capacity);
        evicted
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.slots.len() == self.capacity
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Consumes the ring, returning its spans oldest first.
    pub fn into_spans(self) -> Vec<Span> {
        let mut spans = self.slots;
        if spans.len() == self.capacity {
            spans.rotate_left(self.cursor);
        }
        spans
    }
}

/// Mutex-guarded [`SpanRing`] shared between producers and the flusher.
pub struct SharedRing {
    inner: Mutex<SpanRing>,
    capacity: usize,
}

impl SharedRing {
    pub fn new(capacity: usize) -> Self {
        let ring = SpanRing::new(capacity);
        let capacity = ring.capacity();
        Self {
            inner: Mutex::new(ring),
            capacity,
        }
    }

    /// Writes a span. Returns `true` if an unflushed span was overwritten.
    pub fn push(&self, span: Span) -> bool {
        let evicted = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(span);
        // The displaced span is dropped after the guard.
        evicted.is_some()
    }

    /// Swaps in a fresh ring and returns the old one.
    ///
    /// The caller turns the returned ring into spans after the lock has
    /// been released.
    pub fn drain_and_reset(&self) -> SpanRing {
        let fresh = SpanRing::new(self.capacity);
        let mut ring = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        mem::replace(&mut *ring, fresh)
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
