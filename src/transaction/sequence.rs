//! Monotonic sequence numbers for acknowledgments
//!
//! Sequence numbers correlate a replica's acknowledgments in logs; they never
//! influence ordering decisions. The counter does not handle wrap-around: a
//! single transaction issues a handful of values at most.

use std::sync::atomic::{AtomicI64, Ordering};

/// Monotonically increasing sequence counter
#[derive(Debug, Default)]
pub struct SequenceCounter {
    next: AtomicI64,
}

impl SequenceCounter {
    /// Create a counter starting at zero
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicI64::new(0),
        }
    }

    /// Assign the next sequence number
    pub fn next(&self) -> i64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of sequence numbers assigned so far
    #[must_use]
    pub fn issued(&self) -> i64 {
        self.next.load(Ordering::Relaxed)
    }
}
