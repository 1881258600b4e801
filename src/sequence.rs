//! Apply-sequence generation.
//!
//! Every submission to the workflow engine gets a fresh sequence, so that
//! callbacks for a superseded submission no longer match the record.

use std::sync::atomic::{AtomicU64, Ordering};

/// Low bits reserved for same-millisecond ordering.
const COUNTER_BITS: u32 = 12;

/// Source of fresh apply sequences.
pub trait ApplySequenceSource: Send + Sync {
    /// Return a value never returned before by this source.
    fn next_sequence(&self) -> u64;
}

/// Time-ordered sequence: `unix_millis << 12 | counter`.
///
/// Strictly increasing within a process, and ahead of anything issued by an
/// earlier process as long as the clock does not step back. Values stay below
/// `i64::MAX` so they fit a signed SQL integer column.
#[derive(Debug, Default)]
pub struct TimeOrderedSequence {
    last: AtomicU64,
}

impl TimeOrderedSequence {
    pub fn new() -> Self {
        Self::default()
    }

    fn now_floor() -> u64 {
        let millis = chrono::Utc::now().timestamp_millis().max(0) as u64;
        millis << COUNTER_BITS
    }
}

impl ApplySequenceSource for TimeOrderedSequence {
    fn next_sequence(&self) -> u64 {
        let floor = Self::now_floor();
        let mut current = self.last.load(Ordering::Relaxed);
        loop {
            let next = floor.max(current + 1);
            match self
                .last
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }
}
