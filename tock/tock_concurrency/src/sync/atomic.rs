//! Atomic building blocks.
//!
//! Small lock-free types shared between the scheduler and its runners:
//! cancellation flags for wake-up handles, task sequence numbers, and
//! counters for runner statistics.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// A counter that can be incremented and read atomically.
#[derive(Debug, Default)]
pub struct AtomicCounter {
    value: AtomicUsize,
}

impl AtomicCounter {
    /// Create a new counter starting at `initial_value`.
    pub fn new(initial_value: usize) -> Self {
        Self {
            value: AtomicUsize::new(initial_value),
        }
    }

    /// Increment the counter and return the new value.
    pub fn increment(&self) -> usize {
        self.value.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Get the current value of the counter.
    pub fn get(&self) -> usize {
        self.value.load(Ordering::SeqCst)
    }
}

/// A one-way cancellation flag.
///
/// Shared by a `DelayedTaskHandle` and the runner entry it controls. Once
/// set it stays set.
#[derive(Debug, Default)]
pub struct AtomicFlag {
    flag: AtomicBool,
}

impl AtomicFlag {
    /// Create a new flag with the specified initial state.
    pub fn new(initial_state: bool) -> Self {
        Self {
            flag: AtomicBool::new(initial_state),
        }
    }

    /// Set the flag and return the previous value.
    pub fn set(&self) -> bool {
        self.flag.swap(true, Ordering::SeqCst)
    }

    /// Get the current state of the flag.
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Set the flag if it's not already set.
    ///
    /// Returns true if the flag was set by this call, false if it was already set.
    pub fn try_set(&self) -> bool {
        !self.flag.swap(true, Ordering::SeqCst)
    }
}

/// A sequence number that can be safely incremented across threads.
///
/// Task sequence numbers break ties between tasks due at the same instant,
/// so they must be unique and increase in posting order.
#[derive(Debug)]
pub struct AtomicSequence {
    value: AtomicU64,
}

impl AtomicSequence {
    /// Create a new atomic sequence starting from the specified value.
    pub const fn new(start: u64) -> Self {
        Self {
            value: AtomicU64::new(start),
        }
    }

    /// Get the next sequence number.
    pub fn next(&self) -> u64 {
        self.value.fetch_add(1, Ordering::SeqCst)
    }

    /// Get the current sequence number without incrementing.
    pub fn current(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }
}

impl Default for AtomicSequence {
    fn default() -> Self {
        Self::new(0)
    }
}
