//! Synchronization primitives used by the scheduler and its runners.
//!
//! - Atomic flags, counters and sequence numbers
//! - A mutex that records contention statistics
//! - Sequence affinity checking

/// Atomic flags, counters and sequence numbers
pub mod atomic;

/// Mutex with contention statistics
pub mod lock;

/// Sequence affinity checks
pub mod sequence;

pub use atomic::{AtomicCounter, AtomicFlag, AtomicSequence};
pub use lock::{LockStats, TrackedMutex, TrackedMutexGuard};
pub use sequence::SequenceChecker;
