//! Sequence affinity checks.
//!
//! Some state is only ever touched from one sequence (for the delayed task
//! manager, the service thread). A `SequenceChecker` starts detached, binds
//! to the first thread that checks it, and from then on reports whether
//! the caller is on that same thread.

use parking_lot::Mutex;
use std::thread::{self, ThreadId};

/// Verifies that calls happen on a single sequence.
#[derive(Debug, Default)]
pub struct SequenceChecker {
    bound_to: Mutex<Option<ThreadId>>,
}

impl SequenceChecker {
    /// Create a checker that is not yet bound to any sequence.
    pub fn detached() -> Self {
        Self {
            bound_to: Mutex::new(None),
        }
    }

    /// Whether the caller is on the bound sequence. Binds on first use.
    pub fn called_on_valid_sequence(&self) -> bool {
        let current = thread::current().id();
        let mut bound_to = self.bound_to.lock();
        match *bound_to {
            Some(owner) => owner == current,
            None => {
                *bound_to = Some(current);
                true
            }
        }
    }
}
