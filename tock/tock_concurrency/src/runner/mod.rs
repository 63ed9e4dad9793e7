//! Task runners.
//!
//! A task runner accepts closures and runs them somewhere else: on a
//! dedicated thread, on a pool, or under manual control in tests. The
//! delayed task manager talks to two kinds:
//!
//! - the *service* runner, a `SequencedTaskRunner` on which the manager
//!   arms its wake-ups and drains ripe tasks;
//! - *destination* runners, plain `TaskRunner`s that eventually run the
//!   tasks the manager hands off.

/// Deterministic runner driven by a mock clock
pub mod manual;

/// Runner backed by a dedicated OS thread
pub mod service_thread;

use std::sync::Arc;

use tock_core::{Result, TimeTicks};

use crate::sync::AtomicFlag;
use crate::task::{Closure, DelayPolicy};

pub use manual::ManualTaskRunner;
pub use service_thread::{ServiceThread, ServiceThreadStats};

/// Something that runs posted closures.
pub trait TaskRunner: Send + Sync {
    /// Post `task` to run as soon as possible.
    fn post_task(&self, task: Closure) -> Result<()>;
}

/// A task runner that runs its tasks one at a time, in order, on a single
/// logical sequence.
pub trait SequencedTaskRunner: TaskRunner {
    /// Whether the caller is currently running on this runner's sequence.
    fn runs_tasks_in_current_sequence(&self) -> bool;

    /// Post `task` to run at `run_time` (no sooner), with the given
    /// precision. The returned handle can cancel it until it runs.
    fn post_cancelable_delayed_task_at(
        &self,
        task: Closure,
        run_time: TimeTicks,
        delay_policy: DelayPolicy,
    ) -> Result<DelayedTaskHandle>;
}

/// Handle to a cancelable delayed task.
///
/// The handle and the runner share a flag; whichever side sets it first
/// wins. Cancelling guarantees the task will not start. Once the task has
/// started the handle is no longer valid and cancelling is a no-op.
#[derive(Debug, Default)]
pub struct DelayedTaskHandle {
    flag: Option<Arc<AtomicFlag>>,
}

impl DelayedTaskHandle {
    /// Create a handle together with the flag the runner must claim
    /// (`try_set`) before running the task.
    pub fn new_pair() -> (Self, Arc<AtomicFlag>) {
        let flag = Arc::new(AtomicFlag::default());
        (
            Self {
                flag: Some(Arc::clone(&flag)),
            },
            flag,
        )
    }

    /// Whether the task is still pending.
    pub fn is_valid(&self) -> bool {
        self.flag.as_ref().map_or(false, |flag| !flag.is_set())
    }

    /// Cancel the task if it has not started. Idempotent.
    pub fn cancel_task(&mut self) {
        if let Some(flag) = self.flag.take() {
            flag.set();
        }
    }
}
