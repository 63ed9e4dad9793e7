//! Deterministic task runner driven by a mock clock.
//!
//! Nothing runs until the owner asks: `run_until_idle` drains whatever is
//! runnable now, and `fast_forward_by` advances the mock clock step by
//! step, running delayed tasks as their time comes. The runner's sequence
//! is the thread that created it, which lets tests exercise code paths
//! that behave differently on and off the service sequence.

use log::trace;
use parking_lot::Mutex;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use tock_core::{MockTickClock, Result, TickClock, TimeTicks};

use super::{DelayedTaskHandle, SequencedTaskRunner, TaskRunner};
use crate::sync::AtomicFlag;
use crate::task::{Closure, DelayPolicy};

struct PendingDelayed {
    run_time: TimeTicks,
    sequence: u64,
    delay_policy: DelayPolicy,
    task: Closure,
    claim: Arc<AtomicFlag>,
}

impl PendingDelayed {
    fn is_cancelled(&self) -> bool {
        self.claim.is_set()
    }
}

impl PartialEq for PendingDelayed {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PendingDelayed {}

impl PartialOrd for PendingDelayed {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingDelayed {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.run_time, self.sequence).cmp(&(other.run_time, other.sequence))
    }
}

#[derive(Default)]
struct Queues {
    immediate: VecDeque<Closure>,
    delayed: BinaryHeap<Reverse<PendingDelayed>>,
    next_sequence: u64,
}

impl Queues {
    fn drop_cancelled_head(&mut self) {
        while matches!(self.delayed.peek(), Some(Reverse(head)) if head.is_cancelled()) {
            self.delayed.pop();
        }
    }
}

/// A sequenced task runner that only runs tasks when told to.
pub struct ManualTaskRunner {
    clock: Arc<MockTickClock>,
    owner: ThreadId,
    queues: Mutex<Queues>,
}

impl ManualTaskRunner {
    /// Create a runner bound to the calling thread and driven by `clock`.
    pub fn new(clock: Arc<MockTickClock>) -> Self {
        Self {
            clock,
            owner: thread::current().id(),
            queues: Mutex::new(Queues::default()),
        }
    }

    /// The clock this runner advances.
    pub fn clock(&self) -> &Arc<MockTickClock> {
        &self.clock
    }

    /// Run every task that is runnable at the current time, including tasks
    /// posted by the tasks being run. Returns how many tasks ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while let Some(task) = self.next_runnable() {
            task();
            ran += 1;
        }
        ran
    }

    /// Advance the clock by `delta`, running tasks in time order along the
    /// way. Returns how many tasks ran.
    pub fn fast_forward_by(&self, delta: Duration) -> usize {
        let target = self.clock.now_ticks() + delta;
        let mut ran = self.run_until_idle();

        while let Some((run_time, _)) = self.next_pending_run_time() {
            if run_time > target {
                break;
            }
            if run_time > self.clock.now_ticks() {
                self.clock.set_now(run_time);
            }
            ran += self.run_until_idle();
        }

        if target > self.clock.now_ticks() {
            self.clock.set_now(target);
        }
        ran + self.run_until_idle()
    }

    /// Number of tasks that have not run and were not cancelled.
    pub fn pending_task_count(&self) -> usize {
        let queues = self.queues.lock();
        queues.immediate.len() + Self::live_delayed(&queues)
    }

    /// Number of delayed tasks that have not run and were not cancelled.
    pub fn pending_delayed_task_count(&self) -> usize {
        Self::live_delayed(&self.queues.lock())
    }

    /// Run time and policy of the next live delayed task.
    pub fn next_pending_run_time(&self) -> Option<(TimeTicks, DelayPolicy)> {
        let mut queues = self.queues.lock();
        queues.drop_cancelled_head();
        queues
            .delayed
            .peek()
            .map(|Reverse(head)| (head.run_time, head.delay_policy))
    }

    fn live_delayed(queues: &Queues) -> usize {
        queues
            .delayed
            .iter()
            .filter(|Reverse(entry)| !entry.is_cancelled())
            .count()
    }

    // Takes the next task under the lock; the caller runs it unlocked so the
    // task can post more work.
    fn next_runnable(&self) -> Option<Closure> {
        let mut queues = self.queues.lock();
        if let Some(task) = queues.immediate.pop_front() {
            return Some(task);
        }

        let now = self.clock.now_ticks();
        loop {
            queues.drop_cancelled_head();
            let due = matches!(queues.delayed.peek(), Some(Reverse(head)) if head.run_time <= now);
            if !due {
                return None;
            }
            let Reverse(entry) = queues.delayed.pop()?;
            if entry.claim.try_set() {
                trace!("Running delayed task due at {} (now {})", entry.run_time, now);
                return Some(entry.task);
            }
        }
    }
}

impl TaskRunner for ManualTaskRunner {
    fn post_task(&self, task: Closure) -> Result<()> {
        self.queues.lock().immediate.push_back(task);
        Ok(())
    }
}

impl SequencedTaskRunner for ManualTaskRunner {
    fn runs_tasks_in_current_sequence(&self) -> bool {
        thread::current().id() == self.owner
    }

    fn post_cancelable_delayed_task_at(
        &self,
        task: Closure,
        run_time: TimeTicks,
        delay_policy: DelayPolicy,
    ) -> Result<DelayedTaskHandle> {
        let (handle, claim) = DelayedTaskHandle::new_pair();
        let mut queues = self.queues.lock();
        let sequence = queues.next_sequence;
        queues.next_sequence += 1;
        queues.delayed.push(Reverse(PendingDelayed {
            run_time,
            sequence,
            delay_policy,
            task,
            claim,
        }));
        Ok(handle)
    }
}
