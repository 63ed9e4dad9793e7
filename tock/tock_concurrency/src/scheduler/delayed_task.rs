//! The delayed task queue.
//!
//! Queue entries are ordered by `(latest run time, sequence number)`, so
//! the head is always the task that must run soonest, with ties broken in
//! posting order. The queue also counts how many of its entries asked for
//! `DelayPolicy::Precise`; the count changes only through `push` and `pop`,
//! which keeps it equal to the number of precise entries.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::Arc;

use tock_core::TimeTicks;

use crate::runner::TaskRunner;
use crate::task::{DelayPolicy, Task};

/// Receives a task once it is ripe. Usually posts it to its destination.
pub type PostTaskNowCallback = Box<dyn FnOnce(Task) + Send + 'static>;

/// A queued task together with where it goes when ripe.
pub(crate) struct DelayedTask {
    pub(crate) task: Task,
    pub(crate) callback: PostTaskNowCallback,
    // Kept alive until delivery; the callback does the actual posting.
    #[allow(dead_code)]
    task_runner: Arc<dyn TaskRunner>,
    earliest: TimeTicks,
    latest: TimeTicks,
}

impl DelayedTask {
    /// Wrap `task`. Panics if the task has no body or no run time.
    pub(crate) fn new(
        task: Task,
        callback: PostTaskNowCallback,
        task_runner: Arc<dyn TaskRunner>,
    ) -> Self {
        assert!(task.has_callback(), "delayed task posted without a callback");
        let (Some(earliest), Some(latest)) =
            (task.earliest_delayed_run_time(), task.latest_delayed_run_time())
        else {
            panic!("delayed task posted without a delayed run time");
        };
        Self {
            task,
            callback,
            task_runner,
            earliest,
            latest,
        }
    }

    pub(crate) fn earliest_run_time(&self) -> TimeTicks {
        self.earliest
    }

    pub(crate) fn latest_run_time(&self) -> TimeTicks {
        self.latest
    }

    pub(crate) fn is_precise(&self) -> bool {
        self.task.delay_policy == DelayPolicy::Precise
    }

    /// Due, or dead. Dead tasks are drained early so they do not hold a
    /// future wake-up.
    pub(crate) fn is_ripe(&self, now: TimeTicks) -> bool {
        self.earliest <= now || !self.task.maybe_valid()
    }

    /// Hand the task to its callback.
    pub(crate) fn deliver(self) {
        (self.callback)(self.task);
    }

    fn key(&self) -> (TimeTicks, u64) {
        (self.latest, self.task.sequence_num)
    }
}

impl PartialEq for DelayedTask {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for DelayedTask {}

impl PartialOrd for DelayedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl fmt::Debug for DelayedTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayedTask")
            .field("sequence_num", &self.task.sequence_num)
            .field("earliest", &self.earliest)
            .field("latest", &self.latest)
            .field("delay_policy", &self.task.delay_policy)
            .finish()
    }
}

/// Min-queue of delayed tasks with a count of precise entries.
#[derive(Default)]
pub(crate) struct DelayedTaskQueue {
    heap: BinaryHeap<Reverse<DelayedTask>>,
    pending_high_res_tasks: usize,
}

impl DelayedTaskQueue {
    pub(crate) fn push(&mut self, delayed_task: DelayedTask) {
        if delayed_task.is_precise() {
            self.pending_high_res_tasks += 1;
        }
        self.heap.push(Reverse(delayed_task));
    }

    pub(crate) fn peek(&self) -> Option<&DelayedTask> {
        self.heap.peek().map(|Reverse(head)| head)
    }

    pub(crate) fn pop(&mut self) -> Option<DelayedTask> {
        let Reverse(head) = self.heap.pop()?;
        if head.is_precise() {
            assert!(
                self.pending_high_res_tasks > 0,
                "pending high resolution task count underflow"
            );
            self.pending_high_res_tasks -= 1;
        }
        Some(head)
    }

    /// Pop every task at the head that is ripe at `now`, in queue order.
    pub(crate) fn pop_ripe(&mut self, now: TimeTicks) -> Vec<DelayedTask> {
        let mut ripe = Vec::new();
        while self.peek().map_or(false, |head| head.is_ripe(now)) {
            if let Some(head) = self.pop() {
                ripe.push(head);
            }
        }
        ripe
    }

    pub(crate) fn pending_high_res_tasks(&self) -> usize {
        self.pending_high_res_tasks
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ManualTaskRunner;
    use std::time::Duration;
    use tock_core::MockTickClock;

    fn destination() -> Arc<dyn TaskRunner> {
        Arc::new(ManualTaskRunner::new(Arc::new(MockTickClock::default())))
    }

    fn delayed(run_at: u64, leeway: u64, policy: DelayPolicy) -> DelayedTask {
        let task = Task::builder(|| {})
            .delayed_run_time(TimeTicks::from_millis(run_at))
            .leeway(Duration::from_millis(leeway))
            .delay_policy(policy)
            .build();
        DelayedTask::new(task, Box::new(|_: Task| {}), destination())
    }

    #[test]
    fn test_head_is_smallest_latest_run_time() {
        let mut queue = DelayedTaskQueue::default();
        // Earliest 50 but latest 90: ordered after a task whose latest is 60.
        queue.push(delayed(50, 40, DelayPolicy::FlexibleNoSooner));
        queue.push(delayed(60, 0, DelayPolicy::Precise));
        queue.push(delayed(200, 0, DelayPolicy::Precise));

        let order: Vec<_> = std::iter::from_fn(|| queue.pop())
            .map(|t| t.latest_run_time())
            .collect();
        assert_eq!(
            order,
            vec![
                TimeTicks::from_millis(60),
                TimeTicks::from_millis(90),
                TimeTicks::from_millis(200)
            ]
        );
    }

    #[test]
    fn test_ties_break_by_sequence() {
        let mut queue = DelayedTaskQueue::default();
        let first = delayed(10, 0, DelayPolicy::Precise);
        let second = delayed(10, 0, DelayPolicy::FlexibleNoSooner);
        let (first_seq, second_seq) = (first.task.sequence_num, second.task.sequence_num);

        queue.push(second);
        queue.push(first);

        assert_eq!(queue.pop().unwrap().task.sequence_num, first_seq);
        assert_eq!(queue.pop().unwrap().task.sequence_num, second_seq);
    }

    #[test]
    fn test_high_res_count_follows_queue_contents() {
        let mut queue = DelayedTaskQueue::default();
        queue.push(delayed(10, 0, DelayPolicy::Precise));
        queue.push(delayed(20, 5, DelayPolicy::FlexibleNoSooner));
        queue.push(delayed(30, 0, DelayPolicy::Precise));
        assert_eq!(queue.pending_high_res_tasks(), 2);

        queue.pop();
        assert_eq!(queue.pending_high_res_tasks(), 1);
        queue.pop();
        assert_eq!(queue.pending_high_res_tasks(), 1);
        queue.pop();
        assert_eq!(queue.pending_high_res_tasks(), 0);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_pop_ripe_takes_only_due_prefix() {
        let mut queue = DelayedTaskQueue::default();
        queue.push(delayed(10, 0, DelayPolicy::Precise));
        queue.push(delayed(20, 0, DelayPolicy::Precise));
        queue.push(delayed(30, 0, DelayPolicy::Precise));

        let ripe = queue.pop_ripe(TimeTicks::from_millis(20));
        assert_eq!(ripe.len(), 2);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pending_high_res_tasks(), 1);
    }

    #[test]
    fn test_flexible_task_ripe_at_earliest_run_time() {
        let task = delayed(100, 50, DelayPolicy::FlexibleNoSooner);
        assert_eq!(task.earliest_run_time(), TimeTicks::from_millis(100));
        assert!(!task.is_ripe(TimeTicks::from_millis(99)));
        assert!(task.is_ripe(TimeTicks::from_millis(100)));
    }

    #[test]
    fn test_dead_task_is_ripe_early() {
        let owner = Arc::new(());
        let task = Task::builder(|| {})
            .delayed_run_time(TimeTicks::from_millis(10_000))
            .bind_to(&owner)
            .build();
        let delayed = DelayedTask::new(task, Box::new(|_: Task| {}), destination());

        assert!(!delayed.is_ripe(TimeTicks::ZERO));
        drop(owner);
        assert!(delayed.is_ripe(TimeTicks::ZERO));
    }

    #[test]
    #[should_panic(expected = "without a delayed run time")]
    fn test_rejects_immediate_task() {
        let task = Task::builder(|| {}).build();
        DelayedTask::new(task, Box::new(|_: Task| {}), destination());
    }

    #[test]
    #[should_panic(expected = "without a callback")]
    fn test_rejects_empty_task() {
        let mut task = Task::builder(|| {})
            .delayed_run_time(TimeTicks::from_millis(1))
            .build();
        task.take_callback();
        DelayedTask::new(task, Box::new(|_: Task| {}), destination());
    }
}
