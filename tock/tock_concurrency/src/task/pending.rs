//! Tasks waiting to run.
//!
//! A `Task` is a one-shot closure plus its timing contract. Delayed tasks
//! carry a run-time window: they may run no sooner than
//! `earliest_delayed_run_time()` and should run no later than
//! `latest_delayed_run_time()`. The width of the window depends on the
//! delay policy.

use std::any::Any;
use std::fmt;
use std::panic::Location;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tock_core::TimeTicks;

use crate::sync::AtomicSequence;

/// Boxed task body.
pub type Closure = Box<dyn FnOnce() + Send + 'static>;

static NEXT_SEQUENCE_NUM: AtomicSequence = AtomicSequence::new(0);

/// How strictly a delayed task's run time must be honored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DelayPolicy {
    /// The task may run any time within `[delayed_run_time,
    /// delayed_run_time + leeway]`, which lets wake-ups be batched
    #[default]
    FlexibleNoSooner,

    /// The task must run as close to `delayed_run_time` as possible
    Precise,
}

/// A unit of work with an optional run-time window.
pub struct Task {
    callback: Option<Closure>,
    owner: Option<Weak<dyn Any + Send + Sync>>,

    /// Tie-breaker between tasks due at the same instant. Increases in
    /// posting order across the whole process.
    pub sequence_num: u64,

    /// When the task was posted.
    pub queue_time: TimeTicks,

    /// Requested run time. `None` for tasks that should run immediately.
    pub delayed_run_time: Option<TimeTicks>,

    /// Slack granted past `delayed_run_time` under `FlexibleNoSooner`.
    pub leeway: Duration,

    /// Precision requested for the run time.
    pub delay_policy: DelayPolicy,

    /// Where the task was posted from.
    pub posted_from: &'static Location<'static>,
}

impl Task {
    /// Start building a task around `callback`.
    #[track_caller]
    pub fn builder<F>(callback: F) -> TaskBuilder
    where
        F: FnOnce() + Send + 'static,
    {
        TaskBuilder::new(callback)
    }

    /// Whether the task still carries its body.
    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    /// Remove the task body, leaving an empty task behind.
    pub fn take_callback(&mut self) -> Option<Closure> {
        self.callback.take()
    }

    /// Whether the task may still do useful work.
    ///
    /// A task bound to an owner becomes invalid once every strong reference
    /// to that owner is gone. Unbound tasks are always considered valid.
    pub fn maybe_valid(&self) -> bool {
        self.owner
            .as_ref()
            .map_or(true, |owner| owner.strong_count() > 0)
    }

    /// Earliest time the task may run.
    pub fn earliest_delayed_run_time(&self) -> Option<TimeTicks> {
        self.delayed_run_time
    }

    /// Latest acceptable run time.
    pub fn latest_delayed_run_time(&self) -> Option<TimeTicks> {
        self.delayed_run_time.map(|run_time| match self.delay_policy {
            DelayPolicy::FlexibleNoSooner => run_time + self.leeway,
            DelayPolicy::Precise => run_time,
        })
    }

    /// Run the task body.
    ///
    /// Returns `false` without running anything if the body was taken or
    /// the owner is gone.
    pub fn run(mut self) -> bool {
        if !self.maybe_valid() {
            return false;
        }
        match self.callback.take() {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("sequence_num", &self.sequence_num)
            .field("delayed_run_time", &self.delayed_run_time)
            .field("leeway", &self.leeway)
            .field("delay_policy", &self.delay_policy)
            .field("has_callback", &self.has_callback())
            .field("maybe_valid", &self.maybe_valid())
            .field("posted_from", &self.posted_from)
            .finish()
    }
}

/// Builder for `Task`.
pub struct TaskBuilder {
    callback: Closure,
    owner: Option<Weak<dyn Any + Send + Sync>>,
    queue_time: TimeTicks,
    delayed_run_time: Option<TimeTicks>,
    leeway: Duration,
    delay_policy: DelayPolicy,
    posted_from: &'static Location<'static>,
}

impl TaskBuilder {
    #[track_caller]
    fn new<F>(callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            callback: Box::new(callback),
            owner: None,
            queue_time: TimeTicks::ZERO,
            delayed_run_time: None,
            leeway: Duration::ZERO,
            delay_policy: DelayPolicy::default(),
            posted_from: Location::caller(),
        }
    }

    /// Run no sooner than `run_time`.
    pub fn delayed_run_time(mut self, run_time: TimeTicks) -> Self {
        self.delayed_run_time = Some(run_time);
        self
    }

    /// Run `delay` after `now`; also records `now` as the queue time.
    pub fn delay(mut self, now: TimeTicks, delay: Duration) -> Self {
        self.queue_time = now;
        self.delayed_run_time = Some(now + delay);
        self
    }

    /// Record when the task was posted.
    pub fn queue_time(mut self, queue_time: TimeTicks) -> Self {
        self.queue_time = queue_time;
        self
    }

    /// Slack past the run time for flexible tasks.
    pub fn leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    /// Precision requested for the run time.
    pub fn delay_policy(mut self, delay_policy: DelayPolicy) -> Self {
        self.delay_policy = delay_policy;
        self
    }

    /// Tie the task's validity to `owner`: once the last `Arc` to the owner
    /// is dropped the task will not run.
    pub fn bind_to<T>(mut self, owner: &Arc<T>) -> Self
    where
        T: Send + Sync + 'static,
    {
        let weak: Weak<T> = Arc::downgrade(owner);
        self.owner = Some(weak);
        self
    }

    /// Finish the task and assign it a sequence number.
    pub fn build(self) -> Task {
        Task {
            callback: Some(self.callback),
            owner: self.owner,
            sequence_num: NEXT_SEQUENCE_NUM.next(),
            queue_time: self.queue_time,
            delayed_run_time: self.delayed_run_time,
            leeway: self.leeway,
            delay_policy: self.delay_policy,
            posted_from: self.posted_from,
        }
    }
}
