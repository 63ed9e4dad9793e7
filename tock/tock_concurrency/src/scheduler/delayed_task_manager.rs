//! Delayed task manager.
//!
//! Holds delayed tasks until they are ripe, then hands each one to the
//! callback it was added with. Any thread may add tasks. A single service
//! runner drains the queue: the manager keeps at most one cancelable
//! wake-up armed on it, timed for the task that must run soonest.
//!
//! Queue state sits behind the `queue_lock`. The armed wake-up handle is
//! only touched on the service sequence. Closures posted to the service
//! runner hold a weak reference to the manager, so a wake-up that fires
//! after the manager is gone does nothing.

use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tock_core::features::{self, SchedulerFeatures};
use tock_core::{TickClock, TimeTicks};

use super::delayed_task::{DelayedTask, DelayedTaskQueue, PostTaskNowCallback};
use crate::runner::{DelayedTaskHandle, SequencedTaskRunner, TaskRunner};
use crate::sync::{LockStats, SequenceChecker, TrackedMutex};
use crate::task::{DelayPolicy, Task};

type WakeUp = (TimeTicks, DelayPolicy);

struct QueueState {
    queue: DelayedTaskQueue,
    service_runner: Option<Arc<dyn SequencedTaskRunner>>,
    align_wake_ups: bool,
    task_leeway: Duration,
}

impl QueueState {
    fn new() -> Self {
        Self {
            queue: DelayedTaskQueue::default(),
            service_runner: None,
            align_wake_ups: false,
            task_leeway: features::DEFAULT_TASK_LEEWAY,
        }
    }

    /// When and how precisely the next wake-up should fire.
    fn wake_up_target(&self) -> WakeUp {
        let Some(ripest) = self.queue.peek() else {
            return (TimeTicks::MAX, DelayPolicy::FlexibleNoSooner);
        };

        // One precise task anywhere in the queue makes every wake-up precise.
        let delay_policy = if self.queue.pending_high_res_tasks() > 0 {
            DelayPolicy::Precise
        } else {
            ripest.task.delay_policy
        };

        let latest = ripest.latest_run_time();
        if !self.align_wake_ups {
            return (latest, delay_policy);
        }
        let aligned = ripest
            .earliest_run_time()
            .snapped_to_next_tick(TimeTicks::ZERO, self.task_leeway);
        (aligned.min(latest), delay_policy)
    }
}

struct Inner {
    clock: Arc<dyn TickClock>,
    queue_lock: TrackedMutex<QueueState>,
    wake_up: Mutex<DelayedTaskHandle>,
    sequence_checker: SequenceChecker,
}

impl Inner {
    fn process_ripe_tasks(self: &Arc<Self>) {
        let (ripe, next_wake_up, service_runner) = {
            let mut state = self.queue_lock.lock();
            let now = self.clock.now_ticks();
            let ripe = state.queue.pop_ripe(now);
            trace!(
                "{} ripe delayed tasks at {}, {} still queued",
                ripe.len(),
                now,
                state.queue.len()
            );
            (ripe, state.wake_up_target(), state.service_runner.clone())
        };

        if !next_wake_up.0.is_max() {
            if let Some(service_runner) = service_runner {
                if service_runner.runs_tasks_in_current_sequence() {
                    self.schedule_process_ripe_tasks_on_service_thread();
                } else {
                    self.post_schedule(service_runner.as_ref());
                }
            }
        }

        for delayed_task in ripe {
            delayed_task.deliver();
        }
    }

    fn schedule_process_ripe_tasks_on_service_thread(self: &Arc<Self>) {
        debug_assert!(
            self.sequence_checker.called_on_valid_sequence(),
            "wake-up scheduled off the service sequence"
        );

        let ((run_time, delay_policy), service_runner) = {
            let state = self.queue_lock.lock();
            (state.wake_up_target(), state.service_runner.clone())
        };

        let mut wake_up = self.wake_up.lock();
        wake_up.cancel_task();
        if run_time.is_max() {
            return;
        }
        let Some(service_runner) = service_runner else {
            return;
        };

        let weak = Arc::downgrade(self);
        let process = Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.process_ripe_tasks();
            }
        });
        match service_runner.post_cancelable_delayed_task_at(process, run_time, delay_policy) {
            Ok(handle) => {
                debug!("Wake-up armed for {} ({:?})", run_time, delay_policy);
                *wake_up = handle;
            }
            Err(e) => warn!("Failed to arm wake-up for {}: {}", run_time, e),
        }
    }

    fn post_schedule(self: &Arc<Self>, service_runner: &dyn SequencedTaskRunner) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let schedule = Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.schedule_process_ripe_tasks_on_service_thread();
            }
        });
        if let Err(e) = service_runner.post_task(schedule) {
            warn!("Failed to post wake-up scheduling to the service runner: {}", e);
        }
    }
}

/// Holds delayed tasks and releases them once ripe.
///
/// A task is ripe when its earliest run time has passed, or as soon as its
/// owner is gone. Ripe tasks leave the queue in `(latest run time,
/// sequence number)` order and are passed to the callback they were added
/// with; the manager never runs task bodies itself.
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use tock_concurrency::runner::{ServiceThread, TaskRunner};
/// use tock_concurrency::scheduler::DelayedTaskManager;
/// use tock_concurrency::task::Task;
/// use tock_core::{DefaultTickClock, TickClock};
///
/// let clock: Arc<dyn TickClock> = Arc::new(DefaultTickClock::new());
/// let service = Arc::new(ServiceThread::start_with_clock("tock-service", Arc::clone(&clock)).unwrap());
/// let manager = DelayedTaskManager::new(Arc::clone(&clock));
/// manager.start(service.clone());
///
/// let task = Task::builder(|| println!("tick"))
///     .delay(clock.now_ticks(), Duration::from_millis(50))
///     .build();
/// let destination = Arc::clone(&service);
/// manager.add_delayed_task(
///     task,
///     Box::new(move |task: Task| {
///         let _ = destination.post_task(Box::new(move || {
///             task.run();
///         }));
///     }),
///     service,
/// );
/// ```
pub struct DelayedTaskManager {
    inner: Arc<Inner>,
}

impl DelayedTaskManager {
    /// Create a manager reading time from `clock`. Nothing is scheduled
    /// until [`start`](Self::start) is called.
    pub fn new(clock: Arc<dyn TickClock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                clock,
                queue_lock: TrackedMutex::new(QueueState::new(), "queue_lock"),
                wake_up: Mutex::new(DelayedTaskHandle::default()),
                sequence_checker: SequenceChecker::detached(),
            }),
        }
    }

    /// Attach the service runner, using the process-wide scheduler features.
    ///
    /// # Panics
    ///
    /// Panics if the manager was already started.
    pub fn start(&self, service_runner: Arc<dyn SequencedTaskRunner>) {
        self.start_with_features(service_runner, features::current());
    }

    /// Attach the service runner with explicit scheduler features. The
    /// features are read once here and never again.
    ///
    /// # Panics
    ///
    /// Panics if the manager was already started.
    pub fn start_with_features(
        &self,
        service_runner: Arc<dyn SequencedTaskRunner>,
        features: SchedulerFeatures,
    ) {
        let (run_time, queued) = {
            let mut state = self.inner.queue_lock.lock();
            assert!(
                state.service_runner.is_none(),
                "DelayedTaskManager started twice"
            );
            state.service_runner = Some(Arc::clone(&service_runner));
            state.align_wake_ups = features.align_wake_ups;
            state.task_leeway = features.task_leeway;
            (state.wake_up_target().0, state.queue.len())
        };

        info!(
            "Delayed task manager started (align_wake_ups: {}, task_leeway: {:?}, queued: {})",
            features.align_wake_ups, features.task_leeway, queued
        );

        if !run_time.is_max() {
            self.inner.post_schedule(service_runner.as_ref());
        }
    }

    /// Queue `task` until it is ripe, then call `post_task_now_callback`
    /// with it. `destination` is where the callback is expected to send the
    /// task; the manager keeps it alive while the task is queued.
    ///
    /// Callable from any thread, before or after start.
    ///
    /// # Panics
    ///
    /// Panics if the task has no body or no delayed run time.
    pub fn add_delayed_task(
        &self,
        task: Task,
        post_task_now_callback: PostTaskNowCallback,
        destination: Arc<dyn TaskRunner>,
    ) {
        let delayed_task = DelayedTask::new(task, post_task_now_callback, destination);

        let service_runner = {
            let mut state = self.inner.queue_lock.lock();
            let previous = state.wake_up_target();
            trace!("Queueing {:?}", delayed_task);
            state.queue.push(delayed_task);

            let Some(service_runner) = state.service_runner.clone() else {
                return;
            };
            let next = state.wake_up_target();
            if next == previous || next.0.is_max() {
                return;
            }
            debug!(
                "Wake-up target moved from {} to {} ({:?})",
                previous.0, next.0, next.1
            );
            service_runner
        };

        self.inner.post_schedule(service_runner.as_ref());
    }

    /// Hand every ripe task to its callback and re-arm the wake-up for the
    /// rest. Normally invoked by the wake-up itself on the service runner;
    /// off that sequence the re-arming is posted instead of done inline.
    pub fn process_ripe_tasks(&self) {
        self.inner.process_ripe_tasks();
    }

    /// Latest acceptable run time of the task that must run soonest.
    pub fn next_scheduled_run_time(&self) -> Option<TimeTicks> {
        let state = self.inner.queue_lock.lock();
        state.queue.peek().map(DelayedTask::latest_run_time)
    }

    /// Whether any queued task asked for `DelayPolicy::Precise`.
    pub fn has_pending_high_resolution_tasks(&self) -> bool {
        self.inner.queue_lock.lock().queue.pending_high_res_tasks() > 0
    }

    /// Number of tasks waiting to ripen.
    pub fn pending_task_count(&self) -> usize {
        self.inner.queue_lock.lock().queue.len()
    }

    /// Contention statistics of the queue lock.
    pub fn queue_lock_stats(&self) -> LockStats {
        self.inner.queue_lock.stats()
    }
}

impl Drop for DelayedTaskManager {
    fn drop(&mut self) {
        self.inner.wake_up.lock().cancel_task();
        trace!("Delayed task manager dropped");
    }
}
