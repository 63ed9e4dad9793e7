//! Dedicated service thread.
//!
//! `ServiceThread` is a `SequencedTaskRunner` backed by one named OS
//! thread. Commands arrive through a `crossbeam-channel` mailbox; delayed
//! tasks wait in a timer heap inside the thread, which sleeps in
//! `recv_timeout` until the next timer is due or a new command arrives.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, trace, warn};
use parking_lot::Mutex;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use tock_core::{ConcurrencyError, DefaultTickClock, Result, TickClock, TimeTicks};

use super::{DelayedTaskHandle, SequencedTaskRunner, TaskRunner};
use crate::sync::{AtomicCounter, AtomicFlag};
use crate::task::{Closure, DelayPolicy};

/// Counters describing what a service thread has done.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ServiceThreadStats {
    /// Tasks that ran to completion
    pub tasks_completed: usize,

    /// Tasks that panicked
    pub tasks_panicked: usize,

    /// Delayed tasks skipped because they were cancelled
    pub delayed_tasks_cancelled: usize,

    /// Delayed tasks posted with `DelayPolicy::Precise`
    pub precise_delayed_tasks: usize,
}

#[derive(Debug, Default)]
struct Counters {
    tasks_completed: AtomicCounter,
    tasks_panicked: AtomicCounter,
    delayed_tasks_cancelled: AtomicCounter,
    precise_delayed_tasks: AtomicCounter,
}

enum Command {
    Run(Closure),
    RunAt(TimerEntry),
    Shutdown,
}

struct TimerEntry {
    run_time: TimeTicks,
    sequence: u64,
    task: Closure,
    claim: Arc<AtomicFlag>,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.run_time, self.sequence).cmp(&(other.run_time, other.sequence))
    }
}

struct ServiceLoop {
    name: String,
    receiver: Receiver<Command>,
    clock: Arc<dyn TickClock>,
    counters: Arc<Counters>,
    timers: BinaryHeap<Reverse<TimerEntry>>,
}

impl ServiceLoop {
    fn run(mut self) {
        debug!("Service thread {}: Starting", self.name);

        loop {
            self.fire_due_timers();
            self.drop_cancelled_timers();

            let command = match self.timers.peek() {
                Some(Reverse(next)) => {
                    let wait = next.run_time - self.clock.now_ticks();
                    match self.receiver.recv_timeout(wait) {
                        Ok(command) => command,
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match self.receiver.recv() {
                    Ok(command) => command,
                    Err(_) => break,
                },
            };

            match command {
                Command::Run(task) => self.run_task(task),
                Command::RunAt(entry) => self.timers.push(Reverse(entry)),
                Command::Shutdown => break,
            }
        }

        if !self.timers.is_empty() {
            debug!(
                "Service thread {}: Dropping {} pending delayed tasks",
                self.name,
                self.timers.len()
            );
        }
        debug!("Service thread {}: Shutting down", self.name);
    }

    fn fire_due_timers(&mut self) {
        let now = self.clock.now_ticks();
        while let Some(Reverse(next)) = self.timers.peek() {
            if next.run_time > now {
                break;
            }
            let Some(Reverse(entry)) = self.timers.pop() else {
                break;
            };
            if entry.claim.try_set() {
                self.run_task(entry.task);
            } else {
                trace!(
                    "Service thread {}: Skipping cancelled task due at {}",
                    self.name,
                    entry.run_time
                );
                self.counters.delayed_tasks_cancelled.increment();
            }
        }
    }

    // Cancelled heads would otherwise set the next wait and wake the
    // thread at their old due time.
    fn drop_cancelled_timers(&mut self) {
        while matches!(self.timers.peek(), Some(Reverse(head)) if head.claim.is_set()) {
            if let Some(Reverse(entry)) = self.timers.pop() {
                trace!(
                    "Service thread {}: Dropping cancelled task due at {}",
                    self.name,
                    entry.run_time
                );
                self.counters.delayed_tasks_cancelled.increment();
            }
        }
    }

    fn run_task(&self, task: Closure) {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task));
        match result {
            Ok(()) => {
                self.counters.tasks_completed.increment();
            }
            Err(e) => {
                let message = e
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| e.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "<unknown panic>".to_string());
                error!("Service thread {}: Task panicked: {}", self.name, message);
                self.counters.tasks_panicked.increment();
            }
        }
    }
}

/// A sequenced task runner owning one OS thread.
pub struct ServiceThread {
    name: String,
    sender: Sender<Command>,
    thread_id: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
    next_sequence: AtomicCounter,
    shut_down: AtomicFlag,
}

impl ServiceThread {
    /// Start a service thread on the system monotonic clock.
    pub fn start(name: impl Into<String>) -> Result<Self> {
        Self::start_with_clock(name, Arc::new(DefaultTickClock::new()))
    }

    /// Start a service thread whose timers are measured on `clock`.
    ///
    /// The clock must advance on its own; a mock clock would leave timers
    /// waiting forever.
    pub fn start_with_clock(name: impl Into<String>, clock: Arc<dyn TickClock>) -> Result<Self> {
        let name = name.into();
        let (sender, receiver) = unbounded();
        let counters = Arc::new(Counters::default());

        let service_loop = ServiceLoop {
            name: name.clone(),
            receiver,
            clock,
            counters: Arc::clone(&counters),
            timers: BinaryHeap::new(),
        };

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || service_loop.run())?;

        info!("Started service thread {}", name);

        Ok(Self {
            name,
            sender,
            thread_id: handle.thread().id(),
            handle: Mutex::new(Some(handle)),
            counters,
            next_sequence: AtomicCounter::default(),
            shut_down: AtomicFlag::default(),
        })
    }

    /// Name of the underlying thread.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Counters accumulated so far.
    pub fn stats(&self) -> ServiceThreadStats {
        ServiceThreadStats {
            tasks_completed: self.counters.tasks_completed.get(),
            tasks_panicked: self.counters.tasks_panicked.get(),
            delayed_tasks_cancelled: self.counters.delayed_tasks_cancelled.get(),
            precise_delayed_tasks: self.counters.precise_delayed_tasks.get(),
        }
    }

    /// Whether `shutdown` has been called.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.is_set()
    }

    /// Stop the thread. Pending tasks are dropped without running.
    ///
    /// Joins the thread unless called from the thread itself.
    pub fn shutdown(&self) {
        if !self.shut_down.try_set() {
            return;
        }
        info!("Shutting down service thread {}", self.name);
        // The loop may already be gone if it panicked.
        let _ = self.sender.send(Command::Shutdown);

        if self.runs_tasks_in_current_sequence() {
            return;
        }
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                warn!("Service thread {} panicked during shutdown", self.name);
            }
        }
    }

    fn send(&self, command: Command) -> Result<()> {
        if self.shut_down.is_set() {
            return Err(ConcurrencyError::RunnerShutDown(self.name.clone()).into());
        }
        self.sender
            .send(command)
            .map_err(|_| ConcurrencyError::RunnerShutDown(self.name.clone()).into())
    }
}

impl TaskRunner for ServiceThread {
    fn post_task(&self, task: Closure) -> Result<()> {
        self.send(Command::Run(task))
    }
}

impl SequencedTaskRunner for ServiceThread {
    fn runs_tasks_in_current_sequence(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    fn post_cancelable_delayed_task_at(
        &self,
        task: Closure,
        run_time: TimeTicks,
        delay_policy: DelayPolicy,
    ) -> Result<DelayedTaskHandle> {
        let (handle, claim) = DelayedTaskHandle::new_pair();
        if delay_policy == DelayPolicy::Precise {
            self.counters.precise_delayed_tasks.increment();
        }
        self.send(Command::RunAt(TimerEntry {
            run_time,
            sequence: self.next_sequence.increment() as u64,
            task,
            claim,
        }))?;
        trace!(
            "Service thread {}: Delayed task armed for {} ({:?})",
            self.name,
            run_time,
            delay_policy
        );
        Ok(handle)
    }
}

impl Drop for ServiceThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}
