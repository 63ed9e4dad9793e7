use crossbeam_channel::{unbounded, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tock_concurrency::runner::{ServiceThread, TaskRunner};
use tock_concurrency::scheduler::DelayedTaskManager;
use tock_concurrency::task::{DelayPolicy, Task};
use tock_core::{DefaultTickClock, SchedulerFeatures, TickClock, TimeTicks};

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

struct Fixture {
    clock: Arc<dyn TickClock>,
    service: Arc<ServiceThread>,
    manager: DelayedTaskManager,
}

impl Fixture {
    fn start(name: &str) -> Self {
        let clock: Arc<dyn TickClock> = Arc::new(DefaultTickClock::new());
        let service = Arc::new(ServiceThread::start_with_clock(name, Arc::clone(&clock)).unwrap());
        let manager = DelayedTaskManager::new(Arc::clone(&clock));
        manager.start_with_features(
            service.clone(),
            SchedulerFeatures {
                align_wake_ups: false,
                task_leeway: Duration::from_millis(8),
            },
        );
        Self {
            clock,
            service,
            manager,
        }
    }

    /// Add a task that reports `(label, earliest, ran_at)` once it runs on
    /// the service thread.
    fn add(
        &self,
        label: usize,
        delay: Duration,
        policy: DelayPolicy,
        report: Sender<(usize, TimeTicks, TimeTicks)>,
    ) {
        let clock = Arc::clone(&self.clock);
        let earliest = self.clock.now_ticks() + delay;
        let task = Task::builder(move || {
            let _ = report.send((label, earliest, clock.now_ticks()));
        })
        .delayed_run_time(earliest)
        .leeway(Duration::from_millis(2))
        .delay_policy(policy)
        .build();

        let destination = Arc::clone(&self.service);
        self.manager.add_delayed_task(
            task,
            Box::new(move |task: Task| {
                destination
                    .post_task(Box::new(move || {
                        task.run();
                    }))
                    .unwrap();
            }),
            self.service.clone(),
        );
    }
}

#[test]
fn test_tasks_run_in_time_order_on_service_thread() {
    let fixture = Fixture::start("tock-order");
    let (tx, rx) = unbounded();

    fixture.add(3, Duration::from_millis(60), DelayPolicy::Precise, tx.clone());
    fixture.add(1, Duration::from_millis(20), DelayPolicy::Precise, tx.clone());
    fixture.add(2, Duration::from_millis(40), DelayPolicy::FlexibleNoSooner, tx);

    let mut order = Vec::new();
    for _ in 0..3 {
        let (label, earliest, ran_at) = rx.recv_timeout(DELIVERY_TIMEOUT).unwrap();
        assert!(ran_at >= earliest, "task {} ran at {} before {}", label, ran_at, earliest);
        order.push(label);
    }

    assert_eq!(order, vec![1, 2, 3]);
    assert_eq!(fixture.manager.pending_task_count(), 0);
    assert!(!fixture.manager.has_pending_high_resolution_tasks());
    assert_eq!(fixture.service.stats().tasks_panicked, 0);
}

#[test]
fn test_concurrent_producers() {
    const PRODUCERS: usize = 4;
    const TASKS_PER_PRODUCER: usize = 25;

    let fixture = Arc::new(Fixture::start("tock-producers"));
    let (tx, rx) = unbounded();

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let fixture = Arc::clone(&fixture);
            let tx = tx.clone();
            thread::spawn(move || {
                for i in 0..TASKS_PER_PRODUCER {
                    let label = producer * TASKS_PER_PRODUCER + i;
                    let delay = Duration::from_millis((label % 7) as u64 * 5);
                    let policy = if label % 3 == 0 {
                        DelayPolicy::Precise
                    } else {
                        DelayPolicy::FlexibleNoSooner
                    };
                    fixture.add(label, delay, policy, tx.clone());
                }
            })
        })
        .collect();
    drop(tx);

    for producer in producers {
        producer.join().unwrap();
    }

    let mut seen = vec![false; PRODUCERS * TASKS_PER_PRODUCER];
    for _ in 0..seen.len() {
        let (label, earliest, ran_at) = rx.recv_timeout(DELIVERY_TIMEOUT).unwrap();
        assert!(ran_at >= earliest);
        assert!(!seen[label], "task {} delivered twice", label);
        seen[label] = true;
    }

    assert!(seen.iter().all(|delivered| *delivered));
    assert_eq!(fixture.manager.pending_task_count(), 0);
    assert!(fixture.manager.queue_lock_stats().acquisition_count >= seen.len() as u64);
}

#[test]
fn test_dropped_manager_delivers_nothing() {
    let fixture = Fixture::start("tock-dropped");
    let (tx, rx) = unbounded();
    fixture.add(1, Duration::from_millis(30), DelayPolicy::Precise, tx);

    let Fixture { service, manager, .. } = fixture;
    drop(manager);

    assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());
    service.shutdown();
    assert!(service.is_shut_down());
}

#[test]
fn test_earlier_task_preempts_armed_wake_up() {
    let fixture = Fixture::start("tock-preempt");
    let (tx, rx) = unbounded();

    fixture.add(2, Duration::from_secs(2), DelayPolicy::FlexibleNoSooner, tx.clone());
    thread::sleep(Duration::from_millis(10));
    fixture.add(1, Duration::from_millis(10), DelayPolicy::Precise, tx);

    let (label, _, _) = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(label, 1);
    assert_eq!(fixture.manager.pending_task_count(), 1);
    assert_eq!(
        fixture.manager.next_scheduled_run_time().map(|t| t > fixture.clock.now_ticks()),
        Some(true)
    );
}
