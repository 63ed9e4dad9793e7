//! Mutex with usage statistics.
//!
//! The delayed task manager guards its queue with a `TrackedMutex` so that
//! contention between producers and the service thread can be inspected
//! at runtime.

use log::trace;
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Snapshot of lock usage.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LockStats {
    /// Number of successful lock acquisitions
    pub acquisition_count: u64,

    /// Total time spent waiting for the lock (microseconds)
    pub total_wait_time_us: u64,

    /// Total time the lock was held (microseconds)
    pub total_hold_time_us: u64,

    /// Longest single wait (microseconds)
    pub max_wait_time_us: u64,

    /// Longest single hold (microseconds)
    pub max_hold_time_us: u64,
}

#[derive(Debug, Default)]
struct Counters {
    acquisition_count: AtomicU64,
    total_wait_time_us: AtomicU64,
    total_hold_time_us: AtomicU64,
    max_wait_time_us: AtomicU64,
    max_hold_time_us: AtomicU64,
}

impl Counters {
    fn record_acquired(&self, waited: Duration) {
        let waited_us = waited.as_micros() as u64;
        self.acquisition_count.fetch_add(1, Ordering::Relaxed);
        self.total_wait_time_us.fetch_add(waited_us, Ordering::Relaxed);
        self.max_wait_time_us.fetch_max(waited_us, Ordering::Relaxed);
    }

    fn record_released(&self, held: Duration) {
        let held_us = held.as_micros() as u64;
        self.total_hold_time_us.fetch_add(held_us, Ordering::Relaxed);
        self.max_hold_time_us.fetch_max(held_us, Ordering::Relaxed);
    }
}

/// A named mutex that records wait and hold times.
pub struct TrackedMutex<T> {
    mutex: Mutex<T>,
    counters: Arc<Counters>,
    name: &'static str,
}

/// A guard for a `TrackedMutex`. Hold time is recorded on drop.
pub struct TrackedMutexGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    acquired_at: Instant,
    counters: &'a Counters,
    name: &'static str,
}

impl<T> TrackedMutex<T> {
    /// Create a new tracked mutex with a name for diagnostics.
    pub fn new(value: T, name: &'static str) -> Self {
        Self {
            mutex: Mutex::new(value),
            counters: Arc::new(Counters::default()),
            name,
        }
    }

    /// Lock the mutex, blocking until it is available.
    pub fn lock(&self) -> TrackedMutexGuard<'_, T> {
        let start = Instant::now();
        let guard = self.mutex.lock();
        self.acquired(guard, start.elapsed())
    }

    fn acquired<'a>(&'a self, guard: MutexGuard<'a, T>, waited: Duration) -> TrackedMutexGuard<'a, T> {
        self.counters.record_acquired(waited);
        trace!(
            "Lock acquired: {} (wait time: {:.3}ms)",
            self.name,
            waited.as_secs_f64() * 1000.0
        );
        TrackedMutexGuard {
            guard,
            acquired_at: Instant::now(),
            counters: &self.counters,
            name: self.name,
        }
    }

    /// Usage statistics accumulated so far.
    pub fn stats(&self) -> LockStats {
        let c = &self.counters;
        LockStats {
            acquisition_count: c.acquisition_count.load(Ordering::Relaxed),
            total_wait_time_us: c.total_wait_time_us.load(Ordering::Relaxed),
            total_hold_time_us: c.total_hold_time_us.load(Ordering::Relaxed),
            max_wait_time_us: c.max_wait_time_us.load(Ordering::Relaxed),
            max_hold_time_us: c.max_hold_time_us.load(Ordering::Relaxed),
        }
    }

    /// Name of this mutex.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Drop for TrackedMutexGuard<'_, T> {
    fn drop(&mut self) {
        let held = self.acquired_at.elapsed();
        self.counters.record_released(held);
        trace!(
            "Lock released: {} (held for: {:.3}ms)",
            self.name,
            held.as_secs_f64() * 1000.0
        );
    }
}

impl<T> std::ops::Deref for TrackedMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<T> std::ops::DerefMut for TrackedMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_tracked_mutex_basic() {
        let mutex = TrackedMutex::new(0, "counter");

        {
            let mut guard = mutex.lock();
            *guard += 1;
        }

        assert_eq!(*mutex.lock(), 1);
        let stats = mutex.stats();
        assert_eq!(stats.acquisition_count, 2);
        assert_eq!(mutex.name(), "counter");
    }

    #[test]
    fn test_tracked_mutex_hold_time() {
        let mutex = TrackedMutex::new(Vec::<u32>::new(), "queue");

        {
            let mut guard = mutex.lock();
            guard.push(1);
            thread::sleep(Duration::from_millis(5));
        }

        let stats = mutex.stats();
        assert!(stats.max_hold_time_us >= 5_000);
        assert!(stats.total_hold_time_us >= stats.max_hold_time_us);
    }
}
