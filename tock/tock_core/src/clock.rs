//! Tick clocks.
//!
//! A `TickClock` is the time source handed to schedulers. Production code
//! uses `DefaultTickClock`, which reads the monotonic system clock relative
//! to a process-wide origin. Tests use `MockTickClock`, which only moves
//! when told to.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::fmt;
use std::time::{Duration, Instant};

use crate::time::TimeTicks;

/// Process-wide origin for `DefaultTickClock`, captured on first use.
static PROCESS_ORIGIN: Lazy<Instant> = Lazy::new(Instant::now);

/// A source of monotonic time.
pub trait TickClock: Send + Sync {
    /// Current time on this clock.
    fn now_ticks(&self) -> TimeTicks;
}

/// Clock backed by `std::time::Instant`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTickClock;

impl DefaultTickClock {
    /// Create a new default clock.
    pub fn new() -> Self {
        Self
    }
}

impl TickClock for DefaultTickClock {
    fn now_ticks(&self) -> TimeTicks {
        TimeTicks::from_offset(PROCESS_ORIGIN.elapsed())
    }
}

/// A manually driven clock.
pub struct MockTickClock {
    now: Mutex<TimeTicks>,
}

impl MockTickClock {
    /// Create a mock clock that starts at `start`.
    pub fn new(start: TimeTicks) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, delta: Duration) {
        let mut now = self.now.lock();
        *now += delta;
    }

    /// Jump to `ticks`. The clock never moves backwards.
    pub fn set_now(&self, ticks: TimeTicks) {
        let mut now = self.now.lock();
        assert!(
            ticks >= *now,
            "MockTickClock cannot move backwards ({} -> {})",
            *now,
            ticks
        );
        *now = ticks;
    }
}

impl Default for MockTickClock {
    fn default() -> Self {
        Self::new(TimeTicks::ZERO)
    }
}

impl TickClock for MockTickClock {
    fn now_ticks(&self) -> TimeTicks {
        *self.now.lock()
    }
}

impl fmt::Debug for MockTickClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTickClock")
            .field("now", &self.now_ticks())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_clock_is_monotonic() {
        let clock = DefaultTickClock::new();
        let first = clock.now_ticks();
        std::thread::sleep(Duration::from_millis(2));
        let second = clock.now_ticks();
        assert!(second > first);
    }

    #[test]
    fn test_mock_clock_advance() {
        let clock = MockTickClock::new(TimeTicks::from_millis(10));
        assert_eq!(clock.now_ticks(), TimeTicks::from_millis(10));

        clock.advance(Duration::from_millis(5));
        assert_eq!(clock.now_ticks(), TimeTicks::from_millis(15));

        clock.set_now(TimeTicks::from_millis(40));
        assert_eq!(clock.now_ticks(), TimeTicks::from_millis(40));
    }

    #[test]
    #[should_panic(expected = "cannot move backwards")]
    fn test_mock_clock_rejects_rewind() {
        let clock = MockTickClock::new(TimeTicks::from_millis(10));
        clock.set_now(TimeTicks::from_millis(5));
    }
}
