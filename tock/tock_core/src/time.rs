//! Monotonic time.
//!
//! `TimeTicks` is an instant on a monotonic timeline, expressed as the
//! elapsed time since the origin of the clock that produced it. It is never
//! affected by wall-clock adjustments. `TimeTicks::MAX` stands for "never"
//! and absorbs arithmetic: adding or subtracting a duration from it yields
//! `MAX` again.

use std::fmt;
use std::ops::{Add, AddAssign, Sub};
use std::time::Duration;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// An instant on a monotonic timeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeTicks(Duration);

impl TimeTicks {
    /// The clock origin.
    pub const ZERO: Self = Self(Duration::ZERO);

    /// The infinite future.
    pub const MAX: Self = Self(Duration::MAX);

    /// Create an instant `offset` after the clock origin.
    pub const fn from_offset(offset: Duration) -> Self {
        Self(offset)
    }

    /// Create an instant `millis` milliseconds after the clock origin.
    pub const fn from_millis(millis: u64) -> Self {
        Self(Duration::from_millis(millis))
    }

    /// Elapsed time between the clock origin and this instant.
    pub const fn offset(&self) -> Duration {
        self.0
    }

    /// Whether this is the infinite future.
    pub fn is_max(&self) -> bool {
        *self == Self::MAX
    }

    /// Whether this is the clock origin.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Round this instant up to the next tick of a grid.
    ///
    /// The grid consists of every `tick_phase + k * tick_interval`. Returns
    /// the smallest grid point that is not earlier than `self`; an instant
    /// already on the grid is returned unchanged. `MAX` and a zero interval
    /// leave the instant untouched.
    pub fn snapped_to_next_tick(self, tick_phase: TimeTicks, tick_interval: Duration) -> TimeTicks {
        if self.is_max() || tick_interval.is_zero() {
            return self;
        }

        let interval = tick_interval.as_nanos();
        let forward = if self >= tick_phase {
            let past_tick = (self.0 - tick_phase.0).as_nanos() % interval;
            if past_tick == 0 {
                0
            } else {
                interval - past_tick
            }
        } else {
            (tick_phase.0 - self.0).as_nanos() % interval
        };

        self + duration_from_nanos(forward)
    }

    /// Add a duration, returning `None` on overflow.
    pub fn checked_add(self, delta: Duration) -> Option<TimeTicks> {
        if self.is_max() {
            return Some(self);
        }
        self.0.checked_add(delta).map(Self)
    }
}

fn duration_from_nanos(nanos: u128) -> Duration {
    let secs = nanos / NANOS_PER_SEC;
    let subsec = (nanos % NANOS_PER_SEC) as u32;
    match u64::try_from(secs) {
        Ok(secs) => Duration::new(secs, subsec),
        Err(_) => Duration::MAX,
    }
}

impl Add<Duration> for TimeTicks {
    type Output = TimeTicks;

    /// Saturates at `MAX`.
    fn add(self, delta: Duration) -> TimeTicks {
        self.checked_add(delta).unwrap_or(Self::MAX)
    }
}

impl AddAssign<Duration> for TimeTicks {
    fn add_assign(&mut self, delta: Duration) {
        *self = *self + delta;
    }
}

impl Sub<Duration> for TimeTicks {
    type Output = TimeTicks;

    /// Saturates at the origin. `MAX` stays `MAX`.
    fn sub(self, delta: Duration) -> TimeTicks {
        if self.is_max() {
            return self;
        }
        Self(self.0.saturating_sub(delta))
    }
}

impl Sub<TimeTicks> for TimeTicks {
    type Output = Duration;

    /// Time from `earlier` to `self`, zero if `earlier` is later.
    fn sub(self, earlier: TimeTicks) -> Duration {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for TimeTicks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_max() {
            write!(f, "TimeTicks(inf)")
        } else {
            write!(f, "TimeTicks({:?})", self.0)
        }
    }
}
