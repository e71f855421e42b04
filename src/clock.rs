//! Virtualizable time source
//!
//! The engine never reads the wall clock directly. Access durations, usage of
//! auto-detect bottlenecks and time-window boundaries are all measured in
//! ticks of a [`Clock`], so tests can pause time and skip it forward.
//!
//! # Example
//!
//! ```
//! use bottleneck_survey::clock::{Clock, ManualClock};
//! use std::time::Duration;
//!
//! let clock = ManualClock::new();
//! let before = clock.ticks();
//! clock.advance(Duration::from_millis(100));
//! assert_eq!(clock.ticks() - before, clock.duration_to_ticks(Duration::from_millis(100)));
//! ```

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

/// Ticks per second used by both built-in clocks
pub const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// A monotonic tick counter with a fixed frequency plus a UTC reading
pub trait Clock: Send + Sync + Debug {
    /// Current value of the monotonic tick counter
    fn ticks(&self) -> u64;

    /// Ticks per second
    fn frequency(&self) -> u64;

    /// Current UTC time
    fn utc_now(&self) -> SystemTime;

    /// Convert a duration into ticks of this clock
    fn duration_to_ticks(&self, duration: Duration) -> u64 {
        duration_to_ticks(duration, self.frequency())
    }

    /// Convert ticks of this clock into a duration
    fn ticks_to_duration(&self, ticks: u64) -> Duration {
        ticks_to_duration(ticks, self.frequency())
    }
}

/// Convert a duration into ticks at `frequency` ticks per second
pub fn duration_to_ticks(duration: Duration, frequency: u64) -> u64 {
    let ticks = duration.as_nanos() * u128::from(frequency) / u128::from(NANOS_PER_SECOND);
    u64::try_from(ticks).unwrap_or(u64::MAX)
}

/// Convert ticks at `frequency` ticks per second into a duration
pub fn ticks_to_duration(ticks: u64, frequency: u64) -> Duration {
    if frequency == 0 {
        return Duration::ZERO;
    }
    let nanos = u128::from(ticks) * u128::from(NANOS_PER_SECOND) / u128::from(frequency);
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

/// Real time, backed by [`Instant`] for ticks and [`SystemTime`] for UTC
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn ticks(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    fn frequency(&self) -> u64 {
        NANOS_PER_SECOND
    }

    fn utc_now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// A paused clock that only moves when told to
///
/// Ticks are nanoseconds. The UTC reading is the construction-time UTC plus
/// however far the clock has been advanced.
///
/// # Thread Safety
///
/// Reads and skips are single atomic operations, so a `ManualClock` can be
/// shared through an `Arc` between the test body and instrumented threads.
#[derive(Debug)]
pub struct ManualClock {
    ticks: AtomicU64,
    utc_origin: SystemTime,
}

impl ManualClock {
    /// Create a paused clock at tick 0
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Create a paused clock at a specific tick
    pub fn starting_at(ticks: u64) -> Self {
        Self {
            ticks: AtomicU64::new(ticks),
            utc_origin: SystemTime::now(),
        }
    }

    /// Skip forward by `duration`, returning the new tick value
    pub fn advance(&self, duration: Duration) -> u64 {
        let delta = duration_to_ticks(duration, NANOS_PER_SECOND);
        self.ticks.fetch_add(delta, Ordering::SeqCst) + delta
    }

    /// Jump to an absolute tick value, which may be in the past
    pub fn set_ticks(&self, ticks: u64) {
        self.ticks.store(ticks, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    fn frequency(&self) -> u64 {
        NANOS_PER_SECOND
    }

    fn utc_now(&self) -> SystemTime {
        self.utc_origin + ticks_to_duration(self.ticks(), NANOS_PER_SECOND)
    }
}
