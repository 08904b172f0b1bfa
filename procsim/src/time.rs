//! Simulation time and clocks.
//!
//! Simulation time is an integral number of abstract ticks, see [`Time`]. By
//! default an [`Env`](crate::simulation::Env) advances simulation time as fast
//! as possible. A [`Clock`] can be set to pace the simulation against
//! wall-clock time instead, in which case the environment waits before
//! processing each event until the clock reaches its scheduled time.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use procsim::simulation::Env;
//! use procsim::time::SystemClock;
//!
//! let mut env = Env::new();
//!
//! // One simulation tick lasts 100µs of wall-clock time.
//! env.set_clock(SystemClock::new(Duration::from_micros(100)));
//! env.set_clock_tolerance(Duration::from_millis(50));
//!
//! env.timeout(10).unwrap();
//! assert_eq!(env.run().unwrap(), 10);
//! ```
use std::time::{Duration, Instant};

/// Simulation time, in ticks.
pub type Time = u64;

/// A type that can be used to synchronize a simulation.
pub trait Clock {
    /// Blocks until the deadline, expressed in simulation time, is reached.
    fn synchronize(&mut self, deadline: Time) -> SyncStatus;
}

/// The current synchronization status of a clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SyncStatus {
    /// The clock is synchronized.
    Synchronized,
    /// The deadline had already elapsed by the specified duration.
    OutOfSync(Duration),
}

/// A dummy [`Clock`] that ignores synchronization.
///
/// Choosing this clock effectively makes the simulation run as fast as
/// possible.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoClock {}

impl NoClock {
    /// Constructs a new `NoClock` object.
    pub fn new() -> Self {
        Self {}
    }
}

impl Clock for NoClock {
    fn synchronize(&mut self, _: Time) -> SyncStatus {
        SyncStatus::Synchronized
    }
}

/// A real-time [`Clock`] based on the system's monotonic clock.
///
/// The clock is anchored lazily: the first synchronized simulation time is
/// mapped to the wall-clock instant of the first call to `synchronize`.
#[derive(Copy, Clone, Debug)]
pub struct SystemClock {
    tick: Duration,
    anchor: Option<(Instant, Time)>,
}

impl SystemClock {
    /// Constructs a clock for which one simulation tick lasts `tick` of
    /// wall-clock time.
    pub fn new(tick: Duration) -> Self {
        Self { tick, anchor: None }
    }

    /// Returns the wall-clock duration of a simulation tick.
    pub fn tick(&self) -> Duration {
        self.tick
    }

    fn ticks(&self, count: u64) -> Duration {
        let nanos = self.tick.as_nanos().saturating_mul(count.into());

        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

impl Clock for SystemClock {
    fn synchronize(&mut self, deadline: Time) -> SyncStatus {
        let now = Instant::now();
        let (origin, origin_time) = *self.anchor.get_or_insert((now, deadline));

        let target = origin + self.ticks(deadline.saturating_sub(origin_time));
        if target > now {
            spin_sleep::sleep(target - now);

            SyncStatus::Synchronized
        } else {
            SyncStatus::OutOfSync(now.saturating_duration_since(target))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_clock_is_always_synchronized() {
        let mut clock = NoClock::new();

        assert_eq!(clock.synchronize(0), SyncStatus::Synchronized);
        assert_eq!(clock.synchronize(u64::MAX), SyncStatus::Synchronized);
    }

    #[test]
    fn system_clock_paces_ticks() {
        let mut clock = SystemClock::new(Duration::from_millis(2));
        let start = Instant::now();

        clock.synchronize(10);
        clock.synchronize(15);

        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn system_clock_reports_lag() {
        let mut clock = SystemClock::new(Duration::from_micros(1));

        clock.synchronize(0);
        std::thread::sleep(Duration::from_millis(5));

        assert!(matches!(clock.synchronize(1), SyncStatus::OutOfSync(_)));
    }
}
