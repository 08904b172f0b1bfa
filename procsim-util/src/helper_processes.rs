//! Helper processes.
//!
//! This module contains helper processes useful for simulation bench assembly.

use procsim::coroutine::BoxError;
use procsim::process::Process;
use procsim::simulation::{Scheduler, SchedulingError};
use procsim::time::Time;

/// A ticker process.
///
/// This process wakes up at the specified period, which can be used to keep
/// the simulation alive, e.g. when it is paced by a real-time clock.
#[derive(Clone, Copy, Debug)]
pub struct Ticker {
    /// Tick period.
    period: Time,
}

impl Ticker {
    /// Creates a new `Ticker` with the specified period.
    ///
    /// # Panics
    ///
    /// Panics if the period is zero.
    pub fn new(period: Time) -> Self {
        assert!(period > 0, "the tick period must be non-zero");

        Self { period }
    }

    /// Spawns the ticker process.
    ///
    /// The process runs until interrupted and returns the number of ticks.
    pub fn spawn(self, scheduler: &Scheduler) -> Result<Process, SchedulingError> {
        scheduler.process("ticker", move |cx| async move {
            let mut ticks = 0u64;
            while cx.wait(cx.timeout(self.period)?).await.is_ok() {
                ticks += 1;
            }

            Ok::<_, BoxError>(ticks)
        })
    }
}

#[cfg(test)]
mod tests {
    use procsim::simulation::Env;

    use super::*;

    #[test]
    fn ticker_keeps_simulation_alive() {
        let mut env = Env::new();
        let ticker = Ticker::new(3).spawn(&env.scheduler()).unwrap();

        assert_eq!(env.run_until(10).unwrap(), 10);
        assert!(ticker.is_alive());
        assert_eq!(env.peek(), Some(12));

        ticker.interrupt(()).unwrap();
        env.run().unwrap();
        assert_eq!(ticker.event().value_as::<u64>(), Some(3));
    }
}
