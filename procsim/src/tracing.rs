//! Support for structured logging.
//!
//! # Overview
//!
//! When the `tracing` feature is activated, the kernel emits
//! [`tracing`](https://docs.rs/tracing/latest/tracing/) events and spans:
//!
//! * each resumption of a process body runs within an `info`-level span named
//!   `process`, with the process name as a `name` field,
//! * process spawning and termination are reported at `debug` level,
//! * event processing is reported at `trace` level,
//! * failures of process bodies are reported at `warn` level and aborts of the
//!   simulation at `error` level.
//!
//! Events emitted from within process bodies naturally inherit the process
//! span.
//!
//! # Time-stamping
//!
//! Simulation time is not wall-clock time. The [`SimulationTime`] timer
//! replaces the default timestamp of
//! [`tracing_subscriber::fmt`](https://docs.rs/tracing-subscriber/latest/tracing_subscriber/fmt/index.html)
//! with the time of the event being processed by the environment running on
//! the current thread:
//!
//! ```
//! use procsim::tracing::SimulationTime;
//!
//! tracing_subscriber::fmt()
//!     .with_max_level(tracing::Level::DEBUG)
//!     .with_timer(SimulationTime::with_ticks())
//!     .init();
//! ```
//!
//! # Filtering
//!
//! Since process spans carry the process name, the `env-filter` feature of
//! `tracing-subscriber` can restrict the output to a single process, e.g. with
//! `RUST_LOG="[process{name=machine-1}]=info"`.
use std::cell::Cell;
use std::fmt;

use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;

use crate::time::Time;

thread_local! {
    static SIMULATION_TIME: Cell<Option<Time>> = const { Cell::new(None) };
}

/// Sets the simulation time reported by [`SimulationTime`] on this thread.
pub(crate) fn set_simulation_time(time: Option<Time>) {
    SIMULATION_TIME.with(|t| t.set(time));
}

/// A timer that reports the current simulation time.
///
/// Outside of a simulation run, a placeholder is printed.
#[derive(Copy, Clone, Debug, Default)]
pub struct SimulationTime {
    width: usize,
}

impl SimulationTime {
    /// Constructs a timer that pads the time to 10 digits.
    pub fn with_ticks() -> Self {
        Self { width: 10 }
    }

    /// Constructs a timer that pads the time to the specified width.
    pub fn with_width(width: usize) -> Self {
        Self { width }
    }
}

impl FormatTime for SimulationTime {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        match SIMULATION_TIME.with(Cell::get) {
            Some(time) => write!(w, "t={time:>width$}", width = self.width),
            None => write!(w, "t={:>width$}", "----", width = self.width),
        }
    }
}
