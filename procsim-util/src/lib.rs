//! Building blocks for `procsim` simulations.
//!
//! * [`notifier`]: broadcast signals that wake all or one of the processes
//!   waiting on them,
//! * [`observables`]: values whose changes can be awaited,
//! * [`helper_processes`]: ready-made processes useful for bench assembly.
#![warn(missing_docs, missing_debug_implementations, unreachable_pub)]

pub mod helper_processes;
pub mod notifier;
pub mod observables;
