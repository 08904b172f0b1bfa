//! A process-oriented discrete-event simulation kernel.
//!
//! `procsim` models a system as a set of *processes*: sequential routines that
//! advance through simulated time by waiting on *events*. A process reads like
//! straight-line code, with each suspension point spelled out as an awaited
//! wait, while the simulation environment takes care of ordering all pending
//! events in time and resuming the processes at the right moment.
//!
//! Process bodies are ordinary Rust `async` blocks. They are not run by an
//! async runtime, however: the environment drives them directly, one at a
//! time, on the thread that runs the simulation, so that simulations are fully
//! deterministic and require no synchronization.
//!
//! # A practical overview
//!
//! ## The environment
//!
//! An [`Env`](simulation::Env) owns the simulation clock and a queue of
//! triggered events ordered by time, then by
//! [`Priority`](simulation::Priority), then by insertion order. Running the
//! environment repeatedly pops the next event, advances the clock to its time
//! and invokes the callbacks registered on that event.
//!
//! A clonable, non-owning [`Scheduler`](simulation::Scheduler) handle can be
//! obtained from the environment to create events and processes from
//! anywhere, including from within process bodies.
//!
//! ## Events
//!
//! An [`Event`](event::Event) is a one-shot occurrence. It is *triggered* when
//! it is given an outcome, success with an optional value or failure with a
//! cause, and *processed* when the environment pops it from its queue. The
//! most common events are timeouts, which succeed after a delay, and
//! processes themselves, which succeed when their body returns.
//!
//! ## Processes
//!
//! A process is spawned from a closure that receives a
//! [`ProcessContext`](process::ProcessContext) and returns the body future:
//!
//! ```
//! use procsim::coroutine::BoxError;
//! use procsim::simulation::Env;
//!
//! let mut env = Env::new();
//!
//! let clock = env
//!     .process("clock", |cx| async move {
//!         let mut ticks = Vec::new();
//!         while cx.now() < 6 {
//!             ticks.push(cx.now());
//!             cx.wait(cx.timeout(2)?).await?;
//!         }
//!         Ok::<_, BoxError>(ticks)
//!     })
//!     .unwrap();
//!
//! env.run().unwrap();
//! assert_eq!(clock.event().value_as::<Vec<u64>>(), Some(vec![0, 2, 4]));
//! ```
//!
//! A process can be [interrupted](process::Process::interrupt) by another
//! process. The interruption is observed by the victim as an
//! [`Interrupt`](coroutine::Interrupt) error returned by the wait it is
//! suspended on, from which it may recover.
//!
//! ## Conditions
//!
//! Several events can be awaited at once by combining them into a condition
//! with [`Scheduler::all_of`](simulation::Scheduler::all_of),
//! [`Scheduler::any_of`](simulation::Scheduler::any_of), or the
//! [`Event::and`](event::Event::and) and [`Event::or`](event::Event::or)
//! combinators. See the [`condition`] module.
//!
//! ## Resources
//!
//! The [`resource`] module provides shared resources with FIFO request
//! queues: slot-based [`Resource`](resource::Resource)s and amount-based
//! [`Container`](resource::Container)s, both built on the generic
//! [`BaseResource`](resource::BaseResource).
//!
//! ## Failures
//!
//! A failed event aborts the simulation when it is processed, unless it was
//! defused. A process whose body returns an error fails its own event, so an
//! unhandled process error aborts the simulation as well. An aborted
//! environment is shut down: pending events are discarded and all live
//! processes are closed, which drops their bodies and releases whatever they
//! held.
//!
//! # Cargo feature flags
//!
//! ## Tracing
//!
//! The `tracing` feature flag provides support for the
//! [`tracing`](https://docs.rs/tracing/latest/tracing/) crate and can be
//! activated in `Cargo.toml` with:
//!
//! ```toml
//! [dependencies]
//! procsim = { version = "0.1.0", features = ["tracing"] }
//! ```
//!
//! See the `tracing` module for more information.
//!
//! # Other resources
//!
//! The crate examples contain more fleshed out simulations, and the
//! `procsim-util` crate provides higher-level building blocks such as
//! broadcast notifiers and observable values.
#![warn(missing_docs, missing_debug_implementations, unreachable_pub)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod condition;
pub mod coroutine;
pub mod event;
pub mod process;
pub mod resource;
pub mod simulation;
pub mod time;
pub(crate) mod util;

#[cfg(feature = "tracing")]
pub mod tracing;
