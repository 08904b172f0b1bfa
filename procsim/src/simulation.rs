//! Simulation environment and scheduling.
//!
//! The [`Env`] owns the simulation clock, the time-ordered queue of triggered
//! events and the registry of live processes. It advances simulation time by
//! popping events from the queue in `(time, priority, insertion order)` order
//! and invoking their callbacks, which in turn resume the processes waiting on
//! them.
//!
//! A [`Scheduler`] is a lightweight, clonable handle to the environment that
//! can create events, timeouts, processes and conditions from anywhere,
//! including from within process bodies. It does not keep the environment
//! alive: once the [`Env`] is dropped, all scheduling requests fail with
//! [`SchedulingError::EnvDropped`].
//!
//! # Simulation termination
//!
//! A run ends when the queue is exhausted ([`Env::run`]), when a time bound
//! is reached ([`Env::run_until`]), or when the simulation is aborted. An
//! abort happens when a failed event that was not [defused] is processed,
//! when a shared resource detects a corrupted queue, when the wall clock falls
//! too far behind or when the run is halted through a [`Halter`].
//!
//! Except for a halt, which can be resumed, an abort shuts the environment
//! down: all pending events are discarded and all live processes are closed so
//! that their bodies release whatever they hold. Dropping an [`Env`] shuts it
//! down as well.
//!
//! [defused]: crate::event::Event::defuse
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use slab::Slab;

use crate::condition::{self, Quantifier};
use crate::coroutine::BoxError;
use crate::event::{Event, EventKind, Outcome, Value};
use crate::process::Process;
use crate::resource::ResourceError;
use crate::time::{Clock, NoClock, SyncStatus, Time};
use crate::util::priority_queue::PriorityQueue;

/// Priority of an event scheduled at a given time.
///
/// Among events scheduled for the same time, urgent events are processed
/// first and low-priority events last. Events of equal time and priority are
/// processed in the order they were scheduled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Kernel-level events such as process initialization and interruptions.
    Urgent,
    /// Regular events.
    #[default]
    Normal,
    /// Events that should observe the outcome of all other events scheduled
    /// at the same time.
    Low,
}

/// State shared by the environment and its scheduler handles.
pub(crate) struct EnvCore {
    time: Rc<Cell<Time>>,
    queue: RefCell<PriorityQueue<(Time, Priority), Event>>,
    processes: RefCell<Slab<Process>>,
    active: RefCell<Option<Process>>,
    fatal: RefCell<Option<ExecutionError>>,
    is_shut_down: Cell<bool>,
}

impl EnvCore {
    pub(crate) fn now(&self) -> Time {
        self.time.get()
    }

    pub(crate) fn enqueue(&self, deadline: Time, priority: Priority, event: Event) {
        self.queue.borrow_mut().insert((deadline, priority), event);
    }

    pub(crate) fn register(&self, process: Process) -> usize {
        self.processes.borrow_mut().insert(process)
    }

    pub(crate) fn unregister(&self, key: usize) {
        let mut processes = self.processes.borrow_mut();
        if processes.contains(key) {
            processes.remove(key);
        }
    }

    /// Sets the active process and returns the previous one.
    pub(crate) fn set_active(&self, process: Option<Process>) -> Option<Process> {
        self.active.replace(process)
    }

    pub(crate) fn is_active(&self, process: &Process) -> bool {
        self.active
            .borrow()
            .as_ref()
            .is_some_and(|p| p.ptr_eq(process))
    }

    /// Records an error that must abort the current run.
    ///
    /// Only the first error is kept.
    pub(crate) fn record_fatal(&self, error: ExecutionError) {
        if self.is_shut_down.get() {
            return;
        }
        let mut fatal = self.fatal.borrow_mut();
        if fatal.is_none() {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %error, "simulation aborted from a callback");

            *fatal = Some(error);
        }
    }

    /// Discards all pending events and closes all live processes.
    fn shutdown(&self) {
        if self.is_shut_down.replace(true) {
            return;
        }

        let jobs: Vec<Event> = self.queue.borrow_mut().drain().map(|(_, ev)| ev).collect();
        for job in &jobs {
            job.clear_callbacks();
        }
        drop(jobs);

        self.active.borrow_mut().take();
        let processes: Vec<Process> = self.processes.borrow_mut().drain().collect();

        #[cfg(feature = "tracing")]
        tracing::info!(processes = processes.len(), "shutting down environment");

        for process in processes {
            process.abort();
        }
    }
}

/// A clonable, non-owning handle to a simulation environment.
#[derive(Clone)]
pub struct Scheduler {
    core: Weak<EnvCore>,
    time: Rc<Cell<Time>>,
}

impl Scheduler {
    /// Returns the current simulation time.
    ///
    /// The last simulation time remains readable after the environment was
    /// dropped.
    pub fn now(&self) -> Time {
        self.time.get()
    }

    /// Creates a pending event.
    pub fn event(&self, id: impl Into<String>) -> Event {
        Event::new(id, self.clone(), EventKind::Plain)
    }

    /// Creates an event that succeeds without a value after the specified
    /// delay.
    pub fn timeout(&self, delay: Time) -> Result<Event, SchedulingError> {
        let event = self.event("timeout");
        event.resolve(Outcome::Ok(None), Priority::Normal, delay)?;

        Ok(event)
    }

    /// Creates an event that succeeds with a value after the specified delay.
    pub fn timeout_with<T: Any>(&self, delay: Time, value: T) -> Result<Event, SchedulingError> {
        let event = self.event("timeout");
        event.resolve(Outcome::Ok(Some(Value::new(value))), Priority::Normal, delay)?;

        Ok(event)
    }

    /// Triggers a pending event successfully, without a value, for
    /// processing after the specified delay.
    pub fn schedule(
        &self,
        event: &Event,
        priority: Priority,
        delay: Time,
    ) -> Result<(), SchedulingError> {
        event.resolve(Outcome::Ok(None), priority, delay)
    }

    /// Spawns a new process.
    ///
    /// The process body starts running at the current simulation time,
    /// before any regular event scheduled for the same time. The value
    /// returned by the body becomes the value of the process event; an error
    /// other than an unhandled [`Interrupt`](crate::coroutine::Interrupt)
    /// fails the process event.
    pub fn process<F, Fut, T, E>(
        &self,
        name: impl Into<String>,
        body: F,
    ) -> Result<Process, SchedulingError>
    where
        F: FnOnce(crate::process::ProcessContext) -> Fut + 'static,
        Fut: Future<Output = Result<T, E>> + 'static,
        T: Any,
        E: Into<BoxError> + 'static,
    {
        let core = self.core()?;

        Process::spawn(&core, self.clone(), name.into(), body)
    }

    /// Creates a condition that succeeds once all of the events succeed.
    pub fn all_of(
        &self,
        id: impl Into<String>,
        events: impl IntoIterator<Item = Event>,
    ) -> Result<Event, SchedulingError> {
        condition::build(self, id.into(), Quantifier::AllOf, events.into_iter().collect())
    }

    /// Creates a condition that succeeds as soon as any of the events
    /// succeeds.
    pub fn any_of(
        &self,
        id: impl Into<String>,
        events: impl IntoIterator<Item = Event>,
    ) -> Result<Event, SchedulingError> {
        condition::build(self, id.into(), Quantifier::AnyOf, events.into_iter().collect())
    }

    /// Returns the process whose body is currently running, if any.
    pub fn active_process(&self) -> Option<Process> {
        self.core
            .upgrade()
            .and_then(|core| core.active.borrow().clone())
    }

    /// Aborts the current run with the specified error.
    pub(crate) fn abort(&self, error: ExecutionError) {
        if let Some(core) = self.core.upgrade() {
            core.record_fatal(error);
        }
    }

    /// Returns the environment core if it is alive and accepts new events.
    pub(crate) fn core(&self) -> Result<Rc<EnvCore>, SchedulingError> {
        let core = self.core.upgrade().ok_or(SchedulingError::EnvDropped)?;
        if core.is_shut_down.get() {
            return Err(SchedulingError::ShutDown);
        }

        Ok(core)
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("time", &self.time.get())
            .finish_non_exhaustive()
    }
}

/// A handle that can halt a running simulation from another thread.
///
/// The halt takes effect before the next event is processed and makes the
/// running method return [`ExecutionError::Halted`]. The simulation can then
/// be resumed.
#[derive(Clone, Debug)]
pub struct Halter(Arc<AtomicBool>);

impl Halter {
    /// Requests the simulation to halt.
    pub fn halt(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// A discrete-event simulation environment.
pub struct Env {
    core: Rc<EnvCore>,
    scheduler: Scheduler,
    clock: Box<dyn Clock>,
    clock_tolerance: Option<Duration>,
    is_clock_started: bool,
    is_halted: Arc<AtomicBool>,
}

impl Env {
    /// Creates an environment at simulation time zero.
    pub fn new() -> Self {
        Self::with_initial_time(0)
    }

    /// Creates an environment starting at the specified simulation time.
    pub fn with_initial_time(time: Time) -> Self {
        let time = Rc::new(Cell::new(time));
        let core = Rc::new(EnvCore {
            time: time.clone(),
            queue: RefCell::new(PriorityQueue::new()),
            processes: RefCell::new(Slab::new()),
            active: RefCell::new(None),
            fatal: RefCell::new(None),
            is_shut_down: Cell::new(false),
        });
        let scheduler = Scheduler {
            core: Rc::downgrade(&core),
            time,
        };

        Self {
            core,
            scheduler,
            clock: Box::new(NoClock::new()),
            clock_tolerance: None,
            is_clock_started: false,
            is_halted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Creates an environment at simulation time zero, paced by the
    /// specified clock.
    pub fn with_clock(clock: impl Clock + 'static) -> Self {
        let mut env = Self::new();
        env.set_clock(clock);

        env
    }

    /// Sets the clock used to pace the simulation against wall-clock time.
    ///
    /// By default the simulation runs as fast as possible.
    pub fn set_clock(&mut self, clock: impl Clock + 'static) {
        self.clock = Box::new(clock);
        self.is_clock_started = false;
    }

    /// Sets the maximum lag behind the clock tolerated before the simulation
    /// is aborted with [`ExecutionError::OutOfSync`].
    ///
    /// By default, lagging behind the clock is never an error.
    pub fn set_clock_tolerance(&mut self, tolerance: Duration) {
        self.clock_tolerance = Some(tolerance);
    }

    /// Returns the current simulation time.
    pub fn now(&self) -> Time {
        self.core.now()
    }

    /// Returns a scheduler handle to this environment.
    pub fn scheduler(&self) -> Scheduler {
        self.scheduler.clone()
    }

    /// Returns a handle that can halt the simulation from another thread.
    pub fn halter(&self) -> Halter {
        Halter(self.is_halted.clone())
    }

    /// Creates a pending event.
    pub fn event(&self, id: impl Into<String>) -> Event {
        self.scheduler.event(id)
    }

    /// Creates an event that succeeds without a value after the specified
    /// delay.
    pub fn timeout(&self, delay: Time) -> Result<Event, SchedulingError> {
        self.scheduler.timeout(delay)
    }

    /// Creates an event that succeeds with a value after the specified delay.
    pub fn timeout_with<T: Any>(&self, delay: Time, value: T) -> Result<Event, SchedulingError> {
        self.scheduler.timeout_with(delay, value)
    }

    /// Triggers a pending event successfully, without a value, for
    /// processing after the specified delay.
    pub fn schedule(
        &self,
        event: &Event,
        priority: Priority,
        delay: Time,
    ) -> Result<(), SchedulingError> {
        self.scheduler.schedule(event, priority, delay)
    }

    /// Spawns a new process.
    ///
    /// See [`Scheduler::process`].
    pub fn process<F, Fut, T, E>(
        &self,
        name: impl Into<String>,
        body: F,
    ) -> Result<Process, SchedulingError>
    where
        F: FnOnce(crate::process::ProcessContext) -> Fut + 'static,
        Fut: Future<Output = Result<T, E>> + 'static,
        T: Any,
        E: Into<BoxError> + 'static,
    {
        self.scheduler.process(name, body)
    }

    /// Creates a condition that succeeds once all of the events succeed.
    pub fn all_of(
        &self,
        id: impl Into<String>,
        events: impl IntoIterator<Item = Event>,
    ) -> Result<Event, SchedulingError> {
        self.scheduler.all_of(id, events)
    }

    /// Creates a condition that succeeds as soon as any of the events
    /// succeeds.
    pub fn any_of(
        &self,
        id: impl Into<String>,
        events: impl IntoIterator<Item = Event>,
    ) -> Result<Event, SchedulingError> {
        self.scheduler.any_of(id, events)
    }

    /// Returns the process whose body is currently running, if any.
    ///
    /// Outside of a process body this is always `None`.
    pub fn active_process(&self) -> Option<Process> {
        self.core.active.borrow().clone()
    }

    /// Returns the number of events waiting in the queue.
    pub fn pending(&self) -> usize {
        self.core.queue.borrow().len()
    }

    /// Returns the time of the next event in the queue, if any.
    pub fn peek(&self) -> Option<Time> {
        self.core.queue.borrow().peek_key().map(|(time, _)| *time)
    }

    /// Returns the number of processes that have not terminated.
    pub fn live_processes(&self) -> usize {
        self.core.processes.borrow().len()
    }

    /// Returns `true` if the environment was shut down.
    pub fn is_shut_down(&self) -> bool {
        self.core.is_shut_down.get()
    }

    /// Processes the next event in the queue.
    ///
    /// Returns `Ok(false)` if the queue was empty.
    pub fn step(&mut self) -> Result<bool, ExecutionError> {
        if self.is_halted.swap(false, Ordering::Relaxed) {
            return Err(ExecutionError::Halted);
        }
        self.start_clock();

        let job = self.core.queue.borrow_mut().pull();
        let Some(((time, _priority), event)) = job else {
            return Ok(false);
        };

        if time > self.core.now() {
            if let SyncStatus::OutOfSync(lag) = self.clock.synchronize(time) {
                #[cfg(feature = "tracing")]
                tracing::warn!(lag = ?lag, "simulation lags behind its clock");

                if self.clock_tolerance.is_some_and(|tolerance| lag > tolerance) {
                    return Err(self.abort(ExecutionError::OutOfSync(lag)));
                }
            }
            self.core.time.set(time);
        }

        #[cfg(feature = "tracing")]
        {
            crate::tracing::set_simulation_time(Some(time));
            tracing::trace!(event = event.id(), priority = ?_priority, "processing event");
        }

        event.run_callbacks();

        let fatal = self.core.fatal.borrow_mut().take();
        if let Some(error) = fatal {
            return Err(self.abort(error));
        }
        if event.is_failed() && !event.is_defused() {
            let error = ExecutionError::EventFailed {
                event: event.id().to_owned(),
                cause: event.cause().unwrap_or_else(|| Value::new(())),
            };
            return Err(self.abort(error));
        }

        Ok(true)
    }

    /// Runs the simulation until the event queue is exhausted.
    ///
    /// Returns the final simulation time.
    pub fn run(&mut self) -> Result<Time, ExecutionError> {
        while self.step()? {}

        Ok(self.now())
    }

    /// Runs the simulation until the specified time is reached or the event
    /// queue is exhausted, whichever comes first.
    ///
    /// Events scheduled at the bound itself with a priority other than
    /// [`Priority::Urgent`] are left in the queue, as are all later events, so
    /// that the simulation can be resumed.
    pub fn run_until(&mut self, until: Time) -> Result<Time, ExecutionError> {
        let now = self.now();
        if until < now {
            return Err(ExecutionError::InvalidDeadline {
                now,
                deadline: until,
            });
        }
        if self.is_shut_down() {
            return Err(ExecutionError::Terminated);
        }

        let stop = self.scheduler.event("stop");
        let is_reached = Rc::new(Cell::new(false));
        {
            let is_reached = is_reached.clone();
            stop.add_callback(move |_| is_reached.set(true));
        }
        stop.resolve(Outcome::Ok(None), Priority::Urgent, until - now)
            .map_err(|_| ExecutionError::Terminated)?;

        while !is_reached.get() && self.step()? {}

        Ok(self.now())
    }

    /// Shuts the environment down.
    ///
    /// All pending events are discarded and all live processes are closed.
    /// Further scheduling requests fail with [`SchedulingError::ShutDown`].
    pub fn shutdown(&mut self) {
        self.core.shutdown();
    }

    /// Synchronizes the clock with the current simulation time on the first
    /// step after the clock was set.
    fn start_clock(&mut self) {
        if !self.is_clock_started {
            self.is_clock_started = true;
            self.clock.synchronize(self.core.now());
        }
    }

    /// Shuts the environment down and returns the error.
    fn abort(&mut self, error: ExecutionError) -> ExecutionError {
        #[cfg(feature = "tracing")]
        tracing::error!(error = %error, "simulation aborted");

        self.core.shutdown();

        error
    }
}

impl Default for Env {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Env {
    fn drop(&mut self) {
        self.core.shutdown();

        #[cfg(feature = "tracing")]
        crate::tracing::set_simulation_time(None);
    }
}

impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Env")
            .field("time", &self.now())
            .field("pending", &self.pending())
            .field("live_processes", &self.live_processes())
            .finish_non_exhaustive()
    }
}

/// Error returned when an event cannot be scheduled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SchedulingError {
    /// The event was already triggered.
    AlreadyTriggered {
        /// Identifier of the event.
        event: String,
    },
    /// The outcome of an event was requested before it was triggered.
    NotTriggered {
        /// Identifier of the event.
        event: String,
    },
    /// The scheduling time overflows the time representation.
    TimeOverflow,
    /// The environment was dropped.
    EnvDropped,
    /// The environment was shut down.
    ShutDown,
}

impl fmt::Display for SchedulingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyTriggered { event } => {
                write!(f, "event '{event}' has already been triggered")
            }
            Self::NotTriggered { event } => write!(f, "event '{event}' has not been triggered"),
            Self::TimeOverflow => f.write_str("the scheduled time overflows the time range"),
            Self::EnvDropped => f.write_str("the simulation environment has been dropped"),
            Self::ShutDown => f.write_str("the simulation environment has been shut down"),
        }
    }
}

impl Error for SchedulingError {}

/// Error returned when the simulation is aborted.
#[derive(Debug)]
pub enum ExecutionError {
    /// The simulation was halted through a [`Halter`].
    ///
    /// The simulation can be resumed.
    Halted,
    /// The environment was shut down before or during the run.
    Terminated,
    /// A failed event was processed without being defused.
    EventFailed {
        /// Identifier of the failed event.
        event: String,
        /// Cause of the failure.
        cause: Value,
    },
    /// The requested time bound lies in the past.
    InvalidDeadline {
        /// Current simulation time.
        now: Time,
        /// Requested time bound.
        deadline: Time,
    },
    /// The simulation lagged behind its clock by more than the tolerance.
    OutOfSync(Duration),
    /// A shared resource detected an inconsistent queue.
    Resource(ResourceError),
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Halted => f.write_str("the simulation has been halted"),
            Self::Terminated => f.write_str("the simulation environment has been shut down"),
            Self::EventFailed { event, cause } => {
                write!(f, "event '{event}' failed")?;
                if let Some(failure) = cause.downcast_ref::<crate::process::ProcessFailure>() {
                    write!(f, ": {failure}")?;
                } else if let Some(msg) = cause.downcast_ref::<&str>() {
                    write!(f, ": {msg}")?;
                } else if let Some(msg) = cause.downcast_ref::<String>() {
                    write!(f, ": {msg}")?;
                }
                Ok(())
            }
            Self::InvalidDeadline { now, deadline } => write!(
                f,
                "the specified deadline ({deadline}) lies in the past of the current simulation time ({now})"
            ),
            Self::OutOfSync(lag) => write!(
                f,
                "the simulation lags behind its clock by {:.3}s",
                lag.as_secs_f64()
            ),
            Self::Resource(e) => write!(f, "resource failure: {e}"),
        }
    }
}

impl Error for ExecutionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Resource(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ResourceError> for ExecutionError {
    fn from(e: ResourceError) -> Self {
        Self::Resource(e)
    }
}

/// Any error returned by the environment.
#[derive(Debug)]
pub enum SimulationError {
    /// A scheduling request failed.
    Scheduling(SchedulingError),
    /// The simulation was aborted.
    Execution(ExecutionError),
}

impl fmt::Display for SimulationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheduling(e) => e.fmt(f),
            Self::Execution(e) => e.fmt(f),
        }
    }
}

impl Error for SimulationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Scheduling(e) => Some(e),
            Self::Execution(e) => Some(e),
        }
    }
}

impl From<SchedulingError> for SimulationError {
    fn from(e: SchedulingError) -> Self {
        Self::Scheduling(e)
    }
}

impl From<ExecutionError> for SimulationError {
    fn from(e: ExecutionError) -> Self {
        Self::Execution(e)
    }
}
