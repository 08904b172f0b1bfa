//! Simulation processes.
//!
//! A [`Process`] is an `async` body driven by the environment. The body
//! receives a [`ProcessContext`] and suspends itself by waiting on events
//! with [`ProcessContext::wait`]; it is resumed by the environment once the
//! awaited event was processed, with the value of that event.
//!
//! A process is itself an event: it succeeds with the value returned by its
//! body when the body completes, so that other processes can wait for its
//! termination.
//!
//! # Resumption rules
//!
//! When the event a process waits on is processed:
//!
//! * if the event succeeded, the wait completes with the event value,
//! * if the event is an interruption, the wait completes with an
//!   [`Interrupt`] error, from which the body may recover,
//! * if the event failed otherwise, the body is closed at its yield point and
//!   the process terminates without a value.
//!
//! A body that completes with an error other than an unhandled [`Interrupt`]
//! fails the process event with a [`ProcessFailure`] cause, which aborts the
//! simulation unless the process event is defused.
//!
//! # Example
//!
//! ```
//! use procsim::coroutine::BoxError;
//! use procsim::simulation::Env;
//!
//! let mut env = Env::new();
//!
//! let worker = env
//!     .process("worker", |cx| async move {
//!         cx.wait(cx.timeout(3)?).await?;
//!         Ok::<_, BoxError>(cx.now() * 2)
//!     })
//!     .unwrap();
//!
//! env.process("supervisor", move |cx| async move {
//!     let result = cx.wait(&worker).await?;
//!     assert_eq!(result.and_then(|v| v.downcast_ref::<u64>().copied()), Some(6));
//!     Ok::<_, BoxError>(())
//! })
//! .unwrap();
//!
//! assert_eq!(env.run().unwrap(), 3);
//! ```
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::rc::{Rc, Weak};

use crate::condition::ConditionValue;
use crate::coroutine::{BoxError, Coroutine, Interrupt, Resume, Yielder};
use crate::event::{CallbackKey, Event, EventKind, Outcome, Value};
use crate::simulation::{EnvCore, Priority, Scheduler, SchedulingError};
use crate::time::Time;

/// Value exchanged between a process body and the environment at each yield
/// point.
pub(crate) enum Step {
    Wait(Event),
    Finish(Option<Value>),
}

type ProcessCoroutine = Coroutine<Step, Option<Value>>;

struct ProcessInner {
    name: String,
    event: Event,
    coroutine: RefCell<ProcessCoroutine>,
    target: RefCell<Option<(Event, Option<CallbackKey>)>>,
    is_alive: Cell<bool>,
    key: Cell<Option<usize>>,
    scheduler: Scheduler,
}

/// A handle to a simulation process.
#[derive(Clone)]
pub struct Process {
    inner: Rc<ProcessInner>,
}

impl Process {
    pub(crate) fn spawn<F, Fut, T, E>(
        core: &Rc<EnvCore>,
        scheduler: Scheduler,
        name: String,
        body: F,
    ) -> Result<Self, SchedulingError>
    where
        F: FnOnce(ProcessContext) -> Fut + 'static,
        Fut: Future<Output = Result<T, E>> + 'static,
        T: Any,
        E: Into<BoxError> + 'static,
    {
        let inner = Rc::new_cyclic(|this: &Weak<ProcessInner>| {
            let cx = ProcessContext {
                yielder: None,
                process: this.clone(),
                scheduler: scheduler.clone(),
                name: name.clone(),
            };
            let coroutine = Coroutine::new(move |yielder: Yielder<Step, Option<Value>>| {
                let cx = ProcessContext {
                    yielder: Some(yielder.share()),
                    ..cx
                };
                async move {
                    let result: Result<T, BoxError> = body(cx).await.map_err(Into::into);
                    match result {
                        Ok(value) => yielder.call_last(Step::Finish(Some(Value::new(value))))?,
                        Err(e) if is_interrupt(&*e) => yielder.call_last(Step::Finish(None))?,
                        Err(e) => return Err(e),
                    }

                    Ok::<(), BoxError>(())
                }
            });

            ProcessInner {
                event: Event::new(name.clone(), scheduler.clone(), EventKind::Plain),
                name,
                coroutine: RefCell::new(coroutine),
                target: RefCell::new(None),
                is_alive: Cell::new(true),
                key: Cell::new(None),
                scheduler,
            }
        });
        let process = Self { inner };

        let init = process.inner.scheduler.event("init");
        let key = {
            let process = process.clone();
            init.add_callback(move |init| process.resume(init))
        };
        *process.inner.target.borrow_mut() = Some((init.clone(), key));
        if let Err(e) = init.resolve(Outcome::Ok(None), Priority::Urgent, 0) {
            process.detach();
            return Err(e);
        }

        process.inner.key.set(Some(core.register(process.clone())));

        #[cfg(feature = "tracing")]
        tracing::debug!(process = %process.inner.name, "process spawned");

        Ok(process)
    }

    /// Returns the name of the process.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the event that succeeds when the process terminates.
    pub fn event(&self) -> &Event {
        &self.inner.event
    }

    /// Returns `true` if the process has not terminated yet.
    pub fn is_alive(&self) -> bool {
        self.inner.is_alive.get()
    }

    /// Returns the event the process is currently waiting on.
    pub fn target(&self) -> Option<Event> {
        self.inner
            .target
            .borrow()
            .as_ref()
            .map(|(event, _)| event.clone())
    }

    /// Returns the value returned by the process body, if it has completed.
    pub fn value(&self) -> Option<Value> {
        self.inner.event.value()
    }

    /// Returns `true` if both handles refer to the same process.
    pub fn ptr_eq(&self, other: &Process) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Interrupts the process.
    ///
    /// The interruption is delivered at the current simulation time, before
    /// regular events, into the wait the process is suspended on. If the
    /// process terminates before the interruption is delivered, the
    /// interruption is dropped.
    pub fn interrupt<T: Any>(&self, cause: T) -> Result<(), InterruptError> {
        let core = self.inner.scheduler.core()?;
        if core.is_active(self) {
            return Err(InterruptError::SelfInterrupt);
        }
        if !self.is_alive() {
            return Err(InterruptError::Terminated);
        }

        let signal = Interrupt::new(cause);
        let event = Event::new("interruption", self.inner.scheduler.clone(), EventKind::Interruption);
        event.defuse();
        {
            let process = self.clone();
            event.add_callback(move |event| process.deliver(event));
        }
        event.resolve(
            Outcome::Failed(Value::new(signal)),
            Priority::Urgent,
            0,
        )?;

        Ok(())
    }

    /// Resumes the process with an interruption, unless it has terminated in
    /// the meantime.
    fn deliver(&self, interruption: &Event) {
        if !self.is_alive() {
            return;
        }
        self.detach();
        self.resume(interruption);
    }

    /// Stops listening to the current target.
    fn detach(&self) {
        let target = self.inner.target.borrow_mut().take();
        if let Some((event, Some(key))) = target {
            event.remove_callback(key);
        }
    }

    /// Resumes the body with the outcome of a processed event and registers
    /// the process with the next event it waits on.
    fn resume(&self, by: &Event) {
        let Ok(core) = self.inner.scheduler.core() else {
            return;
        };
        self.inner.target.borrow_mut().take();

        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!("process", name = %self.inner.name).entered();

        let mut event = by.clone();
        loop {
            let previous = core.set_active(Some(self.clone()));
            let step = {
                let mut coroutine = self.inner.coroutine.borrow_mut();
                let is_suspended = if event.is_interruption() {
                    let signal = event
                        .cause()
                        .and_then(|cause| cause.downcast_ref::<Interrupt>().cloned())
                        .unwrap_or_else(|| Interrupt::new(()));
                    coroutine.interrupt(signal)
                } else if event.is_ok() {
                    coroutine.send(event.value())
                } else {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(event = event.id(), "awaited event failed, closing process");

                    coroutine.close();
                    false
                };

                if is_suspended {
                    coroutine.take_value()
                } else {
                    None
                }
            };
            core.set_active(previous);

            match step {
                Some(Step::Wait(target)) if target.is_processed() => event = target,
                Some(Step::Wait(target)) => {
                    let key = {
                        let process = self.clone();
                        target.add_callback(move |event| process.resume(event))
                    };
                    *self.inner.target.borrow_mut() = Some((target, key));

                    return;
                }
                _ => {
                    self.finish(&core);

                    return;
                }
            }
        }
    }

    /// Unregisters the terminated process and triggers its event.
    fn finish(&self, core: &EnvCore) {
        self.inner.is_alive.set(false);
        self.detach();
        if let Some(key) = self.inner.key.take() {
            core.unregister(key);
        }

        let (step, error) = {
            let mut coroutine = self.inner.coroutine.borrow_mut();
            (coroutine.take_value(), coroutine.take_error())
        };
        let outcome = match error {
            Some(error) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %error, "process failed");

                Outcome::Failed(Value::new(ProcessFailure {
                    process: self.inner.name.clone(),
                    error,
                }))
            }
            None => match step {
                Some(Step::Finish(value)) => Outcome::Ok(value),
                _ => Outcome::Ok(None),
            },
        };

        #[cfg(feature = "tracing")]
        tracing::debug!("process terminated");

        // Scheduling only fails once the environment is shutting down.
        let _ = self.inner.event.resolve(outcome, Priority::Normal, 0);
    }

    /// Closes the process on environment shutdown.
    pub(crate) fn abort(&self) {
        self.inner.is_alive.set(false);
        self.inner.key.set(None);
        self.detach();

        // Closing the body runs the destructors of the values it holds, which
        // may access other processes but never this one.
        let mut coroutine = self.inner.coroutine.borrow_mut();
        coroutine.close();
    }
}

impl AsRef<Event> for Process {
    fn as_ref(&self) -> &Event {
        &self.inner.event
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("name", &self.inner.name)
            .field("is_alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}

/// The body-side handle of a process.
pub struct ProcessContext {
    yielder: Option<Yielder<Step, Option<Value>>>,
    process: Weak<ProcessInner>,
    scheduler: Scheduler,
    name: String,
}

impl ProcessContext {
    /// Suspends the process until the event is processed.
    ///
    /// Returns the value of the event, or the interruption signal if the
    /// process was interrupted while waiting.
    ///
    /// # Panics
    ///
    /// Panics if the context is used outside of the body of its own process.
    pub async fn wait<E: AsRef<Event>>(&self, event: E) -> Result<Option<Value>, Interrupt> {
        let Some(yielder) = &self.yielder else {
            panic!("process context used outside of its process");
        };

        match yielder.call(Step::Wait(event.as_ref().clone())).await {
            Ok(Resume::Value(value)) => Ok(value),
            Ok(Resume::Interrupt(signal)) => Err(signal),
            Err(closed) => panic!("process '{}' resumed after closure: {closed}", self.name),
        }
    }

    /// Suspends the process until the event is processed or the delay
    /// elapses, whichever comes first.
    pub async fn wait_timeout<E: AsRef<Event>>(
        &self,
        event: E,
        delay: Time,
    ) -> Result<WaitOutcome, WaitError> {
        let event = event.as_ref().clone();
        let timeout = self.scheduler.timeout(delay)?;
        let race = self
            .scheduler
            .any_of("wait_timeout", [event.clone(), timeout])?;

        let value = self.wait(&race).await?;
        let completed = value
            .as_ref()
            .and_then(|v| v.downcast_ref::<ConditionValue>())
            .is_some_and(|v| v.contains(&event));

        Ok(if completed {
            WaitOutcome::Completed(event.value())
        } else {
            WaitOutcome::TimedOut
        })
    }

    /// Returns the current simulation time.
    pub fn now(&self) -> Time {
        self.scheduler.now()
    }

    /// Returns the name of the process.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Creates an event that succeeds after the specified delay.
    pub fn timeout(&self, delay: Time) -> Result<Event, SchedulingError> {
        self.scheduler.timeout(delay)
    }

    /// Creates a pending event.
    pub fn event(&self, id: impl Into<String>) -> Event {
        self.scheduler.event(id)
    }

    /// Returns a scheduler handle to the environment.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Returns a handle to the process running this body.
    pub fn this(&self) -> Option<Process> {
        self.process.upgrade().map(|inner| Process { inner })
    }
}

impl fmt::Debug for ProcessContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessContext")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Returns `true` if a body error is an unhandled interruption.
fn is_interrupt(error: &(dyn Error + 'static)) -> bool {
    error.is::<Interrupt>()
        || matches!(
            error.downcast_ref::<WaitError>(),
            Some(WaitError::Interrupted(_))
        )
}

/// Outcome of [`ProcessContext::wait_timeout`].
#[derive(Clone, Debug)]
pub enum WaitOutcome {
    /// The event succeeded in time, with the specified value.
    Completed(Option<Value>),
    /// The delay elapsed first.
    TimedOut,
}

/// Error returned by [`ProcessContext::wait_timeout`].
#[derive(Clone, Debug)]
pub enum WaitError {
    /// The process was interrupted while waiting.
    Interrupted(Interrupt),
    /// The timeout could not be scheduled.
    Scheduling(SchedulingError),
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupted(signal) => signal.fmt(f),
            Self::Scheduling(e) => e.fmt(f),
        }
    }
}

impl Error for WaitError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Interrupted(signal) => Some(signal),
            Self::Scheduling(e) => Some(e),
        }
    }
}

impl From<Interrupt> for WaitError {
    fn from(signal: Interrupt) -> Self {
        Self::Interrupted(signal)
    }
}

impl From<SchedulingError> for WaitError {
    fn from(e: SchedulingError) -> Self {
        Self::Scheduling(e)
    }
}

/// Error returned when a process cannot be interrupted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InterruptError {
    /// A process attempted to interrupt itself.
    SelfInterrupt,
    /// The process has already terminated.
    Terminated,
    /// The interruption could not be scheduled.
    Scheduling(SchedulingError),
}

impl fmt::Display for InterruptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SelfInterrupt => f.write_str("a process cannot interrupt itself"),
            Self::Terminated => f.write_str("the process has already terminated"),
            Self::Scheduling(e) => e.fmt(f),
        }
    }
}

impl Error for InterruptError {}

impl From<SchedulingError> for InterruptError {
    fn from(e: SchedulingError) -> Self {
        Self::Scheduling(e)
    }
}

/// Failure cause of a process whose body returned an error.
#[derive(Debug)]
pub struct ProcessFailure {
    process: String,
    error: BoxError,
}

impl ProcessFailure {
    /// Returns the name of the failed process.
    pub fn process(&self) -> &str {
        &self.process
    }

    /// Returns the error returned by the body.
    pub fn error(&self) -> &(dyn Error + 'static) {
        self.error.as_ref()
    }
}

impl fmt::Display for ProcessFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "process '{}' failed: {}", self.process, self.error)
    }
}

impl Error for ProcessFailure {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.error.as_ref())
    }
}
