//! Resumable routines.
//!
//! A [`Coroutine`] turns an ordinary `async` routine, the *body*, into a unit
//! of work that can be suspended at explicit yield points and resumed later by
//! its *driver*.
//!
//! The body receives a [`Yielder`] handle. Awaiting [`Yielder::call`] hands a
//! value to the driver and parks the body until the driver resumes it, either
//! with an input value ([`Coroutine::send`]) or with an interruption signal
//! ([`Coroutine::interrupt`]). The awaited call then completes with the
//! corresponding [`Resume`] variant, so that an interruption is always
//! observed at the exact yield point where the body was parked and never
//! inside arbitrary body code.
//!
//! The driver and the body are never runnable at the same time: resuming the
//! coroutine polls the body until its next yield point, after which control
//! returns to the driver. No thread, lock or busy-wait is involved.
//!
//! # Example
//!
//! ```
//! use procsim::coroutine::{BoxError, Coroutine, Resume, Yielder};
//!
//! // A coroutine that accumulates the values sent by its driver and yields
//! // the running total.
//! let mut acc = Coroutine::new(|y: Yielder<u32, u32>| async move {
//!     let mut total = 0;
//!     while let Resume::Value(x) = y.call(total).await? {
//!         total += x;
//!     }
//!     Ok::<(), BoxError>(())
//! });
//!
//! assert!(acc.send(0)); // runs the body up to its first yield
//! assert_eq!(acc.value(), Some(&0));
//! assert!(acc.send(3));
//! assert!(acc.send(4));
//! assert_eq!(acc.value(), Some(&7));
//! ```
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures_task::noop_waker_ref;
use pin_project::pin_project;

use crate::event::Value;

/// Type-erased error returned by coroutine and process bodies.
pub type BoxError = Box<dyn Error + 'static>;

/// Execution state of a coroutine, shared by the driver and the body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    /// The body has not been polled yet.
    Idle,
    /// The body is being polled.
    Running,
    /// The body is parked at a yield point.
    Suspended,
    /// The body has completed or was closed.
    Closed,
}

/// Rendezvous point between the driver and the body.
struct Channel<Y, R> {
    state: Cell<State>,
    yielded: RefCell<Option<Y>>,
    resume: RefCell<Option<Resume<R>>>,
}

/// The value delivered to a body when it is resumed.
#[derive(Debug)]
pub enum Resume<R> {
    /// Regular resumption with an input value.
    Value(R),
    /// Exceptional resumption with an interruption signal.
    Interrupt(Interrupt),
}

/// An interruption signal.
///
/// An `Interrupt` is delivered into a suspended body through
/// [`Coroutine::interrupt`]. It implements [`Error`] so that a body which does
/// not wish to recover from an interruption can simply propagate it with the
/// `?` operator.
#[derive(Clone, Debug)]
pub struct Interrupt {
    cause: Value,
}

impl Interrupt {
    /// Creates an interruption signal with the specified cause.
    pub fn new<T: Any>(cause: T) -> Self {
        Self {
            cause: Value::new(cause),
        }
    }

    pub(crate) fn from_value(cause: Value) -> Self {
        Self { cause }
    }

    /// Returns the cause of the interruption.
    pub fn cause(&self) -> &Value {
        &self.cause
    }

    /// Returns the cause of the interruption if it has type `T`.
    pub fn cause_as<T: Any>(&self) -> Option<&T> {
        self.cause.downcast_ref()
    }
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "interrupted ({})", self.cause.type_name())
    }
}

impl Error for Interrupt {}

/// Error returned when a yield is attempted on a closed coroutine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BridgeClosed;

impl fmt::Display for BridgeClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("the coroutine bridge is closed")
    }
}

impl Error for BridgeClosed {}

/// Error recorded when a body suspends on something other than its yielder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ForeignAwait;

impl fmt::Display for ForeignAwait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("the coroutine body suspended without yielding a value")
    }
}

impl Error for ForeignAwait {}

/// The body-side handle of a [`Coroutine`].
pub struct Yielder<Y, R = ()> {
    channel: Rc<Channel<Y, R>>,
}

impl<Y, R> Yielder<Y, R> {
    /// Yields a value to the driver and suspends the body until it is
    /// resumed.
    ///
    /// The returned future completes with the [`Resume`] value provided by the
    /// driver, or immediately with [`BridgeClosed`] if the coroutine was
    /// already closed, for instance by a prior call to
    /// [`call_last`](Self::call_last).
    pub fn call(&self, value: Y) -> Yield<'_, Y, R> {
        Yield {
            channel: &self.channel,
            value: Some(value),
            is_parked: false,
        }
    }

    /// Yields a lazily computed value to the driver.
    ///
    /// The supplier is not invoked if the coroutine is already closed.
    pub fn call_with<F>(&self, supplier: F) -> Yield<'_, Y, R>
    where
        F: FnOnce() -> Y,
    {
        let value = if self.is_closed() {
            None
        } else {
            Some(supplier())
        };

        Yield {
            channel: &self.channel,
            value,
            is_parked: false,
        }
    }

    /// Yields a final value and closes the coroutine without waiting to be
    /// resumed.
    pub fn call_last(&self, value: Y) -> Result<(), BridgeClosed> {
        if self.is_closed() {
            return Err(BridgeClosed);
        }
        *self.channel.yielded.borrow_mut() = Some(value);
        self.channel.state.set(State::Closed);

        Ok(())
    }

    /// Returns `true` if the coroutine is closed.
    pub fn is_closed(&self) -> bool {
        self.channel.state.get() == State::Closed
    }

    /// Returns another handle to the same coroutine.
    pub(crate) fn share(&self) -> Self {
        Self {
            channel: self.channel.clone(),
        }
    }
}

impl<Y, R> fmt::Debug for Yielder<Y, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Yielder")
            .field("state", &self.channel.state.get())
            .finish_non_exhaustive()
    }
}

/// Future returned by [`Yielder::call`] and [`Yielder::call_with`].
#[pin_project]
pub struct Yield<'a, Y, R> {
    channel: &'a Channel<Y, R>,
    value: Option<Y>,
    is_parked: bool,
}

impl<'a, Y, R> Future for Yield<'a, Y, R> {
    type Output = Result<Resume<R>, BridgeClosed>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        if *this.is_parked {
            return match this.channel.resume.borrow_mut().take() {
                Some(resume) => Poll::Ready(Ok(resume)),
                None => Poll::Pending,
            };
        }

        if this.channel.state.get() == State::Closed {
            return Poll::Ready(Err(BridgeClosed));
        }
        match this.value.take() {
            Some(value) => {
                *this.channel.yielded.borrow_mut() = Some(value);
                this.channel.state.set(State::Suspended);
                *this.is_parked = true;

                Poll::Pending
            }
            None => Poll::Ready(Err(BridgeClosed)),
        }
    }
}

impl<'a, Y, R> fmt::Debug for Yield<'a, Y, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Yield")
            .field("is_parked", &self.is_parked)
            .finish_non_exhaustive()
    }
}

/// The driver-side handle of a resumable routine.
///
/// Type parameter `Y` is the type of the values yielded by the body and `R`
/// the type of the values sent back by the driver on resumption. A one-way
/// generator is simply a `Coroutine<Y, ()>`, which can be driven with
/// [`next`](Coroutine::next).
pub struct Coroutine<Y, R = ()> {
    channel: Rc<Channel<Y, R>>,
    body: Option<Pin<Box<dyn Future<Output = Result<(), BoxError>>>>>,
    value: Option<Y>,
    error: Option<BoxError>,
}

impl<Y: 'static, R: 'static> Coroutine<Y, R> {
    /// Creates a coroutine from its body.
    ///
    /// The body does not run until the coroutine is first resumed.
    pub fn new<F, Fut, E>(body: F) -> Self
    where
        F: FnOnce(Yielder<Y, R>) -> Fut,
        Fut: Future<Output = Result<(), E>> + 'static,
        E: Into<BoxError>,
    {
        let channel = Rc::new(Channel {
            state: Cell::new(State::Idle),
            yielded: RefCell::new(None),
            resume: RefCell::new(None),
        });
        let fut = body(Yielder {
            channel: channel.clone(),
        });

        Self {
            channel,
            body: Some(Box::pin(async move { fut.await.map_err(Into::into) })),
            value: None,
            error: None,
        }
    }

    /// Resumes the body with an input value.
    ///
    /// Returns `true` if the body yielded again and `false` if it has
    /// completed or was closed. The input of the very first resumption is
    /// discarded since the body is not parked at a yield point yet.
    pub fn send(&mut self, input: R) -> bool {
        match self.channel.state.get() {
            State::Closed => return false,
            State::Suspended => *self.channel.resume.borrow_mut() = Some(Resume::Value(input)),
            State::Idle | State::Running => {}
        }

        self.poll_body()
    }

    /// Delivers an interruption signal at the yield point where the body is
    /// parked.
    ///
    /// Returns `true` if the body recovered and yielded again. A body that
    /// was never started cannot observe the signal: it is closed instead.
    pub fn interrupt(&mut self, signal: Interrupt) -> bool {
        match self.channel.state.get() {
            State::Suspended => {
                *self.channel.resume.borrow_mut() = Some(Resume::Interrupt(signal));

                self.poll_body()
            }
            State::Idle => {
                self.close();

                false
            }
            State::Running | State::Closed => false,
        }
    }

    /// Forces the termination of the body.
    ///
    /// The body future is dropped in place, which runs the destructors of all
    /// values it holds at its current yield point.
    pub fn close(&mut self) {
        self.channel.state.set(State::Closed);
        self.body = None;
        self.channel.resume.borrow_mut().take();
    }

    /// Returns `true` if the body has completed or was closed.
    pub fn is_closed(&self) -> bool {
        self.channel.state.get() == State::Closed
    }

    /// Returns `true` if the body was resumed at least once.
    pub fn is_started(&self) -> bool {
        self.channel.state.get() != State::Idle
    }

    /// Returns the last value yielded by the body.
    pub fn value(&self) -> Option<&Y> {
        self.value.as_ref()
    }

    /// Takes the last value yielded by the body.
    pub fn take_value(&mut self) -> Option<Y> {
        self.value.take()
    }

    /// Returns the error the body failed with, if any.
    pub fn error(&self) -> Option<&BoxError> {
        self.error.as_ref()
    }

    /// Takes the error the body failed with, if any.
    pub fn take_error(&mut self) -> Option<BoxError> {
        self.error.take()
    }

    /// Polls the body until its next yield point or its completion.
    fn poll_body(&mut self) -> bool {
        let Some(body) = self.body.as_mut() else {
            return false;
        };
        self.channel.state.set(State::Running);

        let mut cx = Context::from_waker(noop_waker_ref());
        let poll = body.as_mut().poll(&mut cx);
        let yielded = self.channel.yielded.borrow_mut().take();

        match (poll, self.channel.state.get()) {
            (Poll::Pending, State::Suspended) => {
                self.value = yielded;

                true
            }
            (Poll::Pending, State::Running) => {
                self.fail(Box::new(ForeignAwait));

                false
            }
            (poll, _) => {
                // Completion, possibly preceded by a terminal yield.
                if yielded.is_some() {
                    self.value = yielded;
                }
                self.close();
                if let Poll::Ready(Err(e)) = poll {
                    self.fail(e);
                }

                false
            }
        }
    }

    /// Records a body failure and closes the coroutine.
    fn fail(&mut self, error: BoxError) {
        #[cfg(feature = "tracing")]
        tracing::error!(error = %error, "coroutine body failed");

        self.error = Some(error);
        self.close();
    }
}

impl<Y: 'static> Coroutine<Y, ()> {
    /// Resumes a one-way coroutine.
    ///
    /// Returns `true` if the body yielded again and `false` if it has
    /// completed or was closed.
    pub fn next(&mut self) -> bool {
        self.send(())
    }
}

impl<Y, R> fmt::Debug for Coroutine<Y, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coroutine")
            .field("state", &self.channel.state.get())
            .field("has_value", &self.value.is_some())
            .field("has_error", &self.error.is_some())
            .finish_non_exhaustive()
    }
}
