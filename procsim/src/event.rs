//! Events and their payloads.
//!
//! An [`Event`] is a one-shot occurrence with a three-stage lifecycle:
//!
//! 1. *pending*: the event was created but has no outcome yet,
//! 2. *triggered*: the event was given an outcome, either success with an
//!    optional [`Value`] or failure with a cause, and was scheduled in the
//!    environment's queue,
//! 3. *processed*: the environment popped the event from its queue and invoked
//!    its callbacks.
//!
//! An event can be triggered only once. Callbacks registered before the event
//! is processed run in registration order when it is processed; callbacks
//! registered afterwards run immediately.
//!
//! A failed event aborts the simulation when it is processed unless it was
//! [defused](Event::defuse), which is typically done by the party that handles
//! the failure.
//!
//! Events are cheap handles: cloning an `Event` yields another handle to the
//! same event, and equality is identity.
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::condition::ConditionNode;
use crate::simulation::{Priority, Scheduler, SchedulingError};
use crate::time::Time;

/// A type-erased, cheaply clonable payload.
///
/// Values are carried by successful events and used as failure causes.
#[derive(Clone)]
pub struct Value {
    inner: Rc<dyn Any>,
    type_name: &'static str,
}

impl Value {
    /// Wraps an arbitrary value.
    pub fn new<T: Any>(value: T) -> Self {
        Self {
            inner: Rc::new(value),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Returns a reference to the payload if it has type `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref()
    }

    /// Returns `true` if the payload has type `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.inner.is::<T>()
    }

    /// Returns the name of the payload type.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Value").field(&self.type_name).finish()
    }
}

/// Outcome of a triggered event.
#[derive(Clone, Debug)]
pub(crate) enum Outcome {
    Ok(Option<Value>),
    Failed(Value),
}

/// Role of an event within the kernel.
pub(crate) enum EventKind {
    Plain,
    Interruption,
    Condition(Rc<ConditionNode>),
}

/// Handle to a registered callback, used for removal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CallbackKey(u64);

type Callback = Box<dyn FnOnce(&Event)>;

struct EventState {
    outcome: Option<Outcome>,
    callbacks: Vec<(CallbackKey, Callback)>,
    next_key: u64,
    is_processed: bool,
    is_defused: bool,
}

struct EventInner {
    id: String,
    kind: EventKind,
    scheduler: Scheduler,
    state: RefCell<EventState>,
}

/// A one-shot simulation event.
#[derive(Clone)]
pub struct Event {
    inner: Rc<EventInner>,
}

/// A non-owning reference to an [`Event`].
#[derive(Clone)]
pub(crate) struct WeakEvent {
    inner: Weak<EventInner>,
}

impl WeakEvent {
    pub(crate) fn upgrade(&self) -> Option<Event> {
        self.inner.upgrade().map(|inner| Event { inner })
    }
}

impl Event {
    pub(crate) fn new(id: impl Into<String>, scheduler: Scheduler, kind: EventKind) -> Self {
        Self {
            inner: Rc::new(EventInner {
                id: id.into(),
                kind,
                scheduler,
                state: RefCell::new(EventState {
                    outcome: None,
                    callbacks: Vec::new(),
                    next_key: 0,
                    is_processed: false,
                    is_defused: false,
                }),
            }),
        }
    }

    /// Returns the identifier of the event.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Returns a scheduler handle to the environment owning this event.
    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    /// Returns `true` if the event was given an outcome.
    pub fn is_triggered(&self) -> bool {
        self.inner.state.borrow().outcome.is_some()
    }

    /// Returns `true` if the event was triggered with a successful outcome.
    pub fn is_ok(&self) -> bool {
        matches!(self.inner.state.borrow().outcome, Some(Outcome::Ok(_)))
    }

    /// Returns `true` if the event was triggered with a failure.
    pub fn is_failed(&self) -> bool {
        matches!(self.inner.state.borrow().outcome, Some(Outcome::Failed(_)))
    }

    /// Returns `true` if the callbacks of the event were processed.
    pub fn is_processed(&self) -> bool {
        self.inner.state.borrow().is_processed
    }

    /// Returns `true` if the failure of this event was marked as handled.
    pub fn is_defused(&self) -> bool {
        self.inner.state.borrow().is_defused
    }

    /// Marks a (possibly future) failure of this event as handled so that it
    /// does not abort the simulation.
    pub fn defuse(&self) {
        self.inner.state.borrow_mut().is_defused = true;
    }

    /// Returns the value of a successful event.
    pub fn value(&self) -> Option<Value> {
        match &self.inner.state.borrow().outcome {
            Some(Outcome::Ok(value)) => value.clone(),
            _ => None,
        }
    }

    /// Returns a copy of the value of a successful event if it has type `T`.
    pub fn value_as<T: Any + Clone>(&self) -> Option<T> {
        self.value().and_then(|v| v.downcast_ref::<T>().cloned())
    }

    /// Returns the cause of a failed event.
    pub fn cause(&self) -> Option<Value> {
        match &self.inner.state.borrow().outcome {
            Some(Outcome::Failed(cause)) => Some(cause.clone()),
            _ => None,
        }
    }

    /// Triggers the event with a successful outcome.
    ///
    /// The event is scheduled for processing at the current simulation time
    /// with [`Priority::Normal`].
    pub fn succeed<T: Any>(&self, value: T) -> Result<(), SchedulingError> {
        self.succeed_with_priority(value, Priority::Normal)
    }

    /// Triggers the event with a successful outcome and a specific priority.
    pub fn succeed_with_priority<T: Any>(
        &self,
        value: T,
        priority: Priority,
    ) -> Result<(), SchedulingError> {
        self.resolve(Outcome::Ok(Some(Value::new(value))), priority, 0)
    }

    /// Triggers the event with a failure.
    ///
    /// Unless the event is defused by the time it is processed, its failure
    /// aborts the simulation.
    pub fn fail<T: Any>(&self, cause: T) -> Result<(), SchedulingError> {
        self.resolve(Outcome::Failed(Value::new(cause)), Priority::Normal, 0)
    }

    /// Triggers the event with the same outcome as another, already triggered
    /// event.
    pub fn trigger(&self, other: &Event) -> Result<(), SchedulingError> {
        let outcome = other.inner.state.borrow().outcome.clone();
        match outcome {
            Some(outcome) => self.resolve(outcome, Priority::Normal, 0),
            None => Err(SchedulingError::NotTriggered {
                event: other.id().to_owned(),
            }),
        }
    }

    /// Registers a callback to be invoked when the event is processed.
    ///
    /// If the event was already processed, the callback is invoked
    /// immediately and `None` is returned.
    pub fn add_callback<F>(&self, callback: F) -> Option<CallbackKey>
    where
        F: FnOnce(&Event) + 'static,
    {
        let mut state = self.inner.state.borrow_mut();
        if state.is_processed {
            drop(state);
            callback(self);

            return None;
        }
        let key = CallbackKey(state.next_key);
        state.next_key += 1;
        state.callbacks.push((key, Box::new(callback)));

        Some(key)
    }

    /// Unregisters a callback that has not run yet.
    ///
    /// Returns `true` if the callback was found.
    pub fn remove_callback(&self, key: CallbackKey) -> bool {
        let mut state = self.inner.state.borrow_mut();
        let len = state.callbacks.len();
        state.callbacks.retain(|(k, _)| *k != key);

        state.callbacks.len() != len
    }

    /// Returns `true` if both handles refer to the same event.
    pub fn ptr_eq(&self, other: &Event) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn downgrade(&self) -> WeakEvent {
        WeakEvent {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Sets the outcome and schedules the event.
    pub(crate) fn resolve(
        &self,
        outcome: Outcome,
        priority: Priority,
        delay: Time,
    ) -> Result<(), SchedulingError> {
        let core = self.inner.scheduler.core()?;
        let deadline = core
            .now()
            .checked_add(delay)
            .ok_or(SchedulingError::TimeOverflow)?;
        {
            let mut state = self.inner.state.borrow_mut();
            if state.outcome.is_some() {
                return Err(SchedulingError::AlreadyTriggered {
                    event: self.id().to_owned(),
                });
            }
            state.outcome = Some(outcome);
        }
        core.enqueue(deadline, priority, self.clone());

        Ok(())
    }

    /// Marks the event as processed and invokes its callbacks in
    /// registration order.
    pub(crate) fn run_callbacks(&self) {
        let callbacks = {
            let mut state = self.inner.state.borrow_mut();
            state.is_processed = true;
            std::mem::take(&mut state.callbacks)
        };
        for (_, callback) in callbacks {
            callback(self);
        }
    }

    /// Drops all pending callbacks without invoking them.
    pub(crate) fn clear_callbacks(&self) {
        let callbacks = std::mem::take(&mut self.inner.state.borrow_mut().callbacks);
        drop(callbacks);
    }

    pub(crate) fn is_interruption(&self) -> bool {
        matches!(self.inner.kind, EventKind::Interruption)
    }

    pub(crate) fn condition(&self) -> Option<&Rc<ConditionNode>> {
        match &self.inner.kind {
            EventKind::Condition(node) => Some(node),
            _ => None,
        }
    }
}

impl AsRef<Event> for Event {
    fn as_ref(&self) -> &Event {
        self
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Event {}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Event")
            .field("id", &self.inner.id)
            .field("outcome", &state.outcome)
            .field("is_processed", &state.is_processed)
            .finish_non_exhaustive()
    }
}
