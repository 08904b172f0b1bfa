//! Observable values.
//!
//! An [`ObservableValue`] holds a value and notifies the processes waiting for
//! a change each time the value is written:
//!
//! ```
//! use procsim::coroutine::BoxError;
//! use procsim::simulation::Env;
//! use procsim_util::observables::ObservableValue;
//!
//! let mut env = Env::new();
//! let level = ObservableValue::new(&env.scheduler(), "level", 0u32);
//!
//! let watcher = {
//!     let level = level.clone();
//!     env.process("watcher", move |cx| async move {
//!         cx.wait(level.changed()).await?;
//!         Ok::<_, BoxError>((cx.now(), level.get()))
//!     })
//!     .unwrap()
//! };
//!
//! {
//!     let level = level.clone();
//!     env.process("filler", move |cx| async move {
//!         cx.wait(cx.timeout(4)?).await?;
//!         level.modify(|l| *l += 10)?;
//!         Ok::<_, BoxError>(())
//!     })
//!     .unwrap();
//! }
//!
//! env.run().unwrap();
//! assert_eq!(watcher.event().value_as::<(u64, u32)>(), Some((4, 10)));
//! ```
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use procsim::event::Event;
use procsim::simulation::{Scheduler, SchedulingError};

use crate::notifier::Notifier;

struct Inner<T> {
    value: RefCell<T>,
    notifier: Notifier,
}

/// A shared value whose changes can be awaited.
///
/// Cloning an observable value yields another handle to the same value.
pub struct ObservableValue<T> {
    inner: Rc<Inner<T>>,
}

impl<T: Any + Clone> ObservableValue<T> {
    /// Creates an observable value.
    pub fn new(scheduler: &Scheduler, name: impl Into<String>, value: T) -> Self {
        Self {
            inner: Rc::new(Inner {
                value: RefCell::new(value),
                notifier: Notifier::new(scheduler, name),
            }),
        }
    }

    /// Returns a copy of the current value.
    pub fn get(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Calls a function with a reference to the current value.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.borrow())
    }

    /// Writes the value and notifies the waiters with the new value.
    pub fn set(&self, value: T) -> Result<(), SchedulingError> {
        *self.inner.value.borrow_mut() = value.clone();
        self.inner.notifier.notify_all(value)?;

        Ok(())
    }

    /// Modifies the value in place and notifies the waiters with the new
    /// value.
    pub fn modify(&self, f: impl FnOnce(&mut T)) -> Result<(), SchedulingError> {
        let value = {
            let mut value = self.inner.value.borrow_mut();
            f(&mut value);
            value.clone()
        };
        self.inner.notifier.notify_all(value)?;

        Ok(())
    }

    /// Returns an event that succeeds with the new value at the next write.
    pub fn changed(&self) -> Event {
        self.inner.notifier.wait()
    }
}

impl<T> Clone for ObservableValue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for ObservableValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableValue")
            .field("name", &self.inner.notifier.name())
            .field("value", &self.inner.value.borrow())
            .finish_non_exhaustive()
    }
}
