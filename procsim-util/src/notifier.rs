//! Broadcast signals.
//!
//! A [`Notifier`] hands out one fresh event to each waiter and succeeds the
//! pending ones on demand, either all at once or one at a time in the order
//! they started waiting. Notifications are scheduled at the current
//! simulation time, so waiters notified together resume in the order they
//! registered.
use std::any::Any;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use procsim::event::Event;
use procsim::simulation::{Priority, Scheduler, SchedulingError};

struct Inner {
    name: String,
    scheduler: Scheduler,
    priority: Priority,
    waiters: RefCell<VecDeque<Event>>,
}

/// A signal that wakes all or one of its waiters.
///
/// Cloning a notifier yields another handle to the same set of waiters.
#[derive(Clone)]
pub struct Notifier {
    inner: Rc<Inner>,
}

impl Notifier {
    /// Creates a notifier whose notifications have [`Priority::Normal`].
    pub fn new(scheduler: &Scheduler, name: impl Into<String>) -> Self {
        Self::with_priority(scheduler, name, Priority::Normal)
    }

    /// Creates a notifier whose notifications have the specified priority.
    pub fn with_priority(
        scheduler: &Scheduler,
        name: impl Into<String>,
        priority: Priority,
    ) -> Self {
        Self {
            inner: Rc::new(Inner {
                name: name.into(),
                scheduler: scheduler.clone(),
                priority,
                waiters: RefCell::new(VecDeque::new()),
            }),
        }
    }

    /// Returns the name of the notifier.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns a fresh event that succeeds with the value of the next
    /// notification that reaches it.
    pub fn wait(&self) -> Event {
        let event = self.inner.scheduler.event(self.inner.name.clone());
        self.inner.waiters.borrow_mut().push_back(event.clone());

        event
    }

    /// Stops waiting on an event obtained from [`Notifier::wait`].
    ///
    /// Returns `true` if the event was still waiting.
    pub fn cancel(&self, event: &Event) -> bool {
        let mut waiters = self.inner.waiters.borrow_mut();
        let len = waiters.len();
        waiters.retain(|waiter| !waiter.ptr_eq(event));

        waiters.len() != len
    }

    /// Returns the number of events waiting for a notification.
    pub fn waiting(&self) -> usize {
        self.inner
            .waiters
            .borrow()
            .iter()
            .filter(|waiter| !waiter.is_triggered())
            .count()
    }

    /// Notifies all waiters with a copy of the value.
    ///
    /// Returns the number of waiters notified.
    pub fn notify_all<T: Any + Clone>(&self, value: T) -> Result<usize, SchedulingError> {
        let waiters = std::mem::take(&mut *self.inner.waiters.borrow_mut());

        let mut count = 0;
        for waiter in waiters {
            // Waiters may have been triggered by other means.
            if waiter.is_triggered() {
                continue;
            }
            waiter.succeed_with_priority(value.clone(), self.inner.priority)?;
            count += 1;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(notifier = %self.inner.name, waiters = count, "notified all");

        Ok(count)
    }

    /// Notifies the longest-waiting waiter.
    ///
    /// Returns `false` if there was no waiter.
    pub fn notify_one<T: Any>(&self, value: T) -> Result<bool, SchedulingError> {
        let waiter = {
            let mut waiters = self.inner.waiters.borrow_mut();
            loop {
                match waiters.pop_front() {
                    Some(waiter) if waiter.is_triggered() => continue,
                    other => break other,
                }
            }
        };

        match waiter {
            Some(waiter) => {
                waiter.succeed_with_priority(value, self.inner.priority)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("name", &self.inner.name)
            .field("priority", &self.inner.priority)
            .field("waiting", &self.waiting())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use procsim::coroutine::BoxError;
    use procsim::simulation::Env;

    use super::*;

    fn spawn_waiters(env: &Env, notifier: &Notifier, log: &Rc<RefCell<Vec<(usize, u32)>>>) {
        for i in 0..3 {
            let notifier = notifier.clone();
            let log = log.clone();
            env.process(format!("waiter-{i}"), move |cx| async move {
                let value = cx.wait(notifier.wait()).await?;
                let value = value.and_then(|v| v.downcast_ref::<u32>().copied());
                log.borrow_mut().push((i, value.unwrap_or_default()));
                Ok::<_, BoxError>(())
            })
            .unwrap();
        }
    }

    #[test]
    fn notifier_wakes_all_in_order() {
        let mut env = Env::new();
        let notifier = Notifier::new(&env.scheduler(), "ready");
        let log = Rc::new(RefCell::new(Vec::new()));
        spawn_waiters(&env, &notifier, &log);

        env.run().unwrap();
        assert_eq!(notifier.waiting(), 3);

        assert_eq!(notifier.notify_all(7u32).unwrap(), 3);
        env.run().unwrap();
        assert_eq!(*log.borrow(), [(0, 7), (1, 7), (2, 7)]);
        assert_eq!(notifier.waiting(), 0);
    }

    #[test]
    fn notifier_wakes_one_at_a_time() {
        let mut env = Env::new();
        let notifier = Notifier::new(&env.scheduler(), "ready");
        let log = Rc::new(RefCell::new(Vec::new()));
        spawn_waiters(&env, &notifier, &log);
        env.run().unwrap();

        assert!(notifier.notify_one(1u32).unwrap());
        assert!(notifier.notify_one(2u32).unwrap());
        env.run().unwrap();
        assert_eq!(*log.borrow(), [(0, 1), (1, 2)]);

        assert!(notifier.notify_one(3u32).unwrap());
        assert!(!notifier.notify_one(4u32).unwrap());
        env.run().unwrap();
        assert_eq!(log.borrow().last(), Some(&(2, 3)));
    }

    #[test]
    fn notifier_skips_cancelled_and_triggered_waiters() {
        let mut env = Env::new();
        let notifier = Notifier::new(&env.scheduler(), "ready");

        let cancelled = notifier.wait();
        let triggered = notifier.wait();
        let waiting = notifier.wait();
        assert!(notifier.cancel(&cancelled));
        assert!(!notifier.cancel(&cancelled));
        triggered.succeed(()).unwrap();

        assert_eq!(notifier.waiting(), 1);
        assert!(notifier.notify_one("go").unwrap());
        env.run().unwrap();

        assert!(!cancelled.is_triggered());
        assert_eq!(waiting.value_as::<&str>(), Some("go"));
    }

    #[test]
    fn notifier_priority_applies_to_notifications() {
        let mut env = Env::new();
        let scheduler = env.scheduler();
        let urgent = Notifier::with_priority(&scheduler, "urgent", Priority::Urgent);
        let order = Rc::new(RefCell::new(Vec::new()));

        let regular = env.event("regular");
        {
            let order = order.clone();
            regular.add_callback(move |_| order.borrow_mut().push("regular"));
        }
        let signal = urgent.wait();
        {
            let order = order.clone();
            signal.add_callback(move |_| order.borrow_mut().push("urgent"));
        }

        regular.succeed(()).unwrap();
        urgent.notify_all(()).unwrap();
        env.run().unwrap();
        assert_eq!(*order.borrow(), ["urgent", "regular"]);
    }
}
