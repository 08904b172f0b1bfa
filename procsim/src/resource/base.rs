use std::cell::RefCell;
use std::collections::VecDeque;
use std::error::Error;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::event::{Event, Outcome};
use crate::simulation::{ExecutionError, Priority, Scheduler, SchedulingError};

/// The admission rules of a resource.
///
/// A policy decides whether the request or release at the head of its queue
/// can be granted and, if so, updates the resource state accordingly.
pub trait ResourcePolicy: 'static {
    /// Data attached to a request.
    type Request: Clone + 'static;
    /// Data attached to a release.
    type Release: 'static;

    /// Grants the request if possible and returns `true` if it was granted.
    fn do_request(&mut self, request: &Self::Request) -> bool;

    /// Applies the release if possible and returns `true` if it was applied.
    fn do_release(&mut self, release: &Self::Release) -> bool;
}

struct Pending<T> {
    event: Event,
    data: T,
}

struct Queues<P: ResourcePolicy> {
    policy: P,
    requests: VecDeque<Pending<P::Request>>,
    releases: VecDeque<Pending<P::Release>>,
}

struct Shared<P: ResourcePolicy> {
    name: String,
    scheduler: Scheduler,
    queues: RefCell<Queues<P>>,
}

impl<P: ResourcePolicy> Shared<P> {
    /// Grants pending requests in FIFO order until one cannot be granted.
    fn dispatch_requests(&self) -> Result<(), ResourceError> {
        loop {
            let granted = {
                let mut queues = self.queues.borrow_mut();
                let queues = &mut *queues;
                let Some(head) = queues.requests.front() else {
                    break;
                };
                if head.event.is_triggered() {
                    return Err(self.queue_invariant(&head.event));
                }
                if !queues.policy.do_request(&head.data) {
                    break;
                }
                queues.requests.pop_front()
            };
            if let Some(granted) = granted {
                granted.event.resolve(Outcome::Ok(None), Priority::Normal, 0)?;
            }
        }

        Ok(())
    }

    /// Applies pending releases in FIFO order until one cannot be applied.
    fn dispatch_releases(&self) -> Result<(), ResourceError> {
        loop {
            let applied = {
                let mut queues = self.queues.borrow_mut();
                let queues = &mut *queues;
                let Some(head) = queues.releases.front() else {
                    break;
                };
                if head.event.is_triggered() {
                    return Err(self.queue_invariant(&head.event));
                }
                if !queues.policy.do_release(&head.data) {
                    break;
                }
                queues.releases.pop_front()
            };
            if let Some(applied) = applied {
                applied.event.resolve(Outcome::Ok(None), Priority::Normal, 0)?;
            }
        }

        Ok(())
    }

    /// Runs a dispatch from a context that cannot propagate errors.
    fn retry(&self, dispatch: fn(&Self) -> Result<(), ResourceError>) {
        if let Err(e) = dispatch(self) {
            self.report(e);
        }
    }

    fn report(&self, error: ResourceError) {
        #[cfg(feature = "tracing")]
        tracing::warn!(resource = %self.name, error = %error, "resource dispatch failed");

        self.scheduler.abort(ExecutionError::Resource(error));
    }

    fn queue_invariant(&self, event: &Event) -> ResourceError {
        ResourceError::QueueInvariant {
            resource: self.name.clone(),
            event: event.id().to_owned(),
        }
    }
}

/// A resource with FIFO request and release queues governed by a
/// [`ResourcePolicy`].
///
/// Granting a request retries the pending releases, and applying a release
/// retries the pending requests, until neither queue can make progress.
pub struct BaseResource<P: ResourcePolicy> {
    shared: Rc<Shared<P>>,
}

impl<P: ResourcePolicy> BaseResource<P> {
    /// Creates a resource with the specified policy.
    pub fn new(scheduler: &Scheduler, name: impl Into<String>, policy: P) -> Self {
        Self {
            shared: Rc::new(Shared {
                name: name.into(),
                scheduler: scheduler.clone(),
                queues: RefCell::new(Queues {
                    policy,
                    requests: VecDeque::new(),
                    releases: VecDeque::new(),
                }),
            }),
        }
    }

    /// Returns the name of the resource.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Gives read access to the policy state.
    pub fn with_policy<R>(&self, f: impl FnOnce(&P) -> R) -> R {
        f(&self.shared.queues.borrow().policy)
    }

    /// Returns the number of pending requests.
    pub fn request_queue_len(&self) -> usize {
        self.shared.queues.borrow().requests.len()
    }

    /// Returns the number of pending releases.
    pub fn release_queue_len(&self) -> usize {
        self.shared.queues.borrow().releases.len()
    }

    /// Returns `true` if both handles refer to the same resource.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }

    /// Enqueues a request and grants as many pending requests as possible.
    pub fn request(
        &self,
        id: impl Into<String>,
        data: P::Request,
    ) -> Result<BaseRequest<P>, ResourceError> {
        let event = self.shared.scheduler.event(id);
        self.shared.queues.borrow_mut().requests.push_back(Pending {
            event: event.clone(),
            data: data.clone(),
        });
        let shared = Rc::downgrade(&self.shared);
        event.add_callback(move |_| retry(&shared, Shared::dispatch_releases));

        let request = BaseRequest {
            resource: self.clone(),
            event,
            data,
        };
        self.shared.dispatch_requests()?;

        Ok(request)
    }

    /// Enqueues a release and applies as many pending releases as possible.
    pub fn release(
        &self,
        id: impl Into<String>,
        data: P::Release,
    ) -> Result<BaseRelease<P>, ResourceError> {
        let event = self.shared.scheduler.event(id);
        self.shared.queues.borrow_mut().releases.push_back(Pending {
            event: event.clone(),
            data,
        });
        let shared = Rc::downgrade(&self.shared);
        event.add_callback(move |_| retry(&shared, Shared::dispatch_requests));

        let release = BaseRelease {
            resource: self.clone(),
            event,
            is_armed: true,
        };
        self.shared.dispatch_releases()?;

        Ok(release)
    }

    /// Reports an error that cannot be propagated to the caller.
    pub(crate) fn report(&self, error: ResourceError) {
        self.shared.report(error);
    }

    fn withdraw_request(&self, event: &Event) {
        self.shared
            .queues
            .borrow_mut()
            .requests
            .retain(|pending| !pending.event.ptr_eq(event));
        self.shared.retry(Shared::dispatch_requests);
    }

    fn withdraw_release(&self, event: &Event) {
        self.shared
            .queues
            .borrow_mut()
            .releases
            .retain(|pending| !pending.event.ptr_eq(event));
        self.shared.retry(Shared::dispatch_releases);
    }
}

fn retry<P: ResourcePolicy>(
    shared: &Weak<Shared<P>>,
    dispatch: fn(&Shared<P>) -> Result<(), ResourceError>,
) {
    if let Some(shared) = shared.upgrade() {
        shared.retry(dispatch);
    }
}

impl<P: ResourcePolicy> Clone for BaseResource<P> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<P: ResourcePolicy> fmt::Debug for BaseResource<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseResource")
            .field("name", &self.shared.name)
            .field("requests", &self.request_queue_len())
            .field("releases", &self.release_queue_len())
            .finish_non_exhaustive()
    }
}

/// A request issued to a [`BaseResource`].
///
/// Dropping a pending request withdraws it from the request queue.
pub struct BaseRequest<P: ResourcePolicy> {
    resource: BaseResource<P>,
    event: Event,
    data: P::Request,
}

impl<P: ResourcePolicy> BaseRequest<P> {
    /// Returns the event that succeeds when the request is granted.
    pub fn event(&self) -> &Event {
        &self.event
    }

    /// Returns the data attached to the request.
    pub fn data(&self) -> &P::Request {
        &self.data
    }

    /// Returns `true` if the request was granted.
    pub fn is_granted(&self) -> bool {
        self.event.is_ok()
    }

    /// Returns the resource the request was issued to.
    pub fn resource(&self) -> &BaseResource<P> {
        &self.resource
    }
}

impl<P: ResourcePolicy> AsRef<Event> for BaseRequest<P> {
    fn as_ref(&self) -> &Event {
        &self.event
    }
}

impl<P: ResourcePolicy> Drop for BaseRequest<P> {
    fn drop(&mut self) {
        if !self.event.is_triggered() {
            self.resource.withdraw_request(&self.event);
        }
    }
}

impl<P: ResourcePolicy> fmt::Debug for BaseRequest<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseRequest")
            .field("resource", &self.resource.name())
            .field("event", &self.event.id())
            .field("is_granted", &self.is_granted())
            .finish_non_exhaustive()
    }
}

/// A release issued to a [`BaseResource`].
///
/// Dropping a pending release withdraws it from the release queue unless it
/// was [detached](BaseRelease::detach).
pub struct BaseRelease<P: ResourcePolicy> {
    resource: BaseResource<P>,
    event: Event,
    is_armed: bool,
}

impl<P: ResourcePolicy> BaseRelease<P> {
    /// Returns the event that succeeds when the release is applied.
    pub fn event(&self) -> &Event {
        &self.event
    }

    /// Returns `true` if the release was applied.
    pub fn is_applied(&self) -> bool {
        self.event.is_ok()
    }

    /// Leaves the release in the queue regardless of this handle.
    pub fn detach(mut self) {
        self.is_armed = false;
    }
}

impl<P: ResourcePolicy> AsRef<Event> for BaseRelease<P> {
    fn as_ref(&self) -> &Event {
        &self.event
    }
}

impl<P: ResourcePolicy> Drop for BaseRelease<P> {
    fn drop(&mut self) {
        if self.is_armed && !self.event.is_triggered() {
            self.resource.withdraw_release(&self.event);
        }
    }
}

impl<P: ResourcePolicy> fmt::Debug for BaseRelease<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseRelease")
            .field("resource", &self.resource.name())
            .field("event", &self.event.id())
            .field("is_applied", &self.is_applied())
            .finish_non_exhaustive()
    }
}

/// Error returned by resource operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResourceError {
    /// A queued request or release was found already triggered.
    QueueInvariant {
        /// Name of the resource.
        resource: String,
        /// Identifier of the offending event.
        event: String,
    },
    /// The request was issued to another resource.
    ForeignRequest {
        /// Name of the resource.
        resource: String,
    },
    /// The operation requires a granted request.
    NotGranted {
        /// Name of the resource.
        resource: String,
    },
    /// More was consumed than the request had reserved.
    Overconsumption {
        /// Name of the resource.
        resource: String,
        /// Reserved amount.
        planned: u64,
        /// Total amount the consumption would reach.
        requested: u64,
    },
    /// The grant event could not be scheduled.
    Scheduling(SchedulingError),
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueInvariant { resource, event } => write!(
                f,
                "resource '{resource}': queued event '{event}' was triggered outside of the resource"
            ),
            Self::ForeignRequest { resource } => {
                write!(f, "resource '{resource}': the request belongs to another resource")
            }
            Self::NotGranted { resource } => {
                write!(f, "resource '{resource}': the request has not been granted")
            }
            Self::Overconsumption {
                resource,
                planned,
                requested,
            } => write!(
                f,
                "resource '{resource}': cannot consume {requested} out of a planned {planned}"
            ),
            Self::Scheduling(e) => e.fmt(f),
        }
    }
}

impl Error for ResourceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Scheduling(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SchedulingError> for ResourceError {
    fn from(e: SchedulingError) -> Self {
        Self::Scheduling(e)
    }
}
