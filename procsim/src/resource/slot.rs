use std::fmt;

use crate::event::Event;
use crate::simulation::Scheduler;

use super::base::{BaseRelease, BaseRequest, BaseResource, ResourceError, ResourcePolicy};

/// Policy of a slot-based resource.
#[derive(Clone, Debug)]
pub struct SlotPolicy {
    capacity: Option<usize>,
    users: usize,
}

impl SlotPolicy {
    /// Returns the number of slots, if bounded.
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Returns the number of slots in use.
    pub fn users(&self) -> usize {
        self.users
    }
}

impl ResourcePolicy for SlotPolicy {
    type Request = ();
    /// Whether the release frees a slot.
    type Release = bool;

    fn do_request(&mut self, _: &()) -> bool {
        if self.capacity.map_or(true, |capacity| self.users < capacity) {
            self.users += 1;
            return true;
        }

        false
    }

    fn do_release(&mut self, frees_slot: &bool) -> bool {
        if *frees_slot {
            self.users = self.users.saturating_sub(1);
        }

        true
    }
}

/// A resource with a number of identical slots.
///
/// Each granted request occupies one slot until it is released.
#[derive(Clone)]
pub struct Resource {
    base: BaseResource<SlotPolicy>,
}

impl Resource {
    /// Creates a resource with the specified number of slots.
    pub fn new(scheduler: &Scheduler, name: impl Into<String>, capacity: usize) -> Self {
        Self::with_capacity(scheduler, name, Some(capacity))
    }

    /// Creates a resource with an unlimited number of slots.
    pub fn unbounded(scheduler: &Scheduler, name: impl Into<String>) -> Self {
        Self::with_capacity(scheduler, name, None)
    }

    fn with_capacity(scheduler: &Scheduler, name: impl Into<String>, capacity: Option<usize>) -> Self {
        let policy = SlotPolicy { capacity, users: 0 };

        Self {
            base: BaseResource::new(scheduler, name, policy),
        }
    }

    /// Returns the name of the resource.
    pub fn name(&self) -> &str {
        self.base.name()
    }

    /// Returns the number of slots, if bounded.
    pub fn capacity(&self) -> Option<usize> {
        self.base.with_policy(SlotPolicy::capacity)
    }

    /// Returns the number of slots in use.
    pub fn count(&self) -> usize {
        self.base.with_policy(SlotPolicy::users)
    }

    /// Returns the number of requests waiting for a slot.
    pub fn queue_len(&self) -> usize {
        self.base.request_queue_len()
    }

    /// Requests a slot.
    ///
    /// The request event succeeds once a slot is assigned to the request.
    pub fn request(&self, id: impl Into<String>) -> Result<ResourceRequest, ResourceError> {
        Ok(ResourceRequest {
            inner: self.base.request(id, ())?,
            is_closed: false,
        })
    }

    /// Gives a slot back, or withdraws the request if it is still pending.
    pub fn release(
        &self,
        id: impl Into<String>,
        mut request: ResourceRequest,
    ) -> Result<BaseRelease<SlotPolicy>, ResourceError> {
        if !request.inner.resource().ptr_eq(&self.base) {
            return Err(ResourceError::ForeignRequest {
                resource: self.name().to_owned(),
            });
        }
        let frees_slot = request.is_granted();
        request.is_closed = true;
        drop(request);

        self.base.release(id, frees_slot)
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("name", &self.name())
            .field("capacity", &self.capacity())
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}

/// A slot request.
///
/// Dropping a granted request that was not released gives its slot back.
pub struct ResourceRequest {
    inner: BaseRequest<SlotPolicy>,
    is_closed: bool,
}

impl ResourceRequest {
    /// Returns the event that succeeds when a slot is assigned.
    pub fn event(&self) -> &Event {
        self.inner.event()
    }

    /// Returns `true` if a slot was assigned.
    pub fn is_granted(&self) -> bool {
        self.inner.is_granted()
    }
}

impl AsRef<Event> for ResourceRequest {
    fn as_ref(&self) -> &Event {
        self.inner.event()
    }
}

impl Drop for ResourceRequest {
    fn drop(&mut self) {
        if self.is_closed || !self.inner.is_granted() {
            return;
        }
        match self.inner.resource().release("release", true) {
            Ok(release) => release.detach(),
            Err(e) => self.inner.resource().report(e),
        }
    }
}

impl fmt::Debug for ResourceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRequest")
            .field("event", &self.event().id())
            .field("is_granted", &self.is_granted())
            .finish_non_exhaustive()
    }
}
