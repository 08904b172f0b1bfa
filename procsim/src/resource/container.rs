use std::fmt;

use crate::event::Event;
use crate::simulation::Scheduler;

use super::base::{BaseRelease, BaseRequest, BaseResource, ResourceError, ResourcePolicy};

/// Policy of a container holding a divisible amount.
#[derive(Clone, Debug)]
pub struct AmountPolicy {
    amount: u64,
}

impl AmountPolicy {
    /// Returns the amount currently held.
    pub fn amount(&self) -> u64 {
        self.amount
    }
}

impl ResourcePolicy for AmountPolicy {
    type Request = u64;
    type Release = u64;

    fn do_request(&mut self, planned: &u64) -> bool {
        match self.amount.checked_sub(*planned) {
            Some(rest) => {
                self.amount = rest;
                true
            }
            None => false,
        }
    }

    fn do_release(&mut self, amount: &u64) -> bool {
        self.amount = self.amount.saturating_add(*amount);

        true
    }
}

/// A resource holding a divisible amount.
///
/// A request reserves a planned amount. Once granted, the holder reports the
/// amount it actually used with [`ContainerRequest::consume`]; whatever is
/// left of the reservation returns to the container when the request is
/// closed or dropped. Releases add to the container unconditionally.
#[derive(Clone)]
pub struct Container {
    base: BaseResource<AmountPolicy>,
}

impl Container {
    /// Creates a container holding an initial amount.
    pub fn new(scheduler: &Scheduler, name: impl Into<String>, initial: u64) -> Self {
        Self {
            base: BaseResource::new(scheduler, name, AmountPolicy { amount: initial }),
        }
    }

    /// Returns the name of the container.
    pub fn name(&self) -> &str {
        self.base.name()
    }

    /// Returns the amount currently held.
    pub fn amount(&self) -> u64 {
        self.base.with_policy(AmountPolicy::amount)
    }

    /// Returns the number of requests waiting to be granted.
    pub fn queue_len(&self) -> usize {
        self.base.request_queue_len()
    }

    /// Requests to reserve the planned amount.
    pub fn request(
        &self,
        id: impl Into<String>,
        planned: u64,
    ) -> Result<ContainerRequest, ResourceError> {
        Ok(ContainerRequest {
            inner: self.base.request(id, planned)?,
            consumed: 0,
            is_closed: false,
        })
    }

    /// Adds an amount to the container.
    pub fn release(
        &self,
        id: impl Into<String>,
        amount: u64,
    ) -> Result<BaseRelease<AmountPolicy>, ResourceError> {
        self.base.release(id, amount)
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("name", &self.name())
            .field("amount", &self.amount())
            .finish_non_exhaustive()
    }
}

/// A reservation on a [`Container`].
pub struct ContainerRequest {
    inner: BaseRequest<AmountPolicy>,
    consumed: u64,
    is_closed: bool,
}

impl ContainerRequest {
    /// Returns the event that succeeds when the reservation is granted.
    pub fn event(&self) -> &Event {
        self.inner.event()
    }

    /// Returns `true` if the reservation was granted.
    pub fn is_granted(&self) -> bool {
        self.inner.is_granted()
    }

    /// Returns the reserved amount.
    pub fn planned(&self) -> u64 {
        *self.inner.data()
    }

    /// Returns the amount consumed so far.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Consumes part of the reservation.
    ///
    /// Consumption is cumulative and cannot exceed the planned amount.
    pub fn consume(&mut self, amount: u64) -> Result<(), ResourceError> {
        let resource = || self.inner.resource().name().to_owned();

        if !self.is_granted() {
            return Err(ResourceError::NotGranted {
                resource: resource(),
            });
        }
        let requested = self.consumed.saturating_add(amount);
        if requested > self.planned() {
            return Err(ResourceError::Overconsumption {
                resource: resource(),
                planned: self.planned(),
                requested,
            });
        }
        self.consumed = requested;

        Ok(())
    }

    /// Closes the reservation, returning the unconsumed amount to the
    /// container or withdrawing the request if it is still pending.
    pub fn close(mut self) -> Result<(), ResourceError> {
        self.finish()
    }

    fn finish(&mut self) -> Result<(), ResourceError> {
        if std::mem::replace(&mut self.is_closed, true) || !self.is_granted() {
            return Ok(());
        }
        let remainder = self.planned() - self.consumed;
        if remainder > 0 {
            self.inner
                .resource()
                .release("remainder", remainder)?
                .detach();
        }

        Ok(())
    }
}

impl AsRef<Event> for ContainerRequest {
    fn as_ref(&self) -> &Event {
        self.inner.event()
    }
}

impl Drop for ContainerRequest {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            self.inner.resource().report(e);
        }
    }
}

impl fmt::Debug for ContainerRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerRequest")
            .field("event", &self.event().id())
            .field("planned", &self.planned())
            .field("consumed", &self.consumed)
            .finish_non_exhaustive()
    }
}
