//! Shared resources.
//!
//! A resource arbitrates access to a limited quantity between processes.
//! Processes issue *requests* and *releases*, each represented by an event
//! that succeeds once the resource grants it. Pending requests and releases
//! are granted strictly in FIFO order: a pending item that cannot be granted
//! yet blocks all items queued behind it.
//!
//! * [`BaseResource`] implements the queueing discipline for any
//!   [`ResourcePolicy`],
//! * [`Resource`] is a slot-based resource with an optional capacity,
//! * [`Container`] holds a divisible amount from which requests draw.
//!
//! Request and release handles are scoped: dropping a handle whose event is
//! still pending withdraws it from the queue, and dropping a granted request
//! gives the resource back.
//!
//! # Example
//!
//! ```
//! use procsim::coroutine::BoxError;
//! use procsim::resource::Resource;
//! use procsim::simulation::Env;
//!
//! let mut env = Env::new();
//! let pump = Resource::new(&env.scheduler(), "pump", 1);
//!
//! for car in 0..3u64 {
//!     let pump = pump.clone();
//!     env.process(format!("car-{car}"), move |cx| async move {
//!         let request = pump.request("fill")?;
//!         cx.wait(&request).await?;
//!         cx.wait(cx.timeout(5)?).await?;
//!         pump.release("done", request)?;
//!         Ok::<_, BoxError>(cx.now())
//!     })
//!     .unwrap();
//! }
//!
//! assert_eq!(env.run().unwrap(), 15);
//! ```
mod base;
mod container;
mod slot;

pub use base::{BaseRelease, BaseRequest, BaseResource, ResourceError, ResourcePolicy};
pub use container::{AmountPolicy, Container, ContainerRequest};
pub use slot::{Resource, ResourceRequest, SlotPolicy};
