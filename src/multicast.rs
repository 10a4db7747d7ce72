//! Fan-out engines shared by the publishers.
//!
//! - [`Multicaster`]: one source, N subscribers, each pulling at its own rate.
//!   Backs [`DirectPublisher`](crate::publisher::DirectPublisher).
//! - [`Distributor`]: N subscribers sharing one upstream subscription, whose
//!   demand is coalesced into a single upstream request stream. Backs
//!   [`DirectProcessor`](crate::processor::DirectProcessor).

pub mod distributor;
pub mod multicaster;

pub use distributor::Distributor;
pub use multicaster::Multicaster;
