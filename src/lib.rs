//! # flowcore: backpressure-aware publish/subscribe
//!
//! An in-process runtime following the Reactive Streams protocol: a
//! subscriber is handed a subscription, asks for `n` items, receives at most
//! that many and then at most one terminal signal. Every publisher in this
//! crate is synchronous. Signals are delivered on the thread that raised
//! them, and nothing here spawns threads or owns an executor.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::{Arc, Mutex};
//!
//! use flowcore::prelude::*;
//!
//! let temperatures = DirectPublisher::<i32>::new();
//! let fahrenheit = DirectProcessor::transform_publisher(&temperatures, |c: i32| Ok(c * 9 / 5 + 32));
//!
//! let seen = Arc::new(Mutex::new(vec![]));
//! let c_seen = seen.clone();
//! fahrenheit.subscribe_with(UnboundedSubscriber::new(move |f: i32| c_seen.lock().unwrap().push(f)));
//!
//! temperatures.next(100);
//! assert_eq!(*seen.lock().unwrap(), vec![212]);
//! ```
//!
//! ## Key Concepts
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Publisher`] / [`Subscriber`] | The two sides of the protocol |
//! | [`Subscription`] | Demand and cancellation handle given to a subscriber |
//! | [`DirectPublisher`] | Thread-safe multicast source without buffering |
//! | [`DirectProcessor`] | Transforming stage with coalesced upstream demand |
//! | [`SwappablePublisher`] / [`FlowGate`] | Replaceable and switchable sources |
//! | [`SharedResource`] | Reference-counted resource closed by its last holder |
//!
//! [`Publisher`]: publisher::Publisher
//! [`Subscriber`]: subscriber::Subscriber
//! [`Subscription`]: subscription::Subscription
//! [`DirectPublisher`]: publisher::DirectPublisher
//! [`DirectProcessor`]: processor::DirectProcessor
//! [`SwappablePublisher`]: publisher::SwappablePublisher
//! [`FlowGate`]: gate::FlowGate
//! [`SharedResource`]: shared::SharedResource

pub mod error;
pub mod future;
pub mod gate;
pub mod multicast;
pub mod prelude;
pub mod processor;
pub mod publisher;
pub mod shared;
pub mod subscriber;
pub mod subscription;

pub(crate) mod lock;

#[cfg(test)]
pub(crate) mod testing;

pub use prelude::*;
