//! Prelude module for convenient imports
//!
//! This module re-exports commonly used types and traits for easy access.

// Errors
pub use crate::error::{BoxError, ClosedError, FlowError};
// Futures
pub use crate::future::{
  collect, subscribe_with_limit, to_list, when_condition_or_complete, CollectingSubscriber,
  Collector, LimitCollector, ListCollector, PredicateCollector, ResultFuture,
};
// Gate
pub use crate::gate::FlowGate;
// Multicast
pub use crate::multicast::{Distributor, Multicaster};
// Processor
pub use crate::processor::DirectProcessor;
// Publishers
pub use crate::publisher::{
  CloseablePublisher, DeferredPublisher, DirectPublisher, Publisher, PublisherExt, PublisherRef,
  SwappablePublisher, TerminalPublisher,
};
// Shared resources
pub use crate::shared::{Closeable, Held, Holder, Key, SharedResource, SharedView};
// Subscriber
pub use crate::subscriber::{BoxedSubscriber, DynSubscriber, Subscriber, UnboundedSubscriber};
// Subscription
pub use crate::subscription::{
  DeferredSubscription, NoopSubscription, Subscribed, SubscribedList, Subscription,
  SubscriptionRef,
};
