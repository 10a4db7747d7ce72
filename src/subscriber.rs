//! Subscriber trait and implementations
//!
//! A subscriber receives, in order: exactly one `on_subscribe`, zero or more
//! `on_next` bounded by what it requested, then at most one of `on_error` or
//! `on_complete`. The terminal callbacks consume the subscriber, so the type
//! system rules out any signal after termination.

use crate::{error::FlowError, subscription::SubscriptionRef};

// ============================================================================
// Subscriber Trait
// ============================================================================

/// Consumer side of a publisher/subscriber attachment.
pub trait Subscriber<T> {
  /// Receives the control handle. Always the first signal.
  ///
  /// An end subscriber attached again while still holding a subscription
  /// keeps the newest one: the previous subscription is cancelled and demand
  /// is issued on the new one. [`UnboundedSubscriber`] and
  /// [`CollectingSubscriber`](crate::future::CollectingSubscriber) both follow
  /// this. A processor keeps its first upstream instead, since its downstream
  /// demand is already bound to it.
  fn on_subscribe(&mut self, subscription: SubscriptionRef);

  /// Receives one requested item.
  fn on_next(&mut self, value: T);

  /// Terminal failure. Consumes the subscriber.
  fn on_error(self, err: FlowError);

  /// Terminal success. Consumes the subscriber.
  fn on_complete(self);
}

// ============================================================================
// DynSubscriber Trait - Object-safe Subscriber
// ============================================================================

/// Object-safe mirror of [`Subscriber`].
///
/// `Subscriber` consumes `self` in its terminal callbacks, which a vtable
/// cannot express. `DynSubscriber` takes `Box<Self>` instead so publishers can
/// store heterogeneous subscribers.
pub trait DynSubscriber<T> {
  fn box_on_subscribe(&mut self, subscription: SubscriptionRef);
  fn box_on_next(&mut self, value: T);
  fn box_on_error(self: Box<Self>, err: FlowError);
  fn box_on_complete(self: Box<Self>);
}

impl<T, S> DynSubscriber<T> for S
where
  S: Subscriber<T>,
{
  #[inline]
  fn box_on_subscribe(&mut self, subscription: SubscriptionRef) { self.on_subscribe(subscription) }

  #[inline]
  fn box_on_next(&mut self, value: T) { self.on_next(value) }

  #[inline]
  fn box_on_error(self: Box<Self>, err: FlowError) { (*self).on_error(err) }

  #[inline]
  fn box_on_complete(self: Box<Self>) { (*self).on_complete() }
}

/// Boxed, thread-transferable subscriber. The unit every publisher stores.
pub type BoxedSubscriber<T> = Box<dyn DynSubscriber<T> + Send>;

impl<T> Subscriber<T> for BoxedSubscriber<T> {
  #[inline]
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    (**self).box_on_subscribe(subscription)
  }

  #[inline]
  fn on_next(&mut self, value: T) { (**self).box_on_next(value) }

  #[inline]
  fn on_error(self, err: FlowError) { self.box_on_error(err) }

  #[inline]
  fn on_complete(self) { self.box_on_complete() }
}

// ============================================================================
// UnboundedSubscriber - Closure adapter
// ============================================================================

/// Subscriber that requests `i64::MAX` items and hands each to a closure.
///
/// Terminal signals are ignored. Re-attaching follows
/// [`Subscriber::on_subscribe`].
///
/// ```rust
/// use std::sync::{Arc, Mutex};
///
/// use flowcore::prelude::*;
///
/// let publisher = DirectPublisher::<i32>::new();
/// let seen = Arc::new(Mutex::new(vec![]));
/// let c_seen = seen.clone();
/// publisher.subscribe_with(UnboundedSubscriber::new(move |v: i32| c_seen.lock().unwrap().push(v)));
///
/// publisher.next(1);
/// publisher.next(2);
/// assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
/// ```
pub struct UnboundedSubscriber<F> {
  on_next: F,
  subscription: Option<SubscriptionRef>,
}

impl<F> UnboundedSubscriber<F> {
  pub fn new(on_next: F) -> Self { Self { on_next, subscription: None } }
}

impl<T, F> Subscriber<T> for UnboundedSubscriber<F>
where
  F: FnMut(T),
{
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    if let Some(previous) = self.subscription.replace(subscription.clone()) {
      previous.cancel();
    }
    subscription.request(i64::MAX);
  }

  #[inline]
  fn on_next(&mut self, value: T) { (self.on_next)(value) }

  fn on_error(self, _err: FlowError) {}

  fn on_complete(self) {}
}
