//! Publisher trait and the concrete publishers.
//!
//! | Publisher | Behavior |
//! |---|---|
//! | [`DirectPublisher`] | Hot, synchronous multicast; items go only to current subscribers. |
//! | [`TerminalPublisher`] | Completes or fails every subscriber immediately. |
//! | [`DeferredPublisher`] | Queues subscribers until the real publisher is known. |
//! | [`SwappablePublisher`] | Replaces its upstream while subscribers stay attached. |

use std::sync::Arc;

use crate::subscriber::{BoxedSubscriber, Subscriber};

pub mod deferred;
pub mod direct;
pub mod swappable;
pub mod terminal;

pub use deferred::{DeferredPublisher, Resolve};
pub use direct::DirectPublisher;
pub use swappable::SwappablePublisher;
pub use terminal::TerminalPublisher;

/// Source of values that subscribers attach to.
///
/// Every implementation delivers exactly one `on_subscribe` to the attached
/// subscriber before any other signal.
pub trait Publisher<T>: Send + Sync {
  fn subscribe(&self, subscriber: BoxedSubscriber<T>);
}

/// Shared, type-erased publisher.
pub type PublisherRef<T> = Arc<dyn Publisher<T>>;

/// Convenience methods available on every publisher.
pub trait PublisherExt<T>: Publisher<T> {
  /// Boxes `subscriber` and attaches it.
  fn subscribe_with<S>(&self, subscriber: S)
  where
    S: Subscriber<T> + Send + 'static,
  {
    self.subscribe(Box::new(subscriber))
  }
}

impl<T, P: Publisher<T> + ?Sized> PublisherExt<T> for P {}

/// A publisher its owner can terminate explicitly.
pub trait CloseablePublisher<T>: Publisher<T> {
  /// Completes all current and future subscribers. Idempotent.
  fn close(&self);
}

impl<T, P: Publisher<T> + ?Sized> Publisher<T> for Arc<P> {
  #[inline]
  fn subscribe(&self, subscriber: BoxedSubscriber<T>) { (**self).subscribe(subscriber) }
}
