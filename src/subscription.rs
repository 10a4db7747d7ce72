//! Subscription trait and per-subscriber bookkeeping.
//!
//! A [`Subscription`] is the control handle a publisher hands to a subscriber
//! in `on_subscribe`. The subscriber pulls items with
//! [`request`](Subscription::request) and detaches with
//! [`cancel`](Subscription::cancel).

use std::sync::Arc;

use once_cell::sync::Lazy;

pub mod deferred;
pub mod subscribed;
pub mod subscribed_list;

pub use deferred::DeferredSubscription;
pub use subscribed::Subscribed;
pub use subscribed_list::SubscribedList;

/// Control handle for one publisher/subscriber attachment.
///
/// Both methods take `&self` and may be called from any thread, including from
/// inside the subscriber's own callbacks.
pub trait Subscription: Send + Sync {
  /// Asks for `n` more items. `n` must be positive; zero or negative amounts
  /// terminate the subscription with [`FlowError::NonPositiveRequest`].
  ///
  /// [`FlowError::NonPositiveRequest`]: crate::error::FlowError::NonPositiveRequest
  fn request(&self, n: i64);

  /// Stops delivery to the subscriber. Idempotent.
  fn cancel(&self);
}

/// Shared, type-erased subscription handle.
pub type SubscriptionRef = Arc<dyn Subscription>;

/// Subscription whose `request` and `cancel` do nothing.
///
/// Handed out by publishers that terminate a subscriber immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSubscription;

static NOOP: Lazy<SubscriptionRef> = Lazy::new(|| Arc::new(NoopSubscription));

impl NoopSubscription {
  /// Returns the process-wide no-op handle.
  #[inline]
  pub fn shared() -> SubscriptionRef { NOOP.clone() }
}

impl Subscription for NoopSubscription {
  #[inline]
  fn request(&self, _n: i64) {}

  #[inline]
  fn cancel(&self) {}
}
