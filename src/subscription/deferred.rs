use std::sync::Mutex;

use log::{trace, warn};
use once_cell::sync::OnceCell;

use crate::{
  error::FlowError,
  lock::MutexExt,
  subscription::{Subscription, SubscriptionRef},
};

/// A subscription that can be handed out before the real upstream exists.
///
/// `request` and `cancel` are buffered until [`set`](Self::set) attaches the
/// upstream, which can happen only once. From then on every call passes
/// straight through without locking.
#[derive(Default)]
pub struct DeferredSubscription {
  upstream: OnceCell<SubscriptionRef>,
  pending: Mutex<Pending>,
}

#[derive(Default)]
struct Pending {
  requests: i64,
  violation: Option<i64>,
  cancelled: bool,
}

impl DeferredSubscription {
  pub fn new() -> Self { Self::default() }

  pub fn is_set(&self) -> bool { self.upstream.get().is_some() }

  /// Attaches the upstream and replays what was buffered: the cancellation if
  /// there was one, otherwise the summed request amount.
  ///
  /// Fails with [`FlowError::SubscriptionAlreadySet`] if an upstream is
  /// already attached. The rejected `subscription` is left untouched.
  pub fn set(&self, subscription: SubscriptionRef) -> Result<(), FlowError> {
    let pending = {
      let mut pending = self.pending.guard();
      if self.upstream.set(subscription.clone()).is_err() {
        warn!("deferred subscription already has an upstream");
        return Err(FlowError::SubscriptionAlreadySet);
      }
      std::mem::take(&mut *pending)
    };
    if pending.cancelled {
      subscription.cancel();
    } else if let Some(n) = pending.violation {
      subscription.request(n);
    } else if pending.requests > 0 {
      trace!("replaying {} buffered requests upstream", pending.requests);
      subscription.request(pending.requests);
    }
    Ok(())
  }
}

impl Subscription for DeferredSubscription {
  fn request(&self, n: i64) {
    if let Some(upstream) = self.upstream.get() {
      return upstream.request(n);
    }
    let mut pending = self.pending.guard();
    if let Some(upstream) = self.upstream.get() {
      drop(pending);
      return upstream.request(n);
    }
    if pending.cancelled {
      return;
    }
    if n <= 0 {
      // Forwarded on attach so the upstream reports the violation.
      pending.violation.get_or_insert(n);
    } else {
      pending.requests = pending.requests.saturating_add(n);
    }
  }

  fn cancel(&self) {
    if let Some(upstream) = self.upstream.get() {
      return upstream.cancel();
    }
    let mut pending = self.pending.guard();
    if let Some(upstream) = self.upstream.get() {
      drop(pending);
      return upstream.cancel();
    }
    pending.cancelled = true;
  }
}
