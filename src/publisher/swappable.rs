//! Publisher whose upstream source can be replaced under live subscribers.
//!
//! Each downstream subscriber is bound to a [`Link`]: its own [`Subscribed`]
//! accounting plus a slot for the subscription it currently holds on the
//! upstream. Swapping the upstream bumps an epoch, cancels every link's old
//! upstream subscription and subscribes a fresh forwarder per link to the new
//! upstream. When the new upstream grants its subscription, the forwarder
//! replays the downstream's outstanding requests onto it, so nothing that was
//! requested and not yet delivered is lost in the handover.
//!
//! State machine: `Detached` -> `Attached(publisher)` -> `Terminated`. A
//! terminated swappable publisher ignores further swaps. A downstream that has
//! seen `complete` or `error` is retired and never attached again.

use std::{
  fmt, mem,
  sync::{Arc, Mutex, Weak},
};

use log::{debug, trace};

use crate::{
  error::FlowError,
  lock::MutexExt,
  publisher::{CloseablePublisher, Publisher, PublisherRef, TerminalPublisher},
  subscriber::{BoxedSubscriber, Subscriber},
  subscription::{Subscribed, Subscription, SubscriptionRef},
};

/// Publisher that forwards from a replaceable upstream.
///
/// [`set_publisher`](Self::set_publisher) and
/// [`remove_publisher`](Self::remove_publisher) must not race each other;
/// items and requests flowing through an attached upstream are thread-safe.
pub struct SwappablePublisher<T> {
  shared: Arc<SwapShared<T>>,
}

struct SwapShared<T> {
  state: Mutex<SwapState<T>>,
}

struct SwapState<T> {
  upstream: Upstream<T>,
  links: Vec<Arc<Link<T>>>,
  epoch: u64,
}

enum Upstream<T> {
  Detached,
  Attached(PublisherRef<T>),
  Terminated(TerminalPublisher),
}

impl<T> Clone for SwappablePublisher<T> {
  fn clone(&self) -> Self { SwappablePublisher { shared: self.shared.clone() } }
}

impl<T: Send + 'static> Default for SwappablePublisher<T> {
  fn default() -> Self { Self::with_upstream(Upstream::Detached) }
}

impl<T: Send + 'static> SwappablePublisher<T> {
  /// Creates a publisher with no upstream. Subscribers wait, with their
  /// requests recorded, until one is set.
  pub fn new() -> Self { Self::default() }

  pub fn with_publisher(publisher: PublisherRef<T>) -> Self {
    Self::with_upstream(Upstream::Attached(publisher))
  }

  fn with_upstream(upstream: Upstream<T>) -> Self {
    SwappablePublisher {
      shared: Arc::new(SwapShared {
        state: Mutex::new(SwapState { upstream, links: vec![], epoch: 0 }),
      }),
    }
  }

  /// Moves every live subscriber onto `publisher`. No-op once terminated.
  pub fn set_publisher(&self, publisher: PublisherRef<T>) {
    let Some((links, epoch)) = self.swap(Upstream::Attached(publisher.clone())) else { return };
    debug!("swapping upstream for {} subscribers", links.len());
    for link in links {
      publisher.subscribe(Box::new(Forwarder { link, epoch }));
    }
  }

  /// Detaches from the current upstream. Subscribers stay attached and keep
  /// accumulating requests until the next [`set_publisher`](Self::set_publisher).
  pub fn remove_publisher(&self) {
    if let Some((links, _)) = self.swap(Upstream::Detached) {
      debug!("upstream removed under {} subscribers", links.len());
    }
  }

  fn swap(&self, upstream: Upstream<T>) -> Option<(Vec<Arc<Link<T>>>, u64)> {
    let (links, epoch) = {
      let mut state = self.shared.state.guard();
      if let Upstream::Terminated(_) = state.upstream {
        trace!("swappable publisher terminated, ignoring swap");
        return None;
      }
      state.epoch += 1;
      state.upstream = upstream;
      state.links.retain(|link| !link.subscribed.is_terminated());
      (state.links.clone(), state.epoch)
    };
    for link in &links {
      if let Some(previous) = link.rebind(epoch) {
        previous.cancel();
      }
    }
    Some((links, epoch))
  }

  pub fn set_complete(&self) { self.terminate(TerminalPublisher::Completed) }

  pub fn set_exception(&self, err: FlowError) { self.terminate(TerminalPublisher::Failed(err)) }

  fn terminate(&self, terminal: TerminalPublisher) {
    let (links, epoch) = {
      let mut state = self.shared.state.guard();
      if let Upstream::Terminated(_) = state.upstream {
        return;
      }
      state.epoch += 1;
      state.upstream = Upstream::Terminated(terminal.clone());
      (mem::take(&mut state.links), state.epoch)
    };
    debug!("swappable publisher {} with {} subscribers", terminal.as_label(), links.len());
    for link in links {
      if let Some(previous) = link.rebind(epoch) {
        previous.cancel();
      }
      terminal.terminate(&link.subscribed);
    }
  }

  pub fn is_terminated(&self) -> bool {
    matches!(self.shared.state.guard().upstream, Upstream::Terminated(_))
  }

  /// Number of downstream subscribers that have not yet ended.
  pub fn subscriber_count(&self) -> usize {
    let state = self.shared.state.guard();
    state.links.iter().filter(|link| !link.subscribed.is_terminated()).count()
  }
}

impl<T: Send + 'static> Publisher<T> for SwappablePublisher<T> {
  fn subscribe(&self, subscriber: BoxedSubscriber<T>) {
    let mut state = self.shared.state.guard();
    let upstream = match &state.upstream {
      Upstream::Terminated(terminal) => {
        let terminal = terminal.clone();
        drop(state);
        return terminal.subscribe(subscriber);
      }
      Upstream::Attached(publisher) => Some(publisher.clone()),
      Upstream::Detached => None,
    };
    let epoch = state.epoch;
    let link = Arc::new(Link {
      subscribed: Subscribed::new(subscriber),
      bound: Mutex::new(Bound { epoch, subscription: None }),
      owner: Arc::downgrade(&self.shared),
    });
    state.links.push(link.clone());
    drop(state);

    link.subscribed.start_with(Arc::new(LinkHandle(Arc::downgrade(&link))));
    if let Some(publisher) = upstream {
      publisher.subscribe(Box::new(Forwarder { link, epoch }));
    }
  }
}

impl<T: Send + 'static> CloseablePublisher<T> for SwappablePublisher<T> {
  fn close(&self) { self.set_complete() }
}

impl<T> fmt::Debug for SwappablePublisher<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.shared.state.guard();
    let upstream = match state.upstream {
      Upstream::Detached => "detached",
      Upstream::Attached(_) => "attached",
      Upstream::Terminated(_) => "terminated",
    };
    f.debug_struct("SwappablePublisher")
      .field("upstream", &upstream)
      .field("links", &state.links.len())
      .field("epoch", &state.epoch)
      .finish()
  }
}

// ============================================================================
// Link: one downstream subscriber and its current upstream subscription
// ============================================================================

struct Link<T> {
  subscribed: Arc<Subscribed<T>>,
  bound: Mutex<Bound>,
  owner: Weak<SwapShared<T>>,
}

struct Bound {
  epoch: u64,
  subscription: Option<SubscriptionRef>,
}

impl<T> Link<T> {
  /// Moves the link to `epoch` and returns the upstream subscription it held.
  fn rebind(&self, epoch: u64) -> Option<SubscriptionRef> {
    let mut bound = self.bound.guard();
    bound.epoch = epoch;
    bound.subscription.take()
  }

  fn is_current(&self, epoch: u64) -> bool { self.bound.guard().epoch == epoch }

  fn upstream(&self) -> Option<SubscriptionRef> { self.bound.guard().subscription.clone() }

  /// Detaches the link from the owner and from its upstream for good.
  fn retire(self: &Arc<Self>) {
    self.subscribed.cancel();
    if let Some(owner) = self.owner.upgrade() {
      owner.state.guard().links.retain(|link| !Arc::ptr_eq(link, self));
    }
    if let Some(upstream) = self.rebind(u64::MAX) {
      upstream.cancel();
    }
  }
}

/// Handle given to the downstream subscriber.
struct LinkHandle<T>(Weak<Link<T>>);

impl<T: Send + 'static> Subscription for LinkHandle<T> {
  fn request(&self, n: i64) {
    let Some(link) = self.0.upgrade() else { return };
    link.subscribed.request(n);
    if link.subscribed.is_terminated() {
      return link.retire();
    }
    if let Some(upstream) = link.upstream() {
      upstream.request(n);
    }
  }

  fn cancel(&self) {
    if let Some(link) = self.0.upgrade() {
      link.retire();
    }
  }
}

/// Subscriber attached to an upstream on behalf of one link, valid for one
/// epoch. Signals from a superseded epoch are dropped.
struct Forwarder<T> {
  link: Arc<Link<T>>,
  epoch: u64,
}

impl<T: Send + 'static> Subscriber<T> for Forwarder<T> {
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    let previous = {
      let mut bound = self.link.bound.guard();
      if bound.epoch != self.epoch || self.link.subscribed.is_terminated() {
        drop(bound);
        return subscription.cancel();
      }
      bound.subscription.replace(subscription.clone())
    };
    if let Some(previous) = previous {
      previous.cancel();
    }
    let pending = self.link.subscribed.requests();
    if pending > 0 {
      trace!("replaying {pending} outstanding requests onto new upstream");
      subscription.request(pending);
    }
  }

  fn on_next(&mut self, value: T) {
    if self.link.is_current(self.epoch) {
      self.link.subscribed.next(value);
    } else {
      trace!("dropping item from a replaced upstream");
    }
  }

  fn on_error(self, err: FlowError) {
    if self.link.is_current(self.epoch) {
      self.link.subscribed.error(err);
      self.link.retire();
    }
  }

  fn on_complete(self) {
    if self.link.is_current(self.epoch) {
      self.link.subscribed.complete();
      self.link.retire();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    publisher::DirectPublisher,
    testing::{Event, ProbePublisher, Recorder},
  };

  #[test]
  fn swap_replays_outstanding_requests_onto_the_new_upstream() {
    let (a, b) = (Arc::new(ProbePublisher::<i32>::new()), Arc::new(ProbePublisher::<i32>::new()));
    let swappable = SwappablePublisher::<i32>::with_publisher(a.clone());
    let recorder = Recorder::<i32>::new();
    swappable.subscribe(recorder.requesting(5));

    swappable.set_publisher(b.clone());

    assert_eq!(a.probe(0).requests(), vec![5]);
    assert!(a.probe(0).is_cancelled());
    assert_eq!(b.probe(0).requests(), vec![5]);
    assert!(!b.probe(0).is_cancelled());
  }

  #[test]
  fn delivered_items_reduce_what_is_replayed() {
    let (a, b) = (Arc::new(ProbePublisher::<i32>::new()), Arc::new(ProbePublisher::<i32>::new()));
    let swappable = SwappablePublisher::<i32>::with_publisher(a.clone());
    let recorder = Recorder::<i32>::new();
    swappable.subscribe(recorder.requesting(5));
    a.emit(0, 1);
    a.emit(0, 2);

    swappable.set_publisher(b.clone());
    b.emit(0, 3);
    a.emit(0, 99);

    assert_eq!(b.probe(0).requests(), vec![3]);
    assert_eq!(recorder.values(), vec![1, 2, 3]);
  }

  #[test]
  fn requests_before_any_upstream_are_kept() {
    let swappable = SwappablePublisher::<i32>::new();
    let recorder = Recorder::<i32>::new();
    swappable.subscribe(recorder.requesting(2));
    recorder.request(1);

    let source = Arc::new(ProbePublisher::<i32>::new());
    swappable.set_publisher(source.clone());

    assert!(recorder.is_subscribed());
    assert_eq!(source.probe(0).requests(), vec![3]);
  }

  #[test]
  fn completed_subscribers_are_not_reattached() {
    let a = Arc::new(ProbePublisher::<i32>::new());
    let swappable = SwappablePublisher::<i32>::with_publisher(a.clone());
    let recorder = Recorder::<i32>::new();
    swappable.subscribe(recorder.requesting(1));
    a.complete(0);

    let b = Arc::new(ProbePublisher::<i32>::new());
    swappable.set_publisher(b.clone());

    assert_eq!(recorder.events(), vec![Event::Subscribed, Event::Complete]);
    assert_eq!(b.len(), 0);
    assert_eq!(swappable.subscriber_count(), 0);
  }

  #[test]
  fn cancel_reaches_the_current_upstream() {
    let a = Arc::new(ProbePublisher::<i32>::new());
    let swappable = SwappablePublisher::<i32>::with_publisher(a.clone());
    let recorder = Recorder::<i32>::new();
    swappable.subscribe(recorder.requesting(1));

    recorder.cancel();

    assert!(a.probe(0).is_cancelled());
    assert_eq!(swappable.subscriber_count(), 0);
  }

  #[test]
  fn set_complete_is_terminal_and_absorbs_swaps() {
    let swappable = SwappablePublisher::<i32>::new();
    let early = Recorder::<i32>::new();
    swappable.subscribe(early.requesting(1));

    swappable.set_complete();
    swappable.set_exception(FlowError::msg("ignored"));
    let source = Arc::new(ProbePublisher::<i32>::new());
    swappable.set_publisher(source.clone());
    let late = Recorder::<i32>::new();
    swappable.subscribe(late.subscriber());

    assert_eq!(early.events(), vec![Event::Subscribed, Event::Complete]);
    assert_eq!(late.events(), vec![Event::Subscribed, Event::Complete]);
    assert_eq!(source.len(), 0);
    assert!(swappable.is_terminated());
  }

  #[test]
  fn removed_upstream_stops_delivery_until_the_next_swap() {
    let a = Arc::new(DirectPublisher::<i32>::new());
    let swappable = SwappablePublisher::<i32>::with_publisher(a.clone());
    let recorder = Recorder::<i32>::new();
    swappable.subscribe(recorder.requesting(3));
    a.next(1);

    swappable.remove_publisher();
    a.next(2);
    swappable.set_publisher(a.clone());
    a.next(3);

    assert_eq!(recorder.values(), vec![1, 3]);
    assert_eq!(a.outstanding_requests(), 1);
  }
}
