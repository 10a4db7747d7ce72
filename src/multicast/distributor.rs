use std::{
  fmt, mem,
  sync::{Arc, Mutex, Weak},
};

use log::{debug, trace};

use crate::{
  error::FlowError,
  lock::MutexExt,
  publisher::TerminalPublisher,
  subscriber::BoxedSubscriber,
  subscription::{Subscribed, SubscribedList, Subscription, SubscriptionRef},
};

/// Serves many downstream subscriptions from one upstream subscription.
///
/// Downstream demand is coalesced by maximum, not by sum: the distributor
/// tracks how many items it has asked upstream for and still expects
/// (`active_requests`), and a downstream request only reaches upstream when
/// it raises that subscriber's pending count above `active_requests`. Every
/// item from upstream is offered to all downstreams, so upstream production
/// is bounded by the most demanding subscriber rather than by the sum of
/// all of them.
///
/// `active_requests` never drops below the largest pending count of a live
/// downstream, so no downstream is ever starved. Cancelling the downstream
/// that held the maximum does not lower `active_requests`; upstream may then
/// produce items that only some (or none) of the remaining downstreams take.
///
/// Cancelling downstream subscriptions never cancels the upstream.
pub struct Distributor<T> {
  upstream: SubscriptionRef,
  state: Mutex<DistributorState<T>>,
}

struct DistributorState<T> {
  list: SubscribedList<T>,
  active_requests: i64,
  terminal: Option<TerminalPublisher>,
}

impl<T: Clone + Send + 'static> Distributor<T> {
  pub fn new(upstream: SubscriptionRef) -> Arc<Self> {
    Arc::new(Distributor {
      upstream,
      state: Mutex::new(DistributorState {
        list: SubscribedList::default(),
        active_requests: 0,
        terminal: None,
      }),
    })
  }

  /// Attaches a downstream subscriber and returns the handle it was given.
  pub fn create_subscription(self: &Arc<Self>, subscriber: BoxedSubscriber<T>) -> SubscriptionRef {
    let subscribed = Subscribed::new(subscriber);
    let terminal = {
      let mut state = self.state.guard();
      match &state.terminal {
        Some(terminal) => Some(terminal.clone()),
        None => {
          state.list.add(subscribed.clone());
          None
        }
      }
    };
    let handle: SubscriptionRef = Arc::new(DistributedSubscription {
      distributor: Arc::downgrade(self),
      subscribed: Arc::downgrade(&subscribed),
    });
    subscribed.start_with(handle.clone());
    if let Some(terminal) = terminal {
      terminal.terminate(&subscribed);
    }
    handle
  }

  fn request_from(&self, child: &Subscribed<T>, n: i64) {
    if n <= 0 {
      child.request(n);
      return;
    }
    let additional = {
      let mut state = self.state.guard();
      if state.terminal.is_some() || child.is_terminated() {
        return;
      }
      let total = child.request(n);
      let additional = total - state.active_requests;
      if additional <= 0 {
        return;
      }
      state.active_requests = state.active_requests.saturating_add(additional);
      additional
    };
    trace!("distributor requesting {additional} more items upstream");
    self.upstream.request(additional);
  }

  /// Relays one upstream item to every downstream with a pending request.
  pub fn next(&self, value: T) {
    let snapshot = {
      let mut state = self.state.guard();
      if state.terminal.is_some() {
        return;
      }
      state.active_requests = (state.active_requests - 1).max(0);
      state.list.clone()
    };
    snapshot.next(value);
    self.state.guard().list.prune();
  }

  pub fn error(&self, err: FlowError) { self.terminate(TerminalPublisher::Failed(err)) }

  pub fn complete(&self) { self.terminate(TerminalPublisher::Completed) }

  fn terminate(&self, terminal: TerminalPublisher) {
    let list = {
      let mut state = self.state.guard();
      if state.terminal.is_some() {
        return;
      }
      state.terminal = Some(terminal.clone());
      state.active_requests = 0;
      mem::take(&mut state.list)
    };
    debug!("distributor {} with {} subscribers", terminal.as_label(), list.len());
    terminal.terminate_all(list);
  }

  /// Items requested upstream and not yet received.
  pub fn active_requests(&self) -> i64 { self.state.guard().active_requests }

  /// Largest number of items any downstream is still waiting for.
  pub fn outstanding_requests(&self) -> i64 { self.state.guard().list.max_pending() }

  pub fn subscriber_count(&self) -> usize {
    let mut state = self.state.guard();
    state.list.prune();
    state.list.len()
  }
}

impl<T> fmt::Debug for Distributor<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.state.guard();
    f.debug_struct("Distributor")
      .field("subscribers", &state.list.len())
      .field("active_requests", &state.active_requests)
      .field("terminal", &state.terminal)
      .finish()
  }
}

struct DistributedSubscription<T> {
  distributor: Weak<Distributor<T>>,
  subscribed: Weak<Subscribed<T>>,
}

impl<T: Clone + Send + 'static> Subscription for DistributedSubscription<T> {
  fn request(&self, n: i64) {
    if let (Some(distributor), Some(subscribed)) =
      (self.distributor.upgrade(), self.subscribed.upgrade())
    {
      distributor.request_from(&subscribed, n);
    }
  }

  fn cancel(&self) {
    if let Some(subscribed) = self.subscribed.upgrade() {
      subscribed.cancel();
    }
  }
}
