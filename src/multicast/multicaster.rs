use std::{fmt, mem, sync::Mutex};

use log::debug;

use crate::{
  error::FlowError,
  lock::MutexExt,
  publisher::TerminalPublisher,
  subscriber::BoxedSubscriber,
  subscription::{Subscribed, SubscribedList, SubscriptionRef},
};

/// Relays one stream of signals to any number of independently paced
/// subscribers.
///
/// Each subscriber gets its own [`Subscribed`] state, so one subscriber's
/// requests or cancellation never affect another. The terminal transition is
/// one-way: subscribers created afterwards receive the same terminal signal
/// right after `on_subscribe`.
pub struct Multicaster<T> {
  state: Mutex<MulticastState<T>>,
}

struct MulticastState<T> {
  list: SubscribedList<T>,
  terminal: Option<TerminalPublisher>,
}

impl<T> Default for Multicaster<T> {
  fn default() -> Self {
    Multicaster {
      state: Mutex::new(MulticastState { list: SubscribedList::default(), terminal: None }),
    }
  }
}

impl<T: Clone + Send + 'static> Multicaster<T> {
  pub fn new() -> Self { Self::default() }

  /// Attaches `subscriber` and returns the handle it was given.
  pub fn create_subscription(&self, subscriber: BoxedSubscriber<T>) -> SubscriptionRef {
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
    let handle = subscribed.start();
    if let Some(terminal) = terminal {
      terminal.terminate(&subscribed);
    }
    handle
  }

  /// Relays `value` to every subscriber with a pending request.
  pub fn next(&self, value: T) {
    let snapshot = {
      let state = self.state.guard();
      if state.list.is_empty() {
        return;
      }
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
      mem::take(&mut state.list)
    };
    debug!("multicaster {} with {} subscribers", terminal.as_label(), list.len());
    terminal.terminate_all(list);
  }

  /// Largest number of items any current subscriber is still waiting for.
  pub fn outstanding_requests(&self) -> i64 { self.state.guard().list.max_pending() }

  pub fn subscriber_count(&self) -> usize {
    let mut state = self.state.guard();
    state.list.prune();
    state.list.len()
  }

  pub fn is_terminated(&self) -> bool { self.state.guard().terminal.is_some() }
}

impl<T> fmt::Debug for Multicaster<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.state.guard();
    f.debug_struct("Multicaster")
      .field("subscribers", &state.list.len())
      .field("terminal", &state.terminal)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::{Event, Recorder};

  #[test]
  fn each_subscriber_paces_itself() {
    let multicaster = Multicaster::<i32>::new();
    let (a, b) = (Recorder::<i32>::new(), Recorder::<i32>::new());
    multicaster.create_subscription(a.requesting(1));
    multicaster.create_subscription(b.requesting(3));

    multicaster.next(1);
    multicaster.next(2);
    a.request(1);
    multicaster.next(3);

    assert_eq!(a.values(), vec![1, 3]);
    assert_eq!(b.values(), vec![1, 2, 3]);
    assert_eq!(multicaster.outstanding_requests(), 0);
  }

  #[test]
  fn cancelling_one_subscriber_leaves_siblings_alone() {
    let multicaster = Multicaster::<i32>::new();
    let (a, b) = (Recorder::<i32>::new(), Recorder::<i32>::new());
    multicaster.create_subscription(a.requesting(10));
    let handle = multicaster.create_subscription(b.requesting(10));

    multicaster.next(1);
    handle.cancel();
    multicaster.next(2);
    multicaster.complete();

    assert_eq!(a.events(), vec![Event::Subscribed, Event::Next(1), Event::Next(2), Event::Complete]);
    assert_eq!(b.events(), vec![Event::Subscribed, Event::Next(1)]);
  }

  #[test]
  fn subscriber_added_from_inside_on_next() {
    let multicaster = std::sync::Arc::new(Multicaster::<i32>::new());
    let late = Recorder::<i32>::new();
    let (c_multicaster, c_late) = (multicaster.clone(), late.clone());
    let first = Recorder::<i32>::new();
    multicaster.create_subscription(first.subscriber_with(move |v| {
      if v == 1 {
        c_multicaster.create_subscription(c_late.requesting(5));
      }
    }));
    first.request(5);

    multicaster.next(1);
    multicaster.next(2);

    assert_eq!(first.values(), vec![1, 2]);
    assert_eq!(late.values(), vec![2]);
    assert_eq!(multicaster.subscriber_count(), 2);
  }

  #[test]
  fn terminal_is_one_way_and_replayed_to_late_subscribers() {
    let multicaster = Multicaster::<i32>::new();
    let early = Recorder::<i32>::new();
    multicaster.create_subscription(early.requesting(1));

    multicaster.error(FlowError::msg("gone"));
    multicaster.complete();
    let late = Recorder::<i32>::new();
    multicaster.create_subscription(late.requesting(1));

    assert_eq!(early.events(), vec![Event::Subscribed, Event::Error("gone".into())]);
    assert_eq!(late.events(), vec![Event::Subscribed, Event::Error("gone".into())]);
    assert!(multicaster.is_terminated());
    assert_eq!(multicaster.subscriber_count(), 0);
  }
}
