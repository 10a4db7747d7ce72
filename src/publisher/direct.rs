use std::{
  fmt,
  sync::{Arc, Mutex},
};

use log::{debug, trace};

use crate::{
  error::FlowError,
  lock::MutexExt,
  multicast::Multicaster,
  publisher::{CloseablePublisher, Publisher, TerminalPublisher},
  subscriber::BoxedSubscriber,
};

/// Synchronous, thread-safe multicast publisher.
///
/// Items are delivered on the calling thread, only to subscribers attached at
/// that moment and only against their pending requests. Nothing is buffered:
/// an item nobody requested is dropped. After [`complete`](Self::complete) or
/// [`error`](Self::error) every further signal is a no-op, and late
/// subscribers immediately receive the same terminal signal.
///
/// `next` may be called from several threads at once. Each subscriber sees
/// items one at a time, and items from one producer thread arrive in the
/// order it sent them. Items are relayed outside the publisher lock, so two
/// subscribers can observe items from different producers in different
/// relative orders.
///
/// ```rust
/// use flowcore::prelude::*;
///
/// let publisher = DirectPublisher::<i32>::new();
/// publisher.next(1); // no subscribers, dropped
///
/// let seen = std::sync::Arc::new(std::sync::Mutex::new(vec![]));
/// let c_seen = seen.clone();
/// publisher.subscribe_with(UnboundedSubscriber::new(move |v: i32| c_seen.lock().unwrap().push(v)));
/// publisher.next(2);
/// publisher.complete();
/// publisher.next(3); // terminal, ignored
///
/// assert_eq!(*seen.lock().unwrap(), vec![2]);
/// ```
pub struct DirectPublisher<T> {
  state: Mutex<DirectState<T>>,
}

enum DirectState<T> {
  Active(Arc<Multicaster<T>>),
  Terminal(TerminalPublisher),
}

impl<T: Clone + Send + 'static> Default for DirectPublisher<T> {
  fn default() -> Self {
    DirectPublisher { state: Mutex::new(DirectState::Active(Arc::new(Multicaster::new()))) }
  }
}

impl<T: Clone + Send + 'static> DirectPublisher<T> {
  pub fn new() -> Self { Self::default() }

  fn multicaster(&self) -> Option<Arc<Multicaster<T>>> {
    match &*self.state.guard() {
      DirectState::Active(multicaster) => Some(multicaster.clone()),
      DirectState::Terminal(_) => None,
    }
  }

  /// Relays `value` to current subscribers with a pending request.
  pub fn next(&self, value: T) {
    match self.multicaster() {
      Some(multicaster) => multicaster.next(value),
      None => trace!("direct publisher is terminal, dropping item"),
    }
  }

  pub fn error(&self, err: FlowError) { self.terminate(TerminalPublisher::Failed(err)) }

  pub fn complete(&self) { self.terminate(TerminalPublisher::Completed) }

  fn terminate(&self, terminal: TerminalPublisher) {
    let multicaster = {
      let mut state = self.state.guard();
      match &*state {
        DirectState::Terminal(_) => {
          trace!("direct publisher already terminal, ignoring {}", terminal.as_label());
          return;
        }
        DirectState::Active(multicaster) => {
          let multicaster = multicaster.clone();
          *state = DirectState::Terminal(terminal.clone());
          multicaster
        }
      }
    };
    debug!("direct publisher {}", terminal.as_label());
    match terminal {
      TerminalPublisher::Completed => multicaster.complete(),
      TerminalPublisher::Failed(err) => multicaster.error(err),
    }
  }

  pub fn is_terminal(&self) -> bool { matches!(&*self.state.guard(), DirectState::Terminal(_)) }

  /// Largest number of items any subscriber is still waiting for. Zero once
  /// terminal.
  pub fn outstanding_requests(&self) -> i64 {
    self.multicaster().map_or(0, |multicaster| multicaster.outstanding_requests())
  }

  pub fn subscriber_count(&self) -> usize {
    self.multicaster().map_or(0, |multicaster| multicaster.subscriber_count())
  }
}

impl<T: Clone + Send + 'static> Publisher<T> for DirectPublisher<T> {
  fn subscribe(&self, subscriber: BoxedSubscriber<T>) {
    let target = match &*self.state.guard() {
      DirectState::Active(multicaster) => Ok(multicaster.clone()),
      DirectState::Terminal(terminal) => Err(terminal.clone()),
    };
    match target {
      Ok(multicaster) => {
        multicaster.create_subscription(subscriber);
      }
      Err(terminal) => terminal.subscribe(subscriber),
    }
  }
}

impl<T: Clone + Send + 'static> CloseablePublisher<T> for DirectPublisher<T> {
  fn close(&self) { self.complete() }
}

impl<T> fmt::Debug for DirectPublisher<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &*self.state.guard() {
      DirectState::Active(multicaster) => {
        f.debug_tuple("DirectPublisher::Active").field(multicaster).finish()
      }
      DirectState::Terminal(terminal) => {
        f.debug_tuple("DirectPublisher::Terminal").field(terminal).finish()
      }
    }
  }
}
