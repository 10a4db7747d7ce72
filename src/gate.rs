use std::{mem, sync::Mutex};

use log::debug;

use crate::{
  lock::MutexExt,
  publisher::{Publisher, PublisherRef, SwappablePublisher},
  subscriber::BoxedSubscriber,
};

type GateAction = Box<dyn FnOnce() + Send>;

/// Open/closed switch over any number of pass-through publishers.
///
/// A pass-through created while the gate is closed carries no items; its
/// source is attached the next time the gate opens. Closing the gate
/// completes every pass-through registered so far. Both transitions are
/// idempotent. After a close, new pass-throughs start fresh and go live on
/// the next open.
///
/// ```rust
/// use std::sync::Arc;
///
/// use flowcore::prelude::*;
///
/// let gate = FlowGate::closed();
/// let frames = Arc::new(DirectPublisher::<u32>::new());
/// let gated = gate.pass_through::<u32>(frames.clone());
/// assert!(!gate.is_open());
///
/// gate.open();
/// gate.complete_and_close();
/// assert!(gated.is_terminated());
/// ```
pub struct FlowGate {
  state: Mutex<GateState>,
}

#[derive(Default)]
struct GateState {
  open: bool,
  on_open: Vec<GateAction>,
  on_close: Vec<GateAction>,
}

impl Default for FlowGate {
  fn default() -> Self { Self::closed() }
}

impl FlowGate {
  pub fn closed() -> Self { FlowGate { state: Mutex::new(GateState::default()) } }

  pub fn opened() -> Self {
    FlowGate { state: Mutex::new(GateState { open: true, ..GateState::default() }) }
  }

  pub fn is_open(&self) -> bool { self.state.guard().open }

  /// Opens the gate and attaches every pass-through waiting for it.
  pub fn open(&self) -> &Self {
    let actions = {
      let mut state = self.state.guard();
      if state.open {
        return self;
      }
      state.open = true;
      mem::take(&mut state.on_open)
    };
    debug!("gate opened, attaching {} pass-throughs", actions.len());
    for action in actions {
      action();
    }
    self
  }

  /// Closes the gate and completes every registered pass-through.
  pub fn complete_and_close(&self) -> &Self {
    let actions = {
      let mut state = self.state.guard();
      if !state.open {
        return self;
      }
      state.open = false;
      mem::take(&mut state.on_close)
    };
    debug!("gate closed, completing {} pass-throughs", actions.len());
    for action in actions {
      action();
    }
    self
  }

  /// Wraps `publisher` so that it only flows while this gate is open.
  pub fn pass_through<T>(&self, publisher: PublisherRef<T>) -> SwappablePublisher<T>
  where
    T: Send + 'static,
  {
    let gated = SwappablePublisher::new();
    let mut state = self.state.guard();
    let closing = gated.clone();
    state.on_close.push(Box::new(move || closing.set_complete()));
    if state.open {
      drop(state);
      gated.set_publisher(publisher);
    } else {
      let opening = gated.clone();
      state.on_open.push(Box::new(move || opening.set_publisher(publisher)));
    }
    gated
  }

  /// Subscribes each of `subscribers` to a pass-through of `publisher`.
  pub fn subscribe<T, I>(&self, publisher: PublisherRef<T>, subscribers: I) -> &Self
  where
    T: Send + 'static,
    I: IntoIterator<Item = BoxedSubscriber<T>>,
  {
    let gated = self.pass_through(publisher);
    for subscriber in subscribers {
      gated.subscribe(subscriber);
    }
    self
  }
}

impl std::fmt::Debug for FlowGate {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let state = self.state.guard();
    f.debug_struct("FlowGate")
      .field("open", &state.open)
      .field("waiting", &state.on_open.len())
      .field("registered", &state.on_close.len())
      .finish()
  }
}
