//! Transforming processor: a subscriber on one side, a multicast publisher on
//! the other.

use std::{
  fmt,
  sync::{Arc, Mutex},
};

use log::{debug, warn};

use crate::{
  error::FlowError,
  lock::MutexExt,
  multicast::Distributor,
  publisher::{Publisher, TerminalPublisher},
  subscriber::{BoxedSubscriber, Subscriber},
  subscription::{DeferredSubscription, Subscription, SubscriptionRef},
};

type Transform<T, R> = Box<dyn Fn(T) -> Result<R, FlowError> + Send + Sync>;

/// Applies a transform to every upstream item and multicasts the result.
///
/// The processor holds exactly one upstream subscription. Downstream demand is
/// coalesced through a [`Distributor`], so no upstream request is made until a
/// downstream subscriber asks for something. The transform runs synchronously
/// on the thread delivering the upstream item; if it fails, the upstream is
/// cancelled and every downstream receives the error. Upstream `complete` and
/// `error` pass straight through. Termination is permanent.
///
/// The processor is used behind an `Arc`: `Arc<DirectProcessor<T, R>>` is the
/// upstream-facing [`Subscriber`].
pub struct DirectProcessor<T, R> {
  incoming: Arc<DeferredSubscription>,
  state: Mutex<ProcessorState<R>>,
  transform: Transform<T, R>,
}

enum ProcessorState<R> {
  Active(Arc<Distributor<R>>),
  Terminal(TerminalPublisher),
}

impl<T, R> DirectProcessor<T, R>
where
  T: 'static,
  R: Clone + Send + 'static,
{
  pub fn new<F>(transform: F) -> Arc<Self>
  where
    F: Fn(T) -> Result<R, FlowError> + Send + Sync + 'static,
  {
    let incoming = Arc::new(DeferredSubscription::new());
    let distributor = Distributor::new(incoming.clone());
    Arc::new(DirectProcessor {
      incoming,
      state: Mutex::new(ProcessorState::Active(distributor)),
      transform: Box::new(transform),
    })
  }

  /// A processor whose transform cannot fail.
  pub fn map<F>(f: F) -> Arc<Self>
  where
    F: Fn(T) -> R + Send + Sync + 'static,
  {
    Self::new(move |value| Ok(f(value)))
  }

  /// Subscribes a new processor to `publisher` and returns it.
  pub fn transform_publisher<P, F>(publisher: &P, transform: F) -> Arc<Self>
  where
    P: Publisher<T> + ?Sized,
    F: Fn(T) -> Result<R, FlowError> + Send + Sync + 'static,
  {
    let processor = Self::new(transform);
    publisher.subscribe(Box::new(processor.clone()));
    processor
  }

  fn distributor(&self) -> Option<Arc<Distributor<R>>> {
    match &*self.state.guard() {
      ProcessorState::Active(distributor) => Some(distributor.clone()),
      ProcessorState::Terminal(_) => None,
    }
  }

  fn terminate(&self, terminal: TerminalPublisher) {
    let distributor = {
      let mut state = self.state.guard();
      match &*state {
        ProcessorState::Terminal(_) => return,
        ProcessorState::Active(distributor) => {
          let distributor = distributor.clone();
          *state = ProcessorState::Terminal(terminal.clone());
          distributor
        }
      }
    };
    debug!("processor {}", terminal.as_label());
    match terminal {
      TerminalPublisher::Completed => distributor.complete(),
      TerminalPublisher::Failed(err) => distributor.error(err),
    }
  }

  pub fn is_terminal(&self) -> bool {
    matches!(&*self.state.guard(), ProcessorState::Terminal(_))
  }

  /// Items requested from upstream and not yet received.
  pub fn active_requests(&self) -> i64 {
    self.distributor().map_or(0, |distributor| distributor.active_requests())
  }
}

impl<T, R> Publisher<R> for DirectProcessor<T, R>
where
  T: 'static,
  R: Clone + Send + 'static,
{
  fn subscribe(&self, subscriber: BoxedSubscriber<R>) {
    let target = match &*self.state.guard() {
      ProcessorState::Active(distributor) => Ok(distributor.clone()),
      ProcessorState::Terminal(terminal) => Err(terminal.clone()),
    };
    match target {
      Ok(distributor) => {
        distributor.create_subscription(subscriber);
      }
      Err(terminal) => terminal.subscribe(subscriber),
    }
  }
}

impl<T, R> Subscriber<T> for Arc<DirectProcessor<T, R>>
where
  T: 'static,
  R: Clone + Send + 'static,
{
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    if let Err(err) = self.incoming.set(subscription.clone()) {
      warn!("processor already has an upstream ({err}), cancelling the new one");
      subscription.cancel();
    }
  }

  fn on_next(&mut self, value: T) {
    let Some(distributor) = self.distributor() else { return };
    match (self.transform)(value) {
      Ok(item) => distributor.next(item),
      Err(err) => {
        self.incoming.cancel();
        self.terminate(TerminalPublisher::Failed(err));
      }
    }
  }

  fn on_error(self, err: FlowError) { self.terminate(TerminalPublisher::Failed(err)) }

  fn on_complete(self) { self.terminate(TerminalPublisher::Completed) }
}

impl<T, R> fmt::Debug for DirectProcessor<T, R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut s = f.debug_struct("DirectProcessor");
    s.field("upstream_set", &self.incoming.is_set());
    match &*self.state.guard() {
      ProcessorState::Active(distributor) => s.field("distributor", distributor),
      ProcessorState::Terminal(terminal) => s.field("terminal", terminal),
    };
    s.finish()
  }
}
