use std::{
  future::Future,
  mem,
  pin::Pin,
  sync::{Arc, Mutex},
  task::{Context, Poll},
};

use futures::ready;
use log::{debug, trace};
use pin_project_lite::pin_project;

use crate::{
  error::FlowError,
  lock::MutexExt,
  publisher::{Publisher, PublisherRef, TerminalPublisher},
  subscriber::BoxedSubscriber,
};

/// A publisher whose real source is chosen later.
///
/// Subscribers that arrive first are queued in arrival order. The first call
/// to [`set`](Self::set) wins: queued subscribers are attached to the chosen
/// publisher and later subscribers go straight to it. Later calls are
/// ignored, so racing "complete" and "fail" paths are harmless.
pub struct DeferredPublisher<T> {
  state: Mutex<DeferredState<T>>,
}

struct DeferredState<T> {
  publisher: Option<PublisherRef<T>>,
  waiting: Vec<BoxedSubscriber<T>>,
}

impl<T> Default for DeferredPublisher<T> {
  fn default() -> Self {
    DeferredPublisher { state: Mutex::new(DeferredState { publisher: None, waiting: vec![] }) }
  }
}

impl<T: Send + 'static> DeferredPublisher<T> {
  pub fn new() -> Self { Self::default() }

  /// Chooses the real publisher. Returns `false` if one was already chosen.
  pub fn set(&self, publisher: PublisherRef<T>) -> bool {
    let waiting = {
      let mut state = self.state.guard();
      if state.publisher.is_some() {
        trace!("deferred publisher already set, ignoring");
        return false;
      }
      state.publisher = Some(publisher.clone());
      mem::take(&mut state.waiting)
    };
    debug!("deferred publisher set, attaching {} waiting subscribers", waiting.len());
    for subscriber in waiting {
      publisher.subscribe(subscriber);
    }
    true
  }

  /// Completes every current and future subscriber, unless already set.
  pub fn set_complete(&self) -> bool { self.set(Arc::new(TerminalPublisher::Completed)) }

  /// Fails every current and future subscriber, unless already set.
  pub fn set_exception(&self, err: FlowError) -> bool {
    self.set(Arc::new(TerminalPublisher::Failed(err)))
  }

  pub fn is_set(&self) -> bool { self.state.guard().publisher.is_some() }

  /// Returns a future that sets this publisher from the outcome of `source`.
  ///
  /// The caller drives the returned future on an executor of its choice. An
  /// `Err` outcome is set as a failed publisher.
  pub fn resolve_with<F>(self: &Arc<Self>, source: F) -> Resolve<F, T>
  where
    F: Future<Output = Result<PublisherRef<T>, FlowError>>,
  {
    Resolve { source, target: self.clone() }
  }
}

impl<T: Send + 'static> Publisher<T> for DeferredPublisher<T> {
  fn subscribe(&self, subscriber: BoxedSubscriber<T>) {
    let publisher = {
      let mut state = self.state.guard();
      match &state.publisher {
        Some(publisher) => publisher.clone(),
        None => {
          state.waiting.push(subscriber);
          return;
        }
      }
    };
    publisher.subscribe(subscriber);
  }
}

pin_project! {
  /// Future returned by [`DeferredPublisher::resolve_with`].
  #[must_use = "futures do nothing unless polled"]
  pub struct Resolve<F, T> {
    #[pin]
    source: F,
    target: Arc<DeferredPublisher<T>>,
  }
}

impl<F, T> Future for Resolve<F, T>
where
  F: Future<Output = Result<PublisherRef<T>, FlowError>>,
  T: Send + 'static,
{
  type Output = bool;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<bool> {
    let this = self.project();
    let applied = match ready!(this.source.poll(cx)) {
      Ok(publisher) => this.target.set(publisher),
      Err(err) => this.target.set_exception(err),
    };
    Poll::Ready(applied)
  }
}
