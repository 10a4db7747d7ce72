//! One-shot subscribers that resolve a future.
//!
//! A [`CollectingSubscriber`] attaches to a stream, feeds every item to a
//! [`Collector`] and resolves its [`ResultFuture`] exactly once:
//!
//! - when [`Collector::accumulate`] reports it is done, in which case the
//!   subscription is cancelled,
//! - when the stream completes, with whatever [`Collector::finish`] yields,
//! - when the stream errors, with that error.
//!
//! ## Examples
//!
//! ```rust
//! use std::num::NonZeroUsize;
//!
//! use flowcore::prelude::*;
//! use futures::executor::block_on;
//!
//! let readings = DirectPublisher::<u32>::new();
//! let first_two = to_list(&readings, NonZeroUsize::new(2).unwrap());
//! for v in [7, 8, 9] {
//!   readings.next(v);
//! }
//! assert_eq!(block_on(first_two).unwrap(), vec![7, 8]);
//! ```

use std::{
  fmt,
  future::Future,
  marker::PhantomData,
  mem,
  num::NonZeroUsize,
  pin::Pin,
  sync::{Arc, Mutex},
  task::{Context, Poll, Waker},
};

use log::debug;

use crate::{
  error::FlowError,
  lock::MutexExt,
  publisher::Publisher,
  subscriber::Subscriber,
  subscription::SubscriptionRef,
};

// ============================================================================
// ResultFuture
// ============================================================================

enum Resolution<O> {
  Pending,
  Ready(Result<O, FlowError>),
  Taken,
  Abandoned,
}

struct FutureState<O> {
  resolution: Resolution<O>,
  waker: Option<Waker>,
}

type SharedState<O> = Arc<Mutex<FutureState<O>>>;

/// Future side of a [`CollectingSubscriber`].
///
/// Dropping the future before it resolves abandons the result: the
/// subscription is cancelled on the next signal it receives.
pub struct ResultFuture<O> {
  state: SharedState<O>,
}

impl<O> ResultFuture<O> {
  pub fn is_resolved(&self) -> bool {
    !matches!(self.state.guard().resolution, Resolution::Pending)
  }
}

impl<O> Future for ResultFuture<O> {
  type Output = Result<O, FlowError>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let mut state = self.state.guard();
    match mem::replace(&mut state.resolution, Resolution::Taken) {
      Resolution::Ready(result) => Poll::Ready(result),
      Resolution::Pending => {
        state.resolution = Resolution::Pending;
        state.waker = Some(cx.waker().clone());
        Poll::Pending
      }
      Resolution::Taken | Resolution::Abandoned => {
        Poll::Ready(Err(FlowError::msg("result future polled after completion")))
      }
    }
  }
}

impl<O> Drop for ResultFuture<O> {
  fn drop(&mut self) {
    let mut state = self.state.guard();
    if matches!(state.resolution, Resolution::Pending) {
      state.resolution = Resolution::Abandoned;
    }
    state.waker = None;
  }
}

impl<O> fmt::Debug for ResultFuture<O> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ResultFuture").field("resolved", &self.is_resolved()).finish()
  }
}

fn resolve<O>(state: &SharedState<O>, result: Result<O, FlowError>) {
  let waker = {
    let mut state = state.guard();
    if !matches!(state.resolution, Resolution::Pending) {
      return;
    }
    state.resolution = Resolution::Ready(result);
    state.waker.take()
  };
  if let Some(waker) = waker {
    waker.wake();
  }
}

fn is_abandoned<O>(state: &SharedState<O>) -> bool {
  matches!(state.guard().resolution, Resolution::Abandoned)
}

// ============================================================================
// Collector
// ============================================================================

/// Accumulate/finish strategy driven by a [`CollectingSubscriber`].
pub trait Collector<T>: Send {
  type Output: Send;

  /// Called once with the granted subscription. Issue the initial request
  /// here.
  fn init(&mut self, subscription: &SubscriptionRef);

  /// Takes one item. Returning `true` resolves the result early and cancels
  /// the subscription.
  fn accumulate(&mut self, value: T) -> bool;

  /// Produces the result, either after an early stop or on completion.
  fn finish(&mut self) -> Self::Output;

  /// Called instead of `finish` when the stream errors.
  fn fail(&mut self, _err: &FlowError) {}
}

/// Collects up to `capacity` items in arrival order, requesting exactly that
/// many.
#[derive(Debug)]
pub struct ListCollector<T> {
  capacity: NonZeroUsize,
  items: Vec<T>,
}

impl<T> ListCollector<T> {
  pub fn new(capacity: NonZeroUsize) -> Self {
    ListCollector { capacity, items: Vec::with_capacity(capacity.get()) }
  }
}

impl<T: Send> Collector<T> for ListCollector<T> {
  type Output = Vec<T>;

  fn init(&mut self, subscription: &SubscriptionRef) {
    subscription.request(i64::try_from(self.capacity.get()).unwrap_or(i64::MAX));
  }

  fn accumulate(&mut self, value: T) -> bool {
    self.items.push(value);
    self.items.len() >= self.capacity.get()
  }

  fn finish(&mut self) -> Vec<T> { mem::take(&mut self.items) }
}

/// Resolves with the first item matching a predicate, or `None` if the stream
/// completes without one.
pub struct PredicateCollector<T, P> {
  predicate: P,
  found: Option<T>,
}

impl<T, P> PredicateCollector<T, P>
where
  P: FnMut(&T) -> bool,
{
  pub fn new(predicate: P) -> Self { PredicateCollector { predicate, found: None } }
}

impl<T, P> Collector<T> for PredicateCollector<T, P>
where
  T: Send,
  P: FnMut(&T) -> bool + Send,
{
  type Output = Option<T>;

  fn init(&mut self, subscription: &SubscriptionRef) { subscription.request(i64::MAX) }

  fn accumulate(&mut self, value: T) -> bool {
    if (self.predicate)(&value) {
      self.found = Some(value);
      true
    } else {
      false
    }
  }

  fn finish(&mut self) -> Option<T> { self.found.take() }
}

/// Relays items to a wrapped subscriber until `limit` have passed, then
/// completes it. Resolves with the number of items relayed.
///
/// The wrapped subscriber receives the upstream subscription and drives
/// demand itself. If it cancels before the limit, the result never resolves.
pub struct LimitCollector<S> {
  inner: Option<S>,
  limit: u64,
  count: u64,
}

impl<S> LimitCollector<S> {
  pub fn new(inner: S, limit: NonZeroUsize) -> Self {
    LimitCollector { inner: Some(inner), limit: limit.get() as u64, count: 0 }
  }
}

impl<T, S> Collector<T> for LimitCollector<S>
where
  S: Subscriber<T> + Send,
{
  type Output = u64;

  fn init(&mut self, subscription: &SubscriptionRef) {
    if let Some(inner) = self.inner.as_mut() {
      inner.on_subscribe(subscription.clone());
    }
  }

  fn accumulate(&mut self, value: T) -> bool {
    self.count += 1;
    if let Some(inner) = self.inner.as_mut() {
      inner.on_next(value);
    }
    self.count >= self.limit
  }

  fn finish(&mut self) -> u64 {
    if let Some(inner) = self.inner.take() {
      inner.on_complete();
    }
    self.count
  }

  fn fail(&mut self, err: &FlowError) {
    if let Some(inner) = self.inner.take() {
      inner.on_error(err.clone());
    }
  }
}

// ============================================================================
// CollectingSubscriber
// ============================================================================

struct Collecting<C> {
  collector: C,
  subscription: Option<SubscriptionRef>,
  resolved: bool,
}

/// Subscriber that resolves a [`ResultFuture`] through a [`Collector`].
///
/// Clones share state. Attaching a clone after the result resolved cancels
/// the new subscription without touching the collector. Re-attaching while
/// pending follows [`Subscriber::on_subscribe`].
pub struct CollectingSubscriber<T, C: Collector<T>> {
  inner: Arc<Mutex<Collecting<C>>>,
  result: SharedState<C::Output>,
  _item: PhantomData<fn(T)>,
}

impl<T, C: Collector<T>> Clone for CollectingSubscriber<T, C> {
  fn clone(&self) -> Self {
    CollectingSubscriber {
      inner: self.inner.clone(),
      result: self.result.clone(),
      _item: PhantomData,
    }
  }
}

impl<T, C: Collector<T>> CollectingSubscriber<T, C> {
  pub fn new(collector: C) -> (Self, ResultFuture<C::Output>) {
    let result =
      Arc::new(Mutex::new(FutureState { resolution: Resolution::Pending, waker: None }));
    let subscriber = CollectingSubscriber {
      inner: Arc::new(Mutex::new(Collecting { collector, subscription: None, resolved: false })),
      result: result.clone(),
      _item: PhantomData,
    };
    (subscriber, ResultFuture { state: result })
  }

  pub fn is_resolved(&self) -> bool { self.inner.guard().resolved }
}

impl<T, C: Collector<T>> Subscriber<T> for CollectingSubscriber<T, C> {
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    let mut inner = self.inner.guard();
    if inner.resolved || is_abandoned(&self.result) {
      drop(inner);
      debug!("collecting subscriber already settled, cancelling new subscription");
      subscription.cancel();
      return;
    }
    let previous = inner.subscription.replace(subscription.clone());
    inner.collector.init(&subscription);
    drop(inner);
    if let Some(previous) = previous {
      debug!("collecting subscriber re-attached, cancelling previous subscription");
      previous.cancel();
    }
  }

  fn on_next(&mut self, value: T) {
    let (output, subscription) = {
      let mut inner = self.inner.guard();
      if inner.resolved {
        return;
      }
      if is_abandoned(&self.result) {
        debug!("result future dropped, cancelling collection");
        inner.resolved = true;
        (None, inner.subscription.take())
      } else if inner.collector.accumulate(value) {
        inner.resolved = true;
        (Some(inner.collector.finish()), inner.subscription.take())
      } else {
        return;
      }
    };
    if let Some(subscription) = subscription {
      subscription.cancel();
    }
    if let Some(output) = output {
      resolve(&self.result, Ok(output));
    }
  }

  fn on_error(self, err: FlowError) {
    {
      let mut inner = self.inner.guard();
      if inner.resolved {
        return;
      }
      inner.resolved = true;
      inner.subscription = None;
      inner.collector.fail(&err);
    }
    resolve(&self.result, Err(err));
  }

  fn on_complete(self) {
    let output = {
      let mut inner = self.inner.guard();
      if inner.resolved {
        return;
      }
      inner.resolved = true;
      inner.subscription = None;
      inner.collector.finish()
    };
    resolve(&self.result, Ok(output));
  }
}

// ============================================================================
// Free functions
// ============================================================================

/// Subscribes `collector` to `publisher` and returns the pending result.
pub fn collect<T, P, C>(publisher: &P, collector: C) -> ResultFuture<C::Output>
where
  T: 'static,
  P: Publisher<T> + ?Sized,
  C: Collector<T> + 'static,
{
  let (subscriber, future) = CollectingSubscriber::new(collector);
  publisher.subscribe(Box::new(subscriber));
  future
}

/// Resolves with the first `count` items, or fewer if the stream completes
/// early.
pub fn to_list<T, P>(publisher: &P, count: NonZeroUsize) -> ResultFuture<Vec<T>>
where
  T: Send + 'static,
  P: Publisher<T> + ?Sized,
{
  collect(publisher, ListCollector::new(count))
}

/// Resolves with the first item satisfying `condition`, or `None` once the
/// stream completes.
pub fn when_condition_or_complete<T, P, F>(publisher: &P, condition: F) -> ResultFuture<Option<T>>
where
  T: Send + 'static,
  P: Publisher<T> + ?Sized,
  F: FnMut(&T) -> bool + Send + 'static,
{
  collect(publisher, PredicateCollector::new(condition))
}

/// Subscribes `subscriber` to `publisher` for at most `limit` items, then
/// completes it. Resolves with the number of items delivered.
pub fn subscribe_with_limit<T, P, S>(
  publisher: &P, subscriber: S, limit: NonZeroUsize,
) -> ResultFuture<u64>
where
  T: 'static,
  P: Publisher<T> + ?Sized,
  S: Subscriber<T> + Send + 'static,
{
  collect(publisher, LimitCollector::new(subscriber, limit))
}
