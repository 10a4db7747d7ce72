//! Recording subscribers and probe publishers for unit tests.

use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc, Mutex,
};

use crate::{
  error::FlowError,
  lock::MutexExt,
  publisher::Publisher,
  subscriber::{BoxedSubscriber, Subscriber},
  subscription::{Subscription, SubscriptionRef},
};

#[derive(Debug, Clone, PartialEq)]
pub enum Event<T> {
  Subscribed,
  Next(T),
  Error(String),
  Complete,
}

type Hook<T> = Box<dyn FnMut(T) + Send>;

/// Records every signal a subscriber receives and keeps its subscription
/// handle so the test can request or cancel from outside.
pub struct Recorder<T> {
  events: Arc<Mutex<Vec<Event<T>>>>,
  subscription: Arc<Mutex<Option<SubscriptionRef>>>,
}

impl<T> Clone for Recorder<T> {
  fn clone(&self) -> Self {
    Recorder { events: self.events.clone(), subscription: self.subscription.clone() }
  }
}

impl<T: Clone + Send + 'static> Recorder<T> {
  pub fn new() -> Self {
    Recorder { events: Arc::new(Mutex::new(vec![])), subscription: Arc::new(Mutex::new(None)) }
  }

  /// A subscriber that requests nothing on subscribe.
  pub fn subscriber(&self) -> BoxedSubscriber<T> { self.recording(0, None) }

  /// A subscriber that requests `n` items on subscribe.
  pub fn requesting(&self, n: i64) -> BoxedSubscriber<T> { self.recording(n, None) }

  /// A subscriber that runs `hook` after recording each item.
  pub fn subscriber_with(&self, hook: impl FnMut(T) + Send + 'static) -> BoxedSubscriber<T> {
    self.recording(0, Some(Box::new(hook)))
  }

  fn recording(&self, initial: i64, hook: Option<Hook<T>>) -> BoxedSubscriber<T> {
    Box::new(Recording {
      events: self.events.clone(),
      subscription: self.subscription.clone(),
      initial,
      hook,
    })
  }

  pub fn events(&self) -> Vec<Event<T>> { self.events.guard().clone() }

  pub fn values(&self) -> Vec<T> {
    self
      .events
      .guard()
      .iter()
      .filter_map(|e| match e {
        Event::Next(v) => Some(v.clone()),
        _ => None,
      })
      .collect()
  }

  pub fn is_subscribed(&self) -> bool {
    self.events.guard().iter().any(|e| matches!(e, Event::Subscribed))
  }

  pub fn is_completed(&self) -> bool {
    self.events.guard().iter().any(|e| matches!(e, Event::Complete))
  }

  pub fn error(&self) -> Option<String> {
    self.events.guard().iter().find_map(|e| match e {
      Event::Error(msg) => Some(msg.clone()),
      _ => None,
    })
  }

  pub fn terminal_count(&self) -> usize {
    self.events.guard().iter().filter(|e| matches!(e, Event::Error(_) | Event::Complete)).count()
  }

  pub fn request(&self, n: i64) {
    let subscription = self.subscription.guard().clone();
    if let Some(subscription) = subscription {
      subscription.request(n);
    }
  }

  pub fn cancel(&self) {
    let subscription = self.subscription.guard().clone();
    if let Some(subscription) = subscription {
      subscription.cancel();
    }
  }
}

struct Recording<T> {
  events: Arc<Mutex<Vec<Event<T>>>>,
  subscription: Arc<Mutex<Option<SubscriptionRef>>>,
  initial: i64,
  hook: Option<Hook<T>>,
}

impl<T: Clone> Subscriber<T> for Recording<T> {
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    *self.subscription.guard() = Some(subscription.clone());
    self.events.guard().push(Event::Subscribed);
    if self.initial > 0 {
      subscription.request(self.initial);
    }
  }

  fn on_next(&mut self, value: T) {
    self.events.guard().push(Event::Next(value.clone()));
    if let Some(hook) = self.hook.as_mut() {
      hook(value);
    }
  }

  fn on_error(self, err: FlowError) { self.events.guard().push(Event::Error(err.to_string())); }

  fn on_complete(self) { self.events.guard().push(Event::Complete); }
}

/// Subscription that only records what it is asked to do.
#[derive(Default)]
pub struct Probe {
  requests: Mutex<Vec<i64>>,
  cancels: AtomicUsize,
}

impl Probe {
  pub fn requests(&self) -> Vec<i64> { self.requests.guard().clone() }

  pub fn total(&self) -> i64 { self.requests.guard().iter().fold(0i64, |a, n| a.saturating_add(*n)) }

  pub fn is_cancelled(&self) -> bool { self.cancels.load(Ordering::SeqCst) > 0 }
}

impl Subscription for Probe {
  fn request(&self, n: i64) { self.requests.guard().push(n); }

  fn cancel(&self) { self.cancels.fetch_add(1, Ordering::SeqCst); }
}

struct Attached<T> {
  probe: Arc<Probe>,
  subscriber: Option<BoxedSubscriber<T>>,
}

/// Publisher that hands each subscriber a [`Probe`] and lets the test emit
/// signals to individual subscribers by index.
pub struct ProbePublisher<T> {
  attached: Mutex<Vec<Attached<T>>>,
}

impl<T> ProbePublisher<T> {
  pub fn new() -> Self { ProbePublisher { attached: Mutex::new(vec![]) } }

  pub fn len(&self) -> usize { self.attached.guard().len() }

  pub fn probe(&self, index: usize) -> Arc<Probe> { self.attached.guard()[index].probe.clone() }

  pub fn emit(&self, index: usize, value: T) {
    let subscriber = self.attached.guard()[index].subscriber.take();
    if let Some(mut subscriber) = subscriber {
      subscriber.on_next(value);
      self.attached.guard()[index].subscriber = Some(subscriber);
    }
  }

  pub fn complete(&self, index: usize) {
    let subscriber = self.attached.guard()[index].subscriber.take();
    if let Some(subscriber) = subscriber {
      subscriber.on_complete();
    }
  }

  pub fn error(&self, index: usize, err: FlowError) {
    let subscriber = self.attached.guard()[index].subscriber.take();
    if let Some(subscriber) = subscriber {
      subscriber.on_error(err);
    }
  }
}

impl<T: Send> Publisher<T> for ProbePublisher<T> {
  fn subscribe(&self, mut subscriber: BoxedSubscriber<T>) {
    let probe = Arc::new(Probe::default());
    subscriber.on_subscribe(probe.clone());
    self.attached.guard().push(Attached { probe, subscriber: Some(subscriber) });
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::publisher::DirectPublisher;

  #[derive(Clone)]
  struct Reading(u8);

  #[test]
  fn recorder_works_for_items_without_equality() {
    let publisher = DirectPublisher::<Reading>::new();
    let recorder = Recorder::<Reading>::new();
    publisher.subscribe(recorder.requesting(1));
    assert!(recorder.is_subscribed());

    publisher.next(Reading(7));
    publisher.complete();

    assert!(recorder.is_completed());
    assert_eq!(recorder.values().iter().map(|r| r.0).collect::<Vec<_>>(), vec![7]);
    assert_eq!(recorder.terminal_count(), 1);
  }
}
