//! Per-subscriber request accounting and serialized signal delivery.
//!
//! [`Subscribed`] is the state a publisher keeps for one attached subscriber:
//! the pending-request counter, the active/terminated flag and the subscriber
//! itself. Publishers never call the subscriber directly; they go through
//! `Subscribed`, which enforces the protocol ordering.
//!
//! ## Reentrancy
//!
//! A subscriber may, from inside one of its own callbacks, request more items,
//! cancel, or make the publisher emit again. Those nested signals are queued
//! on the subscriber's backlog and delivered on the same call stack as soon as
//! the running callback returns, so the subscriber never observes overlapping
//! callbacks and no lock is held while user code runs. Signals raised on other
//! threads wait until the in-flight callback has returned.

use std::{
  collections::VecDeque,
  fmt, mem,
  sync::{
    atomic::{AtomicI64, AtomicU8, Ordering},
    Arc, Condvar, Mutex, Weak,
  },
  thread::{self, ThreadId},
};

use log::warn;

use crate::{
  error::FlowError,
  lock::{CondvarExt, MutexExt},
  subscriber::{BoxedSubscriber, Subscriber},
  subscription::{Subscription, SubscriptionRef},
};

const ACTIVE: u8 = 0;
const CANCELLED: u8 = 1;
const TERMINATED: u8 = 2;

/// Request accounting for one (publisher, subscriber) pair.
///
/// The pending counter only grows through [`request`](Self::request) and only
/// shrinks by one per delivered [`next`](Self::next). Once cancelled or
/// terminated the subscriber reference is released and never restored.
pub struct Subscribed<T> {
  requests: AtomicI64,
  status: AtomicU8,
  slot: Mutex<Slot<T>>,
  idle: Condvar,
}

struct Slot<T> {
  subscriber: Option<BoxedSubscriber<T>>,
  started: bool,
  busy: Option<ThreadId>,
  backlog: VecDeque<Signal<T>>,
}

enum Signal<T> {
  Subscribe(SubscriptionRef),
  Next(T),
  Error(FlowError),
  Complete,
}

impl<T> Subscribed<T> {
  pub fn new(subscriber: BoxedSubscriber<T>) -> Arc<Self> {
    Arc::new(Subscribed {
      requests: AtomicI64::new(0),
      status: AtomicU8::new(ACTIVE),
      slot: Mutex::new(Slot {
        subscriber: Some(subscriber),
        started: false,
        busy: None,
        backlog: VecDeque::new(),
      }),
      idle: Condvar::new(),
    })
  }

  /// Outstanding requests, or 0 once the subscription has ended.
  pub fn requests(&self) -> i64 {
    if self.is_terminated() {
      0
    } else {
      self.requests.load(Ordering::Acquire)
    }
  }

  /// True once cancelled, completed or errored.
  #[inline]
  pub fn is_terminated(&self) -> bool { self.status.load(Ordering::Acquire) != ACTIVE }

  #[inline]
  fn is_cancelled(&self) -> bool { self.status.load(Ordering::Acquire) == CANCELLED }

  /// Adds `n` to the pending counter and returns the new total.
  ///
  /// A non-positive `n` errors the subscriber with
  /// [`FlowError::NonPositiveRequest`] and leaves the counter unchanged.
  pub fn request(&self, n: i64) -> i64 {
    if n <= 0 {
      warn!("subscriber requested {n} items, terminating its subscription");
      self.error(FlowError::NonPositiveRequest(n));
      return self.requests();
    }
    let previous = self
      .requests
      .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pending| {
        Some(pending.saturating_add(n))
      })
      .unwrap_or_else(|pending| pending);
    previous.saturating_add(n)
  }

  /// Consumes one pending request and delivers `value` if one was pending.
  ///
  /// Returns `true` if the value was handed to the subscriber and the
  /// subscription is still active afterwards.
  pub fn next(&self, value: T) -> bool {
    let pending = self
      .requests
      .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pending| Some((pending - 1).max(0)))
      .unwrap_or_else(|pending| pending);
    if pending <= 0 || self.is_terminated() {
      return false;
    }
    self.deliver(Signal::Next(value));
    !self.is_terminated()
  }

  /// Delivers `on_error` unless the subscription already ended.
  pub fn error(&self, err: FlowError) {
    if self.transition(TERMINATED) {
      self.deliver(Signal::Error(err));
    }
  }

  /// Delivers `on_complete` unless the subscription already ended.
  pub fn complete(&self) {
    if self.transition(TERMINATED) {
      self.deliver(Signal::Complete);
    }
  }

  /// Stops delivery and releases the subscriber. Idempotent.
  pub fn cancel(&self) {
    if !self.transition(CANCELLED) {
      return;
    }
    let (retired, backlog) = {
      let mut slot = self.slot.guard();
      // A running callback releases the subscriber itself when it returns.
      if slot.busy.is_some() {
        return;
      }
      (slot.subscriber.take(), mem::take(&mut slot.backlog))
    };
    drop(backlog);
    drop(retired);
  }

  fn transition(&self, to: u8) -> bool {
    self.status.compare_exchange(ACTIVE, to, Ordering::AcqRel, Ordering::Acquire).is_ok()
  }

  /// Delivers `subscription` through `on_subscribe`, then anything that was
  /// signalled before the subscriber was started.
  pub fn start_with(&self, subscription: SubscriptionRef) {
    self.deliver(Signal::Subscribe(subscription));
  }

  fn deliver(&self, signal: Signal<T>) {
    let me = thread::current().id();
    let mut slot = self.slot.guard();
    loop {
      match slot.busy {
        Some(owner) if owner == me => {
          slot.backlog.push_back(signal);
          return;
        }
        Some(_) => slot = self.idle.wait_on(slot),
        None => break,
      }
    }
    if matches!(signal, Signal::Subscribe(_)) {
      if slot.started {
        return;
      }
      slot.started = true;
    } else if !slot.started {
      slot.backlog.push_back(signal);
      return;
    }
    let Some(subscriber) = slot.subscriber.take() else { return };
    slot.busy = Some(me);
    drop(slot);

    Drain { owner: self, subscriber: Some(subscriber) }.run(signal);
  }
}

impl<T: Send + 'static> Subscribed<T> {
  /// Returns a handle whose `request`/`cancel` act on this state only.
  ///
  /// The handle holds a weak reference, so a subscriber keeping its handle
  /// does not keep its own accounting state alive.
  pub fn handle(self: &Arc<Self>) -> SubscriptionRef {
    Arc::new(SubscribedHandle(Arc::downgrade(self)))
  }

  /// Starts delivery with this state's own handle and returns that handle.
  pub fn start(self: &Arc<Self>) -> SubscriptionRef {
    let handle = self.handle();
    self.start_with(handle.clone());
    handle
  }
}

impl<T> fmt::Debug for Subscribed<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let status = match self.status.load(Ordering::Acquire) {
      ACTIVE => "active",
      CANCELLED => "cancelled",
      _ => "terminated",
    };
    f.debug_struct("Subscribed")
      .field("requests", &self.requests.load(Ordering::Acquire))
      .field("status", &status)
      .finish()
  }
}

/// Exclusive delivery session. Holds the subscriber outside the lock while
/// its callbacks run and hands it back (or retires it) when dropped.
struct Drain<'a, T> {
  owner: &'a Subscribed<T>,
  subscriber: Option<BoxedSubscriber<T>>,
}

impl<T> Drain<'_, T> {
  fn run(mut self, first: Signal<T>) {
    let mut signal = first;
    loop {
      self.dispatch(signal);
      match self.next_signal() {
        Some(next) => signal = next,
        None => return,
      }
    }
  }

  fn dispatch(&mut self, signal: Signal<T>) {
    if self.owner.is_cancelled() {
      return;
    }
    match signal {
      Signal::Subscribe(subscription) => {
        if let Some(subscriber) = self.subscriber.as_mut() {
          subscriber.on_subscribe(subscription);
        }
      }
      Signal::Next(value) => {
        if let Some(subscriber) = self.subscriber.as_mut() {
          subscriber.on_next(value);
        }
      }
      Signal::Error(err) => {
        if let Some(subscriber) = self.subscriber.take() {
          subscriber.on_error(err);
        }
      }
      Signal::Complete => {
        if let Some(subscriber) = self.subscriber.take() {
          subscriber.on_complete();
        }
      }
    }
  }

  fn next_signal(&mut self) -> Option<Signal<T>> {
    if self.subscriber.is_none() || self.owner.is_cancelled() {
      return None;
    }
    self.owner.slot.guard().backlog.pop_front()
  }
}

impl<T> Drop for Drain<'_, T> {
  fn drop(&mut self) {
    // A panicking subscriber is treated as cancelled.
    if thread::panicking() {
      self.owner.status.store(CANCELLED, Ordering::Release);
    }
    let (retired, backlog) = {
      let mut slot = self.owner.slot.guard();
      slot.busy = None;
      if self.subscriber.is_some() && !self.owner.is_cancelled() {
        slot.subscriber = self.subscriber.take();
        (None, VecDeque::new())
      } else {
        (self.subscriber.take(), mem::take(&mut slot.backlog))
      }
    };
    self.owner.idle.notify_all();
    drop(backlog);
    drop(retired);
  }
}

struct SubscribedHandle<T>(Weak<Subscribed<T>>);

impl<T: Send + 'static> Subscription for SubscribedHandle<T> {
  fn request(&self, n: i64) {
    if let Some(subscribed) = self.0.upgrade() {
      subscribed.request(n);
    }
  }

  fn cancel(&self) {
    if let Some(subscribed) = self.0.upgrade() {
      subscribed.cancel();
    }
  }
}
