//! Ordered collection of [`Subscribed`] states for one publishing source.

use std::sync::Arc;

use smallvec::SmallVec;

use super::Subscribed;
use crate::error::FlowError;

/// The subscribers of one source, in attachment order.
///
/// Not synchronized. Owners keep it behind their own lock and relay signals
/// over a cloned snapshot, so a subscriber that attaches, cancels or emits
/// from inside its callback only ever touches the owner's copy. Terminated
/// entries are pruned after each relay pass.
pub struct SubscribedList<T> {
  entries: SmallVec<[Arc<Subscribed<T>>; 2]>,
}

impl<T> Default for SubscribedList<T> {
  fn default() -> Self { SubscribedList { entries: SmallVec::new() } }
}

impl<T> Clone for SubscribedList<T> {
  fn clone(&self) -> Self { SubscribedList { entries: self.entries.clone() } }
}

impl<T> SubscribedList<T> {
  pub fn add(&mut self, subscribed: Arc<Subscribed<T>>) { self.entries.push(subscribed); }

  #[inline]
  pub fn len(&self) -> usize { self.entries.len() }

  #[inline]
  pub fn is_empty(&self) -> bool { self.entries.is_empty() }

  /// Drops every entry whose subscription has ended.
  pub fn prune(&mut self) { self.entries.retain(|s| !s.is_terminated()); }

  /// Largest pending-request count among live entries.
  pub fn max_pending(&self) -> i64 { self.entries.iter().map(|s| s.requests()).max().unwrap_or(0) }

  /// Delivers `on_error` to every entry and empties the list.
  pub fn error(self, err: FlowError) {
    for subscribed in self.entries {
      subscribed.error(err.clone());
    }
  }

  /// Delivers `on_complete` to every entry and empties the list.
  pub fn complete(self) {
    for subscribed in self.entries {
      subscribed.complete();
    }
  }
}

impl<T: Clone> SubscribedList<T> {
  /// Relays `value` to every entry with a pending request. Every entry but the
  /// last receives a clone.
  pub fn next(&self, value: T) {
    let len = self.entries.len();
    if len == 0 {
      return;
    }
    for idx in 0..len - 1 {
      self.entries[idx].next(value.clone());
    }
    self.entries[len - 1].next(value);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::{Event, Recorder};

  fn started(recorder: &Recorder<i32>, n: i64) -> Arc<Subscribed<i32>> {
    let subscribed = Subscribed::new(recorder.requesting(n));
    subscribed.start();
    subscribed
  }

  #[test]
  fn next_respects_each_entry_budget() {
    let (fast, slow) = (Recorder::<i32>::new(), Recorder::<i32>::new());
    let mut list = SubscribedList::default();
    list.add(started(&fast, 3));
    list.add(started(&slow, 1));

    for v in 1..=3 {
      list.next(v);
    }

    assert_eq!(fast.values(), vec![1, 2, 3]);
    assert_eq!(slow.values(), vec![1]);
    assert_eq!(list.max_pending(), 0);
  }

  #[test]
  fn prune_removes_cancelled_entries() {
    let (kept, dropped) = (Recorder::<i32>::new(), Recorder::<i32>::new());
    let mut list = SubscribedList::default();
    list.add(started(&kept, 5));
    list.add(started(&dropped, 5));

    dropped.cancel();
    list.next(1);
    list.prune();

    assert_eq!(list.len(), 1);
    assert_eq!(kept.values(), vec![1]);
    assert!(dropped.values().is_empty());
    assert_eq!(list.max_pending(), 4);
  }

  #[test]
  fn terminal_reaches_every_entry() {
    let (a, b) = (Recorder::<i32>::new(), Recorder::<i32>::new());
    let mut list = SubscribedList::default();
    list.add(started(&a, 1));
    list.add(started(&b, 1));

    list.error(FlowError::msg("boom"));

    assert_eq!(a.events(), vec![Event::Subscribed, Event::Error("boom".into())]);
    assert_eq!(b.events(), vec![Event::Subscribed, Event::Error("boom".into())]);
  }

  #[test]
  fn empty_list_is_quiet() {
    let list = SubscribedList::<i32>::default();
    list.next(1);
    assert!(list.is_empty());
    assert_eq!(list.max_pending(), 0);
    list.complete();
  }
}
