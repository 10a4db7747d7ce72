use crate::{
  error::FlowError,
  publisher::Publisher,
  subscriber::{BoxedSubscriber, Subscriber},
  subscription::{NoopSubscription, Subscribed, SubscribedList},
};

/// A publisher that has already ended.
///
/// Each subscriber receives a no-op subscription followed immediately by the
/// terminal signal. Stateful publishers keep one of these as their final
/// state so late subscribers still observe how the stream ended.
#[derive(Debug, Clone)]
pub enum TerminalPublisher {
  Completed,
  Failed(FlowError),
}

impl TerminalPublisher {
  /// Sends this terminal signal through an accounting state.
  pub fn terminate<T>(&self, subscribed: &Subscribed<T>) {
    match self {
      TerminalPublisher::Completed => subscribed.complete(),
      TerminalPublisher::Failed(err) => subscribed.error(err.clone()),
    }
  }

  /// Sends this terminal signal to every entry of `list`.
  pub fn terminate_all<T>(&self, list: SubscribedList<T>) {
    match self {
      TerminalPublisher::Completed => list.complete(),
      TerminalPublisher::Failed(err) => list.error(err.clone()),
    }
  }

  pub fn as_label(&self) -> &'static str {
    match self {
      TerminalPublisher::Completed => "completed",
      TerminalPublisher::Failed(_) => "failed",
    }
  }
}

impl<T> Publisher<T> for TerminalPublisher {
  fn subscribe(&self, mut subscriber: BoxedSubscriber<T>) {
    subscriber.on_subscribe(NoopSubscription::shared());
    match self {
      TerminalPublisher::Completed => subscriber.on_complete(),
      TerminalPublisher::Failed(err) => subscriber.on_error(err.clone()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::{Event, Recorder};

  #[test]
  fn completed_grants_subscription_before_completing() {
    let recorder = Recorder::<i32>::new();
    TerminalPublisher::Completed.subscribe(recorder.requesting(3));
    assert_eq!(recorder.events(), vec![Event::Subscribed, Event::Complete]);
  }

  #[test]
  fn failed_delivers_the_same_cause_to_every_subscriber() {
    let publisher = TerminalPublisher::Failed(FlowError::msg("broken source"));
    let (a, b) = (Recorder::<i32>::new(), Recorder::<i32>::new());
    publisher.subscribe(a.subscriber());
    publisher.subscribe(b.requesting(1));

    for recorder in [a, b] {
      assert_eq!(
        recorder.events(),
        vec![Event::Subscribed, Event::Error("broken source".into())]
      );
    }
  }
}
