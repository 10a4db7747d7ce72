//! Error types shared by publishers, subscribers and shared resources.
//!
//! [`FlowError`] is the payload of every `on_error` signal. It is `Clone` so
//! one terminal failure can be multicast to any number of subscribers.
//! [`ClosedError`] is deliberately a separate type: acquiring a resource that
//! has already been fully released is a usage bug on the consumer side, not a
//! stream failure.

use std::{error::Error, fmt, sync::Arc};

use thiserror::Error;

/// Boxed error returned by fallible resource cleanup.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Failure carried by an `on_error` signal.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum FlowError {
  /// A subscriber requested zero or a negative number of items.
  #[error("must request a positive number of items: {0}")]
  NonPositiveRequest(i64),

  /// An upstream subscription was attached to a slot that already had one.
  #[error("cannot replace an existing subscription")]
  SubscriptionAlreadySet,

  /// A processor transform rejected an item.
  #[error("processing failed: {0}")]
  Processing(String),

  /// A shared resource was used after it had been fully released.
  #[error(transparent)]
  Closed(#[from] ClosedError),

  /// Failure raised by an upstream collaborator.
  #[error("upstream failure: {0}")]
  Upstream(Arc<dyn Error + Send + Sync + 'static>),

  /// Free-form failure.
  #[error("{0}")]
  Message(String),
}

impl FlowError {
  /// Wraps an arbitrary error as an upstream failure.
  pub fn upstream<E>(err: E) -> Self
  where
    E: Error + Send + Sync + 'static,
  {
    FlowError::Upstream(Arc::new(err))
  }

  /// Creates a free-form failure.
  pub fn msg(message: impl Into<String>) -> Self { FlowError::Message(message.into()) }

  /// Returns a short stable label for logs.
  pub fn as_label(&self) -> &'static str {
    match self {
      FlowError::NonPositiveRequest(_) => "non_positive_request",
      FlowError::SubscriptionAlreadySet => "subscription_already_set",
      FlowError::Processing(_) => "processing",
      FlowError::Closed(_) => "closed",
      FlowError::Upstream(_) => "upstream",
      FlowError::Message(_) => "message",
    }
  }

  /// True for errors caused by a caller breaking the publisher/subscriber
  /// protocol rather than by the data source.
  pub fn is_protocol_violation(&self) -> bool {
    matches!(self, FlowError::NonPositiveRequest(_) | FlowError::SubscriptionAlreadySet)
  }
}

/// Returned when acquiring a shared resource whose last hold was already
/// released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClosedError;

impl fmt::Display for ClosedError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(
      "failed to acquire a shared resource that has already been fully closed; subscribers of \
       shared values must acquire immediately inside on_next",
    )
  }
}

impl Error for ClosedError {}
