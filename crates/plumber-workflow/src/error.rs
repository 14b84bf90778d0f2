//! Error types for workflow operations.

use thiserror::Error;

/// Errors that can occur during workflow operations.
///
/// Business-rule rejections (duplicate names, a node already under
/// approval, a task that is no longer pending) are not errors; operations
/// report them through their return value.
#[derive(Debug, Error)]
pub enum WorkflowError {
  /// The store failed.
  #[error("store error: {0}")]
  Store(#[from] plumber_store::Error),

  /// A host lookup (content tree, user directory) failed.
  #[error("host error: {0}")]
  Host(#[from] HostError),

  /// A subscriber failed while handling an event. The state change that
  /// raised the event has already been committed.
  #[error("event delivery failed: {0}")]
  Notify(#[from] NotifyError),
}

/// Failure reported by a host collaborator.
#[derive(Debug, Error)]
pub enum HostError {
  #[error("host unavailable: {message}")]
  Unavailable { message: String },

  #[error("invalid host data: {message}")]
  InvalidData { message: String },
}

/// Failure reported by an event subscriber.
#[derive(Debug, Error)]
#[error("subscriber '{subscriber}' failed on {event}: {message}")]
pub struct NotifyError {
  pub subscriber: String,
  pub event: &'static str,
  pub message: String,
}

impl NotifyError {
  pub fn new(
    subscriber: impl Into<String>,
    event: &'static str,
    message: impl Into<String>,
  ) -> Self {
    Self {
      subscriber: subscriber.into(),
      event,
      message: message.into(),
    }
  }
}
