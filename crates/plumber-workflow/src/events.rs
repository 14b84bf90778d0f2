//! Domain events and notifiers.
//!
//! Every committed state change raises one event. Managers publish after the
//! store write succeeds, so a subscriber never observes a change that was
//! rolled back. Delivery is synchronous and ordered: a subscriber error is
//! returned to the caller of the operation that raised the event, and the
//! remaining subscribers are not called.

use std::sync::Arc;

use plumber_store::{Group, Instance, InstanceStatus, Permission, PermissionScope, Task};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;

use crate::error::NotifyError;

/// Events raised by workflow operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkflowEvent {
  /// A group was created.
  GroupCreated { group: Group },

  /// A group's fields or membership changed.
  GroupUpdated { group: Group },

  /// A group was soft-deleted.
  GroupDeleted { group_id: i64 },

  /// Node or content-type permission records were replaced.
  ConfigUpdated {
    config: Vec<(PermissionScope, Vec<Permission>)>,
  },

  /// An instance was created (`previous` is `None`) or changed status.
  InstanceStatusChanged {
    instance: Instance,
    previous: Option<InstanceStatus>,
  },

  /// A task was created.
  TaskCreated { task: Task },

  /// A task was actioned or otherwise updated.
  TaskUpdated { task: Task },
}

impl WorkflowEvent {
  /// Stable event name, used in logs and subscriber errors.
  pub fn name(&self) -> &'static str {
    match self {
      WorkflowEvent::GroupCreated { .. } => "group.created",
      WorkflowEvent::GroupUpdated { .. } => "group.updated",
      WorkflowEvent::GroupDeleted { .. } => "group.deleted",
      WorkflowEvent::ConfigUpdated { .. } => "config.updated",
      WorkflowEvent::InstanceStatusChanged { .. } => "instance.status_changed",
      WorkflowEvent::TaskCreated { .. } => "task.created",
      WorkflowEvent::TaskUpdated { .. } => "task.updated",
    }
  }
}

/// Trait for receiving workflow events.
///
/// Implementations decide what to do with an event (send mail, persist,
/// log). Returning an error surfaces the failure to the caller.
pub trait EventNotifier: Send + Sync {
  fn notify(&self, event: &WorkflowEvent) -> Result<(), NotifyError>;
}

impl<T: EventNotifier + ?Sized> EventNotifier for Arc<T> {
  fn notify(&self, event: &WorkflowEvent) -> Result<(), NotifyError> {
    (**self).notify(event)
  }
}

/// A no-op notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl EventNotifier for NoopNotifier {
  fn notify(&self, _event: &WorkflowEvent) -> Result<(), NotifyError> {
    Ok(())
  }
}

/// A notifier that forwards events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<WorkflowEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<WorkflowEvent>) -> Self {
    Self { sender }
  }
}

impl EventNotifier for ChannelNotifier {
  fn notify(&self, event: &WorkflowEvent) -> Result<(), NotifyError> {
    // Ignore send errors - receiver may have been dropped
    let _ = self.sender.send(event.clone());
    Ok(())
  }
}

/// A notifier that writes each event to the tracing log.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl EventNotifier for LogNotifier {
  fn notify(&self, event: &WorkflowEvent) -> Result<(), NotifyError> {
    match event {
      WorkflowEvent::GroupCreated { group } | WorkflowEvent::GroupUpdated { group } => {
        info!(event = event.name(), group_id = group.group_id, name = %group.name, "workflow_event");
      }
      WorkflowEvent::GroupDeleted { group_id } => {
        info!(event = event.name(), group_id, "workflow_event");
      }
      WorkflowEvent::ConfigUpdated { config } => {
        info!(event = event.name(), scopes = config.len(), "workflow_event");
      }
      WorkflowEvent::InstanceStatusChanged { instance, .. } => {
        info!(
          event = event.name(),
          instance_id = %instance.instance_id,
          status = instance.status.as_str(),
          "workflow_event"
        );
      }
      WorkflowEvent::TaskCreated { task } | WorkflowEvent::TaskUpdated { task } => {
        info!(
          event = event.name(),
          task_id = task.task_id,
          instance_id = %task.instance_id,
          status = task.status.as_str(),
          "workflow_event"
        );
      }
    }
    Ok(())
  }
}

/// Fans each event out to its subscribers in registration order.
#[derive(Default)]
pub struct EventBus {
  subscribers: Vec<Box<dyn EventNotifier>>,
}

impl EventBus {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add a subscriber.
  pub fn subscribe(mut self, subscriber: impl EventNotifier + 'static) -> Self {
    self.subscribers.push(Box::new(subscriber));
    self
  }

  pub fn len(&self) -> usize {
    self.subscribers.len()
  }

  pub fn is_empty(&self) -> bool {
    self.subscribers.is_empty()
  }
}

impl EventNotifier for EventBus {
  fn notify(&self, event: &WorkflowEvent) -> Result<(), NotifyError> {
    for subscriber in &self.subscribers {
      subscriber.notify(event)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Mutex;

  use super::*;

  struct Failing;

  impl EventNotifier for Failing {
    fn notify(&self, event: &WorkflowEvent) -> Result<(), NotifyError> {
      Err(NotifyError::new("failing", event.name(), "mail server down"))
    }
  }

  #[derive(Default)]
  struct Counting(Mutex<usize>);

  impl EventNotifier for Counting {
    fn notify(&self, _event: &WorkflowEvent) -> Result<(), NotifyError> {
      *self.0.lock().unwrap() += 1;
      Ok(())
    }
  }

  #[test]
  fn bus_delivers_in_order_and_stops_at_first_error() {
    let first = Arc::new(Counting::default());
    let last = Arc::new(Counting::default());
    let bus = EventBus::new()
      .subscribe(first.clone())
      .subscribe(Failing)
      .subscribe(last.clone());

    let err = bus
      .notify(&WorkflowEvent::GroupDeleted { group_id: 3 })
      .unwrap_err();

    assert_eq!(err.event, "group.deleted");
    assert_eq!(*first.0.lock().unwrap(), 1);
    assert_eq!(*last.0.lock().unwrap(), 0);
  }

  #[test]
  fn channel_notifier_ignores_dropped_receiver() {
    let (tx, rx) = mpsc::unbounded_channel();
    drop(rx);
    let notifier = ChannelNotifier::new(tx);
    assert!(notifier.notify(&WorkflowEvent::GroupDeleted { group_id: 1 }).is_ok());
  }
}
