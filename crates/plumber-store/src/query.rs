//! Filters for instance and task queries.
//!
//! Filters are plain values; each `Some` field narrows the result. An
//! explicitly empty ID or status set matches nothing.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::types::{InstanceStatus, TaskStatus};

/// A 1-based page of results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
  pub page: u32,
  pub size: u32,
}

impl Page {
  pub fn new(page: u32, size: u32) -> Self {
    Self { page, size }
  }

  /// `(limit, offset)` for the page, or `None` if no row can be on it.
  pub fn bounds(&self) -> Option<(i64, i64)> {
    if self.page == 0 || self.size == 0 {
      return None;
    }
    let size = i64::from(self.size);
    Some((size, (i64::from(self.page) - 1) * size))
  }
}

/// Filter over workflow instances.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceQuery {
  pub node_id: Option<i64>,
  pub author_id: Option<i64>,
  pub statuses: Option<Vec<InstanceStatus>>,
  /// Still open, or completed at or after this time.
  pub open_since: Option<DateTime<Utc>>,
}

impl InstanceQuery {
  pub fn all() -> Self {
    Self::default()
  }

  pub fn node(mut self, node_id: i64) -> Self {
    self.node_id = Some(node_id);
    self
  }

  pub fn author(mut self, author_id: i64) -> Self {
    self.author_id = Some(author_id);
    self
  }

  pub fn statuses(mut self, statuses: impl IntoIterator<Item = InstanceStatus>) -> Self {
    self.statuses = Some(statuses.into_iter().collect());
    self
  }

  pub fn status(self, status: InstanceStatus) -> Self {
    self.statuses([status])
  }

  pub fn open_since(mut self, oldest: DateTime<Utc>) -> Self {
    self.open_since = Some(oldest);
    self
  }

  /// Whether the query cannot match any row.
  pub fn is_empty(&self) -> bool {
    self.statuses.as_ref().is_some_and(|s| s.is_empty())
  }
}

/// Filter over approval tasks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskQuery {
  pub instance_id: Option<Uuid>,
  /// Node of the owning instance.
  pub node_id: Option<i64>,
  /// Author of the owning instance.
  pub author_id: Option<i64>,
  pub group_ids: Option<Vec<i64>>,
  pub statuses: Option<Vec<TaskStatus>>,
  /// Still open, or completed at or after this time.
  pub open_since: Option<DateTime<Utc>>,
}

impl TaskQuery {
  pub fn all() -> Self {
    Self::default()
  }

  pub fn instance(mut self, instance_id: Uuid) -> Self {
    self.instance_id = Some(instance_id);
    self
  }

  pub fn node(mut self, node_id: i64) -> Self {
    self.node_id = Some(node_id);
    self
  }

  pub fn author(mut self, author_id: i64) -> Self {
    self.author_id = Some(author_id);
    self
  }

  pub fn groups(mut self, group_ids: impl IntoIterator<Item = i64>) -> Self {
    self.group_ids = Some(group_ids.into_iter().collect());
    self
  }

  pub fn group(self, group_id: i64) -> Self {
    self.groups([group_id])
  }

  pub fn statuses(mut self, statuses: impl IntoIterator<Item = TaskStatus>) -> Self {
    self.statuses = Some(statuses.into_iter().collect());
    self
  }

  pub fn status(self, status: TaskStatus) -> Self {
    self.statuses([status])
  }

  pub fn pending(self) -> Self {
    self.status(TaskStatus::Pending)
  }

  pub fn open_since(mut self, oldest: DateTime<Utc>) -> Self {
    self.open_since = Some(oldest);
    self
  }

  /// Whether the query cannot match any row.
  pub fn is_empty(&self) -> bool {
    self.statuses.as_ref().is_some_and(|s| s.is_empty())
      || self.group_ids.as_ref().is_some_and(|g| g.is_empty())
  }
}
