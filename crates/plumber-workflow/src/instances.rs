//! Workflow instance management.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use plumber_store::{
  Instance, InstanceQuery, InstanceStatus, NewTask, Page, Store, Task, TaskQuery,
};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::WorkflowError;
use crate::events::{EventNotifier, NoopNotifier, WorkflowEvent};
use crate::host::{ContentTree, UserDirectory};

/// Rendered in place of the name of a node that has been deleted.
pub const MISSING_NODE_NAME: &str = "NODE NO LONGER EXISTS";

/// An instance with its node and author resolved for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceView {
  #[serde(flatten)]
  pub instance: Instance,
  pub node_name: String,
  pub author_name: String,
}

/// Reads and writes workflow instances.
pub struct InstanceManager<N: EventNotifier = NoopNotifier> {
  store: Arc<dyn Store>,
  content: Arc<dyn ContentTree>,
  users: Arc<dyn UserDirectory>,
  notifier: N,
}

impl InstanceManager<NoopNotifier> {
  pub fn new(
    store: Arc<dyn Store>,
    content: Arc<dyn ContentTree>,
    users: Arc<dyn UserDirectory>,
  ) -> Self {
    Self::with_notifier(store, content, users, NoopNotifier)
  }
}

impl<N: EventNotifier> InstanceManager<N> {
  pub fn with_notifier(
    store: Arc<dyn Store>,
    content: Arc<dyn ContentTree>,
    users: Arc<dyn UserDirectory>,
    notifier: N,
  ) -> Self {
    Self {
      store,
      content,
      users,
      notifier,
    }
  }

  /// Persist a new instance. Returns `false` if it is pending and its node
  /// already has a pending instance.
  pub async fn insert(&self, instance: &Instance) -> Result<bool, WorkflowError> {
    if !instance.is_consistent() {
      warn!(instance_id = %instance.instance_id, "instance rejected: completion does not match status");
      return Ok(false);
    }
    if !self.store.insert_instance(instance).await? {
      warn!(
        instance_id = %instance.instance_id,
        node_id = instance.node_id,
        "instance rejected: node already pending"
      );
      return Ok(false);
    }

    info!(instance_id = %instance.instance_id, node_id = instance.node_id, "instance_inserted");
    self.notifier.notify(&WorkflowEvent::InstanceStatusChanged {
      instance: instance.clone(),
      previous: None,
    })?;
    Ok(true)
  }

  /// Persist a pending instance together with the task for its first
  /// approver group. Returns `None`, writing nothing, if the node already
  /// has a pending instance.
  pub async fn begin(
    &self,
    instance: &Instance,
    first_group_id: i64,
  ) -> Result<Option<Task>, WorkflowError> {
    let first = NewTask::pending(instance.instance_id, first_group_id, 1);
    let Some(task) = self.store.start_instance(instance, &first).await? else {
      warn!(
        instance_id = %instance.instance_id,
        node_id = instance.node_id,
        "instance rejected: node already pending"
      );
      return Ok(None);
    };

    info!(
      instance_id = %instance.instance_id,
      node_id = instance.node_id,
      task_id = task.task_id,
      group_id = first_group_id,
      "instance_started"
    );
    self.notifier.notify(&WorkflowEvent::InstanceStatusChanged {
      instance: instance.clone(),
      previous: None,
    })?;
    self.notifier.notify(&WorkflowEvent::TaskCreated { task: task.clone() })?;
    Ok(Some(task))
  }

  /// Replace the mutable fields of an instance. Returns `false` if it does
  /// not exist, its completion stamp disagrees with its status, or it would
  /// leave a terminal status.
  ///
  /// Status normally changes through task advancement; this persists
  /// whatever the caller decided. Settling a pending instance here also
  /// settles its pending task with the same status.
  pub async fn update(&self, instance: &Instance) -> Result<bool, WorkflowError> {
    if !instance.is_consistent() {
      warn!(instance_id = %instance.instance_id, "instance update rejected: completion does not match status");
      return Ok(false);
    }
    let Some(existing) = self.store.get_instance(instance.instance_id).await? else {
      return Ok(false);
    };
    if existing.status.is_terminal() && existing.status != instance.status {
      warn!(
        instance_id = %instance.instance_id,
        status = existing.status.as_str(),
        "instance update rejected: already completed"
      );
      return Ok(false);
    }
    let open_tasks = if instance.status.is_terminal() && !existing.status.is_terminal() {
      self
        .store
        .list_tasks(&TaskQuery::all().instance(instance.instance_id).pending(), None)
        .await?
    } else {
      Vec::new()
    };
    if !self.store.update_instance(instance).await? {
      return Ok(false);
    }

    for open in open_tasks {
      if let Some(task) = self.store.get_task(open.task_id).await? {
        self.notifier.notify(&WorkflowEvent::TaskUpdated { task })?;
      }
    }
    if existing.status != instance.status {
      info!(
        instance_id = %instance.instance_id,
        from = existing.status.as_str(),
        to = instance.status.as_str(),
        "instance_status_changed"
      );
      self.notifier.notify(&WorkflowEvent::InstanceStatusChanged {
        instance: instance.clone(),
        previous: Some(existing.status),
      })?;
    }
    Ok(true)
  }

  pub async fn by_guid(&self, instance_id: Uuid) -> Result<Option<Instance>, WorkflowError> {
    Ok(self.store.get_instance(instance_id).await?)
  }

  /// Instances for a node, newest first, one page.
  pub async fn by_node(
    &self,
    node_id: i64,
    page: u32,
    size: u32,
  ) -> Result<Vec<Instance>, WorkflowError> {
    self
      .list(&InstanceQuery::all().node(node_id), Some(Page::new(page, size)))
      .await
  }

  /// All instances, newest first, one page.
  pub async fn page(&self, page: u32, size: u32) -> Result<Vec<Instance>, WorkflowError> {
    self
      .list(&InstanceQuery::all(), Some(Page::new(page, size)))
      .await
  }

  pub async fn all(&self) -> Result<Vec<Instance>, WorkflowError> {
    self.list(&InstanceQuery::all(), None).await
  }

  pub async fn for_node_by_status(
    &self,
    node_id: i64,
    statuses: &[InstanceStatus],
  ) -> Result<Vec<Instance>, WorkflowError> {
    self
      .list(
        &InstanceQuery::all()
          .node(node_id)
          .statuses(statuses.iter().copied()),
        None,
      )
      .await
  }

  /// Instances still open, or completed at or after `oldest`.
  pub async fn for_date_range(
    &self,
    oldest: DateTime<Utc>,
  ) -> Result<Vec<Instance>, WorkflowError> {
    self
      .list(&InstanceQuery::all().open_since(oldest), None)
      .await
  }

  /// One page of [`for_date_range`](Self::for_date_range), optionally
  /// narrowed to the status named by `filter` (a code or a name). A filter
  /// that does not parse is ignored.
  pub async fn filtered_paged_for_date_range(
    &self,
    oldest: DateTime<Utc>,
    size: u32,
    page: u32,
    filter: Option<&str>,
  ) -> Result<Vec<Instance>, WorkflowError> {
    let mut query = InstanceQuery::all().open_since(oldest);
    if let Some(status) = filter.and_then(InstanceStatus::parse_filter) {
      query = query.status(status);
    }
    self.list(&query, Some(Page::new(page, size))).await
  }

  pub async fn count_all(&self) -> Result<i64, WorkflowError> {
    Ok(self.store.count_instances(&InstanceQuery::all()).await?)
  }

  pub async fn count_pending(&self) -> Result<i64, WorkflowError> {
    Ok(
      self
        .store
        .count_instances(&InstanceQuery::all().status(InstanceStatus::Pending))
        .await?,
    )
  }

  /// Resolve node and author names for display.
  pub async fn to_domain_view(
    &self,
    instances: &[Instance],
  ) -> Result<Vec<InstanceView>, WorkflowError> {
    let mut views = Vec::with_capacity(instances.len());
    for instance in instances {
      let node_name = match self.content.get_node(instance.node_id).await? {
        Some(node) => node.name,
        None => MISSING_NODE_NAME.to_string(),
      };
      let author_name = self
        .users
        .get_user(instance.author_id)
        .await?
        .map(|user| user.name)
        .unwrap_or_default();
      views.push(InstanceView {
        instance: instance.clone(),
        node_name,
        author_name,
      });
    }
    Ok(views)
  }

  async fn list(
    &self,
    query: &InstanceQuery,
    page: Option<Page>,
  ) -> Result<Vec<Instance>, WorkflowError> {
    Ok(self.store.list_instances(query, page).await?)
  }
}
