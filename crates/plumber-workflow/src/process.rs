//! The approval process as seen by an editor or an approver.

use std::sync::Arc;

use plumber_config::Settings;
use plumber_store::{ChangeType, Group, Instance, Store, Task, TaskStatus};
use serde::Serialize;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::chain::ApproverChain;
use crate::error::WorkflowError;
use crate::events::{EventNotifier, NoopNotifier};
use crate::groups::GroupRegistry;
use crate::host::{ContentTree, UserDirectory};
use crate::instances::InstanceManager;
use crate::permissions::PermissionResolver;
use crate::tasks::{Outcome, TaskManager, Transition};

/// Result of submitting a change for approval.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Initiation {
  /// The instance and its first task were created.
  Started { instance: Instance, task: Task },
  /// The node bypasses approval.
  Excluded,
  /// No permission records apply to the node.
  NoWorkflow,
  /// The content tree does not know the node.
  NodeNotFound,
  /// The node already has a pending instance.
  AlreadyPending,
}

/// Wires the managers together over one store, one host and one notifier.
pub struct Approvals<N: EventNotifier + Clone = NoopNotifier> {
  store: Arc<dyn Store>,
  content: Arc<dyn ContentTree>,
  settings: Settings,
  permissions: PermissionResolver<N>,
  instances: InstanceManager<N>,
  tasks: TaskManager<N>,
  groups: GroupRegistry<N>,
}

impl Approvals<NoopNotifier> {
  pub fn new(
    store: Arc<dyn Store>,
    content: Arc<dyn ContentTree>,
    users: Arc<dyn UserDirectory>,
    settings: Settings,
  ) -> Self {
    Self::with_notifier(store, content, users, settings, NoopNotifier)
  }
}

impl<N: EventNotifier + Clone> Approvals<N> {
  pub fn with_notifier(
    store: Arc<dyn Store>,
    content: Arc<dyn ContentTree>,
    users: Arc<dyn UserDirectory>,
    settings: Settings,
    notifier: N,
  ) -> Self {
    Self {
      permissions: PermissionResolver::with_notifier(store.clone(), content.clone(), notifier.clone()),
      instances: InstanceManager::with_notifier(
        store.clone(),
        content.clone(),
        users.clone(),
        notifier.clone(),
      ),
      tasks: TaskManager::with_notifier(store.clone(), content.clone(), notifier.clone())
        .flow_type(settings.flow_type),
      groups: GroupRegistry::with_notifier(store.clone(), users, notifier),
      store,
      content,
      settings,
    }
  }

  pub fn settings(&self) -> &Settings {
    &self.settings
  }

  pub fn permissions(&self) -> &PermissionResolver<N> {
    &self.permissions
  }

  pub fn instances(&self) -> &InstanceManager<N> {
    &self.instances
  }

  pub fn tasks(&self) -> &TaskManager<N> {
    &self.tasks
  }

  pub fn groups(&self) -> &GroupRegistry<N> {
    &self.groups
  }

  /// Submit a change to a node for approval.
  #[instrument(name = "initiate", skip(self, comment))]
  pub async fn initiate(
    &self,
    node_id: i64,
    author_id: i64,
    change_type: ChangeType,
    comment: Option<String>,
  ) -> Result<Initiation, WorkflowError> {
    if self.settings.is_excluded(node_id) {
      return Ok(Initiation::Excluded);
    }
    let Some(node) = self.content.get_node(node_id).await? else {
      return Ok(Initiation::NodeNotFound);
    };
    let Some(chain) = self
      .permissions
      .recursive_permissions_for_node(Some(&node))
      .await?
      .and_then(ApproverChain::new)
    else {
      return Ok(Initiation::NoWorkflow);
    };

    let author_groups = if self.settings.flow_type.skips_author_groups() {
      self.store.group_ids_for_user(author_id).await?
    } else {
      Vec::new()
    };
    let Some(first_group) = chain
      .next_required(0, self.settings.flow_type, &author_groups)
      .and_then(|index| chain.group_at(index))
    else {
      return Ok(Initiation::NoWorkflow);
    };

    let instance = Instance::new(node_id, author_id, change_type, comment);
    let Some(task) = self.instances.begin(&instance, first_group).await? else {
      return Ok(Initiation::AlreadyPending);
    };

    info!(instance_id = %instance.instance_id, steps = chain.len(), "approval_initiated");
    Ok(Initiation::Started { instance, task })
  }

  pub async fn approve(
    &self,
    task_id: i64,
    actor_id: i64,
    comment: Option<String>,
  ) -> Result<Transition, WorkflowError> {
    self.tasks.action(task_id, Outcome::Approve, actor_id, comment).await
  }

  pub async fn reject(
    &self,
    task_id: i64,
    actor_id: i64,
    comment: Option<String>,
  ) -> Result<Transition, WorkflowError> {
    self.tasks.action(task_id, Outcome::Reject, actor_id, comment).await
  }

  pub async fn cancel(
    &self,
    task_id: i64,
    actor_id: i64,
    comment: Option<String>,
  ) -> Result<Transition, WorkflowError> {
    self.tasks.action(task_id, Outcome::Cancel, actor_id, comment).await
  }

  /// Cancel an instance through its pending task. Returns
  /// [`Transition::NotFound`] if the instance has no pending task.
  pub async fn cancel_instance(
    &self,
    instance_id: Uuid,
    actor_id: i64,
    comment: Option<String>,
  ) -> Result<Transition, WorkflowError> {
    let pending = self
      .tasks
      .for_instance(instance_id)
      .await?
      .into_iter()
      .find(|task| task.status == TaskStatus::Pending);
    match pending {
      Some(task) => self.cancel(task.task_id, actor_id, comment).await,
      None => Ok(Transition::NotFound),
    }
  }

  /// Addresses to notify for a group's tasks: the group's preferred
  /// addresses, else the configured fallback address.
  pub async fn recipients(&self, group: &Group) -> Result<Vec<String>, WorkflowError> {
    let emails = self.groups.preferred_emails(group).await?;
    if !emails.is_empty() {
      return Ok(emails);
    }
    Ok(self.settings.notification_email.iter().cloned().collect())
  }

  /// A user's pending tasks, one page of the configured page size.
  pub async fn inbox(&self, user_id: i64, page: u32) -> Result<Vec<Task>, WorkflowError> {
    self.tasks.inbox(user_id, self.settings.page_size, page).await
  }
}
