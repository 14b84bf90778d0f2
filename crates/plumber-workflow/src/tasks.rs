//! Approval tasks and the step advancement state machine.
//!
//! An instance moves through its approver chain one task at a time. Only
//! the pending task can be actioned, and the store commits the actioned
//! task together with its consequence (the next task, or the finalized
//! instance) only while that task is still pending. Two approvers acting
//! on the same step therefore cannot both succeed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use plumber_config::FlowType;
use plumber_store::{
  Instance, InstanceStatus, NewTask, Page, StepCommit, Store, Task, TaskQuery, TaskStatus,
};
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::WorkflowError;
use crate::events::{EventNotifier, NoopNotifier, WorkflowEvent};
use crate::host::ContentTree;
use crate::permissions::PermissionResolver;

/// What an approver decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
  Approve,
  Reject,
  Cancel,
}

impl Outcome {
  pub fn status(self) -> TaskStatus {
    match self {
      Outcome::Approve => TaskStatus::Approved,
      Outcome::Reject => TaskStatus::Rejected,
      Outcome::Cancel => TaskStatus::Cancelled,
    }
  }
}

/// Result of actioning a task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Transition {
  /// No such task.
  NotFound,
  /// The task was already actioned, or its instance already settled, with
  /// `status`; nothing changed.
  InvalidState { status: TaskStatus },
  /// The task was approved and the next step is now pending.
  Advanced { task: Task, next: Task },
  /// The task settled its instance.
  Completed { task: Task, instance: Instance },
}

/// Reads and writes approval tasks and advances instances along their
/// approver chains.
pub struct TaskManager<N: EventNotifier = NoopNotifier> {
  store: Arc<dyn Store>,
  resolver: PermissionResolver,
  flow_type: FlowType,
  notifier: N,
}

impl TaskManager<NoopNotifier> {
  pub fn new(store: Arc<dyn Store>, content: Arc<dyn ContentTree>) -> Self {
    Self::with_notifier(store, content, NoopNotifier)
  }
}

impl<N: EventNotifier> TaskManager<N> {
  pub fn with_notifier(store: Arc<dyn Store>, content: Arc<dyn ContentTree>, notifier: N) -> Self {
    Self {
      resolver: PermissionResolver::new(store.clone(), content),
      store,
      flow_type: FlowType::default(),
      notifier,
    }
  }

  /// Set how approver chains are walked.
  pub fn flow_type(mut self, flow_type: FlowType) -> Self {
    self.flow_type = flow_type;
    self
  }

  /// Create a task. Returns `None` if the instance does not exist, the step
  /// does not directly follow the instance's last step, or the instance
  /// already has a pending task.
  pub async fn insert(&self, task: &NewTask) -> Result<Option<Task>, WorkflowError> {
    if self.store.get_instance(task.instance_id).await?.is_none() {
      warn!(instance_id = %task.instance_id, "task rejected: unknown instance");
      return Ok(None);
    }

    let existing = self
      .store
      .count_tasks(&TaskQuery::all().instance(task.instance_id))
      .await?;
    if i64::from(task.step) != existing + 1 {
      warn!(
        instance_id = %task.instance_id,
        step = task.step,
        expected = existing + 1,
        "task rejected: steps must be contiguous"
      );
      return Ok(None);
    }

    let Some(created) = self.store.insert_task(task).await? else {
      warn!(instance_id = %task.instance_id, step = task.step, "task rejected: instance already has a pending task");
      return Ok(None);
    };

    info!(task_id = created.task_id, instance_id = %created.instance_id, step = created.step, "task_created");
    self.notifier.notify(&WorkflowEvent::TaskCreated {
      task: created.clone(),
    })?;
    Ok(Some(created))
  }

  /// Persist status, comment and actor of a pending task. Returns `false`
  /// if the stored task has already been actioned.
  ///
  /// This does not move the instance along its chain; use
  /// [`action`](Self::action) for that.
  pub async fn update(&self, task: &Task) -> Result<bool, WorkflowError> {
    let mut task = task.clone();
    if task.status.is_terminal() && task.completed_at.is_none() {
      task.completed_at = Some(Utc::now());
    }
    if !self.store.update_task(&task).await? {
      warn!(task_id = task.task_id, "task update rejected: not pending");
      return Ok(false);
    }

    info!(task_id = task.task_id, status = task.status.as_str(), "task_updated");
    self.notifier.notify(&WorkflowEvent::TaskUpdated { task })?;
    Ok(true)
  }

  pub async fn count_pending(&self) -> Result<i64, WorkflowError> {
    Ok(self.store.count_tasks(&TaskQuery::all().pending()).await?)
  }

  /// Pending tasks assigned to a group.
  pub async fn count_for_group(&self, group_id: i64) -> Result<i64, WorkflowError> {
    Ok(
      self
        .store
        .count_tasks(&TaskQuery::all().pending().group(group_id))
        .await?,
    )
  }

  /// Tasks on instances the user authored, in the given statuses.
  pub async fn submissions_for_user(
    &self,
    user_id: i64,
    statuses: &[TaskStatus],
  ) -> Result<Vec<Task>, WorkflowError> {
    self
      .list(
        &TaskQuery::all()
          .author(user_id)
          .statuses(statuses.iter().copied()),
        None,
      )
      .await
  }

  /// Step history of an instance, first step first.
  pub async fn for_instance(&self, instance_id: Uuid) -> Result<Vec<Task>, WorkflowError> {
    self.list(&TaskQuery::all().instance(instance_id), None).await
  }

  pub async fn pending_for_groups(&self, group_ids: &[i64]) -> Result<Vec<Task>, WorkflowError> {
    self
      .list(
        &TaskQuery::all()
          .pending()
          .groups(group_ids.iter().copied()),
        None,
      )
      .await
  }

  pub async fn paged_pending_for_groups(
    &self,
    group_ids: &[i64],
    size: u32,
    page: u32,
  ) -> Result<Vec<Task>, WorkflowError> {
    self
      .list(
        &TaskQuery::all()
          .pending()
          .groups(group_ids.iter().copied()),
        Some(Page::new(page, size)),
      )
      .await
  }

  /// Pending tasks across every active group the user belongs to.
  pub async fn inbox(&self, user_id: i64, size: u32, page: u32) -> Result<Vec<Task>, WorkflowError> {
    let group_ids = self.store.group_ids_for_user(user_id).await?;
    self.paged_pending_for_groups(&group_ids, size, page).await
  }

  /// Tasks still open, or completed at or after `oldest`.
  pub async fn for_date_range(&self, oldest: DateTime<Utc>) -> Result<Vec<Task>, WorkflowError> {
    self.list(&TaskQuery::all().open_since(oldest), None).await
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
  ) -> Result<Vec<Task>, WorkflowError> {
    let mut query = TaskQuery::all().open_since(oldest);
    if let Some(status) = filter.and_then(TaskStatus::parse_filter) {
      query = query.status(status);
    }
    self.list(&query, Some(Page::new(page, size))).await
  }

  /// Every task on every instance of a node, oldest instance first.
  pub async fn by_node(&self, node_id: i64) -> Result<Vec<Task>, WorkflowError> {
    self.list(&TaskQuery::all().node(node_id), None).await
  }

  pub async fn by_id(&self, task_id: i64) -> Result<Option<Task>, WorkflowError> {
    Ok(self.store.get_task(task_id).await?)
  }

  /// Tasks of any status assigned to a group, newest first, one page.
  pub async fn paged_for_group(
    &self,
    group_id: i64,
    size: u32,
    page: u32,
  ) -> Result<Vec<Task>, WorkflowError> {
    self
      .list(&TaskQuery::all().group(group_id), Some(Page::new(page, size)))
      .await
  }

  /// Action a pending task and move its instance along.
  ///
  /// Rejecting or cancelling settles the instance with the same status.
  /// Approving creates the next step's task, or approves the instance when
  /// the chain is exhausted.
  #[instrument(name = "task_action", skip(self, comment))]
  pub async fn action(
    &self,
    task_id: i64,
    outcome: Outcome,
    actor_id: i64,
    comment: Option<String>,
  ) -> Result<Transition, WorkflowError> {
    let Some(task) = self.store.get_task(task_id).await? else {
      return Ok(Transition::NotFound);
    };
    if task.status.is_terminal() {
      warn!(task_id, status = task.status.as_str(), "task already actioned");
      return Ok(Transition::InvalidState {
        status: task.status,
      });
    }
    let Some(instance) = self.store.get_instance(task.instance_id).await? else {
      return Ok(Transition::NotFound);
    };
    if instance.status.is_terminal() {
      warn!(
        task_id,
        instance_id = %instance.instance_id,
        status = instance.status.as_str(),
        "instance already settled"
      );
      return Ok(Transition::InvalidState {
        status: instance.status.into(),
      });
    }

    let now = Utc::now();
    let actioned = Task {
      status: outcome.status(),
      completed_at: Some(now),
      comment,
      actor_id: Some(actor_id),
      ..task.clone()
    };

    let next_group = match outcome {
      Outcome::Approve => self.next_group(&instance, &task).await?,
      Outcome::Reject | Outcome::Cancel => None,
    };
    let step = match next_group {
      Some(group_id) => StepCommit {
        task: actioned,
        next: Some(NewTask::pending(instance.instance_id, group_id, task.step + 1)),
        instance: None,
      },
      None => StepCommit {
        task: actioned,
        next: None,
        instance: Some(Instance {
          status: outcome.status().instance_status(),
          completed_at: Some(now),
          ..instance.clone()
        }),
      },
    };

    let Some(committed) = self.store.commit_step(&step).await? else {
      return self.refused(&task).await;
    };

    info!(
      task_id,
      instance_id = %instance.instance_id,
      status = committed.task.status.as_str(),
      "task_actioned"
    );
    self.notifier.notify(&WorkflowEvent::TaskUpdated {
      task: committed.task.clone(),
    })?;

    match (committed.next, committed.instance) {
      (Some(next), _) => {
        info!(task_id = next.task_id, group_id = next.group_id, step = next.step, "task_created");
        self.notifier.notify(&WorkflowEvent::TaskCreated { task: next.clone() })?;
        Ok(Transition::Advanced {
          task: committed.task,
          next,
        })
      }
      (None, Some(finalized)) => {
        info!(instance_id = %finalized.instance_id, status = finalized.status.as_str(), "instance_completed");
        self.notifier.notify(&WorkflowEvent::InstanceStatusChanged {
          instance: finalized.clone(),
          previous: Some(InstanceStatus::Pending),
        })?;
        Ok(Transition::Completed {
          task: committed.task,
          instance: finalized,
        })
      }
      (None, None) => Ok(Transition::InvalidState {
        status: committed.task.status,
      }),
    }
  }

  /// The transition for a step the store refused to commit: either the task
  /// or its instance was settled concurrently.
  async fn refused(&self, task: &Task) -> Result<Transition, WorkflowError> {
    let mut status = self
      .store
      .get_task(task.task_id)
      .await?
      .map_or(task.status, |current| current.status);
    if !status.is_terminal() {
      if let Some(instance) = self.store.get_instance(task.instance_id).await? {
        status = instance.status.into();
      }
    }
    warn!(task_id = task.task_id, status = status.as_str(), "task actioned concurrently");
    Ok(Transition::InvalidState { status })
  }

  /// Group for the step after `task`, or `None` if the chain ends there.
  async fn next_group(&self, instance: &Instance, task: &Task) -> Result<Option<i64>, WorkflowError> {
    let Some(chain) = self.resolver.approver_chain(instance.node_id).await? else {
      warn!(instance_id = %instance.instance_id, node_id = instance.node_id, "approver chain gone, completing instance");
      return Ok(None);
    };

    let author_groups = if self.flow_type.skips_author_groups() {
      self.store.group_ids_for_user(instance.author_id).await?
    } else {
      Vec::new()
    };

    // Skipped groups mean the chain position can run ahead of the step.
    let position = chain
      .position_of(task.group_id)
      .unwrap_or_else(|| usize::try_from(task.step - 1).unwrap_or(0));
    Ok(
      chain
        .next_required(position + 1, self.flow_type, &author_groups)
        .and_then(|index| chain.group_at(index)),
    )
  }

  async fn list(&self, query: &TaskQuery, page: Option<Page>) -> Result<Vec<Task>, WorkflowError> {
    Ok(self.store.list_tasks(query, page).await?)
  }
}
