use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Status of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum InstanceStatus {
  Pending,
  Approved,
  Rejected,
  Cancelled,
}

/// Status of an approval task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TaskStatus {
  Pending,
  Approved,
  Rejected,
  Cancelled,
}

/// The kind of content change an instance is approving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ChangeType {
  Publish,
  Unpublish,
}

impl InstanceStatus {
  pub const ALL: [InstanceStatus; 4] = [
    InstanceStatus::Pending,
    InstanceStatus::Approved,
    InstanceStatus::Rejected,
    InstanceStatus::Cancelled,
  ];

  pub fn is_terminal(self) -> bool {
    !matches!(self, InstanceStatus::Pending)
  }

  /// Legacy numeric code used by status filters.
  pub fn code(self) -> i32 {
    match self {
      InstanceStatus::Approved => 1,
      InstanceStatus::Rejected => 2,
      InstanceStatus::Pending => 3,
      InstanceStatus::Cancelled => 5,
    }
  }

  pub fn from_code(code: i32) -> Option<Self> {
    Self::ALL.into_iter().find(|s| s.code() == code)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      InstanceStatus::Pending => "pending",
      InstanceStatus::Approved => "approved",
      InstanceStatus::Rejected => "rejected",
      InstanceStatus::Cancelled => "cancelled",
    }
  }

  /// Parse a status filter supplied as text: either the numeric code or
  /// the status name. Anything else yields `None`.
  pub fn parse_filter(filter: &str) -> Option<Self> {
    let filter = filter.trim();
    if let Ok(code) = filter.parse::<i32>() {
      return Self::from_code(code);
    }
    Self::ALL
      .into_iter()
      .find(|s| s.as_str().eq_ignore_ascii_case(filter))
  }
}

impl TaskStatus {
  pub const ALL: [TaskStatus; 4] = [
    TaskStatus::Pending,
    TaskStatus::Approved,
    TaskStatus::Rejected,
    TaskStatus::Cancelled,
  ];

  pub fn is_terminal(self) -> bool {
    !matches!(self, TaskStatus::Pending)
  }

  /// Legacy numeric code used by status filters.
  pub fn code(self) -> i32 {
    self.instance_status().code()
  }

  pub fn from_code(code: i32) -> Option<Self> {
    Self::ALL.into_iter().find(|s| s.code() == code)
  }

  pub fn as_str(self) -> &'static str {
    self.instance_status().as_str()
  }

  /// Parse a status filter supplied as text: either the numeric code or
  /// the status name. Anything else yields `None`.
  pub fn parse_filter(filter: &str) -> Option<Self> {
    InstanceStatus::parse_filter(filter).map(Self::from)
  }

  /// The instance status a task outcome settles an instance into.
  pub fn instance_status(self) -> InstanceStatus {
    match self {
      TaskStatus::Pending => InstanceStatus::Pending,
      TaskStatus::Approved => InstanceStatus::Approved,
      TaskStatus::Rejected => InstanceStatus::Rejected,
      TaskStatus::Cancelled => InstanceStatus::Cancelled,
    }
  }
}

impl From<InstanceStatus> for TaskStatus {
  fn from(status: InstanceStatus) -> Self {
    match status {
      InstanceStatus::Pending => TaskStatus::Pending,
      InstanceStatus::Approved => TaskStatus::Approved,
      InstanceStatus::Rejected => TaskStatus::Rejected,
      InstanceStatus::Cancelled => TaskStatus::Cancelled,
    }
  }
}

/// An approver group as stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Group {
  pub group_id: i64,
  pub name: String,
  pub alias: String,
  pub description: Option<String>,
  pub email: Option<String>,
  pub offline_approval: bool,
  pub deleted: bool,
  /// Member user IDs.
  #[sqlx(skip)]
  #[serde(default)]
  pub members: Vec<i64>,
  #[sqlx(skip)]
  #[serde(default)]
  pub permissions: Vec<Permission>,
}

impl Group {
  /// Derive the alias for a group name.
  pub fn alias_for(name: &str) -> String {
    name.replace(' ', "-")
  }

  pub fn is_member(&self, user_id: i64) -> bool {
    self.members.contains(&user_id)
  }
}

/// Where a permission record applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "snake_case")]
pub enum PermissionScope {
  Node(i64),
  /// Default chain for every node of a content type.
  ContentType(i64),
}

/// One step of an approver chain: a group approving at a level within a
/// node or content-type scope. A `node_id` of 0 marks a content-type
/// default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Permission {
  pub node_id: i64,
  pub content_type_id: i64,
  pub group_id: i64,
  pub level: i32,
}

impl Permission {
  pub fn for_node(node_id: i64, group_id: i64, level: i32) -> Self {
    Self {
      node_id,
      content_type_id: 0,
      group_id,
      level,
    }
  }

  pub fn for_content_type(content_type_id: i64, group_id: i64, level: i32) -> Self {
    Self {
      node_id: 0,
      content_type_id,
      group_id,
      level,
    }
  }

  pub fn scope(&self) -> PermissionScope {
    if self.node_id == 0 {
      PermissionScope::ContentType(self.content_type_id)
    } else {
      PermissionScope::Node(self.node_id)
    }
  }

  /// This record moved into the given scope, whose id must be non-zero.
  pub fn in_scope(&self, scope: PermissionScope) -> Self {
    match scope {
      PermissionScope::Node(node_id) => Self::for_node(node_id, self.group_id, self.level),
      PermissionScope::ContentType(content_type_id) => {
        Self::for_content_type(content_type_id, self.group_id, self.level)
      }
    }
  }
}

/// A workflow instance as stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Instance {
  pub instance_id: Uuid,
  pub node_id: i64,
  pub author_id: i64,
  pub change_type: ChangeType,
  pub status: InstanceStatus,
  pub created_at: DateTime<Utc>,
  pub completed_at: Option<DateTime<Utc>>,
  pub comment: Option<String>,
}

impl Instance {
  /// A new pending instance created now.
  pub fn new(
    node_id: i64,
    author_id: i64,
    change_type: ChangeType,
    comment: Option<String>,
  ) -> Self {
    Self {
      instance_id: Uuid::new_v4(),
      node_id,
      author_id,
      change_type,
      status: InstanceStatus::Pending,
      created_at: Utc::now(),
      completed_at: None,
      comment,
    }
  }

  /// Whether the completion stamp agrees with the status.
  pub fn is_consistent(&self) -> bool {
    self.status.is_terminal() == self.completed_at.is_some()
  }
}

/// A task (approval step) as stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Task {
  pub task_id: i64,
  pub instance_id: Uuid,
  pub group_id: i64,
  /// 1-based position within the instance.
  pub step: i32,
  pub status: TaskStatus,
  pub created_at: DateTime<Utc>,
  pub completed_at: Option<DateTime<Utc>>,
  pub comment: Option<String>,
  pub actor_id: Option<i64>,
}

/// A task to be inserted; the store assigns its ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
  pub instance_id: Uuid,
  pub group_id: i64,
  pub step: i32,
  pub status: TaskStatus,
  pub created_at: DateTime<Utc>,
  pub comment: Option<String>,
}

impl NewTask {
  /// A pending task created now.
  pub fn pending(instance_id: Uuid, group_id: i64, step: i32) -> Self {
    Self {
      instance_id,
      group_id,
      step,
      status: TaskStatus::Pending,
      created_at: Utc::now(),
      comment: None,
    }
  }
}

/// An actioned step to commit atomically.
#[derive(Debug, Clone)]
pub struct StepCommit {
  /// The task in its actioned (terminal) state.
  pub task: Task,
  /// The task for the following step, if the chain continues.
  pub next: Option<NewTask>,
  /// The owning instance in its final state, if the chain ended.
  pub instance: Option<Instance>,
}

/// The records written by a committed step.
#[derive(Debug, Clone)]
pub struct CommittedStep {
  pub task: Task,
  pub next: Option<Task>,
  pub instance: Option<Instance>,
}
