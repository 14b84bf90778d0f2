//! Plumber Store
//!
//! This crate provides the storage trait and implementations for approval
//! workflows. Data is persisted to a relational database (SQLite).
//!
//! The [`Store`] trait defines operations for:
//! - Approver groups, their membership and soft deletion
//! - Permission records (node or content-type scoped approver chains)
//! - Workflow instances and their approval tasks
//! - Filtered, paged queries over instances and tasks
//!
//! Every multi-row mutation is a single transaction. Rules that must hold
//! under concurrency (one pending instance per node, one pending task per
//! instance, unique names among active groups) are enforced by the store
//! itself and reported as a rejected operation rather than an error.

mod query;
mod sqlite;
mod types;

pub use query::{InstanceQuery, Page, TaskQuery};
pub use sqlite::SqliteStore;
pub use types::{
  ChangeType, CommittedStep, Group, Instance, InstanceStatus, NewTask, Permission,
  PermissionScope, StepCommit, Task, TaskStatus,
};

use async_trait::async_trait;
use uuid::Uuid;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The requested record was not found.
  #[error("not found: {0}")]
  NotFound(String),

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  /// Schema migration failed.
  #[error("migration error: {0}")]
  Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Storage trait for approval workflows.
#[async_trait]
pub trait Store: Send + Sync {
  /// Insert a group. Returns `None` if an active group already uses the
  /// name or alias.
  async fn insert_group(&self, name: &str, alias: &str) -> Result<Option<Group>, Error>;

  /// Get a group by ID, including soft-deleted groups, with members and
  /// permissions attached.
  async fn get_group(&self, group_id: i64) -> Result<Option<Group>, Error>;

  /// List all active groups with members and permissions attached.
  async fn list_groups(&self) -> Result<Vec<Group>, Error>;

  /// Check whether an active group other than `excluding` uses the alias.
  async fn group_alias_exists(&self, alias: &str, excluding: Option<i64>) -> Result<bool, Error>;

  /// Check whether an active group other than `excluding` uses the name.
  async fn group_name_exists(&self, name: &str, excluding: Option<i64>) -> Result<bool, Error>;

  /// Persist group fields and replace its membership. Returns `false` if no
  /// active group has the ID or the new name/alias collides.
  async fn update_group(&self, group: &Group) -> Result<bool, Error>;

  /// Soft-delete a group. Returns `false` if no active group has the ID.
  async fn delete_group(&self, group_id: i64) -> Result<bool, Error>;

  /// IDs of the active groups a user belongs to.
  async fn group_ids_for_user(&self, user_id: i64) -> Result<Vec<i64>, Error>;

  /// Permission records for one scope, ordered by level.
  async fn list_permissions(&self, scope: PermissionScope) -> Result<Vec<Permission>, Error>;

  /// Every permission record.
  async fn all_permissions(&self) -> Result<Vec<Permission>, Error>;

  /// Replace the permission records of each given scope as one transaction.
  async fn replace_permissions(
    &self,
    config: &[(PermissionScope, Vec<Permission>)],
  ) -> Result<(), Error>;

  /// Insert an instance. Returns `false` if the instance is pending and its
  /// node already has a pending instance.
  async fn insert_instance(&self, instance: &Instance) -> Result<bool, Error>;

  /// Insert a pending instance together with its first task. Returns
  /// `None`, with nothing written, if the node already has a pending
  /// instance.
  async fn start_instance(&self, instance: &Instance, first: &NewTask)
  -> Result<Option<Task>, Error>;

  /// Replace the mutable fields of an instance. A terminal status also
  /// settles the instance's pending tasks with the same status, in the same
  /// transaction. Returns `false` if it does not exist or the change would
  /// leave two pending instances on a node.
  async fn update_instance(&self, instance: &Instance) -> Result<bool, Error>;

  /// Get an instance by ID.
  async fn get_instance(&self, instance_id: Uuid) -> Result<Option<Instance>, Error>;

  /// List instances matching the query, newest first.
  async fn list_instances(
    &self,
    query: &InstanceQuery,
    page: Option<Page>,
  ) -> Result<Vec<Instance>, Error>;

  /// Count instances matching the query.
  async fn count_instances(&self, query: &InstanceQuery) -> Result<i64, Error>;

  /// Insert a task. Returns `None` if the task is pending and its instance
  /// already has a pending task, or its step is already taken.
  async fn insert_task(&self, task: &NewTask) -> Result<Option<Task>, Error>;

  /// Persist status, comment, actor and completion of a task that is still
  /// pending. Returns `false` if the stored task is no longer pending.
  async fn update_task(&self, task: &Task) -> Result<bool, Error>;

  /// Get a task by ID.
  async fn get_task(&self, task_id: i64) -> Result<Option<Task>, Error>;

  /// List tasks matching the query.
  async fn list_tasks(&self, query: &TaskQuery, page: Option<Page>) -> Result<Vec<Task>, Error>;

  /// Count tasks matching the query.
  async fn count_tasks(&self, query: &TaskQuery) -> Result<i64, Error>;

  /// Commit an actioned step: the task mutation plus the next task or the
  /// finalized instance, as one transaction. Returns `None`, with nothing
  /// written, if the task or its instance was no longer pending.
  async fn commit_step(&self, step: &StepCommit) -> Result<Option<CommittedStep>, Error>;
}
