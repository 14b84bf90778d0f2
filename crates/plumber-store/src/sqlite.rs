use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::query::{InstanceQuery, Page, TaskQuery};
use crate::types::{
  CommittedStep, Group, Instance, InstanceStatus, NewTask, Permission, PermissionScope, StepCommit,
  Task, TaskStatus,
};
use crate::{Error, Store};

const GROUP_COLUMNS: &str = "group_id, name, alias, description, email, offline_approval, deleted";
const PERMISSION_COLUMNS: &str = "node_id, content_type_id, group_id, level";
const INSTANCE_COLUMNS: &str =
  "instance_id, node_id, author_id, change_type, status, created_at, completed_at, comment";
const TASK_COLUMNS: &str =
  "task_id, instance_id, group_id, step, status, created_at, completed_at, comment, actor_id";
const JOINED_TASK_COLUMNS: &str = "t.task_id, t.instance_id, t.group_id, t.step, t.status, \
   t.created_at, t.completed_at, t.comment, t.actor_id";

/// SQLite-based store implementation.
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Connect to the database at `url`, creating the file if missing.
  pub async fn connect(url: &str, max_connections: u32) -> Result<Self, Error> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
      .max_connections(max_connections.max(1))
      .connect_with(options)
      .await?;
    Ok(Self::new(pool))
  }

  /// Open a migrated in-memory database.
  ///
  /// The pool holds exactly one connection that never expires: every SQLite
  /// connection to `:memory:` is a separate database.
  pub async fn in_memory() -> Result<Self, Error> {
    let pool = SqlitePoolOptions::new()
      .max_connections(1)
      .idle_timeout(None)
      .max_lifetime(None)
      .connect("sqlite::memory:")
      .await?;
    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(&self.pool).await
  }

  /// Attach members and permissions to each group.
  async fn populate(&self, groups: &mut [Group]) -> Result<(), Error> {
    if groups.is_empty() {
      return Ok(());
    }

    let members: Vec<(i64, i64)> =
      sqlx::query_as("SELECT group_id, user_id FROM workflow_group_members ORDER BY user_id")
        .fetch_all(&self.pool)
        .await?;
    let permissions: Vec<Permission> = sqlx::query_as(&format!(
      "SELECT {PERMISSION_COLUMNS} FROM workflow_permissions ORDER BY level, node_id, content_type_id"
    ))
    .fetch_all(&self.pool)
    .await?;

    let mut members_by_group: HashMap<i64, Vec<i64>> = HashMap::new();
    for (group_id, user_id) in members {
      members_by_group.entry(group_id).or_default().push(user_id);
    }
    let mut permissions_by_group: HashMap<i64, Vec<Permission>> = HashMap::new();
    for permission in permissions {
      permissions_by_group
        .entry(permission.group_id)
        .or_default()
        .push(permission);
    }

    for group in groups.iter_mut() {
      group.members = members_by_group.remove(&group.group_id).unwrap_or_default();
      group.permissions = permissions_by_group
        .remove(&group.group_id)
        .unwrap_or_default();
    }

    Ok(())
  }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
  matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Map a unique violation to `None`, keeping every other outcome.
fn unless_duplicate<T>(result: Result<T, sqlx::Error>) -> Result<Option<T>, Error> {
  match result {
    Ok(value) => Ok(Some(value)),
    Err(e) if is_unique_violation(&e) => {
      debug!(error = %e, "rejected by uniqueness constraint");
      Ok(None)
    }
    Err(e) => Err(e.into()),
  }
}

fn push_instance_filters(qb: &mut QueryBuilder<'_, Sqlite>, query: &InstanceQuery, prefix: &str) {
  qb.push(" WHERE 1=1");

  if let Some(node_id) = query.node_id {
    qb.push(format!(" AND {prefix}node_id = ")).push_bind(node_id);
  }

  if let Some(author_id) = query.author_id {
    qb.push(format!(" AND {prefix}author_id = ")).push_bind(author_id);
  }

  if let Some(statuses) = &query.statuses {
    qb.push(format!(" AND {prefix}status IN ("));
    let mut separated = qb.separated(", ");
    for status in statuses {
      separated.push_bind(*status);
    }
    separated.push_unseparated(")");
  }

  if let Some(oldest) = query.open_since {
    qb.push(format!(
      " AND ({prefix}completed_at IS NULL OR {prefix}completed_at >= "
    ))
    .push_bind(oldest)
    .push(")");
  }
}

fn push_task_filters(qb: &mut QueryBuilder<'_, Sqlite>, query: &TaskQuery) {
  qb.push(" WHERE 1=1");

  if let Some(instance_id) = query.instance_id {
    qb.push(" AND t.instance_id = ").push_bind(instance_id);
  }

  if let Some(node_id) = query.node_id {
    qb.push(" AND i.node_id = ").push_bind(node_id);
  }

  if let Some(author_id) = query.author_id {
    qb.push(" AND i.author_id = ").push_bind(author_id);
  }

  if let Some(group_ids) = &query.group_ids {
    qb.push(" AND t.group_id IN (");
    let mut separated = qb.separated(", ");
    for group_id in group_ids {
      separated.push_bind(*group_id);
    }
    separated.push_unseparated(")");
  }

  if let Some(statuses) = &query.statuses {
    qb.push(" AND t.status IN (");
    let mut separated = qb.separated(", ");
    for status in statuses {
      separated.push_bind(*status);
    }
    separated.push_unseparated(")");
  }

  if let Some(oldest) = query.open_since {
    qb.push(" AND (t.completed_at IS NULL OR t.completed_at >= ")
      .push_bind(oldest)
      .push(")");
  }
}

fn push_page(qb: &mut QueryBuilder<'_, Sqlite>, bounds: Option<(i64, i64)>) {
  if let Some((limit, offset)) = bounds {
    qb.push(" LIMIT ")
      .push_bind(limit)
      .push(" OFFSET ")
      .push_bind(offset);
  }
}

#[async_trait]
impl Store for SqliteStore {
  async fn insert_group(&self, name: &str, alias: &str) -> Result<Option<Group>, Error> {
    let result = sqlx::query_as::<_, Group>(&format!(
      r#"
            INSERT INTO workflow_groups (name, alias)
            VALUES (?, ?)
            RETURNING {GROUP_COLUMNS}
            "#
    ))
    .bind(name)
    .bind(alias)
    .fetch_one(&self.pool)
    .await;

    unless_duplicate(result)
  }

  async fn get_group(&self, group_id: i64) -> Result<Option<Group>, Error> {
    let group: Option<Group> = sqlx::query_as(&format!(
      "SELECT {GROUP_COLUMNS} FROM workflow_groups WHERE group_id = ?"
    ))
    .bind(group_id)
    .fetch_optional(&self.pool)
    .await?;

    match group {
      Some(group) => {
        let mut groups = [group];
        self.populate(&mut groups).await?;
        let [group] = groups;
        Ok(Some(group))
      }
      None => Ok(None),
    }
  }

  async fn list_groups(&self) -> Result<Vec<Group>, Error> {
    let mut groups: Vec<Group> = sqlx::query_as(&format!(
      "SELECT {GROUP_COLUMNS} FROM workflow_groups WHERE deleted = 0 ORDER BY name"
    ))
    .fetch_all(&self.pool)
    .await?;

    self.populate(&mut groups).await?;
    Ok(groups)
  }

  async fn group_alias_exists(&self, alias: &str, excluding: Option<i64>) -> Result<bool, Error> {
    let exists = sqlx::query_scalar::<_, bool>(
      r#"
            SELECT EXISTS (
              SELECT 1 FROM workflow_groups
              WHERE alias = ? AND deleted = 0 AND group_id != ?
            )
            "#,
    )
    .bind(alias)
    .bind(excluding.unwrap_or(0))
    .fetch_one(&self.pool)
    .await?;

    Ok(exists)
  }

  async fn group_name_exists(&self, name: &str, excluding: Option<i64>) -> Result<bool, Error> {
    let exists = sqlx::query_scalar::<_, bool>(
      r#"
            SELECT EXISTS (
              SELECT 1 FROM workflow_groups
              WHERE name = ? AND deleted = 0 AND group_id != ?
            )
            "#,
    )
    .bind(name)
    .bind(excluding.unwrap_or(0))
    .fetch_one(&self.pool)
    .await?;

    Ok(exists)
  }

  async fn update_group(&self, group: &Group) -> Result<bool, Error> {
    let mut tx = self.pool.begin().await?;

    let result = sqlx::query(
      r#"
            UPDATE workflow_groups
            SET name = ?, alias = ?, description = ?, email = ?, offline_approval = ?
            WHERE group_id = ? AND deleted = 0
            "#,
    )
    .bind(&group.name)
    .bind(&group.alias)
    .bind(&group.description)
    .bind(&group.email)
    .bind(group.offline_approval)
    .bind(group.group_id)
    .execute(&mut *tx)
    .await;

    match unless_duplicate(result)? {
      Some(done) if done.rows_affected() > 0 => {}
      _ => return Ok(false),
    }

    sqlx::query("DELETE FROM workflow_group_members WHERE group_id = ?")
      .bind(group.group_id)
      .execute(&mut *tx)
      .await?;

    let members: BTreeSet<i64> = group.members.iter().copied().collect();
    for user_id in members {
      sqlx::query("INSERT INTO workflow_group_members (group_id, user_id) VALUES (?, ?)")
        .bind(group.group_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(true)
  }

  async fn delete_group(&self, group_id: i64) -> Result<bool, Error> {
    let result =
      sqlx::query("UPDATE workflow_groups SET deleted = 1 WHERE group_id = ? AND deleted = 0")
        .bind(group_id)
        .execute(&self.pool)
        .await?;

    Ok(result.rows_affected() > 0)
  }

  async fn group_ids_for_user(&self, user_id: i64) -> Result<Vec<i64>, Error> {
    let ids = sqlx::query_scalar::<_, i64>(
      r#"
            SELECT m.group_id
            FROM workflow_group_members m
            JOIN workflow_groups g ON g.group_id = m.group_id
            WHERE m.user_id = ? AND g.deleted = 0
            ORDER BY m.group_id
            "#,
    )
    .bind(user_id)
    .fetch_all(&self.pool)
    .await?;

    Ok(ids)
  }

  async fn list_permissions(&self, scope: PermissionScope) -> Result<Vec<Permission>, Error> {
    let (filter, scope_id) = match scope {
      PermissionScope::Node(node_id) => ("node_id = ?", node_id),
      PermissionScope::ContentType(content_type_id) => {
        ("node_id = 0 AND content_type_id = ?", content_type_id)
      }
    };

    let permissions = sqlx::query_as(&format!(
      "SELECT {PERMISSION_COLUMNS} FROM workflow_permissions WHERE {filter} ORDER BY level, group_id"
    ))
    .bind(scope_id)
    .fetch_all(&self.pool)
    .await?;

    Ok(permissions)
  }

  async fn all_permissions(&self) -> Result<Vec<Permission>, Error> {
    let permissions = sqlx::query_as(&format!(
      "SELECT {PERMISSION_COLUMNS} FROM workflow_permissions \
       ORDER BY node_id, content_type_id, level, group_id"
    ))
    .fetch_all(&self.pool)
    .await?;

    Ok(permissions)
  }

  async fn replace_permissions(
    &self,
    config: &[(PermissionScope, Vec<Permission>)],
  ) -> Result<(), Error> {
    let mut tx = self.pool.begin().await?;

    for (scope, permissions) in config {
      match *scope {
        PermissionScope::Node(node_id) => {
          sqlx::query("DELETE FROM workflow_permissions WHERE node_id = ?")
            .bind(node_id)
            .execute(&mut *tx)
            .await?;
        }
        PermissionScope::ContentType(content_type_id) => {
          sqlx::query("DELETE FROM workflow_permissions WHERE node_id = 0 AND content_type_id = ?")
            .bind(content_type_id)
            .execute(&mut *tx)
            .await?;
        }
      }

      for permission in permissions {
        let permission = permission.in_scope(*scope);
        sqlx::query(&format!(
          "INSERT INTO workflow_permissions ({PERMISSION_COLUMNS}) VALUES (?, ?, ?, ?)"
        ))
        .bind(permission.node_id)
        .bind(permission.content_type_id)
        .bind(permission.group_id)
        .bind(permission.level)
        .execute(&mut *tx)
        .await?;
      }
    }

    tx.commit().await?;
    Ok(())
  }

  async fn insert_instance(&self, instance: &Instance) -> Result<bool, Error> {
    let result = sqlx::query(&format!(
      r#"
            INSERT INTO workflow_instances ({INSTANCE_COLUMNS})
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#
    ))
    .bind(instance.instance_id)
    .bind(instance.node_id)
    .bind(instance.author_id)
    .bind(instance.change_type)
    .bind(instance.status)
    .bind(instance.created_at)
    .bind(instance.completed_at)
    .bind(&instance.comment)
    .execute(&self.pool)
    .await;

    Ok(unless_duplicate(result)?.is_some())
  }

  async fn start_instance(
    &self,
    instance: &Instance,
    first: &NewTask,
  ) -> Result<Option<Task>, Error> {
    let mut tx = self.pool.begin().await?;

    let inserted = sqlx::query(&format!(
      r#"
            INSERT INTO workflow_instances ({INSTANCE_COLUMNS})
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#
    ))
    .bind(instance.instance_id)
    .bind(instance.node_id)
    .bind(instance.author_id)
    .bind(instance.change_type)
    .bind(instance.status)
    .bind(instance.created_at)
    .bind(instance.completed_at)
    .bind(&instance.comment)
    .execute(&mut *tx)
    .await;

    if unless_duplicate(inserted)?.is_none() {
      return Ok(None);
    }

    let task: Task = sqlx::query_as(&format!(
      r#"
            INSERT INTO workflow_tasks (instance_id, group_id, step, status, created_at, completed_at, comment)
            VALUES (?, ?, ?, ?, ?, NULL, ?)
            RETURNING {TASK_COLUMNS}
            "#
    ))
    .bind(instance.instance_id)
    .bind(first.group_id)
    .bind(first.step)
    .bind(first.status)
    .bind(first.created_at)
    .bind(&first.comment)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(Some(task))
  }

  async fn update_instance(&self, instance: &Instance) -> Result<bool, Error> {
    let mut tx = self.pool.begin().await?;

    let result = sqlx::query(
      r#"
            UPDATE workflow_instances
            SET change_type = ?, status = ?, completed_at = ?, comment = ?
            WHERE instance_id = ?
            "#,
    )
    .bind(instance.change_type)
    .bind(instance.status)
    .bind(instance.completed_at)
    .bind(&instance.comment)
    .bind(instance.instance_id)
    .execute(&mut *tx)
    .await;

    if !unless_duplicate(result)?.is_some_and(|done| done.rows_affected() > 0) {
      return Ok(false);
    }

    // A settled instance leaves nothing to action.
    if instance.status.is_terminal() {
      let settled = sqlx::query(
        r#"
              UPDATE workflow_tasks
              SET status = ?, completed_at = ?
              WHERE instance_id = ? AND status = ?
              "#,
      )
      .bind(TaskStatus::from(instance.status))
      .bind(instance.completed_at)
      .bind(instance.instance_id)
      .bind(TaskStatus::Pending)
      .execute(&mut *tx)
      .await?;
      if settled.rows_affected() > 0 {
        debug!(instance_id = %instance.instance_id, tasks = settled.rows_affected(), "settled pending tasks");
      }
    }

    tx.commit().await?;
    Ok(true)
  }

  async fn get_instance(&self, instance_id: Uuid) -> Result<Option<Instance>, Error> {
    let instance = sqlx::query_as(&format!(
      "SELECT {INSTANCE_COLUMNS} FROM workflow_instances WHERE instance_id = ?"
    ))
    .bind(instance_id)
    .fetch_optional(&self.pool)
    .await?;

    Ok(instance)
  }

  async fn list_instances(
    &self,
    query: &InstanceQuery,
    page: Option<Page>,
  ) -> Result<Vec<Instance>, Error> {
    let bounds = match page.map(|p| p.bounds()) {
      Some(None) => return Ok(Vec::new()),
      Some(bounds) => bounds,
      None => None,
    };
    if query.is_empty() {
      return Ok(Vec::new());
    }

    let mut qb = QueryBuilder::<Sqlite>::new(format!(
      "SELECT {INSTANCE_COLUMNS} FROM workflow_instances"
    ));
    push_instance_filters(&mut qb, query, "");
    qb.push(" ORDER BY created_at DESC, rowid DESC");
    push_page(&mut qb, bounds);

    let instances = qb.build_query_as::<Instance>().fetch_all(&self.pool).await?;
    Ok(instances)
  }

  async fn count_instances(&self, query: &InstanceQuery) -> Result<i64, Error> {
    if query.is_empty() {
      return Ok(0);
    }

    let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM workflow_instances");
    push_instance_filters(&mut qb, query, "");

    let count = qb.build_query_scalar::<i64>().fetch_one(&self.pool).await?;
    Ok(count)
  }

  async fn insert_task(&self, task: &NewTask) -> Result<Option<Task>, Error> {
    let completed_at = task.status.is_terminal().then_some(task.created_at);

    let result = sqlx::query_as::<_, Task>(&format!(
      r#"
            INSERT INTO workflow_tasks (instance_id, group_id, step, status, created_at, completed_at, comment)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING {TASK_COLUMNS}
            "#
    ))
    .bind(task.instance_id)
    .bind(task.group_id)
    .bind(task.step)
    .bind(task.status)
    .bind(task.created_at)
    .bind(completed_at)
    .bind(&task.comment)
    .fetch_one(&self.pool)
    .await;

    unless_duplicate(result)
  }

  async fn update_task(&self, task: &Task) -> Result<bool, Error> {
    let result = sqlx::query(
      r#"
            UPDATE workflow_tasks
            SET status = ?, completed_at = ?, comment = ?, actor_id = ?
            WHERE task_id = ? AND status = ?
            "#,
    )
    .bind(task.status)
    .bind(task.completed_at)
    .bind(&task.comment)
    .bind(task.actor_id)
    .bind(task.task_id)
    .bind(TaskStatus::Pending)
    .execute(&self.pool)
    .await?;

    Ok(result.rows_affected() > 0)
  }

  async fn get_task(&self, task_id: i64) -> Result<Option<Task>, Error> {
    let task = sqlx::query_as(&format!(
      "SELECT {TASK_COLUMNS} FROM workflow_tasks WHERE task_id = ?"
    ))
    .bind(task_id)
    .fetch_optional(&self.pool)
    .await?;

    Ok(task)
  }

  async fn list_tasks(&self, query: &TaskQuery, page: Option<Page>) -> Result<Vec<Task>, Error> {
    let bounds = match page.map(|p| p.bounds()) {
      Some(None) => return Ok(Vec::new()),
      Some(bounds) => bounds,
      None => None,
    };
    if query.is_empty() {
      return Ok(Vec::new());
    }

    let mut qb = QueryBuilder::<Sqlite>::new(format!(
      "SELECT {JOINED_TASK_COLUMNS} FROM workflow_tasks t \
       JOIN workflow_instances i ON i.instance_id = t.instance_id"
    ));
    push_task_filters(&mut qb, query);
    if query.instance_id.is_some() || query.node_id.is_some() {
      // an audit trail reads oldest first
      qb.push(" ORDER BY i.created_at ASC, t.step ASC, t.task_id ASC");
    } else {
      qb.push(" ORDER BY t.created_at DESC, t.task_id DESC");
    }
    push_page(&mut qb, bounds);

    let tasks = qb.build_query_as::<Task>().fetch_all(&self.pool).await?;
    Ok(tasks)
  }

  async fn count_tasks(&self, query: &TaskQuery) -> Result<i64, Error> {
    if query.is_empty() {
      return Ok(0);
    }

    let mut qb = QueryBuilder::<Sqlite>::new(
      "SELECT COUNT(*) FROM workflow_tasks t \
       JOIN workflow_instances i ON i.instance_id = t.instance_id",
    );
    push_task_filters(&mut qb, query);

    let count = qb.build_query_scalar::<i64>().fetch_one(&self.pool).await?;
    Ok(count)
  }

  async fn commit_step(&self, step: &StepCommit) -> Result<Option<CommittedStep>, Error> {
    let mut tx = self.pool.begin().await?;

    let actioned = sqlx::query(
      r#"
            UPDATE workflow_tasks
            SET status = ?, completed_at = ?, comment = ?, actor_id = ?
            WHERE task_id = ? AND status = ?
            "#,
    )
    .bind(step.task.status)
    .bind(step.task.completed_at)
    .bind(&step.task.comment)
    .bind(step.task.actor_id)
    .bind(step.task.task_id)
    .bind(TaskStatus::Pending)
    .execute(&mut *tx)
    .await?;

    if actioned.rows_affected() == 0 {
      debug!(task_id = step.task.task_id, "task no longer pending, step not committed");
      return Ok(None);
    }

    let task: Task = sqlx::query_as(&format!(
      "SELECT {TASK_COLUMNS} FROM workflow_tasks WHERE task_id = ?"
    ))
    .bind(step.task.task_id)
    .fetch_one(&mut *tx)
    .await?;

    let instance = match &step.instance {
      Some(instance) => {
        let finalized = sqlx::query(
          r#"
                UPDATE workflow_instances
                SET status = ?, completed_at = ?
                WHERE instance_id = ? AND status = ?
                "#,
        )
        .bind(instance.status)
        .bind(instance.completed_at)
        .bind(instance.instance_id)
        .bind(InstanceStatus::Pending)
        .execute(&mut *tx)
        .await?;

        if finalized.rows_affected() == 0 {
          debug!(instance_id = %instance.instance_id, "instance no longer pending, step not committed");
          return Ok(None);
        }

        let instance: Instance = sqlx::query_as(&format!(
          "SELECT {INSTANCE_COLUMNS} FROM workflow_instances WHERE instance_id = ?"
        ))
        .bind(instance.instance_id)
        .fetch_one(&mut *tx)
        .await?;
        Some(instance)
      }
      None => None,
    };

    let next = match &step.next {
      Some(next) => {
        let open: Option<i64> = sqlx::query_scalar(
          "SELECT 1 FROM workflow_instances WHERE instance_id = ? AND status = ?",
        )
        .bind(next.instance_id)
        .bind(InstanceStatus::Pending)
        .fetch_optional(&mut *tx)
        .await?;

        if open.is_none() {
          debug!(instance_id = %next.instance_id, "instance no longer pending, step not committed");
          return Ok(None);
        }

        let task: Task = sqlx::query_as(&format!(
          r#"
                INSERT INTO workflow_tasks (instance_id, group_id, step, status, created_at, completed_at, comment)
                VALUES (?, ?, ?, ?, ?, NULL, ?)
                RETURNING {TASK_COLUMNS}
                "#
        ))
        .bind(next.instance_id)
        .bind(next.group_id)
        .bind(next.step)
        .bind(next.status)
        .bind(next.created_at)
        .bind(&next.comment)
        .fetch_one(&mut *tx)
        .await?;
        Some(task)
      }
      None => None,
    };

    tx.commit().await?;
    Ok(Some(CommittedStep {
      task,
      next,
      instance,
    }))
  }
}
