//! Approver group registry.

use std::sync::Arc;

use plumber_store::{Group, Store};
use tracing::{info, warn};

use crate::error::WorkflowError;
use crate::events::{EventNotifier, NoopNotifier, WorkflowEvent};
use crate::host::UserDirectory;

/// Creates, edits and soft-deletes approver groups.
pub struct GroupRegistry<N: EventNotifier = NoopNotifier> {
  store: Arc<dyn Store>,
  users: Arc<dyn UserDirectory>,
  notifier: N,
}

impl GroupRegistry<NoopNotifier> {
  pub fn new(store: Arc<dyn Store>, users: Arc<dyn UserDirectory>) -> Self {
    Self::with_notifier(store, users, NoopNotifier)
  }
}

impl<N: EventNotifier> GroupRegistry<N> {
  pub fn with_notifier(store: Arc<dyn Store>, users: Arc<dyn UserDirectory>, notifier: N) -> Self {
    Self {
      store,
      users,
      notifier,
    }
  }

  /// Create a group. Returns `None` if the name is blank or an active group
  /// already uses its name or alias.
  pub async fn create(&self, name: &str) -> Result<Option<Group>, WorkflowError> {
    let name = name.trim();
    if name.is_empty() {
      warn!("group rejected: empty name");
      return Ok(None);
    }

    let alias = Group::alias_for(name);
    if self.store.group_alias_exists(&alias, None).await? {
      warn!(alias = %alias, "group rejected: alias in use");
      return Ok(None);
    }
    let Some(group) = self.store.insert_group(name, &alias).await? else {
      warn!(name = %name, "group rejected: name in use");
      return Ok(None);
    };

    info!(group_id = group.group_id, alias = %group.alias, "group_created");
    self.notifier.notify(&WorkflowEvent::GroupCreated {
      group: group.clone(),
    })?;
    Ok(Some(group))
  }

  /// Persist a group's fields and replace its membership. The alias is
  /// derived from the name again. Returns `None` if the group is not active
  /// or the name or alias collides with another active group.
  pub async fn update(&self, group: &Group) -> Result<Option<Group>, WorkflowError> {
    let name = group.name.trim();
    if name.is_empty() {
      warn!(group_id = group.group_id, "group update rejected: empty name");
      return Ok(None);
    }
    if self.populated(group.group_id).await?.is_none() {
      return Ok(None);
    }

    let alias = Group::alias_for(name);
    if self.store.group_name_exists(name, Some(group.group_id)).await?
      || self.store.group_alias_exists(&alias, Some(group.group_id)).await?
    {
      warn!(group_id = group.group_id, name = %name, "group update rejected: name in use");
      return Ok(None);
    }

    let email = group
      .email
      .as_deref()
      .map(str::trim)
      .filter(|email| !email.is_empty())
      .map(str::to_string);
    let changes = Group {
      name: name.to_string(),
      alias,
      email,
      ..group.clone()
    };
    if !self.store.update_group(&changes).await? {
      return Ok(None);
    }
    let Some(updated) = self.store.get_group(group.group_id).await? else {
      return Ok(None);
    };

    info!(group_id = updated.group_id, members = updated.members.len(), "group_updated");
    self.notifier.notify(&WorkflowEvent::GroupUpdated {
      group: updated.clone(),
    })?;
    Ok(Some(updated))
  }

  /// Soft-delete a group. Its tasks and history stay readable. Returns
  /// `false` if no active group has the ID.
  pub async fn delete(&self, group_id: i64) -> Result<bool, WorkflowError> {
    if !self.store.delete_group(group_id).await? {
      return Ok(false);
    }

    info!(group_id, "group_deleted");
    self.notifier.notify(&WorkflowEvent::GroupDeleted { group_id })?;
    Ok(true)
  }

  /// Active groups with members and permissions.
  pub async fn list(&self) -> Result<Vec<Group>, WorkflowError> {
    Ok(self.store.list_groups().await?)
  }

  /// An active group with members and permissions.
  pub async fn populated(&self, group_id: i64) -> Result<Option<Group>, WorkflowError> {
    Ok(
      self
        .store
        .get_group(group_id)
        .await?
        .filter(|group| !group.deleted),
    )
  }

  /// A group by ID, deleted or not.
  pub async fn get(&self, group_id: i64) -> Result<Option<Group>, WorkflowError> {
    Ok(self.store.get_group(group_id).await?)
  }

  /// Active groups the user belongs to.
  pub async fn groups_for_user(&self, user_id: i64) -> Result<Vec<Group>, WorkflowError> {
    let ids = self.store.group_ids_for_user(user_id).await?;
    let mut groups = Vec::with_capacity(ids.len());
    for group_id in ids {
      if let Some(group) = self.populated(group_id).await? {
        groups.push(group);
      }
    }
    Ok(groups)
  }

  pub async fn is_member(&self, group_id: i64, user_id: i64) -> Result<bool, WorkflowError> {
    Ok(
      self
        .populated(group_id)
        .await?
        .is_some_and(|group| group.is_member(user_id)),
    )
  }

  /// Where to send mail for a group: its own address if that is valid,
  /// otherwise every member's valid address.
  pub async fn preferred_emails(&self, group: &Group) -> Result<Vec<String>, WorkflowError> {
    if let Some(email) = group.email.as_deref().filter(|e| is_valid_email(e)) {
      return Ok(vec![email.to_string()]);
    }

    let mut emails = Vec::new();
    for user_id in &group.members {
      let email = self
        .users
        .get_user(*user_id)
        .await?
        .and_then(|user| user.email)
        .filter(|e| is_valid_email(e));
      if let Some(email) = email {
        emails.push(email);
      }
    }
    Ok(emails)
  }
}

fn is_valid_email(email: &str) -> bool {
  let Some((local, domain)) = email.split_once('@') else {
    return false;
  };
  !local.is_empty()
    && !domain.contains('@')
    && domain.contains('.')
    && !domain.starts_with('.')
    && !domain.ends_with('.')
    && !email.chars().any(char::is_whitespace)
}
