//! Approver chain resolution and permission configuration.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use plumber_store::{Permission, PermissionScope, Store};
use tracing::{info, instrument, warn};

use crate::chain::ApproverChain;
use crate::error::WorkflowError;
use crate::events::{EventNotifier, NoopNotifier, WorkflowEvent};
use crate::host::{ContentNode, ContentTree};

/// Resolves which groups approve a node, and owns the permission records.
pub struct PermissionResolver<N: EventNotifier = NoopNotifier> {
  store: Arc<dyn Store>,
  content: Arc<dyn ContentTree>,
  notifier: N,
}

impl PermissionResolver<NoopNotifier> {
  pub fn new(store: Arc<dyn Store>, content: Arc<dyn ContentTree>) -> Self {
    Self::with_notifier(store, content, NoopNotifier)
  }
}

impl<N: EventNotifier> PermissionResolver<N> {
  pub fn with_notifier(store: Arc<dyn Store>, content: Arc<dyn ContentTree>, notifier: N) -> Self {
    Self {
      store,
      content,
      notifier,
    }
  }

  /// Every permission record.
  pub async fn all(&self) -> Result<Vec<Permission>, WorkflowError> {
    Ok(self.store.all_permissions().await?)
  }

  /// Records configured directly on the node, ordered by level.
  pub async fn permissions_for_node(&self, node_id: i64) -> Result<Vec<Permission>, WorkflowError> {
    Ok(self.store.list_permissions(PermissionScope::Node(node_id)).await?)
  }

  /// Default records for a content type, ordered by level.
  pub async fn permissions_for_content_type(
    &self,
    content_type_id: i64,
  ) -> Result<Vec<Permission>, WorkflowError> {
    Ok(
      self
        .store
        .list_permissions(PermissionScope::ContentType(content_type_id))
        .await?,
    )
  }

  /// Records governing a node: its own, else the nearest ancestor's, else
  /// its content type's default. `None` when nothing applies.
  pub async fn recursive_permissions_for_node(
    &self,
    node: Option<&ContentNode>,
  ) -> Result<Option<Vec<Permission>>, WorkflowError> {
    let Some(node) = node else {
      return Ok(None);
    };

    let mut visited = HashSet::new();
    let mut current = node.clone();
    loop {
      if !visited.insert(current.node_id) {
        warn!(node_id = node.node_id, looped_at = current.node_id, "content tree cycle");
        break;
      }

      let direct = self.permissions_for_node(current.node_id).await?;
      if !direct.is_empty() {
        return Ok(Some(direct));
      }

      let Some(parent_id) = current.parent_id else {
        break;
      };
      match self.content.get_node(parent_id).await? {
        Some(parent) => current = parent,
        None => break,
      }
    }

    let defaults = self.permissions_for_content_type(node.content_type_id).await?;
    Ok((!defaults.is_empty()).then_some(defaults))
  }

  /// The ordered chain for a node, or `None` if the node is unknown or no
  /// records apply to it.
  pub async fn approver_chain(&self, node_id: i64) -> Result<Option<ApproverChain>, WorkflowError> {
    let node = self.content.get_node(node_id).await?;
    let permissions = self.recursive_permissions_for_node(node.as_ref()).await?;
    Ok(permissions.and_then(ApproverChain::new))
  }

  /// Replace the records of the nodes named in the map. Each record applies
  /// to its own node; the map key stands in for records that name none, and
  /// a non-zero key with an empty list clears that node. Returns `false`,
  /// changing nothing, if every list is empty or a record names a content
  /// type instead of a node.
  #[instrument(name = "update_node_config", skip(self, config), fields(scopes = config.len()))]
  pub async fn update_node_config(
    &self,
    config: HashMap<i64, Vec<Permission>>,
  ) -> Result<bool, WorkflowError> {
    self.replace(ConfigKind::Node, config).await
  }

  /// Replace the default records of the content types named in the map,
  /// keyed the same way as [`update_node_config`](Self::update_node_config).
  #[instrument(name = "update_content_type_config", skip(self, config), fields(scopes = config.len()))]
  pub async fn update_content_type_config(
    &self,
    config: HashMap<i64, Vec<Permission>>,
  ) -> Result<bool, WorkflowError> {
    self.replace(ConfigKind::ContentType, config).await
  }

  async fn replace(
    &self,
    kind: ConfigKind,
    config: HashMap<i64, Vec<Permission>>,
  ) -> Result<bool, WorkflowError> {
    if config.values().all(Vec::is_empty) {
      warn!("permission update rejected: no records supplied");
      return Ok(false);
    }

    let mut scopes: BTreeMap<PermissionScope, Vec<Permission>> = BTreeMap::new();
    for (key, records) in config {
      if records.is_empty() {
        if key != 0 {
          scopes.entry(kind.scope(key)).or_default();
        }
        continue;
      }

      for record in records {
        let scope = match kind.ids(&record) {
          (own, _) if own != 0 => kind.scope(own),
          (0, 0) if key != 0 => kind.scope(key),
          _ => {
            warn!(key, group_id = record.group_id, "permission update rejected: record scope does not fit");
            return Ok(false);
          }
        };
        // one record per group in a scope; the first wins
        let entries = scopes.entry(scope).or_default();
        if entries.iter().all(|r| r.group_id != record.group_id) {
          entries.push(record.in_scope(scope));
        }
      }
    }

    let config: Vec<(PermissionScope, Vec<Permission>)> = scopes
      .into_iter()
      .map(|(scope, mut records)| {
        records.sort_by_key(|r| r.level);
        (scope, records)
      })
      .collect();

    self.store.replace_permissions(&config).await?;
    info!(scopes = config.len(), "permissions_replaced");

    self.notifier.notify(&WorkflowEvent::ConfigUpdated { config })?;
    Ok(true)
  }
}

#[derive(Debug, Clone, Copy)]
enum ConfigKind {
  Node,
  ContentType,
}

impl ConfigKind {
  fn scope(self, id: i64) -> PermissionScope {
    match self {
      ConfigKind::Node => PermissionScope::Node(id),
      ConfigKind::ContentType => PermissionScope::ContentType(id),
    }
  }

  /// The record's id for this kind of scope, then its id for the other kind.
  fn ids(self, record: &Permission) -> (i64, i64) {
    match self {
      ConfigKind::Node => (record.node_id, record.content_type_id),
      ConfigKind::ContentType => (record.content_type_id, record.node_id),
    }
  }
}
