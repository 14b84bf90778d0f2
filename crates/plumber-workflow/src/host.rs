//! Contracts for the host content system.
//!
//! The workflow never owns content or users; it asks the host for them.
//! [`InMemoryHost`] serves both contracts from a JSON snapshot and backs
//! the command line tool and the tests.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::HostError;

/// A content node as seen by the workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentNode {
  pub node_id: i64,
  pub name: String,
  /// `None` for a root node.
  #[serde(default)]
  pub parent_id: Option<i64>,
  pub content_type_id: i64,
}

/// A back-office user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
  pub user_id: i64,
  pub name: String,
  #[serde(default)]
  pub email: Option<String>,
}

/// Read access to the content tree.
#[async_trait]
pub trait ContentTree: Send + Sync {
  /// Look up a node. `Ok(None)` means the node does not exist (any more).
  async fn get_node(&self, node_id: i64) -> Result<Option<ContentNode>, HostError>;
}

/// Read access to the user directory.
#[async_trait]
pub trait UserDirectory: Send + Sync {
  async fn get_user(&self, user_id: i64) -> Result<Option<User>, HostError>;
}

#[derive(Deserialize)]
struct Snapshot {
  #[serde(default)]
  nodes: Vec<ContentNode>,
  #[serde(default)]
  users: Vec<User>,
}

/// A host backed by in-memory maps.
///
/// ```json
/// {
///   "nodes": [
///     { "node_id": 1050, "name": "Home", "content_type_id": 1045 },
///     { "node_id": 1089, "name": "About", "parent_id": 1050, "content_type_id": 1069 }
///   ],
///   "users": [{ "user_id": 1, "name": "Editor", "email": "editor@example.com" }]
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryHost {
  nodes: HashMap<i64, ContentNode>,
  users: HashMap<i64, User>,
}

impl InMemoryHost {
  pub fn new() -> Self {
    Self::default()
  }

  /// Load a host snapshot from JSON.
  pub fn from_json(json: &str) -> Result<Self, HostError> {
    let snapshot: Snapshot = serde_json::from_str(json).map_err(|e| HostError::InvalidData {
      message: e.to_string(),
    })?;
    let host = snapshot
      .nodes
      .into_iter()
      .fold(Self::new(), |host, node| host.with_node(node));
    Ok(
      snapshot
        .users
        .into_iter()
        .fold(host, |host, user| host.with_user(user)),
    )
  }

  pub fn with_node(mut self, node: ContentNode) -> Self {
    self.nodes.insert(node.node_id, node);
    self
  }

  pub fn with_user(mut self, user: User) -> Self {
    self.users.insert(user.user_id, user);
    self
  }

  pub fn node_count(&self) -> usize {
    self.nodes.len()
  }

  pub fn user_count(&self) -> usize {
    self.users.len()
  }
}

#[async_trait]
impl ContentTree for InMemoryHost {
  async fn get_node(&self, node_id: i64) -> Result<Option<ContentNode>, HostError> {
    Ok(self.nodes.get(&node_id).cloned())
  }
}

#[async_trait]
impl UserDirectory for InMemoryHost {
  async fn get_user(&self, user_id: i64) -> Result<Option<User>, HostError> {
    Ok(self.users.get(&user_id).cloned())
  }
}
