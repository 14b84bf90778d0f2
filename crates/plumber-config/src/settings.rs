use serde::{Deserialize, Serialize};

use crate::flow::FlowType;

const DEFAULT_PAGE_SIZE: u32 = 10;
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Workflow settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
  #[serde(default)]
  pub database: DatabaseSettings,

  /// Page size used when a caller does not ask for one.
  #[serde(default = "default_page_size")]
  pub page_size: u32,

  /// Fallback address for notifications when a group has no usable email.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub notification_email: Option<String>,

  #[serde(default)]
  pub flow_type: FlowType,

  /// Nodes that bypass approval entirely.
  #[serde(default)]
  pub exclude_nodes: Vec<i64>,
}

/// Connection settings for the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSettings {
  /// Connection URL, e.g. `sqlite://plumber.db`. When absent the host
  /// picks a location (the CLI uses its data directory).
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub url: Option<String>,

  #[serde(default = "default_max_connections")]
  pub max_connections: u32,
}

fn default_page_size() -> u32 {
  DEFAULT_PAGE_SIZE
}

fn default_max_connections() -> u32 {
  DEFAULT_MAX_CONNECTIONS
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      database: DatabaseSettings::default(),
      page_size: DEFAULT_PAGE_SIZE,
      notification_email: None,
      flow_type: FlowType::default(),
      exclude_nodes: Vec::new(),
    }
  }
}

impl Default for DatabaseSettings {
  fn default() -> Self {
    Self {
      url: None,
      max_connections: DEFAULT_MAX_CONNECTIONS,
    }
  }
}

impl Settings {
  /// Parse settings from a JSON document.
  pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(content)
  }

  /// Whether the node is excluded from approval.
  pub fn is_excluded(&self, node_id: i64) -> bool {
    self.exclude_nodes.contains(&node_id)
  }
}
