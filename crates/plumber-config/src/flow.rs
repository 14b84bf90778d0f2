use serde::{Deserialize, Serialize};

/// How an approver chain is walked for a given author.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowType {
  /// Every configured step must be approved.
  #[default]
  Explicit,
  /// Steps whose group contains the author are skipped. The final step
  /// is always required.
  Other,
}

impl FlowType {
  /// Whether a step bound to a group the author belongs to may be skipped.
  pub fn skips_author_groups(self) -> bool {
    matches!(self, FlowType::Other)
  }
}
