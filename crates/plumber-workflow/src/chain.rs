//! Ordered approver chains.

use plumber_config::FlowType;
use plumber_store::Permission;
use serde::Serialize;

/// The groups that must approve a change, in level order.
///
/// A chain is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApproverChain {
  steps: Vec<Permission>,
}

impl ApproverChain {
  /// Build a chain from permission records. Returns `None` for an empty set.
  pub fn new(mut permissions: Vec<Permission>) -> Option<Self> {
    if permissions.is_empty() {
      return None;
    }
    permissions.sort_by_key(|p| p.level);
    Some(Self { steps: permissions })
  }

  pub fn len(&self) -> usize {
    self.steps.len()
  }

  /// A built chain has at least one step, so this is `false`.
  pub fn is_empty(&self) -> bool {
    self.steps.is_empty()
  }

  pub fn steps(&self) -> &[Permission] {
    &self.steps
  }

  pub fn group_at(&self, index: usize) -> Option<i64> {
    self.steps.get(index).map(|p| p.group_id)
  }

  /// Chain index of a group.
  pub fn position_of(&self, group_id: i64) -> Option<usize> {
    self.steps.iter().position(|p| p.group_id == group_id)
  }

  /// Index of the first entry at or after `from` that has to approve.
  ///
  /// Under [`FlowType::Other`] an entry whose group contains the author is
  /// passed over, except the last entry, which always approves. Returns
  /// `None` once `from` is past the end of the chain.
  pub fn next_required(&self, from: usize, flow: FlowType, author_groups: &[i64]) -> Option<usize> {
    let last = self.steps.len().checked_sub(1)?;
    (from..=last).find(|&index| {
      index == last
        || !flow.skips_author_groups()
        || !author_groups.contains(&self.steps[index].group_id)
    })
  }
}
