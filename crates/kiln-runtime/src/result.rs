use std::time::Duration;

use kiln_item::ItemSnapshot;

/// Result of a successful build run.
#[derive(Debug, Clone)]
pub struct BuildResult {
  /// Unique execution ID.
  pub execution_id: String,
  pub duration: Duration,
  /// Requested items. Simple items that were never emitted are absent.
  pub items: ItemSnapshot,
  /// Every item in the build context, when asked for.
  pub context: Option<ItemSnapshot>,
  /// Ids of the steps that ran, in completion order.
  pub executed: Vec<String>,
}
