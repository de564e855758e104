use kiln_item::ItemKey;
use thiserror::Error;

/// Errors found while building or pruning the step graph.
///
/// All of these surface before any step executes.
#[derive(Debug, Error)]
pub enum GraphError {
  #[error("step '{step}' requires item '{item}' but no step produces it")]
  UnsatisfiedDependency { step: String, item: ItemKey },

  /// `path` starts and ends with the same step.
  #[error("dependency cycle detected: {}", .path.join(" -> "))]
  CycleDetected { path: Vec<String> },

  #[error("requested item '{0}' has no producer")]
  UnproducibleItem(ItemKey),
}
