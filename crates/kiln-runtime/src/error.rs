//! Execution errors.

use kiln_graph::GraphError;
use kiln_item::{ItemKey, ItemSnapshot};
use kiln_step::BoxError;

/// Errors that end a build run.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
  /// The graph could not be pruned for the request.
  #[error(transparent)]
  Graph(#[from] GraphError),

  /// A step body failed or panicked. The run stopped scheduling new steps and
  /// waited for in-flight steps before reporting.
  #[error("step '{step_id}' failed: {source}")]
  StepExecution {
    step_id: String,
    #[source]
    source: BoxError,
    /// Steps that failed while the run was draining.
    also_failed: Vec<String>,
    /// Items published before the run stopped.
    items: ItemSnapshot,
  },

  #[error("initial item '{0}' is required but no value was supplied")]
  MissingInitialItem(ItemKey),

  #[error("a value was supplied for '{0}', which is not a declared initial item")]
  UndeclaredInitialItem(ItemKey),

  #[error("initial item '{item}' is a simple item but {count} values were supplied")]
  TooManyInitialValues { item: ItemKey, count: usize },

  /// Execution was cancelled.
  #[error("execution cancelled")]
  Cancelled,

  #[error("execution timed out after {timeout_ms}ms")]
  Timeout { timeout_ms: u64 },

  #[error("internal error: {message}")]
  Internal { message: String },
}

impl ExecutionError {
  /// Id of the step that caused the failure, if a step did.
  pub fn step_id(&self) -> Option<&str> {
    match self {
      ExecutionError::StepExecution { step_id, .. } => Some(step_id),
      _ => None,
    }
  }
}

/// Failure cause recorded when a step body panics.
#[derive(Debug, thiserror::Error)]
#[error("step panicked: {message}")]
pub struct StepPanic {
  pub message: String,
}
