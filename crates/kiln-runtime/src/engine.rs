//! Build execution engine.
//!
//! The `BuildEngine` prunes a validated graph down to what a request needs,
//! seeds initial items and drives the scheduler over the result.

use std::fmt::Display;
use std::sync::Arc;
use std::time::{Duration, Instant};

use kiln_config::EngineConfig;
use kiln_graph::BuildGraph;
use kiln_item::{BuildContext, ItemKind};
use kiln_step::{ConsumeMode, INITIAL_PRODUCER};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::error::ExecutionError;
use crate::events::{ExecutionEvent, ExecutionNotifier, NoopNotifier};
use crate::request::BuildRequest;
use crate::result::BuildResult;
use crate::scheduler::{RunOutcome, Scheduler};

/// The build engine.
///
/// Generic over `N: ExecutionNotifier` to allow different notification strategies.
/// Use `BuildEngine::new()` for a default engine with no-op notifications,
/// or `BuildEngine::with_notifier()` to provide a custom notifier.
pub struct BuildEngine<N: ExecutionNotifier = NoopNotifier> {
  config: EngineConfig,
  notifier: Arc<N>,
}

impl BuildEngine<NoopNotifier> {
  /// Create a new engine with no-op notifications.
  pub fn new(config: EngineConfig) -> Self {
    Self::with_notifier(config, NoopNotifier)
  }
}

impl<N: ExecutionNotifier + 'static> BuildEngine<N> {
  /// Create a new engine with a custom notifier.
  pub fn with_notifier(config: EngineConfig, notifier: N) -> Self {
    Self {
      config,
      notifier: Arc::new(notifier),
    }
  }

  pub fn config(&self) -> &EngineConfig {
    &self.config
  }

  pub fn notifier(&self) -> &N {
    &self.notifier
  }

  /// Execute the steps needed for `request`.
  ///
  /// The graph is pruned to the requested items and final steps first. On
  /// success the result carries the requested items; on a step failure the
  /// error carries whatever was published before the run stopped.
  pub async fn execute(
    &self,
    graph: &BuildGraph,
    request: BuildRequest,
    cancel: CancellationToken,
  ) -> Result<BuildResult, ExecutionError> {
    let execution_id = uuid::Uuid::new_v4().to_string();
    self.run(graph, request, cancel, execution_id).await
  }

  #[instrument(
    name = "build_execute",
    skip_all,
    fields(
      execution_id = %execution_id,
      requested = request.requested().len(),
    )
  )]
  async fn run(
    &self,
    graph: &BuildGraph,
    request: BuildRequest,
    cancel: CancellationToken,
    execution_id: String,
  ) -> Result<BuildResult, ExecutionError> {
    let pruned = graph.prune(request.requested())?;
    let store = Arc::new(BuildContext::new(pruned.item_types()));
    seed_initial_items(&pruned, &request, &store)?;

    let workers = self.config.effective_workers();
    info!(
      execution_id = %execution_id,
      steps = pruned.len(),
      pruned = graph.len() - pruned.len(),
      workers,
      "run_started"
    );
    self.notifier.notify(ExecutionEvent::RunStarted {
      execution_id: execution_id.clone(),
      steps: pruned.topological_order(),
    });

    let started = Instant::now();
    let deadline = self
      .config
      .run_timeout_ms
      .map(|ms| tokio::time::Instant::from_std(started) + Duration::from_millis(ms));
    let outcome = Scheduler::new(
      &pruned,
      Arc::clone(&store),
      Arc::clone(&self.notifier),
      execution_id.clone(),
      workers,
      started,
      deadline,
      cancel,
    )
    .run()
    .await;

    let result = self.collect(outcome, &request, &store, &execution_id, started);
    let duration_us = started.elapsed().as_micros() as u64;

    match &result {
      Ok(result) => {
        info!(
          execution_id = %execution_id,
          steps_executed = result.executed.len(),
          duration_ms = result.duration.as_millis() as u64,
          "run_completed"
        );
        self.notifier.notify(ExecutionEvent::RunCompleted {
          execution_id,
          duration_us,
        });
      }
      Err(e) => {
        error!(
          execution_id = %execution_id,
          error = %e,
          "run_failed"
        );
        self.notifier.notify(ExecutionEvent::RunFailed {
          execution_id,
          duration_us,
          error: e.to_string(),
        });
      }
    }

    result
  }

  /// Turn the scheduler outcome into the run result.
  fn collect(
    &self,
    outcome: Result<RunOutcome, ExecutionError>,
    request: &BuildRequest,
    store: &BuildContext,
    execution_id: &str,
    started: Instant,
  ) -> Result<BuildResult, ExecutionError> {
    match outcome? {
      RunOutcome::Completed { executed } => {
        let items = store.snapshot_of(request.requested()).map_err(internal)?;
        let context = if request
          .full_context()
          .unwrap_or(self.config.include_full_context)
        {
          Some(store.snapshot().map_err(internal)?)
        } else {
          None
        };
        Ok(BuildResult {
          execution_id: execution_id.to_string(),
          duration: started.elapsed(),
          items,
          context,
          executed,
        })
      }
      RunOutcome::Failed {
        step_id,
        source,
        also_failed,
      } => Err(ExecutionError::StepExecution {
        step_id,
        source,
        also_failed,
        items: store.snapshot().map_err(internal)?,
      }),
      RunOutcome::Cancelled => Err(ExecutionError::Cancelled),
      RunOutcome::TimedOut => Err(ExecutionError::Timeout {
        timeout_ms: self.config.run_timeout_ms.unwrap_or_default(),
      }),
    }
  }
}

/// Publish the caller's initial items and check that every initial item the
/// run depends on was supplied.
fn seed_initial_items(
  graph: &BuildGraph,
  request: &BuildRequest,
  store: &BuildContext,
) -> Result<(), ExecutionError> {
  for (key, values) in request.initial_values() {
    if !graph.is_initial(key) {
      return Err(ExecutionError::UndeclaredInitialItem(key.clone()));
    }
    let simple = graph
      .item_type(key)
      .is_some_and(|item| item.kind() == ItemKind::Simple);
    if simple && values.len() > 1 {
      return Err(ExecutionError::TooManyInitialValues {
        item: key.clone(),
        count: values.len(),
      });
    }
    store
      .publish(key, INITIAL_PRODUCER, values.clone())
      .map_err(internal)?;
  }

  for item in graph.initial_items() {
    let key = item.key();
    if item.kind() == ItemKind::Multi || request.initial_values().contains_key(key) {
      continue;
    }
    let required = request.requested().contains(key)
      || graph.steps().iter().any(|step| {
        step
          .consume_of(key)
          .is_some_and(|c| c.mode == ConsumeMode::Required)
      });
    if required {
      return Err(ExecutionError::MissingInitialItem(key.clone()));
    }
  }
  Ok(())
}

fn internal(e: impl Display) -> ExecutionError {
  ExecutionError::Internal {
    message: e.to_string(),
  }
}
