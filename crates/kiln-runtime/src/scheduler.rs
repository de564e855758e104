//! Dependency-driven parallel scheduling.
//!
//! Each step moves through `Pending -> Ready -> Running -> Done | Failed`. A
//! step is ready once every upstream step in the graph is done. Ready steps run
//! on tokio's blocking pool, at most `max_workers` at a time, and commit their
//! output before reporting back, so a dependent never starts before the items
//! it reads are visible.
//!
//! The first failure (or cancellation, or timeout) stops new starts. Steps that
//! are already running are drained, never interrupted.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use kiln_graph::BuildGraph;
use kiln_item::{BuildContext, ItemKey};
use kiln_step::{BoxError, Step, StepContext};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, warn};

use crate::error::{ExecutionError, StepPanic};
use crate::events::{ExecutionEvent, ExecutionNotifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepState {
  Pending,
  Ready,
  Running,
  Done,
  Failed,
}

/// What a worker sends back once a step body has returned.
struct StepReport {
  index: usize,
  outcome: Result<Vec<ItemKey>, BoxError>,
}

/// Step states plus the queue of steps allowed to start.
struct Progress<'a> {
  states: Vec<StepState>,
  /// Upstream steps not yet done, per step.
  waiting: Vec<usize>,
  ready: VecDeque<usize>,
  position: HashMap<&'a str, usize>,
}

impl<'a> Progress<'a> {
  fn new(graph: &'a BuildGraph) -> Self {
    let steps = graph.steps();
    let position = steps
      .iter()
      .enumerate()
      .map(|(i, s)| (s.id(), i))
      .collect();
    let waiting: Vec<usize> = steps
      .iter()
      .map(|s| graph.dependencies(s.id()).len())
      .collect();

    let mut states = vec![StepState::Pending; steps.len()];
    let mut ready = VecDeque::new();
    for (i, count) in waiting.iter().enumerate() {
      if *count == 0 {
        states[i] = StepState::Ready;
        ready.push_back(i);
      }
    }

    Self {
      states,
      waiting,
      ready,
      position,
    }
  }

  /// Take the next ready step and mark it running.
  fn next_ready(&mut self) -> Option<usize> {
    let index = self.ready.pop_front()?;
    self.states[index] = StepState::Running;
    Some(index)
  }

  /// Mark a step done. With `release`, dependents whose upstream steps are all
  /// done become ready; without it they stay pending.
  fn complete(&mut self, graph: &BuildGraph, index: usize, release: bool) {
    self.states[index] = StepState::Done;
    if !release {
      return;
    }
    for dependent in graph.dependents(graph.steps()[index].id()) {
      let Some(&j) = self.position.get(dependent.as_str()) else {
        continue;
      };
      self.waiting[j] -= 1;
      if self.waiting[j] == 0 && self.states[j] == StepState::Pending {
        self.states[j] = StepState::Ready;
        self.ready.push_back(j);
      }
    }
  }

  fn fail(&mut self, index: usize) {
    self.states[index] = StepState::Failed;
  }

  #[cfg(test)]
  fn state(&self, index: usize) -> StepState {
    self.states[index]
  }

  fn unfinished(&self) -> usize {
    self
      .states
      .iter()
      .filter(|s| **s != StepState::Done)
      .count()
  }
}

/// How a scheduled run ended.
pub(crate) enum RunOutcome {
  Completed {
    executed: Vec<String>,
  },
  Failed {
    step_id: String,
    source: BoxError,
    also_failed: Vec<String>,
  },
  Cancelled,
  TimedOut,
}

pub(crate) struct Scheduler<'a, N> {
  graph: &'a BuildGraph,
  store: Arc<BuildContext>,
  notifier: Arc<N>,
  execution_id: String,
  max_workers: usize,
  run_start: Instant,
  deadline: Option<tokio::time::Instant>,
  cancel: CancellationToken,
  /// Handed to step bodies; tripped on cancellation, timeout or failure.
  steps_token: CancellationToken,
}

impl<'a, N: ExecutionNotifier + 'static> Scheduler<'a, N> {
  #[allow(clippy::too_many_arguments)]
  pub(crate) fn new(
    graph: &'a BuildGraph,
    store: Arc<BuildContext>,
    notifier: Arc<N>,
    execution_id: String,
    max_workers: usize,
    run_start: Instant,
    deadline: Option<tokio::time::Instant>,
    cancel: CancellationToken,
  ) -> Self {
    let steps_token = cancel.child_token();
    Self {
      graph,
      store,
      notifier,
      execution_id,
      max_workers: max_workers.max(1),
      run_start,
      deadline,
      cancel,
      steps_token,
    }
  }

  /// Run every step of the graph, or as many as possible before the run halts.
  pub(crate) async fn run(self) -> Result<RunOutcome, ExecutionError> {
    let steps = self.graph.steps();
    let mut progress = Progress::new(self.graph);

    let mut running: JoinSet<StepReport> = JoinSet::new();
    let mut executed = Vec::new();
    let mut failure: Option<(String, BoxError)> = None;
    let mut also_failed = Vec::new();
    let mut timed_out = false;

    loop {
      if failure.is_some() || timed_out || self.cancel.is_cancelled() {
        self.steps_token.cancel();
      } else {
        while running.len() < self.max_workers {
          let Some(i) = progress.next_ready() else {
            break;
          };
          self.spawn_step(i, &mut running);
        }
      }

      if running.is_empty() {
        break;
      }

      let in_flight = running.len();
      let joined = match self.deadline {
        Some(deadline) if !timed_out => tokio::select! {
          joined = running.join_next() => joined,
          _ = tokio::time::sleep_until(deadline) => {
            warn!(
              execution_id = %self.execution_id,
              in_flight,
              "run timed out, draining in-flight steps"
            );
            timed_out = true;
            continue;
          }
        },
        _ => running.join_next().await,
      };
      let Some(joined) = joined else {
        break;
      };
      let report = joined.map_err(|e| ExecutionError::Internal {
        message: format!("step task join error: {}", e),
      })?;

      let step_id = steps[report.index].id();
      match report.outcome {
        Ok(_) => {
          executed.push(step_id.to_string());
          // Nothing becomes ready once the run is halting.
          let release = failure.is_none() && !timed_out && !self.cancel.is_cancelled();
          progress.complete(self.graph, report.index, release);
        }
        Err(source) => {
          progress.fail(report.index);
          if failure.is_none() {
            warn!(
              execution_id = %self.execution_id,
              step_id = %step_id,
              in_flight = running.len(),
              "aborting run, draining in-flight steps"
            );
            failure = Some((step_id.to_string(), source));
          } else {
            also_failed.push(step_id.to_string());
          }
        }
      }
    }

    if let Some((step_id, source)) = failure {
      return Ok(RunOutcome::Failed {
        step_id,
        source,
        also_failed,
      });
    }

    let unfinished = progress.unfinished();
    if unfinished > 0 {
      if timed_out {
        return Ok(RunOutcome::TimedOut);
      }
      if self.cancel.is_cancelled() {
        return Ok(RunOutcome::Cancelled);
      }
      return Err(ExecutionError::Internal {
        message: format!("{} steps never became ready", unfinished),
      });
    }

    Ok(RunOutcome::Completed { executed })
  }

  /// Start a ready step on the blocking pool.
  fn spawn_step(&self, index: usize, running: &mut JoinSet<StepReport>) {
    let step = Arc::clone(&self.graph.steps()[index]);
    let ctx = StepContext::new(
      Arc::clone(&step),
      Arc::clone(&self.store),
      self.steps_token.clone(),
    )
    .with_overridden(self.graph.overridden_items(step.id()).iter().cloned());

    let notifier = Arc::clone(&self.notifier);
    let execution_id = self.execution_id.clone();
    let dependencies = self.graph.dependencies(step.id()).to_vec();
    let dependents = self.graph.dependents(step.id()).to_vec();
    let run_start = self.run_start;
    let span = info_span!("step_execute", step_id = %step.id());

    running.spawn_blocking(move || {
      let _entered = span.enter();
      let thread = thread_label();

      debug!(thread = %thread, "step_started");
      notifier.notify(ExecutionEvent::StepStarted {
        execution_id: execution_id.clone(),
        step_id: step.id().to_string(),
        thread,
        at_us: elapsed_us(run_start),
        dependencies,
        dependents,
      });

      let outcome = run_body(&step, ctx);
      let at_us = elapsed_us(run_start);

      match &outcome {
        Ok(published) => {
          debug!(published = published.len(), "step_completed");
          notifier.notify(ExecutionEvent::StepCompleted {
            execution_id,
            step_id: step.id().to_string(),
            at_us,
            published: published.clone(),
          });
        }
        Err(e) => {
          error!(error = %e, "step_failed");
          notifier.notify(ExecutionEvent::StepFailed {
            execution_id,
            step_id: step.id().to_string(),
            at_us,
            error: e.to_string(),
          });
        }
      }

      StepReport { index, outcome }
    });
  }
}

/// Execute the body and publish its output. Nothing is published unless the
/// body returned `Ok` and the context accepts the output.
fn run_body(step: &Step, mut ctx: StepContext) -> Result<Vec<ItemKey>, BoxError> {
  match panic::catch_unwind(AssertUnwindSafe(|| step.body().execute(&mut ctx))) {
    Ok(Ok(())) => ctx.commit().map_err(BoxError::from),
    Ok(Err(source)) => Err(source),
    Err(payload) => Err(Box::new(StepPanic {
      message: panic_message(payload.as_ref()),
    })),
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&str>() {
    message.to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "non-string panic payload".to_string()
  }
}

fn thread_label() -> String {
  let current = thread::current();
  format!("{}/{:?}", current.name().unwrap_or("unnamed"), current.id())
}

fn elapsed_us(since: Instant) -> u64 {
  since.elapsed().as_micros() as u64
}
