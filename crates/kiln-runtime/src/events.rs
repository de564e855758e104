//! Execution events and notifiers for observability.
//!
//! Events are emitted during a build run so consumers can record timings,
//! stream progress, or log. Notifiers observe only; they never influence
//! scheduling.

use kiln_item::ItemKey;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events emitted during a build run.
///
/// Offsets (`at_us`) are microseconds since the run started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
  /// The run has started with the given (pruned) set of steps.
  RunStarted {
    execution_id: String,
    steps: Vec<String>,
  },

  /// A step body is about to execute.
  StepStarted {
    execution_id: String,
    step_id: String,
    thread: String,
    at_us: u64,
    /// Direct upstream steps in the scheduled graph.
    dependencies: Vec<String>,
    /// Direct downstream steps in the scheduled graph.
    dependents: Vec<String>,
  },

  /// A step finished and its output is visible to other steps.
  StepCompleted {
    execution_id: String,
    step_id: String,
    at_us: u64,
    published: Vec<ItemKey>,
  },

  /// A step returned an error or panicked.
  StepFailed {
    execution_id: String,
    step_id: String,
    at_us: u64,
    error: String,
  },

  /// The run has completed successfully.
  RunCompleted {
    execution_id: String,
    duration_us: u64,
  },

  /// The run has failed, was cancelled, or timed out.
  RunFailed {
    execution_id: String,
    duration_us: u64,
    error: String,
  },
}

impl ExecutionEvent {
  pub fn execution_id(&self) -> &str {
    match self {
      ExecutionEvent::RunStarted { execution_id, .. }
      | ExecutionEvent::StepStarted { execution_id, .. }
      | ExecutionEvent::StepCompleted { execution_id, .. }
      | ExecutionEvent::StepFailed { execution_id, .. }
      | ExecutionEvent::RunCompleted { execution_id, .. }
      | ExecutionEvent::RunFailed { execution_id, .. } => execution_id,
    }
  }
}

/// Trait for receiving execution events.
///
/// The engine calls `notify` for each event, from the scheduler and from the
/// worker threads running step bodies. Implementations decide what to do with
/// them (record, broadcast, ignore, etc.) and must not block for long.
pub trait ExecutionNotifier: Send + Sync {
  /// Called when an execution event occurs.
  fn notify(&self, event: ExecutionEvent);
}

/// A no-op notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {}
}

/// A notifier that sends events to an unbounded channel.
///
/// Use this to consume events asynchronously, e.g. to stream progress to a UI.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  // Unbounded so a slow consumer never stalls a worker thread. Volume is two
  // events per step.
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // Ignore send errors - receiver may have been dropped
    let _ = self.sender.send(event);
  }
}

/// Fan events out to two notifiers, first `A` then `B`.
impl<A: ExecutionNotifier, B: ExecutionNotifier> ExecutionNotifier for (A, B) {
  fn notify(&self, event: ExecutionEvent) {
    self.0.notify(event.clone());
    self.1.notify(event);
  }
}
