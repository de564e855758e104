//! Per-step execution metrics.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::events::{ExecutionEvent, ExecutionNotifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
  /// Started, no completion seen (the report was taken mid-run).
  Running,
  Completed,
  Failed,
}

/// Timing and placement of one executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
  pub step_id: String,
  /// Worker thread the body ran on.
  pub thread: String,
  /// Microseconds since the run started.
  pub started_at_us: u64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub finished_at_us: Option<u64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub duration_us: Option<u64>,
  pub outcome: StepOutcome,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  pub dependencies: Vec<String>,
  pub dependents: Vec<String>,
}

/// Metrics of one run, in step start order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
  pub execution_id: String,
  /// Wall-clock start, milliseconds since the Unix epoch.
  pub started_at_ms: u64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub duration_ms: Option<u64>,
  pub records: Vec<ExecutionRecord>,
}

impl MetricsReport {
  pub fn record(&self, step_id: &str) -> Option<&ExecutionRecord> {
    self.records.iter().find(|r| r.step_id == step_id)
  }

  /// Write the report as pretty-printed JSON, creating parent directories.
  pub fn write_json(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
      std::fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, self)?;
    writer.write_all(b"\n")?;
    writer.flush()
  }
}

#[derive(Debug, Default)]
struct RecorderState {
  report: MetricsReport,
  /// step_id -> position in `report.records`
  index: HashMap<String, usize>,
}

/// Notifier that turns execution events into a [`MetricsReport`].
///
/// Clones share state, so keep one handle and give a clone to the engine.
/// A new run resets the recorder.
#[derive(Debug, Clone, Default)]
pub struct MetricsRecorder {
  state: Arc<Mutex<RecorderState>>,
}

impl MetricsRecorder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Report for the most recent run.
  pub fn report(&self) -> MetricsReport {
    let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
    let mut report = state.report.clone();
    report
      .records
      .sort_by(|a, b| (a.started_at_us, &a.step_id).cmp(&(b.started_at_us, &b.step_id)));
    report
  }

  fn finish(state: &mut RecorderState, step_id: &str, at_us: u64, outcome: StepOutcome) {
    let Some(&i) = state.index.get(step_id) else {
      return;
    };
    let record = &mut state.report.records[i];
    record.finished_at_us = Some(at_us);
    record.duration_us = Some(at_us.saturating_sub(record.started_at_us));
    record.outcome = outcome;
  }
}

impl ExecutionNotifier for MetricsRecorder {
  fn notify(&self, event: ExecutionEvent) {
    let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
    match event {
      ExecutionEvent::RunStarted { execution_id, .. } => {
        let started_at_ms = SystemTime::now()
          .duration_since(UNIX_EPOCH)
          .map(|d| d.as_millis() as u64)
          .unwrap_or(0);
        *state = RecorderState {
          report: MetricsReport {
            execution_id,
            started_at_ms,
            duration_ms: None,
            records: Vec::new(),
          },
          index: HashMap::new(),
        };
      }
      ExecutionEvent::StepStarted {
        step_id,
        thread,
        at_us,
        dependencies,
        dependents,
        ..
      } => {
        let position = state.report.records.len();
        state.index.insert(step_id.clone(), position);
        state.report.records.push(ExecutionRecord {
          step_id,
          thread,
          started_at_us: at_us,
          finished_at_us: None,
          duration_us: None,
          outcome: StepOutcome::Running,
          error: None,
          dependencies,
          dependents,
        });
      }
      ExecutionEvent::StepCompleted { step_id, at_us, .. } => {
        Self::finish(&mut state, &step_id, at_us, StepOutcome::Completed);
      }
      ExecutionEvent::StepFailed {
        step_id,
        at_us,
        error,
        ..
      } => {
        Self::finish(&mut state, &step_id, at_us, StepOutcome::Failed);
        if let Some(&i) = state.index.get(&step_id) {
          state.report.records[i].error = Some(error);
        }
      }
      ExecutionEvent::RunCompleted { duration_us, .. }
      | ExecutionEvent::RunFailed { duration_us, .. } => {
        state.report.duration_ms = Some(duration_us / 1000);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn started(step_id: &str, at_us: u64) -> ExecutionEvent {
    ExecutionEvent::StepStarted {
      execution_id: "run-1".to_string(),
      step_id: step_id.to_string(),
      thread: "worker".to_string(),
      at_us,
      dependencies: vec![],
      dependents: vec![],
    }
  }

  #[test]
  fn test_records_follow_events() {
    let recorder = MetricsRecorder::new();
    recorder.notify(ExecutionEvent::RunStarted {
      execution_id: "run-1".to_string(),
      steps: vec!["a".to_string(), "b".to_string()],
    });
    recorder.notify(started("b", 20));
    recorder.notify(started("a", 10));
    recorder.notify(ExecutionEvent::StepCompleted {
      execution_id: "run-1".to_string(),
      step_id: "a".to_string(),
      at_us: 50,
      published: vec![],
    });
    recorder.notify(ExecutionEvent::StepFailed {
      execution_id: "run-1".to_string(),
      step_id: "b".to_string(),
      at_us: 70,
      error: "boom".to_string(),
    });
    recorder.notify(ExecutionEvent::RunFailed {
      execution_id: "run-1".to_string(),
      duration_us: 4_200,
      error: "boom".to_string(),
    });

    let report = recorder.report();
    assert_eq!(report.execution_id, "run-1");
    assert_eq!(report.duration_ms, Some(4));
    assert_eq!(report.records[0].step_id, "a");
    assert_eq!(report.records[0].duration_us, Some(40));
    assert_eq!(report.records[0].outcome, StepOutcome::Completed);

    let b = report.record("b").unwrap();
    assert_eq!(b.outcome, StepOutcome::Failed);
    assert_eq!(b.error.as_deref(), Some("boom"));
  }

  #[test]
  fn test_new_run_resets() {
    let recorder = MetricsRecorder::new();
    recorder.notify(ExecutionEvent::RunStarted {
      execution_id: "first".to_string(),
      steps: vec![],
    });
    recorder.notify(started("a", 1));
    recorder.notify(ExecutionEvent::RunStarted {
      execution_id: "second".to_string(),
      steps: vec![],
    });

    let report = recorder.report();
    assert_eq!(report.execution_id, "second");
    assert!(report.records.is_empty());
  }

  #[test]
  fn test_write_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("metrics.json");
    let report = MetricsReport {
      execution_id: "run-1".to_string(),
      started_at_ms: 1,
      duration_ms: Some(2),
      records: vec![],
    };

    report.write_json(&path).unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    let parsed: MetricsReport = serde_json::from_str(&content).unwrap();
    assert_eq!(parsed, report);
  }
}
