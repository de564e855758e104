//! Kiln Runtime
//!
//! This crate executes build graphs: it prunes a validated [`BuildGraph`] to
//! the requested items, schedules the remaining steps on a bounded worker pool
//! and reports progress to an [`ExecutionNotifier`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       BuildEngine                           │
//! │  - execute(graph, request, cancel) → BuildResult            │
//! │  - prunes the graph, seeds initial items                    │
//! │  - run-level events and logging                             │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Scheduler                            │
//! │  - in-degree tracking, ready queue                          │
//! │  - at most max_workers bodies on the blocking pool          │
//! │  - abort on first failure, drain in-flight steps            │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 StepContext → BuildContext                  │
//! │  - bodies read consumed items, buffer produced items        │
//! │  - output committed before completion is reported           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use kiln_runtime::{BuildEngine, BuildRequest, EngineConfig, MetricsRecorder};
//! use tokio_util::sync::CancellationToken;
//!
//! let graph = BuildGraph::build(&registry.finalize())?;
//!
//! let recorder = MetricsRecorder::new();
//! let engine = BuildEngine::with_notifier(EngineConfig::default(), recorder.clone());
//!
//! let request = BuildRequest::new().request(&site_map);
//! let result = engine.execute(&graph, request, CancellationToken::new()).await?;
//! let site_map = result.items.get(&site_map);
//!
//! recorder.report().write_json("target/kiln-metrics.json")?;
//! ```
//!
//! [`BuildGraph`]: kiln_graph::BuildGraph

mod engine;
mod error;
mod events;
mod metrics;
mod request;
mod result;
mod scheduler;

pub use engine::BuildEngine;
pub use error::{ExecutionError, StepPanic};
pub use events::{ChannelNotifier, ExecutionEvent, ExecutionNotifier, NoopNotifier};
pub use kiln_config::EngineConfig;
pub use metrics::{ExecutionRecord, MetricsRecorder, MetricsReport, StepOutcome};
pub use request::BuildRequest;
pub use result::BuildResult;
