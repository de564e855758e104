//! Kiln Graph
//!
//! Turns a finalized [`StepChain`](kiln_step::StepChain) into a validated
//! dependency graph and prunes it down to what a run actually needs.
//!
//! - Every producer of an item gets an edge to every consumer of that item.
//!   Required, optional and ordering-only consumption all create edges.
//! - A required item nobody produces is rejected before anything runs.
//! - Cycles are rejected for the whole graph, not just the requested part, and
//!   reported with the full step path.
//! - [`BuildGraph::prune`] keeps final steps plus everything that transitively
//!   feeds a requested item, and returns another [`BuildGraph`].

mod cycle;
mod error;
mod graph;
mod prune;

pub use error::GraphError;
pub use graph::{BuildGraph, Edge, EdgeKind};
