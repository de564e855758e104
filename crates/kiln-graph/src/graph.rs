use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use kiln_item::{ItemKey, ItemType};
use kiln_step::{ConsumeMode, Step, StepChain};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cycle::find_cycle;
use crate::error::GraphError;

/// Strength of a dependency edge.
///
/// Ordered weakest to strongest; parallel edges between the same pair of steps
/// collapse to the strongest kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
  OrderingOnly,
  Optional,
  Required,
}

impl From<ConsumeMode> for EdgeKind {
  fn from(mode: ConsumeMode) -> Self {
    match mode {
      ConsumeMode::OrderingOnly => EdgeKind::OrderingOnly,
      ConsumeMode::Optional => EdgeKind::Optional,
      ConsumeMode::Required => EdgeKind::Required,
    }
  }
}

/// Producer step -> consumer step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
  pub from: String,
  pub to: String,
  pub kind: EdgeKind,
  /// Items that link the two steps.
  pub items: Vec<ItemKey>,
}

/// Validated dependency graph of build steps.
#[derive(Debug, Clone)]
pub struct BuildGraph {
  /// Steps in registration order.
  steps: Vec<Arc<Step>>,
  edges: Vec<Edge>,
  /// Adjacency list: step_id -> downstream step_ids.
  adjacency: HashMap<String, Vec<String>>,
  /// Reverse adjacency: step_id -> upstream step_ids.
  reverse_adjacency: HashMap<String, Vec<String>>,
  /// Steps with no incoming edges.
  entry_points: Vec<String>,
  /// Effective producers per item, in registration order.
  producers: HashMap<ItemKey, Vec<String>>,
  item_types: Vec<ItemType>,
  initial: Vec<ItemType>,
  overridden: HashMap<String, Vec<ItemKey>>,
}

impl BuildGraph {
  /// Build and validate the graph for a finalized chain.
  pub fn build(chain: &StepChain) -> Result<Self, GraphError> {
    let mut producers: HashMap<ItemKey, Vec<String>> = HashMap::new();
    let mut overridden = HashMap::new();
    for step in chain.steps() {
      let discarded = chain.overridden_items(step.id());
      if !discarded.is_empty() {
        overridden.insert(step.id().to_string(), discarded.to_vec());
      }
      for produce in step.produces() {
        if discarded.contains(produce.item.key()) {
          continue;
        }
        producers
          .entry(produce.item.key().clone())
          .or_default()
          .push(step.id().to_string());
      }
    }

    let mut edges: Vec<Edge> = Vec::new();
    let mut edge_index: HashMap<(String, String), usize> = HashMap::new();
    for step in chain.steps() {
      for consume in step.consumes() {
        let key = consume.item.key();
        let item_producers = producers.get(key).map(|p| p.as_slice()).unwrap_or(&[]);
        if item_producers.is_empty() {
          if consume.mode == ConsumeMode::Required && !chain.is_initial(key) {
            return Err(GraphError::UnsatisfiedDependency {
              step: step.id().to_string(),
              item: key.clone(),
            });
          }
          continue;
        }
        for producer in item_producers {
          let kind = EdgeKind::from(consume.mode);
          let pair = (producer.clone(), step.id().to_string());
          match edge_index.get(&pair) {
            Some(&index) => {
              let edge = &mut edges[index];
              edge.kind = edge.kind.max(kind);
              edge.items.push(key.clone());
            }
            None => {
              edge_index.insert(pair, edges.len());
              edges.push(Edge {
                from: producer.clone(),
                to: step.id().to_string(),
                kind,
                items: vec![key.clone()],
              });
            }
          }
        }
      }
    }

    let graph = Self::from_parts(
      chain.steps().to_vec(),
      edges,
      producers,
      chain.item_types(),
      chain.initial_items().to_vec(),
      overridden,
    );

    if let Some(path) = find_cycle(&graph.step_ids(), &graph.adjacency) {
      return Err(GraphError::CycleDetected { path });
    }

    debug!(
      steps = graph.steps.len(),
      edges = graph.edges.len(),
      "graph_built"
    );
    Ok(graph)
  }

  pub(crate) fn from_parts(
    steps: Vec<Arc<Step>>,
    edges: Vec<Edge>,
    producers: HashMap<ItemKey, Vec<String>>,
    item_types: Vec<ItemType>,
    initial: Vec<ItemType>,
    overridden: HashMap<String, Vec<ItemKey>>,
  ) -> Self {
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
    let mut reverse_adjacency: HashMap<String, Vec<String>> = HashMap::new();

    // Initialize all steps
    for step in &steps {
      adjacency.entry(step.id().to_string()).or_default();
      reverse_adjacency.entry(step.id().to_string()).or_default();
    }

    for edge in &edges {
      adjacency
        .entry(edge.from.clone())
        .or_default()
        .push(edge.to.clone());
      reverse_adjacency
        .entry(edge.to.clone())
        .or_default()
        .push(edge.from.clone());
    }

    let entry_points = steps
      .iter()
      .map(|s| s.id())
      .filter(|id| reverse_adjacency.get(*id).is_none_or(|v| v.is_empty()))
      .map(str::to_string)
      .collect();

    Self {
      steps,
      edges,
      adjacency,
      reverse_adjacency,
      entry_points,
      producers,
      item_types,
      initial,
      overridden,
    }
  }

  /// Steps in registration order.
  pub fn steps(&self) -> &[Arc<Step>] {
    &self.steps
  }

  pub fn step(&self, id: &str) -> Option<&Arc<Step>> {
    self.steps.iter().find(|s| s.id() == id)
  }

  pub fn step_ids(&self) -> Vec<&str> {
    self.steps.iter().map(|s| s.id()).collect()
  }

  pub fn contains(&self, id: &str) -> bool {
    self.adjacency.contains_key(id)
  }

  pub fn len(&self) -> usize {
    self.steps.len()
  }

  pub fn is_empty(&self) -> bool {
    self.steps.is_empty()
  }

  pub fn edges(&self) -> &[Edge] {
    &self.edges
  }

  /// The edge between two steps, if any.
  pub fn edge(&self, from: &str, to: &str) -> Option<&Edge> {
    self.edges.iter().find(|e| e.from == from && e.to == to)
  }

  /// Steps with no incoming edges.
  pub fn entry_points(&self) -> &[String] {
    &self.entry_points
  }

  /// Direct dependents of a step.
  pub fn dependents(&self, step_id: &str) -> &[String] {
    self
      .adjacency
      .get(step_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Direct dependencies of a step.
  pub fn dependencies(&self, step_id: &str) -> &[String] {
    self
      .reverse_adjacency
      .get(step_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Steps whose output for the item is kept.
  pub fn producers(&self, key: &ItemKey) -> &[String] {
    self
      .producers
      .get(key)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Every item type known to the graph.
  pub fn item_types(&self) -> &[ItemType] {
    &self.item_types
  }

  pub fn item_type(&self, key: &ItemKey) -> Option<&ItemType> {
    self.item_types.iter().find(|item| item.key() == key)
  }

  /// Items the caller supplies when invoking a run.
  pub fn initial_items(&self) -> &[ItemType] {
    &self.initial
  }

  pub fn is_initial(&self, key: &ItemKey) -> bool {
    self.initial.iter().any(|item| item.key() == key)
  }

  /// Simple items a step produces but whose output is overridden.
  pub fn overridden_items(&self, step_id: &str) -> &[ItemKey] {
    self
      .overridden
      .get(step_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Steps in a dependency-respecting order.
  ///
  /// Ties are broken by registration order, so the result is deterministic.
  pub fn topological_order(&self) -> Vec<String> {
    let position: HashMap<&str, usize> = self
      .steps
      .iter()
      .enumerate()
      .map(|(i, s)| (s.id(), i))
      .collect();
    let mut in_degree: Vec<usize> = self
      .steps
      .iter()
      .map(|s| self.dependencies(s.id()).len())
      .collect();
    let mut ready: BTreeSet<usize> = in_degree
      .iter()
      .enumerate()
      .filter(|(_, degree)| **degree == 0)
      .map(|(i, _)| i)
      .collect();

    let mut order = Vec::with_capacity(self.steps.len());
    while let Some(next) = ready.pop_first() {
      let id = self.steps[next].id();
      order.push(id.to_string());
      for dependent in self.dependents(id) {
        let Some(&i) = position.get(dependent.as_str()) else {
          continue;
        };
        in_degree[i] -= 1;
        if in_degree[i] == 0 {
          ready.insert(i);
        }
      }
    }
    order
  }

  pub(crate) fn producers_map(&self) -> &HashMap<ItemKey, Vec<String>> {
    &self.producers
  }

  pub(crate) fn overridden_map(&self) -> &HashMap<String, Vec<ItemKey>> {
    &self.overridden
  }
}

#[cfg(test)]
mod tests {
  use kiln_item::{MultiItem, SimpleItem};
  use kiln_step::{Step, StepRegistry};

  use super::*;

  fn build(steps: Vec<Step>) -> Result<BuildGraph, GraphError> {
    let mut registry = StepRegistry::new();
    for step in steps {
      registry.register(step).unwrap();
    }
    BuildGraph::build(&registry.finalize())
  }

  #[test]
  fn test_edges_connect_producers_to_consumers() {
    let x = SimpleItem::<u32>::named("X");
    let y = SimpleItem::<u32>::named("Y");

    let graph = build(vec![
      Step::builder("A").produces(&x).build(|_| Ok(())),
      Step::builder("B").consumes(&x).produces(&y).build(|_| Ok(())),
      Step::builder("C").consumes_optional(&y).build(|_| Ok(())),
    ])
    .unwrap();

    assert_eq!(graph.dependencies("B"), ["A"]);
    assert_eq!(graph.dependents("B"), ["C"]);
    assert_eq!(graph.edge("A", "B").unwrap().kind, EdgeKind::Required);
    assert_eq!(graph.edge("B", "C").unwrap().kind, EdgeKind::Optional);
    assert_eq!(graph.entry_points(), ["A"]);
  }

  #[test]
  fn test_parallel_edges_keep_strongest_kind() {
    let x = SimpleItem::<u32>::named("X");
    let marker = SimpleItem::<()>::named("Marker");

    let graph = build(vec![
      Step::builder("A")
        .produces(&x)
        .produces(&marker)
        .build(|_| Ok(())),
      Step::builder("B")
        .after(&marker)
        .consumes(&x)
        .build(|_| Ok(())),
    ])
    .unwrap();

    assert_eq!(graph.edges().len(), 1);
    let edge = graph.edge("A", "B").unwrap();
    assert_eq!(edge.kind, EdgeKind::Required);
    assert_eq!(edge.items.len(), 2);
  }

  #[test]
  fn test_multi_item_consumer_depends_on_every_producer() {
    let routes = MultiItem::<String>::named("Route");

    let graph = build(vec![
      Step::builder("r1").produces(&routes).build(|_| Ok(())),
      Step::builder("r2").produces_weak(&routes).build(|_| Ok(())),
      Step::builder("router").consumes(&routes).build(|_| Ok(())),
    ])
    .unwrap();

    assert_eq!(graph.dependencies("router"), ["r1", "r2"]);
    assert_eq!(graph.producers(routes.key()), ["r1", "r2"]);
  }

  #[test]
  fn test_unsatisfied_required_dependency() {
    let x = SimpleItem::<u32>::named("X");

    let err = build(vec![Step::builder("B").consumes(&x).build(|_| Ok(()))]).unwrap_err();

    match err {
      GraphError::UnsatisfiedDependency { step, item } => {
        assert_eq!(step, "B");
        assert_eq!(item, ItemKey::new("X"));
      }
      other => panic!("unexpected error: {other:?}"),
    }
  }

  #[test]
  fn test_optional_and_ordering_only_without_producer_are_fine() {
    let x = SimpleItem::<u32>::named("X");
    let y = SimpleItem::<u32>::named("Y");

    let graph = build(vec![
      Step::builder("B")
        .consumes_optional(&x)
        .after(&y)
        .build(|_| Ok(())),
    ])
    .unwrap();

    assert!(graph.edges().is_empty());
  }

  #[test]
  fn test_initial_item_satisfies_required_consumer() {
    let x = SimpleItem::<u32>::named("X");
    let mut registry = StepRegistry::new();
    registry.add_initial(&x).unwrap();
    registry
      .register(Step::builder("B").consumes(&x).build(|_| Ok(())))
      .unwrap();

    let graph = BuildGraph::build(&registry.finalize()).unwrap();
    assert!(graph.dependencies("B").is_empty());
    assert!(graph.is_initial(x.key()));
  }

  #[test]
  fn test_cycle_path_is_reported_in_order() {
    let x = SimpleItem::<u32>::named("X");
    let y = SimpleItem::<u32>::named("Y");
    let z = SimpleItem::<u32>::named("Z");

    let err = build(vec![
      Step::builder("A").consumes(&z).produces(&x).build(|_| Ok(())),
      Step::builder("B").consumes(&x).produces(&y).build(|_| Ok(())),
      Step::builder("C").consumes(&y).produces(&z).build(|_| Ok(())),
    ])
    .unwrap_err();

    match err {
      GraphError::CycleDetected { path } => assert_eq!(path, ["A", "B", "C", "A"]),
      other => panic!("unexpected error: {other:?}"),
    }
  }

  #[test]
  fn test_ordering_only_edges_participate_in_cycles() {
    let x = SimpleItem::<u32>::named("X");
    let y = SimpleItem::<u32>::named("Y");

    let err = build(vec![
      Step::builder("A").after(&y).produces(&x).build(|_| Ok(())),
      Step::builder("B").after(&x).produces(&y).build(|_| Ok(())),
    ])
    .unwrap_err();

    assert!(matches!(err, GraphError::CycleDetected { .. }));
    assert_eq!(err.to_string(), "dependency cycle detected: A -> B -> A");
  }

  #[test]
  fn test_self_consumption_is_a_cycle() {
    let routes = MultiItem::<String>::named("Route");

    let err = build(vec![
      Step::builder("A")
        .produces(&routes)
        .consumes(&routes)
        .build(|_| Ok(())),
    ])
    .unwrap_err();

    match err {
      GraphError::CycleDetected { path } => assert_eq!(path, ["A", "A"]),
      other => panic!("unexpected error: {other:?}"),
    }
  }

  #[test]
  fn test_overridden_producer_is_not_an_edge_source() {
    let x = SimpleItem::<u32>::named("X");

    let graph = build(vec![
      Step::builder("default")
        .produces_overridable(&x)
        .build(|_| Ok(())),
      Step::builder("custom").produces(&x).build(|_| Ok(())),
      Step::builder("user").consumes(&x).build(|_| Ok(())),
    ])
    .unwrap();

    assert_eq!(graph.dependencies("user"), ["custom"]);
    assert_eq!(graph.overridden_items("default"), [ItemKey::new("X")]);
  }

  #[test]
  fn test_topological_order_is_deterministic() {
    let x = SimpleItem::<u32>::named("X");
    let y = SimpleItem::<u32>::named("Y");

    let graph = build(vec![
      Step::builder("late").consumes(&y).build(|_| Ok(())),
      Step::builder("b").consumes(&x).produces(&y).build(|_| Ok(())),
      Step::builder("a").produces(&x).build(|_| Ok(())),
      Step::builder("free").build(|_| Ok(())),
    ])
    .unwrap();

    assert_eq!(graph.topological_order(), ["a", "b", "late", "free"]);
  }
}
