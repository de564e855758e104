//! Dead-step elimination.

use std::collections::{HashMap, HashSet, VecDeque};

use kiln_item::{ItemKey, ItemKind};
use tracing::debug;

use crate::error::GraphError;
use crate::graph::{BuildGraph, EdgeKind};

impl BuildGraph {
  /// Restrict the graph to the steps needed for `requested` items.
  ///
  /// Retained steps are the final steps plus the backward closure, along
  /// required and optional edges, of final steps and of every producer of a
  /// requested item. Ordering-only edges never pull a producer in, and are
  /// dropped when their producer is pruned.
  ///
  /// A requested item that the graph cannot produce fails with
  /// [`GraphError::UnproducibleItem`]; multi items with no producer are allowed
  /// and simply end up empty.
  pub fn prune(&self, requested: &[ItemKey]) -> Result<BuildGraph, GraphError> {
    let mut seeds: Vec<&str> = self
      .steps()
      .iter()
      .filter(|step| step.is_final())
      .map(|step| step.id())
      .collect();

    for key in requested {
      let producers = self.producers(key);
      if producers.is_empty() {
        let known_multi = self
          .item_type(key)
          .is_some_and(|item| item.kind() == ItemKind::Multi);
        if !known_multi && !self.is_initial(key) {
          return Err(GraphError::UnproducibleItem(key.clone()));
        }
      }
      seeds.extend(producers.iter().map(String::as_str));
    }

    let retained = self.data_closure(seeds);

    let steps = self
      .steps()
      .iter()
      .filter(|step| retained.contains(step.id()))
      .cloned()
      .collect();
    let edges = self
      .edges()
      .iter()
      .filter(|edge| retained.contains(edge.from.as_str()) && retained.contains(edge.to.as_str()))
      .cloned()
      .collect();
    let producers = self
      .producers_map()
      .iter()
      .map(|(key, ids)| {
        let kept = ids
          .iter()
          .filter(|id| retained.contains(id.as_str()))
          .cloned()
          .collect::<Vec<_>>();
        (key.clone(), kept)
      })
      .filter(|(_, ids)| !ids.is_empty())
      .collect::<HashMap<_, _>>();
    let overridden = self
      .overridden_map()
      .iter()
      .filter(|(id, _)| retained.contains(id.as_str()))
      .map(|(id, keys)| (id.clone(), keys.clone()))
      .collect();

    debug!(
      steps = self.len(),
      retained = retained.len(),
      requested = requested.len(),
      "graph_pruned"
    );

    Ok(BuildGraph::from_parts(
      steps,
      edges,
      producers,
      self.item_types().to_vec(),
      self.initial_items().to_vec(),
      overridden,
    ))
  }

  /// Steps reachable backward from `seeds` over data-carrying edges.
  fn data_closure<'a>(&'a self, seeds: Vec<&'a str>) -> HashSet<&'a str> {
    let mut retained: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = seeds.into_iter().collect();

    while let Some(id) = queue.pop_front() {
      if !retained.insert(id) {
        continue;
      }
      for upstream in self.dependencies(id) {
        let carries_data = self
          .edge(upstream, id)
          .is_some_and(|edge| edge.kind != EdgeKind::OrderingOnly);
        if carries_data && !retained.contains(upstream.as_str()) {
          queue.push_back(upstream.as_str());
        }
      }
    }

    retained
  }
}

#[cfg(test)]
mod tests {
  use kiln_item::{MultiItem, SimpleItem};
  use kiln_step::{Step, StepRegistry};

  use super::*;

  fn build(steps: Vec<Step>) -> BuildGraph {
    let mut registry = StepRegistry::new();
    for step in steps {
      registry.register(step).unwrap();
    }
    BuildGraph::build(&registry.finalize()).unwrap()
  }

  fn ids(graph: &BuildGraph) -> Vec<&str> {
    graph.step_ids()
  }

  #[test]
  fn test_unused_producer_is_pruned() {
    let x = SimpleItem::<u32>::named("X");
    let y = SimpleItem::<u32>::named("Y");
    let z = SimpleItem::<u32>::named("Z");
    let graph = build(vec![
      Step::builder("A").produces(&x).build(|_| Ok(())),
      Step::builder("B").consumes(&x).produces(&y).build(|_| Ok(())),
      Step::builder("C").produces(&z).build(|_| Ok(())),
    ]);

    let pruned = graph.prune(&[y.key().clone()]).unwrap();

    assert_eq!(ids(&pruned), ["A", "B"]);
    assert_eq!(pruned.dependencies("B"), ["A"]);
    assert!(!pruned.contains("C"));
  }

  #[test]
  fn test_final_steps_and_their_inputs_are_kept() {
    let x = SimpleItem::<u32>::named("X");
    let y = SimpleItem::<u32>::named("Y");
    let graph = build(vec![
      Step::builder("config").produces(&x).build(|_| Ok(())),
      Step::builder("write-manifest")
        .consumes(&x)
        .final_step()
        .build(|_| Ok(())),
      Step::builder("unrelated").produces(&y).build(|_| Ok(())),
    ]);

    let pruned = graph.prune(&[]).unwrap();

    assert_eq!(ids(&pruned), ["config", "write-manifest"]);
  }

  #[test]
  fn test_ordering_only_edges_do_not_retain_producers() {
    let x = SimpleItem::<u32>::named("X");
    let marker = SimpleItem::<()>::named("Marker");
    let graph = build(vec![
      Step::builder("setup").produces(&marker).build(|_| Ok(())),
      Step::builder("A").after(&marker).produces(&x).build(|_| Ok(())),
    ]);

    let pruned = graph.prune(&[x.key().clone()]).unwrap();

    assert_eq!(ids(&pruned), ["A"]);
    assert!(pruned.edges().is_empty());
    assert_eq!(pruned.entry_points(), ["A"]);
  }

  #[test]
  fn test_ordering_only_edge_kept_between_retained_steps() {
    let x = SimpleItem::<u32>::named("X");
    let y = SimpleItem::<u32>::named("Y");
    let marker = SimpleItem::<()>::named("Marker");
    let graph = build(vec![
      Step::builder("A")
        .produces(&x)
        .produces(&marker)
        .build(|_| Ok(())),
      Step::builder("B")
        .consumes(&x)
        .produces(&y)
        .build(|_| Ok(())),
      Step::builder("C").after(&marker).consumes(&y).build(|_| Ok(())),
    ]);

    let pruned = graph.prune(&[]).unwrap();
    assert!(pruned.is_empty());

    let graph = build(vec![
      Step::builder("A")
        .produces(&x)
        .produces(&marker)
        .build(|_| Ok(())),
      Step::builder("B")
        .consumes(&x)
        .after(&marker)
        .produces(&y)
        .build(|_| Ok(())),
    ]);
    let pruned = graph.prune(&[y.key().clone()]).unwrap();
    assert_eq!(pruned.edge("A", "B").unwrap().kind, EdgeKind::Required);
  }

  #[test]
  fn test_optional_producers_are_retained() {
    let x = SimpleItem::<u32>::named("X");
    let y = SimpleItem::<u32>::named("Y");
    let graph = build(vec![
      Step::builder("A").produces_weak(&x).build(|_| Ok(())),
      Step::builder("B")
        .consumes_optional(&x)
        .produces(&y)
        .build(|_| Ok(())),
    ]);

    let pruned = graph.prune(&[y.key().clone()]).unwrap();
    assert_eq!(ids(&pruned), ["A", "B"]);
  }

  #[test]
  fn test_every_multi_producer_is_kept() {
    let routes = MultiItem::<String>::named("Route");
    let graph = build(vec![
      Step::builder("r1").produces(&routes).build(|_| Ok(())),
      Step::builder("r2").produces(&routes).build(|_| Ok(())),
      Step::builder("noise").build(|_| Ok(())),
    ]);

    let pruned = graph.prune(&[routes.key().clone()]).unwrap();
    assert_eq!(ids(&pruned), ["r1", "r2"]);
  }

  #[test]
  fn test_requested_item_without_producer() {
    let x = SimpleItem::<u32>::named("X");
    let routes = MultiItem::<String>::named("Route");
    let graph = build(vec![
      Step::builder("router")
        .consumes_optional(&routes)
        .build(|_| Ok(())),
    ]);

    assert!(matches!(
      graph.prune(&[x.key().clone()]),
      Err(GraphError::UnproducibleItem(_))
    ));
    assert!(graph.prune(&[routes.key().clone()]).unwrap().is_empty());
  }

  #[test]
  fn test_pruning_is_idempotent() {
    let x = SimpleItem::<u32>::named("X");
    let y = SimpleItem::<u32>::named("Y");
    let z = SimpleItem::<u32>::named("Z");
    let graph = build(vec![
      Step::builder("A").produces(&x).build(|_| Ok(())),
      Step::builder("B").consumes(&x).produces(&y).build(|_| Ok(())),
      Step::builder("C").consumes(&x).produces(&z).build(|_| Ok(())),
      Step::builder("D").final_step().build(|_| Ok(())),
    ]);
    let requested = [y.key().clone()];

    let once = graph.prune(&requested).unwrap();
    let twice = once.prune(&requested).unwrap();

    assert_eq!(ids(&once), ids(&twice));
    assert_eq!(once.edges(), twice.edges());
  }
}
