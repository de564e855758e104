//! Property tests for graph construction and pruning.

use kiln_graph::{BuildGraph, EdgeKind, GraphError};
use kiln_item::{ItemKey, SimpleItem};
use kiln_step::{Step, StepRegistry};
use proptest::prelude::*;

/// A random DAG description: step `i` produces `X{i}`; `links[j][i]` (i < j)
/// says how step `j` consumes `X{i}` (0 = not at all).
#[derive(Debug, Clone)]
struct Shape {
  links: Vec<Vec<u8>>,
  finals: Vec<bool>,
  requested: Vec<bool>,
}

fn shape_strategy() -> impl Strategy<Value = Shape> {
  (1usize..10).prop_flat_map(|n| {
    let links = (0..n)
      .map(|j| prop::collection::vec(0u8..4, j))
      .collect::<Vec<_>>();
    (
      links,
      prop::collection::vec(prop::bool::weighted(0.2), n),
      prop::collection::vec(prop::bool::weighted(0.3), n),
    )
      .prop_map(|(links, finals, requested)| Shape {
        links,
        finals,
        requested,
      })
  })
}

fn item(i: usize) -> SimpleItem<u32> {
  SimpleItem::named(format!("X{i}"))
}

fn steps_for(shape: &Shape, back_edge: Option<(usize, usize)>) -> Vec<Step> {
  (0..shape.links.len())
    .map(|j| {
      let mut builder = Step::builder(format!("s{j}")).produces(&item(j));
      for (i, link) in shape.links[j].iter().enumerate() {
        builder = match link {
          1 => builder.consumes(&item(i)),
          2 => builder.consumes_optional(&item(i)),
          3 => builder.after(&item(i)),
          _ => builder,
        };
      }
      if let Some((from, to)) = back_edge {
        if j == to {
          builder = builder.consumes(&item(from));
        }
      }
      if shape.finals[j] {
        builder = builder.final_step();
      }
      builder.build(|_| Ok(()))
    })
    .collect()
}

fn build(steps: Vec<Step>) -> Result<BuildGraph, GraphError> {
  let mut registry = StepRegistry::new();
  for step in steps {
    registry.register(step).unwrap();
  }
  BuildGraph::build(&registry.finalize())
}

fn requested_keys(shape: &Shape) -> Vec<ItemKey> {
  shape
    .requested
    .iter()
    .enumerate()
    .filter(|(_, r)| **r)
    .map(|(i, _)| item(i).key().clone())
    .collect()
}

proptest! {
  /// Pruning an already pruned graph changes nothing.
  #[test]
  fn pruning_is_idempotent(shape in shape_strategy()) {
    let graph = build(steps_for(&shape, None)).unwrap();
    let requested = requested_keys(&shape);

    let once = graph.prune(&requested).unwrap();
    let twice = once.prune(&requested).unwrap();

    prop_assert_eq!(once.step_ids(), twice.step_ids());
    prop_assert_eq!(once.edges(), twice.edges());
  }

  /// Every data dependency of a retained step is retained, as are final steps
  /// and producers of requested items.
  #[test]
  fn pruning_keeps_data_closure(shape in shape_strategy()) {
    let graph = build(steps_for(&shape, None)).unwrap();
    let requested = requested_keys(&shape);
    let pruned = graph.prune(&requested).unwrap();

    for step in pruned.steps() {
      for upstream in graph.dependencies(step.id()) {
        let edge = graph.edge(upstream, step.id()).unwrap();
        if edge.kind != EdgeKind::OrderingOnly {
          prop_assert!(pruned.contains(upstream));
          prop_assert_eq!(pruned.edge(upstream, step.id()), Some(edge));
        }
      }
    }
    for (i, is_final) in shape.finals.iter().enumerate() {
      if *is_final {
        let final_id = format!("s{i}");
        prop_assert!(pruned.contains(&final_id));
      }
    }
    for key in &requested {
      for producer in graph.producers(key) {
        prop_assert!(pruned.contains(producer));
      }
    }
  }

  /// Pruned graphs respect the original topological constraints.
  #[test]
  fn pruned_order_respects_edges(shape in shape_strategy()) {
    let graph = build(steps_for(&shape, None)).unwrap();
    let pruned = graph.prune(&requested_keys(&shape)).unwrap();
    let order = pruned.topological_order();

    prop_assert_eq!(order.len(), pruned.len());
    for edge in pruned.edges() {
      let from = order.iter().position(|id| *id == edge.from).unwrap();
      let to = order.iter().position(|id| *id == edge.to).unwrap();
      prop_assert!(from < to);
    }
  }

  /// Any back edge closing a path makes graph construction fail, whatever is
  /// requested later.
  #[test]
  fn back_edges_are_always_detected(shape in shape_strategy(), a in 0usize..10, b in 0usize..10) {
    let n = shape.links.len();
    let (low, high) = (a.min(b) % n, a.max(b) % n);
    prop_assume!(low < high);

    // Force a forward path low -> high, then close it with high -> low.
    let mut shape = shape;
    shape.links[high][low] = 1;
    let err = build(steps_for(&shape, Some((high, low)))).unwrap_err();

    match err {
      GraphError::CycleDetected { path } => {
        prop_assert!(path.len() >= 3);
        prop_assert_eq!(path.first(), path.last());
      }
      other => prop_assert!(false, "unexpected error: {}", other),
    }
  }
}
