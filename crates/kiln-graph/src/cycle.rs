//! Cycle detection.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
  /// On the current DFS path.
  Gray,
  /// Fully explored.
  Black,
}

/// Find a cycle with an iterative depth-first search.
///
/// Roots are visited in `order`. Returns the first cycle met as the list of step
/// ids along it, starting and ending with the same step.
pub(crate) fn find_cycle(
  order: &[&str],
  adjacency: &HashMap<String, Vec<String>>,
) -> Option<Vec<String>> {
  let mut marks: HashMap<&str, Mark> = HashMap::new();

  for &root in order {
    if marks.contains_key(root) {
      continue;
    }

    // (node, index of the next child to visit)
    let mut stack: Vec<(&str, usize)> = vec![(root, 0)];
    marks.insert(root, Mark::Gray);

    while let Some(top) = stack.last_mut() {
      let node = top.0;
      let next = adjacency.get(node).and_then(|children| children.get(top.1));
      top.1 += 1;

      match next {
        Some(child) => match marks.get(child.as_str()) {
          Some(Mark::Gray) => {
            let start = stack
              .iter()
              .position(|(id, _)| *id == child.as_str())
              .unwrap_or(0);
            let mut path: Vec<String> = stack[start..]
              .iter()
              .map(|(id, _)| id.to_string())
              .collect();
            path.push(child.clone());
            return Some(path);
          }
          Some(Mark::Black) => {}
          None => {
            marks.insert(child.as_str(), Mark::Gray);
            stack.push((child.as_str(), 0));
          }
        },
        None => {
          marks.insert(node, Mark::Black);
          stack.pop();
        }
      }
    }
  }

  None
}
