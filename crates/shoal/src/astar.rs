use std::{
  cmp::{Ordering, Reverse},
  collections::{BinaryHeap, HashMap},
  hash::Hash,
};

/// A generic A* problem.
pub(crate) trait AStarProblem {
  /// The action that allows moving between states.
  type ActionType: Clone;
  /// The state that agents try to optimize.
  type StateType: Hash + Eq + Clone;

  /// Creates the initial state for the problem.
  fn initial_state(&self) -> Self::StateType;

  /// Creates all possible states that can be reached by a single action from
  /// `state`. The result stores the "cost" of the action, the action taken, and
  /// the resulting state.
  fn successors(
    &self,
    state: &Self::StateType,
  ) -> Vec<(f32, Self::ActionType, Self::StateType)>;

  /// Computes an estimate of the cost to reach a goal state from `state`. Must
  /// be non-negative and goal states must have an estimate of 0.
  fn heuristic(&self, state: &Self::StateType) -> f32;

  /// Determines whether `state` is a goal state.
  fn is_goal_state(&self, state: &Self::StateType) -> bool;
}

/// A node which represents a single path (by following the previous nodes).
struct Node<ProblemType: AStarProblem> {
  /// The cost of all actions taken by this path.
  cost: f32,
  /// The value of the [`AStarProblem::heuristic`] for this state.
  heuristic: f32,
  /// The state that the path results in.
  state: ProblemType::StateType,
  /// The previous node in the path. This is stored as the index of the node
  /// and the action used to get to this state from the previous state. Only
  /// `None` for the initial state.
  previous_node: Option<(usize, ProblemType::ActionType)>,
}

/// A reference to a node.
struct NodeRef {
  /// The cost of the path of the node. This is a convenience for accessing the
  /// node's cost directly.
  cost: f32,
  /// The cost plus the heuristic of the node.
  estimate: f32,
  /// The index of the node.
  index: usize,
}

impl PartialEq for NodeRef {
  fn eq(&self, other: &Self) -> bool {
    self.cmp(other) == Ordering::Equal
  }
}

impl Eq for NodeRef {}

impl PartialOrd for NodeRef {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for NodeRef {
  fn cmp(&self, other: &Self) -> Ordering {
    // Among equal estimates, prefer the node that got further.
    self
      .estimate
      .total_cmp(&other.estimate)
      .then_with(|| other.cost.total_cmp(&self.cost))
  }
}

/// Determines the list of actions taken to reach the node at `node_index`.
fn recover_path_from_node<ProblemType: AStarProblem>(
  node_index: usize,
  nodes: Vec<Node<ProblemType>>,
) -> Vec<ProblemType::ActionType> {
  let mut path = Vec::new();
  let mut node_index = node_index;
  loop {
    let node = &nodes[node_index];
    match &node.previous_node {
      None => break,
      Some((next_index, action)) => {
        path.push(action.clone());
        node_index = *next_index;
      }
    }
  }

  path.reverse();
  path
}

/// Stats about the pathfinding process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PathStats {
  /// The number of nodes that were explored. This can exceed the number of
  /// states if there are faster paths than the heuristic "predicts".
  pub(crate) explored_nodes: u32,
  /// Whether the search stopped because it ran out of nodes.
  pub(crate) out_of_nodes: bool,
}

/// The result of pathfinding.
#[derive(Debug)]
pub(crate) struct PathResult<ActionType> {
  /// Stats about the pathfinding process.
  pub(crate) stats: PathStats,
  /// The found path.
  pub(crate) path: Vec<ActionType>,
  /// Whether `path` leads to the explored state closest to a goal rather than
  /// a goal itself.
  pub(crate) is_partial: bool,
}

/// Finds a path in `problem` to get from the initial state to a goal state,
/// creating at most `max_nodes` nodes. If no goal state can be reached (or the
/// nodes run out first), returns the path to the explored state with the
/// lowest heuristic.
pub(crate) fn find_path<ProblemType: AStarProblem>(
  problem: &ProblemType,
  max_nodes: usize,
) -> PathResult<ProblemType::ActionType> {
  let mut stats = PathStats { explored_nodes: 0, out_of_nodes: false };

  let mut best_estimates = HashMap::new();

  let mut all_nodes = Vec::<Node<ProblemType>>::new();
  let mut open_nodes = BinaryHeap::new();

  let try_add_node =
    |node: Node<ProblemType>,
     all_nodes: &mut Vec<Node<ProblemType>>,
     open_nodes: &mut BinaryHeap<Reverse<NodeRef>>,
     best_estimates: &mut HashMap<ProblemType::StateType, f32>,
     stats: &mut PathStats| {
      let estimate = node.cost + node.heuristic;
      let best_estimate =
        best_estimates.entry(node.state.clone()).or_insert(f32::INFINITY);
      if *best_estimate <= estimate {
        return;
      }
      if all_nodes.len() >= max_nodes.max(1) {
        stats.out_of_nodes = true;
        return;
      }
      *best_estimate = estimate;
      open_nodes.push(Reverse(NodeRef {
        cost: node.cost,
        estimate,
        index: all_nodes.len(),
      }));
      all_nodes.push(node);
    };

  let initial_state = problem.initial_state();
  let initial_node = Node {
    cost: 0.0,
    heuristic: problem.heuristic(&initial_state),
    state: initial_state,
    previous_node: None,
  };
  try_add_node(
    initial_node,
    &mut all_nodes,
    &mut open_nodes,
    &mut best_estimates,
    &mut stats,
  );

  // The explored node closest to a goal, used for partial paths.
  let mut closest_node = 0;

  while let Some(Reverse(current_node_ref)) = open_nodes.pop() {
    let current_node = &all_nodes[current_node_ref.index];
    // If this node is not the best path to the state, skip it. This state must
    // have already been explored ahead of this node.
    if best_estimates
      .get(&current_node.state)
      .is_some_and(|&best| best < current_node_ref.estimate)
    {
      continue;
    }
    stats.explored_nodes += 1;

    if problem.is_goal_state(&current_node.state) {
      return PathResult {
        stats,
        path: recover_path_from_node(current_node_ref.index, all_nodes),
        is_partial: false,
      };
    }
    if current_node.heuristic < all_nodes[closest_node].heuristic {
      closest_node = current_node_ref.index;
    }

    let current_cost = current_node.cost;
    for (action_cost, action, state) in problem.successors(&current_node.state)
    {
      let new_node = Node {
        cost: current_cost + action_cost,
        heuristic: problem.heuristic(&state),
        state,
        previous_node: Some((current_node_ref.index, action)),
      };

      try_add_node(
        new_node,
        &mut all_nodes,
        &mut open_nodes,
        &mut best_estimates,
        &mut stats,
      );
    }
  }

  PathResult {
    stats,
    path: recover_path_from_node(closest_node, all_nodes),
    is_partial: true,
  }
}

#[cfg(test)]
#[path = "astar_test.rs"]
mod test;
