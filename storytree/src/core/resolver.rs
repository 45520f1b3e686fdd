//! Active path resolution over the forest.
//!
//! Pure depth-first search with per-call cycle protection. The visited set
//! lives only for the duration of one call, so a cycle rolled back between
//! calls can be re-explored, while within a call every node is entered at
//! most once and resolution stays linear in the node count.

use std::collections::HashSet;

use crate::tree::{Forest, Node, NodeId};

/// Compute the active path: the chain of nodes walked from the roots to the
/// current frontier, ending at the first incomplete node found.
///
/// Empty when every story line is fully resolved or unreachable behind
/// cycles. The last element, when present, is always an incomplete node.
pub fn active_path(forest: &Forest) -> Vec<NodeId> {
    let mut path = Vec::new();
    let mut visited = HashSet::new();
    if search(forest, &forest.roots, &mut path, &mut visited) {
        path
    } else {
        Vec::new()
    }
}

/// The frontier node currently in progress, if any.
pub fn frontier(forest: &Forest) -> Option<&Node> {
    let path = active_path(forest);
    forest.find(*path.last()?)
}

/// Try each candidate in declared order; true once a frontier was reached.
fn search(
    forest: &Forest,
    candidates: &[Node],
    path: &mut Vec<NodeId>,
    visited: &mut HashSet<NodeId>,
) -> bool {
    for node in candidates {
        if descend(forest, node, path, visited) {
            return true;
        }
    }
    false
}

fn descend(
    forest: &Forest,
    node: &Node,
    path: &mut Vec<NodeId>,
    visited: &mut HashSet<NodeId>,
) -> bool {
    // Cycle: this path is terminal, backtrack. The id stays in the visited
    // set so the subtree is not re-entered through another route this call.
    if !visited.insert(node.id) {
        return false;
    }

    if !node.completed {
        path.push(node.id);
        return true;
    }

    path.push(node.id);

    // Jump redirection has priority over everything else.
    if let Some(target_id) = node.jump_target {
        if let Some(target) = forest.find(target_id) {
            if descend(forest, target, path, visited) {
                return true;
            }
            path.pop();
            return false;
        }
        // Dangling jump targets are treated as absent, never repaired.
    }

    // A resolved Choice continues at its taken branch only; an unresolved
    // one falls through to its children in declared order like a Task.
    if node.is_choice() {
        if let Some(branch_id) = node.active_branch {
            if let Some(branch) = node.children.iter().find(|child| child.id == branch_id) {
                if descend(forest, branch, path, visited) {
                    return true;
                }
            }
            path.pop();
            return false;
        }
    }

    if search(forest, &node.children, path, visited) {
        return true;
    }

    path.pop();
    false
}

#[cfg(test)]
mod tests {
    use super::active_path;
    use crate::test_support::{choice, done, task, with_children};
    use crate::tree::Forest;

    #[test]
    fn incomplete_root_is_the_frontier() {
        let forest = Forest::new(vec![with_children(task(1, "a"), vec![task(2, "b")])]);
        assert_eq!(active_path(&forest), vec![1]);
    }

    #[test]
    fn completed_node_descends_into_children_in_order() {
        let forest = Forest::new(vec![with_children(
            done(task(1, "a")),
            vec![done(task(2, "b")), task(3, "c")],
        )]);
        assert_eq!(active_path(&forest), vec![1, 3]);
    }

    #[test]
    fn exhausted_sibling_backtracks_to_the_next() {
        let forest = Forest::new(vec![
            with_children(done(task(1, "a")), vec![done(task(2, "b"))]),
            task(3, "c"),
        ]);
        assert_eq!(active_path(&forest), vec![3]);
    }

    #[test]
    fn jump_takes_priority_over_children() {
        let mut a = done(task(1, "a"));
        a.jump_target = Some(3);
        let forest = Forest::new(vec![with_children(a, vec![task(2, "own child")]), task(3, "c")]);

        assert_eq!(active_path(&forest), vec![1, 3]);
    }

    #[test]
    fn dangling_jump_is_treated_as_absent() {
        let mut a = done(task(1, "a"));
        a.jump_target = Some(99);
        let forest = Forest::new(vec![with_children(a, vec![task(2, "b")])]);

        assert_eq!(active_path(&forest), vec![1, 2]);
    }

    #[test]
    fn resolved_choice_follows_only_its_branch() {
        let mut fork = done(choice(1, "fork"));
        fork.active_branch = Some(3);
        let forest = Forest::new(vec![with_children(
            fork,
            vec![task(2, "left"), done(task(3, "right"))],
        )]);

        // The taken branch is complete and has no children: the whole
        // subtree is exhausted, the untaken sibling is never offered.
        assert!(active_path(&forest).is_empty());
    }

    #[test]
    fn unresolved_completed_choice_falls_through_to_children() {
        let forest = Forest::new(vec![with_children(
            done(choice(1, "fork")),
            vec![task(2, "left"), task(3, "right")],
        )]);
        assert_eq!(active_path(&forest), vec![1, 2]);
    }

    #[test]
    fn jump_cycle_terminates_with_empty_path() {
        let mut a = done(task(1, "a"));
        a.jump_target = Some(2);
        let mut b = done(task(2, "b"));
        b.jump_target = Some(1);
        let forest = Forest::new(vec![a, b]);

        assert!(active_path(&forest).is_empty());
    }

    #[test]
    fn cycle_on_one_root_still_explores_later_roots() {
        let mut a = done(task(1, "a"));
        a.jump_target = Some(1);
        let forest = Forest::new(vec![a, task(2, "b")]);

        assert_eq!(active_path(&forest), vec![2]);
    }

    #[test]
    fn resolution_visits_each_node_at_most_once() {
        // Two completed roots both jump into the same exhausted subtree;
        // the shared target is entered once, then skipped as visited.
        let mut a = done(task(1, "a"));
        a.jump_target = Some(3);
        let mut b = done(task(2, "b"));
        b.jump_target = Some(3);
        let shared = with_children(done(task(3, "shared")), vec![done(task(4, "leaf"))]);
        let forest = Forest::new(vec![a, b, shared, task(5, "open")]);

        assert_eq!(active_path(&forest), vec![5]);
    }
}
