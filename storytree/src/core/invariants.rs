//! Semantic invariants not expressible via JSON Schema.

use std::collections::HashSet;

use crate::tree::{Forest, Node, NodeId};

/// Check forest invariants:
/// - No duplicate ids
/// - `active_branch` only on Choice nodes
/// - `active_branch`, when its target still exists, names a direct child
/// - A completed Choice's taken branch is itself completed
///
/// Dangling weak references (targets deleted from the forest) are tolerated
/// by design and not reported here; rollback clears the Choice case.
pub fn validate_invariants(forest: &Forest) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    let all_ids: HashSet<NodeId> = forest.iter().map(|node| node.id).collect();
    for root in &forest.roots {
        validate_node(root, &all_ids, &mut seen, &mut errors, &root.id.to_string());
    }
    errors
}

fn validate_node(
    node: &Node,
    all_ids: &HashSet<NodeId>,
    seen: &mut HashSet<NodeId>,
    errors: &mut Vec<String>,
    path: &str,
) {
    if !seen.insert(node.id) {
        errors.push(format!("duplicate id '{}' at {}", node.id, path));
    }

    if let Some(branch_id) = node.active_branch {
        if !node.is_choice() {
            errors.push(format!("{}: active_branch set on a task node", path));
        } else if let Some(branch) = node.children.iter().find(|child| child.id == branch_id) {
            if node.completed && !branch.completed {
                errors.push(format!(
                    "{}: completed choice's branch {} is not completed",
                    path, branch_id
                ));
            }
        } else if all_ids.contains(&branch_id) {
            errors.push(format!(
                "{}: active_branch {} is not a direct child",
                path, branch_id
            ));
        }
    }

    for child in &node.children {
        let child_path = format!("{}/{}", path, child.id);
        validate_node(child, all_ids, seen, errors, &child_path);
    }
}

#[cfg(test)]
mod tests {
    use super::validate_invariants;
    use crate::test_support::{choice, done, task, with_children};
    use crate::tree::Forest;

    #[test]
    fn clean_forest_has_no_errors() {
        let forest = Forest::new(vec![with_children(task(1, "a"), vec![task(2, "b")])]);
        assert!(validate_invariants(&forest).is_empty());
    }

    #[test]
    fn duplicate_ids_are_reported() {
        let forest = Forest::new(vec![task(1, "a"), task(1, "b")]);
        let errors = validate_invariants(&forest);
        assert!(errors.iter().any(|err| err.contains("duplicate id")));
    }

    #[test]
    fn active_branch_must_be_a_direct_child() {
        let mut fork = choice(1, "fork");
        fork.active_branch = Some(3);
        let forest = Forest::new(vec![with_children(fork, vec![task(2, "left")]), task(3, "c")]);

        let errors = validate_invariants(&forest);
        assert!(errors.iter().any(|err| err.contains("not a direct child")));
    }

    #[test]
    fn dangling_active_branch_is_tolerated() {
        let mut fork = choice(1, "fork");
        fork.active_branch = Some(99);
        let forest = Forest::new(vec![with_children(fork, vec![task(2, "left")])]);

        assert!(validate_invariants(&forest).is_empty());
    }

    #[test]
    fn completed_choice_with_incomplete_branch_is_reported() {
        let mut fork = done(choice(1, "fork"));
        fork.active_branch = Some(2);
        let forest = Forest::new(vec![with_children(fork, vec![task(2, "left")])]);

        let errors = validate_invariants(&forest);
        assert!(errors.iter().any(|err| err.contains("not completed")));
    }
}
