//! Story tree node model and forest lookups.

use serde::{Deserialize, Serialize};

/// Opaque node identifier, unique within a forest, stable for the node's lifetime.
pub type NodeId = u64;

/// Node variant: a plain story beat or a branching decision point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Task,
    Choice,
}

/// One entry in the story tree.
///
/// `children` are exclusively owned and keep their declared order.
/// `jump_target` and `active_branch` are weak references by id: they are
/// resolved against the owning forest at read time and may dangle after a
/// deletion (dangling references are tolerated, never silently repaired).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub description: String,
    #[serde(default)]
    pub completed: bool,
    /// Conversation length at the moment of completion; the sole input to rollback.
    #[serde(default)]
    pub completed_at: Option<u64>,
    #[serde(default)]
    pub perspective: Option<String>,
    /// Redirect: once this node is completed, traversal continues at the target.
    #[serde(default)]
    pub jump_target: Option<NodeId>,
    /// The one child of a Choice considered taken. Meaningless on Task nodes.
    #[serde(default)]
    pub active_branch: Option<NodeId>,
    #[serde(default)]
    pub children: Vec<Node>,
}

impl Node {
    pub fn is_choice(&self) -> bool {
        self.kind == NodeKind::Choice
    }
}

/// Ordered sequence of root nodes, exclusively owned by the tree store for
/// the currently loaded context.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Forest {
    pub roots: Vec<Node>,
}

impl Forest {
    pub fn new(roots: Vec<Node>) -> Self {
        Self { roots }
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Find a node anywhere in the forest by id.
    pub fn find(&self, id: NodeId) -> Option<&Node> {
        self.roots.iter().find_map(|root| find_in(root, id))
    }

    pub fn find_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.roots.iter_mut().find_map(|root| find_in_mut(root, id))
    }

    /// Find the parent of `child_id`, or `None` for roots and unknown ids.
    pub fn find_parent(&self, child_id: NodeId) -> Option<&Node> {
        self.iter()
            .find(|node| node.children.iter().any(|child| child.id == child_id))
    }

    pub fn find_parent_mut(&mut self, child_id: NodeId) -> Option<&mut Node> {
        let parent_id = self.find_parent(child_id)?.id;
        self.find_mut(parent_id)
    }

    /// Depth-first preorder walk over every node in the forest.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        let mut stack: Vec<&Node> = self.roots.iter().rev().collect();
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            stack.extend(node.children.iter().rev());
            Some(node)
        })
    }

    pub fn node_count(&self) -> usize {
        self.iter().count()
    }

    /// Highest id currently present, or 0 for an empty forest.
    pub fn max_id(&self) -> NodeId {
        self.iter().map(|node| node.id).max().unwrap_or(0)
    }
}

fn find_in(node: &Node, id: NodeId) -> Option<&Node> {
    if node.id == id {
        return Some(node);
    }
    node.children.iter().find_map(|child| find_in(child, id))
}

fn find_in_mut(node: &mut Node, id: NodeId) -> Option<&mut Node> {
    if node.id == id {
        return Some(node);
    }
    node.children
        .iter_mut()
        .find_map(|child| find_in_mut(child, id))
}

#[cfg(test)]
mod tests {
    use crate::test_support::{task, with_children};

    #[test]
    fn find_reaches_nested_nodes() {
        let forest = crate::tree::Forest::new(vec![with_children(
            task(1, "a"),
            vec![with_children(task(2, "b"), vec![task(3, "c")])],
        )]);

        assert_eq!(forest.find(3).map(|n| n.description.as_str()), Some("c"));
        assert!(forest.find(9).is_none());
    }

    #[test]
    fn find_parent_returns_none_for_roots() {
        let forest =
            crate::tree::Forest::new(vec![with_children(task(1, "a"), vec![task(2, "b")])]);

        assert!(forest.find_parent(1).is_none());
        assert_eq!(forest.find_parent(2).map(|n| n.id), Some(1));
    }

    #[test]
    fn iter_walks_preorder() {
        let forest = crate::tree::Forest::new(vec![
            with_children(task(1, "a"), vec![task(2, "b"), task(3, "c")]),
            task(4, "d"),
        ]);

        let ids: Vec<u64> = forest.iter().map(|node| node.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(forest.max_id(), 4);
    }
}
