//! Completion rollback against a shrinking conversation.
//!
//! When the external conversation loses messages, nodes completed at or past
//! the new length are reverted, and choices whose taken branch no longer
//! holds are un-resolved. The pass is post-order so children settle before
//! the parents that reference them, making cascading invalidation visible in
//! a single pass. Running it again with no intervening conversation change
//! is a no-op.

use crate::tree::{Forest, Node, NodeId};

/// Node ids touched by a rollback pass, sorted for stable reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackSummary {
    /// Nodes whose completion was reverted.
    pub reverted: Vec<NodeId>,
    /// Choices whose active branch was cleared.
    pub unresolved_choices: Vec<NodeId>,
}

impl RollbackSummary {
    pub fn is_empty(&self) -> bool {
        self.reverted.is_empty() && self.unresolved_choices.is_empty()
    }
}

/// Revert completion state that the conversation no longer supports.
///
/// A node is reverted iff it is completed and its stamp is `>=` the current
/// message count; a node completed strictly before the truncation point is
/// untouched. A Choice with an active branch is un-resolved when the
/// referenced child is missing or no longer completed.
pub fn roll_back(forest: &mut Forest, message_count: u64) -> RollbackSummary {
    let mut summary = RollbackSummary::default();
    for root in &mut forest.roots {
        roll_back_node(root, message_count, &mut summary);
    }
    summary.reverted.sort_unstable();
    summary.unresolved_choices.sort_unstable();
    summary
}

fn roll_back_node(node: &mut Node, message_count: u64, summary: &mut RollbackSummary) {
    for child in &mut node.children {
        roll_back_node(child, message_count, summary);
    }

    if node.completed && node.completed_at.is_some_and(|at| at >= message_count) {
        node.completed = false;
        node.completed_at = None;
        summary.reverted.push(node.id);
    }

    if node.is_choice() {
        if let Some(branch_id) = node.active_branch {
            let branch_holds = node
                .children
                .iter()
                .any(|child| child.id == branch_id && child.completed);
            if !branch_holds {
                node.active_branch = None;
                if node.completed {
                    node.completed = false;
                    summary.reverted.push(node.id);
                }
                summary.unresolved_choices.push(node.id);
            }
        }
    }
}
