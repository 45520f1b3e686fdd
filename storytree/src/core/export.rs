//! Shareable export projection and tolerant import hydration.
//!
//! Export strips runtime-only state (`completed_at`) so a shared tree can be
//! replayed against any conversation. Import accepts the same shape back,
//! assigning fresh ids where entries lack one or collide with the loaded
//! forest, and rewriting intra-payload references through the remap.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::TreeError;
use crate::tree::{Forest, Node, NodeId, NodeKind};

/// One exported node, recursively. `completed_at` is intentionally absent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub description: String,
    pub completed: bool,
    pub perspective: Option<String>,
    pub active_branch: Option<NodeId>,
    pub jump_target: Option<NodeId>,
    pub children: Vec<ExportNode>,
}

/// The full export payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportPayload {
    pub main_objective: Option<String>,
    pub tasks: Vec<ExportNode>,
}

/// Project the forest into its export shape.
pub fn export_forest(forest: &Forest, main_objective: Option<&str>) -> ExportPayload {
    ExportPayload {
        main_objective: main_objective
            .map(str::trim)
            .filter(|objective| !objective.is_empty())
            .map(str::to_string),
        tasks: forest.roots.iter().map(project).collect(),
    }
}

fn project(node: &Node) -> ExportNode {
    ExportNode {
        id: node.id,
        kind: node.kind,
        description: node.description.clone(),
        completed: node.completed,
        perspective: node.perspective.clone(),
        active_branch: node.active_branch,
        jump_target: node.jump_target,
        children: node.children.iter().map(project).collect(),
    }
}

/// Result of hydrating an import payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HydratedImport {
    pub main_objective: Option<String>,
    pub roots: Vec<Node>,
}

/// Hydrate an import payload into nodes ready to append as new roots.
///
/// The payload must be an object whose `tasks` field is an array of node
/// objects; anything else fails with [`TreeError::MalformedImport`] before
/// any id is allocated, so a failed import never disturbs the allocator or
/// the forest. Individual fields hydrate tolerantly with defaults.
pub fn hydrate_payload(
    payload: &Value,
    existing_ids: &HashSet<NodeId>,
    alloc: &mut impl FnMut() -> NodeId,
) -> Result<HydratedImport, TreeError> {
    let object = payload
        .as_object()
        .ok_or_else(|| TreeError::MalformedImport("payload must be an object".to_string()))?;
    let tasks = object
        .get("tasks")
        .and_then(Value::as_array)
        .ok_or_else(|| TreeError::MalformedImport("`tasks` must be an array".to_string()))?;

    // Parse pass: fully validate before touching the allocator.
    let raw: Vec<RawNode> = tasks.iter().map(parse_raw).collect::<Result<_, _>>()?;

    // Assignment pass: settle final ids, remembering remapped ones.
    let mut used = existing_ids.clone();
    let mut remap = HashMap::new();
    let mut roots: Vec<Node> = raw
        .into_iter()
        .map(|node| assign_ids(node, &mut used, &mut remap, alloc))
        .collect();
    for root in &mut roots {
        rewrite_references(root, &remap);
    }

    let main_objective = object
        .get("main_objective")
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok(HydratedImport {
        main_objective,
        roots,
    })
}

struct RawNode {
    declared_id: Option<NodeId>,
    kind: NodeKind,
    description: String,
    completed: bool,
    perspective: Option<String>,
    active_branch: Option<NodeId>,
    jump_target: Option<NodeId>,
    children: Vec<RawNode>,
}

fn parse_raw(value: &Value) -> Result<RawNode, TreeError> {
    let object = value
        .as_object()
        .ok_or_else(|| TreeError::MalformedImport("task entries must be objects".to_string()))?;

    let kind = match object.get("kind").and_then(Value::as_str) {
        Some("choice") => NodeKind::Choice,
        _ => NodeKind::Task,
    };
    let children = match object.get("children") {
        Some(Value::Array(children)) => children.iter().map(parse_raw).collect::<Result<_, _>>()?,
        _ => Vec::new(),
    };
    Ok(RawNode {
        declared_id: object.get("id").and_then(Value::as_u64),
        kind,
        description: object
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        completed: object
            .get("completed")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        perspective: object
            .get("perspective")
            .and_then(Value::as_str)
            .filter(|perspective| !perspective.is_empty())
            .map(str::to_string),
        active_branch: object.get("active_branch").and_then(Value::as_u64),
        jump_target: object.get("jump_target").and_then(Value::as_u64),
        children,
    })
}

fn assign_ids(
    raw: RawNode,
    used: &mut HashSet<NodeId>,
    remap: &mut HashMap<NodeId, NodeId>,
    alloc: &mut impl FnMut() -> NodeId,
) -> Node {
    let id = match raw.declared_id {
        Some(declared) if used.insert(declared) => declared,
        declared => {
            let mut fresh = alloc();
            while !used.insert(fresh) {
                fresh = alloc();
            }
            if let Some(old) = declared {
                remap.insert(old, fresh);
            }
            fresh
        }
    };
    Node {
        id,
        kind: raw.kind,
        description: raw.description,
        completed: raw.completed,
        completed_at: None,
        perspective: raw.perspective,
        jump_target: raw.jump_target,
        active_branch: raw.active_branch,
        children: raw
            .children
            .into_iter()
            .map(|child| assign_ids(child, used, remap, alloc))
            .collect(),
    }
}

fn rewrite_references(node: &mut Node, remap: &HashMap<NodeId, NodeId>) {
    if let Some(target) = node.jump_target {
        if let Some(mapped) = remap.get(&target) {
            node.jump_target = Some(*mapped);
        }
    }
    if let Some(branch) = node.active_branch {
        if let Some(mapped) = remap.get(&branch) {
            node.active_branch = Some(*mapped);
        }
    }
    for child in &mut node.children {
        rewrite_references(child, remap);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use serde_json::json;

    use super::{export_forest, hydrate_payload};
    use crate::core::error::TreeError;
    use crate::test_support::{choice, done_at, task, with_children};
    use crate::tree::Forest;

    fn alloc_from(start: u64) -> impl FnMut() -> u64 {
        let mut next = start;
        move || {
            let id = next;
            next += 1;
            id
        }
    }

    #[test]
    fn export_omits_completion_stamps() {
        let forest = Forest::new(vec![done_at(task(1, "a"), 4)]);
        let payload = export_forest(&forest, Some("win"));
        let value = serde_json::to_value(&payload).expect("serialize");

        assert!(value["tasks"][0].get("completed_at").is_none());
        assert_eq!(value["tasks"][0]["completed"], true);
        assert_eq!(value["main_objective"], "win");
    }

    #[test]
    fn export_then_import_reproduces_an_isomorphic_tree() {
        let mut fork = choice(2, "fork");
        fork.active_branch = Some(3);
        let mut root = task(1, "a");
        root.jump_target = Some(4);
        let forest = Forest::new(vec![
            with_children(root, vec![with_children(fork, vec![task(3, "left")])]),
            task(4, "target"),
        ]);

        let payload = serde_json::to_value(export_forest(&forest, None)).expect("serialize");
        // Import into a forest that already occupies ids 1..=4.
        let existing: HashSet<u64> = [1, 2, 3, 4].into();
        let hydrated =
            hydrate_payload(&payload, &existing, &mut alloc_from(5)).expect("hydrate");

        let new_root = &hydrated.roots[0];
        let new_fork = &new_root.children[0];
        let new_target = &hydrated.roots[1];
        assert_eq!(new_root.description, "a");
        assert_eq!(new_root.jump_target, Some(new_target.id));
        assert_eq!(new_fork.active_branch, Some(new_fork.children[0].id));
        assert!(!existing.contains(&new_root.id));
    }

    #[test]
    fn entries_without_ids_get_fresh_ones() {
        let payload = json!({ "tasks": [{ "description": "a" }, { "description": "b" }] });
        let hydrated =
            hydrate_payload(&payload, &HashSet::new(), &mut alloc_from(1)).expect("hydrate");

        assert_eq!(hydrated.roots.len(), 2);
        assert_ne!(hydrated.roots[0].id, hydrated.roots[1].id);
    }

    #[test]
    fn non_array_tasks_field_is_malformed() {
        let payload = json!({ "tasks": "not an array" });
        let err = hydrate_payload(&payload, &HashSet::new(), &mut alloc_from(1)).unwrap_err();
        assert!(matches!(err, TreeError::MalformedImport(_)));
    }

    #[test]
    fn non_object_entry_is_malformed() {
        let payload = json!({ "tasks": [42] });
        let err = hydrate_payload(&payload, &HashSet::new(), &mut alloc_from(1)).unwrap_err();
        assert!(matches!(err, TreeError::MalformedImport(_)));
    }

    #[test]
    fn main_objective_rides_along() {
        let payload = json!({ "main_objective": "escape", "tasks": [] });
        let hydrated =
            hydrate_payload(&payload, &HashSet::new(), &mut alloc_from(1)).expect("hydrate");
        assert_eq!(hydrated.main_objective.as_deref(), Some("escape"));
    }
}
