//! Owning store for the loaded forest: id allocation and mutation operations.
//!
//! The store is pure in-memory state. Persistence and view notification are
//! the engine's concern; every method here either succeeds atomically or
//! returns a [`TreeError`] with no partial mutation applied.

use crate::core::error::TreeError;
use crate::core::outline::OutlineItem;
use crate::tree::{Forest, Node, NodeId, NodeKind};

/// Outcome of completing a task, reporting the side effect on its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToggleOutcome {
    /// Parent Choice that was resolved by first-completed-child-wins, if any.
    pub resolved_choice: Option<NodeId>,
}

/// Owns the forest for the currently loaded context and allocates node ids.
#[derive(Debug, Default)]
pub struct TreeStore {
    forest: Forest,
    next_id: NodeId,
}

impl TreeStore {
    pub fn new() -> Self {
        Self {
            forest: Forest::default(),
            next_id: 1,
        }
    }

    /// Rebuild a store from persisted parts, re-seeding the id allocator
    /// above both the recorded counter and the highest id actually present.
    pub fn from_parts(forest: Forest, next_id: NodeId) -> Self {
        let next_id = next_id.max(forest.max_id() + 1).max(1);
        Self { forest, next_id }
    }

    pub fn forest(&self) -> &Forest {
        &self.forest
    }

    pub fn next_id(&self) -> NodeId {
        self.next_id
    }

    /// Drop the current forest, e.g. on context switch.
    pub fn reset(&mut self) {
        self.forest = Forest::default();
        self.next_id = 1;
    }

    pub(crate) fn forest_mut(&mut self) -> &mut Forest {
        &mut self.forest
    }

    fn allocate_id(&mut self) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Allocate a fresh node. Choice nodes start with no active branch.
    pub fn create_node(
        &mut self,
        description: impl Into<String>,
        kind: NodeKind,
        perspective: Option<String>,
    ) -> Node {
        Node {
            id: self.allocate_id(),
            kind,
            description: description.into(),
            completed: false,
            completed_at: None,
            perspective,
            jump_target: None,
            active_branch: None,
            children: Vec::new(),
        }
    }

    /// Append a node as a new root, preserving declaration order.
    pub fn add_root(&mut self, node: Node) {
        self.forest.roots.push(node);
    }

    /// Append a node under `parent_id`, preserving sibling order.
    pub fn add_child(&mut self, parent_id: NodeId, node: Node) -> Result<(), TreeError> {
        let parent = self
            .forest
            .find_mut(parent_id)
            .ok_or(TreeError::NotFound(parent_id))?;
        parent.children.push(node);
        Ok(())
    }

    /// Remove a node and its owned subtree from wherever it resides.
    ///
    /// References held elsewhere (`jump_target`, `active_branch`) are left
    /// dangling, not repaired.
    pub fn delete_node(&mut self, id: NodeId) -> Result<Node, TreeError> {
        if let Some(index) = self.forest.roots.iter().position(|root| root.id == id) {
            return Ok(self.forest.roots.remove(index));
        }
        let parent = self
            .forest
            .find_parent_mut(id)
            .ok_or(TreeError::NotFound(id))?;
        let index = parent
            .children
            .iter()
            .position(|child| child.id == id)
            .expect("parent lookup implies child membership");
        Ok(parent.children.remove(index))
    }

    pub fn set_description(&mut self, id: NodeId, text: impl Into<String>) -> Result<(), TreeError> {
        let node = self.forest.find_mut(id).ok_or(TreeError::NotFound(id))?;
        node.description = text.into();
        Ok(())
    }

    /// Set or clear a node's jump target.
    ///
    /// A non-null target must exist somewhere in the forest.
    pub fn set_jump_target(
        &mut self,
        id: NodeId,
        target: Option<NodeId>,
    ) -> Result<(), TreeError> {
        if let Some(target_id) = target {
            if self.forest.find(target_id).is_none() {
                return Err(TreeError::InvalidReference(target_id));
            }
        }
        let node = self.forest.find_mut(id).ok_or(TreeError::NotFound(id))?;
        node.jump_target = target;
        Ok(())
    }

    /// Toggle completion on a Task node.
    ///
    /// Choice ids are rejected as `NotFound`: choices are resolved through
    /// their children, never checked directly. Completing a task whose parent
    /// is a Choice with no active branch yet resolves that Choice to this
    /// child (first-completed-child-wins) without stamping the Choice.
    pub fn toggle_task_completion(
        &mut self,
        id: NodeId,
        completed: bool,
        completed_at: Option<u64>,
    ) -> Result<ToggleOutcome, TreeError> {
        match self.forest.find(id) {
            Some(node) if !node.is_choice() => {}
            _ => return Err(TreeError::NotFound(id)),
        }

        let node = self.forest.find_mut(id).expect("checked above");
        node.completed = completed;
        node.completed_at = if completed { completed_at } else { None };

        let mut outcome = ToggleOutcome {
            resolved_choice: None,
        };
        if completed {
            if let Some(parent) = self.forest.find_parent_mut(id) {
                if parent.is_choice() && parent.active_branch.is_none() {
                    parent.active_branch = Some(id);
                    parent.completed = true;
                    outcome.resolved_choice = Some(parent.id);
                }
            }
        }
        Ok(outcome)
    }

    /// Resolve a Choice to one of its direct children, completing both.
    ///
    /// The chosen child is stamped with `completed_at`; the Choice itself is
    /// marked completed without a stamp (its state is derived from the branch
    /// and re-checked by rollback).
    pub fn resolve_choice(
        &mut self,
        choice_id: NodeId,
        branch_id: NodeId,
        completed_at: Option<u64>,
    ) -> Result<(), TreeError> {
        match self.forest.find(choice_id) {
            Some(node) if node.is_choice() => {}
            _ => return Err(TreeError::NotFound(choice_id)),
        }
        let choice = self.forest.find_mut(choice_id).expect("checked above");
        let branch = choice
            .children
            .iter_mut()
            .find(|child| child.id == branch_id)
            .ok_or(TreeError::InvalidReference(branch_id))?;
        branch.completed = true;
        branch.completed_at = completed_at;
        choice.active_branch = Some(branch_id);
        choice.completed = true;
        Ok(())
    }

    /// Attach parsed outline items as nodes, allocating fresh ids.
    ///
    /// Items land under `parent_id` when given, otherwise as new roots.
    /// Returns the number of nodes created.
    pub fn ingest_outline(
        &mut self,
        items: &[OutlineItem],
        parent_id: Option<NodeId>,
        perspective: Option<&str>,
    ) -> Result<usize, TreeError> {
        if let Some(parent_id) = parent_id {
            if self.forest.find(parent_id).is_none() {
                return Err(TreeError::NotFound(parent_id));
            }
        }
        let mut created = 0;
        let nodes: Vec<Node> = items
            .iter()
            .map(|item| self.build_outline_node(item, perspective, &mut created))
            .collect();
        match parent_id {
            Some(parent_id) => {
                let parent = self.forest.find_mut(parent_id).expect("checked above");
                parent.children.extend(nodes);
            }
            None => self.forest.roots.extend(nodes),
        }
        Ok(created)
    }

    /// Hydrate an import payload and append its trees as new roots.
    ///
    /// Fails with `MalformedImport` before any mutation; on success returns
    /// the hydrated `main_objective`, if the payload carried one, and the
    /// number of roots appended.
    pub fn import_payload(
        &mut self,
        payload: &serde_json::Value,
    ) -> Result<(Option<String>, usize), TreeError> {
        let existing: std::collections::HashSet<NodeId> =
            self.forest.iter().map(|node| node.id).collect();
        let mut next = self.next_id;
        let hydrated = crate::core::export::hydrate_payload(payload, &existing, &mut || {
            let id = next;
            next += 1;
            id
        })?;
        self.next_id = next;
        let appended = hydrated.roots.len();
        self.forest.roots.extend(hydrated.roots);
        self.next_id = self.next_id.max(self.forest.max_id() + 1);
        Ok((hydrated.main_objective, appended))
    }

    fn build_outline_node(
        &mut self,
        item: &OutlineItem,
        perspective: Option<&str>,
        created: &mut usize,
    ) -> Node {
        *created += 1;
        let mut node = self.create_node(
            item.description.clone(),
            item.kind,
            perspective.map(str::to_string),
        );
        node.children = item
            .children
            .iter()
            .map(|child| self.build_outline_node(child, perspective, created))
            .collect();
        node
    }
}
