//! Orchestration tying the tree store to its external collaborators.
//!
//! The engine owns the store and settings for one loaded context, routes
//! every mutation through the persistence adapter, and bumps a revision
//! counter that view collaborators watch to invalidate cached rendering.
//! Rollback and classification never interleave: both take `&mut self`, and
//! the classifier re-checks the frontier after its oracle suspension point
//! before applying any mutation.

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, warn};

use crate::core::classify::{is_affirmative, parse_branch_reply};
use crate::core::error::TreeError;
use crate::core::export::{ExportPayload, export_forest};
use crate::core::outline::parse_outline;
use crate::core::resolver::{active_path, frontier};
use crate::core::rollback::{RollbackSummary, roll_back};
use crate::core::store::TreeStore;
use crate::io::oracle::Oracle;
use crate::io::persist::PersistenceAdapter;
use crate::io::prompt::{Exchange, PromptEngine, injection_text};
use crate::io::state::{InjectionPosition, StoredState, StorySettings};
use crate::tree::{Forest, Node, NodeId, NodeKind};

/// Read access to the external conversation this tree is tied to.
pub trait Conversation {
    fn message_count(&self) -> u64;
    /// The last user/assistant pair, once at least two messages exist.
    fn last_exchange(&self) -> Option<Exchange>;
}

/// Why an auto-completion check did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AutoCompleteDisabled,
    ClassificationInFlight,
    TooFewMessages,
    ForestResolved,
    ChoiceHasNoBranches,
}

/// Result of one auto-completion pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Preconditions not met; the oracle was never called.
    Skipped(SkipReason),
    /// The oracle replied but nothing qualified as completed.
    NoDecision,
    /// The oracle round trip failed; the tree is untouched.
    OracleFailed,
    /// The frontier moved while the oracle was in flight; reply discarded.
    Stale,
    TaskCompleted(NodeId),
    BranchResolved { choice: NodeId, branch: NodeId },
}

/// Frontier state captured before the oracle call, re-validated after it.
#[derive(Debug, Clone)]
struct FrontierSnapshot {
    id: NodeId,
    kind: NodeKind,
    description: String,
    branch_ids: Vec<NodeId>,
    branch_descriptions: Vec<String>,
}

/// One loaded context: forest, settings, and their persistence.
pub struct Engine<P: PersistenceAdapter> {
    store: TreeStore,
    settings: StorySettings,
    context_key: Option<String>,
    adapter: P,
    prompts: PromptEngine,
    revision: u64,
    classification_in_flight: bool,
}

impl<P: PersistenceAdapter> Engine<P> {
    pub fn new(adapter: P) -> Self {
        Self {
            store: TreeStore::new(),
            settings: StorySettings::default(),
            context_key: None,
            adapter,
            prompts: PromptEngine::new(),
            revision: 0,
            classification_in_flight: false,
        }
    }

    // --- context lifecycle ---

    /// Switch to the forest persisted under `key` (or an empty one), then
    /// reconcile it against the current conversation length when known.
    pub fn load_context(&mut self, key: &str, message_count: Option<u64>) -> Result<()> {
        let state = match self.adapter.load(key)? {
            Some(blob) => StoredState::from_blob(&blob)
                .with_context(|| format!("load story state for context '{key}'"))?,
            None => StoredState::default(),
        };
        self.store = TreeStore::from_parts(Forest::new(state.tasks), state.next_id);
        self.settings = state.settings;
        self.context_key = Some(key.to_string());
        self.revision += 1;
        debug!(key, nodes = self.store.forest().node_count(), "context loaded");

        if let Some(message_count) = message_count {
            let summary = roll_back(self.store.forest_mut(), message_count);
            if !summary.is_empty() {
                info!(reverted = summary.reverted.len(), "rolled back stale completions on load");
                self.touch()?;
            }
        }
        Ok(())
    }

    /// Drop the loaded forest and settings without persisting anything.
    pub fn reset(&mut self) {
        self.store.reset();
        self.settings = StorySettings::default();
        self.context_key = None;
        self.revision += 1;
    }

    fn touch(&mut self) -> Result<()> {
        self.revision += 1;
        let Some(key) = self.context_key.clone() else {
            debug!("no context loaded; skipping save");
            return Ok(());
        };
        let blob = StoredState {
            settings: self.settings.clone(),
            next_id: self.store.next_id(),
            tasks: self.store.forest().roots.clone(),
        }
        .to_blob()?;
        self.adapter.save(&key, &blob)
    }

    // --- read access ---

    pub fn forest(&self) -> &Forest {
        self.store.forest()
    }

    pub fn settings(&self) -> &StorySettings {
        &self.settings
    }

    /// Monotonic counter bumped on every visible change; view collaborators
    /// compare it to invalidate cached rendering state.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn active_path(&self) -> Vec<NodeId> {
        active_path(self.store.forest())
    }

    pub fn frontier_node(&self) -> Option<&Node> {
        frontier(self.store.forest())
    }

    /// Status line for the host to inject into its prompt, if a frontier
    /// node exists.
    pub fn injection(&self) -> Option<(InjectionPosition, String)> {
        let node = self.frontier_node()?;
        Some((self.settings.injection_position, injection_text(node)))
    }

    pub fn export(&self) -> ExportPayload {
        export_forest(self.store.forest(), Some(&self.settings.main_objective))
    }

    // --- mutations (each persists and bumps the revision) ---

    pub fn set_settings(&mut self, settings: StorySettings) -> Result<()> {
        self.settings = settings;
        self.touch()
    }

    pub fn add_root(&mut self, description: &str, kind: NodeKind) -> Result<NodeId> {
        let perspective = self.settings.effective_perspective();
        let node = self.store.create_node(description, kind, perspective);
        let id = node.id;
        self.store.add_root(node);
        self.touch()?;
        Ok(id)
    }

    pub fn add_child(
        &mut self,
        parent_id: NodeId,
        description: &str,
        kind: NodeKind,
    ) -> Result<NodeId> {
        let perspective = self.settings.effective_perspective();
        let node = self.store.create_node(description, kind, perspective);
        let id = node.id;
        self.store.add_child(parent_id, node)?;
        self.touch()?;
        Ok(id)
    }

    pub fn delete_node(&mut self, id: NodeId) -> Result<()> {
        self.store.delete_node(id)?;
        self.touch()
    }

    pub fn set_description(&mut self, id: NodeId, text: &str) -> Result<()> {
        self.store.set_description(id, text)?;
        self.touch()
    }

    pub fn set_jump_target(&mut self, id: NodeId, target: Option<NodeId>) -> Result<()> {
        self.store.set_jump_target(id, target)?;
        self.touch()
    }

    /// Toggle a task's completion. `completed_at` is the conversation length
    /// at the moment of completion when the caller knows it; without a stamp
    /// the completion is permanent with respect to rollback.
    pub fn toggle_task_completion(
        &mut self,
        id: NodeId,
        completed: bool,
        completed_at: Option<u64>,
    ) -> Result<()> {
        let outcome = self.store.toggle_task_completion(id, completed, completed_at)?;
        if let Some(choice_id) = outcome.resolved_choice {
            debug!(choice = choice_id, branch = id, "choice resolved by first completed child");
        }
        self.touch()
    }

    pub fn resolve_choice(
        &mut self,
        choice_id: NodeId,
        branch_id: NodeId,
        completed_at: Option<u64>,
    ) -> Result<()> {
        self.store.resolve_choice(choice_id, branch_id, completed_at)?;
        self.touch()
    }

    /// Parse outline text and attach the nodes it describes.
    pub fn ingest_outline(&mut self, text: &str, parent_id: Option<NodeId>) -> Result<usize> {
        let items = parse_outline(text);
        if items.is_empty() {
            return Ok(0);
        }
        let perspective = self.settings.effective_perspective();
        let created = self
            .store
            .ingest_outline(&items, parent_id, perspective.as_deref())?;
        self.touch()?;
        Ok(created)
    }

    /// Append an import payload's trees as new roots.
    pub fn import(&mut self, payload: &serde_json::Value) -> Result<usize> {
        let (main_objective, appended) = self.store.import_payload(payload)?;
        if let Some(objective) = main_objective {
            self.settings.main_objective = objective;
        }
        self.touch()?;
        Ok(appended)
    }

    // --- rollback ---

    /// Reconcile completion state after the conversation shrank.
    pub fn handle_messages_removed(&mut self, message_count: u64) -> Result<RollbackSummary> {
        let summary = roll_back(self.store.forest_mut(), message_count);
        if !summary.is_empty() {
            info!(
                reverted = summary.reverted.len(),
                unresolved_choices = summary.unresolved_choices.len(),
                "conversation shrank; reverted node state"
            );
            self.touch()?;
        }
        Ok(summary)
    }

    // --- auto-completion ---

    /// Ask the oracle whether the frontier node was satisfied by the latest
    /// exchange, and advance the tree on an affirmative or in-range reply.
    ///
    /// All-or-nothing: nothing is mutated before the oracle responds
    /// successfully, oracle failures are reported as a non-fatal outcome,
    /// and a reply that arrives after the frontier moved is discarded.
    /// Triggers that land while a check is already awaiting the oracle are
    /// dropped, not queued.
    pub async fn auto_completion_check(
        &mut self,
        conversation: &dyn Conversation,
        oracle: &dyn Oracle,
    ) -> Result<CheckOutcome> {
        if !self.settings.auto_complete {
            return Ok(CheckOutcome::Skipped(SkipReason::AutoCompleteDisabled));
        }
        if self.classification_in_flight {
            debug!("classification already in flight; dropping trigger");
            return Ok(CheckOutcome::Skipped(SkipReason::ClassificationInFlight));
        }
        let message_count = conversation.message_count();
        if message_count < 2 {
            return Ok(CheckOutcome::Skipped(SkipReason::TooFewMessages));
        }
        let Some(exchange) = conversation.last_exchange() else {
            return Ok(CheckOutcome::Skipped(SkipReason::TooFewMessages));
        };
        let Some(snapshot) = self.frontier_snapshot() else {
            return Ok(CheckOutcome::Skipped(SkipReason::ForestResolved));
        };

        let prompt = match snapshot.kind {
            NodeKind::Task => self
                .prompts
                .render_completion_check(&exchange, &snapshot.description)?,
            NodeKind::Choice => {
                if snapshot.branch_ids.is_empty() {
                    return Ok(CheckOutcome::Skipped(SkipReason::ChoiceHasNoBranches));
                }
                self.prompts.render_branch_check(
                    &exchange,
                    &snapshot.description,
                    &snapshot.branch_descriptions,
                )?
            }
        };

        self.classification_in_flight = true;
        let reply = oracle.classify(&prompt).await;
        self.classification_in_flight = false;

        let reply = match reply {
            Ok(reply) => reply,
            Err(err) => {
                warn!(%err, node = snapshot.id, "auto-completion check failed");
                return Ok(CheckOutcome::OracleFailed);
            }
        };
        self.apply_classification(&snapshot, &reply, message_count)
    }

    fn frontier_snapshot(&self) -> Option<FrontierSnapshot> {
        let node = self.frontier_node()?;
        Some(FrontierSnapshot {
            id: node.id,
            kind: node.kind,
            description: node.description.clone(),
            branch_ids: node.children.iter().map(|child| child.id).collect(),
            branch_descriptions: node
                .children
                .iter()
                .map(|child| child.description.clone())
                .collect(),
        })
    }

    /// Apply an oracle reply to the tree, re-validating the frontier first.
    fn apply_classification(
        &mut self,
        snapshot: &FrontierSnapshot,
        reply: &str,
        message_count: u64,
    ) -> Result<CheckOutcome> {
        if frontier(self.store.forest()).map(|node| node.id) != Some(snapshot.id) {
            debug!(node = snapshot.id, "frontier moved during oracle call; discarding reply");
            return Ok(CheckOutcome::Stale);
        }
        let stamp = Some(message_count - 1);

        match snapshot.kind {
            NodeKind::Task => {
                if !is_affirmative(reply) {
                    return Ok(CheckOutcome::NoDecision);
                }
                self.store.toggle_task_completion(snapshot.id, true, stamp)?;
                info!(node = snapshot.id, "task auto-completed");
                self.touch()?;
                Ok(CheckOutcome::TaskCompleted(snapshot.id))
            }
            NodeKind::Choice => {
                let Some(index) = parse_branch_reply(reply, snapshot.branch_ids.len()) else {
                    return Ok(CheckOutcome::NoDecision);
                };
                let branch_id = snapshot.branch_ids[index];
                let branch_still_present = self
                    .store
                    .forest()
                    .find(snapshot.id)
                    .is_some_and(|node| node.children.iter().any(|child| child.id == branch_id));
                if !branch_still_present {
                    debug!(node = snapshot.id, branch = branch_id, "branch vanished during oracle call");
                    return Ok(CheckOutcome::Stale);
                }
                self.store.resolve_choice(snapshot.id, branch_id, stamp)?;
                info!(node = snapshot.id, branch = branch_id, "choice branch auto-resolved");
                self.touch()?;
                Ok(CheckOutcome::BranchResolved {
                    choice: snapshot.id,
                    branch: branch_id,
                })
            }
        }
    }

    // --- breakdown generation ---

    /// Ask the oracle to break the main objective into an outline and attach
    /// the parsed nodes as new roots. Oracle failure leaves the forest
    /// untouched.
    pub async fn generate_breakdown(&mut self, oracle: &dyn Oracle) -> Result<usize> {
        let objective = self.settings.main_objective.trim().to_string();
        let instruction = self.settings.breakdown_prompt.trim().to_string();
        if objective.is_empty() || instruction.is_empty() {
            return Err(anyhow!(
                "both the main objective and the breakdown instruction must be set"
            ));
        }
        let prompt = self.prompts.render_breakdown(&objective, &instruction)?;
        let reply = oracle
            .classify(&prompt)
            .await
            .map_err(|err| match err {
                TreeError::OracleFailure(message) => anyhow!("breakdown generation: {message}"),
                other => anyhow::Error::from(other),
            })?;
        let created = self.ingest_outline(&reply, None)?;
        if created == 0 {
            info!("no new nodes found in the breakdown reply");
        }
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::{CheckOutcome, Engine, SkipReason};
    use crate::test_support::{FixedConversation, MemoryAdapter, ScriptedOracle};
    use crate::tree::NodeKind;

    fn engine() -> Engine<MemoryAdapter> {
        let mut engine = Engine::new(MemoryAdapter::default());
        engine.load_context("test", None).expect("load context");
        let mut settings = engine.settings().clone();
        settings.auto_complete = true;
        engine.set_settings(settings).expect("settings");
        engine
    }

    #[tokio::test]
    async fn affirmative_reply_completes_the_frontier_task() {
        let mut engine = engine();
        let id = engine.add_root("open the gate", NodeKind::Task).expect("add");
        let oracle = ScriptedOracle::replies(["Yes, clearly."]);
        let conversation = FixedConversation::of(&["I open the gate", "The gate creaks open."]);

        let outcome = engine
            .auto_completion_check(&conversation, &oracle)
            .await
            .expect("check");

        assert_eq!(outcome, CheckOutcome::TaskCompleted(id));
        let node = engine.forest().find(id).unwrap();
        assert!(node.completed);
        // Stamped with message count minus one.
        assert_eq!(node.completed_at, Some(1));
    }

    #[tokio::test]
    async fn negative_reply_is_a_no_op() {
        let mut engine = engine();
        let id = engine.add_root("open the gate", NodeKind::Task).expect("add");
        let oracle = ScriptedOracle::replies(["no"]);
        let conversation = FixedConversation::of(&["hello", "hi"]);

        let outcome = engine
            .auto_completion_check(&conversation, &oracle)
            .await
            .expect("check");

        assert_eq!(outcome, CheckOutcome::NoDecision);
        assert!(!engine.forest().find(id).unwrap().completed);
    }

    #[tokio::test]
    async fn choice_frontier_resolves_the_picked_branch() {
        let mut engine = engine();
        let fork = engine.add_root("which road?", NodeKind::Choice).expect("add");
        let left = engine.add_child(fork, "left road", NodeKind::Task).expect("add");
        let right = engine.add_child(fork, "right road", NodeKind::Task).expect("add");
        let oracle = ScriptedOracle::replies(["2"]);
        let conversation = FixedConversation::of(&["I go right", "You take the right road."]);

        let outcome = engine
            .auto_completion_check(&conversation, &oracle)
            .await
            .expect("check");

        assert_eq!(
            outcome,
            CheckOutcome::BranchResolved {
                choice: fork,
                branch: right
            }
        );
        let fork_node = engine.forest().find(fork).unwrap();
        assert!(fork_node.completed);
        assert_eq!(fork_node.active_branch, Some(right));
        // The chosen branch is stamped; the choice itself is not.
        assert_eq!(fork_node.completed_at, None);
        assert_eq!(engine.forest().find(right).unwrap().completed_at, Some(1));
        assert!(!engine.forest().find(left).unwrap().completed);
    }

    #[tokio::test]
    async fn zero_reply_leaves_the_choice_open() {
        let mut engine = engine();
        let fork = engine.add_root("which road?", NodeKind::Choice).expect("add");
        engine.add_child(fork, "left road", NodeKind::Task).expect("add");
        let oracle = ScriptedOracle::replies(["0"]);
        let conversation = FixedConversation::of(&["hm", "undecided"]);

        let outcome = engine
            .auto_completion_check(&conversation, &oracle)
            .await
            .expect("check");

        assert_eq!(outcome, CheckOutcome::NoDecision);
        assert!(!engine.forest().find(fork).unwrap().completed);
    }

    #[tokio::test]
    async fn oracle_failure_leaves_the_tree_untouched() {
        let mut engine = engine();
        let id = engine.add_root("open the gate", NodeKind::Task).expect("add");
        let before = engine.forest().clone();
        let oracle = ScriptedOracle::failing("backend unreachable");
        let conversation = FixedConversation::of(&["a", "b"]);

        let outcome = engine
            .auto_completion_check(&conversation, &oracle)
            .await
            .expect("check");

        assert_eq!(outcome, CheckOutcome::OracleFailed);
        assert_eq!(engine.forest(), &before);
        assert!(!engine.forest().find(id).unwrap().completed);
    }

    #[tokio::test]
    async fn check_skips_until_preconditions_hold() {
        let mut engine = engine();

        // Empty forest: nothing to classify.
        let oracle = ScriptedOracle::replies(["yes"]);
        let conversation = FixedConversation::of(&["a", "b"]);
        let outcome = engine
            .auto_completion_check(&conversation, &oracle)
            .await
            .expect("check");
        assert_eq!(outcome, CheckOutcome::Skipped(SkipReason::ForestResolved));

        // Too few messages.
        engine.add_root("task", NodeKind::Task).expect("add");
        let conversation = FixedConversation::of(&["only one"]);
        let outcome = engine
            .auto_completion_check(&conversation, &oracle)
            .await
            .expect("check");
        assert_eq!(outcome, CheckOutcome::Skipped(SkipReason::TooFewMessages));

        // Auto-complete disabled.
        let mut settings = engine.settings().clone();
        settings.auto_complete = false;
        engine.set_settings(settings).expect("settings");
        let conversation = FixedConversation::of(&["a", "b"]);
        let outcome = engine
            .auto_completion_check(&conversation, &oracle)
            .await
            .expect("check");
        assert_eq!(outcome, CheckOutcome::Skipped(SkipReason::AutoCompleteDisabled));
    }

    #[tokio::test]
    async fn in_flight_triggers_are_dropped() {
        let mut engine = engine();
        engine.add_root("task", NodeKind::Task).expect("add");
        engine.classification_in_flight = true;

        let oracle = ScriptedOracle::replies(["yes"]);
        let conversation = FixedConversation::of(&["a", "b"]);
        let outcome = engine
            .auto_completion_check(&conversation, &oracle)
            .await
            .expect("check");

        assert_eq!(
            outcome,
            CheckOutcome::Skipped(SkipReason::ClassificationInFlight)
        );
    }

    #[tokio::test]
    async fn late_reply_for_a_moved_frontier_is_discarded() {
        let mut engine = engine();
        let first = engine.add_root("first", NodeKind::Task).expect("add");
        engine.add_root("second", NodeKind::Task).expect("add");

        let snapshot = engine.frontier_snapshot().expect("snapshot");
        assert_eq!(snapshot.id, first);
        // The frontier moves while the oracle call would be in flight.
        engine
            .toggle_task_completion(first, true, None)
            .expect("toggle");

        let outcome = engine
            .apply_classification(&snapshot, "yes", 4)
            .expect("apply");

        assert_eq!(outcome, CheckOutcome::Stale);
        assert_eq!(engine.forest().find(first).unwrap().completed_at, None);
    }

    #[tokio::test]
    async fn breakdown_reply_is_parsed_and_attached_as_roots() {
        let mut engine = engine();
        let mut settings = engine.settings().clone();
        settings.main_objective = "escape the castle".to_string();
        engine.set_settings(settings).expect("settings");

        let oracle = ScriptedOracle::replies([
            "Here is a plan:\n- find the key\n- [choice] pick an exit\n  - the gate\n  - the wall\n",
        ]);
        let created = engine.generate_breakdown(&oracle).await.expect("breakdown");

        assert_eq!(created, 4);
        assert_eq!(engine.forest().roots.len(), 2);
        assert_eq!(engine.forest().roots[1].kind, NodeKind::Choice);
        let prompts = oracle.prompts();
        assert!(prompts[0].contains("escape the castle"));
    }

    #[tokio::test]
    async fn failed_breakdown_leaves_the_forest_unchanged() {
        let mut engine = engine();
        let mut settings = engine.settings().clone();
        settings.main_objective = "escape".to_string();
        engine.set_settings(settings).expect("settings");
        let before = engine.forest().clone();

        let oracle = ScriptedOracle::failing("offline");
        let err = engine.generate_breakdown(&oracle).await.unwrap_err();

        assert!(err.to_string().contains("breakdown generation"));
        assert_eq!(engine.forest(), &before);
    }

    #[test]
    fn mutations_persist_and_bump_the_revision() {
        let mut engine = engine();
        let revision = engine.revision();
        engine.add_root("task", NodeKind::Task).expect("add");
        assert!(engine.revision() > revision);

        // A fresh engine over the same adapter sees the saved forest.
        let adapter = engine.adapter.clone();
        let mut reloaded = Engine::new(adapter);
        reloaded.load_context("test", None).expect("load");
        assert_eq!(reloaded.forest().roots.len(), 1);
        assert_eq!(reloaded.forest().roots[0].description, "task");
    }

    #[test]
    fn injection_describes_the_frontier() {
        let mut engine = engine();
        assert!(engine.injection().is_none());

        engine.add_root("find the key", NodeKind::Task).expect("add");
        let (_, text) = engine.injection().expect("injection");
        assert!(text.contains("find the key"));
    }

    #[test]
    fn rollback_persists_only_when_something_changed() {
        let mut engine = engine();
        let id = engine.add_root("task", NodeKind::Task).expect("add");
        engine
            .toggle_task_completion(id, true, Some(6))
            .expect("toggle");
        let revision = engine.revision();

        let summary = engine.handle_messages_removed(5).expect("rollback");
        assert_eq!(summary.reverted, vec![id]);
        assert!(engine.revision() > revision);

        let revision = engine.revision();
        let summary = engine.handle_messages_removed(5).expect("rollback");
        assert!(summary.is_empty());
        assert_eq!(engine.revision(), revision);
    }
}
