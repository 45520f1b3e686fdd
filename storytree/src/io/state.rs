//! Persisted per-context story state: settings plus the forest.
//!
//! The whole context state serializes to a single JSON blob handed to the
//! persistence adapter; the adapter treats it as opaque.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tree::{Node, NodeId};

/// Where the frontier status line is injected into the host conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InjectionPosition {
    #[default]
    BeforeChat,
    AfterChat,
}

/// Per-context settings, persisted alongside the forest.
///
/// These mirror the host UI's controls; the core carries them but only
/// interprets `auto_complete` and `injection_position` itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorySettings {
    /// Run the auto-completion classifier after each assistant message.
    pub auto_complete: bool,
    /// Overall objective fed to breakdown generation.
    pub main_objective: String,
    /// Instruction text for breakdown generation.
    pub breakdown_prompt: String,
    /// Perspective annotation copied onto newly created nodes. The literal
    /// value `custom` defers to `custom_perspective`.
    pub perspective: String,
    pub custom_perspective: String,
    pub injection_position: InjectionPosition,
}

pub const DEFAULT_PERSPECTIVE: &str = "Narrate from the user's third-person perspective.";

pub const DEFAULT_BREAKDOWN_PROMPT: &str = "Break the objective into a series of concrete, \
actionable steps. Use indentation (two leading spaces per level) to express subtasks and \
branches. Put each node on its own line starting with \"-\". Prefix choice points with \
\"[choice]\". Example:\n- Main task\n  - [choice] Which road?\n    - Take the left road\n    \
- Take the right road";

impl Default for StorySettings {
    fn default() -> Self {
        Self {
            auto_complete: false,
            main_objective: String::new(),
            breakdown_prompt: DEFAULT_BREAKDOWN_PROMPT.to_string(),
            perspective: DEFAULT_PERSPECTIVE.to_string(),
            custom_perspective: String::new(),
            injection_position: InjectionPosition::default(),
        }
    }
}

impl StorySettings {
    /// The perspective text to annotate new nodes with, resolving the
    /// `custom` sentinel. Empty text means no annotation.
    pub fn effective_perspective(&self) -> Option<String> {
        let text = if self.perspective == "custom" {
            self.custom_perspective.trim()
        } else {
            self.perspective.trim()
        };
        (!text.is_empty()).then(|| text.to_string())
    }
}

/// The blob stored per context key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoredState {
    pub settings: StorySettings,
    pub next_id: NodeId,
    pub tasks: Vec<Node>,
}

impl Default for StoredState {
    fn default() -> Self {
        Self {
            settings: StorySettings::default(),
            next_id: 1,
            tasks: Vec::new(),
        }
    }
}

impl StoredState {
    pub fn to_blob(&self) -> Result<Value> {
        serde_json::to_value(self).context("serialize story state")
    }

    pub fn from_blob(blob: &Value) -> Result<Self> {
        serde_json::from_value(blob.clone()).context("parse story state blob")
    }
}

#[cfg(test)]
mod tests {
    use super::{StoredState, StorySettings};

    #[test]
    fn stored_state_round_trips_through_the_blob() {
        let mut state = StoredState::default();
        state.settings.auto_complete = true;
        state.settings.main_objective = "escape the castle".to_string();
        state.next_id = 7;

        let blob = state.to_blob().expect("to blob");
        let loaded = StoredState::from_blob(&blob).expect("from blob");
        assert_eq!(loaded, state);
    }

    #[test]
    fn missing_fields_hydrate_with_defaults() {
        let blob = serde_json::json!({ "tasks": [] });
        let loaded = StoredState::from_blob(&blob).expect("from blob");
        assert_eq!(loaded.next_id, 1);
        assert!(!loaded.settings.auto_complete);
    }

    #[test]
    fn custom_perspective_sentinel_resolves() {
        let mut settings = StorySettings {
            perspective: "custom".to_string(),
            custom_perspective: "  through the fox's eyes ".to_string(),
            ..StorySettings::default()
        };
        assert_eq!(
            settings.effective_perspective().as_deref(),
            Some("through the fox's eyes")
        );

        settings.custom_perspective = String::new();
        assert_eq!(settings.effective_perspective(), None);
    }
}
