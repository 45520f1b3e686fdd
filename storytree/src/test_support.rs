//! Test-only helpers: node builders and scripted collaborators.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::core::error::TreeError;
use crate::engine::Conversation;
use crate::io::oracle::Oracle;
use crate::io::persist::PersistenceAdapter;
use crate::io::prompt::Exchange;
use crate::tree::{Node, NodeId, NodeKind};

/// Create a deterministic task node with no children.
pub fn task(id: NodeId, description: &str) -> Node {
    Node {
        id,
        kind: NodeKind::Task,
        description: description.to_string(),
        completed: false,
        completed_at: None,
        perspective: None,
        jump_target: None,
        active_branch: None,
        children: Vec::new(),
    }
}

/// Create a deterministic choice node with no children or branch.
pub fn choice(id: NodeId, description: &str) -> Node {
    Node {
        kind: NodeKind::Choice,
        ..task(id, description)
    }
}

/// Mark a node completed without a rollback stamp.
pub fn done(mut node: Node) -> Node {
    node.completed = true;
    node
}

/// Mark a node completed at the given conversation length.
pub fn done_at(mut node: Node, completed_at: u64) -> Node {
    node.completed = true;
    node.completed_at = Some(completed_at);
    node
}

/// Attach children to a node.
pub fn with_children(mut node: Node, children: Vec<Node>) -> Node {
    node.children = children;
    node
}

/// In-memory persistence adapter; clones share the same blob map.
#[derive(Debug, Clone, Default)]
pub struct MemoryAdapter {
    blobs: Arc<Mutex<HashMap<String, Value>>>,
}

impl MemoryAdapter {
    pub fn saved(&self, key: &str) -> Option<Value> {
        self.blobs.lock().expect("adapter lock").get(key).cloned()
    }
}

impl PersistenceAdapter for MemoryAdapter {
    fn load(&self, key: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.saved(key))
    }

    fn save(&mut self, key: &str, blob: &Value) -> anyhow::Result<()> {
        self.blobs
            .lock()
            .expect("adapter lock")
            .insert(key.to_string(), blob.clone());
        Ok(())
    }
}

/// Oracle returning predetermined replies and recording received prompts.
pub struct ScriptedOracle {
    replies: Mutex<Vec<Result<String, TreeError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedOracle {
    pub fn replies<const N: usize>(replies: [&str; N]) -> Self {
        Self {
            replies: Mutex::new(
                replies
                    .iter()
                    .rev()
                    .map(|reply| Ok((*reply).to_string()))
                    .collect(),
            ),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            replies: Mutex::new(vec![Err(TreeError::OracleFailure(message.to_string()))]),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("oracle lock").clone()
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn classify(&self, prompt: &str) -> Result<String, TreeError> {
        self.prompts
            .lock()
            .expect("oracle lock")
            .push(prompt.to_string());
        self.replies
            .lock()
            .expect("oracle lock")
            .pop()
            .unwrap_or_else(|| Err(TreeError::OracleFailure("script exhausted".to_string())))
    }
}

/// Conversation with fixed message contents.
#[derive(Debug, Clone, Default)]
pub struct FixedConversation {
    messages: Vec<String>,
}

impl FixedConversation {
    pub fn of(messages: &[&str]) -> Self {
        Self {
            messages: messages.iter().map(|message| (*message).to_string()).collect(),
        }
    }
}

impl Conversation for FixedConversation {
    fn message_count(&self) -> u64 {
        self.messages.len() as u64
    }

    fn last_exchange(&self) -> Option<Exchange> {
        if self.messages.len() < 2 {
            return None;
        }
        Some(Exchange {
            user: self.messages[self.messages.len() - 2].clone(),
            assistant: self.messages[self.messages.len() - 1].clone(),
        })
    }
}
