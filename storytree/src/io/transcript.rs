//! Transcript files as a conversation source for CLI classification runs.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::engine::Conversation;
use crate::io::prompt::Exchange;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone)]
struct Message {
    role: Role,
    content: String,
}

/// A conversation parsed from a plain-text transcript.
///
/// A line starting with `user:` or `assistant:` opens a new message; any
/// other line continues the current one. Text before the first role prefix
/// is ignored.
#[derive(Debug, Clone, Default)]
pub struct TranscriptConversation {
    messages: Vec<Message>,
}

impl TranscriptConversation {
    pub fn parse(text: &str) -> Self {
        let mut messages: Vec<Message> = Vec::new();
        for line in text.lines() {
            let opened = [("user:", Role::User), ("assistant:", Role::Assistant)]
                .into_iter()
                .find_map(|(prefix, role)| {
                    line.strip_prefix(prefix).map(|rest| Message {
                        role,
                        content: rest.trim().to_string(),
                    })
                });
            match opened {
                Some(message) => messages.push(message),
                None => {
                    if let Some(current) = messages.last_mut() {
                        current.content.push('\n');
                        current.content.push_str(line);
                    }
                }
            }
        }
        Self { messages }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("read transcript {}", path.display()))?;
        Ok(Self::parse(&contents))
    }
}

impl Conversation for TranscriptConversation {
    fn message_count(&self) -> u64 {
        self.messages.len() as u64
    }

    fn last_exchange(&self) -> Option<Exchange> {
        if self.messages.len() < 2 {
            return None;
        }
        let last = &self.messages[self.messages.len() - 1];
        let previous = &self.messages[self.messages.len() - 2];
        Some(Exchange {
            user: previous.content.clone(),
            assistant: last.content.clone(),
        })
    }
}
