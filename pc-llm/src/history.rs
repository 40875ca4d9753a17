//! Ordered conversation log and its JSON snapshot format.
//!
//! The system prompt is never stored here; adapters synthesize it from the
//! session config when a request is built.

use crate::error::{ChatError, Result};
use crate::types::{Citation, Message, Role};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationHistory {
    messages: Vec<Message>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub(crate) fn push_user(&mut self, content: &str) {
        self.messages.push(Message::user(content));
    }

    pub(crate) fn push_assistant(&mut self, content: &str, citations: Vec<Citation>) {
        self.messages.push(Message::assistant(content, citations));
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Pretty-printed JSON array of messages.
    pub fn to_snapshot(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.messages)?)
    }

    pub fn from_snapshot(raw: &str) -> Result<Self> {
        let messages: Vec<Message> = serde_json::from_str(raw)?;
        Self::try_from(messages)
    }

    pub async fn write_to(&self, path: &Path) -> Result<()> {
        let snapshot = self.to_snapshot()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ChatError::Io(format!("create {}: {e}", parent.display())))?;
        }
        tokio::fs::write(path, snapshot)
            .await
            .map_err(|e| ChatError::Io(format!("write {}: {e}", path.display())))?;
        Ok(())
    }

    pub async fn read_from(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ChatError::Io(format!("read {}: {e}", path.display())))?;
        Self::from_snapshot(&raw)
    }
}

/// Only user and assistant turns are stored; a `system` message is refused.
impl TryFrom<Vec<Message>> for ConversationHistory {
    type Error = ChatError;

    fn try_from(messages: Vec<Message>) -> Result<Self> {
        if let Some(pos) = messages.iter().position(|m| m.role == Role::System) {
            return Err(ChatError::Parse(format!(
                "history contains a system message at position {pos}"
            )));
        }
        Ok(Self { messages })
    }
}
