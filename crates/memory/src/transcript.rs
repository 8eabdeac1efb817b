use crate::types::{estimate_tokens, Message, Role};
use serde::{Deserialize, Serialize};

/// Append-only view of the conversation. Compaction builds a new view with
/// a higher generation instead of editing this one.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Transcript {
    messages: Vec<Message>,
    generation: u64,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_parts(messages: Vec<Message>, generation: u64) -> Self {
        Self {
            messages,
            generation,
        }
    }

    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of compactions that produced this view.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn estimate_tokens(&self) -> usize {
        estimate_tokens(&self.messages)
    }

    /// Count of leading entries that are never compacted: the original
    /// system prompt, when present.
    pub fn pinned_len(&self) -> usize {
        match self.messages.first() {
            Some(first) if first.role == Role::System && !first.is_summary() => 1,
            _ => 0,
        }
    }
}
