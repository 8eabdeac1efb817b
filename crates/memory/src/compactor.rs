use crate::transcript::Transcript;
use crate::types::{estimate_tokens, Message, Role};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum CompactionError {
    #[error("Summarizer failed: {0}")]
    Summarizer(String),
    #[error("Stale summary for generation {planned}, transcript is at generation {current}")]
    StaleSummary { planned: u64, current: u64 },
}

/// Produces the text that replaces a compacted prefix.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, messages: &[Message]) -> Result<String, CompactionError>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompactionConfig {
    /// Model context window in tokens.
    pub context_ceiling: usize,
    /// Fraction of the ceiling above which compaction triggers.
    pub trigger_ratio: f64,
    /// Most recent messages preserved verbatim.
    pub keep_recent: usize,
}

impl CompactionConfig {
    pub fn threshold(&self) -> usize {
        let ratio = if self.trigger_ratio > 0.0 && self.trigger_ratio <= 1.0 {
            self.trigger_ratio
        } else {
            Self::default().trigger_ratio
        };
        (self.context_ceiling as f64 * ratio) as usize
    }
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            context_ceiling: 128_000,
            trigger_ratio: 0.7,
            keep_recent: 3,
        }
    }
}

/// The prefix selected for summarization, bound to the transcript state it
/// was taken from.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactionPlan {
    pub generation: u64,
    pub transcript_len: usize,
    pub pinned: usize,
    pub keep_from: usize,
    pub prefix: Vec<Message>,
}

impl CompactionPlan {
    /// Returns `None` when there is nothing worth compacting: the prefix is
    /// empty or is already a single summary.
    pub fn for_transcript(transcript: &Transcript, keep_recent: usize) -> Option<Self> {
        let messages = transcript.messages();
        let pinned = transcript.pinned_len();
        let len = messages.len();
        if len <= pinned + keep_recent {
            return None;
        }

        // A kept tool reply must stay next to the assistant turn that issued it
        let mut keep_from = len - keep_recent;
        while keep_from > pinned && messages[keep_from].role == Role::Tool {
            keep_from -= 1;
        }

        let prefix = messages[pinned..keep_from].to_vec();
        if prefix.is_empty() || (prefix.len() == 1 && prefix[0].is_summary()) {
            return None;
        }

        Some(Self {
            generation: transcript.generation(),
            transcript_len: len,
            pinned,
            keep_from,
            prefix,
        })
    }

    pub fn check_current(&self, transcript: &Transcript) -> Result<(), CompactionError> {
        if self.generation != transcript.generation() || self.transcript_len != transcript.len() {
            return Err(CompactionError::StaleSummary {
                planned: self.generation,
                current: transcript.generation(),
            });
        }
        Ok(())
    }

    /// Builds `[pinned, summary, tail]` at the next generation.
    pub fn rebuild(&self, transcript: &Transcript, summary_text: &str) -> Transcript {
        let next = self.generation + 1;
        let messages = transcript.messages();
        let mut rebuilt = Vec::with_capacity(self.pinned + 1 + messages.len() - self.keep_from);
        rebuilt.extend_from_slice(&messages[..self.pinned]);
        rebuilt.push(Message::summary(
            format!("[Summary of earlier conversation]\n{}", summary_text),
            next,
        ));
        rebuilt.extend_from_slice(&messages[self.keep_from..]);
        Transcript::from_parts(rebuilt, next)
    }

    pub fn prefix_tokens(&self) -> usize {
        estimate_tokens(&self.prefix)
    }
}

/// Marker text used when summarization is unavailable.
pub fn truncation_notice(dropped: usize) -> String {
    format!(
        "{} earlier messages were removed to stay within the context window.",
        dropped
    )
}

/// Renders a prefix as plain text for the summarization request.
pub fn render_for_summary(messages: &[Message]) -> String {
    let mut out = String::new();
    for message in messages {
        out.push_str(&format!("{}: {}\n", message.role, message.content));
        for call in &message.tool_calls {
            out.push_str(&format!(
                "  -> {}({})\n",
                call.name,
                serde_json::Value::Object(call.arguments.clone())
            ));
        }
    }
    out
}
