use serde::{Deserialize, Serialize};
use synlogos_tools::ToolCall;

/// Approximate characters per token used by the estimator.
pub const CHARS_PER_TOKEN: usize = 4;

/// Fixed per-message framing overhead in tokens.
pub const MESSAGE_OVERHEAD_TOKENS: usize = 4;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
    System,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let role = match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
            Role::System => "system",
        };
        f.write_str(role)
    }
}

/// One transcript entry. Never edited once appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Provider-attributed token count, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<usize>,
    /// Set only on summaries produced by compaction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_generation: Option<u64>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            token_count: None,
            summary_generation: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::new(Role::Assistant, content)
        }
    }

    /// Tool-role reply. `call_id` is `None` for results not tied to a
    /// model-issued call.
    pub fn tool(call_id: Option<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: call_id,
            ..Self::new(Role::Tool, content)
        }
    }

    pub fn summary(content: impl Into<String>, generation: u64) -> Self {
        Self {
            summary_generation: Some(generation),
            ..Self::new(Role::System, content)
        }
    }

    pub fn with_token_count(mut self, tokens: usize) -> Self {
        self.token_count = Some(tokens);
        self
    }

    pub fn is_summary(&self) -> bool {
        self.summary_generation.is_some()
    }

    /// Heuristic estimate, never below the provider-attributed count.
    pub fn estimated_tokens(&self) -> usize {
        let mut chars = self.content.chars().count();
        for call in &self.tool_calls {
            chars += call.name.len() + serde_json::Value::Object(call.arguments.clone()).to_string().len();
        }
        let heuristic = chars.div_ceil(CHARS_PER_TOKEN) + MESSAGE_OVERHEAD_TOKENS;
        heuristic.max(self.token_count.unwrap_or(0))
    }
}

pub fn estimate_tokens(messages: &[Message]) -> usize {
    messages.iter().map(Message::estimated_tokens).sum()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
        let role: Role = serde_json::from_str("\"tool\"").unwrap();
        assert_eq!(role, Role::Tool);
    }

    #[test]
    fn test_estimate_heuristic() {
        let msg = Message::user("abcdefgh");
        assert_eq!(msg.estimated_tokens(), 2 + MESSAGE_OVERHEAD_TOKENS);
        let msg = Message::user("abcdefghi");
        assert_eq!(msg.estimated_tokens(), 3 + MESSAGE_OVERHEAD_TOKENS);
    }

    #[test]
    fn test_estimate_respects_reported_count() {
        let msg = Message::user("hi").with_token_count(50);
        assert_eq!(msg.estimated_tokens(), 50);
        assert_eq!(estimate_tokens(&[msg.clone(), msg]), 100);
    }

    #[test]
    fn test_estimate_counts_tool_calls() {
        let call = ToolCall::new("c1", "read_file", json!({"path": "a"}).as_object().cloned().unwrap());
        let with_call = Message::assistant("", vec![call]);
        assert!(with_call.estimated_tokens() > Message::assistant("", vec![]).estimated_tokens());
    }

    #[test]
    fn test_message_serialization_skips_empty_fields() {
        let value = serde_json::to_value(Message::user("hello")).unwrap();
        assert_eq!(value, json!({"role": "user", "content": "hello"}));
    }

    #[test]
    fn test_summary_marker() {
        let summary = Message::summary("earlier", 2);
        assert!(summary.is_summary());
        assert_eq!(summary.role, Role::System);
        assert!(!Message::system("prompt").is_summary());
    }
}
