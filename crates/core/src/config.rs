use serde::{Deserialize, Serialize};
use std::time::Duration;
use synlogos_memory::CompactionConfig;
use synlogos_policy::{PolicyConfig, ReminderPolicy};

/// Runtime knobs for the agent loop. Deserializes from the `runtime` block
/// of `synlogos.json`; every field has a default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub max_turns: usize,
    pub orchestration_limit: usize,
    pub reminder_policy: ReminderPolicy,
    pub recent_tools: usize,
    pub provider_timeout_secs: u64,
    pub tool_timeout_secs: u64,
    pub sandbox_timeout_secs: u64,
    pub context_ceiling: usize,
    pub trigger_ratio: f64,
    pub keep_recent: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let policy = PolicyConfig::default();
        let compaction = CompactionConfig::default();
        Self {
            max_turns: 30,
            orchestration_limit: policy.orchestration_limit,
            reminder_policy: policy.reminder_policy,
            recent_tools: policy.recent_tools,
            provider_timeout_secs: 120,
            tool_timeout_secs: 300,
            sandbox_timeout_secs: 120,
            context_ceiling: compaction.context_ceiling,
            trigger_ratio: compaction.trigger_ratio,
            keep_recent: compaction.keep_recent,
        }
    }
}

impl AgentConfig {
    pub fn policy(&self) -> PolicyConfig {
        PolicyConfig {
            orchestration_limit: self.orchestration_limit,
            recent_tools: self.recent_tools,
            reminder_policy: self.reminder_policy,
        }
    }

    pub fn compaction(&self) -> CompactionConfig {
        CompactionConfig {
            context_ceiling: self.context_ceiling,
            trigger_ratio: self.trigger_ratio,
            keep_recent: self.keep_recent,
        }
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs.max(1))
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs.max(1))
    }

    pub fn sandbox_timeout(&self) -> Duration {
        Duration::from_secs(self.sandbox_timeout_secs.max(1))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_runtime_block() {
        let config: AgentConfig = serde_json::from_str(
            r#"{"max_turns": 10, "reminder_policy": "on_reject_only", "trigger_ratio": 0.5}"#,
        )
        .unwrap();
        assert_eq!(config.max_turns, 10);
        assert_eq!(config.policy().reminder_policy, ReminderPolicy::OnRejectOnly);
        assert_eq!(config.policy().orchestration_limit, 1);
        assert_eq!(config.compaction().threshold(), 64_000);
        assert_eq!(config.provider_timeout(), Duration::from_secs(120));
    }
}
