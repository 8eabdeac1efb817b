use crate::config::AgentConfig;
use crate::metrics::{MetricsSnapshot, SessionMetrics};
use std::sync::Arc;
use synlogos_memory::ContextManager;
use synlogos_policy::RoutingPolicy;
use synlogos_providers::TokenUsage;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Conversation state for one run of the program. Not persisted.
pub struct Session {
    id: String,
    pub(crate) context: ContextManager,
    pub(crate) metrics: Arc<SessionMetrics>,
    pub(crate) policy: RoutingPolicy,
    pub(crate) usage: TokenUsage,
    pub(crate) cancel: CancellationToken,
    pub(crate) turns: usize,
}

impl Session {
    pub fn new(config: &AgentConfig, system_prompt: impl Into<String>) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        info!("Starting session: {}", id);
        Self {
            id,
            context: ContextManager::with_system_prompt(config.compaction(), system_prompt),
            metrics: SessionMetrics::new(),
            policy: RoutingPolicy::new(config.policy()),
            usage: TokenUsage::default(),
            cancel: CancellationToken::new(),
            turns: 0,
        }
    }

    pub fn with_pricing(mut self, input_cost_per_1k: f64, output_cost_per_1k: f64) -> Self {
        self.usage = TokenUsage::with_pricing(input_cost_per_1k, output_cost_per_1k);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn context(&self) -> &ContextManager {
        &self.context
    }

    pub fn policy(&self) -> &RoutingPolicy {
        &self.policy
    }

    pub fn metrics(&self) -> Arc<SessionMetrics> {
        self.metrics.clone()
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn usage(&self) -> &TokenUsage {
        &self.usage
    }

    /// Turns taken by the current or most recent task.
    pub fn turns(&self) -> usize {
        self.turns
    }

    /// Token observed by the running task.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Replaces a cancelled token so the next task can run, returning a
    /// handle to the new one.
    pub fn renew_cancellation(&mut self) -> CancellationToken {
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
        self.cancel.clone()
    }

    /// Drops the conversation but keeps the system prompt, metrics and
    /// token usage.
    pub fn clear(&mut self) {
        self.context.clear();
        self.policy.begin_task();
        self.turns = 0;
    }
}
