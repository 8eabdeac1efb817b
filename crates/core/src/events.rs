use serde::Serialize;
use synlogos_executor::ExecutionOutcome;
use synlogos_memory::CompactionReport;
use synlogos_providers::TokenUsage;
use synlogos_tools::{ToolCall, ToolResult};
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    AwaitingModel,
    Dispatching,
    FoldingResult,
    Completed,
    Aborted,
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopState::Completed | LoopState::Aborted)
    }
}

/// Progress notifications for streaming front ends.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    StateChanged { state: LoopState, turn: usize },
    Response { text: String },
    ToolCall { call: ToolCall },
    ToolResult { result: ToolResult },
    OrchestrationStarted { code: String },
    OrchestrationFinished { outcome: ExecutionOutcome },
    TokenUsage { usage: TokenUsage },
    Compacted { report: CompactionReport },
    GuardrailRejected { reason: String },
    Warning { message: String },
}

/// Optional sink; a dropped receiver is ignored.
#[derive(Debug, Clone, Default)]
pub(crate) struct EventSink(Option<UnboundedSender<AgentEvent>>);

impl EventSink {
    pub(crate) fn new(sender: UnboundedSender<AgentEvent>) -> Self {
        Self(Some(sender))
    }

    pub(crate) fn emit(&self, event: AgentEvent) {
        if let Some(sender) = &self.0 {
            let _ = sender.send(event);
        }
    }
}
