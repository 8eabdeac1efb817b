use synlogos_core::AgentEvent;
use synlogos_executor::ExecutionOutcome;
use synlogos_tools::{ToolCall, ToolResult};

const PREVIEW_CHARS: usize = 80;

fn preview(text: &str) -> String {
    let line = text.lines().next().unwrap_or_default();
    let mut short: String = line.chars().take(PREVIEW_CHARS).collect();
    if line.chars().count() > PREVIEW_CHARS || text.lines().nth(1).is_some() {
        short.push('…');
    }
    short
}

fn call_line(call: &ToolCall) -> String {
    let args: Vec<String> = call
        .arguments
        .iter()
        .map(|(key, value)| match value.as_str() {
            Some(s) => format!("{}={:?}", key, preview(s)),
            None => format!("{}={}", key, value),
        })
        .collect();
    format!("  → {}({})", call.name, args.join(", "))
}

fn result_line(result: &ToolResult) -> String {
    match result.error() {
        None => format!("  ✓ {} ({} ms)", result.tool_name, result.duration_ms),
        Some(error) => format!("  ✗ {}: {}", result.tool_name, preview(error)),
    }
}

fn outcome_line(outcome: &ExecutionOutcome) -> String {
    let calls = outcome.tool_results();
    let failed = calls.iter().filter(|r| !r.is_success()).count();
    match outcome {
        ExecutionOutcome::Completed { .. } => format!(
            "  ⚙ orchestration finished: {} call(s), {} failed",
            calls.len(),
            failed
        ),
        ExecutionOutcome::Failed { kind, message, .. } => {
            format!("  ⚙ orchestration failed ({}): {}", kind, preview(message))
        }
    }
}

/// Terminal line for an event, or `None` for events the REPL shows
/// itself.
pub fn event_line(event: &AgentEvent) -> Option<String> {
    match event {
        AgentEvent::ToolCall { call } => Some(call_line(call)),
        AgentEvent::ToolResult { result } => Some(result_line(result)),
        AgentEvent::OrchestrationStarted { code } => Some(format!(
            "  ⚙ orchestrating ({} lines)",
            code.lines().filter(|l| !l.trim().is_empty()).count()
        )),
        AgentEvent::OrchestrationFinished { outcome } => Some(outcome_line(outcome)),
        AgentEvent::Compacted { report } => Some(format!(
            "  ⟳ context compacted: {} → {} tokens",
            report.tokens_before, report.tokens_after
        )),
        AgentEvent::GuardrailRejected { reason } => Some(format!("  ⚠ {}", reason)),
        AgentEvent::Warning { message } => Some(format!("  ⚠ {}", message)),
        AgentEvent::StateChanged { .. } | AgentEvent::Response { .. } | AgentEvent::TokenUsage { .. } => {
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use synlogos_tools::FailureKind;

    #[test]
    fn test_tool_call_and_result_lines() {
        let call = ToolCall::new(
            "c1",
            "write_file",
            json!({ "path": "fib.py", "content": "line one\nline two" })
                .as_object()
                .cloned()
                .unwrap(),
        );
        let line = event_line(&AgentEvent::ToolCall { call: call.clone() }).unwrap();
        assert_eq!(line, "  → write_file(content=\"line one…\", path=\"fib.py\")");

        let failed = ToolResult::synthesized(&call, FailureKind::Timeout, "too slow", Duration::ZERO);
        assert_eq!(
            event_line(&AgentEvent::ToolResult { result: failed }).unwrap(),
            "  ✗ write_file: too slow"
        );
    }

    #[test]
    fn test_quiet_events() {
        assert!(event_line(&AgentEvent::Response { text: "hi".into() }).is_none());
    }
}
