#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use synlogos_core::{AgentConfig, AgentLoop, EngineError, Session};
use synlogos_memory::Role;
use synlogos_policy::{ReminderPolicy, LIMIT_REASON, ORCHESTRATE_TOOL, ORCHESTRATION_REMINDER};
use synlogos_providers::{ModelResponse, ProviderError, ScriptedProvider, ScriptedResponse};
use synlogos_tools::{default_registry, ToolCall};
use tempfile::TempDir;

struct Harness {
    _dir: TempDir,
    root: std::path::PathBuf,
    provider: Arc<ScriptedProvider>,
    agent: AgentLoop,
    session: Session,
}

fn harness_with(config: AgentConfig, replies: Vec<ScriptedResponse>) -> Harness {
    let dir = TempDir::new().unwrap();
    let root = dir.path().to_path_buf();
    std::fs::write(root.join("a.txt"), "alpha\nbeta\n").unwrap();
    std::fs::write(root.join("b.txt"), "gamma\n").unwrap();

    let provider = Arc::new(ScriptedProvider::new(replies));
    let registry = Arc::new(default_registry(&root).unwrap());
    let agent = AgentLoop::new(provider.clone(), registry, config);
    let session = Session::new(agent.config(), "You are a coding agent.");
    Harness {
        _dir: dir,
        root,
        provider,
        agent,
        session,
    }
}

fn harness(replies: Vec<ScriptedResponse>) -> Harness {
    harness_with(AgentConfig::default(), replies)
}

fn call(id: &str, name: &str, args: Value) -> ToolCall {
    ToolCall::new(id, name, args.as_object().cloned().unwrap())
}

fn tool_calls(calls: Vec<ToolCall>) -> ScriptedResponse {
    ModelResponse::with_tool_calls(calls).into()
}

fn orchestrate(id: &str, code: &str) -> ScriptedResponse {
    tool_calls(vec![call(id, ORCHESTRATE_TOOL, json!({ "code": code }))])
}

fn text(reply: &str) -> ScriptedResponse {
    ModelResponse::text(reply).into()
}

#[tokio::test]
async fn test_plain_question_completes_without_tools() {
    let mut h = harness(vec![text("4")]);

    let answer = h.agent.submit(&mut h.session, "What is 2+2?").await.unwrap();
    assert_eq!(answer.text, "4");
    assert_eq!(answer.turns, 1);
    assert_eq!(answer.tool_calls, 0);

    let roles: Vec<Role> = h.session.context().messages().iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
    let snapshot = h.session.metrics_snapshot();
    assert_eq!(snapshot.prompts, 1);
    assert!(snapshot.tools.is_empty());
}

#[tokio::test]
async fn test_direct_write_file() {
    let source = "def fib(n):\n    return n if n < 2 else fib(n - 1) + fib(n - 2)\n";
    let mut h = harness(vec![
        tool_calls(vec![call(
            "call_1",
            "write_file",
            json!({ "path": "fib.py", "content": source }),
        )]),
        text("Wrote fib.py"),
    ]);

    let answer = h.agent.submit(&mut h.session, "Write a fibonacci script").await.unwrap();
    assert_eq!(answer.text, "Wrote fib.py");
    assert_eq!(answer.tool_calls, 1);
    assert_eq!(std::fs::read_to_string(h.root.join("fib.py")).unwrap(), source);

    let tool = &h.session.context().messages()[3];
    assert_eq!(tool.role, Role::Tool);
    assert_eq!(tool.tool_call_id.as_deref(), Some("call_1"));

    let snapshot = h.session.metrics_snapshot();
    assert_eq!(snapshot.direct_calls, 1);
    assert_eq!(snapshot.tool("write_file").unwrap().successes, 1);
    assert_eq!(h.session.policy().recent_tools().collect::<Vec<_>>(), vec!["write_file"]);
}

#[tokio::test]
async fn test_orchestration_with_one_failing_call_continues() {
    let code = r#"
a = await read_file("a.txt")
b = await read_file("missing.txt")
c = await read_file("b.txt")
print(a.success, b.success, c.success)
result = len(a.output.splitlines()) + len(c.output.splitlines())
"#;
    let mut h = harness(vec![orchestrate("orc", code), text("3 lines in total")]);

    let answer = h.agent.submit(&mut h.session, "Count lines in a.txt and b.txt").await.unwrap();
    assert_eq!(answer.text, "3 lines in total");
    assert_eq!(answer.tool_calls, 3);

    let messages = h.session.context().messages();
    let folded = &messages[3];
    assert_eq!(folded.role, Role::Tool);
    assert_eq!(folded.tool_call_id.as_deref(), Some("orc"));
    assert!(folded.content.starts_with("Orchestration completed."));
    assert!(folded.content.contains("Result: 3"));
    assert!(folded.content.contains("True False True"));
    assert!(folded.content.contains("Tool calls (3):"));
    assert!(folded.content.contains("failed: Execution failed: File not found"));
    assert_eq!(messages[4].role, Role::System);
    assert_eq!(messages[4].content, ORCHESTRATION_REMINDER);

    let snapshot = h.session.metrics_snapshot();
    assert_eq!(snapshot.orchestrations, 1);
    assert_eq!(snapshot.direct_calls, 0);
    let reads = snapshot.tool("read_file").unwrap();
    assert_eq!((reads.calls, reads.successes, reads.failures), (3, 2, 1));
    assert_eq!(snapshot.tool(ORCHESTRATE_TOOL).unwrap().successes, 1);
}

#[tokio::test]
async fn test_second_orchestration_is_rejected() {
    let mut h = harness(vec![
        orchestrate("o1", "print('first')"),
        orchestrate("o2", "print('second')"),
        text("done"),
    ]);

    let answer = h.agent.submit(&mut h.session, "Do two things").await.unwrap();
    assert_eq!(answer.turns, 3);

    let messages = h.session.context().messages();
    let rejected = messages
        .iter()
        .find(|m| m.tool_call_id.as_deref() == Some("o2"))
        .unwrap();
    assert!(rejected.content.contains(LIMIT_REASON));
    assert!(messages.iter().all(|m| !m.content.contains("second\n")));
    assert!(messages
        .iter()
        .any(|m| m.role == Role::System && m.content.starts_with("Orchestration limit reached")));

    let snapshot = h.session.metrics_snapshot();
    assert_eq!(snapshot.orchestrations, 1);
    assert_eq!(snapshot.rejections, 1);
}

#[tokio::test]
async fn test_guardrail_resets_per_task() {
    let mut h = harness(vec![
        orchestrate("o1", "print(1)"),
        text("first"),
        orchestrate("o2", "print(2)"),
        text("second"),
    ]);

    h.agent.submit(&mut h.session, "one").await.unwrap();
    h.agent.submit(&mut h.session, "two").await.unwrap();
    let snapshot = h.session.metrics_snapshot();
    assert_eq!(snapshot.orchestrations, 2);
    assert_eq!(snapshot.rejections, 0);
    assert_eq!(snapshot.prompts, 2);
}

#[tokio::test]
async fn test_reject_only_policy_skips_soft_reminder() {
    let config = AgentConfig {
        reminder_policy: ReminderPolicy::OnRejectOnly,
        ..AgentConfig::default()
    };
    let mut h = harness_with(config, vec![orchestrate("o1", "print(1)"), text("1")]);

    h.agent.submit(&mut h.session, "print one").await.unwrap();
    assert!(h
        .session
        .context()
        .messages()
        .iter()
        .all(|m| m.content != ORCHESTRATION_REMINDER));
}

#[tokio::test]
async fn test_turn_limit_aborts() {
    let config = AgentConfig {
        max_turns: 2,
        ..AgentConfig::default()
    };
    let glob = || tool_calls(vec![call("g", "glob", json!({ "pattern": "*.txt" }))]);
    let mut h = harness_with(config, vec![glob(), glob(), glob()]);

    let err = h.agent.submit(&mut h.session, "loop forever").await.unwrap_err();
    assert!(matches!(err, EngineError::TurnLimit(2)));
    assert_eq!(h.provider.call_count(), 2);
    assert_eq!(h.session.turns(), 3);
}

#[tokio::test]
async fn test_transient_provider_error_retried_once() {
    let mut h = harness(vec![
        ScriptedResponse::Error(ProviderError::Network("connection reset".into())),
        text("recovered"),
    ]);

    let answer = h.agent.submit(&mut h.session, "hello").await.unwrap();
    assert_eq!(answer.text, "recovered");
    assert_eq!(h.provider.call_count(), 2);
    let snapshot = h.session.metrics_snapshot();
    assert_eq!(snapshot.provider_requests, 2);
    assert_eq!(snapshot.provider_failures, 1);
}

#[tokio::test]
async fn test_second_transient_failure_is_fatal() {
    let mut h = harness(vec![
        ScriptedResponse::Error(ProviderError::Api {
            status: 502,
            message: "bad gateway".into(),
        }),
        ScriptedResponse::Error(ProviderError::RateLimited("slow down".into())),
        text("never"),
    ]);

    let err = h.agent.submit(&mut h.session, "hello").await.unwrap_err();
    assert!(matches!(err, EngineError::Provider(ProviderError::RateLimited(_))));
    assert_eq!(h.provider.remaining(), 1);
}

#[tokio::test]
async fn test_auth_error_is_not_retried() {
    let mut h = harness(vec![
        ScriptedResponse::Error(ProviderError::Auth("bad key".into())),
        text("never"),
    ]);

    let err = h.agent.submit(&mut h.session, "hello").await.unwrap_err();
    assert!(matches!(err, EngineError::Provider(ProviderError::Auth(_))));
    assert_eq!(h.provider.call_count(), 1);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let mut h = harness(vec![text("never")]);
    h.session.cancellation_token().cancel();

    let err = h.agent.submit(&mut h.session, "hello").await.unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));
    assert_eq!(h.provider.call_count(), 0);

    h.session.renew_cancellation();
    let answer = h.agent.submit(&mut h.session, "hello again").await.unwrap();
    assert_eq!(answer.text, "never");
}

#[tokio::test]
async fn test_cancel_interrupts_provider_wait() {
    let mut h = harness(vec![ScriptedResponse::delayed(
        Duration::from_secs(30),
        ModelResponse::text("too late").into(),
    )]);
    let token = h.session.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });

    let started = std::time::Instant::now();
    let err = h.agent.submit(&mut h.session, "slow").await.unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[cfg(unix)]
#[tokio::test]
async fn test_cancel_during_direct_call() {
    let mut h = harness(vec![
        tool_calls(vec![
            call("s1", "shell", json!({ "command": "sleep 1 && touch marker.txt" })),
            call("s2", "read_file", json!({ "path": "a.txt" })),
        ]),
        text("never"),
    ]);
    let token = h.session.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    });

    let err = h.agent.submit(&mut h.session, "make a marker").await.unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));
    assert_eq!(h.provider.call_count(), 1);

    let replies: Vec<_> = h
        .session
        .context()
        .messages()
        .iter()
        .filter(|m| m.role == Role::Tool)
        .cloned()
        .collect();
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0].tool_call_id.as_deref(), Some("s1"));
    assert_eq!(replies[1].tool_call_id.as_deref(), Some("s2"));
    assert!(replies.iter().all(|m| m.content.contains("\"kind\":\"cancelled\"")));

    let snapshot = h.session.metrics_snapshot();
    assert_eq!(snapshot.direct_calls, 2);
    let shell = snapshot.tool("shell").unwrap();
    assert_eq!((shell.calls, shell.failures), (1, 1));

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!h.root.join("marker.txt").exists());
}

#[tokio::test]
async fn test_compaction_after_fold() {
    let config = AgentConfig {
        context_ceiling: 200,
        trigger_ratio: 0.5,
        keep_recent: 1,
        ..AgentConfig::default()
    };
    let request = "Please read a.txt and tell me what it says. ".repeat(12);
    let mut h = harness_with(
        config,
        vec![
            tool_calls(vec![call("r1", "read_file", json!({ "path": "a.txt" }))]),
            text("User asked what a.txt says."),
            text("It says alpha and beta."),
        ],
    );

    let answer = h.agent.submit(&mut h.session, &request).await.unwrap();
    assert_eq!(answer.text, "It says alpha and beta.");
    assert_eq!(h.provider.call_count(), 3);
    assert_eq!(h.session.context().generation(), 1);
    assert_eq!(h.session.metrics_snapshot().compactions, 1);

    let final_request = &h.provider.requests()[2];
    assert!(final_request[1].is_summary());
    assert!(final_request[1].content.contains("User asked what a.txt says."));
    assert_eq!(final_request[2].tool_calls[0].id, "r1");
    assert_eq!(h.session.context().archive().len(), 5);
}
