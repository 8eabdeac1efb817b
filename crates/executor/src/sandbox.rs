use crate::error::SandboxErrorKind;
use crate::interpreter::{Interpreter, Limits, Trace};
use crate::parser::parse_program;
use crate::value::to_str;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};
use synlogos_tools::{Capability, FailureKind, ToolRegistry, ToolResult, ToolSpec};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Names never exposed to scripts, so orchestration cannot nest.
pub const RESERVED_NAMES: &[&str] = &["orchestrate"];

pub const DEFAULT_SANDBOX_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub timeout: Duration,
    pub limits: Limits,
    /// Tools whose capability is not listed are left out of the namespace.
    pub capabilities: Vec<Capability>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_SANDBOX_TIMEOUT,
            limits: Limits::default(),
            capabilities: vec![Capability::ReadOnly, Capability::Mutating, Capability::Shell],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Completed {
        return_value: Option<Value>,
        output: String,
        tool_results: Vec<ToolResult>,
    },
    Failed {
        kind: SandboxErrorKind,
        message: String,
        output: String,
        partial_tool_results: Vec<ToolResult>,
    },
}

impl ExecutionOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, ExecutionOutcome::Completed { .. })
    }

    pub fn output(&self) -> &str {
        match self {
            ExecutionOutcome::Completed { output, .. } | ExecutionOutcome::Failed { output, .. } => output,
        }
    }

    pub fn return_value(&self) -> Option<&Value> {
        match self {
            ExecutionOutcome::Completed { return_value, .. } => return_value.as_ref(),
            ExecutionOutcome::Failed { .. } => None,
        }
    }

    /// Every inner result, in issue order.
    pub fn tool_results(&self) -> &[ToolResult] {
        match self {
            ExecutionOutcome::Completed { tool_results, .. } => tool_results,
            ExecutionOutcome::Failed {
                partial_tool_results,
                ..
            } => partial_tool_results,
        }
    }

    /// The return value when present, otherwise the captured output.
    pub fn surfaced(&self) -> String {
        match self.return_value() {
            Some(value) => to_str(value),
            None => self.output().to_string(),
        }
    }

    /// Single block of text folded back into the conversation.
    pub fn to_model_content(&self) -> String {
        let mut content = String::new();
        match self {
            ExecutionOutcome::Completed { return_value, .. } => {
                content.push_str("Orchestration completed.\n");
                if let Some(value) = return_value {
                    let _ = writeln!(content, "Result: {}", to_str(value));
                }
            }
            ExecutionOutcome::Failed { kind, message, .. } => {
                let _ = writeln!(content, "Orchestration failed ({}): {}", kind, message);
            }
        }

        let output = self.output();
        if !output.is_empty() {
            content.push_str("Output:\n");
            content.push_str(output);
            if !output.ends_with('\n') {
                content.push('\n');
            }
        }

        let results = self.tool_results();
        if !results.is_empty() {
            let _ = writeln!(content, "Tool calls ({}):", results.len());
            for result in results {
                match result.error() {
                    None => {
                        let _ = writeln!(content, "- {} {}: ok", result.call_id, result.tool_name);
                    }
                    Some(error) => {
                        let _ = writeln!(
                            content,
                            "- {} {}: failed: {}",
                            result.call_id, result.tool_name, error
                        );
                    }
                }
            }
        }
        content.trim_end().to_string()
    }
}

/// Runs orchestration scripts against a fixed tool namespace.
pub struct SandboxExecutor {
    registry: Arc<ToolRegistry>,
    config: SandboxConfig,
}

impl SandboxExecutor {
    pub fn new(registry: Arc<ToolRegistry>, config: SandboxConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Specs of the tools a script may call.
    pub fn namespace(&self) -> Vec<ToolSpec> {
        self.registry
            .list()
            .into_iter()
            .filter(|spec| !RESERVED_NAMES.contains(&spec.name.as_str()))
            .filter(|spec| self.config.capabilities.contains(&spec.capability))
            .collect()
    }

    pub async fn run(&self, code: &str, timeout: Duration, cancel: &CancellationToken) -> ExecutionOutcome {
        let started = Instant::now();
        let program = match parse_program(code) {
            Ok(program) => program,
            Err(e) => {
                warn!("Orchestration code rejected: {}", e);
                return ExecutionOutcome::Failed {
                    kind: SandboxErrorKind::RuntimeFault,
                    message: e.to_string(),
                    output: String::new(),
                    partial_tool_results: Vec::new(),
                };
            }
        };

        let trace = Trace::default();
        let interpreter = Interpreter::new(
            self.registry.clone(),
            self.namespace(),
            self.config.limits,
            trace.clone(),
        );

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err((SandboxErrorKind::Cancelled, "execution cancelled".to_string())),
            run = tokio::time::timeout(timeout, interpreter.run(&program)) => match run {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err((SandboxErrorKind::RuntimeFault, e.to_string())),
                Err(_) => Err((
                    SandboxErrorKind::Timeout,
                    format!("execution timed out after {:?}", timeout),
                )),
            },
        };

        let output = trace.output.lock().clone();
        match result {
            Ok(return_value) => {
                let tool_results = trace.calls.lock().results();
                info!(
                    "Orchestration completed in {:?}: {} tool call(s), {} step(s)",
                    started.elapsed(),
                    tool_results.len(),
                    interpreter.steps()
                );
                ExecutionOutcome::Completed {
                    return_value,
                    output,
                    tool_results,
                }
            }
            Err((kind, message)) => {
                let (failure, detail) = match kind {
                    SandboxErrorKind::Cancelled => (FailureKind::Cancelled, "orchestration cancelled"),
                    _ => (FailureKind::Timeout, "orchestration aborted before the call completed"),
                };
                let partial_tool_results = trace.calls.lock().finish(failure, detail);
                warn!(
                    "Orchestration failed after {:?} ({}): {}",
                    started.elapsed(),
                    kind,
                    message
                );
                ExecutionOutcome::Failed {
                    kind,
                    message,
                    output,
                    partial_tool_results,
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use synlogos_tools::{default_registry, Arguments, ParamSpec, ParamType, Tool, ToolError};
    use tempfile::TempDir;

    struct SlowEchoTool;

    #[async_trait]
    impl Tool for SlowEchoTool {
        fn name(&self) -> &str {
            "slow_echo"
        }
        fn description(&self) -> &str {
            "Echo text after a delay"
        }
        fn params(&self) -> Vec<ParamSpec> {
            vec![
                ParamSpec::required("text", ParamType::String, "Text"),
                ParamSpec::optional("ms", ParamType::Integer, "Delay").with_default(json!(0)),
            ]
        }
        fn capability(&self) -> Capability {
            Capability::ReadOnly
        }
        async fn execute(&self, args: Arguments) -> Result<Value, ToolError> {
            let ms = args.get("ms").and_then(Value::as_u64).unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(args["text"].clone())
        }
    }

    fn workspace() -> (TempDir, Arc<ToolRegistry>) {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.txt"), "alpha\nbeta\n").unwrap();
        std::fs::write(temp.path().join("b.txt"), "gamma\n").unwrap();
        let mut registry = default_registry(temp.path()).unwrap();
        registry.register(Arc::new(SlowEchoTool)).unwrap();
        (temp, Arc::new(registry))
    }

    async fn run(registry: Arc<ToolRegistry>, code: &str) -> ExecutionOutcome {
        let executor = SandboxExecutor::new(registry, SandboxConfig::default());
        executor
            .run(code, Duration::from_secs(10), &CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn test_tool_failure_does_not_fault_block() {
        let (_temp, registry) = workspace();
        let code = r#"
a = await read_file("a.txt")
missing = await read_file("missing.txt")
b = await read_file("b.txt")
print("missing ok:", missing.success)
result = [a.success, missing.success, b.success]
"#;
        let outcome = run(registry, code).await;
        assert!(outcome.is_completed(), "{:?}", outcome);
        assert_eq!(outcome.return_value(), Some(&json!([true, false, true])));
        let results = outcome.tool_results();
        assert_eq!(results.len(), 3);
        assert!(results[0].is_success());
        assert!(!results[1].is_success());
        assert!(results[2].is_success());
        assert_eq!(outcome.output(), "missing ok: False\n");
    }

    #[tokio::test]
    async fn test_positional_arguments_are_normalized() {
        let (_temp, registry) = workspace();
        let code = r#"
content = read_file("a.txt", 2, 1)
result = content.output
"#;
        let outcome = run(registry, code).await;
        assert_eq!(outcome.surfaced(), "2: beta\n");
        let call = &outcome.tool_results()[0];
        assert_eq!(call.tool_name, "read_file");
        assert_eq!(call.call_id, "orc_1");
    }

    #[tokio::test]
    async fn test_bad_arguments_become_failure_results() {
        let (_temp, registry) = workspace();
        let code = r#"
r = read_file("a.txt", 1, 2, 3)
d = read_file("a.txt", path="b.txt")
result = [r.error is not None, d.success]
"#;
        let outcome = run(registry, code).await;
        assert_eq!(outcome.return_value(), Some(&json!([true, false])));
        let results = outcome.tool_results();
        assert_eq!(results.len(), 2);
        assert!(matches!(
            results[0].outcome,
            synlogos_tools::ToolOutcome::Failure {
                kind: FailureKind::InvalidArguments,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_fault_keeps_partial_results() {
        let (_temp, registry) = workspace();
        let code = "first = read_file('a.txt')\nprint('before')\nboom = 1 / 0\n";
        let outcome = run(registry, code).await;
        match &outcome {
            ExecutionOutcome::Failed {
                kind,
                message,
                output,
                partial_tool_results,
            } => {
                assert_eq!(*kind, SandboxErrorKind::RuntimeFault);
                assert!(message.contains("ZeroDivisionError"));
                assert_eq!(output, "before\n");
                assert_eq!(partial_tool_results.len(), 1);
                assert!(partial_tool_results[0].is_success());
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_synthesizes_in_flight_call() {
        let (_temp, registry) = workspace();
        let executor = SandboxExecutor::new(registry, SandboxConfig::default());
        let code = "slow_echo('quick')\nslow_echo('stuck', ms=10000)\n";
        let outcome = executor
            .run(code, Duration::from_millis(200), &CancellationToken::new())
            .await;
        match &outcome {
            ExecutionOutcome::Failed {
                kind,
                partial_tool_results,
                ..
            } => {
                assert_eq!(*kind, SandboxErrorKind::Timeout);
                assert_eq!(partial_tool_results.len(), 2);
                assert!(partial_tool_results[0].is_success());
                assert!(matches!(
                    partial_tool_results[1].outcome,
                    synlogos_tools::ToolOutcome::Failure {
                        kind: FailureKind::Timeout,
                        ..
                    }
                ));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancellation() {
        let (_temp, registry) = workspace();
        let executor = SandboxExecutor::new(registry, SandboxConfig::default());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let outcome = executor
            .run("slow_echo('x', ms=10000)", Duration::from_secs(30), &cancel)
            .await;
        match &outcome {
            ExecutionOutcome::Failed {
                kind,
                partial_tool_results,
                ..
            } => {
                assert_eq!(*kind, SandboxErrorKind::Cancelled);
                assert_eq!(partial_tool_results.len(), 1);
                assert!(matches!(
                    partial_tool_results[0].outcome,
                    synlogos_tools::ToolOutcome::Failure {
                        kind: FailureKind::Cancelled,
                        ..
                    }
                ));
            }
            other => panic!("expected cancellation, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timed_out_call_has_no_late_side_effect() {
        let (temp, registry) = workspace();
        let executor = SandboxExecutor::new(registry, SandboxConfig::default());
        let outcome = executor
            .run(
                "await shell('sleep 1 && touch marker.txt')",
                Duration::from_millis(150),
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(
            outcome,
            ExecutionOutcome::Failed {
                kind: SandboxErrorKind::Timeout,
                ..
            }
        ));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!temp.path().join("marker.txt").exists());
    }

    fn tight_limits() -> Limits {
        Limits {
            max_steps: 500,
            max_range: 100,
            max_depth: 8,
            max_value_len: 1_000,
        }
    }

    async fn run_limited(code: &str) -> (SandboxErrorKind, String, usize) {
        let (_temp, registry) = workspace();
        let executor = SandboxExecutor::new(
            registry,
            SandboxConfig {
                limits: tight_limits(),
                ..SandboxConfig::default()
            },
        );
        match executor
            .run(code, Duration::from_secs(10), &CancellationToken::new())
            .await
        {
            ExecutionOutcome::Failed {
                kind,
                message,
                partial_tool_results,
                ..
            } => (kind, message, partial_tool_results.len()),
            other => panic!("expected a limit failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_step_budget_is_a_runtime_fault() {
        let (kind, message, _) = run_limited("while True:\n    pass\n").await;
        assert_eq!(kind, SandboxErrorKind::RuntimeFault);
        assert!(message.contains("step budget of 500"), "{}", message);
    }

    #[tokio::test]
    async fn test_range_limit_is_a_runtime_fault() {
        let (kind, message, _) = run_limited("for i in range(1000000):\n    pass\n").await;
        assert_eq!(kind, SandboxErrorKind::RuntimeFault);
        assert!(message.contains("exceeds the limit of 100"), "{}", message);
    }

    #[tokio::test]
    async fn test_recursion_limit_is_a_runtime_fault() {
        let code = "def down(n):\n    return down(n + 1)\n\ndown(0)\n";
        let (kind, message, _) = run_limited(code).await;
        assert_eq!(kind, SandboxErrorKind::RuntimeFault);
        assert!(message.contains("RecursionError"), "{}", message);
    }

    #[tokio::test]
    async fn test_oversized_values_are_runtime_faults() {
        let (kind, message, calls) = run_limited("a = read_file('a.txt')\nx = 'ab' * (2 ** 62)\n").await;
        assert_eq!(kind, SandboxErrorKind::RuntimeFault);
        assert!(message.contains("LimitExceeded"), "{}", message);
        assert_eq!(calls, 1);

        let (kind, _, _) = run_limited("x = [0] * (2 ** 40)").await;
        assert_eq!(kind, SandboxErrorKind::RuntimeFault);

        let code = "s = 'ab'\nwhile True:\n    s = s + s\n";
        let (kind, message, _) = run_limited(code).await;
        assert_eq!(kind, SandboxErrorKind::RuntimeFault);
        assert!(message.contains("exceed 1000"), "{}", message);

        let (kind, _, _) = run_limited("x = f'{1.5:.99999999}'").await;
        assert_eq!(kind, SandboxErrorKind::RuntimeFault);
    }

    #[tokio::test]
    async fn test_gather_keeps_issue_order() {
        let (_temp, registry) = workspace();
        let code = r#"
import asyncio
pairs = [["a", 80], ["b", 10], ["c", 40]]
replies = await asyncio.gather(*[slow_echo(text, ms=ms) for text, ms in pairs])
result = [r.output for r in replies]
"#;
        let started = Instant::now();
        let outcome = run(registry, code).await;
        assert_eq!(outcome.return_value(), Some(&json!(["a", "b", "c"])));
        let ids: Vec<&str> = outcome.tool_results().iter().map(|r| r.call_id.as_str()).collect();
        assert_eq!(ids, vec!["orc_1", "orc_2", "orc_3"]);
        assert!(started.elapsed() < Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_namespace_respects_capabilities() {
        let (_temp, registry) = workspace();
        let executor = SandboxExecutor::new(
            registry,
            SandboxConfig {
                capabilities: vec![Capability::ReadOnly],
                ..SandboxConfig::default()
            },
        );
        assert!(executor.namespace().iter().all(|s| s.capability == Capability::ReadOnly));
        let outcome = executor
            .run("write_file('x.txt', 'data')", Duration::from_secs(5), &CancellationToken::new())
            .await;
        match outcome {
            ExecutionOutcome::Failed { kind, message, .. } => {
                assert_eq!(kind, SandboxErrorKind::RuntimeFault);
                assert!(message.contains("NameError"));
            }
            other => panic!("expected NameError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_syntax_error_is_runtime_fault() {
        let (_temp, registry) = workspace();
        let outcome = run(registry, "x = (1,\n").await;
        assert!(matches!(
            outcome,
            ExecutionOutcome::Failed {
                kind: SandboxErrorKind::RuntimeFault,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_surfaced_falls_back_to_output() {
        let (_temp, registry) = workspace();
        let outcome = run(registry.clone(), "print('only output')").await;
        assert_eq!(outcome.surfaced(), "only output\n");
        assert!(outcome.to_model_content().contains("Output:\nonly output"));

        let outcome = run(registry, "print('noise')\nreturn 42").await;
        assert_eq!(outcome.surfaced(), "42");
        assert!(outcome.to_model_content().contains("Result: 42"));
    }
}
