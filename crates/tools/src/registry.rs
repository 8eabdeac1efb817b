use crate::traits::{Arguments, Tool, ToolCall, ToolError, ToolResult, ToolSpec};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::timeout;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, error, info, warn};

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("Tool already registered: {0}")]
    Duplicate(String),
    #[error("Tool not found: {0}")]
    NotFound(String),
}

pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    default_timeout: Duration,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            default_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, default_timeout: Duration) -> Self {
        self.default_timeout = default_timeout;
        self
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        debug!("Registered tool: {}", name);
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<dyn Tool>, RegistryError> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn spec(&self, name: &str) -> Option<ToolSpec> {
        self.tools.get(name).map(|tool| tool.spec())
    }

    /// Specs sorted by name.
    pub fn list(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.values().map(|tool| tool.spec()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub fn names(&self) -> Vec<String> {
        self.list().into_iter().map(|spec| spec.name).collect()
    }

    pub fn schemas(&self) -> Vec<Value> {
        self.list().iter().map(ToolSpec::function_schema).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Runs one call to completion. Never fails: every error becomes a
    /// failure [`ToolResult`] carrying the call's identifier.
    pub async fn invoke(&self, call: &ToolCall) -> ToolResult {
        info!("Dispatching tool: {} (call {})", call.name, call.id);
        let started = Instant::now();

        let tool = match self.lookup(&call.name) {
            Ok(tool) => tool,
            Err(e) => {
                warn!("{}", e);
                return ToolResult::failure(
                    call,
                    &ToolError::NotFound(call.name.clone()),
                    started.elapsed(),
                );
            }
        };

        let args = match validate_arguments(&tool.spec(), &call.arguments) {
            Ok(args) => args,
            Err(e) => {
                warn!("Rejected arguments for {}: {}", call.name, e);
                return ToolResult::failure(call, &e, started.elapsed());
            }
        };

        let limit = tool.timeout().unwrap_or(self.default_timeout);
        let result = execute_with_protection(tool, args, limit).await;
        let elapsed = started.elapsed();

        match result {
            Ok(payload) => {
                debug!("Tool {} succeeded in {:?}", call.name, elapsed);
                ToolResult::success(call, payload, elapsed)
            }
            Err(e) => {
                warn!("Tool {} failed: {}", call.name, e);
                ToolResult::failure(call, &e, elapsed)
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

async fn execute_with_protection(
    tool: Arc<dyn Tool>,
    args: Arguments,
    limit: Duration,
) -> Result<Value, ToolError> {
    // Spawn task to isolate panics; the task dies with the caller's future
    let mut handle = AbortOnDropHandle::new(tokio::spawn(async move { tool.execute(args).await }));

    match timeout(limit, &mut handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => {
            if join_err.is_panic() {
                error!("Tool execution panicked");
                Err(ToolError::ExecutionFailed("tool panicked".into()))
            } else {
                Err(ToolError::Cancelled)
            }
        }
        Err(_) => {
            handle.abort();
            warn!("Tool execution timed out after {:?}", limit);
            Err(ToolError::Timeout(limit))
        }
    }
}

/// Checks `args` against the declared parameters and fills in defaults.
/// `null` for an optional parameter is treated as absent.
pub fn validate_arguments(spec: &ToolSpec, args: &Arguments) -> Result<Arguments, ToolError> {
    if let Some(unknown) = args.keys().find(|key| spec.param(key).is_none()) {
        return Err(ToolError::InvalidArguments(format!(
            "unknown parameter '{}' for {}",
            unknown, spec.name
        )));
    }

    let mut validated = Arguments::new();
    for param in &spec.params {
        match args.get(&param.name) {
            Some(Value::Null) | None => {
                if param.required {
                    return Err(ToolError::InvalidArguments(format!(
                        "missing required parameter '{}' for {}",
                        param.name, spec.name
                    )));
                }
                if let Some(default) = &param.default {
                    validated.insert(param.name.clone(), default.clone());
                }
            }
            Some(value) => {
                if !param.param_type.matches(value) {
                    return Err(ToolError::InvalidArguments(format!(
                        "parameter '{}' of {} must be {}, got {}",
                        param.name,
                        spec.name,
                        param.param_type.as_str(),
                        value
                    )));
                }
                validated.insert(param.name.clone(), value.clone());
            }
        }
    }
    Ok(validated)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::traits::{Capability, FailureKind, ParamSpec, ParamType, ToolOutcome};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the message"
        }
        fn params(&self) -> Vec<ParamSpec> {
            vec![
                ParamSpec::required("message", ParamType::String, "Text to echo"),
                ParamSpec::optional("times", ParamType::Integer, "Repeat count")
                    .with_default(json!(1)),
            ]
        }
        fn capability(&self) -> Capability {
            Capability::ReadOnly
        }
        async fn execute(&self, args: Arguments) -> Result<Value, ToolError> {
            let message = args["message"].as_str().unwrap_or_default();
            let times = args["times"].as_u64().unwrap_or(1) as usize;
            Ok(json!(message.repeat(times)))
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "Sleeps"
        }
        fn params(&self) -> Vec<ParamSpec> {
            vec![]
        }
        fn capability(&self) -> Capability {
            Capability::ReadOnly
        }
        fn timeout(&self) -> Option<Duration> {
            Some(Duration::from_millis(20))
        }
        async fn execute(&self, _args: Arguments) -> Result<Value, ToolError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Value::Null)
        }
    }

    struct MarkerTool {
        finished: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Tool for MarkerTool {
        fn name(&self) -> &str {
            "marker"
        }
        fn description(&self) -> &str {
            "Sets a flag after a delay"
        }
        fn params(&self) -> Vec<ParamSpec> {
            vec![]
        }
        fn capability(&self) -> Capability {
            Capability::Mutating
        }
        async fn execute(&self, _args: Arguments) -> Result<Value, ToolError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.finished.store(true, Ordering::SeqCst);
            Ok(Value::Null)
        }
    }

    struct PanicTool;

    #[async_trait]
    impl Tool for PanicTool {
        fn name(&self) -> &str {
            "boom"
        }
        fn description(&self) -> &str {
            "Panics"
        }
        fn params(&self) -> Vec<ParamSpec> {
            vec![]
        }
        fn capability(&self) -> Capability {
            Capability::ReadOnly
        }
        async fn execute(&self, _args: Arguments) -> Result<Value, ToolError> {
            panic!("tool exploded");
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).unwrap();
        registry.register(Arc::new(SlowTool)).unwrap();
        registry.register(Arc::new(PanicTool)).unwrap();
        registry
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall::new("call_1", name, args.as_object().cloned().unwrap())
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = registry();
        let err = registry.register(Arc::new(EchoTool)).unwrap_err();
        assert_eq!(err, RegistryError::Duplicate("echo".into()));
    }

    #[test]
    fn test_lookup_unknown() {
        let registry = registry();
        assert!(matches!(
            registry.lookup("missing"),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn test_list_sorted() {
        let registry = registry();
        assert_eq!(registry.names(), vec!["boom", "echo", "slow"]);
        assert_eq!(registry.schemas().len(), 3);
    }

    #[tokio::test]
    async fn test_invoke_success_fills_defaults() {
        let registry = registry();
        let result = registry.invoke(&call("echo", json!({"message": "hi"}))).await;
        assert_eq!(result.call_id, "call_1");
        assert_eq!(result.payload(), Some(&json!("hi")));
    }

    #[tokio::test]
    async fn test_invoke_missing_required() {
        let registry = registry();
        let result = registry.invoke(&call("echo", json!({"times": 2}))).await;
        match result.outcome {
            ToolOutcome::Failure { kind, .. } => assert_eq!(kind, FailureKind::InvalidArguments),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invoke_wrong_type() {
        let registry = registry();
        let result = registry
            .invoke(&call("echo", json!({"message": "hi", "times": "two"})))
            .await;
        assert!(!result.is_success());
        assert!(result.error().unwrap().contains("must be integer"));
    }

    #[tokio::test]
    async fn test_invoke_unknown_parameter() {
        let registry = registry();
        let result = registry
            .invoke(&call("echo", json!({"message": "hi", "loud": true})))
            .await;
        assert!(result.error().unwrap().contains("unknown parameter"));
    }

    #[tokio::test]
    async fn test_invoke_unknown_tool() {
        let registry = registry();
        let result = registry.invoke(&call("nope", json!({}))).await;
        match result.outcome {
            ToolOutcome::Failure { kind, .. } => assert_eq!(kind, FailureKind::NotFound),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invoke_timeout() {
        let registry = registry();
        let result = registry.invoke(&call("slow", json!({}))).await;
        match result.outcome {
            ToolOutcome::Failure { kind, .. } => assert_eq!(kind, FailureKind::Timeout),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dropped_invocation_stops_tool() {
        let finished = Arc::new(AtomicBool::new(false));
        let mut registry = ToolRegistry::new();
        registry
            .register(Arc::new(MarkerTool {
                finished: finished.clone(),
            }))
            .unwrap();

        let marker_call = call("marker", json!({}));
        let abandoned = tokio::time::timeout(Duration::from_millis(20), registry.invoke(&marker_call)).await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_invoke_panic_isolated() {
        let registry = registry();
        let result = registry.invoke(&call("boom", json!({}))).await;
        assert!(result.error().unwrap().contains("panicked"));
    }

    #[test]
    fn test_null_optional_treated_as_absent() {
        let spec = EchoTool.spec();
        let args = json!({"message": "x", "times": null});
        let validated = validate_arguments(&spec, args.as_object().unwrap()).unwrap();
        assert_eq!(validated["times"], json!(1));
    }
}
