use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;
use thiserror::Error;

/// Named-argument mapping passed to a tool. Keys are unique by construction.
pub type Arguments = Map<String, Value>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ToolError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Tool not found: {0}")]
    NotFound(String),
    #[error("Tool timed out after {0:?}")]
    Timeout(Duration),
    #[error("Tool call cancelled")]
    Cancelled,
}

impl ToolError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ToolError::InvalidArguments(_) => FailureKind::InvalidArguments,
            ToolError::ExecutionFailed(_) => FailureKind::ExecutionFailed,
            ToolError::PermissionDenied(_) => FailureKind::PermissionDenied,
            ToolError::NotFound(_) => FailureKind::NotFound,
            ToolError::Timeout(_) => FailureKind::Timeout,
            ToolError::Cancelled => FailureKind::Cancelled,
        }
    }
}

/// Side-effect class of a tool.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ReadOnly,
    Mutating,
    Shell,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub required: bool,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn required(name: &str, param_type: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            required: true,
            description: description.to_string(),
            default: None,
        }
    }

    pub fn optional(name: &str, param_type: ParamType, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Declared shape of a tool. Parameter order is significant: positional
/// arguments are bound in this order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
    pub capability: Capability,
}

impl ToolSpec {
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn json_schema(&self) -> Value {
        let mut properties = Map::new();
        for param in &self.params {
            let mut prop = json!({
                "type": param.param_type.as_str(),
                "description": param.description,
            });
            if let Some(default) = &param.default {
                prop["default"] = default.clone();
            }
            properties.insert(param.name.clone(), prop);
        }
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required
        })
    }

    /// OpenAI function-calling schema.
    pub fn function_schema(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.json_schema()
            }
        })
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn params(&self) -> Vec<ParamSpec>;
    fn capability(&self) -> Capability;

    /// Upper bound enforced by the registry; `None` uses the registry default.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            params: self.params(),
            capability: self.capability(),
        }
    }

    async fn execute(&self, args: Arguments) -> Result<Value, ToolError>;
}

/// A request to run one tool. `id` is unique within a turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Arguments,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Arguments) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidArguments,
    ExecutionFailed,
    PermissionDenied,
    NotFound,
    Timeout,
    Cancelled,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ToolOutcome {
    Success { payload: Value },
    Failure { kind: FailureKind, detail: String },
}

/// Exactly one per dispatched [`ToolCall`], including synthesized failures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub call_id: String,
    pub tool_name: String,
    pub outcome: ToolOutcome,
    pub duration_ms: u64,
}

impl ToolResult {
    pub fn success(call: &ToolCall, payload: Value, duration: Duration) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            outcome: ToolOutcome::Success { payload },
            duration_ms: duration.as_millis() as u64,
        }
    }

    pub fn failure(call: &ToolCall, error: &ToolError, duration: Duration) -> Self {
        Self::synthesized(call, error.kind(), error.to_string(), duration)
    }

    /// Failure result for a call that never produced one of its own.
    pub fn synthesized(
        call: &ToolCall,
        kind: FailureKind,
        detail: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            outcome: ToolOutcome::Failure {
                kind,
                detail: detail.into(),
            },
            duration_ms: duration.as_millis() as u64,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Success { .. })
    }

    pub fn payload(&self) -> Option<&Value> {
        match &self.outcome {
            ToolOutcome::Success { payload } => Some(payload),
            ToolOutcome::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            ToolOutcome::Success { .. } => None,
            ToolOutcome::Failure { detail, .. } => Some(detail),
        }
    }

    /// Text handed back to the model for this result.
    pub fn to_model_content(&self) -> String {
        match &self.outcome {
            ToolOutcome::Success {
                payload: Value::String(s),
            } => s.clone(),
            ToolOutcome::Success { payload } => payload.to_string(),
            ToolOutcome::Failure { kind, detail } => {
                json!({ "error": detail, "kind": kind }).to_string()
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn spec() -> ToolSpec {
        ToolSpec {
            name: "read_file".to_string(),
            description: "Read a file".to_string(),
            params: vec![
                ParamSpec::required("path", ParamType::String, "File path"),
                ParamSpec::optional("limit", ParamType::Integer, "Max lines")
                    .with_default(json!(2000)),
            ],
            capability: Capability::ReadOnly,
        }
    }

    #[test]
    fn test_json_schema_lists_required_params() {
        let schema = spec().json_schema();
        assert_eq!(schema["required"], json!(["path"]));
        assert_eq!(schema["properties"]["limit"]["default"], json!(2000));
        assert_eq!(schema["properties"]["path"]["type"], "string");
    }

    #[test]
    fn test_function_schema_shape() {
        let schema = spec().function_schema();
        assert_eq!(schema["type"], "function");
        assert_eq!(schema["function"]["name"], "read_file");
    }

    #[test]
    fn test_param_type_matching() {
        assert!(ParamType::Integer.matches(&json!(3)));
        assert!(!ParamType::Integer.matches(&json!(3.5)));
        assert!(ParamType::Number.matches(&json!(3)));
        assert!(!ParamType::String.matches(&json!(null)));
    }

    #[test]
    fn test_failure_result_content() {
        let call = ToolCall::new("c1", "shell", Arguments::new());
        let result = ToolResult::failure(
            &call,
            &ToolError::PermissionDenied("blocked".into()),
            Duration::from_millis(3),
        );
        assert!(!result.is_success());
        assert_eq!(result.call_id, "c1");
        assert_eq!(result.duration_ms, 3);
        let content: Value = serde_json::from_str(&result.to_model_content()).unwrap();
        assert_eq!(content["kind"], "permission_denied");
    }

    #[test]
    fn test_outcome_serialization_is_tagged() {
        let outcome = ToolOutcome::Success { payload: json!(1) };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["status"], "success");
    }
}
