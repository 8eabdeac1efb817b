use serde_json::Value;
use synlogos_tools::{Capability, ParamSpec, ParamType, ToolCall, ToolSpec};

/// Name of the pseudo-tool through which the model submits orchestration
/// code. It never lives in the tool registry.
pub const ORCHESTRATE_TOOL: &str = "orchestrate";

/// Info string of a fenced block carrying orchestration code.
pub const FENCE_TAG: &str = "orchestrate";

pub fn orchestrate_spec() -> ToolSpec {
    ToolSpec {
        name: ORCHESTRATE_TOOL.to_string(),
        description: "Run Python code that calls several tools with `await` and reports only \
                      the final result. Use it for multi-step work; simple requests should use \
                      a single direct tool call."
            .to_string(),
        params: vec![ParamSpec::required(
            "code",
            ParamType::String,
            "Python code to execute. Tools are async functions; print() or `result` carries the answer.",
        )],
        capability: Capability::Shell,
    }
}

/// OpenAI function schema advertised next to the registry tools.
pub fn orchestrate_tool_schema() -> Value {
    orchestrate_spec().function_schema()
}

/// The `code` argument of an orchestrate call, when it is a non-blank string.
pub fn code_argument(call: &ToolCall) -> Option<&str> {
    call.arguments
        .get("code")
        .and_then(Value::as_str)
        .filter(|code| !code.trim().is_empty())
}

/// First ```` ```orchestrate ```` block in `text`. An unterminated fence
/// runs to the end of the text.
pub fn extract_fenced_code(text: &str) -> Option<String> {
    let mut lines = text.lines();
    lines.by_ref().find(|line| {
        line.trim()
            .strip_prefix("```")
            .is_some_and(|info| info.trim() == FENCE_TAG)
    })?;

    let body: Vec<&str> = lines
        .take_while(|line| !line.trim_start().starts_with("```"))
        .collect();
    let code = body.join("\n");
    if code.trim().is_empty() {
        None
    } else {
        Some(code)
    }
}
