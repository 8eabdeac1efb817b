//! Per-turn routing between direct tool calls and programmatic
//! orchestration, with the per-task orchestration guardrail.

pub mod orchestrate;
pub mod routing;

pub use orchestrate::{
    code_argument, extract_fenced_code, orchestrate_spec, orchestrate_tool_schema, ORCHESTRATE_TOOL,
};
pub use routing::{
    Declined, PolicyConfig, ReminderPolicy, Route, RoutingDecision, RoutingPolicy, LIMIT_REASON,
    ORCHESTRATION_REMINDER, SKIPPED_DETAIL,
};
