use crate::orchestrate::{code_argument, extract_fenced_code, ORCHESTRATE_TOOL};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use synlogos_providers::ModelResponse;
use synlogos_tools::{FailureKind, ToolCall, ToolResult};
use tracing::{debug, warn};

pub const LIMIT_REASON: &str = "orchestration limit reached";
pub const SKIPPED_DETAIL: &str = "skipped: orchestration took precedence";
pub const EXTRA_BLOCK_DETAIL: &str = "skipped: only one orchestration block is run per turn";
pub const MALFORMED_DETAIL: &str = "orchestrate requires a non-empty string argument `code`";

/// Injected after an orchestration result has been folded.
pub const ORCHESTRATION_REMINDER: &str = "The orchestration has run and its results are above. \
Do not orchestrate again for this task. Answer the user with the actual results now, or use a \
direct tool call if something is still missing. If something failed, explain what went wrong.";

/// When the soft reminder is injected.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReminderPolicy {
    /// Remind right after every orchestration result and reject later attempts.
    #[default]
    AfterOrchestration,
    /// Only remind when an attempt is rejected.
    OnRejectOnly,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PolicyConfig {
    /// Orchestrations allowed per task.
    pub orchestration_limit: usize,
    /// Capacity of the recent-tool ring buffer.
    pub recent_tools: usize,
    pub reminder_policy: ReminderPolicy,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            orchestration_limit: 1,
            recent_tools: 8,
            reminder_policy: ReminderPolicy::default(),
        }
    }
}

/// How a model turn is executed.
#[derive(Debug, Clone, PartialEq)]
pub enum RoutingDecision {
    Direct(Vec<ToolCall>),
    Orchestrate {
        code: String,
        /// Id of the orchestrate tool call; `None` for a fenced block.
        call_id: Option<String>,
    },
    Reject(String),
    FinalAnswer,
}

impl RoutingDecision {
    pub fn label(&self) -> &'static str {
        match self {
            RoutingDecision::Direct(_) => "direct",
            RoutingDecision::Orchestrate { .. } => "orchestrate",
            RoutingDecision::Reject(_) => "reject",
            RoutingDecision::FinalAnswer => "final_answer",
        }
    }
}

/// A tool call from the response that is answered with a synthesized
/// failure instead of being run.
#[derive(Debug, Clone, PartialEq)]
pub struct Declined {
    pub call: ToolCall,
    pub kind: FailureKind,
    pub detail: String,
}

impl Declined {
    fn new(call: &ToolCall, kind: FailureKind, detail: &str) -> Self {
        Self {
            call: call.clone(),
            kind,
            detail: detail.to_string(),
        }
    }

    pub fn to_result(&self) -> ToolResult {
        ToolResult::synthesized(&self.call, self.kind, self.detail.clone(), Duration::ZERO)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub decision: RoutingDecision,
    pub declined: Vec<Declined>,
    /// Set when a code block was ignored in favour of direct calls.
    pub warning: Option<String>,
}

impl Route {
    pub fn is_final(&self) -> bool {
        self.decision == RoutingDecision::FinalAnswer
    }
}

/// Per-session routing state: the per-task orchestration guardrail and the
/// names of recently used tools.
#[derive(Debug, Clone)]
pub struct RoutingPolicy {
    config: PolicyConfig,
    orchestrations: usize,
    recent: VecDeque<String>,
}

impl RoutingPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self {
            config,
            orchestrations: 0,
            recent: VecDeque::with_capacity(config.recent_tools),
        }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Resets the guardrail for a new user request. Recent tools persist.
    pub fn begin_task(&mut self) {
        self.orchestrations = 0;
    }

    pub fn orchestrations(&self) -> usize {
        self.orchestrations
    }

    pub fn can_orchestrate(&self) -> bool {
        self.orchestrations < self.config.orchestration_limit
    }

    pub fn recent_tools(&self) -> impl Iterator<Item = &str> {
        self.recent.iter().map(String::as_str)
    }

    pub fn record_tool(&mut self, name: &str) {
        if self.config.recent_tools == 0 {
            return;
        }
        while self.recent.len() >= self.config.recent_tools {
            self.recent.pop_front();
        }
        self.recent.push_back(name.to_string());
    }

    /// Classifies a response without touching any state.
    pub fn decide(&self, response: &ModelResponse) -> Route {
        let mut direct = Vec::new();
        let mut declined = Vec::new();
        let mut block: Option<(String, Option<String>)> = None;
        let mut block_call: Option<&ToolCall> = None;

        for call in &response.tool_calls {
            if call.name != ORCHESTRATE_TOOL {
                direct.push(call.clone());
                continue;
            }
            match code_argument(call) {
                None => declined.push(Declined::new(
                    call,
                    FailureKind::InvalidArguments,
                    MALFORMED_DETAIL,
                )),
                Some(_) if block.is_some() => declined.push(Declined::new(
                    call,
                    FailureKind::Skipped,
                    EXTRA_BLOCK_DETAIL,
                )),
                Some(code) => {
                    block = Some((code.to_string(), Some(call.id.clone())));
                    block_call = Some(call);
                }
            }
        }
        if block.is_none() {
            block = extract_fenced_code(&response.text).map(|code| (code, None));
        }

        let Some((code, call_id)) = block else {
            let decision = if direct.is_empty() && declined.is_empty() {
                RoutingDecision::FinalAnswer
            } else {
                RoutingDecision::Direct(direct)
            };
            return Route {
                decision,
                declined,
                warning: None,
            };
        };

        if self.can_orchestrate() {
            declined.extend(
                direct
                    .iter()
                    .map(|call| Declined::new(call, FailureKind::Skipped, SKIPPED_DETAIL)),
            );
            return Route {
                decision: RoutingDecision::Orchestrate { code, call_id },
                declined,
                warning: None,
            };
        }

        if let Some(call) = block_call {
            declined.push(Declined::new(call, FailureKind::PermissionDenied, LIMIT_REASON));
        }
        if direct.is_empty() {
            Route {
                decision: RoutingDecision::Reject(LIMIT_REASON.to_string()),
                declined,
                warning: None,
            }
        } else {
            Route {
                decision: RoutingDecision::Direct(direct),
                declined,
                warning: Some(format!(
                    "Ignored orchestration block: limit of {} per task reached",
                    self.config.orchestration_limit
                )),
            }
        }
    }

    /// Decides and updates the guardrail and recent-tool state.
    pub fn route(&mut self, response: &ModelResponse) -> Route {
        let route = self.decide(response);
        match &route.decision {
            RoutingDecision::Orchestrate { .. } => {
                self.orchestrations += 1;
                self.record_tool(ORCHESTRATE_TOOL);
            }
            RoutingDecision::Direct(calls) => {
                for call in calls {
                    self.record_tool(&call.name);
                }
            }
            RoutingDecision::Reject(reason) => {
                warn!("Guardrail rejected orchestration: {}", reason);
            }
            RoutingDecision::FinalAnswer => {}
        }
        if let Some(warning) = &route.warning {
            warn!("{}", warning);
        }
        debug!(
            "Routed turn as {} ({} declined, {}/{} orchestrations)",
            route.decision.label(),
            route.declined.len(),
            self.orchestrations,
            self.config.orchestration_limit
        );
        route
    }

    /// Soft reminder to append after an orchestration result, if any.
    pub fn reminder_after_orchestration(&self) -> Option<&'static str> {
        match self.config.reminder_policy {
            ReminderPolicy::AfterOrchestration => Some(ORCHESTRATION_REMINDER),
            ReminderPolicy::OnRejectOnly => None,
        }
    }

    /// System reminder appended when an orchestration attempt is rejected.
    pub fn reject_reminder(&self) -> String {
        format!(
            "Orchestration limit reached ({} per task); the code was not run. \
             Use direct tool calls or give your final answer.",
            self.config.orchestration_limit
        )
    }
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self::new(PolicyConfig::default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::{json, Value};

    fn call(id: &str, name: &str, args: Value) -> ToolCall {
        ToolCall::new(id, name, args.as_object().cloned().unwrap())
    }

    fn orchestrate(id: &str, code: &str) -> ToolCall {
        call(id, ORCHESTRATE_TOOL, json!({ "code": code }))
    }

    fn read(id: &str) -> ToolCall {
        call(id, "read_file", json!({ "path": "a.txt" }))
    }

    #[test]
    fn test_plain_text_is_final_answer() {
        let policy = RoutingPolicy::default();
        let route = policy.decide(&ModelResponse::text("4"));
        assert!(route.is_final());
        assert!(route.declined.is_empty());
    }

    #[test]
    fn test_direct_calls() {
        let mut policy = RoutingPolicy::default();
        let route = policy.route(&ModelResponse::with_tool_calls(vec![read("c1"), read("c2")]));
        assert_eq!(route.decision, RoutingDecision::Direct(vec![read("c1"), read("c2")]));
        assert_eq!(policy.recent_tools().collect::<Vec<_>>(), vec!["read_file", "read_file"]);
        assert_eq!(policy.orchestrations(), 0);
    }

    #[test]
    fn test_orchestration_then_reject() {
        let mut policy = RoutingPolicy::default();
        let response = ModelResponse::with_tool_calls(vec![orchestrate("o1", "print(1)")]);

        let first = policy.route(&response);
        assert_eq!(
            first.decision,
            RoutingDecision::Orchestrate {
                code: "print(1)".into(),
                call_id: Some("o1".into())
            }
        );
        assert_eq!(policy.orchestrations(), 1);

        let second = policy.route(&response);
        assert_eq!(second.decision, RoutingDecision::Reject(LIMIT_REASON.into()));
        assert_eq!(second.declined.len(), 1);
        assert_eq!(second.declined[0].kind, FailureKind::PermissionDenied);
        assert_eq!(policy.orchestrations(), 1);

        policy.begin_task();
        assert!(policy.can_orchestrate());
    }

    #[test]
    fn test_fenced_block_routes_to_orchestration() {
        let policy = RoutingPolicy::default();
        let response = ModelResponse::text("Working on it\n```orchestrate\nprint(2)\n```");
        assert_eq!(
            policy.decide(&response).decision,
            RoutingDecision::Orchestrate {
                code: "print(2)".into(),
                call_id: None
            }
        );
    }

    #[test]
    fn test_orchestration_wins_tie_while_allowed() {
        let policy = RoutingPolicy::default();
        let response =
            ModelResponse::with_tool_calls(vec![read("c1"), orchestrate("o1", "print(1)")]);
        let route = policy.decide(&response);
        assert!(matches!(route.decision, RoutingDecision::Orchestrate { .. }));
        assert_eq!(route.declined.len(), 1);
        assert_eq!(route.declined[0].call.id, "c1");
        assert_eq!(route.declined[0].detail, SKIPPED_DETAIL);
        assert_eq!(route.declined[0].to_result().error(), Some(SKIPPED_DETAIL));
    }

    #[test]
    fn test_direct_calls_honored_once_exhausted() {
        let mut policy = RoutingPolicy::default();
        policy.route(&ModelResponse::text("```orchestrate\nprint(1)\n```"));

        let response =
            ModelResponse::with_tool_calls(vec![read("c1"), orchestrate("o2", "print(1)")]);
        let route = policy.route(&response);
        assert_eq!(route.decision, RoutingDecision::Direct(vec![read("c1")]));
        assert!(route.warning.is_some());
        assert_eq!(route.declined[0].call.id, "o2");
    }

    #[test]
    fn test_malformed_and_extra_blocks_declined() {
        let policy = RoutingPolicy::default();
        let response = ModelResponse::with_tool_calls(vec![
            call("bad", ORCHESTRATE_TOOL, json!({ "script": "x" })),
            orchestrate("o1", "print(1)"),
            orchestrate("o2", "print(2)"),
        ]);
        let route = policy.decide(&response);
        assert!(matches!(
            route.decision,
            RoutingDecision::Orchestrate { ref call_id, .. } if call_id.as_deref() == Some("o1")
        ));
        let kinds: Vec<_> = route.declined.iter().map(|d| (d.call.id.as_str(), d.kind)).collect();
        assert_eq!(
            kinds,
            vec![("bad", FailureKind::InvalidArguments), ("o2", FailureKind::Skipped)]
        );

        let only_bad = ModelResponse::with_tool_calls(vec![call("bad", ORCHESTRATE_TOOL, json!({}))]);
        let route = policy.decide(&only_bad);
        assert_eq!(route.decision, RoutingDecision::Direct(vec![]));
        assert_eq!(route.declined.len(), 1);
    }

    #[test]
    fn test_recent_tools_ring_buffer() {
        let mut policy = RoutingPolicy::new(PolicyConfig {
            recent_tools: 2,
            ..PolicyConfig::default()
        });
        for name in ["a", "b", "c"] {
            policy.record_tool(name);
        }
        assert_eq!(policy.recent_tools().collect::<Vec<_>>(), vec!["b", "c"]);
        policy.begin_task();
        assert_eq!(policy.recent_tools().count(), 2);
    }

    #[test]
    fn test_reminder_policy() {
        let policy = RoutingPolicy::default();
        assert_eq!(policy.reminder_after_orchestration(), Some(ORCHESTRATION_REMINDER));
        let quiet = RoutingPolicy::new(PolicyConfig {
            reminder_policy: ReminderPolicy::OnRejectOnly,
            ..PolicyConfig::default()
        });
        assert!(quiet.reminder_after_orchestration().is_none());
        assert!(quiet.reject_reminder().contains("1 per task"));
    }

    fn arb_response() -> impl Strategy<Value = ModelResponse> {
        let arb_call = prop_oneof![
            (0u8..4).prop_map(|i| read(&format!("r{i}"))),
            (0u8..4).prop_map(|i| orchestrate(&format!("o{i}"), "print(1)")),
            Just(call("m", ORCHESTRATE_TOOL, json!({}))),
        ];
        (
            prop::collection::vec(arb_call, 0..4),
            prop::bool::ANY,
        )
            .prop_map(|(calls, fenced)| {
                let text = if fenced { "```orchestrate\nprint(0)\n```" } else { "done" };
                ModelResponse {
                    text: text.to_string(),
                    tool_calls: calls,
                    ..ModelResponse::default()
                }
            })
    }

    proptest! {
        #[test]
        fn prop_routing_is_deterministic(
            responses in prop::collection::vec(arb_response(), 0..6),
            probe in arb_response(),
        ) {
            let mut policy = RoutingPolicy::default();
            for response in &responses {
                policy.route(response);
            }
            let copy = policy.clone();
            prop_assert_eq!(policy.decide(&probe), copy.decide(&probe));
            prop_assert_eq!(policy.route(&probe), copy.clone().route(&probe));
        }

        #[test]
        fn prop_never_exceeds_limit(
            limit in 0usize..3,
            responses in prop::collection::vec(arb_response(), 0..12),
        ) {
            let mut policy = RoutingPolicy::new(PolicyConfig {
                orchestration_limit: limit,
                ..PolicyConfig::default()
            });
            let mut orchestrated = 0;
            for response in &responses {
                if matches!(policy.route(response).decision, RoutingDecision::Orchestrate { .. }) {
                    orchestrated += 1;
                }
                prop_assert!(policy.orchestrations() <= limit);
            }
            prop_assert!(orchestrated <= limit);
        }

        #[test]
        fn prop_every_call_is_run_or_declined(response in arb_response()) {
            let policy = RoutingPolicy::default();
            let route = policy.decide(&response);
            let mut answered: Vec<String> =
                route.declined.iter().map(|d| d.call.id.clone()).collect();
            match &route.decision {
                RoutingDecision::Direct(calls) => answered.extend(calls.iter().map(|c| c.id.clone())),
                RoutingDecision::Orchestrate { call_id: Some(id), .. } => answered.push(id.clone()),
                _ => {}
            }
            prop_assert_eq!(answered.len(), response.tool_calls.len());
        }
    }
}
