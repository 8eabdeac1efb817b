use crate::config::AgentConfig;
use crate::events::{AgentEvent, EventSink, LoopState};
use crate::session::Session;
use crate::summarizer::ProviderSummarizer;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use synlogos_executor::{ExecutionOutcome, SandboxConfig, SandboxExecutor};
use synlogos_memory::Message;
use synlogos_policy::{orchestrate_tool_schema, Declined, Route, RoutingDecision};
use synlogos_providers::{CompletionRequest, ModelProvider, ModelResponse, ProviderError};
use synlogos_tools::{FailureKind, ToolCall, ToolRegistry, ToolResult, ToolSpec};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Provider error: {0}. Check the endpoint, model name and API key, then try again")]
    Provider(ProviderError),
    #[error("No final answer after {0} turns. Narrow the request or raise runtime.max_turns")]
    TurnLimit(usize),
    #[error("Task cancelled. The conversation up to the cancellation is kept")]
    Cancelled,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FinalAnswer {
    pub text: String,
    /// Model turns used by the task.
    pub turns: usize,
    /// Tool calls executed, direct and orchestrated.
    pub tool_calls: usize,
}

struct OrchestrationRun {
    call_id: Option<String>,
    outcome: ExecutionOutcome,
    duration_ms: u64,
}

/// Effects of one dispatch, waiting to be folded into the session.
#[derive(Default)]
struct Dispatch {
    direct: Vec<ToolResult>,
    declined: Vec<ToolResult>,
    orchestration: Option<OrchestrationRun>,
    reminder: Option<String>,
    /// Call ids in the order the model issued them.
    order: Vec<String>,
}

impl Dispatch {
    fn executed_calls(&self) -> usize {
        self.direct.len()
            + self
                .orchestration
                .as_ref()
                .map_or(0, |run| run.outcome.tool_results().len())
    }
}

/// Drives a session from a user request to a final answer: model turn,
/// routing, dispatch, fold, repeat.
pub struct AgentLoop {
    provider: Arc<dyn ModelProvider>,
    registry: Arc<ToolRegistry>,
    executor: SandboxExecutor,
    config: AgentConfig,
    schemas: Vec<Value>,
    events: EventSink,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        registry: Arc<ToolRegistry>,
        config: AgentConfig,
    ) -> Self {
        let executor = SandboxExecutor::new(
            registry.clone(),
            SandboxConfig {
                timeout: config.sandbox_timeout(),
                ..SandboxConfig::default()
            },
        );
        let mut schemas = registry.schemas();
        schemas.push(orchestrate_tool_schema());

        Self {
            provider,
            registry,
            executor,
            config,
            schemas,
            events: EventSink::default(),
        }
    }

    pub fn with_events(mut self, sender: UnboundedSender<AgentEvent>) -> Self {
        self.events = EventSink::new(sender);
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Tools callable from orchestration code.
    pub fn namespace(&self) -> Vec<ToolSpec> {
        self.executor.namespace()
    }

    pub async fn submit(&self, session: &mut Session, text: &str) -> Result<FinalAnswer, EngineError> {
        info!("Starting task for session: {}", session.id());
        session.policy.begin_task();
        session.turns = 0;
        session.metrics.record_prompt();
        session.context.append(Message::user(text));

        let mut tool_calls = 0;
        loop {
            self.transition(session, LoopState::AwaitingModel);
            if session.cancel.is_cancelled() {
                return Err(self.abort(session, EngineError::Cancelled));
            }
            session.turns += 1;
            if session.turns > self.config.max_turns {
                return Err(self.abort(session, EngineError::TurnLimit(self.config.max_turns)));
            }
            debug!("Turn {}/{}", session.turns, self.config.max_turns);

            let response = match self.complete(session).await {
                Ok(response) => response,
                Err(e) => return Err(self.abort(session, e)),
            };
            self.record_response(session, &response);

            let route = session.policy.route(&response);
            if let Some(warning) = &route.warning {
                session.metrics.record_warning(warning.clone());
                self.events.emit(AgentEvent::Warning {
                    message: warning.clone(),
                });
            }
            if route.is_final() {
                self.transition(session, LoopState::Completed);
                info!(
                    "Task completed in {} turn(s) with {} tool call(s)",
                    session.turns, tool_calls
                );
                return Ok(FinalAnswer {
                    text: response.text,
                    turns: session.turns,
                    tool_calls,
                });
            }

            self.transition(session, LoopState::Dispatching);
            let mut dispatch = self.dispatch(session, route).await;
            dispatch.order = response.tool_calls.iter().map(|call| call.id.clone()).collect();
            tool_calls += dispatch.executed_calls();

            self.transition(session, LoopState::FoldingResult);
            self.fold(session, dispatch).await;
        }
    }

    fn transition(&self, session: &Session, state: LoopState) {
        debug!("Loop state: {:?} (turn {})", state, session.turns);
        self.events.emit(AgentEvent::StateChanged {
            state,
            turn: session.turns,
        });
    }

    fn abort(&self, session: &Session, error: EngineError) -> EngineError {
        match &error {
            EngineError::Cancelled => warn!("Task cancelled for session: {}", session.id()),
            _ => error!("Task aborted for session {}: {}", session.id(), error),
        }
        self.transition(session, LoopState::Aborted);
        error
    }

    /// One provider call with a single retry for transient failures.
    async fn complete(&self, session: &Session) -> Result<ModelResponse, EngineError> {
        match self.request(session).await {
            Err(EngineError::Provider(e)) if e.is_transient() => {
                warn!("Provider call failed ({}), retrying once", e);
                self.request(session).await
            }
            other => other,
        }
    }

    async fn request(&self, session: &Session) -> Result<ModelResponse, EngineError> {
        session.metrics.record_provider_request();
        let request = CompletionRequest::new(session.context.messages(), &self.schemas);
        let timeout = self.config.provider_timeout();

        let result = tokio::select! {
            biased;
            _ = session.cancel.cancelled() => return Err(EngineError::Cancelled),
            result = tokio::time::timeout(timeout, self.provider.complete(request)) => {
                result.unwrap_or_else(|_| Err(ProviderError::Timeout(timeout)))
            }
        };
        result.map_err(|e| {
            session.metrics.record_provider_failure();
            EngineError::Provider(e)
        })
    }

    fn record_response(&self, session: &mut Session, response: &ModelResponse) {
        let mut message = Message::assistant(response.text.clone(), response.tool_calls.clone());
        if let Some(usage) = response.usage {
            session.usage.add(usage);
            session.context.observe_prompt_tokens(usage.prompt_tokens);
            message = message.with_token_count(usage.completion_tokens);
            self.events.emit(AgentEvent::TokenUsage {
                usage: session.usage,
            });
        }
        session.context.append(message);

        if !response.text.is_empty() {
            self.events.emit(AgentEvent::Response {
                text: response.text.clone(),
            });
        }
    }

    async fn dispatch(&self, session: &Session, route: Route) -> Dispatch {
        let mut dispatch = Dispatch {
            declined: route.declined.iter().map(Declined::to_result).collect(),
            ..Dispatch::default()
        };

        match route.decision {
            RoutingDecision::Direct(calls) => {
                dispatch.direct = self.run_direct(session, calls).await;
            }
            RoutingDecision::Orchestrate { code, call_id } => {
                info!("Running orchestration for session: {}", session.id());
                self.events.emit(AgentEvent::OrchestrationStarted { code: code.clone() });
                let started = Instant::now();
                let outcome = self
                    .executor
                    .run(&code, self.executor.config().timeout, &session.cancel)
                    .await;
                self.events.emit(AgentEvent::OrchestrationFinished {
                    outcome: outcome.clone(),
                });
                dispatch.orchestration = Some(OrchestrationRun {
                    call_id,
                    outcome,
                    duration_ms: started.elapsed().as_millis() as u64,
                });
                dispatch.reminder = session.policy.reminder_after_orchestration().map(str::to_string);
            }
            RoutingDecision::Reject(reason) => {
                session.metrics.record_rejection();
                self.events.emit(AgentEvent::GuardrailRejected { reason });
                dispatch.reminder = Some(session.policy.reject_reminder());
            }
            RoutingDecision::FinalAnswer => {}
        }
        dispatch
    }

    /// Runs calls one at a time in issue order. Once cancelled, the rest
    /// are answered without running.
    async fn run_direct(&self, session: &Session, calls: Vec<ToolCall>) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            debug!("Direct call {} for session: {}", call.id, session.id());
            self.events.emit(AgentEvent::ToolCall { call: call.clone() });

            let started = Instant::now();
            let result = tokio::select! {
                biased;
                _ = session.cancel.cancelled() => ToolResult::synthesized(
                    &call,
                    FailureKind::Cancelled,
                    "tool call cancelled",
                    started.elapsed(),
                ),
                result = self.registry.invoke(&call) => result,
            };
            if let Some(error) = result.error() {
                debug!("Tool {} failed: {}", call.name, error);
            }
            self.events.emit(AgentEvent::ToolResult {
                result: result.clone(),
            });
            results.push(result);
        }
        results
    }

    async fn fold(&self, session: &mut Session, dispatch: Dispatch) {
        let mut replies: Vec<(Option<String>, String)> = Vec::new();
        for result in &dispatch.declined {
            session.metrics.record_tool_result(result);
            self.events.emit(AgentEvent::ToolResult {
                result: result.clone(),
            });
            replies.push((Some(result.call_id.clone()), result.to_model_content()));
        }

        for result in &dispatch.direct {
            session.metrics.record_direct(result);
            replies.push((Some(result.call_id.clone()), result.to_model_content()));
        }

        if let Some(run) = dispatch.orchestration {
            for result in run.outcome.tool_results() {
                session.metrics.record_tool_result(result);
                session.policy.record_tool(&result.tool_name);
            }
            session
                .metrics
                .record_orchestration(run.outcome.is_completed(), run.duration_ms);
            replies.push((run.call_id, run.outcome.to_model_content()));
        }

        // Replies follow the assistant's tool_calls; a fenced block has no call and goes last
        replies.sort_by_key(|(call_id, _)| {
            call_id
                .as_ref()
                .and_then(|id| dispatch.order.iter().position(|issued| issued == id))
                .unwrap_or(usize::MAX)
        });
        for (call_id, content) in replies {
            session.context.append(Message::tool(call_id, content));
        }

        if let Some(reminder) = dispatch.reminder {
            session.context.append(Message::system(reminder));
        }

        if session.context.needs_compaction() {
            let summarizer =
                ProviderSummarizer::new(self.provider.as_ref(), self.config.provider_timeout());
            if let Some(report) = session.context.compact(&summarizer).await {
                session.metrics.record_compaction();
                self.events.emit(AgentEvent::Compacted { report });
            }
        }
    }
}
