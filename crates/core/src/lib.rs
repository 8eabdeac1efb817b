//! The agent loop: drives a session from a user request to a final answer,
//! routing each model turn to direct tool calls or sandboxed orchestration.

pub mod agent_loop;
pub mod config;
pub mod events;
pub mod metrics;
pub mod prompt;
pub mod session;
pub mod summarizer;

pub use agent_loop::{AgentLoop, EngineError, FinalAnswer};
pub use config::AgentConfig;
pub use events::{AgentEvent, LoopState};
pub use metrics::{MetricsSnapshot, SessionMetrics, ToolUsage};
pub use prompt::build_system_prompt;
pub use session::Session;
pub use summarizer::ProviderSummarizer;
