pub mod arguments;
pub mod openai_compatible;
pub mod scripted;
pub mod traits;
pub mod usage;

pub use arguments::clean_tool_arguments;
pub use openai_compatible::OpenAICompatibleProvider;
pub use scripted::{ScriptedProvider, ScriptedResponse};
pub use traits::{CompletionRequest, ModelProvider, ModelResponse, ProviderError, Usage};
pub use usage::TokenUsage;
