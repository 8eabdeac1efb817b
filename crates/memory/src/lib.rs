pub mod compactor;
pub mod context_manager;
pub mod transcript;
pub mod types;

pub use compactor::{CompactionConfig, CompactionError, CompactionPlan, Summarizer};
pub use context_manager::{CompactionReport, ContextManager};
pub use transcript::Transcript;
pub use types::*;
