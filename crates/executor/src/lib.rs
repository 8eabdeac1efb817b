//! Sandboxed execution of model-authored orchestration code.
//!
//! Scripts are written in a small Python-flavoured language and run by an
//! async interpreter whose only side effects are calls into the tool
//! registry.

pub mod ast;
mod builtins;
pub mod error;
pub mod interpreter;
pub mod lexer;
mod methods;
pub mod normalize;
pub mod parser;
pub mod prompt;
pub mod sandbox;
pub mod value;

pub use error::{SandboxErrorKind, ScriptError};
pub use interpreter::{CallLog, Interpreter, Limits, Trace};
pub use normalize::normalize_arguments;
pub use parser::parse_program;
pub use prompt::orchestration_guide;
pub use sandbox::{ExecutionOutcome, SandboxConfig, SandboxExecutor, DEFAULT_SANDBOX_TIMEOUT, RESERVED_NAMES};
