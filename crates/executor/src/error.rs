use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while parsing or interpreting a script.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScriptError {
    #[error("SyntaxError (line {line}): {message}")]
    Syntax { line: usize, message: String },
    /// Recoverable by `try`/`except` inside the script.
    #[error("{0}")]
    Runtime(String),
    /// Resource limit hit; never caught by the script.
    #[error("LimitExceeded: {0}")]
    Limit(String),
}

impl ScriptError {
    pub fn runtime(message: impl Into<String>) -> Self {
        ScriptError::Runtime(message.into())
    }

    pub fn is_catchable(&self) -> bool {
        matches!(self, ScriptError::Runtime(_))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SandboxErrorKind {
    Timeout,
    RuntimeFault,
    Cancelled,
}

impl std::fmt::Display for SandboxErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            SandboxErrorKind::Timeout => "timeout",
            SandboxErrorKind::RuntimeFault => "runtime fault",
            SandboxErrorKind::Cancelled => "cancelled",
        };
        f.write_str(kind)
    }
}
