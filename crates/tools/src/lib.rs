pub mod args;
pub mod file_tools;
pub mod git_tools;
pub mod guard;
pub mod process_tools;
pub mod registry;
pub mod search_tools;
pub mod traits;

pub use guard::{CommandGuard, WorkspaceGuard};
pub use registry::{validate_arguments, RegistryError, ToolRegistry};
pub use traits::{
    Arguments, Capability, FailureKind, ParamSpec, ParamType, Tool, ToolCall, ToolError,
    ToolOutcome, ToolResult, ToolSpec,
};

use file_tools::{EditFileTool, ReadFileTool, WriteFileTool};
use git_tools::{GitCommand, GitTool};
use process_tools::{ExecuteCodeTool, ShellTool};
use search_tools::{GlobTool, GrepTool};
use std::path::PathBuf;
use std::sync::Arc;

/// Registry holding the full built-in tool set rooted at `workspace`.
pub fn default_registry(workspace: impl Into<PathBuf>) -> Result<ToolRegistry, RegistryError> {
    let guard = WorkspaceGuard::new(workspace);
    let mut registry = ToolRegistry::new();

    registry.register(Arc::new(ReadFileTool::new(guard.clone())))?;
    registry.register(Arc::new(WriteFileTool::new(guard.clone())))?;
    registry.register(Arc::new(EditFileTool::new(guard.clone())))?;
    registry.register(Arc::new(ShellTool::new(guard.clone(), CommandGuard::new())))?;
    registry.register(Arc::new(ExecuteCodeTool::new(guard.clone())))?;
    registry.register(Arc::new(GlobTool::new(guard.clone())))?;
    registry.register(Arc::new(GrepTool::new(guard.clone())))?;
    for command in GitCommand::ALL {
        registry.register(Arc::new(GitTool::new(guard.clone(), command)))?;
    }

    Ok(registry)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_contents() {
        let temp = tempfile::TempDir::new().unwrap();
        let registry = default_registry(temp.path()).unwrap();
        assert_eq!(registry.len(), 13);
        assert!(registry.contains("read_file"));
        assert!(registry.contains("git_commit"));
        assert!(!registry.contains("orchestrate"));
    }
}
