use crate::args::{bool_arg, str_arg, u64_arg};
use crate::guard::WorkspaceGuard;
use crate::traits::{Arguments, Capability, ParamSpec, ParamType, Tool, ToolError};
use async_trait::async_trait;
use serde_json::{json, Value};

pub struct ReadFileTool {
    guard: WorkspaceGuard,
}

impl ReadFileTool {
    pub fn new(guard: WorkspaceGuard) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file. Lines are returned numbered from `offset`."
    }

    fn params(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("path", ParamType::String, "Path to the file"),
            ParamSpec::optional("offset", ParamType::Integer, "Line to start from (1-indexed)")
                .with_default(json!(1)),
            ParamSpec::optional("limit", ParamType::Integer, "Max lines to read")
                .with_default(json!(2000)),
        ]
    }

    fn capability(&self) -> Capability {
        Capability::ReadOnly
    }

    async fn execute(&self, args: Arguments) -> Result<Value, ToolError> {
        let path = str_arg(&args, "path")?;
        let offset = u64_arg(&args, "offset", 1).max(1) as usize;
        let limit = u64_arg(&args, "limit", 2000) as usize;

        let full_path = self.guard.resolve(path)?;
        if !full_path.exists() {
            return Err(ToolError::ExecutionFailed(format!("File not found: {}", path)));
        }

        let content = tokio::fs::read_to_string(&full_path)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        let numbered: String = content
            .lines()
            .enumerate()
            .skip(offset - 1)
            .take(limit)
            .map(|(i, line)| format!("{}: {}\n", i + 1, line))
            .collect();

        Ok(Value::String(numbered))
    }
}

pub struct WriteFileTool {
    guard: WorkspaceGuard,
}

impl WriteFileTool {
    pub fn new(guard: WorkspaceGuard) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating parent directories as needed"
    }

    fn params(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("path", ParamType::String, "Path to the file"),
            ParamSpec::required("content", ParamType::String, "Content to write"),
        ]
    }

    fn capability(&self) -> Capability {
        Capability::Mutating
    }

    async fn execute(&self, args: Arguments) -> Result<Value, ToolError> {
        let path = str_arg(&args, "path")?;
        let content = str_arg(&args, "content")?;

        let full_path = self.guard.resolve(path)?;
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        }

        tokio::fs::write(&full_path, content)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        Ok(json!(format!(
            "Successfully wrote {} chars to {}",
            content.chars().count(),
            path
        )))
    }
}

pub struct EditFileTool {
    guard: WorkspaceGuard,
}

impl EditFileTool {
    pub fn new(guard: WorkspaceGuard) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace an exact string in a file"
    }

    fn params(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("path", ParamType::String, "Path to the file"),
            ParamSpec::required("old_string", ParamType::String, "Exact text to replace"),
            ParamSpec::required("new_string", ParamType::String, "Replacement text"),
            ParamSpec::optional("replace_all", ParamType::Boolean, "Replace every occurrence")
                .with_default(json!(false)),
        ]
    }

    fn capability(&self) -> Capability {
        Capability::Mutating
    }

    async fn execute(&self, args: Arguments) -> Result<Value, ToolError> {
        let path = str_arg(&args, "path")?;
        let old_string = str_arg(&args, "old_string")?;
        let new_string = str_arg(&args, "new_string")?;
        let replace_all = bool_arg(&args, "replace_all", false);

        if old_string.is_empty() {
            return Err(ToolError::InvalidArguments("old_string must not be empty".into()));
        }

        let full_path = self.guard.resolve(path)?;
        if !full_path.exists() {
            return Err(ToolError::ExecutionFailed(format!("File not found: {}", path)));
        }

        let content = tokio::fs::read_to_string(&full_path)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        let count = content.matches(old_string).count();
        if count == 0 {
            return Err(ToolError::ExecutionFailed(
                "old_string not found in file".into(),
            ));
        }

        let (updated, replaced) = if replace_all {
            (content.replace(old_string, new_string), count)
        } else {
            (content.replacen(old_string, new_string, 1), 1)
        };

        tokio::fs::write(&full_path, updated)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        Ok(json!(format!("Replaced {} occurrence(s) in {}", replaced, path)))
    }
}
