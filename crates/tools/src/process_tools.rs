use crate::args::{opt_str, str_arg, u64_arg};
use crate::guard::{CommandGuard, WorkspaceGuard};
use crate::traits::{Arguments, Capability, ParamSpec, ParamType, Tool, ToolError};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

const MAX_PROCESS_SECS: u64 = 600;

async fn run_process(mut cmd: Command, cwd: &Path, secs: u64) -> Result<Value, ToolError> {
    cmd.current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let limit = Duration::from_secs(secs.clamp(1, MAX_PROCESS_SECS));
    let output = timeout(limit, cmd.output())
        .await
        .map_err(|_| ToolError::ExecutionFailed(format!("Command timed out after {}s", limit.as_secs())))?
        .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    if !output.status.success() {
        let code = output
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        return Err(ToolError::ExecutionFailed(format!(
            "exit code {}: {}{}",
            code,
            stderr.trim_end(),
            if stdout.is_empty() {
                String::new()
            } else {
                format!("\nstdout:\n{}", stdout.trim_end())
            }
        )));
    }

    Ok(json!({
        "stdout": stdout,
        "stderr": stderr,
        "exit_code": output.status.code()
    }))
}

pub struct ShellTool {
    guard: WorkspaceGuard,
    commands: CommandGuard,
}

impl ShellTool {
    pub fn new(guard: WorkspaceGuard, commands: CommandGuard) -> Self {
        Self { guard, commands }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Run a shell command in the workspace"
    }

    fn params(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("command", ParamType::String, "Command line to run"),
            ParamSpec::optional("timeout", ParamType::Integer, "Timeout in seconds")
                .with_default(json!(120)),
            ParamSpec::optional("workdir", ParamType::String, "Working directory"),
        ]
    }

    fn capability(&self) -> Capability {
        Capability::Shell
    }

    fn timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(MAX_PROCESS_SECS + 5))
    }

    async fn execute(&self, args: Arguments) -> Result<Value, ToolError> {
        let command = str_arg(&args, "command")?;
        let secs = u64_arg(&args, "timeout", 120);

        if command.trim().is_empty() {
            return Err(ToolError::InvalidArguments("Empty command".into()));
        }
        self.commands.check(command)?;

        let cwd = match opt_str(&args, "workdir") {
            Some(dir) => self.guard.resolve(dir)?,
            None => self.guard.root().to_path_buf(),
        };

        debug!("Running shell command: {}", command);
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        run_process(cmd, &cwd, secs).await
    }
}

pub struct ExecuteCodeTool {
    guard: WorkspaceGuard,
}

impl ExecuteCodeTool {
    pub fn new(guard: WorkspaceGuard) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Tool for ExecuteCodeTool {
    fn name(&self) -> &str {
        "execute_code"
    }

    fn description(&self) -> &str {
        "Execute a Python or JavaScript snippet and return its output"
    }

    fn params(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("code", ParamType::String, "Source code to run"),
            ParamSpec::optional("language", ParamType::String, "python or javascript")
                .with_default(json!("python")),
            ParamSpec::optional("timeout", ParamType::Integer, "Timeout in seconds")
                .with_default(json!(30)),
        ]
    }

    fn capability(&self) -> Capability {
        Capability::Shell
    }

    fn timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(MAX_PROCESS_SECS + 5))
    }

    async fn execute(&self, args: Arguments) -> Result<Value, ToolError> {
        let code = str_arg(&args, "code")?;
        let language = opt_str(&args, "language").unwrap_or("python");
        let secs = u64_arg(&args, "timeout", 30);

        let (runner, flag) = match language {
            "python" => ("python3", "-c"),
            "javascript" => ("node", "-e"),
            other => {
                return Err(ToolError::InvalidArguments(format!(
                    "Unsupported language: {}",
                    other
                )))
            }
        };

        let mut cmd = Command::new(runner);
        cmd.arg(flag).arg(code);
        run_process(cmd, self.guard.root(), secs).await
    }
}
