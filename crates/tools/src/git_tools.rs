use crate::args::{bool_arg, opt_str, str_arg, u64_arg};
use crate::guard::WorkspaceGuard;
use crate::traits::{Arguments, Capability, ParamSpec, ParamType, Tool, ToolError};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::process::Stdio;
use tokio::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitCommand {
    Status,
    Diff,
    Log,
    Branch,
    Add,
    Commit,
}

impl GitCommand {
    pub const ALL: [GitCommand; 6] = [
        GitCommand::Status,
        GitCommand::Diff,
        GitCommand::Log,
        GitCommand::Branch,
        GitCommand::Add,
        GitCommand::Commit,
    ];
}

/// One git subcommand exposed as a tool, run in the workspace root.
pub struct GitTool {
    guard: WorkspaceGuard,
    command: GitCommand,
}

impl GitTool {
    pub fn new(guard: WorkspaceGuard, command: GitCommand) -> Self {
        Self { guard, command }
    }

    fn git_args(&self, args: &Arguments) -> Result<Vec<String>, ToolError> {
        let argv = match self.command {
            GitCommand::Status => vec!["status".into(), "--porcelain".into()],
            GitCommand::Diff => {
                let target = opt_str(args, "target").unwrap_or("HEAD");
                if target.starts_with('-') {
                    return Err(ToolError::InvalidArguments(format!(
                        "Invalid diff target: {}",
                        target
                    )));
                }
                vec!["diff".into(), target.to_string()]
            }
            GitCommand::Log => {
                let mut argv = vec![
                    "log".to_string(),
                    format!("-n{}", u64_arg(args, "limit", 10).max(1)),
                ];
                if bool_arg(args, "oneline", true) {
                    argv.push("--oneline".into());
                }
                argv
            }
            GitCommand::Branch => vec!["branch".into(), "--list".into()],
            GitCommand::Add => {
                let mut argv = vec!["add".to_string(), "--".to_string()];
                for file in opt_str(args, "files").unwrap_or(".").split_whitespace() {
                    self.guard.resolve(file)?;
                    argv.push(file.to_string());
                }
                argv
            }
            GitCommand::Commit => {
                let message = str_arg(args, "message")?;
                if message.trim().is_empty() {
                    return Err(ToolError::InvalidArguments("Empty commit message".into()));
                }
                vec!["commit".into(), "-m".into(), message.to_string()]
            }
        };
        Ok(argv)
    }
}

#[async_trait]
impl Tool for GitTool {
    fn name(&self) -> &str {
        match self.command {
            GitCommand::Status => "git_status",
            GitCommand::Diff => "git_diff",
            GitCommand::Log => "git_log",
            GitCommand::Branch => "git_branch",
            GitCommand::Add => "git_add",
            GitCommand::Commit => "git_commit",
        }
    }

    fn description(&self) -> &str {
        match self.command {
            GitCommand::Status => "Show working tree status (porcelain format)",
            GitCommand::Diff => "Show changes against a commit, branch or HEAD",
            GitCommand::Log => "Show recent commits",
            GitCommand::Branch => "List local branches",
            GitCommand::Add => "Stage files for commit",
            GitCommand::Commit => "Commit staged changes",
        }
    }

    fn params(&self) -> Vec<ParamSpec> {
        match self.command {
            GitCommand::Status | GitCommand::Branch => vec![],
            GitCommand::Diff => vec![ParamSpec::optional(
                "target",
                ParamType::String,
                "Commit or branch to diff against",
            )
            .with_default(json!("HEAD"))],
            GitCommand::Log => vec![
                ParamSpec::optional("oneline", ParamType::Boolean, "One line per commit")
                    .with_default(json!(true)),
                ParamSpec::optional("limit", ParamType::Integer, "Number of commits")
                    .with_default(json!(10)),
            ],
            GitCommand::Add => vec![ParamSpec::optional(
                "files",
                ParamType::String,
                "Space-separated paths to stage",
            )
            .with_default(json!("."))],
            GitCommand::Commit => vec![ParamSpec::required(
                "message",
                ParamType::String,
                "Commit message",
            )],
        }
    }

    fn capability(&self) -> Capability {
        match self.command {
            GitCommand::Add | GitCommand::Commit => Capability::Mutating,
            _ => Capability::ReadOnly,
        }
    }

    async fn execute(&self, args: Arguments) -> Result<Value, ToolError> {
        let argv = self.git_args(&args)?;

        let output = Command::new("git")
            .args(&argv)
            .current_dir(self.guard.root())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("Failed to run git: {}", e)))?;

        if !output.status.success() {
            return Err(ToolError::ExecutionFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if stdout.trim().is_empty() {
            return Ok(json!("(no output)"));
        }
        Ok(Value::String(stdout))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tool(temp: &TempDir, command: GitCommand) -> GitTool {
        GitTool::new(WorkspaceGuard::new(temp.path()), command)
    }

    #[test]
    fn test_names_are_distinct() {
        let temp = TempDir::new().unwrap();
        let mut names: Vec<String> = GitCommand::ALL
            .iter()
            .map(|c| tool(&temp, *c).name().to_string())
            .collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), GitCommand::ALL.len());
    }

    #[test]
    fn test_log_args() {
        let temp = TempDir::new().unwrap();
        let args = json!({"limit": 3, "oneline": false});
        let argv = tool(&temp, GitCommand::Log)
            .git_args(args.as_object().unwrap())
            .unwrap();
        assert_eq!(argv, vec!["log", "-n3"]);
    }

    #[test]
    fn test_diff_rejects_option_injection() {
        let temp = TempDir::new().unwrap();
        let args = json!({"target": "--output=/tmp/x"});
        assert!(tool(&temp, GitCommand::Diff)
            .git_args(args.as_object().unwrap())
            .is_err());
    }

    #[test]
    fn test_add_rejects_outside_paths() {
        let temp = TempDir::new().unwrap();
        let args = json!({"files": "src ../secret"});
        assert!(matches!(
            tool(&temp, GitCommand::Add).git_args(args.as_object().unwrap()),
            Err(ToolError::PermissionDenied(_))
        ));
    }

    #[test]
    fn test_commit_capability_is_mutating() {
        let temp = TempDir::new().unwrap();
        assert_eq!(tool(&temp, GitCommand::Commit).capability(), Capability::Mutating);
        assert_eq!(tool(&temp, GitCommand::Status).capability(), Capability::ReadOnly);
    }
}
