use crate::args::{bool_arg, opt_str, str_arg};
use crate::guard::WorkspaceGuard;
use crate::traits::{Arguments, Capability, ParamSpec, ParamType, Tool, ToolError};
use async_trait::async_trait;
use regex::RegexBuilder;
use serde_json::{json, Value};
use std::path::PathBuf;
use walkdir::WalkDir;

const MAX_GLOB_RESULTS: usize = 500;
const MAX_GREP_FILES: usize = 100;
const MAX_GREP_MATCHES: usize = 200;
const MAX_LINE_CHARS: usize = 200;
const SKIPPED_DIRS: &[&str] = &[".git", "node_modules", "__pycache__", "target"];

pub struct GlobTool {
    guard: WorkspaceGuard,
}

impl GlobTool {
    pub fn new(guard: WorkspaceGuard) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        "Find files matching a glob pattern such as `src/**/*.rs`"
    }

    fn params(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("pattern", ParamType::String, "Glob pattern"),
            ParamSpec::optional("path", ParamType::String, "Directory to search from")
                .with_default(json!(".")),
        ]
    }

    fn capability(&self) -> Capability {
        Capability::ReadOnly
    }

    async fn execute(&self, args: Arguments) -> Result<Value, ToolError> {
        let pattern = str_arg(&args, "pattern")?;
        if pattern.split('/').any(|part| part == "..") {
            return Err(ToolError::PermissionDenied(
                "Path traversal not allowed in pattern".into(),
            ));
        }
        let base = self.guard.resolve(opt_str(&args, "path").unwrap_or("."))?;
        let full_pattern = base.join(pattern).to_string_lossy().to_string();

        let guard = self.guard.clone();
        let matches = tokio::task::spawn_blocking(move || -> Result<Vec<String>, ToolError> {
            let entries = glob::glob(&full_pattern)
                .map_err(|e| ToolError::InvalidArguments(format!("Invalid pattern: {}", e)))?;
            let mut found: Vec<String> = entries
                .filter_map(Result::ok)
                .map(|path| guard.relative(&path).display().to_string())
                .collect();
            found.sort();
            found.truncate(MAX_GLOB_RESULTS);
            Ok(found)
        })
        .await
        .map_err(|e| ToolError::ExecutionFailed(e.to_string()))??;

        Ok(json!(matches))
    }
}

pub struct GrepTool {
    guard: WorkspaceGuard,
}

impl GrepTool {
    pub fn new(guard: WorkspaceGuard) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search file contents with a regular expression"
    }

    fn params(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("pattern", ParamType::String, "Regular expression"),
            ParamSpec::optional("path", ParamType::String, "File or directory to search")
                .with_default(json!(".")),
            ParamSpec::optional("include", ParamType::String, "File name glob filter")
                .with_default(json!("*")),
            ParamSpec::optional("ignore_case", ParamType::Boolean, "Case-insensitive match")
                .with_default(json!(false)),
        ]
    }

    fn capability(&self) -> Capability {
        Capability::ReadOnly
    }

    async fn execute(&self, args: Arguments) -> Result<Value, ToolError> {
        let regex = RegexBuilder::new(str_arg(&args, "pattern")?)
            .case_insensitive(bool_arg(&args, "ignore_case", false))
            .build()
            .map_err(|e| ToolError::InvalidArguments(format!("Invalid regex: {}", e)))?;
        let include = glob::Pattern::new(opt_str(&args, "include").unwrap_or("*"))
            .map_err(|e| ToolError::InvalidArguments(format!("Invalid include: {}", e)))?;
        let base = self.guard.resolve(opt_str(&args, "path").unwrap_or("."))?;

        let guard = self.guard.clone();
        let lines = tokio::task::spawn_blocking(move || {
            let mut files: Vec<PathBuf> = Vec::new();
            let walker = WalkDir::new(&base)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| {
                    let name = e.file_name().to_string_lossy();
                    !(e.file_type().is_dir() && SKIPPED_DIRS.iter().any(|dir| *dir == name))
                });
            for entry in walker.filter_map(Result::ok) {
                if files.len() >= MAX_GREP_FILES {
                    break;
                }
                if entry.file_type().is_file()
                    && include.matches(&entry.file_name().to_string_lossy())
                {
                    files.push(entry.into_path());
                }
            }

            let mut matches = Vec::new();
            'files: for file in files {
                // Non-UTF-8 files are skipped
                let Ok(content) = std::fs::read_to_string(&file) else {
                    continue;
                };
                for (number, line) in content.lines().enumerate() {
                    if regex.is_match(line) {
                        let text: String = line.chars().take(MAX_LINE_CHARS).collect();
                        matches.push(format!(
                            "{}:{}: {}",
                            guard.relative(&file).display(),
                            number + 1,
                            text
                        ));
                        if matches.len() >= MAX_GREP_MATCHES {
                            break 'files;
                        }
                    }
                }
            }
            matches
        })
        .await
        .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        if lines.is_empty() {
            return Ok(json!("No matches found"));
        }
        Ok(json!(lines.join("\n")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(value: Value) -> Arguments {
        value.as_object().cloned().unwrap()
    }

    fn workspace() -> TempDir {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("src")).unwrap();
        std::fs::create_dir_all(temp.path().join("node_modules")).unwrap();
        std::fs::write(temp.path().join("src/lib.rs"), "fn main() {}\n// TODO fix").unwrap();
        std::fs::write(temp.path().join("src/util.rs"), "pub fn helper() {}").unwrap();
        std::fs::write(temp.path().join("node_modules/x.rs"), "fn main() {}").unwrap();
        std::fs::write(temp.path().join("README.md"), "Main docs").unwrap();
        temp
    }

    #[tokio::test]
    async fn test_glob_relative_sorted() {
        let temp = workspace();
        let output = GlobTool::new(WorkspaceGuard::new(temp.path()))
            .execute(args(json!({"pattern": "src/*.rs"})))
            .await
            .unwrap();
        assert_eq!(output, json!(["src/lib.rs", "src/util.rs"]));
    }

    #[tokio::test]
    async fn test_glob_rejects_traversal() {
        let temp = workspace();
        let err = GlobTool::new(WorkspaceGuard::new(temp.path()))
            .execute(args(json!({"pattern": "../*"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_grep_skips_vendor_dirs() {
        let temp = workspace();
        let output = GrepTool::new(WorkspaceGuard::new(temp.path()))
            .execute(args(json!({"pattern": "fn main"})))
            .await
            .unwrap();
        let text = output.as_str().unwrap();
        assert!(text.contains("src/lib.rs:1: fn main() {}"));
        assert!(!text.contains("node_modules"));
    }

    #[tokio::test]
    async fn test_grep_ignore_case_and_include() {
        let temp = workspace();
        let tool = GrepTool::new(WorkspaceGuard::new(temp.path()));
        let output = tool
            .execute(args(json!({"pattern": "main", "ignore_case": true, "include": "*.md"})))
            .await
            .unwrap();
        assert_eq!(output, json!("README.md:1: Main docs"));
    }

    #[tokio::test]
    async fn test_grep_no_matches() {
        let temp = workspace();
        let output = GrepTool::new(WorkspaceGuard::new(temp.path()))
            .execute(args(json!({"pattern": "nothing_here"})))
            .await
            .unwrap();
        assert_eq!(output, json!("No matches found"));
    }
}
