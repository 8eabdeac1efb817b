use crate::traits::ToolError;
use std::path::{Component, Path, PathBuf};

/// Confines tool paths to a workspace root.
#[derive(Debug, Clone)]
pub struct WorkspaceGuard {
    root: PathBuf,
}

impl WorkspaceGuard {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = std::fs::canonicalize(&root).unwrap_or(root);
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, path: &str) -> Result<PathBuf, ToolError> {
        let candidate = Path::new(path);

        if candidate
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(ToolError::PermissionDenied(format!(
                "Path traversal not allowed: {}",
                path
            )));
        }

        let mut full_path = if candidate.is_absolute() {
            PathBuf::new()
        } else {
            self.root.clone()
        };
        for component in candidate.components() {
            if !matches!(component, Component::CurDir) {
                full_path.push(component);
            }
        }

        // Security: ensure path is within workspace
        if !full_path.starts_with(&self.root) {
            return Err(ToolError::PermissionDenied(format!(
                "Path outside workspace: {}",
                path
            )));
        }

        Ok(full_path)
    }

    /// Workspace-relative display form of `path`.
    pub fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.root).unwrap_or(path)
    }
}

/// Rejects shell commands containing destructive patterns.
#[derive(Debug, Clone)]
pub struct CommandGuard {
    blocked_patterns: Vec<String>,
}

impl CommandGuard {
    pub fn new() -> Self {
        Self {
            blocked_patterns: Self::default_blocked_patterns(),
        }
    }

    fn default_blocked_patterns() -> Vec<String> {
        vec![
            "rm -rf /".to_string(),
            "rm -rf ~".to_string(),
            "rm -rf *".to_string(),
            "dd if=".to_string(),
            "mkfs".to_string(),
            "shutdown".to_string(),
            "reboot".to_string(),
            "init 0".to_string(),
            "init 6".to_string(),
            "> /dev/sd".to_string(),
            ":(){ :|:& };:".to_string(),
        ]
    }

    pub fn add_blocked_pattern(&mut self, pattern: String) {
        self.blocked_patterns.push(pattern);
    }

    pub fn check(&self, command: &str) -> Result<(), ToolError> {
        for pattern in &self.blocked_patterns {
            if command.contains(pattern.as_str()) {
                return Err(ToolError::PermissionDenied(format!(
                    "Blocked pattern: {}",
                    pattern
                )));
            }
        }
        Ok(())
    }
}

impl Default for CommandGuard {
    fn default() -> Self {
        Self::new()
    }
}
