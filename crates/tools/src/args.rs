//! Typed accessors over validated tool arguments.

use crate::traits::{Arguments, ToolError};

pub fn str_arg<'a>(args: &'a Arguments, name: &str) -> Result<&'a str, ToolError> {
    args.get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidArguments(format!("Missing '{}' field", name)))
}

pub fn opt_str<'a>(args: &'a Arguments, name: &str) -> Option<&'a str> {
    args.get(name).and_then(|v| v.as_str())
}

pub fn u64_arg(args: &Arguments, name: &str, default: u64) -> u64 {
    args.get(name).and_then(|v| v.as_u64()).unwrap_or(default)
}

pub fn bool_arg(args: &Arguments, name: &str, default: bool) -> bool {
    args.get(name).and_then(|v| v.as_bool()).unwrap_or(default)
}
