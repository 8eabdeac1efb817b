//! Tolerant parsing of model-produced tool arguments.

use serde_json::{json, Map, Value};
use tracing::warn;

const RAW_PREVIEW_CHARS: usize = 200;

/// Parses a JSON argument string. Models often emit raw newlines inside
/// string values (typically in `code`), so those are escaped and, failing
/// that, stripped before giving up. Unparseable input yields an object with
/// `error` and `raw` keys, which tool validation then rejects.
pub fn clean_tool_arguments(raw: &str) -> Map<String, Value> {
    if raw.trim().is_empty() {
        return Map::new();
    }

    let first_error = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => return map,
        Ok(other) => format!("expected a JSON object, got {}", other),
        Err(e) => e.to_string(),
    };

    let escaped = raw.replace('\n', "\\n").replace('\r', "\\r");
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&escaped) {
        return map;
    }

    let stripped: String = escaped.chars().filter(|c| !c.is_control()).collect();
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&stripped) {
        return map;
    }

    warn!("Failed to parse tool arguments: {}", first_error);
    let preview: String = raw.chars().take(RAW_PREVIEW_CHARS).collect();
    match json!({
        "error": format!("Failed to parse tool arguments: {}", first_error),
        "raw": preview,
    }) {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
