use serde_json::Value;
use synlogos_tools::{Arguments, ToolError, ToolSpec};

/// Binds positional arguments to the tool's declared parameter order and
/// merges keyword arguments. Type and requiredness checks are left to the
/// registry.
pub fn normalize_arguments(
    spec: &ToolSpec,
    positional: Vec<Value>,
    keywords: Vec<(String, Value)>,
) -> Result<Arguments, ToolError> {
    if positional.len() > spec.params.len() {
        return Err(ToolError::InvalidArguments(format!(
            "{}() takes {} positional argument(s) but {} were given",
            spec.name,
            spec.params.len(),
            positional.len()
        )));
    }

    let mut args = Arguments::new();
    for (param, value) in spec.params.iter().zip(positional) {
        args.insert(param.name.clone(), value);
    }

    for (name, value) in keywords {
        if args.contains_key(&name) {
            return Err(ToolError::InvalidArguments(format!(
                "{}() got multiple values for argument '{}'",
                spec.name, name
            )));
        }
        args.insert(name, value);
    }
    Ok(args)
}
