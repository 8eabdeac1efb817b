//! Methods on strings, lists and dicts.

use crate::builtins::Keywords;
use crate::error::ScriptError;
use crate::value::*;
use serde_json::Value;
use std::cmp::Ordering;

const MUTATING: &[&str] = &[
    "append", "clear", "extend", "insert", "pop", "remove", "reverse", "setdefault", "sort",
    "update",
];

pub(crate) fn is_mutating(method: &str) -> bool {
    MUTATING.contains(&method)
}

fn no_attribute(receiver: &Value, method: &str) -> ScriptError {
    missing_attribute(type_name(receiver), method)
}

fn missing_attribute(kind: &str, method: &str) -> ScriptError {
    ScriptError::runtime(format!(
        "AttributeError: '{}' object has no attribute '{}'",
        kind, method
    ))
}

fn arg<'v>(args: &'v [Value], index: usize, method: &str) -> Result<&'v Value, ScriptError> {
    args.get(index).ok_or_else(|| {
        ScriptError::runtime(format!(
            "TypeError: {}() missing required argument {}",
            method,
            index + 1
        ))
    })
}

fn str_arg<'v>(args: &'v [Value], index: usize, method: &str) -> Result<&'v str, ScriptError> {
    match arg(args, index, method)? {
        Value::String(s) => Ok(s),
        other => Err(ScriptError::runtime(format!(
            "TypeError: {}() argument must be str, not {}",
            method,
            type_name(other)
        ))),
    }
}

/// Sorts in place; mixed incomparable types fault instead of panicking.
pub(crate) fn sort_values(items: &mut [Value]) -> Result<(), ScriptError> {
    let mut failure = None;
    items.sort_by(|a, b| match ordering(a, b) {
        Ok(ord) => ord,
        Err(e) => {
            failure.get_or_insert(e);
            Ordering::Equal
        }
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Applies a mutating method to `target` and returns the call's value.
pub(crate) fn call_mutating(
    target: &mut Value,
    method: &str,
    args: Vec<Value>,
    kwargs: &Keywords,
) -> Result<Value, ScriptError> {
    match target {
        Value::Array(items) => match method {
            "append" => {
                items.push(arg(&args, 0, method)?.clone());
                Ok(Value::Null)
            }
            "extend" => {
                items.extend(iterate(arg(&args, 0, method)?)?);
                Ok(Value::Null)
            }
            "insert" => {
                let index = as_int(arg(&args, 0, method)?).unwrap_or(0);
                let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
                let index = if index < 0 { (index + len).max(0) } else { index.min(len) };
                items.insert(usize::try_from(index).unwrap_or(0), arg(&args, 1, method)?.clone());
                Ok(Value::Null)
            }
            "pop" => {
                if items.is_empty() {
                    return Err(ScriptError::runtime("IndexError: pop from empty list"));
                }
                let index = args.first().and_then(as_int).unwrap_or(-1);
                let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
                let resolved = if index < 0 { index + len } else { index };
                match usize::try_from(resolved) {
                    Ok(i) if i < items.len() => Ok(items.remove(i)),
                    _ => Err(ScriptError::runtime("IndexError: pop index out of range")),
                }
            }
            "remove" => {
                let needle = arg(&args, 0, method)?;
                match items.iter().position(|v| values_equal(v, needle)) {
                    Some(i) => {
                        items.remove(i);
                        Ok(Value::Null)
                    }
                    None => Err(ScriptError::runtime("ValueError: list.remove(x): x not in list")),
                }
            }
            "clear" => {
                items.clear();
                Ok(Value::Null)
            }
            "reverse" => {
                items.reverse();
                Ok(Value::Null)
            }
            "sort" => {
                if kwargs.iter().any(|(k, v)| k == "key" && !v.is_null()) {
                    return Err(ScriptError::runtime(
                        "TypeError: sort() key functions are not supported",
                    ));
                }
                sort_values(items)?;
                if kwargs.iter().any(|(k, v)| k == "reverse" && truthy(v)) {
                    items.reverse();
                }
                Ok(Value::Null)
            }
            _ => Err(missing_attribute("list", method)),
        },
        Value::Object(map) => match method {
            "update" => {
                if let Some(Value::Object(other)) = args.first() {
                    for (k, v) in other {
                        map.insert(k.clone(), v.clone());
                    }
                } else if let Some(other) = args.first() {
                    return Err(ScriptError::runtime(format!(
                        "TypeError: cannot update dict from {}",
                        type_name(other)
                    )));
                }
                for (k, v) in kwargs {
                    map.insert(k.clone(), v.clone());
                }
                Ok(Value::Null)
            }
            "pop" => {
                let key = dict_key(arg(&args, 0, method)?)?;
                match (map.remove(&key), args.get(1)) {
                    (Some(v), _) => Ok(v),
                    (None, Some(default)) => Ok(default.clone()),
                    (None, None) => Err(ScriptError::runtime(format!("KeyError: '{}'", key))),
                }
            }
            "setdefault" => {
                let key = dict_key(arg(&args, 0, method)?)?;
                let default = args.get(1).cloned().unwrap_or(Value::Null);
                Ok(map.entry(key).or_insert(default).clone())
            }
            "clear" => {
                map.clear();
                Ok(Value::Null)
            }
            _ => Err(missing_attribute("dict", method)),
        },
        _ => Err(no_attribute(target, method)),
    }
}

/// Non-mutating methods. Mutating ones on a temporary apply to a copy.
pub(crate) fn call_method(
    receiver: &Value,
    method: &str,
    args: Vec<Value>,
    kwargs: &Keywords,
) -> Result<Value, ScriptError> {
    match receiver {
        Value::String(s) => string_method(s, method, &args),
        Value::Array(items) => match method {
            "index" => {
                let needle = arg(&args, 0, method)?;
                items
                    .iter()
                    .position(|v| values_equal(v, needle))
                    .map(Value::from)
                    .ok_or_else(|| {
                        ScriptError::runtime(format!("ValueError: {} is not in list", repr(needle)))
                    })
            }
            "count" => {
                let needle = arg(&args, 0, method)?;
                Ok(Value::from(items.iter().filter(|v| values_equal(v, needle)).count()))
            }
            "copy" => Ok(receiver.clone()),
            m if is_mutating(m) => call_mutating(&mut receiver.clone(), m, args, kwargs),
            _ => Err(no_attribute(receiver, method)),
        },
        Value::Object(map) => match method {
            "get" => {
                let key = dict_key(arg(&args, 0, method)?)?;
                Ok(map
                    .get(&key)
                    .cloned()
                    .or_else(|| args.get(1).cloned())
                    .unwrap_or(Value::Null))
            }
            "keys" => Ok(Value::Array(map.keys().cloned().map(Value::String).collect())),
            "values" => Ok(Value::Array(map.values().cloned().collect())),
            "items" => Ok(Value::Array(
                map.iter()
                    .map(|(k, v)| Value::Array(vec![Value::String(k.clone()), v.clone()]))
                    .collect(),
            )),
            "copy" => Ok(receiver.clone()),
            m if is_mutating(m) => call_mutating(&mut receiver.clone(), m, args, kwargs),
            _ => Err(no_attribute(receiver, method)),
        },
        _ => Err(no_attribute(receiver, method)),
    }
}

fn strip_chars<'s>(s: &'s str, args: &[Value], mode: &str) -> &'s str {
    let chars: Option<Vec<char>> = match args.first() {
        Some(Value::String(set)) => Some(set.chars().collect()),
        _ => None,
    };
    let matcher = |c: char| match &chars {
        Some(set) => set.contains(&c),
        None => c.is_whitespace(),
    };
    match mode {
        "lstrip" => s.trim_start_matches(matcher),
        "rstrip" => s.trim_end_matches(matcher),
        _ => s.trim_matches(matcher),
    }
}

fn affix_matches(s: &str, pattern: &Value, prefix: bool) -> Result<bool, ScriptError> {
    let check = |p: &str| if prefix { s.starts_with(p) } else { s.ends_with(p) };
    match pattern {
        Value::String(p) => Ok(check(p)),
        Value::Array(options) => Ok(options
            .iter()
            .any(|o| o.as_str().is_some_and(check))),
        other => Err(ScriptError::runtime(format!(
            "TypeError: expected str or tuple, not {}",
            type_name(other)
        ))),
    }
}

fn string_method(s: &str, method: &str, args: &[Value]) -> Result<Value, ScriptError> {
    let strings = |parts: Vec<&str>| Value::Array(parts.into_iter().map(Value::from).collect());
    match method {
        "split" => match args.first() {
            None | Some(Value::Null) => Ok(strings(s.split_whitespace().collect())),
            Some(Value::String(sep)) if sep.is_empty() => {
                Err(ScriptError::runtime("ValueError: empty separator"))
            }
            Some(Value::String(sep)) => Ok(strings(s.split(sep.as_str()).collect())),
            Some(other) => Err(ScriptError::runtime(format!(
                "TypeError: must be str or None, not {}",
                type_name(other)
            ))),
        },
        "splitlines" => Ok(strings(s.lines().collect())),
        "strip" | "lstrip" | "rstrip" => Ok(Value::from(strip_chars(s, args, method))),
        "lower" => Ok(Value::String(s.to_lowercase())),
        "upper" => Ok(Value::String(s.to_uppercase())),
        "startswith" => Ok(Value::Bool(affix_matches(s, arg(args, 0, method)?, true)?)),
        "endswith" => Ok(Value::Bool(affix_matches(s, arg(args, 0, method)?, false)?)),
        "replace" => {
            let old = str_arg(args, 0, method)?;
            let new = str_arg(args, 1, method)?;
            Ok(Value::String(s.replace(old, new)))
        }
        "join" => {
            let parts = iterate(arg(args, 0, method)?)?;
            let mut texts = Vec::with_capacity(parts.len());
            for (i, part) in parts.iter().enumerate() {
                match part {
                    Value::String(p) => texts.push(p.as_str()),
                    other => {
                        return Err(ScriptError::runtime(format!(
                            "TypeError: sequence item {}: expected str instance, {} found",
                            i,
                            type_name(other)
                        )))
                    }
                }
            }
            Ok(Value::String(texts.join(s)))
        }
        "count" => {
            let needle = str_arg(args, 0, method)?;
            if needle.is_empty() {
                return Ok(Value::from(s.chars().count() + 1));
            }
            Ok(Value::from(s.matches(needle).count()))
        }
        "find" => {
            let needle = str_arg(args, 0, method)?;
            Ok(match s.find(needle) {
                Some(byte) => Value::from(s[..byte].chars().count()),
                None => Value::from(-1),
            })
        }
        "isdigit" => Ok(Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))),
        "isspace" => Ok(Value::Bool(!s.is_empty() && s.chars().all(char::is_whitespace))),
        "title" => Ok(Value::String(
            s.split(' ')
                .map(|word| {
                    let mut chars = word.chars();
                    match chars.next() {
                        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                        None => String::new(),
                    }
                })
                .collect::<Vec<String>>()
                .join(" "),
        )),
        _ => Err(missing_attribute("str", method)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_string_methods() {
        let s = json!("  a,b,c  ");
        assert_eq!(call_method(&s, "strip", vec![], &vec![]).unwrap(), json!("a,b,c"));
        assert_eq!(
            call_method(&json!("a,b,c"), "split", vec![json!(",")], &vec![]).unwrap(),
            json!(["a", "b", "c"])
        );
        assert_eq!(
            call_method(&json!("one\ntwo\n"), "splitlines", vec![], &vec![]).unwrap(),
            json!(["one", "two"])
        );
        assert_eq!(
            call_method(&json!(", "), "join", vec![json!(["x", "y"])], &vec![]).unwrap(),
            json!("x, y")
        );
        assert_eq!(call_method(&json!("héllo"), "find", vec![json!("l")], &vec![]).unwrap(), json!(2));
        assert_eq!(
            call_method(&json!("main.rs"), "endswith", vec![json!([".py", ".rs"])], &vec![]).unwrap(),
            json!(true)
        );
        assert!(call_method(&json!(", "), "join", vec![json!([1])], &vec![]).is_err());
    }

    #[test]
    fn test_list_mutation() {
        let mut list = json!([3, 1, 2]);
        call_mutating(&mut list, "append", vec![json!(0)], &vec![]).unwrap();
        call_mutating(&mut list, "sort", vec![], &vec![]).unwrap();
        assert_eq!(list, json!([0, 1, 2, 3]));
        assert_eq!(call_mutating(&mut list, "pop", vec![], &vec![]).unwrap(), json!(3));
        call_mutating(&mut list, "extend", vec![json!([7, 8])], &vec![]).unwrap();
        assert_eq!(list, json!([0, 1, 2, 7, 8]));
        assert!(call_mutating(&mut json!([]), "pop", vec![], &vec![]).is_err());
    }

    #[test]
    fn test_dict_methods() {
        let mut dict = json!({"a": 1});
        assert_eq!(call_method(&dict, "get", vec![json!("b"), json!(0)], &vec![]).unwrap(), json!(0));
        call_mutating(&mut dict, "update", vec![json!({"b": 2})], &vec![]).unwrap();
        assert_eq!(
            call_method(&dict, "items", vec![], &vec![]).unwrap(),
            json!([["a", 1], ["b", 2]])
        );
        assert_eq!(call_mutating(&mut dict, "pop", vec![json!("a")], &vec![]).unwrap(), json!(1));
        assert_eq!(dict, json!({"b": 2}));
    }

    #[test]
    fn test_sort_mixed_types_faults() {
        let mut items = vec![json!(1), json!("a")];
        assert!(sort_values(&mut items).is_err());
    }
}
