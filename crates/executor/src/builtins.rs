//! Pure builtin functions available to every script.

use crate::ast::BinOp;
use crate::error::ScriptError;
use crate::methods::sort_values;
use crate::value::*;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::cmp::Ordering;

pub(crate) const BUILTINS: &[&str] = &[
    "abs", "all", "any", "bool", "dict", "enumerate", "Exception", "float", "getattr", "hasattr",
    "int", "len", "list", "max", "min", "print", "range", "repr", "reversed", "round",
    "RuntimeError", "sorted", "str", "sum", "ValueError", "zip",
];

pub(crate) struct BuiltinContext<'a> {
    pub output: &'a Mutex<String>,
    pub max_range: usize,
    pub max_value_len: usize,
}

pub(crate) type Keywords = Vec<(String, Value)>;

fn keyword<'k>(kwargs: &'k Keywords, name: &str) -> Option<&'k Value> {
    kwargs.iter().find(|(k, _)| k == name).map(|(_, v)| v)
}

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), ScriptError> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            min.to_string()
        } else {
            format!("{} to {}", min, max)
        };
        return Err(ScriptError::runtime(format!(
            "TypeError: {}() takes {} argument(s) ({} given)",
            name,
            expected,
            args.len()
        )));
    }
    Ok(())
}

fn no_keywords(name: &str, kwargs: &Keywords) -> Result<(), ScriptError> {
    match kwargs.first() {
        Some((k, _)) => Err(ScriptError::runtime(format!(
            "TypeError: {}() got an unexpected keyword argument '{}'",
            name, k
        ))),
        None => Ok(()),
    }
}

fn require_int(name: &str, value: &Value) -> Result<i64, ScriptError> {
    as_int(value).ok_or_else(|| {
        ScriptError::runtime(format!(
            "TypeError: {}() expected an integer, got {}",
            name,
            type_name(value)
        ))
    })
}

pub(crate) fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

/// Returns `None` when `name` is not a builtin.
pub(crate) fn call_builtin(
    name: &str,
    args: Vec<Value>,
    kwargs: Keywords,
    ctx: &BuiltinContext<'_>,
) -> Option<Result<Value, ScriptError>> {
    if !is_builtin(name) {
        return None;
    }
    Some(dispatch(name, args, kwargs, ctx))
}

fn dispatch(
    name: &str,
    mut args: Vec<Value>,
    kwargs: Keywords,
    ctx: &BuiltinContext<'_>,
) -> Result<Value, ScriptError> {
    match name {
        "print" => {
            let sep = keyword(&kwargs, "sep").map(to_str).unwrap_or_else(|| " ".into());
            let end = keyword(&kwargs, "end").map(to_str).unwrap_or_else(|| "\n".into());
            let line: Vec<String> = args.iter().map(to_str).collect();
            let mut output = ctx.output.lock();
            output.push_str(&line.join(&sep));
            output.push_str(&end);
            Ok(Value::Null)
        }
        "len" => {
            arity(name, &args, 1, 1)?;
            Ok(Value::from(length(&args[0])?))
        }
        "str" => {
            arity(name, &args, 0, 1)?;
            Ok(Value::String(args.first().map(to_str).unwrap_or_default()))
        }
        "repr" => {
            arity(name, &args, 1, 1)?;
            Ok(Value::String(repr(&args[0])))
        }
        "int" => {
            arity(name, &args, 0, 1)?;
            to_int(args.first().unwrap_or(&Value::from(0)))
        }
        "float" => {
            arity(name, &args, 0, 1)?;
            to_float(args.first().unwrap_or(&Value::from(0.0)))
        }
        "bool" => {
            arity(name, &args, 0, 1)?;
            Ok(Value::Bool(args.first().is_some_and(truthy)))
        }
        "list" => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                Some(v) => Ok(Value::Array(iterate(v)?)),
                None => Ok(Value::Array(Vec::new())),
            }
        }
        "reversed" => {
            arity(name, &args, 1, 1)?;
            let mut items = iterate(&args[0])?;
            items.reverse();
            Ok(Value::Array(items))
        }
        "dict" => {
            arity(name, &args, 0, 1)?;
            let mut map = match args.pop() {
                Some(Value::Object(map)) => map,
                Some(other) => pairs_to_map(&other)?,
                None => Map::new(),
            };
            for (k, v) in kwargs {
                map.insert(k, v);
            }
            Ok(Value::Object(map))
        }
        "range" => range(&args, ctx.max_range),
        "sorted" => {
            arity(name, &args, 1, 1)?;
            if keyword(&kwargs, "key").is_some_and(|k| !k.is_null()) {
                return Err(ScriptError::runtime(
                    "TypeError: sorted() key functions are not supported",
                ));
            }
            let mut items = iterate(&args[0])?;
            sort_values(&mut items)?;
            if keyword(&kwargs, "reverse").is_some_and(truthy) {
                items.reverse();
            }
            Ok(Value::Array(items))
        }
        "sum" => {
            arity(name, &args, 1, 2)?;
            let start = args
                .get(1)
                .or_else(|| keyword(&kwargs, "start"))
                .cloned()
                .unwrap_or_else(|| Value::from(0));
            iterate(&args[0])?
                .iter()
                .try_fold(start, |acc, item| binary(BinOp::Add, &acc, item, ctx.max_value_len))
        }
        "min" | "max" => extreme(name, args, &kwargs),
        "enumerate" => {
            arity(name, &args, 1, 2)?;
            let start = match args.get(1).or_else(|| keyword(&kwargs, "start")) {
                Some(v) => require_int(name, v)?,
                None => 0,
            };
            let items = iterate(&args[0])?;
            Ok(Value::Array(
                items
                    .into_iter()
                    .zip(start..)
                    .map(|(item, i)| Value::Array(vec![Value::from(i), item]))
                    .collect(),
            ))
        }
        "zip" => {
            no_keywords(name, &kwargs)?;
            let columns = args.iter().map(iterate).collect::<Result<Vec<_>, _>>()?;
            let len = columns.iter().map(Vec::len).min().unwrap_or(0);
            Ok(Value::Array(
                (0..len)
                    .map(|i| Value::Array(columns.iter().map(|c| c[i].clone()).collect()))
                    .collect(),
            ))
        }
        "abs" => {
            arity(name, &args, 1, 1)?;
            match as_num(&args[0]) {
                Some(Num::Int(i)) => Ok(Value::from(i.saturating_abs())),
                Some(Num::Float(f)) => Ok(float_value(f.abs())),
                None => Err(ScriptError::runtime(format!(
                    "TypeError: bad operand type for abs(): '{}'",
                    type_name(&args[0])
                ))),
            }
        }
        "round" => {
            arity(name, &args, 1, 2)?;
            let Some(num) = as_num(&args[0]) else {
                return Err(ScriptError::runtime(format!(
                    "TypeError: type {} doesn't define __round__",
                    type_name(&args[0])
                )));
            };
            match args.get(1).or_else(|| keyword(&kwargs, "ndigits")) {
                None | Some(Value::Null) => match num {
                    Num::Int(i) => Ok(Value::from(i)),
                    Num::Float(f) => Ok(Value::from(f.round_ties_even() as i64)),
                },
                Some(digits) => {
                    let digits = require_int(name, digits)?;
                    let factor = 10f64.powi(i32::try_from(digits).unwrap_or(0));
                    let f = match num {
                        Num::Int(i) => i as f64,
                        Num::Float(f) => f,
                    };
                    Ok(float_value((f * factor).round() / factor))
                }
            }
        }
        "any" => {
            arity(name, &args, 1, 1)?;
            Ok(Value::Bool(iterate(&args[0])?.iter().any(truthy)))
        }
        "all" => {
            arity(name, &args, 1, 1)?;
            Ok(Value::Bool(iterate(&args[0])?.iter().all(truthy)))
        }
        "hasattr" => {
            arity(name, &args, 2, 2)?;
            let key = to_str(&args[1]);
            Ok(Value::Bool(args[0].as_object().is_some_and(|m| m.contains_key(&key))))
        }
        "getattr" => {
            arity(name, &args, 2, 3)?;
            let key = to_str(&args[1]);
            match args[0].as_object().and_then(|m| m.get(&key)) {
                Some(v) => Ok(v.clone()),
                None => args.get(2).cloned().ok_or_else(|| {
                    ScriptError::runtime(format!(
                        "AttributeError: '{}' object has no attribute '{}'",
                        type_name(&args[0]),
                        key
                    ))
                }),
            }
        }
        // Exceptions are plain messages
        "Exception" | "ValueError" | "RuntimeError" => {
            Ok(Value::String(args.first().map(to_str).unwrap_or_default()))
        }
        _ => Err(ScriptError::runtime(format!(
            "NameError: name '{}' is not defined",
            name
        ))),
    }
}

fn to_int(value: &Value) -> Result<Value, ScriptError> {
    match value {
        Value::String(s) => s.trim().replace('_', "").parse::<i64>().map(Value::from).map_err(|_| {
            ScriptError::runtime(format!(
                "ValueError: invalid literal for int() with base 10: {}",
                repr(value)
            ))
        }),
        other => match as_num(other) {
            Some(Num::Int(i)) => Ok(Value::from(i)),
            Some(Num::Float(f)) => Ok(Value::from(f.trunc() as i64)),
            None => Err(ScriptError::runtime(format!(
                "TypeError: int() argument must be a string or a number, not '{}'",
                type_name(other)
            ))),
        },
    }
}

fn to_float(value: &Value) -> Result<Value, ScriptError> {
    match value {
        Value::String(s) => s.trim().parse::<f64>().map(float_value).map_err(|_| {
            ScriptError::runtime(format!(
                "ValueError: could not convert string to float: {}",
                repr(value)
            ))
        }),
        other => match as_num(other) {
            Some(Num::Int(i)) => Ok(float_value(i as f64)),
            Some(Num::Float(f)) => Ok(float_value(f)),
            None => Err(ScriptError::runtime(format!(
                "TypeError: float() argument must be a string or a number, not '{}'",
                type_name(other)
            ))),
        },
    }
}

fn pairs_to_map(value: &Value) -> Result<Map<String, Value>, ScriptError> {
    let mut map = Map::new();
    for pair in iterate(value)? {
        match pair.as_array().map(Vec::as_slice) {
            Some([k, v]) => {
                map.insert(dict_key(k)?, v.clone());
            }
            _ => {
                return Err(ScriptError::runtime(
                    "ValueError: dictionary update sequence element has wrong length",
                ))
            }
        }
    }
    Ok(map)
}

fn range(args: &[Value], max_range: usize) -> Result<Value, ScriptError> {
    arity("range", args, 1, 3)?;
    let ints = args
        .iter()
        .map(|v| require_int("range", v))
        .collect::<Result<Vec<_>, _>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => (0, 0, 1),
    };
    if step == 0 {
        return Err(ScriptError::runtime("ValueError: range() arg 3 must not be zero"));
    }

    let span = if step > 0 {
        stop.saturating_sub(start)
    } else {
        start.saturating_sub(stop)
    };
    let count = if span <= 0 {
        0
    } else {
        let step_abs = step.unsigned_abs();
        span.unsigned_abs().div_ceil(step_abs)
    };
    if count > max_range as u64 {
        return Err(ScriptError::Limit(format!(
            "range of {} items exceeds the limit of {}",
            count, max_range
        )));
    }

    let mut items = Vec::with_capacity(count as usize);
    let mut current = start;
    for _ in 0..count {
        items.push(Value::from(current));
        current = current.saturating_add(step);
    }
    Ok(Value::Array(items))
}

fn extreme(name: &str, args: Vec<Value>, kwargs: &Keywords) -> Result<Value, ScriptError> {
    if keyword(kwargs, "key").is_some_and(|k| !k.is_null()) {
        return Err(ScriptError::runtime(format!(
            "TypeError: {}() key functions are not supported",
            name
        )));
    }
    let items = match args.as_slice() {
        [single] => iterate(single)?,
        _ => args,
    };
    let wanted = if name == "min" {
        Ordering::Less
    } else {
        Ordering::Greater
    };

    let mut best: Option<Value> = None;
    for item in items {
        best = match best {
            Some(current) if ordering(&item, &current)? != wanted => Some(current),
            _ => Some(item),
        };
    }
    match (best, keyword(kwargs, "default")) {
        (Some(v), _) => Ok(v),
        (None, Some(default)) => Ok(default.clone()),
        (None, None) => Err(ScriptError::runtime(format!(
            "ValueError: {}() arg is an empty sequence",
            name
        ))),
    }
}
