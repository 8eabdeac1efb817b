//! Python-flavoured semantics over `serde_json::Value`.

use crate::ast::{BinOp, CmpOp};
use crate::error::ScriptError;
use serde_json::{Map, Number, Value};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

pub fn as_num(value: &Value) -> Option<Num> {
    match value {
        Value::Bool(b) => Some(Num::Int(i64::from(*b))),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Some(Num::Int(i)),
            None => n.as_f64().map(Num::Float),
        },
        _ => None,
    }
}

pub fn as_int(value: &Value) -> Option<i64> {
    match as_num(value) {
        Some(Num::Int(i)) => Some(i),
        _ => None,
    }
}

pub fn num_value(num: Num) -> Value {
    match num {
        Num::Int(i) => Value::from(i),
        Num::Float(f) => float_value(f),
    }
}

/// JSON has no NaN or infinity; those collapse to `None`.
pub fn float_value(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "NoneType",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        f.to_string()
    }
}

/// `str(value)`
pub fn to_str(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => repr(other),
    }
}

/// `repr(value)`
pub fn repr(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => match n.as_i64() {
            Some(i) => i.to_string(),
            None => match n.as_u64() {
                Some(u) => u.to_string(),
                None => format_float(n.as_f64().unwrap_or_default()),
            },
        },
        Value::String(s) => quote(s),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(repr).collect();
            format!("[{}]", inner.join(", "))
        }
        Value::Object(map) => {
            let inner: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", quote(k), repr(v)))
                .collect();
            format!("{{{}}}", inner.join(", "))
        }
    }
}

fn quote(s: &str) -> String {
    let delimiter = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(delimiter);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == delimiter => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(delimiter);
    out
}

pub fn format_precision(value: &Value, precision: usize) -> Result<String, ScriptError> {
    match as_num(value) {
        Some(num) => Ok(format!("{:.*}", precision, num.as_f64())),
        None => Err(ScriptError::runtime(format!(
            "ValueError: precision format requires a number, got {}",
            type_name(value)
        ))),
    }
}

fn type_error(op: &str, left: &Value, right: &Value) -> ScriptError {
    ScriptError::runtime(format!(
        "TypeError: unsupported operand type(s) for {}: '{}' and '{}'",
        op,
        type_name(left),
        type_name(right)
    ))
}

fn op_symbol(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::FloorDiv => "//",
        BinOp::Mod => "%",
        BinOp::Pow => "**",
    }
}

fn bounded_len(len: Option<usize>, max_len: usize) -> Result<usize, ScriptError> {
    match len {
        Some(len) if len <= max_len => Ok(len),
        _ => Err(ScriptError::Limit(format!(
            "value would exceed {} elements",
            max_len
        ))),
    }
}

fn repeat_count(n: &Value) -> usize {
    usize::try_from(as_int(n).unwrap_or(0)).unwrap_or(0)
}

/// Applies a binary operator. Sequence results longer than `max_len`
/// (bytes for strings, items for lists) fail before allocating.
pub fn binary(op: BinOp, left: &Value, right: &Value, max_len: usize) -> Result<Value, ScriptError> {
    match (op, left, right) {
        (BinOp::Add, Value::String(a), Value::String(b)) => {
            let len = bounded_len(a.len().checked_add(b.len()), max_len)?;
            let mut out = String::with_capacity(len);
            out.push_str(a);
            out.push_str(b);
            return Ok(Value::String(out));
        }
        (BinOp::Add, Value::Array(a), Value::Array(b)) => {
            bounded_len(a.len().checked_add(b.len()), max_len)?;
            return Ok(Value::Array(a.iter().chain(b.iter()).cloned().collect()));
        }
        (BinOp::Mul, Value::String(s), n) | (BinOp::Mul, n, Value::String(s)) if as_int(n).is_some() => {
            let times = repeat_count(n);
            bounded_len(s.len().checked_mul(times), max_len)?;
            return Ok(Value::String(s.repeat(times)));
        }
        (BinOp::Mul, Value::Array(items), n) | (BinOp::Mul, n, Value::Array(items))
            if as_int(n).is_some() =>
        {
            let times = repeat_count(n);
            let len = bounded_len(items.len().checked_mul(times), max_len)?;
            let mut out = Vec::with_capacity(len);
            for _ in 0..times {
                out.extend_from_slice(items);
            }
            return Ok(Value::Array(out));
        }
        _ => {}
    }

    let (Some(a), Some(b)) = (as_num(left), as_num(right)) else {
        return Err(type_error(op_symbol(op), left, right));
    };
    arithmetic(op, a, b).map(num_value)
}

fn zero_division(op: BinOp) -> ScriptError {
    let message = match op {
        BinOp::Mod => "ZeroDivisionError: integer modulo by zero",
        BinOp::FloorDiv => "ZeroDivisionError: integer division or modulo by zero",
        _ => "ZeroDivisionError: division by zero",
    };
    ScriptError::runtime(message)
}

fn arithmetic(op: BinOp, a: Num, b: Num) -> Result<Num, ScriptError> {
    if let (Num::Int(x), Num::Int(y)) = (a, b) {
        let exact = match op {
            BinOp::Add => x.checked_add(y),
            BinOp::Sub => x.checked_sub(y),
            BinOp::Mul => x.checked_mul(y),
            BinOp::Div => None,
            BinOp::FloorDiv | BinOp::Mod if y == 0 => return Err(zero_division(op)),
            // Python floors toward negative infinity
            BinOp::FloorDiv => x.checked_div(y).map(|q| {
                if x % y != 0 && (x < 0) != (y < 0) {
                    q - 1
                } else {
                    q
                }
            }),
            BinOp::Mod => x.checked_rem(y).map(|r| if r != 0 && (r < 0) != (y < 0) { r + y } else { r }),
            BinOp::Pow => u32::try_from(y).ok().and_then(|e| x.checked_pow(e)),
        };
        if let Some(v) = exact {
            return Ok(Num::Int(v));
        }
    }

    let (x, y) = (a.as_f64(), b.as_f64());
    let result = match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div | BinOp::FloorDiv | BinOp::Mod if y == 0.0 => return Err(zero_division(op)),
        BinOp::Div => x / y,
        BinOp::FloorDiv => (x / y).floor(),
        BinOp::Mod => x - y * (x / y).floor(),
        BinOp::Pow => x.powf(y),
    };
    Ok(Num::Float(result))
}

pub fn negate(value: &Value) -> Result<Value, ScriptError> {
    match as_num(value) {
        Some(Num::Int(i)) => Ok(i
            .checked_neg()
            .map(Value::from)
            .unwrap_or_else(|| float_value(-(i as f64)))),
        Some(Num::Float(f)) => Ok(float_value(-f)),
        None => Err(ScriptError::runtime(format!(
            "TypeError: bad operand type for unary -: '{}'",
            type_name(value)
        ))),
    }
}

/// Equality with numeric comparison across int and float.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_) | Value::Bool(_), Value::Number(_) | Value::Bool(_)) => {
            match (as_num(a), as_num(b)) {
                (Some(Num::Int(x)), Some(Num::Int(y))) => x == y,
                (Some(x), Some(y)) => x.as_f64() == y.as_f64(),
                _ => false,
            }
        }
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| values_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| values_equal(v, other)))
        }
        _ => a == b,
    }
}

pub fn ordering(a: &Value, b: &Value) -> Result<Ordering, ScriptError> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y) {
                let ord = ordering(l, r)?;
                if ord != Ordering::Equal {
                    return Ok(ord);
                }
            }
            Ok(x.len().cmp(&y.len()))
        }
        _ => match (as_num(a), as_num(b)) {
            (Some(Num::Int(x)), Some(Num::Int(y))) => Ok(x.cmp(&y)),
            (Some(x), Some(y)) => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .ok_or_else(|| ScriptError::runtime("ValueError: cannot compare NaN")),
            _ => Err(ScriptError::runtime(format!(
                "TypeError: '<' not supported between instances of '{}' and '{}'",
                type_name(a),
                type_name(b)
            ))),
        },
    }
}

pub fn contains(container: &Value, item: &Value) -> Result<bool, ScriptError> {
    match container {
        Value::String(s) => match item {
            Value::String(needle) => Ok(s.contains(needle.as_str())),
            other => Err(ScriptError::runtime(format!(
                "TypeError: 'in <string>' requires string as left operand, not {}",
                type_name(other)
            ))),
        },
        Value::Array(items) => Ok(items.iter().any(|v| values_equal(v, item))),
        Value::Object(map) => Ok(map.contains_key(&dict_key(item)?)),
        other => Err(ScriptError::runtime(format!(
            "TypeError: argument of type '{}' is not iterable",
            type_name(other)
        ))),
    }
}

pub fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<bool, ScriptError> {
    Ok(match op {
        CmpOp::Eq | CmpOp::Is => values_equal(left, right),
        CmpOp::NotEq | CmpOp::IsNot => !values_equal(left, right),
        CmpOp::Lt => ordering(left, right)? == Ordering::Less,
        CmpOp::LtE => ordering(left, right)? != Ordering::Greater,
        CmpOp::Gt => ordering(left, right)? == Ordering::Greater,
        CmpOp::GtE => ordering(left, right)? != Ordering::Less,
        CmpOp::In => contains(right, left)?,
        CmpOp::NotIn => !contains(right, left)?,
    })
}

/// Dict keys are strings; scalars are converted the way `str()` would.
pub fn dict_key(key: &Value) -> Result<String, ScriptError> {
    match key {
        Value::String(s) => Ok(s.clone()),
        Value::Array(_) | Value::Object(_) => Err(ScriptError::runtime(format!(
            "TypeError: unhashable type: '{}'",
            type_name(key)
        ))),
        other => Ok(repr(other)),
    }
}

fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let idx = if index < 0 { index + len } else { index };
    if (0..len).contains(&idx) {
        usize::try_from(idx).ok()
    } else {
        None
    }
}

fn require_index(index: &Value, kind: &str) -> Result<i64, ScriptError> {
    as_int(index).ok_or_else(|| {
        ScriptError::runtime(format!(
            "TypeError: {} indices must be integers, not {}",
            kind,
            type_name(index)
        ))
    })
}

pub fn get_index(target: &Value, index: &Value) -> Result<Value, ScriptError> {
    match target {
        Value::Array(items) => {
            let i = require_index(index, "list")?;
            normalize_index(i, items.len())
                .and_then(|i| items.get(i).cloned())
                .ok_or_else(|| ScriptError::runtime("IndexError: list index out of range"))
        }
        Value::String(s) => {
            let i = require_index(index, "string")?;
            let chars: Vec<char> = s.chars().collect();
            normalize_index(i, chars.len())
                .and_then(|i| chars.get(i))
                .map(|c| Value::String(c.to_string()))
                .ok_or_else(|| ScriptError::runtime("IndexError: string index out of range"))
        }
        Value::Object(map) => {
            let key = dict_key(index)?;
            map.get(&key)
                .cloned()
                .ok_or_else(|| ScriptError::runtime(format!("KeyError: {}", quote(&key))))
        }
        other => Err(ScriptError::runtime(format!(
            "TypeError: '{}' object is not subscriptable",
            type_name(other)
        ))),
    }
}

/// Mutable slot for `target[index] = ...`. Dicts insert missing keys.
pub fn index_mut<'v>(target: &'v mut Value, index: &Value) -> Result<&'v mut Value, ScriptError> {
    match target {
        Value::Array(items) => {
            let i = require_index(index, "list")?;
            let len = items.len();
            normalize_index(i, len)
                .and_then(move |i| items.get_mut(i))
                .ok_or_else(|| ScriptError::runtime("IndexError: list assignment index out of range"))
        }
        Value::Object(map) => Ok(map.entry(dict_key(index)?).or_insert(Value::Null)),
        other => Err(ScriptError::runtime(format!(
            "TypeError: '{}' object does not support item assignment",
            type_name(other)
        ))),
    }
}

fn slice_bounds(len: usize, start: Option<i64>, end: Option<i64>) -> (usize, usize) {
    let len_i = i64::try_from(len).unwrap_or(i64::MAX);
    let clamp = |v: i64| -> usize {
        let v = if v < 0 { (v + len_i).max(0) } else { v.min(len_i) };
        usize::try_from(v).unwrap_or(0)
    };
    let s = start.map(clamp).unwrap_or(0);
    let e = end.map(clamp).unwrap_or(len);
    (s, e.max(s))
}

pub fn slice(target: &Value, start: Option<&Value>, end: Option<&Value>) -> Result<Value, ScriptError> {
    let bound = |v: Option<&Value>| -> Result<Option<i64>, ScriptError> {
        match v {
            None | Some(Value::Null) => Ok(None),
            Some(v) => require_index(v, "slice").map(Some),
        }
    };
    let (start, end) = (bound(start)?, bound(end)?);
    match target {
        Value::Array(items) => {
            let (s, e) = slice_bounds(items.len(), start, end);
            Ok(Value::Array(items[s..e].to_vec()))
        }
        Value::String(text) => {
            let chars: Vec<char> = text.chars().collect();
            let (s, e) = slice_bounds(chars.len(), start, end);
            Ok(Value::String(chars[s..e].iter().collect()))
        }
        other => Err(ScriptError::runtime(format!(
            "TypeError: '{}' object is not subscriptable",
            type_name(other)
        ))),
    }
}

/// Items produced by `for x in value`.
pub fn iterate(value: &Value) -> Result<Vec<Value>, ScriptError> {
    match value {
        Value::Array(items) => Ok(items.clone()),
        Value::String(s) => Ok(s.chars().map(|c| Value::String(c.to_string())).collect()),
        Value::Object(map) => Ok(map.keys().cloned().map(Value::String).collect()),
        other => Err(ScriptError::runtime(format!(
            "TypeError: '{}' object is not iterable",
            type_name(other)
        ))),
    }
}

pub fn length(value: &Value) -> Result<usize, ScriptError> {
    match value {
        Value::String(s) => Ok(s.chars().count()),
        Value::Array(items) => Ok(items.len()),
        Value::Object(map) => Ok(map.len()),
        other => Err(ScriptError::runtime(format!(
            "TypeError: object of type '{}' has no len()",
            type_name(other)
        ))),
    }
}

/// Result object a tool call evaluates to inside a script.
pub fn tool_result_object(success: bool, output: Value, error: Option<String>) -> Value {
    let mut map = Map::new();
    map.insert("success".to_string(), Value::Bool(success));
    map.insert("output".to_string(), output);
    map.insert(
        "error".to_string(),
        error.map(Value::String).unwrap_or(Value::Null),
    );
    Value::Object(map)
}
