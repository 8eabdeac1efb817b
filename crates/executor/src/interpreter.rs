//! Async tree-walking evaluator for orchestration scripts.

use crate::ast::*;
use crate::builtins::{call_builtin, is_builtin, BuiltinContext, Keywords};
use crate::error::ScriptError;
use crate::methods::{call_method, call_mutating, is_mutating};
use crate::normalize::normalize_arguments;
use crate::value::*;
use futures::future::{join_all, BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use synlogos_tools::{Arguments, FailureKind, ToolCall, ToolRegistry, ToolResult, ToolSpec};
use tracing::{debug, warn};

const MODULES: &[&str] = &["asyncio", "json", "typing"];

#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_steps: u64,
    pub max_range: usize,
    pub max_depth: usize,
    /// Longest string (bytes) or list (items) an operator may build.
    pub max_value_len: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_steps: 100_000,
            max_range: 100_000,
            max_depth: 64,
            max_value_len: 1_000_000,
        }
    }
}

/// Tool calls issued by a script, keyed by issue order.
#[derive(Debug, Default)]
pub struct CallLog {
    next_seq: u64,
    pending: BTreeMap<u64, (ToolCall, Instant)>,
    finished: BTreeMap<u64, ToolResult>,
}

impl CallLog {
    fn issue(&mut self, name: &str, arguments: Arguments) -> (u64, ToolCall) {
        self.next_seq += 1;
        let seq = self.next_seq;
        let call = ToolCall::new(format!("orc_{}", seq), name, arguments);
        self.pending.insert(seq, (call.clone(), Instant::now()));
        (seq, call)
    }

    fn complete(&mut self, seq: u64, result: ToolResult) {
        self.pending.remove(&seq);
        self.finished.insert(seq, result);
    }

    pub fn len(&self) -> usize {
        self.pending.len() + self.finished.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Completed results in issue order.
    pub fn results(&self) -> Vec<ToolResult> {
        self.finished.values().cloned().collect()
    }

    /// Closes the log: calls still in flight get a synthesized failure.
    pub fn finish(&mut self, kind: FailureKind, detail: &str) -> Vec<ToolResult> {
        for (seq, (call, started)) in std::mem::take(&mut self.pending) {
            self.finished.insert(
                seq,
                ToolResult::synthesized(&call, kind, detail, started.elapsed()),
            );
        }
        self.results()
    }
}

/// State shared with the sandbox so partial progress survives an abort.
#[derive(Debug, Clone, Default)]
pub struct Trace {
    pub calls: Arc<Mutex<CallLog>>,
    pub output: Arc<Mutex<String>>,
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// Variable scope. Function bodies get a child of the global scope.
pub(crate) struct Env<'p> {
    vars: Mutex<HashMap<String, Value>>,
    functions: Mutex<HashMap<String, Arc<FunctionDef>>>,
    parent: Option<&'p Env<'p>>,
    depth: usize,
}

impl<'p> Env<'p> {
    pub(crate) fn global() -> Self {
        Self {
            vars: Mutex::new(HashMap::new()),
            functions: Mutex::new(HashMap::new()),
            parent: None,
            depth: 0,
        }
    }

    fn child(parent: &'p Env<'p>, depth: usize) -> Self {
        Self {
            vars: Mutex::new(HashMap::new()),
            functions: Mutex::new(HashMap::new()),
            parent: Some(parent),
            depth,
        }
    }

    pub(crate) fn get(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.vars.lock().get(name) {
            return Some(value.clone());
        }
        self.parent.and_then(|p| p.get(name))
    }

    fn set(&self, name: &str, value: Value) {
        self.vars.lock().insert(name.to_string(), value);
    }

    fn function(&self, name: &str) -> Option<Arc<FunctionDef>> {
        if let Some(def) = self.functions.lock().get(name) {
            return Some(def.clone());
        }
        self.parent.and_then(|p| p.function(name))
    }

    fn define(&self, def: Arc<FunctionDef>) {
        self.functions.lock().insert(def.name.clone(), def);
    }

    /// Runs `f` on the variable in the nearest scope that holds it.
    fn with_var_mut<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut Value) -> Result<R, ScriptError>,
    ) -> Result<R, ScriptError> {
        {
            let mut vars = self.vars.lock();
            if let Some(value) = vars.get_mut(name) {
                return f(value);
            }
        }
        match self.parent {
            Some(parent) => parent.with_var_mut(name, f),
            None => Err(name_error(name)),
        }
    }
}

fn root<'a>(env: &'a Env<'a>) -> &'a Env<'a> {
    let mut current = env;
    while let Some(parent) = current.parent {
        current = parent;
    }
    current
}

fn name_error(name: &str) -> ScriptError {
    ScriptError::runtime(format!("NameError: name '{}' is not defined", name))
}

/// Navigates `keys` inside `value` and returns the addressed slot.
fn walk_mut<'v>(mut value: &'v mut Value, keys: &[Value]) -> Result<&'v mut Value, ScriptError> {
    for key in keys {
        value = index_mut(value, key)?;
    }
    Ok(value)
}

/// A variable or a chain of subscripts rooted at one.
struct Place {
    name: String,
    keys: Vec<Value>,
}

enum GatherSlot<'e> {
    Expr(&'e Expr),
    Scoped(&'e Expr, usize),
    Ready(Value),
}

pub struct Interpreter {
    registry: Arc<ToolRegistry>,
    tools: HashMap<String, ToolSpec>,
    limits: Limits,
    trace: Trace,
    steps: AtomicU64,
}

impl Interpreter {
    /// `tools` is the namespace: only these specs are callable from a script.
    pub fn new(registry: Arc<ToolRegistry>, tools: Vec<ToolSpec>, limits: Limits, trace: Trace) -> Self {
        Self {
            registry,
            tools: tools.into_iter().map(|spec| (spec.name.clone(), spec)).collect(),
            limits,
            trace,
            steps: AtomicU64::new(0),
        }
    }

    pub fn steps(&self) -> u64 {
        self.steps.load(Ordering::Relaxed)
    }

    /// Executes a program. Yields the explicit `return` value, else the
    /// top-level `result` variable.
    pub async fn run(&self, program: &[Stmt]) -> Result<Option<Value>, ScriptError> {
        let env = Env::global();
        let value = match self.exec_block(program, &env).await? {
            Flow::Return(value) => Some(value),
            Flow::Normal => env.get("result"),
            Flow::Break | Flow::Continue => {
                return Err(ScriptError::runtime("SyntaxError: 'break' or 'continue' outside loop"))
            }
        };
        Ok(value.filter(|v| !v.is_null()))
    }

    fn tick(&self) -> Result<(), ScriptError> {
        let steps = self.steps.fetch_add(1, Ordering::Relaxed) + 1;
        if steps > self.limits.max_steps {
            return Err(ScriptError::Limit(format!(
                "step budget of {} exceeded",
                self.limits.max_steps
            )));
        }
        Ok(())
    }

    fn builtin_context(&self) -> BuiltinContext<'_> {
        BuiltinContext {
            output: &self.trace.output,
            max_range: self.limits.max_range,
            max_value_len: self.limits.max_value_len,
        }
    }

    // ---- statements ----

    fn exec_block<'a>(
        &'a self,
        body: &'a [Stmt],
        env: &'a Env<'a>,
    ) -> BoxFuture<'a, Result<Flow, ScriptError>> {
        async move {
            for stmt in body {
                match self.exec(stmt, env).await? {
                    Flow::Normal => {}
                    flow => return Ok(flow),
                }
            }
            Ok(Flow::Normal)
        }
        .boxed()
    }

    fn exec<'a>(&'a self, stmt: &'a Stmt, env: &'a Env<'a>) -> BoxFuture<'a, Result<Flow, ScriptError>> {
        async move {
            self.tick()?;
            match &stmt.kind {
                StmtKind::Expr(expr) => {
                    self.eval(expr, env).await?;
                }
                StmtKind::Assign(targets, expr) => {
                    let value = self.eval(expr, env).await?;
                    for target in targets {
                        self.assign(target, value.clone(), env).await?;
                    }
                }
                StmtKind::AugAssign(target, op, expr) => {
                    let current = self.read_target(target, env).await?;
                    let rhs = self.eval(expr, env).await?;
                    let updated = binary(*op, &current, &rhs, self.limits.max_value_len)?;
                    self.assign(target, updated, env).await?;
                }
                StmtKind::If(branches, otherwise) => {
                    for (condition, body) in branches {
                        if truthy(&self.eval(condition, env).await?) {
                            return self.exec_block(body, env).await;
                        }
                    }
                    if let Some(body) = otherwise {
                        return self.exec_block(body, env).await;
                    }
                }
                StmtKind::For(target, iter, body) => {
                    let items = iterate(&self.eval(iter, env).await?)?;
                    for item in items {
                        tokio::task::yield_now().await;
                        bind(target, item, env)?;
                        match self.exec_block(body, env).await? {
                            Flow::Break => break,
                            Flow::Return(value) => return Ok(Flow::Return(value)),
                            Flow::Normal | Flow::Continue => {}
                        }
                    }
                }
                StmtKind::While(condition, body) => {
                    while truthy(&self.eval(condition, env).await?) {
                        tokio::task::yield_now().await;
                        self.tick()?;
                        match self.exec_block(body, env).await? {
                            Flow::Break => break,
                            Flow::Return(value) => return Ok(Flow::Return(value)),
                            Flow::Normal | Flow::Continue => {}
                        }
                    }
                }
                StmtKind::Try(body, handler, finally) => {
                    let mut outcome = self.exec_block(body, env).await;
                    let caught = match (&outcome, handler) {
                        (Err(error), Some(clause)) if error.is_catchable() => {
                            Some((error.to_string(), clause))
                        }
                        _ => None,
                    };
                    if let Some((message, clause)) = caught {
                        debug!("Script caught: {}", message);
                        if let Some(binding) = &clause.binding {
                            env.set(binding, Value::String(message));
                        }
                        outcome = self.exec_block(&clause.body, env).await;
                    }
                    if let Some(finally) = finally {
                        if !matches!(outcome, Err(ScriptError::Limit(_))) {
                            match self.exec_block(finally, env).await? {
                                Flow::Normal => {}
                                flow => return Ok(flow),
                            }
                        }
                    }
                    return outcome;
                }
                StmtKind::Def(def) => env.define(def.clone()),
                StmtKind::Return(expr) => {
                    let value = match expr {
                        Some(expr) => self.eval(expr, env).await?,
                        None => Value::Null,
                    };
                    return Ok(Flow::Return(value));
                }
                StmtKind::Raise(expr) => {
                    let message = match expr {
                        Some(expr) => to_str(&self.eval(expr, env).await?),
                        None => "RuntimeError: No active exception to reraise".to_string(),
                    };
                    return Err(ScriptError::Runtime(message));
                }
                StmtKind::Import(modules) => {
                    for module in modules {
                        let top = module.split('.').next().unwrap_or(module);
                        if !MODULES.contains(&top) {
                            return Err(ScriptError::runtime(format!(
                                "ModuleNotFoundError: No module named '{}'",
                                module
                            )));
                        }
                    }
                }
                StmtKind::Break => return Ok(Flow::Break),
                StmtKind::Continue => return Ok(Flow::Continue),
                StmtKind::Pass => {}
            }
            Ok(Flow::Normal)
        }
        .boxed()
    }

    fn assign<'a>(
        &'a self,
        target: &'a Target,
        value: Value,
        env: &'a Env<'a>,
    ) -> BoxFuture<'a, Result<(), ScriptError>> {
        async move {
            match target {
                Target::Index(base, index) => {
                    let place = self.place(base, env).await?.ok_or_else(|| {
                        ScriptError::runtime("TypeError: cannot assign to a temporary value")
                    })?;
                    let index = self.eval(index, env).await?;
                    env.with_var_mut(&place.name, |slot| {
                        let container = walk_mut(slot, &place.keys)?;
                        *index_mut(container, &index)? = value;
                        Ok(())
                    })
                }
                other => bind(other, value, env),
            }
        }
        .boxed()
    }

    async fn read_target(&self, target: &Target, env: &Env<'_>) -> Result<Value, ScriptError> {
        match target {
            Target::Name(name) => env.get(name).ok_or_else(|| name_error(name)),
            Target::Index(base, index) => {
                let container = self.eval(base, env).await?;
                let index = self.eval(index, env).await?;
                get_index(&container, &index)
            }
            Target::Tuple(_) => Err(ScriptError::runtime(
                "SyntaxError: illegal expression for augmented assignment",
            )),
        }
    }

    fn place<'a>(&'a self, expr: &'a Expr, env: &'a Env<'a>) -> BoxFuture<'a, Result<Option<Place>, ScriptError>> {
        async move {
            match expr {
                Expr::Name(name) => Ok(Some(Place {
                    name: name.clone(),
                    keys: Vec::new(),
                })),
                Expr::Index(base, index) => {
                    let Some(mut place) = self.place(base, env).await? else {
                        return Ok(None);
                    };
                    place.keys.push(self.eval(index, env).await?);
                    Ok(Some(place))
                }
                _ => Ok(None),
            }
        }
        .boxed()
    }

    // ---- expressions ----

    pub(crate) fn eval<'a>(&'a self, expr: &'a Expr, env: &'a Env<'a>) -> BoxFuture<'a, Result<Value, ScriptError>> {
        async move {
            match expr {
                Expr::Const(value) => Ok(value.clone()),
                Expr::Name(name) => env.get(name).ok_or_else(|| name_error(name)),
                Expr::FString(parts) => {
                    let mut text = String::new();
                    for part in parts {
                        match part {
                            FPart::Literal(s) => text.push_str(s),
                            FPart::Expr { expr, precision, repr: as_repr } => {
                                let value = self.eval(expr, env).await?;
                                match precision {
                                    Some(p) if *p > self.limits.max_value_len => {
                                        return Err(ScriptError::Limit(format!(
                                            "precision {} exceeds {}",
                                            p, self.limits.max_value_len
                                        )))
                                    }
                                    Some(p) => text.push_str(&format_precision(&value, *p)?),
                                    None if *as_repr => text.push_str(&repr(&value)),
                                    None => text.push_str(&to_str(&value)),
                                }
                            }
                        }
                    }
                    Ok(Value::String(text))
                }
                Expr::List(items) => {
                    let mut values = Vec::with_capacity(items.len());
                    for item in items {
                        values.push(self.eval(item, env).await?);
                    }
                    Ok(Value::Array(values))
                }
                Expr::Dict(pairs) => {
                    let mut map = Map::new();
                    for (key, value) in pairs {
                        let key = dict_key(&self.eval(key, env).await?)?;
                        map.insert(key, self.eval(value, env).await?);
                    }
                    Ok(Value::Object(map))
                }
                Expr::ListComp(element, comp) => {
                    let items = iterate(&self.eval(&comp.iter, env).await?)?;
                    let mut values = Vec::new();
                    for item in items {
                        self.tick()?;
                        let scope = Env::child(env, env.depth);
                        bind(&comp.target, item, &scope)?;
                        if let Some(condition) = &comp.condition {
                            if !truthy(&self.eval(condition, &scope).await?) {
                                continue;
                            }
                        }
                        values.push(self.eval(element, &scope).await?);
                    }
                    Ok(Value::Array(values))
                }
                Expr::DictComp(pair, comp) => {
                    let items = iterate(&self.eval(&comp.iter, env).await?)?;
                    let mut map = Map::new();
                    for item in items {
                        self.tick()?;
                        let scope = Env::child(env, env.depth);
                        bind(&comp.target, item, &scope)?;
                        if let Some(condition) = &comp.condition {
                            if !truthy(&self.eval(condition, &scope).await?) {
                                continue;
                            }
                        }
                        let key = dict_key(&self.eval(&pair.0, &scope).await?)?;
                        map.insert(key, self.eval(&pair.1, &scope).await?);
                    }
                    Ok(Value::Object(map))
                }
                Expr::Attr(base, attr) => {
                    if let Expr::Name(module) = base.as_ref() {
                        if MODULES.contains(&module.as_str()) && env.get(module).is_none() {
                            return Err(ScriptError::runtime(format!(
                                "TypeError: {}.{} can only be called",
                                module, attr
                            )));
                        }
                    }
                    let value = self.eval(base, env).await?;
                    match value.as_object().and_then(|map| map.get(attr)) {
                        Some(field) => Ok(field.clone()),
                        None => Err(ScriptError::runtime(format!(
                            "AttributeError: '{}' object has no attribute '{}'",
                            type_name(&value),
                            attr
                        ))),
                    }
                }
                Expr::Index(base, index) => {
                    let container = self.eval(base, env).await?;
                    let index = self.eval(index, env).await?;
                    get_index(&container, &index)
                }
                Expr::Slice(base, start, end) => {
                    let container = self.eval(base, env).await?;
                    let start = match start {
                        Some(e) => Some(self.eval(e, env).await?),
                        None => None,
                    };
                    let end = match end {
                        Some(e) => Some(self.eval(e, env).await?),
                        None => None,
                    };
                    slice(&container, start.as_ref(), end.as_ref())
                }
                Expr::Call(callee, args) => self.call(callee, args, env).await,
                Expr::Unary(op, operand) => {
                    let value = self.eval(operand, env).await?;
                    match op {
                        UnaryOp::Not => Ok(Value::Bool(!truthy(&value))),
                        UnaryOp::Neg => negate(&value),
                        UnaryOp::Plus => match as_num(&value) {
                            Some(num) => Ok(num_value(num)),
                            None => Err(ScriptError::runtime(format!(
                                "TypeError: bad operand type for unary +: '{}'",
                                type_name(&value)
                            ))),
                        },
                    }
                }
                Expr::Binary(left, op, right) => {
                    let left = self.eval(left, env).await?;
                    let right = self.eval(right, env).await?;
                    binary(*op, &left, &right, self.limits.max_value_len)
                }
                Expr::Compare(first, rest) => {
                    let mut left = self.eval(first, env).await?;
                    for (op, expr) in rest {
                        let right = self.eval(expr, env).await?;
                        if !compare(*op, &left, &right)? {
                            return Ok(Value::Bool(false));
                        }
                        left = right;
                    }
                    Ok(Value::Bool(true))
                }
                Expr::And(left, right) => {
                    let left = self.eval(left, env).await?;
                    if !truthy(&left) {
                        return Ok(left);
                    }
                    self.eval(right, env).await
                }
                Expr::Or(left, right) => {
                    let left = self.eval(left, env).await?;
                    if truthy(&left) {
                        return Ok(left);
                    }
                    self.eval(right, env).await
                }
                Expr::IfElse(condition, then, otherwise) => {
                    if truthy(&self.eval(condition, env).await?) {
                        self.eval(then, env).await
                    } else {
                        self.eval(otherwise, env).await
                    }
                }
            }
        }
        .boxed()
    }

    async fn eval_args(&self, args: &[Arg], env: &Env<'_>) -> Result<(Vec<Value>, Keywords), ScriptError> {
        let mut positional = Vec::new();
        let mut keywords: Keywords = Vec::new();
        for arg in args {
            match arg {
                Arg::Positional(expr) => positional.push(self.eval(expr, env).await?),
                Arg::Starred(expr) => positional.extend(iterate(&self.eval(expr, env).await?)?),
                Arg::Keyword(name, expr) => {
                    if keywords.iter().any(|(k, _)| k == name) {
                        return Err(ScriptError::runtime(format!(
                            "SyntaxError: keyword argument repeated: {}",
                            name
                        )));
                    }
                    keywords.push((name.clone(), self.eval(expr, env).await?));
                }
            }
        }
        Ok((positional, keywords))
    }

    async fn call(&self, callee: &Expr, args: &[Arg], env: &Env<'_>) -> Result<Value, ScriptError> {
        self.tick()?;
        match callee {
            Expr::Name(name) => {
                if let Some(def) = env.function(name) {
                    return self.call_function(&def, args, env).await;
                }
                if self.tools.contains_key(name) {
                    return self.call_tool(name, args, env).await;
                }
                if name == "gather" {
                    return self.gather(args, env).await;
                }
                if is_builtin(name) {
                    let (positional, keywords) = self.eval_args(args, env).await?;
                    if let Some(result) = call_builtin(name, positional, keywords, &self.builtin_context()) {
                        return result;
                    }
                }
                if env.get(name).is_some() {
                    return Err(ScriptError::runtime(format!(
                        "TypeError: '{}' is not callable",
                        name
                    )));
                }
                Err(name_error(name))
            }
            Expr::Attr(base, method) => {
                if let Expr::Name(module) = base.as_ref() {
                    if MODULES.contains(&module.as_str()) && env.get(module).is_none() {
                        return self.call_module(module, method, args, env).await;
                    }
                }

                if is_mutating(method) {
                    if let Some(place) = self.place(base, env).await? {
                        let (positional, keywords) = self.eval_args(args, env).await?;
                        return env.with_var_mut(&place.name, |slot| {
                            let target = walk_mut(slot, &place.keys)?;
                            call_mutating(target, method, positional, &keywords)
                        });
                    }
                }

                let receiver = self.eval(base, env).await?;
                let (positional, keywords) = self.eval_args(args, env).await?;
                call_method(&receiver, method, positional, &keywords)
            }
            other => {
                let value = self.eval(other, env).await?;
                Err(ScriptError::runtime(format!(
                    "TypeError: '{}' object is not callable",
                    type_name(&value)
                )))
            }
        }
    }

    async fn call_module(
        &self,
        module: &str,
        function: &str,
        args: &[Arg],
        env: &Env<'_>,
    ) -> Result<Value, ScriptError> {
        match (module, function) {
            ("asyncio", "gather") => self.gather(args, env).await,
            // Calls already run to completion when evaluated
            ("asyncio", "run" | "create_task" | "ensure_future" | "wait_for") => {
                let (positional, _) = self.eval_args(args, env).await?;
                Ok(positional.into_iter().next().unwrap_or(Value::Null))
            }
            ("asyncio", "sleep") => {
                let (positional, _) = self.eval_args(args, env).await?;
                let seconds = positional
                    .first()
                    .and_then(as_num)
                    .map(|n| match n {
                        Num::Int(i) => i as f64,
                        Num::Float(f) => f,
                    })
                    .unwrap_or(0.0);
                if seconds > 0.0 && seconds.is_finite() {
                    tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
                }
                Ok(Value::Null)
            }
            ("json", "dumps") => {
                let (positional, keywords) = self.eval_args(args, env).await?;
                let value = positional.first().cloned().unwrap_or(Value::Null);
                let indent = keywords
                    .iter()
                    .any(|(k, v)| k == "indent" && !v.is_null());
                let text = if indent {
                    serde_json::to_string_pretty(&value)
                } else {
                    serde_json::to_string(&value)
                };
                text.map(Value::String)
                    .map_err(|e| ScriptError::runtime(format!("TypeError: {}", e)))
            }
            ("json", "loads") => {
                let (positional, _) = self.eval_args(args, env).await?;
                match positional.first() {
                    Some(Value::String(text)) => serde_json::from_str(text)
                        .map_err(|e| ScriptError::runtime(format!("JSONDecodeError: {}", e))),
                    Some(other) => Err(ScriptError::runtime(format!(
                        "TypeError: the JSON object must be str, not {}",
                        type_name(other)
                    ))),
                    None => Err(ScriptError::runtime("TypeError: loads() missing argument")),
                }
            }
            _ => Err(ScriptError::runtime(format!(
                "AttributeError: module '{}' has no attribute '{}'",
                module, function
            ))),
        }
    }

    async fn call_function(&self, def: &FunctionDef, args: &[Arg], env: &Env<'_>) -> Result<Value, ScriptError> {
        let depth = env.depth + 1;
        if depth > self.limits.max_depth {
            return Err(ScriptError::runtime(
                "RecursionError: maximum recursion depth exceeded",
            ));
        }
        let (positional, keywords) = self.eval_args(args, env).await?;
        if positional.len() > def.params.len() {
            return Err(ScriptError::runtime(format!(
                "TypeError: {}() takes {} positional argument(s) but {} were given",
                def.name,
                def.params.len(),
                positional.len()
            )));
        }

        let globals = root(env);
        let local = Env::child(globals, depth);
        let mut bound: HashMap<&str, Value> = def
            .params
            .iter()
            .zip(positional)
            .map(|((name, _), value)| (name.as_str(), value))
            .collect();
        for (name, value) in keywords {
            let Some((param, _)) = def.params.iter().find(|(p, _)| *p == name) else {
                return Err(ScriptError::runtime(format!(
                    "TypeError: {}() got an unexpected keyword argument '{}'",
                    def.name, name
                )));
            };
            if bound.insert(param.as_str(), value).is_some() {
                return Err(ScriptError::runtime(format!(
                    "TypeError: {}() got multiple values for argument '{}'",
                    def.name, name
                )));
            }
        }
        for (name, default) in &def.params {
            let value = match (bound.remove(name.as_str()), default) {
                (Some(value), _) => value,
                (None, Some(expr)) => self.eval(expr, globals).await?,
                (None, None) => {
                    return Err(ScriptError::runtime(format!(
                        "TypeError: {}() missing required argument: '{}'",
                        def.name, name
                    )))
                }
            };
            local.set(name, value);
        }

        match self.exec_block(&def.body, &local).await? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::Null),
        }
    }

    /// Issues one tool call. Failures become a result object, never a fault.
    async fn call_tool(&self, name: &str, args: &[Arg], env: &Env<'_>) -> Result<Value, ScriptError> {
        let (positional, keywords) = self.eval_args(args, env).await?;
        let Some(spec) = self.tools.get(name) else {
            return Err(name_error(name));
        };

        let result = match normalize_arguments(spec, positional, keywords) {
            Ok(arguments) => {
                let (seq, call) = self.trace.calls.lock().issue(name, arguments);
                debug!("Script issued {} as {}", name, call.id);
                let result = self.registry.invoke(&call).await;
                self.trace.calls.lock().complete(seq, result.clone());
                result
            }
            Err(error) => {
                warn!("Script call to {} rejected: {}", name, error);
                let mut log = self.trace.calls.lock();
                let (seq, call) = log.issue(name, Arguments::new());
                let result = ToolResult::failure(&call, &error, Duration::ZERO);
                log.complete(seq, result.clone());
                result
            }
        };

        Ok(match result.payload() {
            Some(payload) => tool_result_object(true, payload.clone(), None),
            None => tool_result_object(
                false,
                Value::String(String::new()),
                result.error().map(str::to_string),
            ),
        })
    }

    /// Evaluates every argument concurrently; `*[expr for x in xs]`
    /// contributes one concurrent evaluation per element.
    async fn gather(&self, args: &[Arg], env: &Env<'_>) -> Result<Value, ScriptError> {
        let mut slots: Vec<GatherSlot<'_>> = Vec::new();
        let mut scopes: Vec<Env<'_>> = Vec::new();

        for arg in args {
            match arg {
                Arg::Positional(expr) => slots.push(GatherSlot::Expr(expr)),
                Arg::Starred(Expr::ListComp(element, comp)) => {
                    for item in iterate(&self.eval(&comp.iter, env).await?)? {
                        self.tick()?;
                        let scope = Env::child(env, env.depth);
                        bind(&comp.target, item, &scope)?;
                        if let Some(condition) = &comp.condition {
                            if !truthy(&self.eval(condition, &scope).await?) {
                                continue;
                            }
                        }
                        scopes.push(scope);
                        slots.push(GatherSlot::Scoped(element, scopes.len() - 1));
                    }
                }
                Arg::Starred(expr) => {
                    for value in iterate(&self.eval(expr, env).await?)? {
                        slots.push(GatherSlot::Ready(value));
                    }
                }
                // return_exceptions and friends
                Arg::Keyword(..) => {}
            }
        }

        let futures = slots.iter().map(|slot| match slot {
            GatherSlot::Expr(expr) => self.eval(expr, env),
            GatherSlot::Scoped(expr, index) => self.eval(expr, &scopes[*index]),
            GatherSlot::Ready(value) => {
                let value = value.clone();
                async move { Ok(value) }.boxed()
            }
        });
        let values = join_all(futures)
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Value::Array(values))
    }
}

/// Binds a name or tuple target without evaluating anything.
fn bind(target: &Target, value: Value, env: &Env<'_>) -> Result<(), ScriptError> {
    match target {
        Target::Name(name) => {
            env.set(name, value);
            Ok(())
        }
        Target::Tuple(targets) => {
            let items = iterate(&value)?;
            if items.len() != targets.len() {
                return Err(ScriptError::runtime(format!(
                    "ValueError: expected {} values to unpack, got {}",
                    targets.len(),
                    items.len()
                )));
            }
            for (target, item) in targets.iter().zip(items) {
                bind(target, item, env)?;
            }
            Ok(())
        }
        Target::Index(..) => Err(ScriptError::runtime(
            "SyntaxError: subscript targets are not allowed here",
        )),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::parser::parse_program;
    use serde_json::json;

    async fn run(src: &str) -> (Result<Option<Value>, ScriptError>, String) {
        let trace = Trace::default();
        let interpreter = Interpreter::new(
            Arc::new(ToolRegistry::new()),
            Vec::new(),
            Limits {
                max_steps: 10_000,
                max_range: 1_000,
                max_depth: 16,
                max_value_len: 10_000,
            },
            trace.clone(),
        );
        let program = parse_program(src).unwrap();
        let result = interpreter.run(&program).await;
        let output = trace.output.lock().clone();
        (result, output)
    }

    #[tokio::test]
    async fn test_arithmetic_and_result_variable() {
        let (result, _) = run("x = 2 + 2\nresult = x * 10\n").await;
        assert_eq!(result.unwrap(), Some(json!(40)));
    }

    #[tokio::test]
    async fn test_explicit_return_wins() {
        let (result, _) = run("result = 1\nreturn 'done'\n").await;
        assert_eq!(result.unwrap(), Some(json!("done")));
    }

    #[tokio::test]
    async fn test_print_and_fstring() {
        let (result, output) = run("name = 'x'\nprint(f\"hi {name!r} {3/2:.2f}\")\n").await;
        assert_eq!(result.unwrap(), None);
        assert_eq!(output, "hi 'x' 1.50\n");
    }

    #[tokio::test]
    async fn test_loops_and_mutation() {
        let src = r#"
counts = {}
items = []
for word in "a b a c".split():
    counts[word] = counts.get(word, 0) + 1
    if word == "c":
        break
    items.append(word)
result = [counts, items]
"#;
        let (result, _) = run(src).await;
        assert_eq!(result.unwrap(), Some(json!([{"a": 2, "b": 1, "c": 1}, ["a", "b", "a"]])));
    }

    #[tokio::test]
    async fn test_functions_share_global_lists() {
        let src = r#"
seen = []
def visit(x, scale=2):
    seen.append(x * scale)
    return len(seen)
visit(1)
n = visit(2, scale=3)
result = [n, seen]
"#;
        let (result, _) = run(src).await;
        assert_eq!(result.unwrap(), Some(json!([2, [2, 6]])));
    }

    #[tokio::test]
    async fn test_try_except_catches_runtime_errors() {
        let src = r#"
try:
    value = {}["missing"]
except KeyError as e:
    value = "caught: " + str(e)
result = value
"#;
        let (result, _) = run(src).await;
        assert_eq!(result.unwrap(), Some(json!("caught: KeyError: 'missing'")));
    }

    #[tokio::test]
    async fn test_uncaught_error_faults() {
        let (result, _) = run("x = 1\ny = x + 'a'\n").await;
        assert!(matches!(result, Err(ScriptError::Runtime(m)) if m.starts_with("TypeError")));
    }

    #[tokio::test]
    async fn test_step_budget() {
        let (result, _) = run("while True:\n    pass\n").await;
        assert!(matches!(result, Err(ScriptError::Limit(_))));
    }

    #[tokio::test]
    async fn test_recursion_limit() {
        let (result, _) = run("def f(n):\n    return f(n + 1)\nf(0)\n").await;
        assert!(matches!(result, Err(ScriptError::Runtime(m)) if m.starts_with("RecursionError")));
    }

    #[tokio::test]
    async fn test_comprehensions_do_not_leak() {
        let src = "squares = [x * x for x in range(5) if x % 2 == 0]\nresult = [squares, {k: v for k, v in [['a', 1]]}]\n";
        let (result, _) = run(src).await;
        assert_eq!(result.unwrap(), Some(json!([[0, 4, 16], {"a": 1}])));
    }

    #[tokio::test]
    async fn test_imports_and_json() {
        let src = "import asyncio\nimport json\nresult = json.loads(json.dumps({'a': [1, 2]}))['a']\n";
        let (result, _) = run(src).await;
        assert_eq!(result.unwrap(), Some(json!([1, 2])));

        let (result, _) = run("import os\n").await;
        assert!(matches!(result, Err(ScriptError::Runtime(m)) if m.contains("No module named 'os'")));
    }

    #[tokio::test]
    async fn test_unknown_name() {
        let (result, _) = run("open('x')\n").await;
        assert!(matches!(result, Err(ScriptError::Runtime(m)) if m.contains("NameError")));
    }

    #[test]
    fn test_call_log_synthesizes_pending() {
        let mut log = CallLog::default();
        let (first, call) = log.issue("read_file", Arguments::new());
        log.issue("grep", Arguments::new());
        log.complete(
            first,
            ToolResult::success(&call, json!("ok"), Duration::from_millis(1)),
        );
        let results = log.finish(FailureKind::Timeout, "execution timed out");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].call_id, "orc_1");
        assert!(results[0].is_success());
        assert_eq!(results[1].call_id, "orc_2");
        assert_eq!(results[1].error(), Some("execution timed out"));
    }
}
