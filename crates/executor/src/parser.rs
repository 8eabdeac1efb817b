//! Recursive-descent parser for orchestration scripts.

use crate::ast::*;
use crate::error::ScriptError;
use crate::lexer::{tokenize, Tok, Token};
use serde_json::Value;
use std::sync::Arc;

const KEYWORDS: &[&str] = &[
    "and", "as", "async", "await", "break", "class", "continue", "def", "del", "elif", "else",
    "except", "finally", "for", "from", "global", "if", "import", "in", "is", "lambda",
    "nonlocal", "not", "or", "pass", "raise", "return", "try", "while", "with", "yield",
];

pub fn parse_program(src: &str) -> Result<Vec<Stmt>, ScriptError> {
    let mut parser = Parser::new(tokenize(src)?);
    parser.program()
}

/// Parses a single expression, as found inside an f-string placeholder.
pub fn parse_expression(src: &str, line: usize) -> Result<Expr, ScriptError> {
    let tokens = tokenize(src).map_err(|e| relocate(e, line))?;
    let mut parser = Parser::new(tokens);
    let expr = parser.expr().map_err(|e| relocate(e, line))?;
    parser.skip_newlines();
    if !matches!(parser.peek(), Tok::Eof) {
        return Err(ScriptError::Syntax {
            line,
            message: format!("unexpected token in f-string expression: {}", src),
        });
    }
    Ok(expr)
}

fn relocate(error: ScriptError, line: usize) -> ScriptError {
    match error {
        ScriptError::Syntax { message, .. } => ScriptError::Syntax { line, message },
        other => other,
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> &Tok {
        self.tokens
            .get(self.pos)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn peek_next(&self) -> &Tok {
        self.tokens
            .get(self.pos + 1)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T, ScriptError> {
        Err(ScriptError::Syntax {
            line: self.line(),
            message: message.into(),
        })
    }

    fn is_op(&self, op: &str) -> bool {
        matches!(self.peek(), Tok::Op(o) if *o == op)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.is_op(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> Result<(), ScriptError> {
        if self.eat_op(op) {
            Ok(())
        } else {
            self.error(format!("expected '{}', found {}", op, describe(self.peek())))
        }
    }

    fn is_kw(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Name(n) if n == kw)
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if self.is_kw(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_kw(&mut self, kw: &str) -> Result<(), ScriptError> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            self.error(format!("expected '{}', found {}", kw, describe(self.peek())))
        }
    }

    fn expect_name(&mut self) -> Result<String, ScriptError> {
        match self.peek().clone() {
            Tok::Name(name) if !KEYWORDS.contains(&name.as_str()) => {
                self.pos += 1;
                Ok(name)
            }
            other => self.error(format!("expected a name, found {}", describe(&other))),
        }
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek(), Tok::Newline) {
            self.pos += 1;
        }
    }

    fn at_statement_end(&self) -> bool {
        matches!(self.peek(), Tok::Newline | Tok::Eof | Tok::Dedent) || self.is_op(";")
    }

    // ---- statements ----

    fn program(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        let mut body = Vec::new();
        loop {
            self.skip_newlines();
            match self.peek() {
                Tok::Eof => break,
                Tok::Indent => return self.error("unexpected indent"),
                Tok::Dedent => {
                    self.pos += 1;
                }
                _ => body.extend(self.statement()?),
            }
        }
        Ok(body)
    }

    fn statement(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        let line = self.line();
        let keyword = match self.peek() {
            Tok::Name(n) => n.clone(),
            _ => String::new(),
        };
        let compound = match keyword.as_str() {
            "if" => Some(self.if_statement()?),
            "for" => Some(self.for_statement()?),
            "while" => Some(self.while_statement()?),
            "try" => Some(self.try_statement()?),
            "def" => Some(self.def_statement()?),
            "async" if matches!(self.peek_next(), Tok::Name(n) if n == "def") => {
                self.pos += 1;
                Some(self.def_statement()?)
            }
            "class" | "with" | "lambda" | "yield" | "del" => {
                return self.error(format!(
                    "'{}' is not supported in orchestration code",
                    keyword
                ))
            }
            _ => None,
        };
        if let Some(kind) = compound {
            return Ok(vec![Stmt { kind, line }]);
        }

        let mut stmts = vec![self.simple_statement()?];
        while self.eat_op(";") {
            if self.at_statement_end() {
                break;
            }
            stmts.push(self.simple_statement()?);
        }
        match self.peek() {
            Tok::Newline => {
                self.pos += 1;
            }
            Tok::Eof | Tok::Dedent => {}
            other => {
                let found = describe(other);
                return self.error(format!("expected end of statement, found {}", found));
            }
        }
        Ok(stmts)
    }

    fn simple_statement(&mut self) -> Result<Stmt, ScriptError> {
        let line = self.line();
        let kind = if self.eat_kw("pass") {
            StmtKind::Pass
        } else if self.eat_kw("break") {
            StmtKind::Break
        } else if self.eat_kw("continue") {
            StmtKind::Continue
        } else if self.eat_kw("global") || self.eat_kw("nonlocal") {
            self.expect_name()?;
            while self.eat_op(",") {
                self.expect_name()?;
            }
            StmtKind::Pass
        } else if self.eat_kw("return") {
            if self.at_statement_end() {
                StmtKind::Return(None)
            } else {
                StmtKind::Return(Some(self.expr_list()?))
            }
        } else if self.eat_kw("raise") {
            if self.at_statement_end() {
                StmtKind::Raise(None)
            } else {
                StmtKind::Raise(Some(self.expr()?))
            }
        } else if self.eat_kw("import") {
            let mut modules = vec![self.dotted_name()?];
            if self.eat_kw("as") {
                self.expect_name()?;
            }
            while self.eat_op(",") {
                modules.push(self.dotted_name()?);
                if self.eat_kw("as") {
                    self.expect_name()?;
                }
            }
            StmtKind::Import(modules)
        } else if self.eat_kw("from") {
            let module = self.dotted_name()?;
            self.expect_kw("import")?;
            self.expect_name()?;
            while self.eat_op(",") {
                self.expect_name()?;
            }
            StmtKind::Import(vec![module])
        } else {
            self.assignment_or_expr()?
        };
        Ok(Stmt { kind, line })
    }

    fn dotted_name(&mut self) -> Result<String, ScriptError> {
        let mut name = self.expect_name()?;
        while self.eat_op(".") {
            name.push('.');
            name.push_str(&self.expect_name()?);
        }
        Ok(name)
    }

    fn assignment_or_expr(&mut self) -> Result<StmtKind, ScriptError> {
        let first = self.expr_list()?;

        // Annotated assignment: `name: type = value`
        if self.is_op(":") {
            if let Expr::Name(_) = first {
                self.pos += 1;
                self.expr()?;
                if !self.eat_op("=") {
                    return Ok(StmtKind::Pass);
                }
                let value = self.expr_list()?;
                return Ok(StmtKind::Assign(vec![to_target(first, self.line())?], value));
            }
        }

        for (op, bin) in [("+=", BinOp::Add), ("-=", BinOp::Sub), ("*=", BinOp::Mul)] {
            if self.eat_op(op) {
                let value = self.expr_list()?;
                return Ok(StmtKind::AugAssign(to_target(first, self.line())?, bin, value));
            }
        }

        if !self.is_op("=") {
            return Ok(StmtKind::Expr(first));
        }

        let mut targets = vec![first];
        let mut value = None;
        while self.eat_op("=") {
            let next = self.expr_list()?;
            if let Some(previous) = value.replace(next) {
                targets.push(previous);
            }
        }
        let value = match value {
            Some(v) => v,
            None => return self.error("expected a value after '='"),
        };
        let line = self.line();
        let targets = targets
            .into_iter()
            .map(|t| to_target(t, line))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(StmtKind::Assign(targets, value))
    }

    fn block(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        self.expect_op(":")?;
        if !matches!(self.peek(), Tok::Newline) {
            // Single-line suite: `if x: y = 1`
            return self.statement();
        }
        self.skip_newlines();
        if !matches!(self.peek(), Tok::Indent) {
            return self.error("expected an indented block");
        }
        self.pos += 1;

        let mut body = Vec::new();
        loop {
            self.skip_newlines();
            match self.peek() {
                Tok::Dedent => {
                    self.pos += 1;
                    break;
                }
                Tok::Eof => break,
                _ => body.extend(self.statement()?),
            }
        }
        Ok(body)
    }

    fn if_statement(&mut self) -> Result<StmtKind, ScriptError> {
        self.expect_kw("if")?;
        let mut branches = vec![(self.expr()?, self.block()?)];
        let mut otherwise = None;
        loop {
            self.skip_newlines();
            if self.eat_kw("elif") {
                branches.push((self.expr()?, self.block()?));
            } else if self.eat_kw("else") {
                otherwise = Some(self.block()?);
                break;
            } else {
                break;
            }
        }
        Ok(StmtKind::If(branches, otherwise))
    }

    fn for_statement(&mut self) -> Result<StmtKind, ScriptError> {
        self.expect_kw("for")?;
        let target = self.target_list()?;
        self.expect_kw("in")?;
        let iter = self.expr_list()?;
        let body = self.block()?;
        Ok(StmtKind::For(target, iter, body))
    }

    fn while_statement(&mut self) -> Result<StmtKind, ScriptError> {
        self.expect_kw("while")?;
        let condition = self.expr()?;
        let body = self.block()?;
        Ok(StmtKind::While(condition, body))
    }

    fn try_statement(&mut self) -> Result<StmtKind, ScriptError> {
        self.expect_kw("try")?;
        let body = self.block()?;
        let mut handler: Option<ExceptClause> = None;
        let mut finally = None;

        loop {
            self.skip_newlines();
            if self.eat_kw("except") {
                let mut binding = None;
                if !self.is_op(":") {
                    self.expr()?;
                    if self.eat_kw("as") {
                        binding = Some(self.expect_name()?);
                    }
                }
                let clause_body = self.block()?;
                // Exceptions are untyped: the first handler catches everything
                if handler.is_none() {
                    handler = Some(ExceptClause {
                        binding,
                        body: clause_body,
                    });
                }
            } else if self.eat_kw("finally") {
                finally = Some(self.block()?);
                break;
            } else {
                break;
            }
        }

        if handler.is_none() && finally.is_none() {
            return self.error("expected 'except' or 'finally' after 'try' block");
        }
        Ok(StmtKind::Try(body, handler, finally))
    }

    fn def_statement(&mut self) -> Result<StmtKind, ScriptError> {
        self.expect_kw("def")?;
        let name = self.expect_name()?;
        self.expect_op("(")?;
        let mut params = Vec::new();
        while !self.is_op(")") {
            if self.is_op("*") || self.is_op("**") {
                return self.error("variadic parameters are not supported");
            }
            let param = self.expect_name()?;
            if self.eat_op(":") {
                self.expr()?;
            }
            let default = if self.eat_op("=") {
                Some(self.expr()?)
            } else {
                None
            };
            params.push((param, default));
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        if self.eat_op("->") {
            self.expr()?;
        }
        let body = self.block()?;
        Ok(StmtKind::Def(Arc::new(FunctionDef { name, params, body })))
    }

    fn target_list(&mut self) -> Result<Target, ScriptError> {
        let first = self.target_atom()?;
        if !self.is_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.is_kw("in") || self.is_op("=") {
                break;
            }
            items.push(self.target_atom()?);
        }
        Ok(Target::Tuple(items))
    }

    fn target_atom(&mut self) -> Result<Target, ScriptError> {
        if self.eat_op("(") {
            let inner = self.target_list()?;
            self.expect_op(")")?;
            return Ok(inner);
        }
        if self.eat_op("[") {
            let inner = self.target_list()?;
            self.expect_op("]")?;
            return Ok(inner);
        }
        Ok(Target::Name(self.expect_name()?))
    }

    // ---- expressions ----

    /// Comma-separated expressions; more than one forms a tuple (list).
    fn expr_list(&mut self) -> Result<Expr, ScriptError> {
        let first = self.expr()?;
        if !self.is_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_statement_end() || self.is_op("=") || self.is_op(")") || self.is_op(":") {
                break;
            }
            items.push(self.expr()?);
        }
        Ok(Expr::List(items))
    }

    pub(crate) fn expr(&mut self) -> Result<Expr, ScriptError> {
        if self.is_kw("lambda") {
            return self.error("lambda is not supported in orchestration code");
        }
        let value = self.or_expr()?;
        if self.eat_kw("if") {
            let condition = self.or_expr()?;
            self.expect_kw("else")?;
            let otherwise = self.expr()?;
            return Ok(Expr::IfElse(
                Box::new(condition),
                Box::new(value),
                Box::new(otherwise),
            ));
        }
        Ok(value)
    }

    fn or_expr(&mut self) -> Result<Expr, ScriptError> {
        let mut left = self.and_expr()?;
        while self.eat_kw("or") {
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, ScriptError> {
        let mut left = self.not_expr()?;
        while self.eat_kw("and") {
            let right = self.not_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr, ScriptError> {
        if self.eat_kw("not") {
            let inner = self.not_expr()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ScriptError> {
        let first = self.arith()?;
        let mut rest = Vec::new();
        loop {
            let tok = self.peek().clone();
            let op = match &tok {
                Tok::Op("==") => CmpOp::Eq,
                Tok::Op("!=") => CmpOp::NotEq,
                Tok::Op("<") => CmpOp::Lt,
                Tok::Op("<=") => CmpOp::LtE,
                Tok::Op(">") => CmpOp::Gt,
                Tok::Op(">=") => CmpOp::GtE,
                Tok::Name(n) if n == "in" => CmpOp::In,
                Tok::Name(n) if n == "not" && matches!(self.peek_next(), Tok::Name(m) if m == "in") => {
                    self.pos += 1;
                    CmpOp::NotIn
                }
                Tok::Name(n) if n == "is" => {
                    if matches!(self.peek_next(), Tok::Name(m) if m == "not") {
                        self.pos += 1;
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    }
                }
                _ => break,
            };
            self.pos += 1;
            rest.push((op, self.arith()?));
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare(Box::new(first), rest))
        }
    }

    fn arith(&mut self) -> Result<Expr, ScriptError> {
        let mut left = self.term()?;
        loop {
            let op = if self.eat_op("+") {
                BinOp::Add
            } else if self.eat_op("-") {
                BinOp::Sub
            } else {
                break;
            };
            let right = self.term()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr, ScriptError> {
        let mut left = self.factor()?;
        loop {
            let op = if self.eat_op("*") {
                BinOp::Mul
            } else if self.eat_op("//") {
                BinOp::FloorDiv
            } else if self.eat_op("/") {
                BinOp::Div
            } else if self.eat_op("%") {
                BinOp::Mod
            } else {
                break;
            };
            let right = self.factor()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn factor(&mut self) -> Result<Expr, ScriptError> {
        if self.eat_op("-") {
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.factor()?)));
        }
        if self.eat_op("+") {
            return Ok(Expr::Unary(UnaryOp::Plus, Box::new(self.factor()?)));
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr, ScriptError> {
        // `await` is accepted and ignored: every call already completes
        // before its value is used.
        while self.eat_kw("await") {}
        let base = self.postfix()?;
        if self.eat_op("**") {
            let exponent = self.factor()?;
            return Ok(Expr::Binary(Box::new(base), BinOp::Pow, Box::new(exponent)));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr, ScriptError> {
        let mut expr = self.atom()?;
        loop {
            if self.eat_op("(") {
                let args = self.call_args()?;
                expr = Expr::Call(Box::new(expr), args);
            } else if self.eat_op("[") {
                expr = self.subscript(expr)?;
            } else if self.eat_op(".") {
                let name = match self.advance() {
                    Tok::Name(name) => name,
                    other => return self.error(format!("expected attribute name, found {}", describe(&other))),
                };
                expr = Expr::Attr(Box::new(expr), name);
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn subscript(&mut self, target: Expr) -> Result<Expr, ScriptError> {
        let start = if self.is_op(":") {
            None
        } else {
            Some(self.expr()?)
        };
        if self.eat_op(":") {
            let end = if self.is_op("]") {
                None
            } else {
                Some(Box::new(self.expr()?))
            };
            self.expect_op("]")?;
            return Ok(Expr::Slice(Box::new(target), start.map(Box::new), end));
        }
        self.expect_op("]")?;
        match start {
            Some(index) => Ok(Expr::Index(Box::new(target), Box::new(index))),
            None => self.error("empty subscript"),
        }
    }

    fn call_args(&mut self) -> Result<Vec<Arg>, ScriptError> {
        let mut args = Vec::new();
        while !self.is_op(")") {
            if self.eat_op("**") {
                return self.error("keyword unpacking is not supported");
            }
            if self.eat_op("*") {
                args.push(Arg::Starred(self.expr()?));
            } else if matches!(self.peek(), Tok::Name(_)) && matches!(self.peek_next(), Tok::Op("=")) {
                let name = self.expect_name()?;
                self.expect_op("=")?;
                args.push(Arg::Keyword(name, self.expr()?));
            } else {
                let value = self.expr()?;
                if self.is_kw("for") {
                    // Generator argument: sum(x for x in xs)
                    let comp = self.comprehension()?;
                    args.push(Arg::Positional(Expr::ListComp(Box::new(value), Box::new(comp))));
                } else {
                    args.push(Arg::Positional(value));
                }
            }
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        Ok(args)
    }

    fn comprehension(&mut self) -> Result<Comprehension, ScriptError> {
        self.expect_kw("for")?;
        let target = self.target_list()?;
        self.expect_kw("in")?;
        let iter = self.or_expr()?;
        let mut condition: Option<Expr> = None;
        while self.eat_kw("if") {
            let next = self.or_expr()?;
            condition = Some(match condition {
                Some(existing) => Expr::And(Box::new(existing), Box::new(next)),
                None => next,
            });
        }
        if self.is_kw("for") {
            return self.error("nested comprehensions are not supported");
        }
        Ok(Comprehension {
            target,
            iter,
            condition,
        })
    }

    fn atom(&mut self) -> Result<Expr, ScriptError> {
        let line = self.line();
        match self.advance() {
            Tok::Int(i) => Ok(Expr::Const(Value::from(i))),
            Tok::Float(f) => Ok(Expr::Const(Value::from(f))),
            Tok::Str(s) => self.string_literal(vec![FPart::Literal(s)]),
            Tok::FStr(raw) => {
                let parts = parse_fstring(&raw, line)?;
                self.string_literal(parts)
            }
            Tok::Name(name) => match name.as_str() {
                "None" => Ok(Expr::Const(Value::Null)),
                "True" => Ok(Expr::Const(Value::Bool(true))),
                "False" => Ok(Expr::Const(Value::Bool(false))),
                kw if KEYWORDS.contains(&kw) => {
                    self.pos -= 1;
                    self.error(format!("unexpected keyword '{}'", kw))
                }
                _ => Ok(Expr::Name(name)),
            },
            Tok::Op("(") => {
                if self.eat_op(")") {
                    return Ok(Expr::List(Vec::new()));
                }
                let first = self.expr()?;
                if self.is_kw("for") {
                    let comp = self.comprehension()?;
                    self.expect_op(")")?;
                    return Ok(Expr::ListComp(Box::new(first), Box::new(comp)));
                }
                if !self.is_op(",") {
                    self.expect_op(")")?;
                    return Ok(first);
                }
                let mut items = vec![first];
                while self.eat_op(",") {
                    if self.is_op(")") {
                        break;
                    }
                    items.push(self.expr()?);
                }
                self.expect_op(")")?;
                Ok(Expr::List(items))
            }
            Tok::Op("[") => {
                if self.eat_op("]") {
                    return Ok(Expr::List(Vec::new()));
                }
                let first = self.expr()?;
                if self.is_kw("for") {
                    let comp = self.comprehension()?;
                    self.expect_op("]")?;
                    return Ok(Expr::ListComp(Box::new(first), Box::new(comp)));
                }
                let mut items = vec![first];
                while self.eat_op(",") {
                    if self.is_op("]") {
                        break;
                    }
                    items.push(self.expr()?);
                }
                self.expect_op("]")?;
                Ok(Expr::List(items))
            }
            Tok::Op("{") => {
                if self.eat_op("}") {
                    return Ok(Expr::Dict(Vec::new()));
                }
                let key = self.expr()?;
                self.expect_op(":")?;
                let value = self.expr()?;
                if self.is_kw("for") {
                    let comp = self.comprehension()?;
                    self.expect_op("}")?;
                    return Ok(Expr::DictComp(Box::new((key, value)), Box::new(comp)));
                }
                let mut pairs = vec![(key, value)];
                while self.eat_op(",") {
                    if self.is_op("}") {
                        break;
                    }
                    let key = self.expr()?;
                    self.expect_op(":")?;
                    pairs.push((key, self.expr()?));
                }
                self.expect_op("}")?;
                Ok(Expr::Dict(pairs))
            }
            other => {
                self.pos = self.pos.saturating_sub(1);
                self.error(format!("unexpected {}", describe(&other)))
            }
        }
    }

    /// Joins adjacent string literals into one constant or f-string.
    fn string_literal(&mut self, mut parts: Vec<FPart>) -> Result<Expr, ScriptError> {
        loop {
            let line = self.line();
            match self.peek().clone() {
                Tok::Str(s) => {
                    self.pos += 1;
                    parts.push(FPart::Literal(s));
                }
                Tok::FStr(raw) => {
                    self.pos += 1;
                    parts.extend(parse_fstring(&raw, line)?);
                }
                _ => break,
            }
        }

        if parts.iter().all(|p| matches!(p, FPart::Literal(_))) {
            let text: String = parts
                .into_iter()
                .map(|p| match p {
                    FPart::Literal(s) => s,
                    FPart::Expr { .. } => String::new(),
                })
                .collect();
            return Ok(Expr::Const(Value::String(text)));
        }
        Ok(Expr::FString(parts))
    }
}

fn to_target(expr: Expr, line: usize) -> Result<Target, ScriptError> {
    match expr {
        Expr::Name(name) => Ok(Target::Name(name)),
        Expr::Index(obj, index) => Ok(Target::Index(obj, index)),
        Expr::List(items) => Ok(Target::Tuple(
            items
                .into_iter()
                .map(|item| to_target(item, line))
                .collect::<Result<_, _>>()?,
        )),
        Expr::Attr(_, attr) => Err(ScriptError::Syntax {
            line,
            message: format!("cannot assign to attribute '{}'", attr),
        }),
        _ => Err(ScriptError::Syntax {
            line,
            message: "cannot assign to expression".into(),
        }),
    }
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Name(n) => format!("'{}'", n),
        Tok::Int(i) => i.to_string(),
        Tok::Float(f) => f.to_string(),
        Tok::Str(_) | Tok::FStr(_) => "string".to_string(),
        Tok::Op(op) => format!("'{}'", op),
        Tok::Newline => "end of line".to_string(),
        Tok::Indent => "indent".to_string(),
        Tok::Dedent => "dedent".to_string(),
        Tok::Eof => "end of input".to_string(),
    }
}

/// Splits an f-string body into literal text and `{expr[!r][:spec]}` parts.
pub fn parse_fstring(raw: &str, line: usize) -> Result<Vec<FPart>, ScriptError> {
    let chars: Vec<char> = raw.chars().collect();
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '{' && chars.get(i + 1) == Some(&'{') {
            literal.push('{');
            i += 2;
            continue;
        }
        if c == '}' && chars.get(i + 1) == Some(&'}') {
            literal.push('}');
            i += 2;
            continue;
        }
        if c != '{' {
            literal.push(c);
            i += 1;
            continue;
        }

        // Find the matching close brace, skipping nested brackets and quotes
        let start = i + 1;
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        let mut split: Option<usize> = None;
        let mut conversion: Option<usize> = None;
        let mut j = start;
        let end = loop {
            let Some(&ch) = chars.get(j) else {
                return Err(ScriptError::Syntax {
                    line,
                    message: "unterminated '{' in f-string".into(),
                });
            };
            match (quote, ch) {
                (Some(q), ch) if ch == q => quote = None,
                (Some(_), _) => {}
                (None, '\'' | '"') => quote = Some(ch),
                (None, '(' | '[' | '{') => depth += 1,
                (None, ')' | ']') => depth = depth.saturating_sub(1),
                (None, '}') if depth == 0 => break j,
                (None, '}') => depth -= 1,
                (None, ':') if depth == 0 && split.is_none() => split = Some(j),
                (None, '!')
                    if depth == 0
                        && split.is_none()
                        && chars.get(j + 1) != Some(&'=')
                        && matches!(chars.get(j + 1), Some('r' | 's' | 'a')) =>
                {
                    conversion = Some(j)
                }
                _ => {}
            }
            j += 1;
        };

        let expr_end = conversion.or(split).unwrap_or(end);
        let expr_src: String = chars[start..expr_end].iter().collect();
        if expr_src.trim().is_empty() {
            return Err(ScriptError::Syntax {
                line,
                message: "empty expression in f-string".into(),
            });
        }
        let repr = conversion.is_some_and(|k| chars.get(k + 1) == Some(&'r'));
        let spec: String = split
            .map(|s| chars[s + 1..end].iter().collect())
            .unwrap_or_default();
        let precision = spec
            .strip_prefix('.')
            .and_then(|rest| rest.trim_end_matches(['f', '%']).parse().ok());

        if !literal.is_empty() {
            parts.push(FPart::Literal(std::mem::take(&mut literal)));
        }
        parts.push(FPart::Expr {
            expr: parse_expression(expr_src.trim(), line)?,
            precision,
            repr,
        });
        i = end + 1;
    }

    if !literal.is_empty() {
        parts.push(FPart::Literal(literal));
    }
    Ok(parts)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    fn single(src: &str) -> StmtKind {
        let mut program = parse_program(src).unwrap();
        assert_eq!(program.len(), 1, "expected one statement in {:?}", program);
        program.remove(0).kind
    }

    #[test]
    fn test_assignment_and_call() {
        match single("content = await read_file(\"a.txt\", limit=10)") {
            StmtKind::Assign(targets, Expr::Call(callee, args)) => {
                assert_eq!(targets, vec![Target::Name("content".into())]);
                assert_eq!(*callee, Expr::Name("read_file".into()));
                assert_eq!(args.len(), 2);
                assert!(matches!(&args[1], Arg::Keyword(k, _) if k == "limit"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_tuple_unpacking_for() {
        match single("for i, line in enumerate(lines):\n    print(i, line)\n") {
            StmtKind::For(Target::Tuple(names), _, body) => {
                assert_eq!(names.len(), 2);
                assert_eq!(body.len(), 1);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_if_elif_else() {
        let src = "if a:\n    x = 1\nelif b:\n    x = 2\nelse:\n    x = 3\n";
        match single(src) {
            StmtKind::If(branches, Some(otherwise)) => {
                assert_eq!(branches.len(), 2);
                assert_eq!(otherwise.len(), 1);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_precedence() {
        match single("x = 1 + 2 * 3") {
            StmtKind::Assign(_, Expr::Binary(left, BinOp::Add, right)) => {
                assert_eq!(*left, Expr::Const(json!(1)));
                assert!(matches!(*right, Expr::Binary(_, BinOp::Mul, _)));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_not_in_and_is_not() {
        match single("ok = a not in b and c is not None") {
            StmtKind::Assign(_, Expr::And(left, right)) => {
                assert!(matches!(*left, Expr::Compare(_, ref ops) if ops[0].0 == CmpOp::NotIn));
                assert!(matches!(*right, Expr::Compare(_, ref ops) if ops[0].0 == CmpOp::IsNot));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_comprehensions_and_gather() {
        let src = "results = await asyncio.gather(*[read_file(p) for p in paths if p])";
        match single(src) {
            StmtKind::Assign(_, Expr::Call(callee, args)) => {
                assert!(matches!(*callee, Expr::Attr(_, ref m) if m == "gather"));
                assert!(matches!(&args[0], Arg::Starred(Expr::ListComp(_, _))));
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(matches!(
            single("total = sum(len(x) for x in items)"),
            StmtKind::Assign(_, Expr::Call(_, _))
        ));
    }

    #[test]
    fn test_fstring_parts() {
        let parts = parse_fstring("Total: {count:.2f} for {name!r} {{literal}}", 1).unwrap();
        assert_eq!(parts.len(), 5);
        assert!(matches!(&parts[1], FPart::Expr { precision: Some(2), repr: false, .. }));
        assert!(matches!(&parts[3], FPart::Expr { repr: true, .. }));
        assert_eq!(parts[4], FPart::Literal(" {literal}".into()));
    }

    #[test]
    fn test_fstring_with_index_and_slice() {
        let parts = parse_fstring("{data['k']} {text[:10]}", 1).unwrap();
        assert!(matches!(&parts[0], FPart::Expr { expr: Expr::Index(_, _), .. }));
        assert!(matches!(&parts[2], FPart::Expr { expr: Expr::Slice(_, None, Some(_)), .. }));
    }

    #[test]
    fn test_try_except_and_def() {
        let src = "async def main(path, limit=5):\n    try:\n        return read_file(path)\n    except Exception as e:\n        return str(e)\n";
        match single(src) {
            StmtKind::Def(def) => {
                assert_eq!(def.name, "main");
                assert_eq!(def.params.len(), 2);
                assert!(matches!(def.body[0].kind, StmtKind::Try(_, Some(_), None)));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_index_assignment_and_aug() {
        assert!(matches!(single("counts[k] = 1"), StmtKind::Assign(ref t, _) if matches!(t[0], Target::Index(_, _))));
        assert!(matches!(single("total += 3"), StmtKind::AugAssign(Target::Name(_), BinOp::Add, _)));
    }

    #[test]
    fn test_imports_and_semicolons() {
        let program = parse_program("import asyncio, json\nx = 1; y = 2\n").unwrap();
        assert_eq!(program.len(), 3);
        assert_eq!(program[2].line, 2);
    }

    #[test]
    fn test_syntax_errors_carry_line() {
        let err = parse_program("x = 1\ny = (2 +\n").unwrap_err();
        assert!(matches!(err, ScriptError::Syntax { .. }));
        let err = parse_program("x = 1\nclass Foo:\n    pass\n").unwrap_err();
        assert!(matches!(err, ScriptError::Syntax { line: 2, .. }));
    }

    #[test]
    fn test_single_line_suite() {
        match single("if x: y = 1\n") {
            StmtKind::If(branches, None) => assert_eq!(branches[0].1.len(), 1),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
