//! Tokenizer for orchestration scripts. Produces Python-style
//! `Indent`/`Dedent`/`Newline` tokens; newlines inside brackets are ignored.

use crate::error::ScriptError;

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    /// Raw body of an f-string; split into parts by the parser.
    FStr(String),
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
}

const OPERATORS: &[&str] = &[
    "**", "//", "==", "!=", "<=", ">=", "+=", "-=", "*=", "->", "+", "-", "*", "/", "%", "<",
    ">", "=", "(", ")", "[", "]", "{", "}", ",", ":", ".", ";",
];

const TAB_WIDTH: usize = 4;

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    depth: usize,
    indents: Vec<usize>,
    tokens: Vec<Token>,
}

/// Strips the indentation common to every non-blank line.
pub fn dedent(src: &str) -> String {
    let common = src
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start_matches([' ', '\t']).len())
        .min()
        .unwrap_or(0);
    if common == 0 {
        return src.to_string();
    }
    src.lines()
        .map(|line| line.get(common..).unwrap_or("").trim_end_matches('\r'))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn tokenize(src: &str) -> Result<Vec<Token>, ScriptError> {
    let src = dedent(src);
    let mut lexer = Lexer {
        chars: src.chars().collect(),
        pos: 0,
        line: 1,
        depth: 0,
        indents: vec![0],
        tokens: Vec::new(),
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

impl Lexer {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn push(&mut self, tok: Tok) {
        self.tokens.push(Token {
            tok,
            line: self.line,
        });
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::Syntax {
            line: self.line,
            message: message.into(),
        }
    }

    fn run(&mut self) -> Result<(), ScriptError> {
        let mut at_line_start = true;

        while self.pos < self.chars.len() {
            if at_line_start && self.depth == 0 {
                at_line_start = false;
                if self.handle_indentation()? {
                    continue;
                }
            }

            let Some(c) = self.peek() else { break };
            match c {
                '\n' => {
                    self.pos += 1;
                    if self.depth == 0 {
                        self.push_newline();
                        at_line_start = true;
                    }
                    self.line += 1;
                }
                ' ' | '\t' | '\r' => self.pos += 1,
                '\\' if self.peek_at(1) == Some('\n') => {
                    self.pos += 2;
                    self.line += 1;
                }
                '#' => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                '"' | '\'' => {
                    let body = self.read_string(false)?;
                    self.push(Tok::Str(body));
                }
                c if c.is_ascii_digit()
                    || (c == '.' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit())) =>
                {
                    self.read_number()?;
                }
                c if c.is_alphabetic() || c == '_' => self.read_name()?,
                _ => self.read_operator()?,
            }
        }

        self.push_newline();
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent);
        }
        self.push(Tok::Eof);
        Ok(())
    }

    fn push_newline(&mut self) {
        let needs = !matches!(
            self.tokens.last().map(|t| &t.tok),
            None | Some(Tok::Newline) | Some(Tok::Indent) | Some(Tok::Dedent)
        );
        if needs {
            self.push(Tok::Newline);
        }
    }

    /// Measures leading whitespace. Returns true when the line is blank or
    /// a comment and was skipped.
    fn handle_indentation(&mut self) -> Result<bool, ScriptError> {
        let mut width = 0;
        let mut cursor = self.pos;
        while let Some(c) = self.chars.get(cursor) {
            match c {
                ' ' => width += 1,
                '\t' => width += TAB_WIDTH,
                _ => break,
            }
            cursor += 1;
        }

        match self.chars.get(cursor) {
            None => {
                self.pos = cursor;
                return Ok(true);
            }
            Some('\n') => {
                self.pos = cursor + 1;
                self.line += 1;
                return self.handle_indentation_again();
            }
            Some('\r') if self.chars.get(cursor + 1) == Some(&'\n') => {
                self.pos = cursor + 2;
                self.line += 1;
                return self.handle_indentation_again();
            }
            Some('#') => {
                self.pos = cursor;
                while let Some(c) = self.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.pos += 1;
                }
                if self.peek() == Some('\n') {
                    self.pos += 1;
                    self.line += 1;
                }
                return self.handle_indentation_again();
            }
            _ => {}
        }

        self.pos = cursor;
        let current = self.indents.last().copied().unwrap_or(0);
        if width > current {
            self.indents.push(width);
            self.push(Tok::Indent);
        } else if width < current {
            while self.indents.last().is_some_and(|&top| top > width) {
                self.indents.pop();
                self.push(Tok::Dedent);
            }
            if self.indents.last().copied().unwrap_or(0) != width {
                return Err(self.error("unindent does not match any outer indentation level"));
            }
        }
        Ok(false)
    }

    fn handle_indentation_again(&mut self) -> Result<bool, ScriptError> {
        if self.pos >= self.chars.len() {
            return Ok(true);
        }
        self.handle_indentation()?;
        Ok(true)
    }

    fn read_name(&mut self) -> Result<(), ScriptError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        let name: String = self.chars[start..self.pos].iter().collect();

        // String prefixes: f"..", r"..", rf"..", b".."
        if matches!(self.peek(), Some('"' | '\'')) {
            let lower = name.to_ascii_lowercase();
            if matches!(lower.as_str(), "f" | "r" | "b" | "rf" | "fr" | "u") {
                let raw = lower.contains('r');
                let body = self.read_string(raw)?;
                if lower.contains('f') {
                    self.push(Tok::FStr(body));
                } else {
                    self.push(Tok::Str(body));
                }
                return Ok(());
            }
        }

        self.push(Tok::Name(name));
        Ok(())
    }

    fn read_number(&mut self) -> Result<(), ScriptError> {
        let start = self.pos;
        let mut is_float = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '_' {
                self.pos += 1;
            } else if c == '.' && !is_float && self.peek_at(1) != Some('.') {
                is_float = true;
                self.pos += 1;
            } else if (c == 'e' || c == 'E')
                && self
                    .peek_at(1)
                    .is_some_and(|d| d.is_ascii_digit() || d == '-' || d == '+')
            {
                is_float = true;
                self.pos += 2;
            } else {
                break;
            }
        }
        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect();

        let tok = if is_float {
            Tok::Float(
                text.parse()
                    .map_err(|_| self.error(format!("invalid number: {}", text)))?,
            )
        } else {
            Tok::Int(
                text.parse()
                    .map_err(|_| self.error(format!("invalid integer: {}", text)))?,
            )
        };
        self.push(tok);
        Ok(())
    }

    fn read_operator(&mut self) -> Result<(), ScriptError> {
        for op in OPERATORS {
            let matches = op
                .chars()
                .enumerate()
                .all(|(i, c)| self.peek_at(i) == Some(c));
            if matches {
                self.pos += op.chars().count();
                match *op {
                    "(" | "[" | "{" => self.depth += 1,
                    ")" | "]" | "}" => self.depth = self.depth.saturating_sub(1),
                    _ => {}
                }
                self.push(Tok::Op(op));
                return Ok(());
            }
        }
        Err(self.error(format!(
            "unexpected character '{}'",
            self.peek().unwrap_or(' ')
        )))
    }

    fn read_string(&mut self, raw: bool) -> Result<String, ScriptError> {
        let quote = self.peek().ok_or_else(|| self.error("unterminated string"))?;
        let triple = self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote);
        self.pos += if triple { 3 } else { 1 };
        let start_line = self.line;

        let mut out = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(ScriptError::Syntax {
                    line: start_line,
                    message: "unterminated string".into(),
                });
            };

            if c == quote {
                if !triple {
                    self.pos += 1;
                    return Ok(out);
                }
                if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.pos += 3;
                    return Ok(out);
                }
            }

            if c == '\n' {
                if !triple {
                    return Err(self.error("unterminated string"));
                }
                self.line += 1;
            }

            if c == '\\' && !raw {
                let escaped = self.peek_at(1).ok_or_else(|| self.error("unterminated string"))?;
                self.pos += 2;
                match escaped {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    '0' => out.push('\0'),
                    '\\' => out.push('\\'),
                    '\'' => out.push('\''),
                    '"' => out.push('"'),
                    '\n' => self.line += 1,
                    other => {
                        out.push('\\');
                        out.push(other);
                    }
                }
                continue;
            }

            if c == '\\' && raw {
                // Raw strings keep the backslash but still cannot end on an escaped quote
                if let Some(next) = self.peek_at(1) {
                    out.push('\\');
                    out.push(next);
                    self.pos += 2;
                    continue;
                }
            }

            out.push(c);
            self.pos += 1;
        }
    }
}
