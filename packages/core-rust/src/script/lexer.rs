//! Tokenizer with Python-style significant indentation.
//!
//! Emits `Newline` at the end of each logical line and `Indent` / `Dedent`
//! when the leading whitespace of a line grows or shrinks. Newlines inside
//! brackets are ignored, so list and dict literals may span lines.

use super::ScriptError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Tok {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub tok: Tok,
    pub line: usize,
}

/// Operators, longest first so that `<=` wins over `<`.
const OPERATORS: [&str; 22] = [
    "==", "!=", "<=", ">=", "**", "<", ">", "=", "+", "-", "*", "/", "%", "(", ")", "[", "]",
    "{", "}", ",", ":", ";",
];

pub(crate) fn tokenize(source: &str) -> Result<Vec<Token>, ScriptError> {
    let mut lexer = Lexer {
        chars: source.chars().collect(),
        pos: 0,
        line: 1,
        depth: 0,
        indents: vec![0],
        tokens: Vec::new(),
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    /// Open bracket depth; newlines are insignificant while positive.
    depth: usize,
    indents: Vec<usize>,
    tokens: Vec<Token>,
}

impl Lexer {
    fn run(&mut self) -> Result<(), ScriptError> {
        let mut at_line_start = true;
        while self.pos < self.chars.len() {
            if at_line_start && self.depth == 0 {
                // Blank and comment-only lines are consumed whole.
                at_line_start = !self.handle_indentation()?;
                if at_line_start {
                    continue;
                }
            }

            let c = self.chars[self.pos];
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
                '#' => self.skip_comment(),
                '\\' if self.peek(1) == Some('\n') => {
                    // Explicit line continuation.
                    self.pos += 2;
                    self.line += 1;
                }
                '\'' | '"' => self.string(c)?,
                c if c.is_ascii_digit() => self.number()?,
                '.' if self.peek(1).is_some_and(|n| n.is_ascii_digit()) => self.number()?,
                '.' => {
                    self.pos += 1;
                    self.push(Tok::Op("."));
                }
                c if c.is_alphabetic() || c == '_' => self.name(),
                _ => self.operator()?,
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

    /// Measures leading whitespace and emits indent tokens.
    ///
    /// Returns `false` when the line is blank or a comment, in which case
    /// it has been consumed entirely.
    fn handle_indentation(&mut self) -> Result<bool, ScriptError> {
        let mut width = 0;
        while let Some(c) = self.chars.get(self.pos) {
            match c {
                ' ' => width += 1,
                '\t' => width += 4,
                _ => break,
            }
            self.pos += 1;
        }

        match self.chars.get(self.pos) {
            None => return Ok(false),
            Some('\n') => {
                self.pos += 1;
                self.line += 1;
                return Ok(false);
            }
            Some('\r') if self.peek(1) == Some('\n') => {
                self.pos += 2;
                self.line += 1;
                return Ok(false);
            }
            Some('#') => {
                self.skip_comment();
                if self.chars.get(self.pos) == Some(&'\n') {
                    self.pos += 1;
                    self.line += 1;
                }
                return Ok(false);
            }
            Some(_) => {}
        }

        let current = self.indents.last().copied().unwrap_or(0);
        if width > current {
            self.indents.push(width);
            self.push(Tok::Indent);
        } else {
            while width < self.indents.last().copied().unwrap_or(0) {
                self.indents.pop();
                self.push(Tok::Dedent);
            }
            if width != self.indents.last().copied().unwrap_or(0) {
                return Err(self.error("inconsistent dedent"));
            }
        }
        Ok(true)
    }

    fn skip_comment(&mut self) {
        while self.pos < self.chars.len() && self.chars[self.pos] != '\n' {
            self.pos += 1;
        }
    }

    fn string(&mut self, quote: char) -> Result<(), ScriptError> {
        self.pos += 1;
        let mut text = String::new();
        loop {
            let Some(&c) = self.chars.get(self.pos) else {
                return Err(self.error("unterminated string literal"));
            };
            self.pos += 1;
            match c {
                c if c == quote => break,
                '\n' => return Err(self.error("unterminated string literal")),
                '\\' => {
                    let Some(&escaped) = self.chars.get(self.pos) else {
                        return Err(self.error("unterminated string literal"));
                    };
                    self.pos += 1;
                    text.push(match escaped {
                        'n' => '\n',
                        'r' => '\r',
                        't' => '\t',
                        '0' => '\0',
                        other => other,
                    });
                }
                other => text.push(other),
            }
        }
        self.push(Tok::Str(text));
        Ok(())
    }

    fn number(&mut self) -> Result<(), ScriptError> {
        let start = self.pos;
        let mut is_float = false;
        while let Some(&c) = self.chars.get(self.pos) {
            if c.is_ascii_digit() || c == '_' {
                self.pos += 1;
            } else if c == '.' && !is_float {
                is_float = true;
                self.pos += 1;
            } else if (c == 'e' || c == 'E')
                && self.peek(1).is_some_and(|n| n.is_ascii_digit() || n == '-' || n == '+')
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
            text.parse::<f64>()
                .map(Tok::Float)
                .map_err(|_| self.error(format!("invalid number literal '{text}'")))?
        } else {
            text.parse::<i64>()
                .map(Tok::Int)
                .map_err(|_| self.error(format!("integer literal '{text}' out of range")))?
        };
        self.push(tok);
        Ok(())
    }

    fn name(&mut self) {
        let start = self.pos;
        while self
            .chars
            .get(self.pos)
            .is_some_and(|c| c.is_alphanumeric() || *c == '_')
        {
            self.pos += 1;
        }
        let name: String = self.chars[start..self.pos].iter().collect();
        self.push(Tok::Name(name));
    }

    fn operator(&mut self) -> Result<(), ScriptError> {
        for op in OPERATORS {
            let len = op.chars().count();
            let matches = op
                .chars()
                .enumerate()
                .all(|(i, c)| self.chars.get(self.pos + i) == Some(&c));
            if matches {
                self.pos += len;
                match op {
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
            self.chars[self.pos]
        )))
    }

    fn push_newline(&mut self) {
        let previous = self.tokens.last().map(|t| &t.tok);
        if !matches!(previous, None | Some(Tok::Newline | Tok::Indent | Tok::Dedent)) {
            self.push(Tok::Newline);
        }
    }

    fn push(&mut self, tok: Tok) {
        self.tokens.push(Token {
            tok,
            line: self.line,
        });
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::Syntax {
            line: self.line,
            message: message.into(),
        }
    }
}
