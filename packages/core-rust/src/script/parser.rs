//! Recursive-descent parser producing [`Stmt`] lists.
//!
//! Suites after `if`/`elif`/`else`/`for` are either an indented block or an
//! inline run of `;`-separated simple statements. An inline suite may be
//! followed by `elif`/`else` on the same line, so
//! `if 'x' in message: _passed = True else: _passed = False` is accepted.

use serde_json::Value;

use super::ast::{BinOp, CmpOp, Expr, Stmt, Target};
use super::lexer::{tokenize, Tok, Token};
use super::ScriptError;

/// Maximum syntactic nesting before the parser gives up.
const MAX_NESTING: usize = 64;

const KEYWORDS: [&str; 16] = [
    "if", "elif", "else", "for", "in", "and", "or", "not", "pass", "del", "True", "False",
    "None", "true", "false", "null",
];

pub(crate) fn parse(source: &str) -> Result<Vec<Stmt>, ScriptError> {
    let mut parser = Parser {
        tokens: tokenize(source)?,
        pos: 0,
        depth: 0,
    };
    let mut program = Vec::new();
    while !parser.at(&Tok::Eof) {
        program.extend(parser.statement()?);
    }
    Ok(program)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    // -- statements ---------------------------------------------------------

    fn statement(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        if self.at_keyword("if") {
            return Ok(vec![self.if_statement()?]);
        }
        if self.at_keyword("for") {
            return Ok(vec![self.for_statement()?]);
        }
        match self.peek() {
            Tok::Indent => Err(self.error("unexpected indent")),
            Tok::Newline => {
                self.advance();
                Ok(Vec::new())
            }
            _ => {
                let stmts = self.simple_statements()?;
                self.expect_line_end()?;
                Ok(stmts)
            }
        }
    }

    fn simple_statements(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        let mut stmts = vec![self.small_statement()?];
        while self.eat_op(";") {
            if self.at_line_end() || self.at_keyword("elif") || self.at_keyword("else") {
                break;
            }
            stmts.push(self.small_statement()?);
        }
        Ok(stmts)
    }

    fn small_statement(&mut self) -> Result<Stmt, ScriptError> {
        if self.at_keyword("pass") {
            self.advance();
            return Ok(Stmt::Pass);
        }
        if self.at_keyword("del") {
            self.advance();
            let expr = self.expression()?;
            let target = self.to_target(expr)?;
            if target.path.is_empty() {
                return Err(self.error("del requires a subscript or field"));
            }
            return Ok(Stmt::Delete { target });
        }

        let expr = self.expression()?;
        if self.eat_op("=") {
            let target = self.to_target(expr)?;
            let value = self.expression()?;
            return Ok(Stmt::Assign { target, value });
        }
        Ok(Stmt::Expr(expr))
    }

    fn if_statement(&mut self) -> Result<Stmt, ScriptError> {
        self.advance();
        let mut branches = Vec::new();
        let condition = self.expression()?;
        self.expect_op(":")?;
        branches.push((condition, self.suite()?));

        let mut otherwise = Vec::new();
        loop {
            if self.at_keyword("elif") {
                self.advance();
                let condition = self.expression()?;
                self.expect_op(":")?;
                branches.push((condition, self.suite()?));
                continue;
            }
            if self.at_keyword("else") {
                self.advance();
                self.expect_op(":")?;
                otherwise = self.suite()?;
            }
            break;
        }
        Ok(Stmt::If {
            branches,
            otherwise,
        })
    }

    fn for_statement(&mut self) -> Result<Stmt, ScriptError> {
        self.advance();
        let var = match self.peek().clone() {
            Tok::Name(name) if !is_keyword(&name) => {
                self.advance();
                name
            }
            _ => return Err(self.error("expected loop variable name")),
        };
        if !self.at_keyword("in") {
            return Err(self.error("expected 'in' after loop variable"));
        }
        self.advance();
        let iterable = self.expression()?;
        self.expect_op(":")?;
        let body = self.suite()?;
        Ok(Stmt::For {
            var,
            iterable,
            body,
        })
    }

    fn suite(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        self.enter()?;
        let body = if self.at(&Tok::Newline) {
            self.advance();
            if !self.at(&Tok::Indent) {
                return Err(self.error("expected an indented block"));
            }
            self.advance();
            let mut body = Vec::new();
            while !self.at(&Tok::Dedent) && !self.at(&Tok::Eof) {
                body.extend(self.statement()?);
            }
            if self.at(&Tok::Dedent) {
                self.advance();
            }
            body
        } else {
            let body = self.simple_statements()?;
            if self.at(&Tok::Newline) {
                self.advance();
            } else if !self.at_line_end() && !self.at_keyword("elif") && !self.at_keyword("else")
            {
                return Err(self.error("expected end of line"));
            }
            body
        };
        self.depth -= 1;
        Ok(body)
    }

    fn to_target(&self, expr: Expr) -> Result<Target, ScriptError> {
        match expr {
            Expr::Name(root) => Ok(Target {
                root,
                path: Vec::new(),
            }),
            Expr::Index(base, key) => {
                let mut target = self.to_target(*base)?;
                target.path.push(*key);
                Ok(target)
            }
            Expr::Field(base, field) => {
                let mut target = self.to_target(*base)?;
                target.path.push(Expr::Literal(Value::String(field)));
                Ok(target)
            }
            _ => Err(self.error("cannot assign to expression")),
        }
    }

    // -- expressions --------------------------------------------------------

    fn expression(&mut self) -> Result<Expr, ScriptError> {
        self.enter()?;
        let value = self.or_expr()?;
        let result = if self.at_keyword("if") {
            self.advance();
            let condition = self.or_expr()?;
            if !self.at_keyword("else") {
                return Err(self.error("conditional expression requires 'else'"));
            }
            self.advance();
            let otherwise = self.expression()?;
            Expr::Conditional {
                condition: Box::new(condition),
                then: Box::new(value),
                otherwise: Box::new(otherwise),
            }
        } else {
            value
        };
        self.depth -= 1;
        Ok(result)
    }

    fn or_expr(&mut self) -> Result<Expr, ScriptError> {
        let mut left = self.and_expr()?;
        while self.at_keyword("or") {
            self.advance();
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, ScriptError> {
        let mut left = self.not_expr()?;
        while self.at_keyword("and") {
            self.advance();
            let right = self.not_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr, ScriptError> {
        if self.at_keyword("not") {
            self.advance();
            self.enter()?;
            let inner = self.not_expr()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ScriptError> {
        let left = self.arith()?;
        let mut rest = Vec::new();
        loop {
            let (op, width) = match self.peek() {
                Tok::Op("==") => (CmpOp::Eq, 1),
                Tok::Op("!=") => (CmpOp::Ne, 1),
                Tok::Op("<") => (CmpOp::Lt, 1),
                Tok::Op("<=") => (CmpOp::Le, 1),
                Tok::Op(">") => (CmpOp::Gt, 1),
                Tok::Op(">=") => (CmpOp::Ge, 1),
                Tok::Name(n) if n == "in" => (CmpOp::In, 1),
                Tok::Name(n) if n == "not" && self.peek_keyword_at(1, "in") => (CmpOp::NotIn, 2),
                _ => break,
            };
            for _ in 0..width {
                self.advance();
            }
            rest.push((op, self.arith()?));
        }
        if rest.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare(Box::new(left), rest))
        }
    }

    fn arith(&mut self) -> Result<Expr, ScriptError> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Tok::Op("+") => BinOp::Add,
                Tok::Op("-") => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.term()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr, ScriptError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Tok::Op("*") => BinOp::Mul,
                Tok::Op("/") => BinOp::Div,
                Tok::Op("%") => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ScriptError> {
        let negate = match self.peek() {
            Tok::Op("-") => true,
            Tok::Op("+") => false,
            _ => return self.power(),
        };
        self.advance();
        self.enter()?;
        let inner = self.unary()?;
        self.depth -= 1;
        Ok(if negate {
            Expr::Neg(Box::new(inner))
        } else {
            inner
        })
    }

    fn power(&mut self) -> Result<Expr, ScriptError> {
        let base = self.postfix()?;
        if self.eat_op("**") {
            let exponent = self.unary()?;
            return Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr, ScriptError> {
        let mut expr = self.atom()?;
        loop {
            if self.eat_op("[") {
                let key = self.expression()?;
                self.expect_op("]")?;
                expr = Expr::Index(Box::new(expr), Box::new(key));
            } else if self.eat_op(".") {
                let Tok::Name(field) = self.peek().clone() else {
                    return Err(self.error("expected field name after '.'"));
                };
                self.advance();
                if self.eat_op("(") {
                    // Method syntax: the receiver becomes the first argument.
                    let mut args = vec![expr];
                    args.extend(self.call_arguments()?);
                    expr = Expr::Call { name: field, args };
                } else {
                    expr = Expr::Field(Box::new(expr), field);
                }
            } else if self.at(&Tok::Op("(")) {
                let Expr::Name(name) = expr else {
                    return Err(self.error("only builtin functions can be called"));
                };
                self.advance();
                let args = self.call_arguments()?;
                expr = Expr::Call { name, args };
            } else {
                return Ok(expr);
            }
        }
    }

    /// Parses arguments after an opening parenthesis, through the closing one.
    fn call_arguments(&mut self) -> Result<Vec<Expr>, ScriptError> {
        let mut args = Vec::new();
        while !self.eat_op(")") {
            args.push(self.expression()?);
            if !self.eat_op(",") {
                self.expect_op(")")?;
                break;
            }
        }
        Ok(args)
    }

    fn atom(&mut self) -> Result<Expr, ScriptError> {
        let token = self.peek().clone();
        self.advance();
        match token {
            Tok::Int(i) => Ok(Expr::Literal(Value::from(i))),
            Tok::Float(f) => Ok(Expr::Literal(Value::from(f))),
            Tok::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Tok::Name(name) => match name.as_str() {
                "True" | "true" => Ok(Expr::Literal(Value::Bool(true))),
                "False" | "false" => Ok(Expr::Literal(Value::Bool(false))),
                "None" | "null" => Ok(Expr::Literal(Value::Null)),
                n if is_keyword(n) => Err(self.error_before(format!("unexpected keyword '{n}'"))),
                _ => Ok(Expr::Name(name.clone())),
            },
            Tok::Op("(") => {
                let inner = self.expression()?;
                self.expect_op(")")?;
                Ok(inner)
            }
            Tok::Op("[") => {
                let mut items = Vec::new();
                while !self.eat_op("]") {
                    items.push(self.expression()?);
                    if !self.eat_op(",") {
                        self.expect_op("]")?;
                        break;
                    }
                }
                Ok(Expr::List(items))
            }
            Tok::Op("{") => {
                let mut entries = Vec::new();
                while !self.eat_op("}") {
                    let key = self.expression()?;
                    self.expect_op(":")?;
                    let value = self.expression()?;
                    entries.push((key, value));
                    if !self.eat_op(",") {
                        self.expect_op("}")?;
                        break;
                    }
                }
                Ok(Expr::Dict(entries))
            }
            other => Err(self.error_before(format!("unexpected token {}", describe(&other)))),
        }
    }

    // -- token helpers ------------------------------------------------------

    fn enter(&mut self) -> Result<(), ScriptError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error("expression nested too deeply"));
        }
        Ok(())
    }

    fn peek(&self) -> &Tok {
        self.tokens
            .get(self.pos)
            .map_or(&Tok::Eof, |token| &token.tok)
    }

    fn peek_keyword_at(&self, offset: usize, keyword: &str) -> bool {
        matches!(
            self.tokens.get(self.pos + offset).map(|t| &t.tok),
            Some(Tok::Name(n)) if n == keyword
        )
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
    }

    fn at(&self, tok: &Tok) -> bool {
        self.peek() == tok
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        self.peek_keyword_at(0, keyword)
    }

    fn at_line_end(&self) -> bool {
        matches!(self.peek(), Tok::Newline | Tok::Eof | Tok::Dedent)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Tok::Op(o) if *o == op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> Result<(), ScriptError> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{op}', found {}", describe(self.peek()))))
        }
    }

    fn expect_line_end(&mut self) -> Result<(), ScriptError> {
        match self.peek() {
            Tok::Newline => {
                self.advance();
                Ok(())
            }
            Tok::Eof | Tok::Dedent => Ok(()),
            other => Err(self.error(format!("expected end of line, found {}", describe(other)))),
        }
    }

    fn line(&self, pos: usize) -> usize {
        self.tokens
            .get(pos)
            .or_else(|| self.tokens.last())
            .map_or(1, |t| t.line)
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::Syntax {
            line: self.line(self.pos),
            message: message.into(),
        }
    }

    /// Error positioned at the token just consumed.
    fn error_before(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::Syntax {
            line: self.line(self.pos.saturating_sub(1)),
            message: message.into(),
        }
    }
}

fn is_keyword(name: &str) -> bool {
    KEYWORDS.contains(&name)
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Name(n) => format!("'{n}'"),
        Tok::Int(i) => i.to_string(),
        Tok::Float(f) => f.to_string(),
        Tok::Str(s) => format!("string {s:?}"),
        Tok::Op(op) => format!("'{op}'"),
        Tok::Newline => "end of line".to_string(),
        Tok::Indent => "indent".to_string(),
        Tok::Dedent => "dedent".to_string(),
        Tok::Eof => "end of script".to_string(),
    }
}
