//! Recursive-descent parser for the script subset
//!
//! Statements end at `;`, `}`, end of input or a line break. Parse failures
//! surface to scripts as `SyntaxError` values.

use crate::ast::{
    AssignOp, BinaryOp, DeclKind, Expr, FunctionDecl, LogicalOp, Program, Stmt, StmtKind, UnaryOp,
};
use crate::lexer::{Keyword, Token, TokenKind, tokenize};
use std::rc::Rc;
use thiserror::Error;

/// Nested statements and expressions a source unit may contain
const MAX_NESTING_DEPTH: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (line {line})")]
pub struct ParseError {
    pub message: String,
    pub line: u32,
}

pub(crate) fn parse(source: &str) -> Result<Program, ParseError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        loop_depth: 0,
        depth: 0,
    };
    let mut body = Vec::new();
    while !parser.at_eof() {
        body.push(parser.statement()?);
    }
    Ok(Program { body })
}

type ParseResult<T> = Result<T, ParseError>;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    loop_depth: usize,
    depth: usize,
}

impl Parser {
    // === Token access ===

    fn token(&self) -> &Token {
        // tokenize always terminates the stream with Eof
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek(&self) -> &TokenKind {
        &self.token().kind
    }

    fn line(&self) -> u32 {
        self.token().line
    }

    fn previous_line(&self) -> u32 {
        self.tokens[self.pos.saturating_sub(1)].line
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.token().clone();
        if !self.at_eof() {
            self.pos += 1;
        }
        token
    }

    fn is_punct(&self, punct: &str) -> bool {
        matches!(self.peek(), TokenKind::Punct(p) if *p == punct)
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if self.is_punct(punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: &str) -> ParseResult<()> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn is_keyword(&self, keyword: Keyword) -> bool {
        matches!(self.peek(), TokenKind::Keyword(k) if *k == keyword)
    }

    fn eat_keyword(&mut self, keyword: Keyword) -> bool {
        if self.is_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_ident(&mut self) -> ParseResult<String> {
        match self.peek().clone() {
            TokenKind::Ident(name) => {
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.unexpected()),
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            line: self.line(),
        }
    }

    fn unexpected(&self) -> ParseError {
        let message = match self.peek() {
            TokenKind::Eof => "Unexpected end of input".to_string(),
            TokenKind::Number(n) => format!("Unexpected number '{n}'"),
            TokenKind::Str(_) => "Unexpected string".to_string(),
            TokenKind::Ident(name) => format!("Unexpected identifier '{name}'"),
            TokenKind::Keyword(k) => format!("Unexpected token '{}'", k.as_str()),
            TokenKind::Punct(p) => format!("Unexpected token '{p}'"),
        };
        self.error(message)
    }

    /// Parse one level deeper, failing past the nesting limit
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> ParseResult<T>) -> ParseResult<T> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(self.error("Maximum nesting depth exceeded"));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    /// Statement terminator: `;`, or an implicit one before `}`, end of input or a new line
    fn consume_semicolon(&mut self) -> ParseResult<()> {
        if self.eat_punct(";") || self.is_punct("}") || self.at_eof() {
            return Ok(());
        }
        if self.line() > self.previous_line() {
            return Ok(());
        }
        Err(self.unexpected())
    }

    // === Statements ===

    fn statement(&mut self) -> ParseResult<Stmt> {
        self.nested(Self::statement_inner)
    }

    fn statement_inner(&mut self) -> ParseResult<Stmt> {
        let line = self.line();
        let kind = match self.peek().clone() {
            TokenKind::Punct("{") => {
                self.pos += 1;
                StmtKind::Block(self.block_rest()?)
            }
            TokenKind::Punct(";") => {
                self.pos += 1;
                StmtKind::Empty
            }
            TokenKind::Keyword(Keyword::Let | Keyword::Const | Keyword::Var) => {
                let declaration = self.declaration()?;
                self.consume_semicolon()?;
                declaration
            }
            TokenKind::Keyword(Keyword::Function) => {
                self.pos += 1;
                let decl = self.function_rest(true)?;
                StmtKind::Function(decl)
            }
            TokenKind::Keyword(Keyword::If) => self.if_statement()?,
            TokenKind::Keyword(Keyword::While) => {
                self.pos += 1;
                self.expect_punct("(")?;
                let test = self.expression()?;
                self.expect_punct(")")?;
                let body = self.loop_body()?;
                StmtKind::While { test, body }
            }
            TokenKind::Keyword(Keyword::Do) => {
                self.pos += 1;
                let body = self.loop_body()?;
                if !self.eat_keyword(Keyword::While) {
                    return Err(self.unexpected());
                }
                self.expect_punct("(")?;
                let test = self.expression()?;
                self.expect_punct(")")?;
                self.eat_punct(";");
                StmtKind::DoWhile { body, test }
            }
            TokenKind::Keyword(Keyword::For) => self.for_statement()?,
            TokenKind::Keyword(keyword @ (Keyword::Break | Keyword::Continue)) => {
                self.pos += 1;
                if self.loop_depth == 0 {
                    return Err(ParseError {
                        message: format!("Illegal {} statement", keyword.as_str()),
                        line,
                    });
                }
                self.consume_semicolon()?;
                if keyword == Keyword::Break {
                    StmtKind::Break
                } else {
                    StmtKind::Continue
                }
            }
            TokenKind::Keyword(Keyword::Return) => {
                self.pos += 1;
                let ends_here = self.is_punct(";")
                    || self.is_punct("}")
                    || self.at_eof()
                    || self.line() > line;
                let value = if ends_here {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.consume_semicolon()?;
                StmtKind::Return(value)
            }
            TokenKind::Keyword(Keyword::Throw) => {
                self.pos += 1;
                if self.line() > line {
                    return Err(self.error("Illegal newline after throw"));
                }
                let value = self.expression()?;
                self.consume_semicolon()?;
                StmtKind::Throw(value)
            }
            TokenKind::Keyword(Keyword::Try) => self.try_statement()?,
            _ => {
                let expr = self.expression()?;
                self.consume_semicolon()?;
                StmtKind::Expr(expr)
            }
        };
        Ok(Stmt { kind, line })
    }

    /// Statements up to the closing brace; the opening one is already consumed
    fn block_rest(&mut self) -> ParseResult<Vec<Stmt>> {
        let mut body = Vec::new();
        while !self.eat_punct("}") {
            if self.at_eof() {
                return Err(self.unexpected());
            }
            body.push(self.statement()?);
        }
        Ok(body)
    }

    fn block(&mut self) -> ParseResult<Vec<Stmt>> {
        self.expect_punct("{")?;
        self.block_rest()
    }

    fn loop_body(&mut self) -> ParseResult<Box<Stmt>> {
        self.loop_depth += 1;
        let body = self.statement();
        self.loop_depth -= 1;
        body.map(Box::new)
    }

    fn declaration(&mut self) -> ParseResult<StmtKind> {
        let kind = match self.advance().kind {
            TokenKind::Keyword(Keyword::Let) => DeclKind::Let,
            TokenKind::Keyword(Keyword::Const) => DeclKind::Const,
            _ => DeclKind::Var,
        };

        let mut declarations = Vec::new();
        loop {
            let name = self.expect_ident()?;
            let init = if self.eat_punct("=") {
                Some(self.assignment()?)
            } else if kind == DeclKind::Const {
                return Err(self.error("Missing initializer in const declaration"));
            } else {
                None
            };
            declarations.push((name, init));
            if !self.eat_punct(",") {
                break;
            }
        }
        Ok(StmtKind::Declare { kind, declarations })
    }

    fn if_statement(&mut self) -> ParseResult<StmtKind> {
        self.pos += 1;
        self.expect_punct("(")?;
        let test = self.expression()?;
        self.expect_punct(")")?;
        let consequent = Box::new(self.statement()?);
        let alternate = if self.eat_keyword(Keyword::Else) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        Ok(StmtKind::If {
            test,
            consequent,
            alternate,
        })
    }

    fn for_statement(&mut self) -> ParseResult<StmtKind> {
        self.pos += 1;
        self.expect_punct("(")?;

        let init = if self.eat_punct(";") {
            None
        } else {
            let line = self.line();
            let kind = if matches!(
                self.peek(),
                TokenKind::Keyword(Keyword::Let | Keyword::Const | Keyword::Var)
            ) {
                self.declaration()?
            } else {
                StmtKind::Expr(self.expression()?)
            };
            if !self.eat_punct(";") {
                return Err(self.error("Only C-style for loops are supported"));
            }
            Some(Box::new(Stmt { kind, line }))
        };

        let test = if self.is_punct(";") {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(";")?;

        let update = if self.is_punct(")") {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(")")?;

        let body = self.loop_body()?;
        Ok(StmtKind::For {
            init,
            test,
            update,
            body,
        })
    }

    fn try_statement(&mut self) -> ParseResult<StmtKind> {
        self.pos += 1;
        let block = self.block()?;

        let mut param = None;
        let handler = if self.eat_keyword(Keyword::Catch) {
            if self.eat_punct("(") {
                param = Some(self.expect_ident()?);
                self.expect_punct(")")?;
            }
            Some(self.block()?)
        } else {
            None
        };

        let finalizer = if self.eat_keyword(Keyword::Finally) {
            Some(self.block()?)
        } else {
            None
        };

        if handler.is_none() && finalizer.is_none() {
            return Err(self.error("Missing catch or finally after try"));
        }
        Ok(StmtKind::Try {
            block,
            param,
            handler,
            finalizer,
        })
    }

    /// Parameters and body; the `function` keyword is already consumed
    fn function_rest(&mut self, require_name: bool) -> ParseResult<Rc<FunctionDecl>> {
        let name = if matches!(self.peek(), TokenKind::Ident(_)) {
            Some(self.expect_ident()?)
        } else if require_name {
            return Err(self.error("Function statements require a name"));
        } else {
            None
        };

        self.expect_punct("(")?;
        let mut params = Vec::new();
        while !self.eat_punct(")") {
            params.push(self.expect_ident()?);
            if !self.eat_punct(",") {
                self.expect_punct(")")?;
                break;
            }
        }

        // break/continue do not cross function boundaries
        let enclosing_loops = std::mem::replace(&mut self.loop_depth, 0);
        let body = self.block();
        self.loop_depth = enclosing_loops;

        Ok(Rc::new(FunctionDecl {
            name,
            params,
            body: body?,
        }))
    }

    // === Expressions ===

    pub(crate) fn expression(&mut self) -> ParseResult<Expr> {
        self.assignment()
    }

    fn assignment(&mut self) -> ParseResult<Expr> {
        self.nested(Self::assignment_inner)
    }

    fn assignment_inner(&mut self) -> ParseResult<Expr> {
        let target = self.conditional()?;

        let op = match self.peek() {
            TokenKind::Punct("=") => AssignOp::Assign,
            TokenKind::Punct("+=") => AssignOp::Compound(BinaryOp::Add),
            TokenKind::Punct("-=") => AssignOp::Compound(BinaryOp::Sub),
            TokenKind::Punct("*=") => AssignOp::Compound(BinaryOp::Mul),
            TokenKind::Punct("/=") => AssignOp::Compound(BinaryOp::Div),
            TokenKind::Punct("%=") => AssignOp::Compound(BinaryOp::Mod),
            _ => return Ok(target),
        };
        if !target.is_assignable() {
            return Err(self.error("Invalid left-hand side in assignment"));
        }
        self.pos += 1;

        let value = self.assignment()?;
        Ok(Expr::Assign {
            op,
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    fn conditional(&mut self) -> ParseResult<Expr> {
        let test = self.logical_or()?;
        if !self.eat_punct("?") {
            return Ok(test);
        }
        let consequent = self.assignment()?;
        self.expect_punct(":")?;
        let alternate = self.assignment()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    fn logical_or(&mut self) -> ParseResult<Expr> {
        let mut left = self.logical_and()?;
        while self.eat_punct("||") {
            let right = self.logical_and()?;
            left = Expr::Logical {
                op: LogicalOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn logical_and(&mut self) -> ParseResult<Expr> {
        let mut left = self.equality()?;
        while self.eat_punct("&&") {
            let right = self.equality()?;
            left = Expr::Logical {
                op: LogicalOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn binary_level(
        &mut self,
        operators: &[(&str, BinaryOp)],
        next: fn(&mut Self) -> ParseResult<Expr>,
    ) -> ParseResult<Expr> {
        let mut left = next(self)?;
        'outer: loop {
            for (punct, op) in operators {
                if self.eat_punct(punct) {
                    let right = next(self)?;
                    left = Expr::Binary {
                        op: *op,
                        left: Box::new(left),
                        right: Box::new(right),
                    };
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn equality(&mut self) -> ParseResult<Expr> {
        self.binary_level(
            &[
                ("===", BinaryOp::StrictEq),
                ("!==", BinaryOp::StrictNe),
                ("==", BinaryOp::Eq),
                ("!=", BinaryOp::Ne),
            ],
            Self::relational,
        )
    }

    fn relational(&mut self) -> ParseResult<Expr> {
        self.binary_level(
            &[
                ("<=", BinaryOp::Le),
                (">=", BinaryOp::Ge),
                ("<", BinaryOp::Lt),
                (">", BinaryOp::Gt),
            ],
            Self::additive,
        )
    }

    fn additive(&mut self) -> ParseResult<Expr> {
        self.binary_level(
            &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
            Self::multiplicative,
        )
    }

    fn multiplicative(&mut self) -> ParseResult<Expr> {
        self.binary_level(
            &[
                ("*", BinaryOp::Mul),
                ("/", BinaryOp::Div),
                ("%", BinaryOp::Mod),
            ],
            Self::unary,
        )
    }

    fn unary(&mut self) -> ParseResult<Expr> {
        self.nested(Self::unary_inner)
    }

    fn unary_inner(&mut self) -> ParseResult<Expr> {
        let op = match self.peek() {
            TokenKind::Punct("!") => UnaryOp::Not,
            TokenKind::Punct("-") => UnaryOp::Neg,
            TokenKind::Punct("+") => UnaryOp::Plus,
            TokenKind::Keyword(Keyword::Typeof) => UnaryOp::TypeOf,
            TokenKind::Punct(p @ ("++" | "--")) => {
                let increment = *p == "++";
                self.pos += 1;
                let target = self.unary()?;
                if !target.is_assignable() {
                    return Err(self.error("Invalid left-hand side expression in prefix operation"));
                }
                return Ok(Expr::Update {
                    increment,
                    prefix: true,
                    target: Box::new(target),
                });
            }
            _ => return self.postfix(),
        };
        self.pos += 1;
        let operand = self.unary()?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn postfix(&mut self) -> ParseResult<Expr> {
        let expr = self.call_member()?;
        let increment = match self.peek() {
            TokenKind::Punct("++") => true,
            TokenKind::Punct("--") => false,
            _ => return Ok(expr),
        };
        // a line break before ++/-- starts a new statement
        if self.line() > self.previous_line() {
            return Ok(expr);
        }
        if !expr.is_assignable() {
            return Err(self.error("Invalid left-hand side expression in postfix operation"));
        }
        self.pos += 1;
        Ok(Expr::Update {
            increment,
            prefix: false,
            target: Box::new(expr),
        })
    }

    fn call_member(&mut self) -> ParseResult<Expr> {
        let mut expr = if self.eat_keyword(Keyword::New) {
            let callee = self.new_callee()?;
            let args = if self.is_punct("(") {
                self.arguments()?
            } else {
                Vec::new()
            };
            Expr::New {
                callee: Box::new(callee),
                args,
            }
        } else {
            self.primary()?
        };

        loop {
            if self.eat_punct(".") {
                let property = self.property_name()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                };
            } else if self.eat_punct("[") {
                let index = self.expression()?;
                self.expect_punct("]")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.is_punct("(") {
                let args = self.arguments()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    /// Member expression after `new`, stopping before the argument list
    fn new_callee(&mut self) -> ParseResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.eat_punct(".") {
                let property = self.property_name()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                };
            } else if self.eat_punct("[") {
                let index = self.expression()?;
                self.expect_punct("]")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn arguments(&mut self) -> ParseResult<Vec<Expr>> {
        self.expect_punct("(")?;
        let mut args = Vec::new();
        while !self.eat_punct(")") {
            args.push(self.assignment()?);
            if !self.eat_punct(",") {
                self.expect_punct(")")?;
                break;
            }
        }
        Ok(args)
    }

    /// Identifier after `.` or an object literal key; keywords are allowed
    fn property_name(&mut self) -> ParseResult<String> {
        match self.peek().clone() {
            TokenKind::Ident(name) => {
                self.pos += 1;
                Ok(name)
            }
            TokenKind::Keyword(keyword) => {
                self.pos += 1;
                Ok(keyword.as_str().to_string())
            }
            _ => Err(self.unexpected()),
        }
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        let token = self.advance();
        let expr = match token.kind {
            TokenKind::Number(n) => Expr::Number(n),
            TokenKind::Str(s) => Expr::Str(s),
            TokenKind::Ident(name) => Expr::Ident(name),
            TokenKind::Keyword(Keyword::True) => Expr::Bool(true),
            TokenKind::Keyword(Keyword::False) => Expr::Bool(false),
            TokenKind::Keyword(Keyword::Null) => Expr::Null,
            TokenKind::Keyword(Keyword::Undefined) => Expr::Undefined,
            TokenKind::Keyword(Keyword::This) => Expr::This,
            TokenKind::Keyword(Keyword::Function) => Expr::Function(self.function_rest(false)?),
            TokenKind::Punct("(") => {
                let expr = self.expression()?;
                self.expect_punct(")")?;
                expr
            }
            TokenKind::Punct("[") => {
                let mut items = Vec::new();
                while !self.eat_punct("]") {
                    items.push(self.assignment()?);
                    if !self.eat_punct(",") {
                        self.expect_punct("]")?;
                        break;
                    }
                }
                Expr::Array(items)
            }
            TokenKind::Punct("{") => self.object_literal()?,
            other => {
                // advance() does not move past Eof
                if other != TokenKind::Eof {
                    self.pos -= 1;
                }
                return Err(self.unexpected());
            }
        };
        Ok(expr)
    }

    /// Object literal; the opening brace is already consumed
    fn object_literal(&mut self) -> ParseResult<Expr> {
        let mut properties = Vec::new();
        while !self.eat_punct("}") {
            let key = match self.peek().clone() {
                TokenKind::Str(s) => {
                    self.pos += 1;
                    s
                }
                TokenKind::Number(n) => {
                    self.pos += 1;
                    crate::value::format_number(n)
                }
                _ => self.property_name()?,
            };
            let value = if self.eat_punct(":") {
                self.assignment()?
            } else {
                // shorthand `{ name }`
                Expr::Ident(key.clone())
            };
            properties.push((key, value));
            if !self.eat_punct(",") {
                self.expect_punct("}")?;
                break;
            }
        }
        Ok(Expr::Object(properties))
    }
}
