//! Recursive-descent parser for formula expressions
//!
//! Grammar, loosest binding first:
//!
//! ```text
//! expression := concat (("=" | "<>" | "<" | "<=" | ">" | ">=") concat)*
//! concat     := additive ("&" additive)*
//! additive   := term (("+" | "-") term)*
//! term       := unary (("*" | "/") unary)*
//! unary      := "-" unary | postfix
//! postfix    := primary ("." IDENT | "[" expression "]" | "(" args ")")*
//! primary    := NUMBER | STRING | TRUE | FALSE | NULL
//!             | "input" | "this" | FUNCTION | "(" expression ")"
//! ```
//!
//! Identifiers other than the literals, `input` and `this` must name a
//! registered library function; anything else is rejected here.

use jellyfish_core::{Error, Result};
use serde_json::Value;

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::lexer::{tokenize, Token, TokenKind};
use crate::registry;
use crate::value::{number, FormulaValue};

/// Parse a complete expression
pub fn parse(source: &str) -> Result<Expr> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expression()?;
    parser.expect(&TokenKind::End, "end of expression")?;
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        // tokenize always ends with End, and End is never consumed past
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::End {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if &self.peek().kind == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<()> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn unexpected(&self, what: &str) -> Error {
        let token = self.peek();
        Error::invalid_expression(format!(
            "expected {}, found {:?} at offset {}",
            what, token.kind, token.offset
        ))
    }

    fn binary_loop(
        &mut self,
        operand: fn(&mut Self) -> Result<Expr>,
        operator: fn(&TokenKind) -> Option<BinaryOp>,
    ) -> Result<Expr> {
        let mut left = operand(self)?;
        while let Some(op) = operator(&self.peek().kind) {
            self.advance();
            let right = operand(self)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn expression(&mut self) -> Result<Expr> {
        self.binary_loop(Self::concat, |kind| match kind {
            TokenKind::Eq => Some(BinaryOp::Eq),
            TokenKind::Ne => Some(BinaryOp::Ne),
            TokenKind::Lt => Some(BinaryOp::Lt),
            TokenKind::Le => Some(BinaryOp::Le),
            TokenKind::Gt => Some(BinaryOp::Gt),
            TokenKind::Ge => Some(BinaryOp::Ge),
            _ => None,
        })
    }

    fn concat(&mut self) -> Result<Expr> {
        self.binary_loop(Self::additive, |kind| match kind {
            TokenKind::Amp => Some(BinaryOp::Concat),
            _ => None,
        })
    }

    fn additive(&mut self) -> Result<Expr> {
        self.binary_loop(Self::term, |kind| match kind {
            TokenKind::Plus => Some(BinaryOp::Add),
            TokenKind::Minus => Some(BinaryOp::Sub),
            _ => None,
        })
    }

    fn term(&mut self) -> Result<Expr> {
        self.binary_loop(Self::unary, |kind| match kind {
            TokenKind::Star => Some(BinaryOp::Mul),
            TokenKind::Slash => Some(BinaryOp::Div),
            _ => None,
        })
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat(&TokenKind::Minus) {
            let operand = self.unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            });
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&TokenKind::Dot) {
                let TokenKind::Ident(key) = self.peek().kind.clone() else {
                    return Err(self.unexpected("property name"));
                };
                self.advance();
                expr = Expr::Member {
                    object: Box::new(expr),
                    key,
                };
            } else if self.eat(&TokenKind::LBracket) {
                let index = self.expression()?;
                self.expect(&TokenKind::RBracket, "']'")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.eat(&TokenKind::LParen) {
                let args = self.arguments()?;
                expr = match expr {
                    Expr::Function(function) => {
                        function.check_arity(args.len())?;
                        Expr::Call { function, args }
                    }
                    callee => Expr::Apply {
                        callee: Box::new(callee),
                        args,
                    },
                };
            } else {
                return Ok(expr);
            }
        }
    }

    /// Comma-separated arguments after an opening parenthesis
    fn arguments(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if self.eat(&TokenKind::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            if self.eat(&TokenKind::RParen) {
                return Ok(args);
            }
            self.expect(&TokenKind::Comma, "',' or ')'")?;
        }
    }

    fn primary(&mut self) -> Result<Expr> {
        let token = self.peek().clone();
        if matches!(
            token.kind,
            TokenKind::Number(_) | TokenKind::Str(_) | TokenKind::LParen | TokenKind::Ident(_)
        ) {
            self.advance();
        }
        match token.kind {
            TokenKind::Number(n) => match number(n) {
                FormulaValue::Json(value) => Ok(Expr::Literal(value)),
                _ => Err(Error::invalid_expression(format!(
                    "number out of range at offset {}",
                    token.offset
                ))),
            },
            TokenKind::Str(text) => Ok(Expr::Literal(Value::String(text))),
            TokenKind::LParen => {
                let inner = self.expression()?;
                self.expect(&TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            TokenKind::Ident(name) => match name.as_str() {
                "input" => Ok(Expr::Input),
                "this" => Ok(Expr::This),
                _ if name.eq_ignore_ascii_case("true") => Ok(Expr::Literal(Value::Bool(true))),
                _ if name.eq_ignore_ascii_case("false") => Ok(Expr::Literal(Value::Bool(false))),
                _ if name.eq_ignore_ascii_case("null") => Ok(Expr::Literal(Value::Null)),
                _ => registry::lookup(&name).map(Expr::Function).ok_or_else(|| {
                    Error::invalid_expression(format!(
                        "unknown identifier '{}' at offset {}",
                        name, token.offset
                    ))
                }),
            },
            _ => Err(self.unexpected("a value")),
        }
    }
}
