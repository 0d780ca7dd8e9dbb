//! FILENAME: core/expr-parser/src/parser.rs
//! PURPOSE: Precedence-climbing parser that converts a stream of Tokens into an AST.
//! CONTEXT: Second stage of the parsing pipeline. Takes tokens from the Lexer
//! and builds an Expression tree that can be evaluated or simplified.
//!
//! PRECEDENCE (loosest first):
//! ```text
//!   + -        left-associative
//!   * /        left-associative
//!   unary -    binds looser than ^, so -2^2 is -(2^2)
//!   ^          right-associative
//! ```
//!
//! OPERANDS:
//! ```text
//!   NUMBER | STRING | IDENTIFIER | IDENTIFIER "(" list ")" | "[" list "]" | "(" expr ")"
//! ```

use crate::ast::{Expression, UnaryOperator, Value};
use crate::lexer::Lexer;
use crate::token::Token;

/// Binding power of a prefix minus.
const PREFIX_BINDING: u8 = 5;

/// Deepest nesting of parentheses, brackets, calls and prefix signs accepted.
pub const MAX_DEPTH: usize = 256;

/// Parser errors with descriptive messages.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        ParseError {
            message: message.into(),
        }
    }

    fn unexpected(token: &Token, context: &str) -> Self {
        match token {
            Token::EOF => ParseError::new(format!("Unexpected end of expression {}", context)),
            Token::Illegal(ch) => ParseError::new(format!("Illegal character '{}'", ch)),
            other => ParseError::new(format!("Unexpected {:?} {}", other, context)),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Parse error: {}", self.message)
    }
}

impl std::error::Error for ParseError {}

pub type ParseResult<T> = Result<T, ParseError>;

/// Pulls tokens from the lexer one at a time, keeping one token of lookahead.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    lookahead: Token,
    depth: usize,
}

impl<'a> Parser<'a> {
    pub fn new(input: &'a str) -> Self {
        let mut lexer = Lexer::new(input);
        let lookahead = lexer.next_token();
        Parser {
            lexer,
            lookahead,
            depth: 0,
        }
    }

    /// Parses the whole input as one expression.
    pub fn parse(&mut self) -> ParseResult<Expression> {
        if self.lookahead == Token::EOF {
            return Err(ParseError::new("Empty expression"));
        }
        let expr = self.expression(0)?;
        match self.lookahead {
            Token::EOF => Ok(expr),
            ref token => Err(ParseError::unexpected(token, "after expression")),
        }
    }

    /// Returns the lookahead and moves past it.
    fn bump(&mut self) -> Token {
        std::mem::replace(&mut self.lookahead, self.lexer.next_token())
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.lookahead == *token {
            self.bump();
            true
        } else {
            false
        }
    }

    /// Parses operands joined by operators binding tighter than `min_binding`.
    fn expression(&mut self, min_binding: u8) -> ParseResult<Expression> {
        if self.depth >= MAX_DEPTH {
            return Err(ParseError::new("Expression nested too deeply"));
        }
        self.depth += 1;
        let result = self.binary_chain(min_binding);
        self.depth -= 1;
        result
    }

    fn binary_chain(&mut self, min_binding: u8) -> ParseResult<Expression> {
        let mut left = self.operand()?;

        while let Some(op) = self.lookahead.infix_operator() {
            let (left_binding, right_binding) = op.binding_power();
            if left_binding < min_binding {
                break;
            }
            self.bump();
            let right = self.expression(right_binding)?;
            left = Expression::BinaryOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn operand(&mut self) -> ParseResult<Expression> {
        match self.bump() {
            Token::Minus => Ok(Expression::UnaryOp {
                op: UnaryOperator::Negate,
                operand: Box::new(self.expression(PREFIX_BINDING)?),
            }),
            // A leading plus changes nothing.
            Token::Plus => self.expression(PREFIX_BINDING),
            Token::Number(n) => Ok(Expression::number(n)),
            Token::String(s) => Ok(Expression::Literal(Value::String(s))),
            Token::Identifier(name) => {
                if self.eat(&Token::LParen) {
                    let args = self.list(Token::RParen)?;
                    Ok(Expression::FunctionCall { name, args })
                } else {
                    Ok(Expression::Identifier(name))
                }
            }
            Token::LBracket => Ok(Expression::Array(self.list(Token::RBracket)?)),
            Token::LParen => {
                let inner = self.expression(0)?;
                if self.eat(&Token::RParen) {
                    Ok(inner)
                } else {
                    Err(ParseError::unexpected(&self.lookahead, "where ')' was expected"))
                }
            }
            token => Err(ParseError::unexpected(&token, "where a value was expected")),
        }
    }

    /// Parses a comma-separated list up to and including `close`.
    fn list(&mut self, close: Token) -> ParseResult<Vec<Expression>> {
        let mut items = Vec::new();
        if self.eat(&close) {
            return Ok(items);
        }
        loop {
            items.push(self.expression(0)?);
            if self.eat(&Token::Comma) {
                continue;
            }
            if self.lookahead.is_closing() && self.eat(&close) {
                return Ok(items);
            }
            return Err(ParseError::unexpected(&self.lookahead, "in list"));
        }
    }
}

/// Convenience function to parse an expression string directly.
pub fn parse(input: &str) -> ParseResult<Expression> {
    Parser::new(input).parse()
}

/// Parses input that must be a literal numeric array such as `[1, -2.5, 3]`.
/// A single numeric literal is accepted as a one-element array.
pub fn parse_literal_array(input: &str) -> ParseResult<Vec<f64>> {
    let expr = parse(input)?;
    if let Some(n) = expr.as_number() {
        return Ok(vec![n]);
    }
    let items = match expr {
        Expression::Array(items) => items,
        other => {
            return Err(ParseError::new(format!(
                "Expected a literal array, found {}",
                other
            )))
        }
    };
    items
        .iter()
        .map(|item| {
            item.as_number()
                .ok_or_else(|| ParseError::new(format!("Array element is not a number: {}", item)))
        })
        .collect()
}
