//! FILENAME: core/expr-parser/src/token.rs
//! PURPOSE: Token definitions for the expression lexer.
//! CONTEXT: Tokens are the atomic units produced by the lexer and consumed by the parser.

use crate::ast::BinaryOperator;

/// Tokens recognized by the expression lexer.
#[derive(Debug, PartialEq, Clone)]
pub enum Token {
    // Literals
    Number(f64),
    String(String),
    Identifier(String),

    // Operators
    Plus,
    Minus,
    Asterisk,
    Slash,
    Caret,

    // Delimiters
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,

    // Special
    EOF,
    Illegal(char),
}

impl Token {
    /// The binary operator this token denotes in infix position.
    pub fn infix_operator(&self) -> Option<BinaryOperator> {
        match self {
            Token::Plus => Some(BinaryOperator::Add),
            Token::Minus => Some(BinaryOperator::Subtract),
            Token::Asterisk => Some(BinaryOperator::Multiply),
            Token::Slash => Some(BinaryOperator::Divide),
            Token::Caret => Some(BinaryOperator::Power),
            _ => None,
        }
    }

    /// Whether the token closes an argument or array list.
    pub fn is_closing(&self) -> bool {
        matches!(self, Token::RParen | Token::RBracket)
    }
}
