//! FILENAME: core/expr-parser/src/lib.rs
//! PURPOSE: Library root for the derived statistic expression parser.
//! CONTEXT: Exposes the lexer, parser, and AST components needed to turn a
//! calculation string such as `groupSum("income") / groupSum("households")`
//! into an expression tree.
//!
//! PIPELINE: Expression String --> Lexer --> Tokens --> Parser --> AST --> Evaluator
//!
//! SUPPORTED FEATURES:
//! - Arithmetic: +, -, *, / and ^ (power)
//! - Array literals: [1, 2, 3]
//! - Function calls: groupSum("a"), max(1, 2)
//! - Parentheses for grouping
//! - Unary negation: -5

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod token;


pub use ast::{BinaryOperator, Expression, UnaryOperator, Value};
pub use lexer::Lexer;
pub use parser::{parse, parse_literal_array, ParseError, ParseResult, Parser};
pub use token::Token;
