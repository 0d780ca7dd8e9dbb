//! FILENAME: core/expr-parser/src/ast.rs
//! PURPOSE: Defines the Abstract Syntax Tree (AST) for derived statistic expressions.
//! CONTEXT: The Parser converts lexer tokens into this tree. The evaluator in
//! stats-core traverses it per group; the simplifier rewrites it and renders it
//! back to text through the `Display` impls below.
//!
//! SUPPORTED EXPRESSIONS:
//! - Literals: numbers, strings
//! - Array literals: [1, 2, groupSum("a")]
//! - Bare identifiers (kept so partially evaluable input still parses)
//! - Binary operations: +, -, *, /, ^
//! - Unary negation
//! - Function calls: groupSum("population")

/// Represents a parsed expression.
#[derive(Debug, PartialEq, Clone)]
pub enum Expression {
    /// A literal value: number or string.
    Literal(Value),

    /// An array literal: [a, b, c].
    Array(Vec<Expression>),

    /// A bare name that is neither a literal nor a call.
    Identifier(String),

    /// A binary operation: left op right.
    BinaryOp {
        left: Box<Expression>,
        op: BinaryOperator,
        right: Box<Expression>,
    },

    /// A unary operation: op operand.
    UnaryOp {
        op: UnaryOperator,
        operand: Box<Expression>,
    },

    /// A function call like groupSum("income").
    FunctionCall { name: String, args: Vec<Expression> },
}

impl Expression {
    /// Shorthand for a numeric literal.
    pub fn number(n: f64) -> Self {
        Expression::Literal(Value::Number(n))
    }

    /// Returns the number if this node is a (possibly negated) numeric literal.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Expression::Literal(Value::Number(n)) => Some(*n),
            Expression::UnaryOp {
                op: UnaryOperator::Negate,
                operand,
            } => operand.as_number().map(|n| -n),
            _ => None,
        }
    }
}

/// Literal values that can appear in expressions.
#[derive(Debug, PartialEq, Clone)]
pub enum Value {
    Number(f64),
    String(String),
}

/// Binary operators, lowest precedence first.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum BinaryOperator {
    Add,      // +
    Subtract, // -
    Multiply, // *
    Divide,   // /
    Power,    // ^
}

impl BinaryOperator {
    /// Left and right binding power. `^` binds tighter on its left, which
    /// makes it right-associative.
    pub fn binding_power(self) -> (u8, u8) {
        match self {
            BinaryOperator::Add | BinaryOperator::Subtract => (1, 2),
            BinaryOperator::Multiply | BinaryOperator::Divide => (3, 4),
            BinaryOperator::Power => (7, 6),
        }
    }

    /// Applies the operator to two numbers.
    pub fn apply(self, left: f64, right: f64) -> f64 {
        match self {
            BinaryOperator::Add => left + right,
            BinaryOperator::Subtract => left - right,
            BinaryOperator::Multiply => left * right,
            BinaryOperator::Divide => left / right,
            BinaryOperator::Power => left.powf(right),
        }
    }
}

/// Unary operators.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum UnaryOperator {
    Negate, // -
}

impl std::fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BinaryOperator::Add => write!(f, "+"),
            BinaryOperator::Subtract => write!(f, "-"),
            BinaryOperator::Multiply => write!(f, "*"),
            BinaryOperator::Divide => write!(f, "/"),
            BinaryOperator::Power => write!(f, "^"),
        }
    }
}

impl std::fmt::Display for UnaryOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnaryOperator::Negate => write!(f, "-"),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "\"{}\"", s.replace('"', "\"\"")),
        }
    }
}

/// Renders an expression back to source text that re-parses to the same tree
/// (binary operations are always parenthesized).
impl std::fmt::Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expression::Literal(value) => write!(f, "{}", value),
            Expression::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Expression::Identifier(name) => write!(f, "{}", name),
            Expression::BinaryOp { left, op, right } => {
                write!(f, "({} {} {})", left, op, right)
            }
            Expression::UnaryOp { op, operand } => write!(f, "{}{}", op, operand),
            Expression::FunctionCall { name, args } => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
        }
    }
}
