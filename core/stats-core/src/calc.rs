//! FILENAME: core/stats-core/src/calc.rs
//! PURPOSE: Evaluates derived statistic expressions once per group.
//! CONTEXT: A calculation such as `groupSum("income") / groupSum("households")`
//! is parsed once per work item and evaluated for every group the computation
//! unit buckets. `group*` functions are bound to the group being evaluated.
//!
//! Evaluation is scalar. When it fails (an array literal, an unknown name),
//! the expression is simplified instead: every resolvable `group*` call is
//! bound, constants are folded and arithmetic is applied elementwise over
//! array literals. The simplified text is then read back as a literal numeric
//! array. If that fails too the group has no value.

use std::collections::HashMap;
use std::sync::Arc;

use expr_parser::{parse, parse_literal_array, Expression, UnaryOperator, Value};

use crate::aggregate::Accumulator;
use crate::dataset::AggregationType;
use crate::error::CalcError;
use crate::log_warn;

// ============================================================================
// GROUP SCOPE
// ============================================================================

/// The series and row indices of the group currently evaluated.
#[derive(Debug, Clone, Copy)]
pub struct GroupScope<'a> {
    pub series: &'a HashMap<String, Arc<[f64]>>,
    pub indices: &'a [usize],
}

/// Statistic bound to the current group by a `group*` function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupFunction {
    Sum,
    Mean,
    Min,
    Max,
    Count,
}

impl GroupFunction {
    fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "groupsum" => Some(GroupFunction::Sum),
            "groupmean" | "groupaverage" => Some(GroupFunction::Mean),
            "groupmin" => Some(GroupFunction::Min),
            "groupmax" => Some(GroupFunction::Max),
            "groupcount" => Some(GroupFunction::Count),
            _ => None,
        }
    }
}

impl<'a> GroupScope<'a> {
    pub fn new(series: &'a HashMap<String, Arc<[f64]>>, indices: &'a [usize]) -> Self {
        GroupScope { series, indices }
    }

    /// Accumulates a stat over this group's rows.
    fn accumulate(&self, stat: &str) -> Result<Accumulator, CalcError> {
        let values = self
            .series
            .get(stat)
            .ok_or_else(|| CalcError::UnknownStat(stat.to_string()))?;

        let mut acc = Accumulator::new();
        for &row in self.indices {
            if let Some(&value) = values.get(row) {
                acc.add(value);
            }
        }
        Ok(acc)
    }

    fn call_group(&self, function: GroupFunction, name: &str, args: &[Expression]) -> Result<f64, CalcError> {
        if function == GroupFunction::Count && args.is_empty() {
            return Ok(self.indices.len() as f64);
        }
        if args.len() != 1 {
            return Err(CalcError::Arity {
                name: name.to_string(),
                expected: 1,
                found: args.len(),
            });
        }

        let stat = stat_name(&args[0])?;
        let acc = self.accumulate(stat)?;
        let value = match function {
            GroupFunction::Sum => acc.sum,
            GroupFunction::Count => acc.count as f64,
            GroupFunction::Mean => acc.compute(AggregationType::Mean).unwrap_or(f64::NAN),
            GroupFunction::Min => acc.min.unwrap_or(f64::NAN),
            GroupFunction::Max => acc.max.unwrap_or(f64::NAN),
        };
        Ok(value)
    }
}

/// A stat argument may be quoted or a bare name.
fn stat_name(arg: &Expression) -> Result<&str, CalcError> {
    match arg {
        Expression::Literal(Value::String(s)) => Ok(s),
        Expression::Identifier(name) => Ok(name),
        other => Err(CalcError::NotScalar(other.to_string())),
    }
}

// ============================================================================
// SCALAR EVALUATION
// ============================================================================

/// Evaluates an expression to a single number for one group.
pub fn evaluate(expr: &Expression, scope: &GroupScope<'_>) -> Result<f64, CalcError> {
    match expr {
        Expression::Literal(Value::Number(n)) => Ok(*n),
        Expression::Literal(Value::String(s)) => Err(CalcError::NotScalar(format!("\"{}\"", s))),
        Expression::Array(_) => Err(CalcError::NotScalar(expr.to_string())),
        Expression::Identifier(name) => Err(CalcError::UnknownIdentifier(name.clone())),
        Expression::BinaryOp { left, op, right } => {
            let l = evaluate(left, scope)?;
            let r = evaluate(right, scope)?;
            Ok(op.apply(l, r))
        }
        Expression::UnaryOp { op: UnaryOperator::Negate, operand } => Ok(-evaluate(operand, scope)?),
        Expression::FunctionCall { name, args } => {
            if let Some(function) = GroupFunction::from_name(name) {
                return scope.call_group(function, name, args);
            }
            let values = args
                .iter()
                .map(|arg| evaluate(arg, scope))
                .collect::<Result<Vec<f64>, CalcError>>()?;
            apply_scalar_function(name, &values)
        }
    }
}

/// Applies one of the scalar helper functions.
fn apply_scalar_function(name: &str, args: &[f64]) -> Result<f64, CalcError> {
    let arity = |expected: usize| -> Result<(), CalcError> {
        if args.len() == expected {
            Ok(())
        } else {
            Err(CalcError::Arity {
                name: name.to_string(),
                expected,
                found: args.len(),
            })
        }
    };

    match name.to_ascii_lowercase().as_str() {
        "abs" => {
            arity(1)?;
            Ok(args[0].abs())
        }
        "sqrt" => {
            arity(1)?;
            Ok(args[0].sqrt())
        }
        "round" => match args.len() {
            1 => Ok(args[0].round()),
            2 => {
                let factor = 10f64.powi(args[1] as i32);
                Ok((args[0] * factor).round() / factor)
            }
            found => Err(CalcError::Arity {
                name: name.to_string(),
                expected: 1,
                found,
            }),
        },
        "min" | "max" => {
            if args.is_empty() {
                return Err(CalcError::Arity {
                    name: name.to_string(),
                    expected: 1,
                    found: 0,
                });
            }
            let is_min = name.eq_ignore_ascii_case("min");
            Ok(args.iter().copied().fold(
                if is_min { f64::INFINITY } else { f64::NEG_INFINITY },
                |acc, v| if is_min { acc.min(v) } else { acc.max(v) },
            ))
        }
        _ => Err(CalcError::UnknownFunction(name.to_string())),
    }
}

// ============================================================================
// SIMPLIFICATION
// ============================================================================

/// Rewrites an expression as far as the group allows.
///
/// Unresolvable parts are kept as they are, so the result always renders to
/// text; only fully numeric results survive `parse_literal_array`.
pub fn simplify(expr: &Expression, scope: &GroupScope<'_>) -> Expression {
    match expr {
        Expression::Literal(_) | Expression::Identifier(_) => expr.clone(),

        Expression::Array(items) => {
            Expression::Array(items.iter().map(|item| simplify(item, scope)).collect())
        }

        Expression::UnaryOp { op, operand } => negate(*op, simplify(operand, scope)),

        Expression::BinaryOp { left, op, right } => {
            let left = simplify(left, scope);
            let right = simplify(right, scope);
            combine(left, *op, right)
        }

        Expression::FunctionCall { name, args } => {
            if let Some(function) = GroupFunction::from_name(name) {
                return match scope.call_group(function, name, args) {
                    Ok(value) => Expression::number(value),
                    Err(_) => expr.clone(),
                };
            }

            let args: Vec<Expression> = args.iter().map(|arg| simplify(arg, scope)).collect();

            if let [Expression::Array(items)] = args.as_slice() {
                return Expression::Array(
                    items
                        .iter()
                        .map(|item| simplify_call(name, vec![item.clone()]))
                        .collect(),
                );
            }
            simplify_call(name, args)
        }
    }
}

/// Folds a helper call whose arguments are all numbers.
fn simplify_call(name: &str, args: Vec<Expression>) -> Expression {
    let numbers: Option<Vec<f64>> = args.iter().map(Expression::as_number).collect();
    match numbers.map(|values| apply_scalar_function(name, &values)) {
        Some(Ok(value)) => Expression::number(value),
        _ => Expression::FunctionCall {
            name: name.to_string(),
            args,
        },
    }
}

fn negate(op: UnaryOperator, operand: Expression) -> Expression {
    if let Some(n) = operand.as_number() {
        return Expression::number(-n);
    }
    match operand {
        Expression::Array(items) => {
            Expression::Array(items.into_iter().map(|item| negate(op, item)).collect())
        }
        other => Expression::UnaryOp {
            op,
            operand: Box::new(other),
        },
    }
}

fn combine(left: Expression, op: expr_parser::BinaryOperator, right: Expression) -> Expression {
    if let (Some(l), Some(r)) = (left.as_number(), right.as_number()) {
        return Expression::number(op.apply(l, r));
    }

    match (left, right) {
        (Expression::Array(l), Expression::Array(r)) if l.len() == r.len() => Expression::Array(
            l.into_iter()
                .zip(r)
                .map(|(a, b)| combine(a, op, b))
                .collect(),
        ),
        (Expression::Array(items), right) if right.as_number().is_some() => Expression::Array(
            items
                .into_iter()
                .map(|item| combine(item, op, right.clone()))
                .collect(),
        ),
        (left, Expression::Array(items)) if left.as_number().is_some() => Expression::Array(
            items
                .into_iter()
                .map(|item| combine(left.clone(), op, item))
                .collect(),
        ),
        (left, right) => Expression::BinaryOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        },
    }
}

// ============================================================================
// CALCULATION
// ============================================================================

/// A parsed calculation, evaluated once per group.
#[derive(Debug, Clone)]
pub struct Calculation {
    source: String,
    expression: Expression,
}

impl Calculation {
    pub fn parse(source: &str) -> Result<Self, CalcError> {
        Ok(Calculation {
            source: source.to_string(),
            expression: parse(source)?,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Values of this calculation for one group, or `None` when the group
    /// has no value. Non-finite results are dropped.
    pub fn evaluate_group(&self, scope: &GroupScope<'_>) -> Option<Vec<f64>> {
        let values = match evaluate(&self.expression, scope) {
            Ok(value) => vec![value],
            Err(err) => {
                let rendered = simplify(&self.expression, scope).to_string();
                match parse_literal_array(&rendered) {
                    Ok(values) => values,
                    Err(_) => {
                        log_warn!(
                            "CALC",
                            "calculation '{}' has no value for group ({}; simplified to '{}')",
                            self.source,
                            err,
                            rendered
                        );
                        return None;
                    }
                }
            }
        };

        let finite: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            None
        } else {
            Some(finite)
        }
    }
}

/// Parses and evaluates `source` for one group, applying the literal-array
/// fallback. A calculation that does not parse has no value.
pub fn evaluate_with_fallback(source: &str, scope: &GroupScope<'_>) -> Option<Vec<f64>> {
    match Calculation::parse(source) {
        Ok(calculation) => calculation.evaluate_group(scope),
        Err(err) => {
            log_warn!("CALC", "calculation '{}' does not parse: {}", source, err);
            None
        }
    }
}
