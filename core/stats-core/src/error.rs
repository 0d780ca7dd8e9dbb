//! FILENAME: core/stats-core/src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("Dataset '{dataset}' has mismatched lengths: '{list}' has {found} entries, expected {expected}")]
    ShapeMismatch {
        dataset: String,
        list: String,
        expected: usize,
        found: usize,
    },

    #[error("Grouping '{grouping}' has a cyclic parent chain at level '{level}'")]
    CyclicGrouping { grouping: String, level: String },

    #[error(transparent)]
    Worker(#[from] WorkerError),
}

/// Failure of one submitted work item. Only the submitting caller sees it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    #[error("Worker {worker} crashed: {message}")]
    Crashed { worker: usize, message: String },

    #[error("Worker pool is shut down")]
    Disconnected,
}

/// Failure to evaluate a derived calculation. Handled inside the computation
/// unit by the literal-array fallback and never surfaced to chart callers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalcError {
    #[error("Parse error: {0}")]
    Parse(#[from] expr_parser::ParseError),

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Unknown identifier: {0}")]
    UnknownIdentifier(String),

    #[error("Unknown statistic: {0}")]
    UnknownStat(String),

    #[error("Function {name} expects {expected} argument(s), got {found}")]
    Arity {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("Expected a scalar, found {0}")]
    NotScalar(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
