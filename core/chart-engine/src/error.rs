//! FILENAME: core/chart-engine/src/error.rs

use stats_core::WorkerError;
use thiserror::Error;

/// Failure of one chart request. Missing data is not an error: it yields an
/// empty chart.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChartError {
    #[error("Chart computation failed: {0}")]
    Worker(#[from] WorkerError),

    #[error("Invalid chart request: {0}")]
    InvalidRequest(String),
}

pub type ChartResult<T> = Result<T, ChartError>;
