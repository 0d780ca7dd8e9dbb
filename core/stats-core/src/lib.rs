//! FILENAME: core/stats-core/src/lib.rs
//! PURPOSE: Shared foundation of the statistics engines.
//! CONTEXT: Holds the dataset model delivered by the sync layer, the bounded
//! memo cache, the worker pool with its computation unit, derived-expression
//! evaluation, and the ambient logging, configuration and error types used by
//! `chart-engine` and `cluster-engine`.

pub mod aggregate;
pub mod calc;
pub mod config;
pub mod dataset;
pub mod error;
pub mod logging;
pub mod memo;
pub mod tree;
pub mod worker;

pub use aggregate::{aggregate, Accumulator};
pub use calc::{evaluate_with_fallback, Calculation, GroupScope};
pub use config::{ClusterConfig, EngineConfig};
pub use dataset::{
    AggregationType, DataStore, GroupedOutputDataset, Grouping, GroupingData, GroupingLevel,
    StatSpec, BLANK_LABEL,
};
pub use error::{CalcError, EngineError, EngineResult, WorkerError};
pub use memo::{memoize, try_memoize, BoundedCache, Memo};
pub use tree::{GroupNode, GroupTree};
pub use worker::{stats_pool, PoolStats, StatsPool, Ticket, WorkItem, WorkValues, WorkerPool};
