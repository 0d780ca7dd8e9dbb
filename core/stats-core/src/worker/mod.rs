//! FILENAME: core/stats-core/src/worker/mod.rs
//! Off-thread bucketing: the worker pool and the computation unit it runs.

pub mod pool;
pub mod unit;

pub use pool::{PoolStats, Ticket, WorkerPool};
pub use unit::{compute, WorkItem, WorkValues};

use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::tree::GroupNode;

/// Pool running the computation unit.
pub type StatsPool = WorkerPool<WorkItem, GroupNode>;

/// Starts a computation pool sized by the configuration.
pub fn stats_pool(config: &EngineConfig) -> EngineResult<StatsPool> {
    WorkerPool::new(
        config.effective_max_workers(),
        config.queue_capacity,
        |item: WorkItem| compute(&item),
    )
}
