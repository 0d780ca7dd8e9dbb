//! FILENAME: core/chart-engine/src/lib.rs
//! Chart aggregation subsystem.
//!
//! Turns synchronized grouped-output datasets into chart trees. Bucketing is
//! offloaded to the `stats-core` worker pool; everything else runs on the
//! calling thread.
//!
//! Layers:
//! - `definition`: Serializable chart request (what the chart IS)
//! - `filter`: Row filtering (WHICH rows count)
//! - `grouping`: Parental paths and label interning (HOW rows are bucketed)
//! - `engine`: The memoized pipeline (HOW we calculate)
//! - `view`: Chart nodes and post-processing (WHAT we display)

pub mod definition;
pub mod engine;
pub mod error;
pub mod filter;
pub mod grouping;
pub mod view;

pub use definition::*;
pub use engine::{ChartEngine, ChartPipeline};
pub use error::{ChartError, ChartResult};
pub use filter::{DefaultFilterEvaluator, Filter, FilterEvaluator};
pub use grouping::{category_func, create_parental_path, GroupDict, GroupingResult, LabelPath};
pub use view::*;
