//! FILENAME: core/cluster-engine/src/lib.rs
//! Map point clustering subsystem.
//!
//! Layers:
//! - `index`: Per-zoom greedy clustering on R-trees (WHERE clusters are)
//! - `engine`: Per-map state with legend aggregation and ranges (WHAT they show)
//! - `geojson`: Feature collections for the renderer

pub mod engine;
pub mod geojson;
pub mod index;

pub use engine::{
    AxisValue, ClusterAggregation, ClusterEngine, ClusterFeature, ClusterMembers, FeatureRecords,
    FieldBinding, LegendGroup, NodeClusterState, PointFeature, TypeRange, ValueRange,
};
pub use geojson::{feature_collection, Feature, FeatureCollection, Geometry};
pub use index::{ClusterIndex, ClusterNode, Mergeable, WORLD_BOUNDS};
