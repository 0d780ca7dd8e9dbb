//! FILENAME: core/stats-core/src/config.rs
//! Engine configuration.
//!
//! All fields have defaults so a partial JSON object (or `{}`) is a valid
//! configuration. Field names follow the sync layer's camelCase convention.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Worker count used when hardware concurrency cannot be determined.
pub const DEFAULT_MAX_WORKERS: usize = 8;

/// Highest zoom the cluster engine builds levels for.
pub const MAX_ZOOM_LIMIT: f64 = 24.0;

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Worker thread count. `None` means hardware concurrency.
    pub max_workers: Option<usize>,

    /// Capacity of the bounded work queue in front of the workers.
    pub queue_capacity: usize,

    /// Number of distinct chart requests kept by the chart memo cache.
    pub chart_cache_capacity: usize,

    /// Spatial clustering parameters.
    pub clustering: ClusterConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_workers: None,
            queue_capacity: 1024,
            chart_cache_capacity: 64,
            clustering: ClusterConfig::default(),
        }
    }
}

/// Spatial clustering parameters (pixel radius at tile `extent`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterConfig {
    pub min_zoom: f64,
    pub max_zoom: f64,
    pub radius: f64,
    pub extent: f64,
    pub min_points: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            min_zoom: 0.0,
            max_zoom: 16.0,
            radius: 40.0,
            extent: 512.0,
            min_points: 2,
        }
    }
}

impl ClusterConfig {
    /// Integer zoom levels covered: `floor(min_zoom)..=floor(max_zoom)`.
    pub fn zoom_levels(&self) -> std::ops::RangeInclusive<i32> {
        (self.min_zoom.floor() as i32)..=(self.max_zoom.floor() as i32)
    }
}

impl EngineConfig {
    /// Parses and validates a JSON configuration.
    pub fn from_json_str(input: &str) -> EngineResult<Self> {
        let config: EngineConfig = serde_json::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations the engines cannot run with.
    pub fn validate(&self) -> EngineResult<()> {
        if self.max_workers == Some(0) {
            return Err(EngineError::Config("maxWorkers must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(EngineError::Config("queueCapacity must be at least 1".into()));
        }
        let c = &self.clustering;
        if !(c.min_zoom.is_finite() && c.max_zoom.is_finite()) || c.min_zoom < 0.0 {
            return Err(EngineError::Config(format!(
                "invalid zoom bounds {}..{}",
                c.min_zoom, c.max_zoom
            )));
        }
        if c.min_zoom > c.max_zoom {
            return Err(EngineError::Config(format!(
                "minZoom {} exceeds maxZoom {}",
                c.min_zoom, c.max_zoom
            )));
        }
        if c.max_zoom > MAX_ZOOM_LIMIT {
            return Err(EngineError::Config(format!(
                "maxZoom {} exceeds the limit of {}",
                c.max_zoom, MAX_ZOOM_LIMIT
            )));
        }
        if c.radius <= 0.0 || c.extent <= 0.0 {
            return Err(EngineError::Config(
                "clustering radius and extent must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Worker count after resolving hardware concurrency.
    pub fn effective_max_workers(&self) -> usize {
        self.max_workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(DEFAULT_MAX_WORKERS)
        })
    }
}
