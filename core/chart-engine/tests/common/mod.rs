//! FILENAME: tests/common/mod.rs
//! Shared test utilities and fixtures for chart engine integration tests.

#![allow(dead_code)]

use std::collections::HashMap;

use chart_engine::{ChartEngine, ChartNode};
use stats_core::{EngineConfig, GroupedOutputDataset, Grouping, GroupingLevel};

// ============================================================================
// TEST HARNESS
// ============================================================================

/// A chart engine with a small worker pool, for integration tests.
pub struct TestHarness {
    pub engine: ChartEngine,
}

impl TestHarness {
    /// Create a new harness with no synced data.
    pub fn new() -> Self {
        let config = EngineConfig {
            max_workers: Some(2),
            queue_capacity: 16,
            chart_cache_capacity: 8,
            ..Default::default()
        };
        TestHarness {
            engine: ChartEngine::new(&config).expect("engine config is valid"),
        }
    }

    /// Create a harness with the census fixture synced.
    pub fn with_census() -> Self {
        let harness = Self::new();
        harness.sync_dataset(CensusFixture::DATASET, CensusFixture::dataset());
        harness.sync_grouping(CensusFixture::REGION, CensusFixture::region());
        harness.sync_grouping(CensusFixture::AGE, CensusFixture::age_band());
        harness
    }

    pub fn sync_dataset(&self, name: &str, dataset: GroupedOutputDataset) {
        let mut datasets = HashMap::new();
        datasets.insert(name.to_string(), dataset);
        self.engine.sync_datasets(datasets).expect("dataset is consistent");
    }

    pub fn sync_grouping(&self, id: &str, grouping: Grouping) {
        let mut groupings = HashMap::new();
        groupings.insert(id.to_string(), grouping);
        self.engine.sync_groupings(groupings).expect("grouping is acyclic");
    }
}

// ============================================================================
// ASSERTION HELPERS
// ============================================================================

/// Top-level node names in order.
pub fn names(nodes: &[ChartNode]) -> Vec<&str> {
    nodes.iter().map(|n| n.name.as_str()).collect()
}

/// Finds a node by name along `path`.
pub fn node<'a>(nodes: &'a [ChartNode], path: &[&str]) -> &'a ChartNode {
    let (first, rest) = path.split_first().expect("non-empty path");
    let found = nodes
        .iter()
        .find(|n| n.name == *first)
        .unwrap_or_else(|| panic!("no node named '{}'", first));
    if rest.is_empty() {
        found
    } else {
        node(found.children.as_deref().unwrap_or(&[]), rest)
    }
}

/// Values of the node at `path`.
pub fn values(nodes: &[ChartNode], path: &[&str]) -> Vec<f64> {
    node(nodes, path).value.clone().unwrap_or_default()
}

// ============================================================================
// FIXTURES
// ============================================================================

/// Minimal single-category dataset: statA over two groups.
pub struct SimpleFixture;

impl SimpleFixture {
    pub const DATASET: &'static str = "simple";
    pub const CATEGORY: &'static str = "cat";

    pub fn dataset() -> GroupedOutputDataset {
        GroupedOutputDataset::new()
            .with_values("statA", vec![1.0, 2.0, 3.0, 4.0])
            .with_groups(Self::CATEGORY, vec!["g1", "g1", "g2", "g2"])
    }

    pub fn grouping() -> Grouping {
        Grouping {
            levels: vec![GroupingLevel::new("cat")],
            ..Default::default()
        }
        .with_member("g1", &[("cat", "g1")])
        .with_member("g2", &[("cat", "g2")])
    }
}

/// Six households across two states and three age bands.
///
/// | row | region | age   | population | income |
/// |-----|--------|-------|------------|--------|
/// | 0   | nyc    | young | 10         | 100    |
/// | 1   | buf    | old   | 20         | 300    |
/// | 2   | la     | young | 30         | 200    |
/// | 3   | sf     | mid   | 40         | 800    |
/// | 4   | la     | old   | 50         | 0      |
/// | 5   | nyc    | mid   | 60         | 600    |
pub struct CensusFixture;

impl CensusFixture {
    pub const DATASET: &'static str = "census";
    pub const REGION: &'static str = "region";
    pub const AGE: &'static str = "age";

    pub fn dataset() -> GroupedOutputDataset {
        GroupedOutputDataset::new()
            .with_values("population", vec![10.0, 20.0, 30.0, 40.0, 50.0, 60.0])
            .with_values("income", vec![100.0, 300.0, 200.0, 800.0, 0.0, 600.0])
            .with_groups(Self::REGION, vec!["nyc", "buf", "la", "sf", "la", "nyc"])
            .with_groups(Self::AGE, vec!["young", "old", "young", "mid", "old", "mid"])
    }

    /// state -> city, with the city ordered under its state.
    pub fn region() -> Grouping {
        Grouping {
            levels: vec![
                GroupingLevel::new("state"),
                GroupingLevel::new("city").with_parent("state", true),
            ],
            ..Default::default()
        }
        .with_member("nyc", &[("state", "NY"), ("city", "New York")])
        .with_member("buf", &[("state", "NY"), ("city", "Buffalo")])
        .with_member("la", &[("state", "CA"), ("city", "Los Angeles")])
        .with_member("sf", &[("state", "CA"), ("city", "San Francisco")])
    }

    pub fn age_band() -> Grouping {
        Grouping {
            levels: vec![GroupingLevel::new("band").with_ordering(vec!["young", "mid", "old"])],
            ..Default::default()
        }
        .with_member("young", &[("band", "young")])
        .with_member("mid", &[("band", "mid")])
        .with_member("old", &[("band", "old")])
    }
}
