//! FILENAME: core/chart-engine/src/definition.rs
//! Chart Request - The serializable description of one chart.
//!
//! This module contains all the types needed to DESCRIBE a chart.
//! These structures are designed to be:
//! - Deserializable from the UI's camelCase JSON
//! - Stable when serialized (maps are `BTreeMap`s), because the serialized
//!   request is the memo cache key
//! - Immutable snapshots of user intent

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use stats_core::StatSpec;

use crate::filter::Filter;

/// At most this many groupings nest in one chart.
pub const MAX_GROUPINGS: usize = 2;

// ============================================================================
// CHART TYPE & ORDER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ChartType {
    #[default]
    Bar,
    Column,
    Line,
    Pie,
    Scatter,
    /// Keeps the raw per-group value lists instead of reducing them.
    #[serde(alias = "boxplot", alias = "box_plot")]
    BoxPlot,
}

impl ChartType {
    pub fn keeps_raw_values(self) -> bool {
        self == ChartType::BoxPlot
    }
}

/// Final ordering of the top-level chart nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum XAxisOrder {
    /// Level orderings, else source order.
    #[default]
    Default,
    ValueAscending,
    ValueDescending,
    AlphaAscending,
    AlphaDescending,
}

// ============================================================================
// CHART REQUEST
// ============================================================================

/// Everything a chart depends on besides the synchronized data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartRequest {
    /// Name of the grouped-output dataset.
    pub dataset: String,

    #[serde(default)]
    pub stats: Vec<StatSpec>,

    /// Chart groupings, outermost first.
    #[serde(default)]
    pub grouping_id: Vec<String>,

    /// Level of each chart grouping; a missing entry means the grouping's
    /// last (finest) level.
    #[serde(default)]
    pub grouping_level: Vec<String>,

    /// Filters keyed by a caller-chosen id.
    #[serde(default)]
    pub filters: BTreeMap<String, Filter>,

    #[serde(default)]
    pub chart_type: ChartType,

    #[serde(default)]
    pub x_axis_order: XAxisOrder,

    #[serde(default)]
    pub default_to_zero: bool,
}

impl ChartRequest {
    pub fn new(dataset: impl Into<String>) -> Self {
        ChartRequest {
            dataset: dataset.into(),
            ..Default::default()
        }
    }

    pub fn with_stat(mut self, stat: StatSpec) -> Self {
        self.stats.push(stat);
        self
    }

    pub fn with_grouping(mut self, grouping_id: impl Into<String>, level: impl Into<String>) -> Self {
        self.grouping_id.push(grouping_id.into());
        self.grouping_level.push(level.into());
        self
    }

    pub fn with_filter(mut self, id: impl Into<String>, filter: Filter) -> Self {
        self.filters.insert(id.into(), filter);
        self
    }

    pub fn with_chart_type(mut self, chart_type: ChartType) -> Self {
        self.chart_type = chart_type;
        self
    }

    pub fn with_x_axis_order(mut self, order: XAxisOrder) -> Self {
        self.x_axis_order = order;
        self
    }

    pub fn with_default_to_zero(mut self, default_to_zero: bool) -> Self {
        self.default_to_zero = default_to_zero;
        self
    }

    /// Memo key: the data version followed by the serialized request.
    /// `None` when the request cannot be serialized.
    pub fn cache_key(&self, data_version: u64) -> Option<String> {
        serde_json::to_string(self)
            .ok()
            .map(|json| format!("{}:{}", data_version, json))
    }

    /// The groupings that take part in the chart with their requested levels.
    pub fn chart_groupings(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.grouping_id
            .iter()
            .take(MAX_GROUPINGS)
            .enumerate()
            .map(|(i, id)| (id.as_str(), self.grouping_level.get(i).map(String::as_str)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stats_core::AggregationType;

    #[test]
    fn parses_camel_case_request() {
        let json = r#"{
            "dataset": "census",
            "stats": [{"statId": "pop", "aggregationType": "mean"}],
            "groupingId": ["region"],
            "groupingLevel": ["state"],
            "chartType": "boxPlot",
            "xAxisOrder": "value_descending",
            "defaultToZero": true
        }"#;
        let request: ChartRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.stats[0].aggregation_type, AggregationType::Mean);
        assert_eq!(request.chart_type, ChartType::BoxPlot);
        assert_eq!(request.x_axis_order, XAxisOrder::ValueDescending);
        assert!(request.default_to_zero);
        assert!(request.filters.is_empty());
    }

    #[test]
    fn cache_key_is_stable_and_versioned() {
        let a = ChartRequest::new("d")
            .with_filter("b", Filter::range("s", Some(1.0), None))
            .with_filter("a", Filter::include("cat", vec!["x"]));
        let b = ChartRequest::new("d")
            .with_filter("a", Filter::include("cat", vec!["x"]))
            .with_filter("b", Filter::range("s", Some(1.0), None));
        assert_eq!(a.cache_key(1), b.cache_key(1));
        assert_ne!(a.cache_key(1), a.cache_key(2));
    }

    #[test]
    fn only_two_groupings_take_part() {
        let request = ChartRequest::new("d")
            .with_grouping("a", "l1")
            .with_grouping("b", "l2")
            .with_grouping("c", "l3");
        let groupings: Vec<_> = request.chart_groupings().collect();
        assert_eq!(groupings, vec![("a", Some("l1")), ("b", Some("l2"))]);
    }
}
