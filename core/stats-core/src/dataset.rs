//! FILENAME: core/stats-core/src/dataset.rs
//! Dataset model - what the synchronization layer hands us.
//!
//! These structures are:
//! - Deserializable from the sync layer's camelCase JSON
//! - Immutable between syncs (shared as `Arc`s)
//! - Versioned by the `DataStore`, so memo keys can capture data changes

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::{log_debug, log_info};

/// Label used for rows whose group cannot be resolved.
pub const BLANK_LABEL: &str = "(blank)";

// ============================================================================
// GROUPED OUTPUT DATASET
// ============================================================================

/// Per-entity statistic values and group memberships for one dataset.
///
/// `value_lists[stat][row]` is the stat value for entity `row`; `NaN` (sent as
/// `null`) means "no value". `group_lists[category][row]` is the entity's group
/// name within `category`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupedOutputDataset {
    #[serde(default, deserialize_with = "deserialize_value_lists")]
    pub value_lists: HashMap<String, Arc<[f64]>>,

    #[serde(default)]
    pub group_lists: HashMap<String, Vec<Option<String>>>,
}

fn deserialize_value_lists<'de, D>(deserializer: D) -> Result<HashMap<String, Arc<[f64]>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: HashMap<String, Vec<Option<f64>>> = HashMap::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(stat, values)| {
            let values: Arc<[f64]> = values
                .into_iter()
                .map(|v| v.unwrap_or(f64::NAN))
                .collect();
            (stat, values)
        })
        .collect())
}

impl GroupedOutputDataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder used by fixtures and the sync layer adapters.
    pub fn with_values(mut self, stat: impl Into<String>, values: Vec<f64>) -> Self {
        self.value_lists.insert(stat.into(), values.into());
        self
    }

    /// Builder used by fixtures and the sync layer adapters.
    pub fn with_groups<S: Into<String>>(mut self, category: impl Into<String>, groups: Vec<S>) -> Self {
        self.group_lists.insert(
            category.into(),
            groups.into_iter().map(|g| Some(g.into())).collect(),
        );
        self
    }

    /// Number of entities. Taken from the longest list so a malformed dataset
    /// never hides rows.
    pub fn entity_count(&self) -> usize {
        let values = self.value_lists.values().map(|v| v.len());
        let groups = self.group_lists.values().map(|g| g.len());
        values.chain(groups).max().unwrap_or(0)
    }

    /// Returns the value series for a stat.
    pub fn values(&self, stat: &str) -> Option<&Arc<[f64]>> {
        self.value_lists.get(stat)
    }

    /// Returns the group name of `row` within `category`.
    pub fn group_name(&self, category: &str, row: usize) -> Option<&str> {
        self.group_lists
            .get(category)
            .and_then(|groups| groups.get(row))
            .and_then(|name| name.as_deref())
    }

    /// Checks that every list has the same entity count.
    pub fn validate(&self, name: &str) -> EngineResult<()> {
        let expected = self.entity_count();
        let lengths = self
            .value_lists
            .iter()
            .map(|(k, v)| (k, v.len()))
            .chain(self.group_lists.iter().map(|(k, g)| (k, g.len())));

        for (list, found) in lengths {
            if found != expected {
                return Err(EngineError::ShapeMismatch {
                    dataset: name.to_string(),
                    list: list.clone(),
                    expected,
                    found,
                });
            }
        }
        Ok(())
    }
}

// ============================================================================
// GROUPING
// ============================================================================

/// One level of a hierarchical category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupingLevel {
    pub name: String,

    /// Name of the parent level, if any.
    #[serde(default)]
    pub parent: Option<String>,

    /// Explicit display order of this level's labels.
    #[serde(default)]
    pub ordering: Option<Vec<String>>,

    /// Whether this level is ordered (and nested) under its parent.
    #[serde(default)]
    pub order_with_parent: Option<bool>,
}

impl GroupingLevel {
    pub fn new(name: impl Into<String>) -> Self {
        GroupingLevel {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>, order_with_parent: bool) -> Self {
        self.parent = Some(parent.into());
        self.order_with_parent = Some(order_with_parent);
        self
    }

    pub fn with_ordering<S: Into<String>>(mut self, ordering: Vec<S>) -> Self {
        self.ordering = Some(ordering.into_iter().map(Into::into).collect());
        self
    }
}

/// The category's own dimension table.
///
/// `id` maps a group name (as found in a dataset's group list) to a row of
/// the table; every other key is a column holding one label per row for the
/// level of the same name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupingData {
    #[serde(default)]
    pub id: HashMap<String, usize>,

    #[serde(flatten)]
    pub columns: HashMap<String, Vec<serde_json::Value>>,
}

impl GroupingData {
    /// Label of `level` at dimension row `row`.
    pub fn label(&self, level: &str, row: usize) -> Option<String> {
        self.columns
            .get(level)
            .and_then(|column| column.get(row))
            .and_then(value_label)
    }
}

/// Converts a dimension-table cell to its display label.
fn value_label(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

/// A hierarchical classification used to bucket entities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grouping {
    #[serde(default)]
    pub levels: Vec<GroupingLevel>,

    #[serde(default)]
    pub data: GroupingData,
}

impl Grouping {
    pub fn level(&self, name: &str) -> Option<&GroupingLevel> {
        self.levels.iter().find(|l| l.name == name)
    }

    /// Returns the first level whose parent graph loops back on itself.
    pub fn find_cycle(&self) -> Option<&str> {
        for start in &self.levels {
            let mut current = start.parent.as_deref();
            let mut steps = 0;
            while let Some(name) = current {
                if name == start.name {
                    return Some(&start.name);
                }
                steps += 1;
                if steps > self.levels.len() {
                    return Some(&start.name);
                }
                current = self.level(name).and_then(|l| l.parent.as_deref());
            }
        }
        None
    }

    /// Builder used by fixtures: registers a group name with its labels per level.
    pub fn with_member(mut self, group_name: impl Into<String>, labels: &[(&str, &str)]) -> Self {
        let row = self.data.id.len();
        self.data.id.insert(group_name.into(), row);
        for (level, label) in labels {
            let column = self.data.columns.entry(level.to_string()).or_default();
            if column.len() < row {
                column.resize(row, serde_json::Value::Null);
            }
            column.push(serde_json::Value::String(label.to_string()));
        }
        self
    }
}

// ============================================================================
// STATISTIC SPECIFICATION
// ============================================================================

/// Supported reductions for chart statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AggregationType {
    #[default]
    Sum,
    Min,
    Max,
    Mean,
    /// Ratio of two summed stats: `statId / statIdDivisor`.
    Divisor,
}

/// One statistic requested by a chart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatSpec {
    pub stat_id: String,

    #[serde(default)]
    pub aggregation_type: AggregationType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stat_id_divisor: Option<String>,

    /// Category used to pre-aggregate values before the chart grouping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation_grouping_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation_grouping_level: Option<String>,

    /// Derived expression evaluated per group, e.g. `groupSum("a") / groupSum("b")`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calculation: Option<String>,

    /// Display name; the chart pipeline falls back to `stat_id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl StatSpec {
    pub fn new(stat_id: impl Into<String>, aggregation_type: AggregationType) -> Self {
        StatSpec {
            stat_id: stat_id.into(),
            aggregation_type,
            ..Default::default()
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.stat_id)
    }

    pub fn divisor(stat_id: impl Into<String>, divisor: impl Into<String>) -> Self {
        StatSpec {
            stat_id: stat_id.into(),
            aggregation_type: AggregationType::Divisor,
            stat_id_divisor: Some(divisor.into()),
            ..Default::default()
        }
    }
}

// ============================================================================
// DATA STORE
// ============================================================================

/// Datasets and groupings as last synchronized.
///
/// Every sync bumps `version`; cached results keyed with the version are
/// therefore never served across a sync.
#[derive(Debug, Default)]
pub struct DataStore {
    datasets: HashMap<String, Arc<GroupedOutputDataset>>,
    groupings: HashMap<String, Arc<Grouping>>,
    version: u64,
}

impl DataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Upserts datasets. The whole batch is rejected if any dataset is malformed.
    pub fn sync_datasets(&mut self, datasets: HashMap<String, GroupedOutputDataset>) -> EngineResult<()> {
        for (name, dataset) in &datasets {
            dataset.validate(name)?;
        }

        let count = datasets.len();
        for (name, dataset) in datasets {
            log_debug!("SYNC", "dataset '{}' rows={}", name, dataset.entity_count());
            self.datasets.insert(name, Arc::new(dataset));
        }
        self.version += 1;
        log_info!("SYNC", "synced {} dataset(s) version={}", count, self.version);
        Ok(())
    }

    /// Upserts groupings. The whole batch is rejected if any level graph is cyclic.
    pub fn sync_groupings(&mut self, groupings: HashMap<String, Grouping>) -> EngineResult<()> {
        for (id, grouping) in &groupings {
            if let Some(level) = grouping.find_cycle() {
                return Err(EngineError::CyclicGrouping {
                    grouping: id.clone(),
                    level: level.to_string(),
                });
            }
        }

        let count = groupings.len();
        for (id, grouping) in groupings {
            self.groupings.insert(id, Arc::new(grouping));
        }
        self.version += 1;
        log_info!("SYNC", "synced {} grouping(s) version={}", count, self.version);
        Ok(())
    }

    pub fn remove_dataset(&mut self, name: &str) -> bool {
        let removed = self.datasets.remove(name).is_some();
        if removed {
            self.version += 1;
        }
        removed
    }

    pub fn dataset(&self, name: &str) -> Option<&Arc<GroupedOutputDataset>> {
        self.datasets.get(name)
    }

    pub fn grouping(&self, id: &str) -> Option<&Arc<Grouping>> {
        self.groupings.get(id)
    }
}
