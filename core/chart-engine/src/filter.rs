//! FILENAME: core/chart-engine/src/filter.rs
//! Row filtering ahead of the chart pipeline.
//!
//! The pipeline only needs the included row indices; how filters are
//! evaluated is behind `FilterEvaluator` so a host can plug in its own rules.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use stats_core::{log_debug, DataStore, GroupedOutputDataset, BLANK_LABEL};

/// One row filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Filter {
    /// Keeps rows whose group label is one of `values`.
    ///
    /// Without `level` the label is the row's group name in `category`; with
    /// a level it is that level's label in the grouping of the same id.
    Include {
        category: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        level: Option<String>,
        values: Vec<String>,
    },

    /// Drops rows whose group label is one of `values`.
    Exclude {
        category: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        level: Option<String>,
        values: Vec<String>,
    },

    /// Keeps rows whose stat value lies in `[min, max]`. Rows without a
    /// value are dropped.
    Range {
        #[serde(rename = "statId")]
        stat_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },
}

impl Filter {
    pub fn include<S: Into<String>>(category: impl Into<String>, values: Vec<S>) -> Self {
        Filter::Include {
            category: category.into(),
            level: None,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn exclude<S: Into<String>>(category: impl Into<String>, values: Vec<S>) -> Self {
        Filter::Exclude {
            category: category.into(),
            level: None,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn range(stat_id: impl Into<String>, min: Option<f64>, max: Option<f64>) -> Self {
        Filter::Range {
            stat_id: stat_id.into(),
            min,
            max,
        }
    }

    /// Restricts a group filter to one level of its grouping.
    pub fn at_level(mut self, new_level: impl Into<String>) -> Self {
        match &mut self {
            Filter::Include { level, .. } | Filter::Exclude { level, .. } => {
                *level = Some(new_level.into());
            }
            Filter::Range { .. } => {}
        }
        self
    }
}

/// Decides which dataset rows a chart includes.
pub trait FilterEvaluator: Send + Sync {
    fn included_rows(
        &self,
        store: &DataStore,
        dataset: &GroupedOutputDataset,
        filters: &BTreeMap<String, Filter>,
    ) -> Vec<usize>;
}

/// Evaluates group membership and numeric range filters. All filters must pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultFilterEvaluator;

impl DefaultFilterEvaluator {
    fn group_label(
        store: &DataStore,
        dataset: &GroupedOutputDataset,
        category: &str,
        level: Option<&str>,
        row: usize,
    ) -> String {
        let name = dataset.group_name(category, row);
        match level {
            None => name.unwrap_or(BLANK_LABEL).to_string(),
            Some(level) => name
                .and_then(|name| {
                    let grouping = store.grouping(category)?;
                    let dim_row = *grouping.data.id.get(name)?;
                    grouping.data.label(level, dim_row)
                })
                .unwrap_or_else(|| BLANK_LABEL.to_string()),
        }
    }

    fn passes(store: &DataStore, dataset: &GroupedOutputDataset, filter: &Filter, row: usize) -> bool {
        match filter {
            Filter::Include { category, level, values } => {
                let label = Self::group_label(store, dataset, category, level.as_deref(), row);
                values.iter().any(|v| *v == label)
            }
            Filter::Exclude { category, level, values } => {
                let label = Self::group_label(store, dataset, category, level.as_deref(), row);
                !values.iter().any(|v| *v == label)
            }
            Filter::Range { stat_id, min, max } => match dataset.values(stat_id) {
                // Unknown stats do not restrict the chart.
                None => true,
                Some(values) => match values.get(row) {
                    Some(v) if v.is_finite() => {
                        min.map_or(true, |m| *v >= m) && max.map_or(true, |m| *v <= m)
                    }
                    _ => false,
                },
            },
        }
    }
}

impl FilterEvaluator for DefaultFilterEvaluator {
    fn included_rows(
        &self,
        store: &DataStore,
        dataset: &GroupedOutputDataset,
        filters: &BTreeMap<String, Filter>,
    ) -> Vec<usize> {
        let rows = dataset.entity_count();
        for (id, filter) in filters {
            if let Filter::Range { stat_id, .. } = filter {
                if dataset.values(stat_id).is_none() {
                    log_debug!("FILTER", "filter '{}' names unknown stat '{}', ignored", id, stat_id);
                }
            }
        }

        (0..rows)
            .filter(|&row| filters.values().all(|f| Self::passes(store, dataset, f, row)))
            .collect()
    }
}
