//! FILENAME: core/chart-engine/src/grouping.rs
//! Grouping path resolution and request-scoped label interning.
//!
//! A dataset row carries a group name per category. The category's grouping
//! maps that name to a row of its dimension table, whose columns give the
//! label of every level. A chart level is identified by a *composite* label:
//! the labels along the level's parental path. Composites are interned into
//! small integer ids so the workers only ever see `u32`s.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use stats_core::{log_debug, log_warn, GroupedOutputDataset, Grouping, BLANK_LABEL};

/// Interned id of the catch-all group used when a chart has no grouping.
pub const ALL_GROUP_ID: u32 = 0;

/// Label of the catch-all group.
pub const ALL_LABEL: &str = "All";

/// Labels along a parental path, root first.
pub type LabelPath = SmallVec<[String; 2]>;

// ============================================================================
// PARENTAL PATH
// ============================================================================

/// Prepends the ancestors of `level` to `path`.
///
/// The walk stops at a level without parent, or, when `only_ordering` is set,
/// at the first level that is not ordered with its parent. A parent chain
/// that loops is cut where it revisits a level.
pub fn create_parental_path(
    mut path: Vec<String>,
    grouping: &Grouping,
    level: &str,
    only_ordering: bool,
) -> Vec<String> {
    let mut current = grouping.level(level);

    while let Some(node) = current {
        let parent = match node.parent.as_deref() {
            Some(parent) => parent,
            None => break,
        };
        if only_ordering && node.order_with_parent != Some(true) {
            break;
        }
        if path.iter().any(|name| name == parent) {
            log_warn!("GROUPING", "cyclic parent chain at level '{}'", parent);
            break;
        }
        path.insert(0, parent.to_string());
        current = grouping.level(parent);
    }

    path
}

// ============================================================================
// GROUP DICTIONARY
// ============================================================================

/// Composite label <-> id table for one pipeline run.
///
/// Ids are handed out in first-appearance order, so sorting by id restores
/// source order. Id 0 is reserved for "All".
#[derive(Debug, Clone)]
pub struct GroupDict {
    group_to_id: FxHashMap<LabelPath, u32>,
    id_to_group: Vec<LabelPath>,
}

impl Default for GroupDict {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupDict {
    pub fn new() -> Self {
        let all: LabelPath = SmallVec::from_elem(ALL_LABEL.to_string(), 1);
        let mut group_to_id = FxHashMap::default();
        group_to_id.insert(all.clone(), ALL_GROUP_ID);
        GroupDict {
            group_to_id,
            id_to_group: vec![all],
        }
    }

    /// Returns the id of `labels`, assigning the next id on first sight.
    pub fn intern(&mut self, labels: LabelPath) -> u32 {
        if let Some(&id) = self.group_to_id.get(&labels) {
            return id;
        }
        let id = self.id_to_group.len() as u32;
        self.group_to_id.insert(labels.clone(), id);
        self.id_to_group.push(labels);
        id
    }

    pub fn get_id(&self, labels: &LabelPath) -> Option<u32> {
        self.group_to_id.get(labels).copied()
    }

    /// Full composite label of an id.
    pub fn labels(&self, id: u32) -> Option<&LabelPath> {
        self.id_to_group.get(id as usize)
    }

    /// Display label of an id: the last label of its composite.
    pub fn label(&self, id: u32) -> Option<&str> {
        self.labels(id).and_then(|path| path.last()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.id_to_group.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_group.is_empty()
    }
}

// ============================================================================
// CATEGORY FUNCTION
// ============================================================================

/// Per-row interned ids of one grouping level.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupingResult {
    /// One id per dataset row.
    pub group_by: Vec<u32>,
    /// Number of ancestor levels folded into each composite.
    pub parent_length: usize,
    /// Number of dataset rows.
    pub group_length: usize,
    /// The level names making up each composite, root first.
    pub path: Vec<String>,
}

/// Interns the composite label of every dataset row at `level` of the
/// grouping `category_id`.
///
/// Chart groupings pass `only_ordering = true` so a composite only spans the
/// levels ordered with their parents; value regroup levels pass `false` so
/// their keys are globally unique. Rows whose group name is unknown get the
/// blank composite. Returns `None` when the dataset or the store lacks the
/// category.
pub fn category_func(
    dataset: &GroupedOutputDataset,
    category_id: &str,
    grouping: Option<&Grouping>,
    level: Option<&str>,
    only_ordering: bool,
    dict: &mut GroupDict,
) -> Option<GroupingResult> {
    let grouping = match grouping {
        Some(grouping) => grouping,
        None => {
            log_debug!("GROUPING", "grouping '{}' not synced", category_id);
            return None;
        }
    };
    let names = match dataset.group_lists.get(category_id) {
        Some(names) => names,
        None => {
            log_debug!("GROUPING", "dataset has no group list for '{}'", category_id);
            return None;
        }
    };

    let level = match level.or_else(|| grouping.levels.last().map(|l| l.name.as_str())) {
        Some(level) => level,
        None => {
            log_debug!("GROUPING", "grouping '{}' has no levels", category_id);
            return None;
        }
    };

    let path = create_parental_path(vec![level.to_string()], grouping, level, only_ordering);
    let group_length = dataset.entity_count();

    // Many rows share a group name; resolve each name once.
    let mut by_name: FxHashMap<Option<&str>, u32> = FxHashMap::default();
    let mut group_by = Vec::with_capacity(group_length);

    for row in 0..group_length {
        let name = names.get(row).and_then(|n| n.as_deref());
        let id = match by_name.get(&name) {
            Some(&id) => id,
            None => {
                let labels = composite_labels(grouping, &path, name);
                let id = dict.intern(labels);
                by_name.insert(name, id);
                id
            }
        };
        group_by.push(id);
    }

    log_debug!(
        "GROUPING",
        "'{}' level '{}' path={:?} rows={} groups={}",
        category_id,
        level,
        path,
        group_length,
        by_name.len()
    );

    Some(GroupingResult {
        group_by,
        parent_length: path.len() - 1,
        group_length,
        path,
    })
}

fn composite_labels(grouping: &Grouping, path: &[String], name: Option<&str>) -> LabelPath {
    let dim_row = name.and_then(|n| grouping.data.id.get(n)).copied();
    path.iter()
        .map(|level| {
            dim_row
                .and_then(|row| grouping.data.label(level, row))
                .unwrap_or_else(|| BLANK_LABEL.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;
    use stats_core::GroupingLevel;

    fn geography(order_with_parent: bool) -> Grouping {
        Grouping {
            levels: vec![
                GroupingLevel::new("country"),
                GroupingLevel::new("state").with_parent("country", order_with_parent),
                GroupingLevel::new("city").with_parent("state", false),
            ],
            ..Default::default()
        }
        .with_member("nyc", &[("country", "US"), ("state", "NY"), ("city", "New York")])
        .with_member("sf", &[("country", "US"), ("state", "CA"), ("city", "San Francisco")])
        .with_member("tor", &[("country", "CA"), ("state", "ON"), ("city", "Toronto")])
    }

    #[test]
    fn ordered_parent_is_part_of_the_path() {
        let grouping = geography(true);
        let path = create_parental_path(vec!["state".into()], &grouping, "state", true);
        assert_eq!(path, vec!["country", "state"]);
    }

    #[test]
    fn unordered_parent_stops_the_walk_when_only_ordering() {
        let grouping = geography(false);
        let path = create_parental_path(vec!["state".into()], &grouping, "state", true);
        assert_eq!(path, vec!["state"]);

        let path = create_parental_path(vec!["city".into()], &grouping, "city", false);
        assert_eq!(path, vec!["country", "state", "city"]);
    }

    #[test]
    fn cyclic_parents_are_cut() {
        let grouping = Grouping {
            levels: vec![
                GroupingLevel::new("a").with_parent("b", true),
                GroupingLevel::new("b").with_parent("a", true),
            ],
            ..Default::default()
        };
        let path = create_parental_path(vec!["a".into()], &grouping, "a", true);
        assert_eq!(path, vec!["b", "a"]);
    }

    #[test]
    fn dict_reserves_all_and_interns_in_order() {
        let mut dict = GroupDict::new();
        assert_eq!(dict.label(ALL_GROUP_ID), Some(ALL_LABEL));
        let a = dict.intern(smallvec!["x".to_string()]);
        let b = dict.intern(smallvec!["y".to_string()]);
        assert_eq!((a, b), (1, 2));
        assert_eq!(dict.intern(smallvec!["x".to_string()]), 1);
        assert_eq!(dict.len(), 3);
    }

    #[test]
    fn single_level_grouping_interns_every_row() {
        let grouping = geography(false);
        let dataset = GroupedOutputDataset::new()
            .with_groups("geo", vec!["nyc", "sf", "nyc", "tor", "sf"]);
        let mut dict = GroupDict::new();

        let result =
            category_func(&dataset, "geo", Some(&grouping), Some("state"), true, &mut dict).unwrap();

        assert_eq!(result.group_by.len(), 5);
        assert_eq!(result.parent_length, 0);
        let mut distinct = result.group_by.clone();
        distinct.sort();
        distinct.dedup();
        assert_eq!(distinct.len(), 3);
        for id in &result.group_by {
            assert!(dict.label(*id).is_some());
        }
        assert_eq!(dict.label(result.group_by[0]), Some("NY"));
        assert_eq!(dict.label(result.group_by[3]), Some("ON"));
    }

    #[test]
    fn composite_keys_follow_the_parental_path() {
        let grouping = geography(true);
        let dataset = GroupedOutputDataset::new().with_groups("geo", vec!["nyc", "tor"]);
        let mut dict = GroupDict::new();
        let result =
            category_func(&dataset, "geo", Some(&grouping), Some("state"), true, &mut dict).unwrap();
        assert_eq!(result.parent_length, 1);
        let labels = dict.labels(result.group_by[1]).unwrap();
        assert_eq!(labels.as_slice(), ["CA".to_string(), "ON".to_string()]);
    }

    #[test]
    fn unknown_names_get_the_blank_composite() {
        let grouping = geography(true);
        let dataset = GroupedOutputDataset::new().with_groups("geo", vec!["atlantis"]);
        let mut dict = GroupDict::new();
        let result =
            category_func(&dataset, "geo", Some(&grouping), Some("state"), true, &mut dict).unwrap();
        let labels = dict.labels(result.group_by[0]).unwrap();
        assert!(labels.iter().all(|l| l == BLANK_LABEL));
        assert_eq!(labels.len(), 2);
    }

    #[test]
    fn missing_grouping_or_list_is_none() {
        let grouping = geography(true);
        let dataset = GroupedOutputDataset::new().with_groups("geo", vec!["nyc"]);
        let mut dict = GroupDict::new();
        assert!(category_func(&dataset, "geo", None, Some("state"), true, &mut dict).is_none());
        assert!(category_func(&dataset, "other", Some(&grouping), None, true, &mut dict).is_none());
    }

    #[test]
    fn missing_level_defaults_to_finest() {
        let grouping = geography(false);
        let dataset = GroupedOutputDataset::new().with_groups("geo", vec!["sf"]);
        let mut dict = GroupDict::new();
        let result = category_func(&dataset, "geo", Some(&grouping), None, true, &mut dict).unwrap();
        assert_eq!(result.path, vec!["city"]);
        assert_eq!(dict.label(result.group_by[0]), Some("San Francisco"));
    }
}
