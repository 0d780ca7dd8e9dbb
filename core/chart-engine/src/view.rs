//! FILENAME: core/chart-engine/src/view.rs
//! Chart View - Renderable output for the frontend.
//!
//! This module turns reduced group trees into the `{name, value | children}`
//! shape the chart renderer consumes, and holds the post-processing steps
//! that work on that shape:
//! - merging the trees of several stats, matched on interned group ids
//! - zero-filling of missing leaves
//! - level orderings and source order
//! - the final x-axis order

use std::collections::{BTreeMap, BTreeSet};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use stats_core::{GroupTree, Grouping, BLANK_LABEL};

use crate::definition::XAxisOrder;
use crate::grouping::{GroupDict, LabelPath, ALL_LABEL};

// ============================================================================
// CHART NODE
// ============================================================================

/// One bar / slice / box of a chart, or a group of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartNode {
    pub name: String,

    /// One value per stat, in request order (or the raw values of a box
    /// plot). A stat without values for this group holds NaN, which
    /// serializes as `null`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Vec<f64>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<ChartNode>>,

    /// Composite labels of this node and its ancestors, root first. Unlike
    /// `name` this identifies the node; it is what `drill_down` takes.
    #[serde(skip)]
    pub label_path: Vec<String>,
}

impl ChartNode {
    pub fn leaf(name: impl Into<String>, value: Vec<f64>) -> Self {
        ChartNode {
            name: name.into(),
            value: Some(value),
            children: None,
            label_path: Vec::new(),
        }
    }

    pub fn branch(name: impl Into<String>, children: Vec<ChartNode>) -> Self {
        ChartNode {
            name: name.into(),
            value: None,
            children: Some(children),
            label_path: Vec::new(),
        }
    }

    pub fn with_label_path(mut self, label_path: Vec<String>) -> Self {
        self.label_path = label_path;
        self
    }

    /// Sum of the first value of this node and all its descendants. Missing
    /// values count as zero.
    pub fn value_sum(&self) -> f64 {
        let own = self
            .value
            .as_ref()
            .and_then(|v| v.first())
            .copied()
            .filter(|v| v.is_finite())
            .unwrap_or(0.0);
        let below: f64 = self
            .children
            .iter()
            .flatten()
            .map(ChartNode::value_sum)
            .sum();
        own + below
    }
}

// ============================================================================
// STAT SLOTS
// ============================================================================

/// Reduced trees of all stats, merged. Each leaf holds one slot per stat;
/// slot `i` is `None` while stat `i` has no values for that group.
pub type SlotTree = GroupTree<Option<Vec<f64>>>;

/// An empty slot tree shaped like the root of `tree`.
pub fn empty_slots<T>(tree: &GroupTree<T>, width: usize) -> SlotTree {
    match tree {
        GroupTree::Leaf(_) => GroupTree::Leaf(vec![None; width]),
        GroupTree::Branch(_) => GroupTree::Branch(BTreeMap::new()),
    }
}

/// Stores the leaves of one stat's reduced tree in `slot`. Groups are
/// matched on their interned ids, never on display labels.
pub fn merge_stat_tree(target: &mut SlotTree, tree: GroupTree<f64>, slot: usize, width: usize) {
    match (target, tree) {
        (GroupTree::Leaf(slots), GroupTree::Leaf(values)) => {
            if let Some(entry) = slots.get_mut(slot) {
                *entry = Some(values);
            }
        }
        (GroupTree::Branch(targets), GroupTree::Branch(children)) => {
            for (id, child) in children {
                let entry = targets
                    .entry(id)
                    .or_insert_with(|| empty_slots(&child, width));
                merge_stat_tree(entry, child, slot, width);
            }
        }
        _ => {}
    }
}

fn slot_values(slots: &[Option<Vec<f64>>]) -> Vec<f64> {
    slots
        .iter()
        .flat_map(|slot| match slot {
            Some(values) => values.clone(),
            None => vec![f64::NAN],
        })
        .collect()
}

// ============================================================================
// ORDERING
// ============================================================================

/// Configured label orderings along one depth's parental path.
#[derive(Debug, Clone, Default)]
pub struct DepthOrdering {
    positions: Vec<Option<FxHashMap<String, usize>>>,
}

impl DepthOrdering {
    /// Orderings of every level in `path`, root first.
    pub fn for_path(grouping: &Grouping, path: &[String]) -> Self {
        let positions = path
            .iter()
            .map(|level| {
                let ordering = grouping.level(level)?.ordering.as_ref()?;
                let mut map = FxHashMap::default();
                for (i, label) in ordering.iter().enumerate() {
                    map.entry(label.clone()).or_insert(i);
                }
                Some(map)
            })
            .collect();
        DepthOrdering { positions }
    }

    pub fn is_unordered(&self) -> bool {
        self.positions.iter().all(Option::is_none)
    }

    /// Sort key of a composite: its position in each ordered level, parent
    /// levels first. Unordered levels compare equal; labels missing from an
    /// ordering go last.
    fn sort_key(&self, labels: Option<&LabelPath>) -> SmallVec<[usize; 2]> {
        let labels = match labels {
            Some(labels) => labels,
            None => return SmallVec::new(),
        };
        labels
            .iter()
            .enumerate()
            .map(|(i, label)| match self.positions.get(i).and_then(Option::as_ref) {
                Some(map) => map.get(label).copied().unwrap_or(usize::MAX),
                None => 0,
            })
            .collect()
    }
}

/// Applies the final x-axis order to the top-level nodes. Sorting is stable.
pub fn apply_x_axis_order(nodes: &mut [ChartNode], order: XAxisOrder) {
    match order {
        XAxisOrder::Default => {}
        XAxisOrder::ValueAscending => {
            nodes.sort_by(|a, b| a.value_sum().total_cmp(&b.value_sum()));
        }
        XAxisOrder::ValueDescending => {
            nodes.sort_by(|a, b| b.value_sum().total_cmp(&a.value_sum()));
        }
        XAxisOrder::AlphaAscending => nodes.sort_by(|a, b| a.name.cmp(&b.name)),
        XAxisOrder::AlphaDescending => nodes.sort_by(|a, b| b.name.cmp(&a.name)),
    }
}

// ============================================================================
// TREE -> NODES
// ============================================================================

/// Converts merged stat slots into chart nodes.
///
/// Children are in id (source) order unless the depth has a configured
/// ordering.
pub fn build_nodes(tree: &SlotTree, dict: &GroupDict, orderings: &[DepthOrdering]) -> Vec<ChartNode> {
    match tree {
        GroupTree::Leaf(slots) => vec![ChartNode::leaf(ALL_LABEL, slot_values(slots))
            .with_label_path(vec![ALL_LABEL.to_string()])],
        GroupTree::Branch(children) => build_level(children, 0, &[], dict, orderings),
    }
}

fn build_level(
    children: &BTreeMap<u32, SlotTree>,
    depth: usize,
    parent_path: &[String],
    dict: &GroupDict,
    orderings: &[DepthOrdering],
) -> Vec<ChartNode> {
    let mut entries: Vec<(u32, &SlotTree)> = children.iter().map(|(id, node)| (*id, node)).collect();

    if let Some(ordering) = orderings.get(depth).filter(|o| !o.is_unordered()) {
        let mut keyed: Vec<(SmallVec<[usize; 2]>, u32, &SlotTree)> = entries
            .into_iter()
            .map(|(id, node)| (ordering.sort_key(dict.labels(id)), id, node))
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        entries = keyed.into_iter().map(|(_, id, node)| (id, node)).collect();
    }

    entries
        .into_iter()
        .map(|(id, node)| {
            let name = dict.label(id).unwrap_or(BLANK_LABEL).to_string();
            let mut path = parent_path.to_vec();
            match dict.labels(id) {
                Some(labels) => path.extend(labels.iter().cloned()),
                None => path.push(name.clone()),
            }
            let built = match node {
                GroupTree::Leaf(slots) => ChartNode::leaf(name, slot_values(slots)),
                GroupTree::Branch(grand) => {
                    ChartNode::branch(name, build_level(grand, depth + 1, &path, dict, orderings))
                }
            };
            built.with_label_path(path)
        })
        .collect()
}

// ============================================================================
// ZERO FILL
// ============================================================================

/// Zero-fills merged stat slots: every leaf-holding branch gets the union
/// of leaf keys found anywhere in the tree, and every empty slot becomes 0.
pub fn zero_fill(tree: &mut SlotTree, width: usize) {
    fill_missing_leaves(tree, &vec![None; width]);
    fill_empty_slots(tree);
}

/// Gives every leaf-holding branch the union of leaf keys found anywhere in
/// the tree; absent leaves are created as copies of `blank`.
pub fn fill_missing_leaves<T: Clone>(tree: &mut GroupTree<T>, blank: &[T]) {
    let mut keys = BTreeSet::new();
    collect_leaf_keys(tree, &mut keys);
    insert_missing(tree, &keys, blank);
}

fn holds_leaves<T>(children: &BTreeMap<u32, GroupTree<T>>) -> bool {
    children.values().any(|child| matches!(child, GroupTree::Leaf(_)))
}

fn collect_leaf_keys<T>(node: &GroupTree<T>, keys: &mut BTreeSet<u32>) {
    if let GroupTree::Branch(children) = node {
        if holds_leaves(children) {
            keys.extend(children.keys().copied());
        } else {
            for child in children.values() {
                collect_leaf_keys(child, keys);
            }
        }
    }
}

fn insert_missing<T: Clone>(node: &mut GroupTree<T>, keys: &BTreeSet<u32>, blank: &[T]) {
    if let GroupTree::Branch(children) = node {
        if holds_leaves(children) {
            for key in keys {
                children
                    .entry(*key)
                    .or_insert_with(|| GroupTree::Leaf(blank.to_vec()));
            }
        } else {
            for child in children.values_mut() {
                insert_missing(child, keys, blank);
            }
        }
    }
}

fn fill_empty_slots(node: &mut SlotTree) {
    match node {
        GroupTree::Leaf(slots) => {
            for slot in slots.iter_mut() {
                slot.get_or_insert_with(|| vec![0.0]);
            }
        }
        GroupTree::Branch(children) => children.values_mut().for_each(fill_empty_slots),
    }
}

// ============================================================================
// DRILL DOWN
// ============================================================================

/// The dataset rows behind one chart node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrillDownResult {
    pub dataset: String,

    /// Composite labels from the top level down to the drilled node, as in
    /// `ChartNode::label_path`.
    pub label_path: Vec<String>,

    /// Matching row indices, at most `max_records` of them.
    pub source_rows: Vec<usize>,

    /// Total count of matching rows.
    pub total_count: usize,

    /// Whether `source_rows` was cut at `max_records`.
    pub is_truncated: bool,

    pub max_records: usize,
}

impl DrillDownResult {
    pub fn new(dataset: impl Into<String>, label_path: Vec<String>) -> Self {
        DrillDownResult {
            dataset: dataset.into(),
            label_path,
            source_rows: Vec::new(),
            total_count: 0,
            is_truncated: false,
            max_records: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stats_core::GroupingLevel;

    #[test]
    fn value_descending_sorts_by_value() {
        let mut nodes = vec![ChartNode::leaf("a", vec![5.0]), ChartNode::leaf("b", vec![10.0])];
        apply_x_axis_order(&mut nodes, XAxisOrder::ValueDescending);
        let names: Vec<&str> = nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn value_order_sums_descendants() {
        let mut nodes = vec![
            ChartNode::branch("x", vec![ChartNode::leaf("p", vec![1.0]), ChartNode::leaf("q", vec![1.0])]),
            ChartNode::branch("y", vec![ChartNode::leaf("p", vec![3.0, 100.0])]),
        ];
        apply_x_axis_order(&mut nodes, XAxisOrder::ValueAscending);
        assert_eq!(nodes[0].name, "x");
        apply_x_axis_order(&mut nodes, XAxisOrder::AlphaDescending);
        assert_eq!(nodes[0].name, "y");
    }

    fn dict_of(labels: &[&[&str]]) -> (GroupDict, Vec<u32>) {
        let mut dict = GroupDict::new();
        let ids = labels
            .iter()
            .map(|path| dict.intern(path.iter().map(|l| l.to_string()).collect()))
            .collect();
        (dict, ids)
    }

    fn one_level(entries: &[(u32, f64)]) -> GroupTree<f64> {
        let mut tree = GroupTree::with_depth(1);
        for (id, value) in entries {
            tree.insert(&[*id], *value);
        }
        tree
    }

    fn merged(trees: Vec<GroupTree<f64>>) -> SlotTree {
        let width = trees.len();
        let mut target: SlotTree = GroupTree::with_depth(1);
        for (slot, tree) in trees.into_iter().enumerate() {
            merge_stat_tree(&mut target, tree, slot, width);
        }
        target
    }

    #[test]
    fn stat_slots_stay_aligned_when_a_stat_lacks_a_group() {
        let (dict, ids) = dict_of(&[&["g1"], &["g2"]]);
        let (g1, g2) = (ids[0], ids[1]);
        let tree = merged(vec![one_level(&[(g2, 5.0)]), one_level(&[(g1, 7.0), (g2, 9.0)])]);

        let nodes = build_nodes(&tree, &dict, &[]);
        let names: Vec<&str> = nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["g1", "g2"]);
        let g1_values = nodes[0].value.as_ref().unwrap();
        assert!(g1_values[0].is_nan());
        assert_eq!(g1_values[1], 7.0);
        assert_eq!(nodes[1].value, Some(vec![5.0, 9.0]));
    }

    #[test]
    fn zero_fill_completes_empty_slots() {
        let (dict, ids) = dict_of(&[&["g1"], &["g2"]]);
        let mut tree = merged(vec![one_level(&[(ids[1], 5.0)]), one_level(&[(ids[0], 7.0)])]);
        zero_fill(&mut tree, 2);

        let nodes = build_nodes(&tree, &dict, &[]);
        assert_eq!(nodes[0].value, Some(vec![0.0, 7.0]));
        assert_eq!(nodes[1].value, Some(vec![5.0, 0.0]));
    }

    #[test]
    fn groups_sharing_a_display_label_stay_apart() {
        let (dict, ids) = dict_of(&[&["ME", "Portland"], &["OR", "Portland"]]);
        let tree = merged(vec![one_level(&[(ids[0], 1.0), (ids[1], 2.0)])]);

        let nodes = build_nodes(&tree, &dict, &[]);
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].name, "Portland");
        assert_eq!(nodes[0].value, Some(vec![1.0]));
        assert_eq!(nodes[0].label_path, vec!["ME", "Portland"]);
        assert_eq!(nodes[1].value, Some(vec![2.0]));
        assert_eq!(nodes[1].label_path, vec!["OR", "Portland"]);
    }

    #[test]
    fn zero_fill_uses_union_of_leaf_keys() {
        let mut tree: GroupTree<f64> = GroupTree::with_depth(2);
        tree.insert(&[1, 10], 5.0);
        tree.insert(&[2, 11], 6.0);
        fill_missing_leaves(&mut tree, &[0.0]);

        let children = tree.children().unwrap();
        let first = children[&1].children().unwrap();
        assert_eq!(first[&11], GroupTree::Leaf(vec![0.0]));
        let second = children[&2].children().unwrap();
        assert_eq!(second[&10], GroupTree::Leaf(vec![0.0]));
        assert_eq!(second[&11], GroupTree::Leaf(vec![6.0]));
    }

    #[test]
    fn build_nodes_honours_level_ordering() {
        let (dict, ids) = dict_of(&[&["low"], &["high"]]);
        let tree = merged(vec![one_level(&[(ids[0], 1.0), (ids[1], 2.0)])]);

        let unordered = build_nodes(&tree, &dict, &[]);
        assert_eq!(unordered[0].name, "low");

        let grouping = Grouping {
            levels: vec![GroupingLevel::new("band").with_ordering(vec!["high", "low"])],
            ..Default::default()
        };
        let ordering = DepthOrdering::for_path(&grouping, &["band".to_string()]);
        let ordered = build_nodes(&tree, &dict, &[ordering]);
        assert_eq!(ordered[0].name, "high");
        assert_eq!(ordered[0].value, Some(vec![2.0]));
    }

    #[test]
    fn missing_first_value_counts_as_zero() {
        let node = ChartNode::leaf("a", vec![f64::NAN, 4.0]);
        assert_eq!(node.value_sum(), 0.0);
    }

    #[test]
    fn serializes_without_empty_fields() {
        let json = serde_json::to_string(&ChartNode::leaf("a", vec![1.0])).unwrap();
        assert_eq!(json, r#"{"name":"a","value":[1.0]}"#);
    }
}
