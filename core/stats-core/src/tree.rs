//! FILENAME: core/stats-core/src/tree.rs
//! Nested group maps produced by the computation unit.
//!
//! Whether a node is a leaf or a branch is decided once, when the tree is
//! built, instead of being re-discovered while walking it. Branch keys are the
//! interned group ids, so iteration order is interning (source) order.

use std::collections::BTreeMap;

/// A tree of group id -> subtree, with value lists at the leaves.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupTree<T> {
    Leaf(Vec<T>),
    Branch(BTreeMap<u32, GroupTree<T>>),
}

/// Bucketed raw values, as returned by the workers.
pub type GroupNode = GroupTree<f64>;

impl<T> Default for GroupTree<T> {
    fn default() -> Self {
        GroupTree::Branch(BTreeMap::new())
    }
}

impl<T> GroupTree<T> {
    /// Empty tree whose leaves sit `depth` levels below the root.
    pub fn with_depth(depth: usize) -> Self {
        if depth == 0 {
            GroupTree::Leaf(Vec::new())
        } else {
            GroupTree::Branch(BTreeMap::new())
        }
    }

    /// Appends `item` to the leaf addressed by `keys`, creating nodes on the way.
    /// A key path that does not match the tree's depth is ignored.
    pub fn insert(&mut self, keys: &[u32], item: T) {
        match (self, keys.split_first()) {
            (GroupTree::Leaf(items), None) => items.push(item),
            (GroupTree::Branch(children), Some((key, rest))) => children
                .entry(*key)
                .or_insert_with(|| GroupTree::with_depth(rest.len()))
                .insert(rest, item),
            _ => {}
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            GroupTree::Leaf(items) => items.is_empty(),
            GroupTree::Branch(children) => children.is_empty(),
        }
    }

    /// Number of leaves.
    pub fn leaf_count(&self) -> usize {
        match self {
            GroupTree::Leaf(_) => 1,
            GroupTree::Branch(children) => children.values().map(GroupTree::leaf_count).sum(),
        }
    }

    pub fn children(&self) -> Option<&BTreeMap<u32, GroupTree<T>>> {
        match self {
            GroupTree::Branch(children) => Some(children),
            GroupTree::Leaf(_) => None,
        }
    }

    /// Rewrites every leaf. Leaves mapped to `None` are removed, and so are
    /// branches left without children.
    pub fn filter_map_leaves<U, F>(self, f: &mut F) -> Option<GroupTree<U>>
    where
        F: FnMut(Vec<T>) -> Option<Vec<U>>,
    {
        match self {
            GroupTree::Leaf(items) => f(items).map(GroupTree::Leaf),
            GroupTree::Branch(children) => {
                let mapped: BTreeMap<u32, GroupTree<U>> = children
                    .into_iter()
                    .filter_map(|(key, child)| child.filter_map_leaves(f).map(|c| (key, c)))
                    .collect();
                if mapped.is_empty() {
                    None
                } else {
                    Some(GroupTree::Branch(mapped))
                }
            }
        }
    }
}
