//! FILENAME: core/stats-core/src/worker/unit.rs
//! The computation unit: buckets raw values by packed group ids.
//!
//! A work item carries one or more grouping passes concatenated into a single
//! `group_bys` buffer (`passes * group_length` ids). Pass 0 is the outermost
//! nesting level. The first `final_depth` passes are chart groupings; any
//! trailing pass is the stat's own value-regroup level. Reduction happens in
//! the caller; the unit only buckets.

use std::collections::HashMap;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::calc::{Calculation, GroupScope};
use crate::tree::{GroupNode, GroupTree};
use crate::{log_debug, log_warn};

/// Values a work item buckets.
#[derive(Debug, Clone)]
pub enum WorkValues {
    /// One raw value per entity.
    Series(Arc<[f64]>),

    /// A calculation evaluated once per innermost group over named series.
    Derived {
        expression: Arc<str>,
        series: Arc<HashMap<String, Arc<[f64]>>>,
    },
}

/// One unit of bucketing work. Buffers are shared read-only with the caller.
#[derive(Debug, Clone)]
pub struct WorkItem {
    /// Packed group ids, pass after pass.
    pub group_bys: Arc<[u32]>,
    /// Number of parental-path levels folded into each chart grouping pass.
    pub parent_lengths: Vec<usize>,
    /// Entity count; the length of one pass.
    pub group_length: usize,
    /// Number of leading passes that are chart groupings.
    pub final_depth: usize,
    /// Included entity rows.
    pub indices: Arc<[usize]>,
    pub values: WorkValues,
}

impl WorkItem {
    /// Number of grouping passes packed into `group_bys`.
    pub fn passes(&self) -> usize {
        if self.group_length == 0 {
            0
        } else {
            self.group_bys.len() / self.group_length
        }
    }

    fn keys_for(&self, row: usize, passes: usize) -> SmallVec<[u32; 4]> {
        (0..passes)
            .map(|pass| self.group_bys[pass * self.group_length + row])
            .collect()
    }
}

/// Buckets the item's values into a nested group tree.
pub fn compute(item: &WorkItem) -> GroupNode {
    let passes = item.passes();
    log_debug!(
        "UNIT",
        "compute passes={} final_depth={} rows={}",
        passes,
        item.final_depth,
        item.indices.len()
    );

    match &item.values {
        WorkValues::Series(values) => {
            let mut tree = GroupTree::with_depth(passes);
            for &row in item.indices.iter() {
                if row >= item.group_length {
                    continue;
                }
                let value = match values.get(row) {
                    Some(v) if v.is_finite() => *v,
                    _ => continue,
                };
                tree.insert(&item.keys_for(row, passes), value);
            }
            tree
        }

        WorkValues::Derived { expression, series } => {
            let calculation = match Calculation::parse(expression) {
                Ok(calculation) => calculation,
                Err(err) => {
                    log_warn!("CALC", "calculation '{}' does not parse: {}", expression, err);
                    return GroupTree::with_depth(passes.max(1));
                }
            };

            let mut rows: GroupTree<usize> = GroupTree::with_depth(passes);
            for &row in item.indices.iter() {
                if row < item.group_length {
                    rows.insert(&item.keys_for(row, passes), row);
                }
            }

            rows.filter_map_leaves(&mut |group_rows: Vec<usize>| {
                let scope = GroupScope::new(series, &group_rows);
                calculation.evaluate_group(&scope)
            })
            .unwrap_or_else(|| GroupTree::with_depth(passes.max(1)))
        }
    }
}
