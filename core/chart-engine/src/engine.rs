//! FILENAME: core/chart-engine/src/engine.rs
//! Chart Calculation Engine.
//!
//! One pipeline run turns a `ChartRequest` into chart nodes:
//! 1. Resolve up to two chart groupings into packed per-row group ids
//! 2. Filter dataset rows
//! 3. Submit one work item per stat (two for divisor stats) to the pool
//! 4. Wait for every ticket and reduce the bucketed values bottom-up
//! 5. Merge the trees of all stats on their group ids, one slot per stat,
//!    zero-filling when asked
//! 6. Reverse-intern ids into labels, reshape into ordered nodes and apply
//!    the x-axis order
//!
//! `ChartEngine` memoizes whole runs keyed by data version + request.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use stats_core::{
    aggregate, log_debug, log_enter, log_exit, log_info, log_warn, stats_pool, try_memoize,
    AggregationType, DataStore, EngineConfig, EngineResult, GroupNode, GroupTree,
    GroupedOutputDataset, Grouping, Memo, PoolStats, StatSpec, StatsPool, Ticket, WorkItem,
    WorkValues,
};

use crate::definition::{ChartRequest, MAX_GROUPINGS};
use crate::error::{ChartError, ChartResult};
use crate::filter::{DefaultFilterEvaluator, FilterEvaluator};
use crate::grouping::{category_func, GroupDict, ALL_GROUP_ID};
use crate::view::{
    apply_x_axis_order, build_nodes, empty_slots, merge_stat_tree, zero_fill, ChartNode,
    DepthOrdering, DrillDownResult, SlotTree,
};

// ============================================================================
// RESOLVED GROUPINGS
// ============================================================================

/// Chart groupings of one run, packed pass after pass.
struct ResolvedGroupings {
    group_bys: Vec<u32>,
    parent_lengths: Vec<usize>,
    orderings: Vec<DepthOrdering>,
    group_length: usize,
}

impl ResolvedGroupings {
    fn final_depth(&self) -> usize {
        self.parent_lengths.len()
    }

    fn id_at(&self, depth: usize, row: usize) -> Option<u32> {
        self.group_bys.get(depth * self.group_length + row).copied()
    }
}

/// Work submitted for one stat.
struct PendingStat<'r> {
    slot: usize,
    spec: &'r StatSpec,
    values: Ticket<GroupNode>,
    divisor: Option<Ticket<GroupNode>>,
}

fn as_grouping(grouping: Option<&Arc<Grouping>>) -> Option<&Grouping> {
    grouping.map(Arc::as_ref)
}

// ============================================================================
// PIPELINE
// ============================================================================

/// Data, workers and filter rules shared by the engine and its memo.
pub struct ChartPipeline {
    store: RwLock<DataStore>,
    pool: StatsPool,
    filter: Box<dyn FilterEvaluator>,
}

impl ChartPipeline {
    pub fn new(pool: StatsPool, filter: Box<dyn FilterEvaluator>) -> Self {
        ChartPipeline {
            store: RwLock::new(DataStore::new()),
            pool,
            filter,
        }
    }

    fn read_store(&self) -> RwLockReadGuard<'_, DataStore> {
        self.store.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_store(&self) -> RwLockWriteGuard<'_, DataStore> {
        self.store.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn version(&self) -> u64 {
        self.read_store().version()
    }

    pub fn sync_datasets(&self, datasets: HashMap<String, GroupedOutputDataset>) -> EngineResult<()> {
        self.write_store().sync_datasets(datasets)
    }

    pub fn sync_groupings(&self, groupings: HashMap<String, Grouping>) -> EngineResult<()> {
        self.write_store().sync_groupings(groupings)
    }

    /// Runs the full pipeline without memoization.
    pub fn run(&self, request: &ChartRequest) -> ChartResult<Vec<ChartNode>> {
        log_enter!("CHART", "run", "dataset={} stats={}", request.dataset, request.stats.len());

        let store = self.read_store();
        let dataset = match store.dataset(&request.dataset) {
            Some(dataset) => Arc::clone(dataset),
            None => {
                log_debug!("CHART", "dataset '{}' not synced", request.dataset);
                return Ok(Vec::new());
            }
        };

        let mut dict = GroupDict::new();
        let groupings = match resolve_groupings(&store, &dataset, request, &mut dict) {
            Some(groupings) => groupings,
            None => return Ok(Vec::new()),
        };

        let indices: Arc<[usize]> = self
            .filter
            .included_rows(&store, &dataset, &request.filters)
            .into();
        let base_group_bys: Arc<[u32]> = Arc::from(groupings.group_bys.as_slice());

        let mut derived_series: Option<Arc<HashMap<String, Arc<[f64]>>>> = None;
        let mut pending = Vec::with_capacity(request.stats.len());

        for (slot, spec) in request.stats.iter().enumerate() {
            let values = match &spec.calculation {
                Some(expression) => WorkValues::Derived {
                    expression: Arc::from(expression.as_str()),
                    series: Arc::clone(
                        derived_series.get_or_insert_with(|| Arc::new(dataset.value_lists.clone())),
                    ),
                },
                None => match dataset.values(&spec.stat_id) {
                    Some(values) => WorkValues::Series(Arc::clone(values)),
                    None => {
                        log_debug!("CHART", "stat '{}' not in dataset", spec.stat_id);
                        continue;
                    }
                },
            };

            let divisor_values = if spec.aggregation_type == AggregationType::Divisor {
                let divisor_id = spec.stat_id_divisor.as_deref().ok_or_else(|| {
                    ChartError::InvalidRequest(format!(
                        "stat '{}' uses divisor aggregation without statIdDivisor",
                        spec.stat_id
                    ))
                })?;
                match dataset.values(divisor_id) {
                    Some(values) => Some(WorkValues::Series(Arc::clone(values))),
                    None => {
                        log_debug!("CHART", "divisor stat '{}' not in dataset", divisor_id);
                        continue;
                    }
                }
            } else {
                None
            };

            let group_bys = match regroup_pass(&store, &dataset, spec, &mut dict) {
                Some(regroup) => {
                    let mut packed = groupings.group_bys.clone();
                    packed.extend(regroup);
                    Arc::from(packed)
                }
                None => Arc::clone(&base_group_bys),
            };

            let item = WorkItem {
                group_bys,
                parent_lengths: groupings.parent_lengths.clone(),
                group_length: groupings.group_length,
                final_depth: groupings.final_depth(),
                indices: Arc::clone(&indices),
                values,
            };

            let divisor = match divisor_values {
                Some(values) => Some(self.pool.submit(WorkItem {
                    values,
                    ..item.clone()
                })?),
                None => None,
            };
            let values = self.pool.submit(item)?;
            pending.push(PendingStat {
                slot,
                spec,
                values,
                divisor,
            });
        }
        drop(store);

        let final_depth = groupings.final_depth();
        let keep_raw = request.chart_type.keeps_raw_values();
        let width = request.stats.len();
        let mut merged: Option<SlotTree> = None;

        for stat in pending {
            let tree = stat.values.wait()?;
            let reduced = match stat.divisor {
                Some(divisor) => {
                    let divisor_tree = divisor.wait()?;
                    let dividend = reduce(tree, 0, final_depth, AggregationType::Sum, false);
                    let divisor = reduce(divisor_tree, 0, final_depth, AggregationType::Sum, false);
                    match (dividend, divisor) {
                        (Some(dividend), Some(divisor)) => divide(dividend, &divisor),
                        _ => None,
                    }
                }
                None => reduce(tree, 0, final_depth, stat.spec.aggregation_type, keep_raw),
            };

            let reduced = match reduced {
                Some(reduced) => reduced,
                None => {
                    log_debug!("CHART", "stat '{}' has no values", stat.spec.display_name());
                    continue;
                }
            };
            let target = merged.get_or_insert_with(|| empty_slots(&reduced, width));
            merge_stat_tree(target, reduced, stat.slot, width);
        }

        let mut nodes = match merged {
            Some(mut tree) => {
                if request.default_to_zero {
                    zero_fill(&mut tree, width);
                }
                build_nodes(&tree, &dict, &groupings.orderings)
            }
            None => Vec::new(),
        };
        apply_x_axis_order(&mut nodes, request.x_axis_order);

        log_exit!("CHART", "run", "nodes={} groups={}", nodes.len(), dict.len());
        Ok(nodes)
    }

    /// Lists the included rows behind the chart node at `label_path`, the
    /// node's `ChartNode::label_path`. An empty path selects every row.
    pub fn drill_down(
        &self,
        request: &ChartRequest,
        label_path: &[String],
        max_records: usize,
    ) -> ChartResult<DrillDownResult> {
        let mut result = DrillDownResult::new(request.dataset.clone(), label_path.to_vec());
        result.max_records = max_records;

        let store = self.read_store();
        let dataset = match store.dataset(&request.dataset) {
            Some(dataset) => Arc::clone(dataset),
            None => return Ok(result),
        };

        let mut dict = GroupDict::new();
        let groupings = match resolve_groupings(&store, &dataset, request, &mut dict) {
            Some(groupings) => groupings,
            None => return Ok(result),
        };
        let indices = self.filter.included_rows(&store, &dataset, &request.filters);

        for row in indices {
            if row_matches(&groupings, &dict, row, label_path) {
                result.total_count += 1;
                if result.source_rows.len() < max_records {
                    result.source_rows.push(row);
                }
            }
        }

        result.is_truncated = result.total_count > max_records;
        Ok(result)
    }
}

/// Whether the composite labels of `row`, depth after depth, spell out
/// `label_path` exactly up to some depth.
fn row_matches(groupings: &ResolvedGroupings, dict: &GroupDict, row: usize, label_path: &[String]) -> bool {
    let mut rest = label_path;
    for depth in 0..groupings.final_depth() {
        if rest.is_empty() {
            return true;
        }
        let labels = match groupings.id_at(depth, row).and_then(|id| dict.labels(id)) {
            Some(labels) => labels,
            None => return false,
        };
        if rest.len() < labels.len() || rest[..labels.len()] != labels[..] {
            return false;
        }
        rest = &rest[labels.len()..];
    }
    rest.is_empty()
}

/// Resolves the chart groupings. With no grouping every row falls into the
/// single "All" group. `None` when a requested grouping is missing.
fn resolve_groupings(
    store: &DataStore,
    dataset: &GroupedOutputDataset,
    request: &ChartRequest,
    dict: &mut GroupDict,
) -> Option<ResolvedGroupings> {
    let group_length = dataset.entity_count();

    if request.grouping_id.len() > MAX_GROUPINGS {
        log_warn!(
            "CHART",
            "{} groupings requested, only the first {} are used",
            request.grouping_id.len(),
            MAX_GROUPINGS
        );
    }

    if request.grouping_id.is_empty() {
        return Some(ResolvedGroupings {
            group_bys: vec![ALL_GROUP_ID; group_length],
            parent_lengths: vec![0],
            orderings: vec![DepthOrdering::default()],
            group_length,
        });
    }

    let mut resolved = ResolvedGroupings {
        group_bys: Vec::with_capacity(group_length * MAX_GROUPINGS),
        parent_lengths: Vec::new(),
        orderings: Vec::new(),
        group_length,
    };

    for (grouping_id, level) in request.chart_groupings() {
        let grouping = as_grouping(store.grouping(grouping_id));
        let result = category_func(dataset, grouping_id, grouping, level, true, dict)?;
        resolved.orderings.push(
            grouping
                .map(|g| DepthOrdering::for_path(g, &result.path))
                .unwrap_or_default(),
        );
        resolved.parent_lengths.push(result.parent_length);
        resolved.group_bys.extend(result.group_by);
    }

    Some(resolved)
}

/// The stat's own value-regroup pass, if it has one that resolves.
fn regroup_pass(
    store: &DataStore,
    dataset: &GroupedOutputDataset,
    spec: &StatSpec,
    dict: &mut GroupDict,
) -> Option<Vec<u32>> {
    let grouping_id = spec.aggregation_grouping_id.as_deref()?;
    let result = category_func(
        dataset,
        grouping_id,
        as_grouping(store.grouping(grouping_id)),
        spec.aggregation_grouping_level.as_deref(),
        false,
        dict,
    );
    if result.is_none() {
        log_debug!("CHART", "regroup '{}' of stat '{}' ignored", grouping_id, spec.stat_id);
    }
    result.map(|r| r.group_by)
}

// ============================================================================
// REDUCTION
// ============================================================================

/// Reduces a bucketed tree bottom-up.
///
/// Nodes at `final_depth` become leaves. Anything below them is a value
/// regroup: each regroup bucket is reduced first and the bucket results are
/// reduced again. With `keep_raw` the final reduction is skipped.
fn reduce(
    node: GroupNode,
    depth: usize,
    final_depth: usize,
    aggregation: AggregationType,
    keep_raw: bool,
) -> Option<GroupTree<f64>> {
    match node {
        GroupTree::Branch(children) if depth < final_depth => {
            let reduced: BTreeMap<u32, GroupTree<f64>> = children
                .into_iter()
                .filter_map(|(id, child)| {
                    reduce(child, depth + 1, final_depth, aggregation, keep_raw).map(|r| (id, r))
                })
                .collect();
            if reduced.is_empty() {
                None
            } else {
                Some(GroupTree::Branch(reduced))
            }
        }
        node => {
            let values = collapse(node, aggregation);
            if values.is_empty() {
                None
            } else if keep_raw {
                Some(GroupTree::Leaf(values))
            } else {
                aggregate(&values, aggregation).map(|v| GroupTree::Leaf(vec![v]))
            }
        }
    }
}

/// Values of a final-depth node: raw values, or one reduced value per
/// regroup bucket.
fn collapse(node: GroupNode, aggregation: AggregationType) -> Vec<f64> {
    match node {
        GroupTree::Leaf(values) => values,
        GroupTree::Branch(children) => children
            .into_values()
            .filter_map(|child| aggregate(&collapse(child, aggregation), aggregation))
            .collect(),
    }
}

/// Divides two equally shaped sum trees elementwise. Leaves without a
/// matching non-zero divisor are dropped.
fn divide(dividend: GroupTree<f64>, divisor: &GroupTree<f64>) -> Option<GroupTree<f64>> {
    match (dividend, divisor) {
        (GroupTree::Leaf(numerators), GroupTree::Leaf(denominators)) => {
            let ratios: Vec<f64> = numerators
                .iter()
                .zip(denominators)
                .filter(|(_, d)| **d != 0.0)
                .map(|(n, d)| n / d)
                .collect();
            if ratios.is_empty() {
                None
            } else {
                Some(GroupTree::Leaf(ratios))
            }
        }
        (GroupTree::Branch(children), GroupTree::Branch(divisors)) => {
            let divided: BTreeMap<u32, GroupTree<f64>> = children
                .into_iter()
                .filter_map(|(id, child)| {
                    let d = divisors.get(&id)?;
                    divide(child, d).map(|r| (id, r))
                })
                .collect();
            if divided.is_empty() {
                None
            } else {
                Some(GroupTree::Branch(divided))
            }
        }
        _ => None,
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// Memoized chart computation over synchronized datasets.
///
/// The memo lives on the engine and is not shared across threads; the data
/// store and the worker pool are.
pub struct ChartEngine {
    pipeline: Arc<ChartPipeline>,
    memo: Memo<ChartRequest, String, Arc<Vec<ChartNode>>, ChartError>,
}

impl ChartEngine {
    pub fn new(config: &EngineConfig) -> EngineResult<Self> {
        Self::with_filter(config, Box::new(DefaultFilterEvaluator))
    }

    pub fn with_filter(config: &EngineConfig, filter: Box<dyn FilterEvaluator>) -> EngineResult<Self> {
        config.validate()?;
        let pipeline = Arc::new(ChartPipeline::new(stats_pool(config)?, filter));

        let key_pipeline = Arc::clone(&pipeline);
        let run_pipeline = Arc::clone(&pipeline);
        let memo = try_memoize(
            move |request: &ChartRequest| request.cache_key(key_pipeline.version()),
            move |request: &ChartRequest| run_pipeline.run(request).map(Arc::new),
            config.chart_cache_capacity,
        );

        log_info!(
            "CHART",
            "engine ready: {} worker(s), cache capacity {}",
            pipeline.pool.max_workers(),
            memo.capacity()
        );
        Ok(ChartEngine { pipeline, memo })
    }

    /// Computes (or recalls) the chart for `request`.
    pub fn chart(&self, request: &ChartRequest) -> ChartResult<Arc<Vec<ChartNode>>> {
        self.memo.try_call(request)
    }

    pub fn drill_down(
        &self,
        request: &ChartRequest,
        label_path: &[String],
        max_records: usize,
    ) -> ChartResult<DrillDownResult> {
        self.pipeline.drill_down(request, label_path, max_records)
    }

    pub fn sync_datasets(&self, datasets: HashMap<String, GroupedOutputDataset>) -> EngineResult<()> {
        self.pipeline.sync_datasets(datasets)
    }

    pub fn sync_groupings(&self, groupings: HashMap<String, Grouping>) -> EngineResult<()> {
        self.pipeline.sync_groupings(groupings)
    }

    /// Syncs the `dataset -> {valueLists, groupLists}` JSON payload.
    pub fn sync_datasets_json(&self, json: &str) -> EngineResult<()> {
        let datasets: HashMap<String, GroupedOutputDataset> = serde_json::from_str(json)?;
        self.sync_datasets(datasets)
    }

    /// Syncs the `category -> {levels, data}` JSON payload.
    pub fn sync_groupings_json(&self, json: &str) -> EngineResult<()> {
        let groupings: HashMap<String, Grouping> = serde_json::from_str(json)?;
        self.sync_groupings(groupings)
    }

    pub fn data_version(&self) -> u64 {
        self.pipeline.version()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pipeline.pool.stats()
    }

    pub fn cached_charts(&self) -> usize {
        self.memo.len()
    }

    pub fn cache_hits(&self) -> u64 {
        self.memo.hits()
    }

    pub fn clear_cache(&self) {
        self.memo.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(v: f64) -> GroupTree<f64> {
        GroupTree::Leaf(vec![v])
    }

    #[test]
    fn reduce_applies_aggregation_at_final_depth() {
        let mut tree: GroupNode = GroupTree::with_depth(1);
        for v in [10.0, 20.0, 30.0] {
            tree.insert(&[1], v);
        }
        let check = |agg, expected| {
            let reduced = reduce(tree.clone(), 0, 1, agg, false).unwrap();
            assert_eq!(reduced.children().unwrap()[&1], leaf(expected));
        };
        check(AggregationType::Sum, 60.0);
        check(AggregationType::Mean, 20.0);
        check(AggregationType::Min, 10.0);
        check(AggregationType::Max, 30.0);
    }

    #[test]
    fn reduce_collapses_regroup_buckets_first() {
        // chart group 1, regroup buckets 7 -> [1, 3], 8 -> [10]
        let mut tree: GroupNode = GroupTree::with_depth(2);
        tree.insert(&[1, 7], 1.0);
        tree.insert(&[1, 7], 3.0);
        tree.insert(&[1, 8], 10.0);
        let reduced = reduce(tree, 0, 1, AggregationType::Mean, false).unwrap();
        // mean of bucket means: (2 + 10) / 2
        assert_eq!(reduced.children().unwrap()[&1], leaf(6.0));
    }

    #[test]
    fn reduce_keeps_raw_values_for_box_plots() {
        let mut tree: GroupNode = GroupTree::with_depth(1);
        tree.insert(&[1], 4.0);
        tree.insert(&[1], 2.0);
        let reduced = reduce(tree, 0, 1, AggregationType::Sum, true).unwrap();
        assert_eq!(reduced.children().unwrap()[&1], GroupTree::Leaf(vec![4.0, 2.0]));
    }

    #[test]
    fn divide_drops_zero_divisors() {
        let mut dividend: GroupTree<f64> = GroupTree::with_depth(1);
        dividend.insert(&[1], 10.0);
        dividend.insert(&[2], 5.0);
        let mut divisor: GroupTree<f64> = GroupTree::with_depth(1);
        divisor.insert(&[1], 4.0);
        divisor.insert(&[2], 0.0);
        let divided = divide(dividend, &divisor).unwrap();
        let children = divided.children().unwrap();
        assert_eq!(children[&1], leaf(2.5));
        assert!(children.get(&2).is_none());
    }
}
