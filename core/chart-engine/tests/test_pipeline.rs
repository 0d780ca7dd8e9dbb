//! FILENAME: tests/test_pipeline.rs
//! Integration tests for the memoized chart pipeline.

mod common;

use std::sync::Arc;

use chart_engine::{
    ChartError, ChartPipeline, ChartRequest, ChartType, DefaultFilterEvaluator, Filter, XAxisOrder,
};
use common::{names, node, values, CensusFixture, SimpleFixture, TestHarness};
use stats_core::worker::compute;
use stats_core::{AggregationType, StatSpec, WorkItem, WorkValues, WorkerError, WorkerPool};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn simple_harness() -> TestHarness {
    let harness = TestHarness::new();
    harness.sync_dataset(SimpleFixture::DATASET, SimpleFixture::dataset());
    harness.sync_grouping(SimpleFixture::CATEGORY, SimpleFixture::grouping());
    harness
}

fn simple_request() -> ChartRequest {
    ChartRequest::new(SimpleFixture::DATASET)
        .with_stat(StatSpec::new("statA", AggregationType::Sum))
        .with_grouping(SimpleFixture::CATEGORY, "cat")
}

fn census_by_state(stat: StatSpec) -> ChartRequest {
    ChartRequest::new(CensusFixture::DATASET)
        .with_stat(stat)
        .with_grouping(CensusFixture::REGION, "state")
}

fn population(aggregation: AggregationType) -> StatSpec {
    StatSpec::new("population", aggregation)
}

// ============================================================================
// BASIC AGGREGATION
// ============================================================================

#[test]
fn test_sums_by_group() {
    let harness = simple_harness();
    let nodes = harness.engine.chart(&simple_request()).unwrap();

    assert_eq!(names(&nodes), vec!["g1", "g2"]);
    assert_eq!(values(&nodes, &["g1"]), vec![3.0]);
    assert_eq!(values(&nodes, &["g2"]), vec![7.0]);
    assert_eq!(nodes[0].label_path, vec!["g1"]);
}

#[test]
fn test_output_json_shape() {
    let harness = simple_harness();
    let nodes = harness.engine.chart(&simple_request()).unwrap();
    let json = serde_json::to_string(&*nodes).unwrap();
    assert_eq!(json, r#"[{"name":"g1","value":[3.0]},{"name":"g2","value":[7.0]}]"#);
}

#[test]
fn test_aggregation_types_by_state() {
    let harness = TestHarness::with_census();
    let chart = |aggregation| harness.engine.chart(&census_by_state(population(aggregation))).unwrap();

    let sum = chart(AggregationType::Sum);
    assert_eq!(names(&sum), vec!["NY", "CA"]);
    assert_eq!(values(&sum, &["NY"]), vec![90.0]);
    assert_eq!(values(&sum, &["CA"]), vec![120.0]);

    let mean = chart(AggregationType::Mean);
    assert_eq!(values(&mean, &["NY"]), vec![30.0]);
    assert_eq!(values(&mean, &["CA"]), vec![40.0]);

    let min = chart(AggregationType::Min);
    assert_eq!(values(&min, &["NY"]), vec![10.0]);

    let max = chart(AggregationType::Max);
    assert_eq!(values(&max, &["CA"]), vec![50.0]);
}

#[test]
fn test_no_grouping_puts_everything_in_all() {
    let harness = TestHarness::with_census();
    let request = ChartRequest::new(CensusFixture::DATASET).with_stat(population(AggregationType::Sum));
    let nodes = harness.engine.chart(&request).unwrap();
    assert_eq!(names(&nodes), vec!["All"]);
    assert_eq!(values(&nodes, &["All"]), vec![210.0]);
}

#[test]
fn test_null_values_are_skipped() {
    let harness = TestHarness::new();
    harness
        .engine
        .sync_datasets_json(
            r#"{"simple": {
                "valueLists": {"statA": [1, null, 3, 4]},
                "groupLists": {"cat": ["g1", "g1", "g2", "g2"]}
            }}"#,
        )
        .unwrap();
    harness.sync_grouping(SimpleFixture::CATEGORY, SimpleFixture::grouping());

    let nodes = harness.engine.chart(&simple_request()).unwrap();
    assert_eq!(values(&nodes, &["g1"]), vec![1.0]);
    assert_eq!(values(&nodes, &["g2"]), vec![7.0]);
}

#[test]
fn test_unknown_group_names_are_blank() {
    let harness = TestHarness::new();
    harness.sync_dataset(
        SimpleFixture::DATASET,
        stats_core::GroupedOutputDataset::new()
            .with_values("statA", vec![1.0, 2.0, 5.0])
            .with_groups(SimpleFixture::CATEGORY, vec!["g1", "g2", "g9"]),
    );
    harness.sync_grouping(SimpleFixture::CATEGORY, SimpleFixture::grouping());

    let nodes = harness.engine.chart(&simple_request()).unwrap();
    assert_eq!(names(&nodes), vec!["g1", "g2", "(blank)"]);
    assert_eq!(values(&nodes, &["(blank)"]), vec![5.0]);
}

// ============================================================================
// GROUPINGS & ORDERING
// ============================================================================

#[test]
fn test_child_level_keeps_source_order() {
    let harness = TestHarness::with_census();
    let request = ChartRequest::new(CensusFixture::DATASET)
        .with_stat(population(AggregationType::Sum))
        .with_grouping(CensusFixture::REGION, "city");
    let nodes = harness.engine.chart(&request).unwrap();

    assert_eq!(names(&nodes), vec!["New York", "Buffalo", "Los Angeles", "San Francisco"]);
    assert_eq!(values(&nodes, &["New York"]), vec![70.0]);
    assert_eq!(values(&nodes, &["Los Angeles"]), vec![80.0]);
}

#[test]
fn test_two_groupings_nest_with_level_ordering() {
    let harness = TestHarness::with_census();
    let request = census_by_state(population(AggregationType::Sum))
        .with_grouping(CensusFixture::AGE, "band");
    let nodes = harness.engine.chart(&request).unwrap();

    assert_eq!(names(&nodes), vec!["NY", "CA"]);
    let ny = node(&nodes, &["NY"]).children.as_deref().unwrap();
    assert_eq!(names(ny), vec!["young", "mid", "old"]);
    assert_eq!(values(&nodes, &["NY", "mid"]), vec![60.0]);
    assert_eq!(values(&nodes, &["CA", "old"]), vec![50.0]);
}

#[test]
fn test_x_axis_orders() {
    let harness = TestHarness::with_census();
    let by_city = |order| {
        let request = ChartRequest::new(CensusFixture::DATASET)
            .with_stat(population(AggregationType::Sum))
            .with_grouping(CensusFixture::REGION, "city")
            .with_x_axis_order(order);
        harness.engine.chart(&request).unwrap()
    };

    assert_eq!(
        names(&by_city(XAxisOrder::ValueDescending)),
        vec!["Los Angeles", "New York", "San Francisco", "Buffalo"]
    );
    assert_eq!(
        names(&by_city(XAxisOrder::ValueAscending)),
        vec!["Buffalo", "San Francisco", "New York", "Los Angeles"]
    );
    assert_eq!(
        names(&by_city(XAxisOrder::AlphaAscending)),
        vec!["Buffalo", "Los Angeles", "New York", "San Francisco"]
    );
}

#[test]
fn test_missing_dataset_or_grouping_is_empty() {
    let harness = TestHarness::with_census();

    let request = ChartRequest::new("nope").with_stat(population(AggregationType::Sum));
    assert!(harness.engine.chart(&request).unwrap().is_empty());

    let request = ChartRequest::new(CensusFixture::DATASET)
        .with_stat(population(AggregationType::Sum))
        .with_grouping("unsynced", "level");
    assert!(harness.engine.chart(&request).unwrap().is_empty());
}

// ============================================================================
// STATS
// ============================================================================

#[test]
fn test_multiple_stats_merge_values() {
    let harness = TestHarness::with_census();
    let request = census_by_state(population(AggregationType::Sum))
        .with_stat(StatSpec::new("income", AggregationType::Sum));
    let nodes = harness.engine.chart(&request).unwrap();

    assert_eq!(values(&nodes, &["NY"]), vec![90.0, 1000.0]);
    assert_eq!(values(&nodes, &["CA"]), vec![120.0, 1000.0]);
}

#[test]
fn test_stat_values_keep_their_positions() {
    let harness = TestHarness::new();
    harness
        .engine
        .sync_datasets_json(
            r#"{"simple": {
                "valueLists": {"a": [null, 5], "b": [7, 9]},
                "groupLists": {"cat": ["g1", "g2"]}
            }}"#,
        )
        .unwrap();
    harness.sync_grouping(SimpleFixture::CATEGORY, SimpleFixture::grouping());
    let request = ChartRequest::new(SimpleFixture::DATASET)
        .with_stat(StatSpec::new("a", AggregationType::Sum))
        .with_stat(StatSpec::new("b", AggregationType::Sum))
        .with_grouping(SimpleFixture::CATEGORY, "cat");

    let sparse = harness.engine.chart(&request).unwrap();
    assert_eq!(names(&sparse), vec!["g1", "g2"]);
    let g1 = values(&sparse, &["g1"]);
    assert_eq!(g1.len(), 2);
    assert!(g1[0].is_nan());
    assert_eq!(g1[1], 7.0);
    assert_eq!(values(&sparse, &["g2"]), vec![5.0, 9.0]);

    let filled = harness.engine.chart(&request.with_default_to_zero(true)).unwrap();
    assert_eq!(names(&filled), vec!["g1", "g2"]);
    assert_eq!(values(&filled, &["g1"]), vec![0.0, 7.0]);
    assert_eq!(values(&filled, &["g2"]), vec![5.0, 9.0]);
}

#[test]
fn test_divisor_divides_sums() {
    let harness = TestHarness::with_census();
    let nodes = harness
        .engine
        .chart(&census_by_state(StatSpec::divisor("income", "population")))
        .unwrap();

    assert_eq!(values(&nodes, &["NY"]), vec![1000.0 / 90.0]);
    assert_eq!(values(&nodes, &["CA"]), vec![1000.0 / 120.0]);
}

#[test]
fn test_divisor_without_divisor_stat_is_rejected() {
    let harness = TestHarness::with_census();
    let result = harness
        .engine
        .chart(&census_by_state(StatSpec::new("income", AggregationType::Divisor)));
    assert!(matches!(result, Err(ChartError::InvalidRequest(_))));
}

#[test]
fn test_derived_calculation_per_group() {
    let harness = TestHarness::with_census();
    let stat = StatSpec {
        calculation: Some("groupSum('income') / groupSum('population')".to_string()),
        ..StatSpec::new("income_per_person", AggregationType::Sum)
    };
    let nodes = harness.engine.chart(&census_by_state(stat)).unwrap();

    assert_eq!(values(&nodes, &["NY"]), vec![1000.0 / 90.0]);
    assert_eq!(values(&nodes, &["CA"]), vec![1000.0 / 120.0]);
}

#[test]
fn test_value_regroup_aggregates_bucket_results() {
    let harness = TestHarness::with_census();
    let stat = StatSpec {
        aggregation_grouping_id: Some(CensusFixture::REGION.to_string()),
        aggregation_grouping_level: Some("city".to_string()),
        ..population(AggregationType::Mean)
    };
    let request = ChartRequest::new(CensusFixture::DATASET).with_stat(stat);
    let nodes = harness.engine.chart(&request).unwrap();

    // city means 35, 20, 40, 40
    assert_eq!(names(&nodes), vec!["All"]);
    assert_eq!(values(&nodes, &["All"]), vec![33.75]);
}

#[test]
fn test_box_plot_keeps_raw_values() {
    let harness = TestHarness::with_census();
    let request = census_by_state(population(AggregationType::Sum)).with_chart_type(ChartType::BoxPlot);
    let nodes = harness.engine.chart(&request).unwrap();

    assert_eq!(values(&nodes, &["NY"]), vec![10.0, 20.0, 60.0]);
    assert_eq!(values(&nodes, &["CA"]), vec![30.0, 40.0, 50.0]);
}

// ============================================================================
// FILTERS & ZERO FILL
// ============================================================================

#[test]
fn test_filters_restrict_rows() {
    let harness = TestHarness::with_census();

    let request = census_by_state(population(AggregationType::Sum))
        .with_filter("big", Filter::range("population", Some(30.0), None));
    let nodes = harness.engine.chart(&request).unwrap();
    assert_eq!(values(&nodes, &["NY"]), vec![60.0]);
    assert_eq!(values(&nodes, &["CA"]), vec![120.0]);

    let request = census_by_state(population(AggregationType::Sum))
        .with_filter("west", Filter::include(CensusFixture::REGION, vec!["CA"]).at_level("state"));
    let nodes = harness.engine.chart(&request).unwrap();
    assert_eq!(names(&nodes), vec!["CA"]);
}

#[test]
fn test_default_to_zero_fills_missing_leaves() {
    let harness = TestHarness::with_census();
    let request = census_by_state(population(AggregationType::Sum))
        .with_grouping(CensusFixture::AGE, "band")
        .with_filter("no-sf", Filter::exclude(CensusFixture::REGION, vec!["sf"]));

    let sparse = harness.engine.chart(&request).unwrap();
    let ca = node(&sparse, &["CA"]).children.as_deref().unwrap();
    assert_eq!(names(ca), vec!["young", "old"]);

    let filled = harness.engine.chart(&request.with_default_to_zero(true)).unwrap();
    let ca = node(&filled, &["CA"]).children.as_deref().unwrap();
    assert_eq!(names(ca), vec!["young", "mid", "old"]);
    assert_eq!(values(&filled, &["CA", "mid"]), vec![0.0]);
}

// ============================================================================
// MEMOIZATION
// ============================================================================

#[test]
fn test_repeated_request_is_served_from_cache() {
    let harness = simple_harness();
    let request = simple_request();

    let first = harness.engine.chart(&request).unwrap();
    let dispatched = harness.engine.pool_stats().completed;
    let second = harness.engine.chart(&request).unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(harness.engine.pool_stats().completed, dispatched);
    assert_eq!(harness.engine.cache_hits(), 1);
    assert_eq!(harness.engine.cached_charts(), 1);
}

#[test]
fn test_sync_invalidates_cached_charts() {
    let harness = simple_harness();
    let request = simple_request();
    let version = harness.engine.data_version();

    let before = harness.engine.chart(&request).unwrap();
    harness.sync_dataset(
        SimpleFixture::DATASET,
        stats_core::GroupedOutputDataset::new()
            .with_values("statA", vec![10.0, 20.0, 30.0, 40.0])
            .with_groups(SimpleFixture::CATEGORY, vec!["g1", "g1", "g2", "g2"]),
    );
    assert!(harness.engine.data_version() > version);

    let after = harness.engine.chart(&request).unwrap();
    assert_eq!(values(&before, &["g1"]), vec![3.0]);
    assert_eq!(values(&after, &["g1"]), vec![30.0]);
    assert_eq!(harness.engine.cache_hits(), 0);
}

// ============================================================================
// DRILL DOWN
// ============================================================================

#[test]
fn test_drill_down_lists_source_rows() {
    let harness = TestHarness::with_census();
    let request = census_by_state(population(AggregationType::Sum));

    let result = harness
        .engine
        .drill_down(&request, &["NY".to_string()], 2)
        .unwrap();
    assert_eq!(result.total_count, 3);
    assert_eq!(result.source_rows, vec![0, 1]);
    assert!(result.is_truncated);

    let result = harness
        .engine
        .drill_down(&request, &["CA".to_string()], 10)
        .unwrap();
    assert_eq!(result.source_rows, vec![2, 3, 4]);
    assert!(!result.is_truncated);
}

#[test]
fn test_drill_down_tells_apart_cities_sharing_a_name() {
    let harness = TestHarness::new();
    harness.sync_dataset(
        "towns",
        stats_core::GroupedOutputDataset::new()
            .with_values("pop", vec![1.0, 2.0, 4.0])
            .with_groups("geo", vec!["pme", "por", "por"]),
    );
    harness.sync_grouping(
        "geo",
        stats_core::Grouping {
            levels: vec![
                stats_core::GroupingLevel::new("state"),
                stats_core::GroupingLevel::new("city").with_parent("state", true),
            ],
            ..Default::default()
        }
        .with_member("pme", &[("state", "ME"), ("city", "Portland")])
        .with_member("por", &[("state", "OR"), ("city", "Portland")]),
    );
    let request = ChartRequest::new("towns")
        .with_stat(StatSpec::new("pop", AggregationType::Sum))
        .with_grouping("geo", "city");

    let nodes = harness.engine.chart(&request).unwrap();
    assert_eq!(names(&nodes), vec!["Portland", "Portland"]);
    assert_eq!(nodes[0].value, Some(vec![1.0]));
    assert_eq!(nodes[1].value, Some(vec![6.0]));
    assert_eq!(nodes[1].label_path, vec!["OR", "Portland"]);

    let maine = harness.engine.drill_down(&request, &nodes[0].label_path, 10).unwrap();
    assert_eq!(maine.source_rows, vec![0]);
    let oregon = harness.engine.drill_down(&request, &nodes[1].label_path, 10).unwrap();
    assert_eq!(oregon.source_rows, vec![1, 2]);

    let ambiguous = harness
        .engine
        .drill_down(&request, &["Portland".to_string()], 10)
        .unwrap();
    assert_eq!(ambiguous.total_count, 0);
}

// ============================================================================
// WORKER FAILURE
// ============================================================================

#[test]
fn test_worker_crash_fails_only_that_request() {
    // A series starting with a negative value takes its worker down.
    let pool = WorkerPool::new(1, 8, |item: WorkItem| {
        if let WorkValues::Series(values) = &item.values {
            if values.first().is_some_and(|v| *v < 0.0) {
                panic!("corrupt series");
            }
        }
        compute(&item)
    })
    .unwrap();
    let pipeline = ChartPipeline::new(pool, Box::new(DefaultFilterEvaluator));

    let mut datasets = std::collections::HashMap::new();
    datasets.insert(
        SimpleFixture::DATASET.to_string(),
        SimpleFixture::dataset().with_values("broken", vec![-1.0, 1.0, 1.0, 1.0]),
    );
    pipeline.sync_datasets(datasets).unwrap();
    let mut groupings = std::collections::HashMap::new();
    groupings.insert(SimpleFixture::CATEGORY.to_string(), SimpleFixture::grouping());
    pipeline.sync_groupings(groupings).unwrap();

    let broken = ChartRequest::new(SimpleFixture::DATASET)
        .with_stat(StatSpec::new("broken", AggregationType::Sum))
        .with_grouping(SimpleFixture::CATEGORY, "cat");
    match pipeline.run(&broken) {
        Err(ChartError::Worker(WorkerError::Crashed { message, .. })) => {
            assert!(message.contains("corrupt series"))
        }
        other => panic!("expected a worker crash, got {:?}", other),
    }

    let nodes = pipeline.run(&simple_request()).unwrap();
    assert_eq!(names(&nodes), vec!["g1", "g2"]);
    assert_eq!(values(&nodes, &["g2"]), vec![7.0]);
}
