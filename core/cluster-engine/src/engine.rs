//! FILENAME: core/cluster-engine/src/engine.rs
//! Cluster state per map and zoom level.
//!
//! For every integer zoom in the configured range, each point type is
//! clustered on its own. Every cluster (or singleton) resolves the type's
//! color and size bindings over its members, and the per-type `[min, max]`
//! of the members' raw axis values is kept next to the clusters of that zoom. Any upstream
//! change recomputes a map from scratch.

use std::collections::{BTreeMap, HashMap};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use stats_core::{
    log_debug, log_enter, log_exit, log_info, Accumulator, AggregationType, ClusterConfig,
    EngineConfig, EngineResult,
};

use crate::index::{ClusterIndex, Mergeable, WORLD_BOUNDS};

// ============================================================================
// LEGEND GROUPS
// ============================================================================

/// Reduction applied to the member values of a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClusterAggregation {
    /// Number of points in the cluster.
    #[default]
    Count,
    Sum,
    Mean,
    Min,
    Max,
    /// Most frequent value; works for categorical fields too.
    Mode,
}

impl ClusterAggregation {
    /// Reduces `values` for a cluster of `members` points. Numeric reductions
    /// ignore non-numeric values and yield `None` when none are left.
    pub fn resolve(self, values: &[&Value], members: usize) -> Option<Value> {
        let numeric = |aggregation: AggregationType| {
            let mut acc = Accumulator::new();
            acc.extend(values.iter().filter_map(|v| v.as_f64()));
            acc.compute(aggregation)
                .and_then(Number::from_f64)
                .map(Value::Number)
        };

        match self {
            ClusterAggregation::Count => Some(Value::from(members as u64)),
            ClusterAggregation::Sum => numeric(AggregationType::Sum),
            ClusterAggregation::Mean => numeric(AggregationType::Mean),
            ClusterAggregation::Min => numeric(AggregationType::Min),
            ClusterAggregation::Max => numeric(AggregationType::Max),
            ClusterAggregation::Mode => mode(values),
        }
    }
}

/// Most frequent value; ties go to the value seen first.
fn mode(values: &[&Value]) -> Option<Value> {
    let mut counts: FxHashMap<String, (usize, usize)> = FxHashMap::default();
    for (i, value) in values.iter().enumerate() {
        counts.entry(value.to_string()).or_insert((0, i)).0 += 1;
    }
    counts
        .values()
        .max_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)))
        .map(|&(_, first)| values[first].clone())
}

/// Binds a feature property to a visual axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldBinding {
    pub property: String,
    #[serde(default)]
    pub aggregation: ClusterAggregation,
}

/// Display settings of one point type on one map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegendGroup {
    #[serde(rename = "type")]
    pub type_name: String,

    #[serde(default)]
    pub icon: Option<String>,

    #[serde(default)]
    pub color: Option<FieldBinding>,

    #[serde(default)]
    pub size: Option<FieldBinding>,

    /// Lowest zoom at which points of this type cluster.
    #[serde(default)]
    pub group_scale: f64,

    /// Cluster at every zoom regardless of `group_scale`.
    #[serde(default)]
    pub group_scale_with_zoom: bool,
}

impl LegendGroup {
    pub fn new(type_name: impl Into<String>) -> Self {
        LegendGroup {
            type_name: type_name.into(),
            ..Default::default()
        }
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn with_color(mut self, property: impl Into<String>, aggregation: ClusterAggregation) -> Self {
        self.color = Some(FieldBinding {
            property: property.into(),
            aggregation,
        });
        self
    }

    pub fn with_size(mut self, property: impl Into<String>, aggregation: ClusterAggregation) -> Self {
        self.size = Some(FieldBinding {
            property: property.into(),
            aggregation,
        });
        self
    }

    pub fn with_group_scale(mut self, group_scale: f64, with_zoom: bool) -> Self {
        self.group_scale = group_scale;
        self.group_scale_with_zoom = with_zoom;
        self
    }

    /// Whether points of this type cluster at `zoom`.
    pub fn clusters_at(&self, zoom: i32) -> bool {
        self.group_scale_with_zoom || self.group_scale <= zoom as f64
    }
}

// ============================================================================
// FEATURES
// ============================================================================

fn enabled_by_default() -> bool {
    true
}

/// One map point entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointFeature {
    pub lng: f64,
    pub lat: f64,

    #[serde(default = "enabled_by_default")]
    pub enabled: bool,

    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl PointFeature {
    pub fn new(lng: f64, lat: f64) -> Self {
        PointFeature {
            lng,
            lat,
            enabled: true,
            properties: Map::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Point features keyed by type, then entity id.
pub type FeatureRecords = BTreeMap<String, BTreeMap<String, PointFeature>>;

/// Bound raw values of one entity.
#[derive(Debug, Clone, Default, PartialEq)]
struct MemberValues {
    color: Option<Value>,
    size: Option<Value>,
}

/// Entities under a cluster, keyed by id so each counts once per axis.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterMembers {
    members: BTreeMap<String, MemberValues>,
}

impl ClusterMembers {
    fn of(id: &str, feature: &PointFeature, legend: &LegendGroup) -> Self {
        let bound = |binding: &Option<FieldBinding>| {
            binding
                .as_ref()
                .and_then(|b| feature.properties.get(&b.property))
                .filter(|v| !v.is_null())
                .cloned()
        };
        let mut members = BTreeMap::new();
        members.insert(
            id.to_string(),
            MemberValues {
                color: bound(&legend.color),
                size: bound(&legend.size),
            },
        );
        ClusterMembers { members }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.members.keys().cloned().collect()
    }

    fn color_values(&self) -> Vec<&Value> {
        self.members.values().filter_map(|m| m.color.as_ref()).collect()
    }

    fn size_values(&self) -> Vec<&Value> {
        self.members.values().filter_map(|m| m.size.as_ref()).collect()
    }
}

impl Mergeable for ClusterMembers {
    fn merge(&mut self, other: &Self) {
        for (id, values) in &other.members {
            self.members
                .entry(id.clone())
                .or_insert_with(|| values.clone());
        }
    }
}

// ============================================================================
// CLUSTER STATE
// ============================================================================

/// An aggregated axis value together with the property it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisValue {
    pub property: String,
    pub value: Value,
}

/// One rendered cluster or singleton.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterFeature {
    #[serde(rename = "type")]
    pub type_name: String,
    pub icon: Option<String>,
    #[serde(rename = "grouped_ids")]
    pub grouped_ids: Vec<String>,
    pub lng: f64,
    pub lat: f64,
    pub point_count: usize,
    /// Index node id; `None` for singletons.
    pub cluster_id: Option<usize>,
    pub expansion_zoom: Option<i32>,
    pub color: Option<AxisValue>,
    pub size: Option<AxisValue>,
}

/// Inclusive `[min, max]` of an axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    fn include(range: &mut Option<ValueRange>, value: f64) {
        match range {
            Some(r) => {
                r.min = r.min.min(value);
                r.max = r.max.max(value);
            }
            None => {
                *range = Some(ValueRange {
                    min: value,
                    max: value,
                })
            }
        }
    }
}

/// Axis ranges of one point type at one zoom.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeRange {
    pub size: Option<ValueRange>,
    pub color: Option<ValueRange>,
}

/// Clusters of every type at one zoom, with the per-type ranges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeClusterState {
    pub zoom: i32,
    pub clusters: Vec<ClusterFeature>,
    pub range: BTreeMap<String, TypeRange>,
}

impl NodeClusterState {
    fn new(zoom: i32) -> Self {
        NodeClusterState {
            zoom,
            ..Default::default()
        }
    }

    /// Adds a cluster; the type's ranges widen by the raw values of its
    /// members, whatever the axis aggregation.
    fn push(&mut self, feature: ClusterFeature, members: &ClusterMembers) {
        let range = self.range.entry(feature.type_name.clone()).or_default();
        for size in members.size_values().into_iter().filter_map(Value::as_f64) {
            ValueRange::include(&mut range.size, size);
        }
        // Categorical colors have no range.
        for color in members.color_values().into_iter().filter_map(Value::as_f64) {
            ValueRange::include(&mut range.color, color);
        }
        self.clusters.push(feature);
    }

    pub fn range_of(&self, type_name: &str) -> Option<&TypeRange> {
        self.range.get(type_name)
    }
}

/// Where a cluster sits and what the index knows about it.
struct Placement {
    lng: f64,
    lat: f64,
    cluster_id: Option<usize>,
    expansion_zoom: Option<i32>,
}

fn summarize(legend: &LegendGroup, type_name: &str, members: &ClusterMembers, at: Placement) -> ClusterFeature {
    let axis = |binding: &Option<FieldBinding>, values: Vec<&Value>| {
        binding.as_ref().and_then(|b| {
            b.aggregation
                .resolve(&values, members.len())
                .map(|value| AxisValue {
                    property: b.property.clone(),
                    value,
                })
        })
    };

    ClusterFeature {
        type_name: type_name.to_string(),
        icon: legend.icon.clone(),
        grouped_ids: members.ids(),
        lng: at.lng,
        lat: at.lat,
        point_count: members.len(),
        cluster_id: at.cluster_id,
        expansion_zoom: at.expansion_zoom,
        color: axis(&legend.color, members.color_values()),
        size: axis(&legend.size, members.size_values()),
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// Per-map cluster states for every configured zoom level.
pub struct ClusterEngine {
    config: ClusterConfig,
    maps: HashMap<String, Vec<NodeClusterState>>,
}

impl ClusterEngine {
    pub fn new(config: &EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        log_info!(
            "CLUSTER",
            "engine ready: zooms {:?}, radius {} at extent {}",
            config.clustering.zoom_levels(),
            config.clustering.radius,
            config.clustering.extent
        );
        Ok(ClusterEngine {
            config: config.clustering.clone(),
            maps: HashMap::new(),
        })
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Rebuilds every zoom level of `map_id` from its enabled features.
    ///
    /// Types without a legend group cluster at every zoom and bind nothing.
    pub fn recompute(&mut self, map_id: &str, legend_groups: &[LegendGroup], features: &FeatureRecords) {
        log_enter!("CLUSTER", "recompute", "map={} types={}", map_id, features.len());

        let legends: HashMap<&str, &LegendGroup> = legend_groups
            .iter()
            .map(|legend| (legend.type_name.as_str(), legend))
            .collect();
        let unbound = LegendGroup::default();
        let zooms = self.config.zoom_levels();
        let mut levels: Vec<NodeClusterState> = zooms.clone().map(NodeClusterState::new).collect();

        for (type_name, records) in features {
            let legend = legends.get(type_name.as_str()).copied().unwrap_or(&unbound);

            let points: Vec<(f64, f64, ClusterMembers)> = records
                .iter()
                .filter(|(_, feature)| feature.enabled)
                .filter(|(id, feature)| {
                    let finite = feature.lng.is_finite() && feature.lat.is_finite();
                    if !finite {
                        log_debug!("CLUSTER", "{} '{}' has no position, skipped", type_name, id);
                    }
                    finite
                })
                .map(|(id, feature)| (feature.lng, feature.lat, ClusterMembers::of(id, feature, legend)))
                .collect();
            if points.is_empty() {
                continue;
            }

            let index = if zooms.clone().any(|zoom| legend.clusters_at(zoom)) {
                Some(ClusterIndex::load(&self.config, points.iter().cloned()))
            } else {
                None
            };

            for state in levels.iter_mut() {
                let zoom = state.zoom;
                match index.as_ref().filter(|_| legend.clusters_at(zoom)) {
                    Some(index) => {
                        for (id, node) in index.clusters(WORLD_BOUNDS, zoom) {
                            let at = Placement {
                                lng: node.lng(),
                                lat: node.lat(),
                                cluster_id: node.is_cluster().then_some(id),
                                expansion_zoom: index.expansion_zoom(id),
                            };
                            state.push(summarize(legend, type_name, &node.data, at), &node.data);
                        }
                    }
                    None => {
                        for (lng, lat, members) in &points {
                            let at = Placement {
                                lng: *lng,
                                lat: *lat,
                                cluster_id: None,
                                expansion_zoom: None,
                            };
                            state.push(summarize(legend, type_name, members, at), members);
                        }
                    }
                }
            }
        }

        let clusters: usize = levels.iter().map(|s| s.clusters.len()).sum();
        self.maps.insert(map_id.to_string(), levels);
        log_exit!("CLUSTER", "recompute", "map={} clusters={}", map_id, clusters);
    }

    /// Parses the legend groups and feature records, then recomputes.
    pub fn recompute_json(&mut self, map_id: &str, legend_groups: &str, features: &str) -> EngineResult<()> {
        let legend_groups: Vec<LegendGroup> = serde_json::from_str(legend_groups)?;
        let features: FeatureRecords = serde_json::from_str(features)?;
        self.recompute(map_id, &legend_groups, &features);
        Ok(())
    }

    /// State for `floor(zoom)` clamped into the computed range.
    pub fn clusters_at(&self, map_id: &str, zoom: f64) -> Option<&NodeClusterState> {
        let levels = self.maps.get(map_id)?;
        let first = levels.first()?.zoom;
        let last = levels.last()?.zoom;
        let zoom = if zoom.is_nan() { first } else { (zoom.floor() as i32).clamp(first, last) };
        levels.get((zoom - first) as usize)
    }

    pub fn levels(&self, map_id: &str) -> Option<&[NodeClusterState]> {
        self.maps.get(map_id).map(Vec::as_slice)
    }

    pub fn remove_map(&mut self, map_id: &str) -> bool {
        self.maps.remove(map_id).is_some()
    }
}
