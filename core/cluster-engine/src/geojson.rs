//! FILENAME: core/cluster-engine/src/geojson.rs
//! GeoJSON projection of a cluster state for the map renderer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::engine::{ClusterFeature, NodeClusterState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    pub kind: String,
    pub features: Vec<Feature>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: Map<String, Value>,
    pub geometry: Geometry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    #[serde(rename = "type")]
    pub kind: String,
    /// `[lng, lat]`
    pub coordinates: [f64; 2],
}

/// Renders every cluster of `state` as a point feature.
///
/// Properties carry `type`, `icon`, `grouped_ids`, `point_count` and
/// `cluster`, plus the aggregated color and size under their property names.
pub fn feature_collection(state: &NodeClusterState) -> FeatureCollection {
    FeatureCollection {
        kind: "FeatureCollection".to_string(),
        features: state.clusters.iter().map(feature).collect(),
    }
}

fn feature(cluster: &ClusterFeature) -> Feature {
    let mut properties = Map::new();
    properties.insert("type".into(), Value::from(cluster.type_name.clone()));
    properties.insert(
        "icon".into(),
        cluster.icon.clone().map(Value::from).unwrap_or(Value::Null),
    );
    properties.insert("grouped_ids".into(), Value::from(cluster.grouped_ids.clone()));
    properties.insert("point_count".into(), Value::from(cluster.point_count as u64));
    properties.insert("cluster".into(), Value::from(cluster.cluster_id.is_some()));
    if let Some(id) = cluster.cluster_id {
        properties.insert("cluster_id".into(), Value::from(id as u64));
    }
    if let Some(zoom) = cluster.expansion_zoom {
        properties.insert("expansion_zoom".into(), Value::from(zoom));
    }
    // Size wins when both axes bind the same property.
    for axis in [&cluster.color, &cluster.size].into_iter().flatten() {
        properties.insert(axis.property.clone(), axis.value.clone());
    }

    Feature {
        kind: "Feature".to_string(),
        properties,
        geometry: Geometry {
            kind: "Point".to_string(),
            coordinates: [cluster.lng, cluster.lat],
        },
    }
}
