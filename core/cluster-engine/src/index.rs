//! FILENAME: core/cluster-engine/src/index.rs
//! Hierarchical greedy point clustering on per-zoom R-trees.
//!
//! Points are projected onto the Web-Mercator unit square. The level above
//! `max_zoom` holds the raw points; every lower level is built from the one
//! above it: each node not yet visited at that zoom absorbs the unvisited
//! nodes within `radius / (extent * 2^zoom)` of it, and the cluster sits at
//! the weighted centroid of what it absorbed. A node that absorbs nothing is
//! carried down unchanged. Each level keeps its own R-tree for bbox queries.

use std::f64::consts::PI;

use rstar::{PointDistance, RTree, RTreeObject, AABB};
use stats_core::config::MAX_ZOOM_LIMIT;
use stats_core::{log_debug, ClusterConfig};

/// `[west, south, east, north]` covering the whole world.
pub const WORLD_BOUNDS: [f64; 4] = [-180.0, -90.0, 180.0, 90.0];

/// Per-node payload combined when nodes cluster.
pub trait Mergeable: Clone {
    fn merge(&mut self, other: &Self);
}

impl<T: Clone> Mergeable for Vec<T> {
    fn merge(&mut self, other: &Self) {
        self.extend(other.iter().cloned());
    }
}

// ============================================================================
// PROJECTION
// ============================================================================

pub fn lng_x(lng: f64) -> f64 {
    lng / 360.0 + 0.5
}

pub fn lat_y(lat: f64) -> f64 {
    let sin = (lat * PI / 180.0).sin();
    let y = 0.5 - 0.25 * ((1.0 + sin) / (1.0 - sin)).ln() / PI;
    y.clamp(0.0, 1.0)
}

pub fn x_lng(x: f64) -> f64 {
    (x - 0.5) * 360.0
}

pub fn y_lat(y: f64) -> f64 {
    let y2 = (180.0 - y * 360.0) * PI / 180.0;
    360.0 * y2.exp().atan() / PI - 90.0
}

// ============================================================================
// NODES
// ============================================================================

/// R-tree entry pointing at a node of the index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexedPoint {
    pub x: f64,
    pub y: f64,
    pub node: usize,
}

impl RTreeObject for IndexedPoint {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.x, self.y])
    }
}

impl PointDistance for IndexedPoint {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.x - point[0];
        let dy = self.y - point[1];
        dx * dx + dy * dy
    }
}

/// A single point or a cluster, in projected coordinates.
#[derive(Debug, Clone)]
pub struct ClusterNode<T> {
    pub x: f64,
    pub y: f64,
    pub num_points: usize,
    /// Input position of a single point; `None` for clusters.
    pub source: Option<usize>,
    /// Zoom the node was created at (`max_zoom + 1` for input points).
    pub zoom: i32,
    /// Nodes of the level above that this cluster absorbed.
    pub children: Vec<usize>,
    pub data: T,
}

impl<T> ClusterNode<T> {
    pub fn is_cluster(&self) -> bool {
        self.source.is_none()
    }

    pub fn lng(&self) -> f64 {
        x_lng(self.x)
    }

    pub fn lat(&self) -> f64 {
        y_lat(self.y)
    }
}

// ============================================================================
// INDEX
// ============================================================================

pub struct ClusterIndex<T> {
    min_zoom: i32,
    max_zoom: i32,
    nodes: Vec<ClusterNode<T>>,
    /// `trees[z - min_zoom]` for `z` in `min_zoom..=max_zoom + 1`.
    trees: Vec<RTree<IndexedPoint>>,
}

impl<T: Mergeable> ClusterIndex<T> {
    /// Builds every zoom level for `points` given as `(lng, lat, data)`.
    /// Points with non-finite coordinates are skipped.
    pub fn load<I>(config: &ClusterConfig, points: I) -> Self
    where
        I: IntoIterator<Item = (f64, f64, T)>,
    {
        let min_zoom = config.min_zoom.min(MAX_ZOOM_LIMIT).floor() as i32;
        let max_zoom = config.max_zoom.min(MAX_ZOOM_LIMIT).floor() as i32;

        let mut nodes = Vec::new();
        for (i, (lng, lat, data)) in points.into_iter().enumerate() {
            if !(lng.is_finite() && lat.is_finite()) {
                log_debug!("CLUSTER", "point {} has no finite position, skipped", i);
                continue;
            }
            nodes.push(ClusterNode {
                x: lng_x(lng),
                y: lat_y(lat),
                num_points: 1,
                source: Some(i),
                zoom: max_zoom + 1,
                children: Vec::new(),
                data,
            });
        }

        let points = nodes.len();
        let mut level: Vec<usize> = (0..points).collect();
        let mut visited = vec![i32::MAX; nodes.len()];
        let mut trees = vec![level_tree(&nodes, &level)];

        for zoom in (min_zoom..=max_zoom).rev() {
            level = {
                let above = &trees[trees.len() - 1];
                cluster_level(&mut nodes, &mut visited, &level, above, zoom, config)
            };
            trees.push(level_tree(&nodes, &level));
        }
        trees.reverse();

        log_debug!(
            "CLUSTER",
            "index built: {} point(s), {} node(s), zooms {}..={}",
            points,
            nodes.len(),
            min_zoom,
            max_zoom
        );

        ClusterIndex {
            min_zoom,
            max_zoom,
            nodes,
            trees,
        }
    }
}

impl<T> ClusterIndex<T> {
    pub fn min_zoom(&self) -> i32 {
        self.min_zoom
    }

    pub fn max_zoom(&self) -> i32 {
        self.max_zoom
    }

    pub fn node(&self, id: usize) -> Option<&ClusterNode<T>> {
        self.nodes.get(id)
    }

    /// Nodes at `zoom` inside `bbox = [west, south, east, north]`, by id.
    ///
    /// `zoom` is clamped to the indexed levels. A bbox spanning the
    /// antimeridian (`west > east`) is queried as two halves.
    pub fn clusters(&self, bbox: [f64; 4], zoom: i32) -> Vec<(usize, &ClusterNode<T>)> {
        let [west, south, east, north] = bbox;
        let min_lat = south.clamp(-90.0, 90.0);
        let max_lat = north.clamp(-90.0, 90.0);

        let (min_lng, max_lng) = if east - west >= 360.0 {
            (-180.0, 180.0)
        } else {
            let min_lng = wrap_lng(west);
            let max_lng = if east == 180.0 { 180.0 } else { wrap_lng(east) };
            if min_lng > max_lng {
                let mut hits = self.clusters([min_lng, min_lat, 180.0, max_lat], zoom);
                hits.extend(self.clusters([-180.0, min_lat, max_lng, max_lat], zoom));
                hits.sort_by_key(|(id, _)| *id);
                hits.dedup_by_key(|(id, _)| *id);
                return hits;
            }
            (min_lng, max_lng)
        };

        let envelope = AABB::from_corners(
            [lng_x(min_lng), lat_y(max_lat)],
            [lng_x(max_lng), lat_y(min_lat)],
        );
        let mut hits: Vec<(usize, &ClusterNode<T>)> = self
            .tree(zoom)
            .locate_in_envelope(&envelope)
            .filter_map(|p| self.nodes.get(p.node).map(|node| (p.node, node)))
            .collect();
        hits.sort_by_key(|(id, _)| *id);
        hits
    }

    /// Nodes a cluster absorbed, one zoom level up.
    pub fn children(&self, cluster_id: usize) -> Option<&[usize]> {
        self.nodes
            .get(cluster_id)
            .filter(|node| node.is_cluster())
            .map(|node| node.children.as_slice())
    }

    /// Input positions of every point under `cluster_id`, ascending.
    pub fn leaves(&self, cluster_id: usize) -> Vec<usize> {
        let mut leaves = Vec::new();
        let mut stack = vec![cluster_id];
        while let Some(id) = stack.pop() {
            match self.nodes.get(id) {
                Some(node) => match node.source {
                    Some(source) => leaves.push(source),
                    None => stack.extend(node.children.iter().copied()),
                },
                None => continue,
            }
        }
        leaves.sort_unstable();
        leaves
    }

    /// First zoom at which the cluster splits into its children.
    pub fn expansion_zoom(&self, cluster_id: usize) -> Option<i32> {
        let mut node = self.nodes.get(cluster_id).filter(|n| n.is_cluster())?;
        let mut zoom = node.zoom + 1;
        while node.children.len() == 1 && zoom <= self.max_zoom {
            match self.nodes.get(node.children[0]) {
                Some(child) if child.is_cluster() => node = child,
                _ => break,
            }
            zoom += 1;
        }
        Some(zoom)
    }

    fn tree(&self, zoom: i32) -> &RTree<IndexedPoint> {
        let z = zoom.clamp(self.min_zoom, self.max_zoom + 1);
        &self.trees[(z - self.min_zoom) as usize]
    }
}

fn wrap_lng(lng: f64) -> f64 {
    ((lng + 180.0) % 360.0 + 360.0) % 360.0 - 180.0
}

fn level_tree<T>(nodes: &[ClusterNode<T>], level: &[usize]) -> RTree<IndexedPoint> {
    let entries = level
        .iter()
        .map(|&node| IndexedPoint {
            x: nodes[node].x,
            y: nodes[node].y,
            node,
        })
        .collect();
    RTree::bulk_load(entries)
}

/// Clusters the nodes of the level above into the nodes of `zoom`.
fn cluster_level<T: Mergeable>(
    nodes: &mut Vec<ClusterNode<T>>,
    visited: &mut Vec<i32>,
    above: &[usize],
    tree: &RTree<IndexedPoint>,
    zoom: i32,
    config: &ClusterConfig,
) -> Vec<usize> {
    let r = config.radius / (config.extent * 2f64.powi(zoom));
    let mut level = Vec::with_capacity(above.len());

    for &id in above {
        if visited[id] <= zoom {
            continue;
        }
        visited[id] = zoom;

        let (x, y, origin) = (nodes[id].x, nodes[id].y, nodes[id].num_points);
        let neighbors: Vec<usize> = tree
            .locate_within_distance([x, y], r * r)
            .map(|p| p.node)
            .filter(|&n| visited[n] > zoom)
            .collect();
        let num_points = origin + neighbors.iter().map(|&n| nodes[n].num_points).sum::<usize>();

        if num_points > origin && num_points >= config.min_points {
            let mut wx = x * origin as f64;
            let mut wy = y * origin as f64;
            let mut data = nodes[id].data.clone();
            let mut children = Vec::with_capacity(neighbors.len() + 1);
            children.push(id);

            for n in neighbors {
                visited[n] = zoom;
                let other = &nodes[n];
                wx += other.x * other.num_points as f64;
                wy += other.y * other.num_points as f64;
                data.merge(&other.data);
                children.push(n);
            }

            nodes.push(ClusterNode {
                x: wx / num_points as f64,
                y: wy / num_points as f64,
                num_points,
                source: None,
                zoom,
                children,
                data,
            });
            visited.push(i32::MAX);
            level.push(nodes.len() - 1);
        } else {
            level.push(id);
            if num_points > origin {
                for n in neighbors {
                    visited[n] = zoom;
                    level.push(n);
                }
            }
        }
    }

    level
}
