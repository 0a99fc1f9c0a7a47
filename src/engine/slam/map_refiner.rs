//! Global map reconstruction from keyframe scans.

use serde::Serialize;

use crate::core::types::PointCloud;
use crate::engine::graph::PoseGraph;

/// One keyframe scan expressed in the map frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyframeCloud {
    /// Owning vertex.
    pub vertex_id: u64,
    /// Scan transformed by the vertex's current pose.
    pub cloud: PointCloud,
}

/// Map rebuilt from the current graph estimates.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RefinedMap {
    /// Union of all keyframe clouds, in vertex id order.
    pub cloud: PointCloud,
    /// Per-keyframe contributions.
    pub keyframes: Vec<KeyframeCloud>,
    /// Timestamp of the newest keyframe.
    pub timestamp_us: u64,
}

impl RefinedMap {
    /// Total number of map points.
    #[inline]
    pub fn len(&self) -> usize {
        self.cloud.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cloud.is_empty()
    }
}

/// Transform every keyframe scan by its vertex's current pose and union them.
///
/// Full rebuild; the graph is only read.
pub fn rebuild_map(graph: &PoseGraph) -> RefinedMap {
    let mut map = RefinedMap::default();

    for (vertex, scan) in graph.keyframes() {
        let cloud = scan.transformed(&vertex.pose.to_isometry());
        map.cloud.extend_from(&cloud);
        map.timestamp_us = map.timestamp_us.max(vertex.timestamp_us);
        map.keyframes.push(KeyframeCloud {
            vertex_id: vertex.id,
            cloud,
        });
    }

    log::debug!(
        "Rebuilt map: {} points from {} keyframes",
        map.len(),
        map.keyframes.len()
    );
    map
}
