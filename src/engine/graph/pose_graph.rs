//! Pose graph data structure.
//!
//! Vertices carry pose estimates; keyframe vertices additionally own the
//! filtered scan taken at that pose. Edges are relative-pose constraints
//! weighted by an information matrix. Identifiers are assigned in insertion
//! order starting at 0, and vertex 0 is fixed as the gauge anchor.

use std::collections::HashMap;

use nalgebra::{Isometry3, Matrix6, Vector3};
use serde::{Deserialize, Serialize};

use crate::core::math::information_from_covariance;
use crate::core::types::{PointCloud, Pose6DOF};
use crate::error::{Error, Result};

/// Default diagonal loading applied before inverting edge covariances.
pub const DEFAULT_INFORMATION_EPSILON: f64 = 1e-6;

/// Read/write access to a graph element's pose estimate.
pub trait Estimate {
    fn estimate(&self) -> &Pose6DOF;
    fn set_estimate(&mut self, pose: Pose6DOF);
}

/// Type of edge in the pose graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeType {
    /// Consecutive ICP odometry constraint.
    Odometry,
    /// Loop closure between non-adjacent keyframes.
    LoopClosure,
    /// Relative motion reported by the external pose source.
    Reference,
}

/// A vertex in the pose graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vertex {
    /// Unique vertex identifier.
    pub id: u64,

    /// Current pose estimate.
    pub pose: Pose6DOF,

    /// Whether the optimizer must leave this pose alone.
    pub fixed: bool,

    /// Whether this vertex owns a scan.
    pub keyframe: bool,

    /// Timestamp in microseconds.
    pub timestamp_us: u64,

    /// Odometry-frame robot pose when the vertex was created.
    #[serde(default)]
    pub odometry_pose: Option<Pose6DOF>,
}

impl Estimate for Vertex {
    #[inline]
    fn estimate(&self) -> &Pose6DOF {
        &self.pose
    }

    #[inline]
    fn set_estimate(&mut self, pose: Pose6DOF) {
        self.pose = pose;
    }
}

/// An edge in the pose graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    /// Unique edge identifier.
    pub id: u64,

    /// First vertex.
    pub from: u64,

    /// Second vertex.
    pub to: u64,

    /// Relative pose measurement: T_from⁻¹ · T_to
    pub measurement: Isometry3<f64>,

    /// Information matrix (inverse covariance), symmetric positive definite.
    pub information: Matrix6<f64>,

    /// Type of constraint.
    pub edge_type: EdgeType,

    /// Timestamp in microseconds.
    pub timestamp_us: u64,
}

/// Vertex and edge geometry ready for visualization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    /// Positions of keyframe vertices.
    pub keyframes: Vec<Vector3<f64>>,
    /// Positions of vertices without a scan.
    pub vertices: Vec<Vector3<f64>>,
    /// Endpoint positions of odometry edges.
    pub odometry_edges: Vec<[Vector3<f64>; 2]>,
    /// Endpoint positions of loop-closure edges.
    pub loop_closure_edges: Vec<[Vector3<f64>; 2]>,
    /// Endpoint positions of reference edges.
    pub reference_edges: Vec<[Vector3<f64>; 2]>,
}

/// Pose graph for SLAM optimization.
#[derive(Debug)]
pub struct PoseGraph {
    /// Vertices, indexed by id.
    vertices: Vec<Vertex>,

    /// Edges, indexed by id.
    edges: Vec<Edge>,

    /// Keyframe scans keyed by vertex id.
    scans: HashMap<u64, PointCloud>,

    /// Diagonal loading for covariance inversion.
    information_epsilon: f64,

    /// Pose of the newest vertex after the last successful optimization.
    latest_optimized: Option<Pose6DOF>,
}

impl Default for PoseGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl PoseGraph {
    /// Create a new empty pose graph.
    pub fn new() -> Self {
        Self::with_information_epsilon(DEFAULT_INFORMATION_EPSILON)
    }

    /// Create a graph with a custom covariance regularization.
    pub fn with_information_epsilon(information_epsilon: f64) -> Self {
        Self {
            vertices: Vec::new(),
            edges: Vec::new(),
            scans: HashMap::new(),
            information_epsilon,
            latest_optimized: None,
        }
    }

    /// Add a vertex, taking ownership of its keyframe scan if given.
    ///
    /// Vertex 0 is fixed.
    pub fn add_vertex(&mut self, pose: Pose6DOF, keyframe_scan: Option<PointCloud>) -> u64 {
        let id = self.vertices.len() as u64;
        let keyframe = keyframe_scan.is_some();
        if let Some(scan) = keyframe_scan {
            self.scans.insert(id, scan);
        }
        self.vertices.push(Vertex {
            id,
            pose,
            fixed: id == 0,
            keyframe,
            timestamp_us: pose.timestamp_us,
            odometry_pose: None,
        });
        id
    }

    /// Record the odometry pose the robot had when a vertex was created.
    ///
    /// Pairs the vertex's map-frame estimate with the odometry frame so the
    /// `map → odom` correction can be read off any later estimate.
    pub fn set_odometry_pose(&mut self, id: u64, odometry_pose: Pose6DOF) -> Result<()> {
        let vertex = self
            .vertices
            .get_mut(id as usize)
            .ok_or(Error::MissingVertex(id))?;
        vertex.odometry_pose = Some(odometry_pose);
        Ok(())
    }

    /// Add an odometry edge between two existing vertices.
    ///
    /// The measurement is the current relative pose between the two
    /// estimates; the information is the inverse of `measured.covariance`.
    pub fn add_edge(&mut self, measured: &Pose6DOF, from: u64, to: u64) -> Result<u64> {
        let (a, b) = (self.require(from)?, self.require(to)?);
        let measurement = a.pose.to_isometry().inverse() * b.pose.to_isometry();
        Ok(self.push_edge(measurement, measured, from, to, EdgeType::Odometry))
    }

    /// Add a loop-closure edge with an explicit measurement `T_from⁻¹ · T_to`.
    pub fn add_loop_closure_edge(&mut self, measurement: &Pose6DOF, from: u64, to: u64) -> Result<u64> {
        self.add_measured_edge(measurement, from, to, EdgeType::LoopClosure)
    }

    /// Add an edge with an explicit measurement and type.
    pub fn add_measured_edge(
        &mut self,
        measurement: &Pose6DOF,
        from: u64,
        to: u64,
        edge_type: EdgeType,
    ) -> Result<u64> {
        self.require(from)?;
        self.require(to)?;
        Ok(self.push_edge(measurement.to_isometry(), measurement, from, to, edge_type))
    }

    fn push_edge(
        &mut self,
        measurement: Isometry3<f64>,
        source: &Pose6DOF,
        from: u64,
        to: u64,
        edge_type: EdgeType,
    ) -> u64 {
        let id = self.edges.len() as u64;
        self.edges.push(Edge {
            id,
            from,
            to,
            measurement,
            information: information_from_covariance(&source.covariance, self.information_epsilon),
            edge_type,
            timestamp_us: source.timestamp_us,
        });
        id
    }

    fn require(&self, id: u64) -> Result<&Vertex> {
        self.vertex(id).ok_or(Error::MissingVertex(id))
    }

    /// Overwrite pose estimates (position and orientation) of the listed
    /// vertices and cache the newest vertex's pose as the latest optimized
    /// pose. Nothing is written if any id is unknown; fixed vertices are
    /// skipped.
    pub fn commit_estimates(&mut self, estimates: &[(u64, Isometry3<f64>)]) -> Result<()> {
        if let Some((id, _)) = estimates.iter().find(|(id, _)| self.vertex(*id).is_none()) {
            return Err(Error::MissingVertex(*id));
        }

        for (id, iso) in estimates {
            let vertex = &mut self.vertices[*id as usize];
            if vertex.fixed {
                continue;
            }
            let mut pose = *vertex.estimate();
            pose.position = iso.translation.vector;
            pose.orientation = iso.rotation;
            vertex.set_estimate(pose);
        }

        self.latest_optimized = self.vertices.last().map(|v| v.pose);
        Ok(())
    }

    /// Vertex by id.
    #[inline]
    pub fn vertex(&self, id: u64) -> Option<&Vertex> {
        self.vertices.get(usize::try_from(id).ok()?)
    }

    /// Pose estimate of a vertex.
    #[inline]
    pub fn get_pose(&self, id: u64) -> Option<&Pose6DOF> {
        self.vertex(id).map(|v| v.estimate())
    }

    /// Most recently added vertex.
    #[inline]
    pub fn latest_vertex(&self) -> Option<&Vertex> {
        self.vertices.last()
    }

    /// Pose estimate of the most recently added vertex.
    #[inline]
    pub fn latest_pose(&self) -> Option<&Pose6DOF> {
        self.vertices.last().map(|v| v.estimate())
    }

    /// Pose of the gauge vertex.
    #[inline]
    pub fn start_pose(&self) -> Option<&Pose6DOF> {
        self.get_pose(0)
    }

    /// Newest vertex pose cached by the last successful optimization.
    #[inline]
    pub fn latest_optimized_pose(&self) -> Option<&Pose6DOF> {
        self.latest_optimized.as_ref()
    }

    /// Scan owned by a keyframe vertex.
    #[inline]
    pub fn keyframe_scan(&self, id: u64) -> Option<&PointCloud> {
        self.scans.get(&id)
    }

    /// Keyframe vertices with their scans, in id order.
    pub fn keyframes(&self) -> impl Iterator<Item = (&Vertex, &PointCloud)> {
        self.vertices
            .iter()
            .filter_map(|v| self.scans.get(&v.id).map(|scan| (v, scan)))
    }

    #[inline]
    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    #[inline]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    #[inline]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    #[inline]
    pub fn keyframe_count(&self) -> usize {
        self.scans.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Number of loop closure edges.
    pub fn loop_closure_count(&self) -> usize {
        self.edges
            .iter()
            .filter(|e| e.edge_type == EdgeType::LoopClosure)
            .count()
    }

    /// Geometry of the current estimates for display.
    pub fn snapshot(&self) -> GraphSnapshot {
        let mut snapshot = GraphSnapshot::default();

        for v in &self.vertices {
            if v.keyframe {
                snapshot.keyframes.push(v.pose.position);
            } else {
                snapshot.vertices.push(v.pose.position);
            }
        }

        for e in &self.edges {
            let (Some(a), Some(b)) = (self.get_pose(e.from), self.get_pose(e.to)) else {
                continue;
            };
            let segment = [a.position, b.position];
            match e.edge_type {
                EdgeType::Odometry => snapshot.odometry_edges.push(segment),
                EdgeType::LoopClosure => snapshot.loop_closure_edges.push(segment),
                EdgeType::Reference => snapshot.reference_edges.push(segment),
            }
        }

        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Point3, Vector6};

    fn cov(sigma: f64) -> Matrix6<f64> {
        Matrix6::from_diagonal(&Vector6::repeat(sigma * sigma))
    }

    #[test]
    fn test_ids_are_sequential_and_zero_is_fixed() {
        let mut graph = PoseGraph::new();
        let a = graph.add_vertex(Pose6DOF::identity(), None);
        let b = graph.add_vertex(Pose6DOF::from_translation(1.0, 0.0, 0.0), None);

        assert_eq!((a, b), (0, 1));
        assert!(graph.vertex(0).unwrap().fixed);
        assert!(!graph.vertex(1).unwrap().fixed);
        assert_eq!(graph.start_pose().unwrap().position, Vector3::zeros());
    }

    #[test]
    fn test_add_edge_uses_current_estimates() {
        let mut graph = PoseGraph::new();
        graph.add_vertex(Pose6DOF::from_translation(1.0, 0.0, 0.0), None);
        graph.add_vertex(Pose6DOF::from_translation(1.0, 2.0, 0.0), None);

        // The measured pose only contributes its covariance
        let measured = Pose6DOF::from_translation(5.0, 5.0, 5.0).with_covariance(cov(0.1));
        let id = graph.add_edge(&measured, 0, 1).unwrap();
        let edge = &graph.edges()[id as usize];

        assert_relative_eq!(edge.measurement.translation.vector, Vector3::new(0.0, 2.0, 0.0), epsilon = 1e-12);
        assert_relative_eq!(edge.information[(0, 0)], 100.0, epsilon = 1e-2);
        assert_eq!(edge.edge_type, EdgeType::Odometry);
    }

    #[test]
    fn test_edge_to_missing_vertex_rejected() {
        let mut graph = PoseGraph::new();
        graph.add_vertex(Pose6DOF::identity(), None);

        let result = graph.add_edge(&Pose6DOF::identity(), 0, 7);

        assert!(matches!(result, Err(Error::MissingVertex(7))));
        assert_eq!(graph.edge_count(), 0);
        assert!(graph.add_loop_closure_edge(&Pose6DOF::identity(), 3, 0).is_err());
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_information_is_symmetric_positive_definite() {
        let mut graph = PoseGraph::new();
        graph.add_vertex(Pose6DOF::identity(), None);
        graph.add_vertex(Pose6DOF::from_translation(1.0, 0.0, 0.0), None);

        let mut c = cov(0.05);
        c[(0, 1)] = 1e-4;
        graph.add_edge(&Pose6DOF::identity().with_covariance(c), 0, 1).unwrap();
        graph.add_edge(&Pose6DOF::identity(), 0, 1).unwrap();

        for edge in graph.edges() {
            assert_relative_eq!(edge.information, edge.information.transpose(), epsilon = 1e-6);
            assert!(edge.information.cholesky().is_some());
        }
    }

    #[test]
    fn test_keyframe_scans_are_owned_by_graph() {
        let mut graph = PoseGraph::new();
        let scan = PointCloud::from_points(vec![Point3::new(1.0, 0.0, 0.0)]);
        graph.add_vertex(Pose6DOF::identity(), None);
        let kf = graph.add_vertex(Pose6DOF::from_translation(1.0, 0.0, 0.0), Some(scan.clone()));

        assert_eq!(graph.keyframe_count(), 1);
        assert_eq!(graph.keyframe_scan(kf), Some(&scan));
        assert!(graph.keyframe_scan(0).is_none());
        assert_eq!(graph.keyframes().count(), 1);
    }

    #[test]
    fn test_commit_estimates_skips_fixed_and_caches_latest() {
        let mut graph = PoseGraph::new();
        graph.add_vertex(Pose6DOF::identity(), None);
        graph.add_vertex(Pose6DOF::from_translation(1.0, 0.0, 0.0), None);

        graph
            .commit_estimates(&[
                (0, Isometry3::translation(9.0, 9.0, 9.0)),
                (1, Isometry3::translation(1.1, 0.1, 0.0)),
            ])
            .unwrap();

        assert_eq!(graph.get_pose(0).unwrap().position, Vector3::zeros());
        assert_relative_eq!(graph.latest_optimized_pose().unwrap().position.x, 1.1);
    }

    #[test]
    fn test_commit_estimates_with_unknown_id_writes_nothing() {
        let mut graph = PoseGraph::new();
        graph.add_vertex(Pose6DOF::identity(), None);
        graph.add_vertex(Pose6DOF::from_translation(1.0, 0.0, 0.0), None);

        let result = graph.commit_estimates(&[
            (1, Isometry3::translation(3.0, 0.0, 0.0)),
            (5, Isometry3::identity()),
        ]);

        assert!(result.is_err());
        assert_relative_eq!(graph.get_pose(1).unwrap().position.x, 1.0);
        assert!(graph.latest_optimized_pose().is_none());
    }

    #[test]
    fn test_snapshot_splits_by_kind() {
        let mut graph = PoseGraph::new();
        graph.add_vertex(Pose6DOF::identity(), None);
        graph.add_vertex(Pose6DOF::from_translation(1.0, 0.0, 0.0), Some(PointCloud::new()));
        graph.add_vertex(Pose6DOF::from_translation(2.0, 0.0, 0.0), Some(PointCloud::new()));
        graph.add_edge(&Pose6DOF::identity(), 0, 1).unwrap();
        graph.add_edge(&Pose6DOF::identity(), 1, 2).unwrap();
        graph
            .add_loop_closure_edge(&Pose6DOF::from_translation(-2.0, 0.0, 0.0), 2, 0)
            .unwrap();

        let snapshot = graph.snapshot();
        assert_eq!(snapshot.keyframes.len(), 2);
        assert_eq!(snapshot.vertices.len(), 1);
        assert_eq!(snapshot.odometry_edges.len(), 2);
        assert_eq!(snapshot.loop_closure_edges.len(), 1);
        assert_eq!(graph.loop_closure_count(), 1);
    }
}
