//! Loop closure detection for pose graph SLAM.
//!
//! Detects when the robot revisits a previously mapped area.
//!
//! # Detection Strategy
//!
//! 1. **Proximity trigger**: the newest keyframe is compared against older
//!    keyframes whose current estimate lies within `max_search_distance`.
//!    The `min_vertex_separation` most recent vertices are never candidates.
//! 2. **Geometric verification**: the candidate scan is registered against
//!    the query scan, seeded with the relative pose of the two estimates.
//!    The closure is accepted only when registration converges below
//!    `max_fitness`.
//!
//! The accepted registration becomes the loop-closure measurement.

use nalgebra::Isometry3;
use serde::{Deserialize, Serialize};

use super::pose_graph::PoseGraph;
use crate::algorithms::matching::{DynMatcher, IcpConfig, MatcherConfig, ScanMatcher};
use crate::core::types::Pose6DOF;
use crate::error::{Error, Result};

/// A proposed loop closure before verification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopClosureCandidate {
    /// ID of the query keyframe (newest).
    pub query_id: u64,

    /// ID of the matching keyframe (historical).
    pub match_id: u64,

    /// Distance between the two current estimates (meters).
    pub distance: f64,
}

/// A verified loop closure, ready for [`PoseGraph::add_loop_closure_edge`].
#[derive(Debug, Clone)]
pub struct LoopClosure {
    /// Historical keyframe (edge origin).
    pub from: u64,

    /// Query keyframe (edge target).
    pub to: u64,

    /// Measured `T_from⁻¹ · T_to` with registration covariance.
    pub measurement: Pose6DOF,

    /// Mean squared correspondence distance of the registration.
    pub fitness: f64,
}

/// Configuration for loop detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopDetectorConfig {
    /// Disable to never propose closures.
    pub enabled: bool,

    /// Minimum id distance between query and candidate.
    ///
    /// Prevents detecting loops with recent poses.
    pub min_vertex_separation: usize,

    /// Maximum Euclidean distance (meters) to search for loop candidates.
    pub max_search_distance: f64,

    /// Maximum registration fitness (m²) to accept a closure.
    pub max_fitness: f64,

    /// Matcher used for verification.
    pub matcher: MatcherConfig,
}

impl Default for LoopDetectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_vertex_separation: 20,
            max_search_distance: 2.0,
            max_fitness: 0.05,
            matcher: MatcherConfig {
                icp: IcpConfig {
                    max_iterations: 50,
                    max_correspondence_distance: 1.0,
                    ..Default::default()
                },
                ..Default::default()
            },
        }
    }
}

impl LoopDetectorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_vertex_separation < 2 {
            return Err(Error::InvalidParameter(
                "min_vertex_separation must be at least 2 (non-adjacent)".into(),
            ));
        }
        if !(self.max_search_distance > 0.0 && self.max_fitness > 0.0) {
            return Err(Error::InvalidParameter(
                "loop closure distances must be positive".into(),
            ));
        }
        self.matcher.validate()
    }
}

/// Loop closure detector with geometric verification.
pub struct LoopDetector<M: ScanMatcher = DynMatcher> {
    config: LoopDetectorConfig,

    /// Scan matcher for geometric verification.
    matcher: M,
}

impl LoopDetector<DynMatcher> {
    /// Create a detector using the configured matcher.
    pub fn new(config: LoopDetectorConfig) -> Result<Self> {
        let matcher = DynMatcher::new(&config.matcher);
        Self::with_matcher(config, matcher)
    }
}

impl<M: ScanMatcher> LoopDetector<M> {
    /// Create a detector around an existing matcher.
    pub fn with_matcher(config: LoopDetectorConfig, matcher: M) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, matcher })
    }

    pub fn config(&self) -> &LoopDetectorConfig {
        &self.config
    }

    /// Propose the nearest eligible keyframe for the newest vertex.
    pub fn detect_candidate(&self, graph: &PoseGraph) -> Option<LoopClosureCandidate> {
        if !self.config.enabled {
            return None;
        }

        let query = graph.latest_vertex()?;
        graph.keyframe_scan(query.id)?;

        let separation = self.config.min_vertex_separation as u64;
        if query.id < separation {
            return None;
        }

        graph
            .keyframes()
            .filter(|(v, _)| v.id + separation <= query.id)
            .map(|(v, _)| LoopClosureCandidate {
                query_id: query.id,
                match_id: v.id,
                distance: v.pose.distance_to(&query.pose),
            })
            .filter(|c| c.distance <= self.config.max_search_distance)
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
    }

    /// Register the candidate's scan against the query scan.
    ///
    /// The candidate scan is aligned onto the query scan, so the alignment is
    /// `T_query⁻¹ · T_match` and the edge measurement is its inverse.
    pub fn verify(&self, graph: &PoseGraph, candidate: &LoopClosureCandidate) -> Result<LoopClosure> {
        let (Some(query), Some(matched)) = (graph.vertex(candidate.query_id), graph.vertex(candidate.match_id))
        else {
            let missing = if graph.vertex(candidate.query_id).is_none() {
                candidate.query_id
            } else {
                candidate.match_id
            };
            return Err(Error::MissingVertex(missing));
        };
        let query_scan = graph
            .keyframe_scan(query.id)
            .ok_or(Error::MissingVertex(query.id))?;
        let match_scan = graph
            .keyframe_scan(matched.id)
            .ok_or(Error::MissingVertex(matched.id))?;

        let guess: Isometry3<f64> = query.pose.to_isometry().inverse() * matched.pose.to_isometry();
        let result = self
            .matcher
            .match_clouds(match_scan, query_scan, &guess)
            .into_result()?;

        if result.fitness > self.config.max_fitness {
            return Err(Error::RegistrationFailure {
                iterations: result.iterations,
                fitness: result.fitness,
            });
        }

        let measurement = Pose6DOF::from_isometry(&result.transform, query.timestamp_us)
            .with_covariance(result.covariance)
            .inverse();

        Ok(LoopClosure {
            from: matched.id,
            to: query.id,
            measurement,
            fitness: result.fitness,
        })
    }

    /// Propose and verify in one step; rejected candidates are logged.
    pub fn detect(&self, graph: &PoseGraph) -> Option<LoopClosure> {
        let candidate = self.detect_candidate(graph)?;
        match self.verify(graph, &candidate) {
            Ok(closure) => {
                log::info!(
                    "Loop closure {} -> {} (distance {:.2}m, fitness {:.4})",
                    closure.from,
                    closure.to,
                    candidate.distance,
                    closure.fitness
                );
                Some(closure)
            }
            Err(e) => {
                log::debug!(
                    "Loop candidate {} -> {} rejected: {}",
                    candidate.match_id,
                    candidate.query_id,
                    e
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::matching::test_utils::{create_room, perturbation};
    use crate::core::types::PointCloud;
    use approx::assert_relative_eq;

    /// Keyframes walking out along x and back; scans observed from the true pose.
    fn out_and_back(count: u64, final_true: Isometry3<f64>, final_estimate: Isometry3<f64>) -> PoseGraph {
        let room = create_room(0.2);
        let scan_at = |pose: &Isometry3<f64>| -> PointCloud { room.transformed(&pose.inverse()) };

        let mut graph = PoseGraph::new();
        graph.add_vertex(Pose6DOF::identity(), Some(scan_at(&Isometry3::identity())));
        for i in 1..count {
            let half = count as f64 / 2.0;
            let x = 0.3 * (half - (i as f64 - half).abs());
            let pose = perturbation(x, 0.0, 0.0, 0.0);
            graph.add_vertex(Pose6DOF::from_isometry(&pose, i * 1000), Some(scan_at(&pose)));
        }
        graph.add_vertex(
            Pose6DOF::from_isometry(&final_estimate, count * 1000),
            Some(scan_at(&final_true)),
        );
        graph
    }

    #[test]
    fn test_candidate_is_nearest_old_keyframe() {
        let graph = out_and_back(24, Isometry3::identity(), Isometry3::identity());
        let detector = LoopDetector::new(LoopDetectorConfig::default()).unwrap();

        let candidate = detector.detect_candidate(&graph).unwrap();

        assert_eq!(candidate.query_id, 24);
        assert_eq!(candidate.match_id, 0);
        assert!(candidate.query_id - candidate.match_id >= 20);
    }

    #[test]
    fn test_recent_vertices_are_not_candidates() {
        let graph = out_and_back(10, Isometry3::identity(), Isometry3::identity());
        let detector = LoopDetector::new(LoopDetectorConfig::default()).unwrap();

        assert!(detector.detect_candidate(&graph).is_none());
    }

    #[test]
    fn test_disabled_never_proposes() {
        let graph = out_and_back(24, Isometry3::identity(), Isometry3::identity());
        let detector = LoopDetector::new(LoopDetectorConfig {
            enabled: false,
            ..Default::default()
        })
        .unwrap();

        assert!(detector.detect(&graph).is_none());
    }

    #[test]
    fn test_far_away_query_has_no_candidate() {
        let far = perturbation(10.0, 0.0, 0.0, 0.0);
        let graph = out_and_back(24, far, far);
        let detector = LoopDetector::new(LoopDetectorConfig::default()).unwrap();

        assert!(detector.detect_candidate(&graph).is_none());
    }

    #[test]
    fn test_verification_recovers_true_relative_pose() {
        let truth = perturbation(0.1, 0.0, 0.0, 0.0);
        let drifted = perturbation(0.05, 0.05, 0.0, 0.03);
        let graph = out_and_back(24, truth, drifted);
        let detector = LoopDetector::new(LoopDetectorConfig::default()).unwrap();

        let closure = detector.detect(&graph).unwrap();

        assert_eq!((closure.from, closure.to), (0, 24));
        assert_relative_eq!(closure.measurement.position.x, 0.1, epsilon = 0.01);
        assert_relative_eq!(closure.measurement.position.y, 0.0, epsilon = 0.01);
        assert!(closure.fitness <= 0.05);
    }

    #[test]
    fn test_invalid_separation_rejected() {
        let config = LoopDetectorConfig {
            min_vertex_separation: 1,
            ..Default::default()
        };
        assert!(LoopDetector::new(config).is_err());
    }
}
