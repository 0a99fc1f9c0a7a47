//! Pose graph back end tests.
//!
//! Drifting odometry around a square, corrected by a loop closure:
//! - Gauge vertex stays put
//! - Loop error shrinks after optimization
//! - Refined map follows the optimized poses
//! - Failure modes leave the graph unchanged
//!
//! Run with: `cargo test --test graph_optimization`

mod common;

use std::f64::consts::FRAC_PI_2;

use approx::assert_relative_eq;
use common::{measured, observe, pose_2d, room};
use icpslam::engine::graph::{LoopDetector, LoopDetectorConfig};
use icpslam::{
    EdgeType, Error, GraphOptimizer, GraphOptimizerConfig, PointCloud, PoseGraph, Pose6DOF,
    TerminationReason, rebuild_map,
};
use nalgebra::{Matrix6, Point3};

/// Square walk with a step 5% too long and a small heading bias per step.
///
/// Vertex 4 should coincide with vertex 0; its estimate does not.
fn drifted_square() -> PoseGraph {
    let mut graph = PoseGraph::new();
    let marker = PointCloud::from_points(vec![Point3::new(0.5, 0.0, 0.0), Point3::new(0.0, 0.5, 0.0)]);
    graph.add_vertex(Pose6DOF::identity(), Some(marker.clone()));

    let step = measured(1.05, 0.0, FRAC_PI_2 + 0.03);
    let mut estimate = Pose6DOF::identity();
    for i in 1..=4u64 {
        estimate = estimate.compose(&step).with_timestamp(i * 100_000);
        graph.add_vertex(estimate, Some(marker.clone()));
        graph.add_edge(&step, i - 1, i).unwrap();
    }
    graph
}

fn close_square(graph: &mut PoseGraph) {
    let closure = Pose6DOF::identity().with_covariance(Matrix6::identity() * 1e-6);
    graph.add_loop_closure_edge(&closure, 0, 4).unwrap();
}

#[test]
fn test_loop_closure_removes_drift() {
    let mut graph = drifted_square();
    close_square(&mut graph);
    let drift_before = graph.get_pose(4).unwrap().position.norm();

    let optimizer = GraphOptimizer::new(GraphOptimizerConfig::default());
    let result = optimizer.optimize(&mut graph).unwrap();

    let drift_after = graph.get_pose(4).unwrap().position.norm();
    assert!(result.iterations >= 1);
    assert!(result.final_error < result.initial_error);
    assert!(drift_after < 0.05 * drift_before, "{} -> {}", drift_before, drift_after);

    // Gauge
    let start = graph.start_pose().unwrap();
    assert_relative_eq!(start.position.norm(), 0.0);
    assert_relative_eq!(start.orientation.angle(), 0.0);

    // Cached pose tracks the newest vertex
    let cached = graph.latest_optimized_pose().unwrap();
    assert_relative_eq!(cached.position, graph.get_pose(4).unwrap().position);
}

#[test]
fn test_map_follows_optimized_poses() {
    let mut graph = drifted_square();
    close_square(&mut graph);
    GraphOptimizer::new(GraphOptimizerConfig::default())
        .optimize(&mut graph)
        .unwrap();

    let map = rebuild_map(&graph);

    assert_eq!(map.keyframes.len(), 5);
    assert_eq!(map.len(), 10);
    for keyframe in &map.keyframes {
        let pose = graph.get_pose(keyframe.vertex_id).unwrap();
        let expected = pose.transform_point(&Point3::new(0.5, 0.0, 0.0));
        assert_relative_eq!(keyframe.cloud.points[0], expected, epsilon = 1e-12);
    }
}

#[test]
fn test_optimization_without_closure_keeps_chain() {
    let mut graph = drifted_square();
    let before: Vec<_> = graph.vertices().iter().map(|v| v.pose.position).collect();

    let result = GraphOptimizer::new(GraphOptimizerConfig::default())
        .optimize(&mut graph)
        .unwrap();

    // Odometry edges alone are already satisfied
    assert!(result.initial_error < 1e-12);
    for (vertex, position) in graph.vertices().iter().zip(before) {
        assert_relative_eq!(vertex.pose.position, position, epsilon = 1e-9);
    }
}

#[test]
fn test_single_vertex_cannot_be_optimized() {
    let mut graph = PoseGraph::new();
    graph.add_vertex(Pose6DOF::from_translation(0.2, 0.1, 0.0), None);

    let result = GraphOptimizer::new(GraphOptimizerConfig::default()).optimize(&mut graph);

    assert!(matches!(result, Err(Error::OptimizationFailure(_))));
    assert_relative_eq!(graph.get_pose(0).unwrap().position.x, 0.2);
}

#[test]
fn test_missing_vertex_edge_rejected() {
    let mut graph = drifted_square();
    let edges = graph.edge_count();

    let result = graph.add_edge(&measured(1.0, 0.0, 0.0), 2, 9);

    assert!(matches!(result, Err(Error::MissingVertex(9))));
    assert_eq!(graph.edge_count(), edges);
}

#[test]
fn test_iteration_cap_reported() {
    let mut graph = drifted_square();
    close_square(&mut graph);

    let result = GraphOptimizer::new(GraphOptimizerConfig {
        max_iterations: 1,
        convergence_threshold: 0.0,
        ..Default::default()
    })
    .optimize(&mut graph)
    .unwrap();

    assert_eq!(result.iterations, 1);
    assert!(!result.converged);
    assert_eq!(result.termination_reason, TerminationReason::MaxIterations);
}

#[test]
fn test_detected_loop_closure_corrects_graph() {
    let world = room(0.2);
    let truths = [
        pose_2d(0.0, 0.0, 0.0),
        pose_2d(0.4, 0.0, 0.0),
        pose_2d(0.8, 0.1, 0.1),
        pose_2d(0.4, 0.2, 0.2),
        pose_2d(0.05, 0.05, 0.03),
    ];

    // Estimates drift by 2cm per step in y
    let mut graph = PoseGraph::new();
    for (i, truth) in truths.iter().enumerate() {
        let mut estimate = Pose6DOF::from_isometry(truth, i as u64 * 100_000)
            .with_covariance(Matrix6::identity() * 1e-4);
        estimate.position.y += 0.02 * i as f64;
        graph.add_vertex(estimate, Some(observe(&world, truth)));
        if i > 0 {
            graph.add_edge(&estimate, i as u64 - 1, i as u64).unwrap();
        }
    }

    let detector = LoopDetector::new(LoopDetectorConfig {
        min_vertex_separation: 3,
        ..Default::default()
    })
    .unwrap();
    let closure = detector.detect(&graph).expect("loop should be found");
    assert_eq!((closure.from, closure.to), (0, 4));

    graph
        .add_loop_closure_edge(&closure.measurement, closure.from, closure.to)
        .unwrap();
    assert_eq!(graph.loop_closure_count(), 1);
    assert_eq!(graph.edges().last().unwrap().edge_type, EdgeType::LoopClosure);

    GraphOptimizer::new(GraphOptimizerConfig::default())
        .optimize(&mut graph)
        .unwrap();

    let corrected = graph.get_pose(4).unwrap();
    let truth = truths[4];
    assert!((corrected.position - truth.translation.vector).norm() < 0.03);
}
