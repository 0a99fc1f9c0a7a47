//! Pose graph back end.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        POSE GRAPH                            │
//! │                                                              │
//! │    Vertices: 6-DoF poses; keyframes own their scan           │
//! │    Edges:    relative constraints with information matrix    │
//! │              - odometry (consecutive ICP)                    │
//! │              - reference (external pose source)              │
//! │              - loop closure (verified registration)          │
//! │                                                              │
//! │    [V0*] ──odom──▶ [V1] ──odom──▶ [V2] ──odom──▶ [V3]         │
//! │      │                                          ▲            │
//! │      └──────────────── loop closure ────────────┘            │
//! │    * fixed                                                   │
//! └──────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       OPTIMIZATION                           │
//! │                                                              │
//! │    Minimize: Σ eᵀ Ω e over all edges                         │
//! │    Method:   Levenberg-Marquardt on SE(3), vertex 0 fixed    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`PoseGraph`]: vertices, edges and keyframe scans
//! - [`LoopDetector`]: proximity candidates verified by registration
//! - [`GraphOptimizer`]: bounded nonlinear least squares over the graph

mod loop_detector;
mod optimizer;
mod pose_graph;

pub use loop_detector::{LoopClosure, LoopClosureCandidate, LoopDetector, LoopDetectorConfig};
pub use optimizer::{
    GraphOptimizer, GraphOptimizerConfig, GraphSolution, OptimizationResult, TerminationReason,
};
pub use pose_graph::{
    DEFAULT_INFORMATION_EPSILON, Edge, EdgeType, Estimate, GraphSnapshot, PoseGraph, Vertex,
};
