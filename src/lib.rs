//! icpslam - Lidar pose-graph SLAM with ICP odometry
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 main.rs / threads/                  │  ← Runtime
//! │        (slam thread, broadcast thread, state)       │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                      io/                            │  ← Infrastructure
//! │         (frames, messages, simulation)              │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                    engine/                          │  ← Orchestration
//! │        (odometry, pose graph, slam pipeline)        │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                  algorithms/                        │  ← Core algorithms
//! │              (GICP / ICP matching)                  │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                   sensors/                          │  ← Sensor processing
//! │              (voxel downsampling)                   │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                     core/                           │  ← Foundation
//! │          (poses, clouds, SE(3) math)                │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Pipeline
//!
//! - External reference poses initialize odometry and seed vertex 0 (fixed)
//! - Each cloud is downsampled and registered against the previous one
//! - Increments accumulate into graph vertices once the robot has moved
//! - Nearby old vertices are verified by registration as loop closures
//! - Levenberg-Marquardt optimization runs periodically and after closures
//! - The map is rebuilt from keyframe scans at their optimized poses

// ============================================================================
// Layer 1: Core foundation (no internal deps)
// ============================================================================
pub mod core;
pub mod error;

// ============================================================================
// Layer 2: Sensor processing
// ============================================================================
pub mod sensors;

// ============================================================================
// Layer 3: Algorithms
// ============================================================================
pub mod algorithms;

// ============================================================================
// Layer 4: SLAM engine
// ============================================================================
pub mod engine;

// ============================================================================
// Layer 5: I/O, configuration and runtime
// ============================================================================
pub mod config;
pub mod io;
pub mod state;
pub mod threads;

// ============================================================================
// Convenience re-exports
// ============================================================================

pub use error::{Error, Result};

// Core types
pub use crate::core::math;
pub use crate::core::types::{PointCloud, Pose6DOF, Timestamped, Trajectory};

// Sensors
pub use sensors::preprocessing::{VoxelGrid, VoxelGridConfig};

// Algorithms - Matching
pub use algorithms::matching::{
    DynMatcher, GeneralizedIcp, IcpConfig, MatcherConfig, MatcherType, PointToPointIcp,
    ScanMatchResult, ScanMatcher,
};

// Engine
pub use engine::graph::{
    Edge, EdgeType, GraphOptimizer, GraphOptimizerConfig, GraphSnapshot, LoopClosure,
    LoopDetector, LoopDetectorConfig, OptimizationResult, PoseGraph, TerminationReason, Vertex,
};
pub use engine::odometry::{IcpOdometer, OdometerConfig};
pub use engine::slam::{GraphConfig, IcpSlam, RefinedMap, SharedGraph, SlamEngine, SlamStatus, rebuild_map};

// Runtime
pub use config::SlamConfig;
pub use io::{FrameNames, SlamOutput, TransformBuffer};
pub use state::{SharedState, SharedStateHandle, create_shared_state};
