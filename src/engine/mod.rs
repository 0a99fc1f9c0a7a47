//! SLAM orchestration layer.
//!
//! # Contents
//!
//! - [`odometry`]: scan-to-scan ICP odometry
//! - [`graph`]: pose graph, optimization and loop closure detection
//! - [`slam`]: the online pipeline and map refinement

pub mod graph;
pub mod odometry;
pub mod slam;
