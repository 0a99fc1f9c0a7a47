//! Output messages produced by the SLAM pipeline.
//!
//! These mirror what a robotics middleware would publish: odometry, paths,
//! debug clouds, the graph for visualization and the refined map.

use std::sync::Arc;

use serde::Serialize;

use crate::core::types::{PointCloud, Pose6DOF, Trajectory};
use crate::engine::graph::GraphSnapshot;
use crate::engine::slam::RefinedMap;

/// Pose of `child_frame_id` in `frame_id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OdometryMessage {
    pub frame_id: String,
    pub child_frame_id: String,
    pub pose: Pose6DOF,
}

/// A cloud expressed in a named frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CloudMessage {
    pub frame_id: String,
    pub timestamp_us: u64,
    pub cloud: PointCloud,
}

/// Everything the pipeline publishes.
#[derive(Debug, Clone)]
pub enum SlamOutput {
    /// New ICP odometry pose.
    Odometry(OdometryMessage),
    /// Motion-gated reference trajectory.
    ReferencePath(Trajectory),
    /// ICP odometry trajectory (debug).
    IcpPath(Trajectory),
    /// Previous filtered cloud in the sensor frame (debug).
    PreviousCloud(CloudMessage),
    /// Previous filtered cloud after applying the registration (debug).
    AlignedCloud(CloudMessage),
    /// Graph geometry after a change.
    Graph(GraphSnapshot),
    /// Map rebuilt after a successful optimization.
    Map(Arc<RefinedMap>),
}

impl SlamOutput {
    /// Short topic-like name.
    pub fn kind(&self) -> &'static str {
        match self {
            SlamOutput::Odometry(_) => "odometry",
            SlamOutput::ReferencePath(_) => "reference_path",
            SlamOutput::IcpPath(_) => "icp_path",
            SlamOutput::PreviousCloud(_) => "previous_cloud",
            SlamOutput::AlignedCloud(_) => "aligned_cloud",
            SlamOutput::Graph(_) => "graph",
            SlamOutput::Map(_) => "map",
        }
    }

    /// True for outputs only produced at verbosity ≥ 1.
    pub fn is_debug(&self) -> bool {
        matches!(
            self,
            SlamOutput::IcpPath(_) | SlamOutput::PreviousCloud(_) | SlamOutput::AlignedCloud(_)
        )
    }
}
