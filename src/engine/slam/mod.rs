//! Online SLAM module.
//!
//! Combines ICP odometry, the pose graph and map refinement into one engine
//! fed by two asynchronous streams.
//!
//! # Components
//!
//! - [`IcpSlam`]: the pipeline
//! - [`rebuild_map`]: keyframe map reconstruction
//! - [`SlamEngine`]: interface the SLAM thread drives
//!
//! # Example
//!
//! ```ignore
//! use icpslam::config::SlamConfig;
//! use icpslam::engine::slam::IcpSlam;
//!
//! let mut slam = IcpSlam::new(&SlamConfig::default())?;
//! slam.handle_reference_pose(first_pose);
//! for output in slam.handle_cloud(&cloud) {
//!     println!("{}", output.kind());
//! }
//! ```

mod icp_slam;
mod map_refiner;

pub use icp_slam::{GraphConfig, IcpSlam, SharedGraph, SlamStatus};
pub use map_refiner::{KeyframeCloud, RefinedMap, rebuild_map};

use crate::algorithms::matching::ScanMatcher;
use crate::core::types::{PointCloud, Pose6DOF, Timestamped};
use crate::io::messages::SlamOutput;

/// Trait for SLAM engines.
pub trait SlamEngine: Send {
    /// Process an external reference pose.
    fn process_reference_pose(&mut self, pose: Pose6DOF) -> Vec<SlamOutput>;

    /// Process a raw point cloud.
    fn process_cloud(&mut self, cloud: &Timestamped<PointCloud>) -> Vec<SlamOutput>;

    /// Latest odometry pose, if initialized.
    fn current_pose(&self) -> Option<Pose6DOF>;

    /// Get SLAM status.
    fn status(&self) -> SlamStatus;
}

impl<M: ScanMatcher + Send> SlamEngine for IcpSlam<M> {
    fn process_reference_pose(&mut self, pose: Pose6DOF) -> Vec<SlamOutput> {
        self.handle_reference_pose(pose)
    }

    fn process_cloud(&mut self, cloud: &Timestamped<PointCloud>) -> Vec<SlamOutput> {
        self.handle_cloud(cloud)
    }

    fn current_pose(&self) -> Option<Pose6DOF> {
        IcpSlam::current_pose(self)
    }

    fn status(&self) -> SlamStatus {
        IcpSlam::status(self)
    }
}
