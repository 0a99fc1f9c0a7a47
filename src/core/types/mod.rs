//! Core data types for 3D SLAM.
//!
//! - [`Pose6DOF`]: position, unit quaternion orientation and 6x6 covariance
//! - [`PointCloud`]: ordered 3D points
//! - [`Timestamped<T>`]: generic timestamp wrapper for sensor samples
//! - [`Trajectory`]: append-only pose history

mod cloud;
mod pose;
mod timestamped;
mod trajectory;

pub use cloud::PointCloud;
pub use pose::Pose6DOF;
pub use timestamped::Timestamped;
pub use trajectory::Trajectory;
