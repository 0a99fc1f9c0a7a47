//! Append-only pose history.

use serde::{Deserialize, Serialize};

use super::Pose6DOF;

/// Ordered sequence of poses expressed in a single frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    /// Frame the poses are expressed in
    pub frame_id: String,
    poses: Vec<Pose6DOF>,
}

impl Trajectory {
    pub fn new(frame_id: impl Into<String>) -> Self {
        Self {
            frame_id: frame_id.into(),
            poses: Vec::new(),
        }
    }

    /// Append a pose.
    #[inline]
    pub fn push(&mut self, pose: Pose6DOF) {
        self.poses.push(pose);
    }

    /// Most recent pose.
    #[inline]
    pub fn last(&self) -> Option<&Pose6DOF> {
        self.poses.last()
    }

    /// First pose.
    #[inline]
    pub fn first(&self) -> Option<&Pose6DOF> {
        self.poses.first()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.poses.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    #[inline]
    pub fn poses(&self) -> &[Pose6DOF] {
        &self.poses
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Pose6DOF> {
        self.poses.iter()
    }

    /// Total travelled distance along the path in meters.
    pub fn path_length(&self) -> f64 {
        self.poses
            .windows(2)
            .map(|w| w[0].distance_to(&w[1]))
            .sum()
    }
}
