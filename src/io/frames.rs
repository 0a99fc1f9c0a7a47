//! Coordinate frames and the transform buffer.
//!
//! Frames form a small tree:
//!
//! ```text
//! map ──► odom ──► base_link ──► laser
//!  │        │          │
//!  │        │          └ static mount
//!  │        └ ICP odometry (slam thread)
//!  └ graph correction (broadcast thread)
//! ```
//!
//! [`TransformBuffer`] stores the latest transform per parent/child pair and
//! answers lookups between any two connected frames.

use std::collections::{HashMap, HashSet, VecDeque};

use nalgebra::Isometry3;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::core::types::Pose6DOF;
use crate::error::{Error, Result};

/// Names of the frames used by the node. Labels only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameNames {
    /// Globally consistent frame of the optimized graph.
    pub map: String,
    /// Drifting odometry frame.
    pub odom: String,
    /// Robot body frame.
    pub robot: String,
    /// Lidar frame.
    pub sensor: String,
}

impl Default for FrameNames {
    fn default() -> Self {
        Self {
            map: "map".into(),
            odom: "odom".into(),
            robot: "base_link".into(),
            sensor: "laser".into(),
        }
    }
}

/// Pose of `child` expressed in `parent` at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct StampedTransform {
    pub parent: String,
    pub child: String,
    pub transform: Isometry3<f64>,
    pub timestamp_us: u64,
}

impl StampedTransform {
    pub fn new(parent: &str, child: &str, transform: Isometry3<f64>, timestamp_us: u64) -> Self {
        Self {
            parent: parent.to_string(),
            child: child.to_string(),
            transform,
            timestamp_us,
        }
    }

    /// Transform from a pose expressed in `parent`.
    pub fn from_pose(parent: &str, child: &str, pose: &Pose6DOF) -> Self {
        Self::new(parent, child, pose.to_isometry(), pose.timestamp_us)
    }
}

/// Sink for published transforms.
pub trait TransformBroadcaster: Send + Sync {
    fn send_transform(&self, transform: StampedTransform);
}

/// Source of transforms between named frames.
pub trait TransformLookup: Send + Sync {
    /// Pose of `source` expressed in `target`.
    ///
    /// Fails with [`Error::FrameUnavailable`] when the frames are not
    /// connected.
    fn lookup(&self, target: &str, source: &str) -> Result<Isometry3<f64>>;
}

/// Latest-value transform store.
#[derive(Debug, Default)]
pub struct TransformBuffer {
    transforms: RwLock<HashMap<(String, String), StampedTransform>>,
}

impl TransformBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store or replace the transform for its parent/child pair.
    pub fn set(&self, transform: StampedTransform) {
        let key = (transform.parent.clone(), transform.child.clone());
        self.transforms.write().insert(key, transform);
    }

    /// Stored transform for an exact parent/child pair.
    pub fn get(&self, parent: &str, child: &str) -> Option<StampedTransform> {
        self.transforms
            .read()
            .get(&(parent.to_string(), child.to_string()))
            .cloned()
    }

    /// Number of stored parent/child pairs.
    pub fn len(&self) -> usize {
        self.transforms.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.read().is_empty()
    }
}

impl TransformBroadcaster for TransformBuffer {
    fn send_transform(&self, transform: StampedTransform) {
        self.set(transform);
    }
}

impl TransformLookup for TransformBuffer {
    fn lookup(&self, target: &str, source: &str) -> Result<Isometry3<f64>> {
        if target == source {
            return Ok(Isometry3::identity());
        }

        // Breadth-first walk; each edge can be traversed in either direction.
        let transforms = self.transforms.read();
        let mut visited: HashSet<&str> = HashSet::from([target]);
        let mut queue: VecDeque<(&str, Isometry3<f64>)> = VecDeque::from([(target, Isometry3::identity())]);

        while let Some((frame, target_from_frame)) = queue.pop_front() {
            for t in transforms.values() {
                let (next, step) = if t.parent == frame {
                    (t.child.as_str(), t.transform)
                } else if t.child == frame {
                    (t.parent.as_str(), t.transform.inverse())
                } else {
                    continue;
                };
                if !visited.insert(next) {
                    continue;
                }
                let target_from_next = target_from_frame * step;
                if next == source {
                    return Ok(target_from_next);
                }
                queue.push_back((next, target_from_next));
            }
        }

        Err(Error::FrameUnavailable {
            target_frame: target.to_string(),
            source_frame: source.to_string(),
        })
    }
}
