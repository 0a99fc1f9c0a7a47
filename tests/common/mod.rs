//! Shared fixtures for integration tests.

#![allow(dead_code)]

use icpslam::{PointCloud, Pose6DOF, ScanMatchResult, ScanMatcher};
use nalgebra::{Isometry3, Matrix6, Point3, Vector3};

/// Box room (floor and four walls) with a pillar, sampled on a grid.
///
/// Room spans x ∈ [-3, 3], y ∈ [-2, 2], z ∈ [0, 2]; pillar at (1, 0.5).
pub fn room(spacing: f64) -> PointCloud {
    let mut cloud = PointCloud::new();
    let mut plane = |origin: Vector3<f64>, u: Vector3<f64>, v: Vector3<f64>| {
        let nu = (u.norm() / spacing) as usize;
        let nv = (v.norm() / spacing) as usize;
        for i in 0..=nu {
            for j in 0..=nv {
                let p = origin + u * (i as f64 / nu as f64) + v * (j as f64 / nv as f64);
                cloud.push(Point3::from(p));
            }
        }
    };

    let (x, y, z) = (Vector3::x(), Vector3::y(), Vector3::z());
    plane(Vector3::new(-3.0, -2.0, 0.0), x * 6.0, y * 4.0);
    plane(Vector3::new(-3.0, -2.0, 0.0), x * 6.0, z * 2.0);
    plane(Vector3::new(-3.0, 2.0, 0.0), x * 6.0, z * 2.0);
    plane(Vector3::new(-3.0, -2.0, 0.0), y * 4.0, z * 2.0);
    plane(Vector3::new(3.0, -2.0, 0.0), y * 4.0, z * 2.0);
    plane(Vector3::new(0.8, 0.3, 0.0), x * 0.4, z * 2.0);
    plane(Vector3::new(0.8, 0.3, 0.0), y * 0.4, z * 2.0);

    cloud
}

/// Room as seen by a robot at `pose`.
pub fn observe(world: &PointCloud, pose: &Isometry3<f64>) -> PointCloud {
    world.transformed(&pose.inverse())
}

/// Planar pose with yaw.
pub fn pose_2d(x: f64, y: f64, yaw: f64) -> Isometry3<f64> {
    Isometry3::new(Vector3::new(x, y, 0.0), Vector3::new(0.0, 0.0, yaw))
}

/// Pose with a small diagonal covariance.
pub fn measured(x: f64, y: f64, yaw: f64) -> Pose6DOF {
    Pose6DOF::from_isometry(&pose_2d(x, y, yaw), 0).with_covariance(Matrix6::identity() * 1e-4)
}

/// Matcher that never converges.
pub struct FailingMatcher;

impl ScanMatcher for FailingMatcher {
    fn match_clouds(&self, _: &PointCloud, _: &PointCloud, guess: &Isometry3<f64>) -> ScanMatchResult {
        ScanMatchResult::failed(*guess, 30)
    }

    fn name(&self) -> &'static str {
        "Failing"
    }
}
