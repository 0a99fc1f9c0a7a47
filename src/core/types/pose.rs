//! 6-DOF pose type with covariance.

use nalgebra::{Isometry3, Matrix4, Matrix6, Point3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::core::math::{adjoint, symmetrize};

/// Robot pose in 3D space.
///
/// Position in meters, orientation as a unit quaternion, and a 6x6 covariance
/// in the pose's local tangent space ordered `(x, y, z, rx, ry, rz)`.
/// Timestamp is in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose6DOF {
    /// Timestamp in microseconds
    pub timestamp_us: u64,
    /// Position in meters
    pub position: Vector3<f64>,
    /// Orientation (unit norm)
    pub orientation: UnitQuaternion<f64>,
    /// Covariance, translation block first
    pub covariance: Matrix6<f64>,
}

impl Pose6DOF {
    /// Create a pose with zero covariance.
    #[inline]
    pub fn new(position: Vector3<f64>, orientation: UnitQuaternion<f64>, timestamp_us: u64) -> Self {
        Self {
            timestamp_us,
            position,
            orientation,
            covariance: Matrix6::zeros(),
        }
    }

    /// Identity pose at origin.
    #[inline]
    pub fn identity() -> Self {
        Self::new(Vector3::zeros(), UnitQuaternion::identity(), 0)
    }

    /// Pure translation.
    #[inline]
    pub fn from_translation(x: f64, y: f64, z: f64) -> Self {
        Self::new(Vector3::new(x, y, z), UnitQuaternion::identity(), 0)
    }

    /// Translation plus roll/pitch/yaw in radians.
    pub fn from_xyz_rpy(x: f64, y: f64, z: f64, roll: f64, pitch: f64, yaw: f64) -> Self {
        Self::new(
            Vector3::new(x, y, z),
            UnitQuaternion::from_euler_angles(roll, pitch, yaw),
            0,
        )
    }

    /// Build from a rigid transform.
    #[inline]
    pub fn from_isometry(iso: &Isometry3<f64>, timestamp_us: u64) -> Self {
        Self::new(iso.translation.vector, iso.rotation, timestamp_us)
    }

    /// Build from a homogeneous 4x4 matrix.
    ///
    /// The rotation block is re-orthonormalized through a quaternion.
    pub fn from_matrix(m: &Matrix4<f64>, timestamp_us: u64) -> Self {
        let rotation = m.fixed_view::<3, 3>(0, 0).into_owned();
        let orientation = UnitQuaternion::from_matrix(&rotation);
        let position = m.fixed_view::<3, 1>(0, 3).into_owned();
        Self::new(position, orientation, timestamp_us)
    }

    /// Replace the covariance.
    #[inline]
    pub fn with_covariance(mut self, covariance: Matrix6<f64>) -> Self {
        self.covariance = covariance;
        self
    }

    /// Replace the timestamp.
    #[inline]
    pub fn with_timestamp(mut self, timestamp_us: u64) -> Self {
        self.timestamp_us = timestamp_us;
        self
    }

    /// Rigid transform view of this pose.
    #[inline]
    pub fn to_isometry(&self) -> Isometry3<f64> {
        Isometry3::from_parts(Translation3::from(self.position), self.orientation)
    }

    /// Homogeneous 4x4 matrix.
    #[inline]
    pub fn to_matrix(&self) -> Matrix4<f64> {
        self.to_isometry().to_homogeneous()
    }

    /// Compose two poses: self ⊕ other
    ///
    /// Applies `other` relative to `self` frame. The result orientation is
    /// renormalized. Covariances are propagated assuming independence:
    /// ```text
    /// p   = p1 + R1 · p2
    /// q   = normalize(q1 · q2)
    /// Σ   = Ad(T2⁻¹) · Σ1 · Ad(T2⁻¹)ᵀ + Σ2
    /// ```
    pub fn compose(&self, other: &Pose6DOF) -> Pose6DOF {
        let position = self.position + self.orientation * other.position;
        let orientation = UnitQuaternion::new_normalize(
            self.orientation.into_inner() * other.orientation.into_inner(),
        );

        let ad = adjoint(&other.to_isometry().inverse());
        let covariance = symmetrize(&(ad * self.covariance * ad.transpose() + other.covariance));

        Pose6DOF {
            timestamp_us: other.timestamp_us.max(self.timestamp_us),
            position,
            orientation,
            covariance,
        }
    }

    /// Inverse pose with covariance mapped into the inverse's tangent space.
    pub fn inverse(&self) -> Pose6DOF {
        let iso = self.to_isometry();
        let inv = iso.inverse();
        let ad = adjoint(&iso);

        Pose6DOF {
            timestamp_us: self.timestamp_us,
            position: inv.translation.vector,
            orientation: inv.rotation,
            covariance: symmetrize(&(ad * self.covariance * ad.transpose())),
        }
    }

    /// Relative transform from `self` to `other`: `self⁻¹ ⊕ other`.
    ///
    /// Purely geometric; the result carries zero covariance.
    pub fn between(&self, other: &Pose6DOF) -> Pose6DOF {
        let relative = self.to_isometry().inverse() * other.to_isometry();
        Self::from_isometry(&relative, other.timestamp_us)
    }

    /// Transform a point from this pose's local frame into the parent frame.
    #[inline]
    pub fn transform_point(&self, point: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.orientation * point.coords + self.position)
    }

    /// Euclidean distance between positions.
    #[inline]
    pub fn distance_to(&self, other: &Pose6DOF) -> f64 {
        (self.position - other.position).norm()
    }

    /// Rotation angle (radians) between orientations.
    #[inline]
    pub fn angle_to(&self, other: &Pose6DOF) -> f64 {
        self.orientation.angle_to(&other.orientation)
    }

    /// Norm of the underlying quaternion. Should be 1 within rounding.
    #[inline]
    pub fn orientation_norm(&self) -> f64 {
        self.orientation.quaternion().norm()
    }

    /// All components finite.
    pub fn is_finite(&self) -> bool {
        self.position.iter().all(|v| v.is_finite())
            && self.orientation.coords.iter().all(|v| v.is_finite())
            && self.covariance.iter().all(|v| v.is_finite())
    }
}

impl Default for Pose6DOF {
    fn default() -> Self {
        Self::identity()
    }
}
