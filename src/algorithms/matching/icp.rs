//! Point-to-Point Iterative Closest Point (ICP) scan matcher.
//!
//! Classic ICP: associate nearest neighbours, then solve the rigid transform
//! in closed form from the cross-covariance of the matched pairs (Kabsch).
//! Cheaper per iteration than generalized ICP but slower to converge on
//! planar scenes.

use nalgebra::{Isometry3, Matrix3, Point3, Rotation3, Translation3, UnitQuaternion, Vector3};

use super::icp_common::{
    Correspondence, IcpConfig, SpatialIndex, estimate_covariance, find_correspondences,
    increment_converged, mean_squared_distance, transform_points,
};
use super::{ScanMatchResult, ScanMatcher};
use crate::core::math::se3_log;
use crate::core::types::PointCloud;

/// Point-to-Point ICP matcher.
#[derive(Debug, Clone)]
pub struct PointToPointIcp {
    config: IcpConfig,
}

impl PointToPointIcp {
    /// Create a new ICP matcher with the given configuration.
    pub fn new(config: IcpConfig) -> Self {
        Self { config }
    }

    /// Get the current configuration.
    pub fn config(&self) -> &IcpConfig {
        &self.config
    }

    /// Best rigid transform mapping matched source points onto target points.
    ///
    /// ```text
    /// H = Σ (p_i - p̄)(q_i - q̄)ᵀ = U S Vᵀ
    /// R = V·diag(1, 1, det(V Uᵀ))·Uᵀ
    /// t = q̄ - R p̄
    /// ```
    fn compute_transform(
        source: &[Point3<f64>],
        target: &PointCloud,
        correspondences: &[Correspondence],
    ) -> Option<Isometry3<f64>> {
        let n = correspondences.len() as f64;
        let (sum_p, sum_q) = correspondences.iter().fold(
            (Vector3::zeros(), Vector3::zeros()),
            |(sp, sq), c| {
                (
                    sp + source[c.source].coords,
                    sq + target.points[c.target].coords,
                )
            },
        );
        let centroid_p = sum_p / n;
        let centroid_q = sum_q / n;

        let cross = correspondences.iter().fold(Matrix3::zeros(), |acc, c| {
            let dp = source[c.source].coords - centroid_p;
            let dq = target.points[c.target].coords - centroid_q;
            acc + dp * dq.transpose()
        });

        let svd = cross.svd(true, true);
        let u = svd.u?;
        let v_t = svd.v_t?;
        let v = v_t.transpose();

        let d = (v * u.transpose()).determinant().signum();
        let correction = Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, d));
        let rotation = Rotation3::from_matrix_unchecked(v * correction * u.transpose());
        let translation = centroid_q - rotation * centroid_p;

        Some(Isometry3::from_parts(
            Translation3::from(translation),
            UnitQuaternion::from_rotation_matrix(&rotation),
        ))
    }
}

impl ScanMatcher for PointToPointIcp {
    fn match_clouds(
        &self,
        source: &PointCloud,
        target: &PointCloud,
        initial_guess: &Isometry3<f64>,
    ) -> ScanMatchResult {
        let min_corr = self.config.min_correspondences;
        if source.len() < min_corr || target.len() < min_corr {
            return ScanMatchResult::failed(*initial_guess, 0);
        }

        let target_index = SpatialIndex::build(target);
        let mut transform = *initial_guess;
        let mut iterations = 0;
        let mut converged = false;

        for iter in 0..self.config.max_iterations {
            iterations = iter + 1;

            let transformed = transform_points(source, &transform);
            let correspondences = find_correspondences(
                &transformed,
                &target_index,
                self.config.max_correspondence_distance,
            );
            if correspondences.len() < min_corr {
                return ScanMatchResult::failed(transform, iterations);
            }

            let Some(step) = Self::compute_transform(&transformed, target, &correspondences) else {
                return ScanMatchResult::failed(transform, iterations);
            };

            transform = step * transform;
            transform.rotation.renormalize();

            if increment_converged(&se3_log(&step), self.config.transformation_epsilon) {
                converged = true;
                break;
            }
        }

        if !converged && self.config.fail_on_max_iterations {
            return ScanMatchResult::failed(transform, iterations);
        }

        let transformed = transform_points(source, &transform);
        let correspondences = find_correspondences(
            &transformed,
            &target_index,
            self.config.max_correspondence_distance,
        );
        if correspondences.len() < min_corr {
            return ScanMatchResult::failed(transform, iterations);
        }

        let fitness = mean_squared_distance(&correspondences);
        ScanMatchResult {
            transform,
            covariance: estimate_covariance(&transformed, &correspondences, &transform, fitness),
            fitness,
            converged: true,
            iterations,
            correspondences: correspondences.len(),
        }
    }

    fn name(&self) -> &'static str {
        "PointToPointIcp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::matching::test_utils::{create_room, flat_floor, perturbation};
    use crate::sensors::preprocessing::{VoxelGrid, VoxelGridConfig};
    use approx::assert_relative_eq;

    #[test]
    fn test_exact_floor_does_not_panic() {
        let voxel = VoxelGrid::new(VoxelGridConfig::default()).unwrap();
        let floor = voxel.apply(&flat_floor(60, 0.1));
        let matcher = PointToPointIcp::new(IcpConfig::default());
        let result = matcher.match_clouds(&floor, &floor, &Isometry3::identity());

        assert!(result.converged);
        assert!(result.fitness < 1e-10);
        assert_relative_eq!(result.transform.translation.vector.norm(), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_kabsch_exact_pairs() {
        let source = create_room(0.5);
        let truth = perturbation(0.3, -0.2, 0.1, 0.3);
        let target = source.transformed(&truth);
        let pairs: Vec<Correspondence> = (0..source.len())
            .map(|i| Correspondence {
                source: i,
                target: i,
                distance_sq: 0.0,
            })
            .collect();

        let t = PointToPointIcp::compute_transform(&source.points, &target, &pairs).unwrap();

        assert_relative_eq!(t.translation.vector, truth.translation.vector, epsilon = 1e-9);
        assert!(t.rotation.angle_to(&truth.rotation) < 1e-6);
    }

    #[test]
    fn test_identity_alignment() {
        let room = create_room(0.25);
        let icp = PointToPointIcp::new(IcpConfig::default());
        let result = icp.match_clouds(&room, &room, &Isometry3::identity());

        assert!(result.converged);
        assert!(result.fitness < 1e-12);
    }

    #[test]
    fn test_recovers_translation() {
        let source = create_room(0.2);
        let truth = perturbation(0.04, 0.03, -0.02, 0.0);
        let target = source.transformed(&truth);

        let icp = PointToPointIcp::new(IcpConfig {
            max_iterations: 100,
            ..Default::default()
        });
        let result = icp.match_clouds(&source, &target, &Isometry3::identity());

        assert!(result.converged);
        assert_relative_eq!(
            result.transform.translation.vector,
            truth.translation.vector,
            epsilon = 1e-2
        );
    }

    #[test]
    fn test_initial_guess_is_used() {
        let source = create_room(0.25);
        let truth = perturbation(1.5, 0.0, 0.0, 0.0);
        let target = source.transformed(&truth);

        let icp = PointToPointIcp::new(IcpConfig::default());
        let result = icp.match_clouds(&source, &target, &truth);

        assert!(result.converged);
        assert!(result.fitness < 1e-10);
    }
}
