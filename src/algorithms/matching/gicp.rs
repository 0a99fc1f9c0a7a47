//! Generalized ICP (plane-to-plane) scan matcher.
//!
//! Each point carries a covariance describing its local surface: wide in the
//! surface plane, narrow along the normal. Correspondence residuals are then
//! weighted by the combined covariance so points slide freely along matching
//! planes and are pulled tightly along the normals.
//!
//! # Algorithm
//!
//! ```text
//! for each iteration:
//!     1. associate T·p_i with nearest q_i (within max distance)
//!     2. d_i = q_i - T·p_i
//!        M_i = (C_qi + R·C_pi·Rᵀ)⁻¹
//!        J_i = [-I, [T·p_i]×]
//!     3. (Σ J_iᵀ M_i J_i) δ = -Σ J_iᵀ M_i d_i
//!     4. T ← exp(δ)·T, stop if |δ|² < ε
//! ```

use nalgebra::{Isometry3, Matrix3, Matrix6, SymmetricEigen, Vector3, Vector6};

use super::icp_common::{
    IcpConfig, SpatialIndex, estimate_covariance, find_correspondences, increment_converged,
    mean_squared_distance, point_jacobian, transform_points,
};
use super::{ScanMatchResult, ScanMatcher};
use crate::core::math::se3_exp;
use crate::core::types::PointCloud;

/// Generalized ICP matcher.
#[derive(Debug, Clone)]
pub struct GeneralizedIcp {
    config: IcpConfig,
}

impl GeneralizedIcp {
    /// Create a new matcher with the given configuration.
    pub fn new(config: IcpConfig) -> Self {
        Self { config }
    }

    /// Get the current configuration.
    pub fn config(&self) -> &IcpConfig {
        &self.config
    }

    /// Plane-like covariance for every point of a cloud.
    ///
    /// The neighbourhood's smallest principal direction is taken as the
    /// surface normal and the covariance is rebuilt as `U·diag(ε, 1, 1)·Uᵀ`.
    /// Points with too few neighbours get an isotropic covariance.
    fn surface_covariances(&self, cloud: &PointCloud, index: &SpatialIndex) -> Vec<Matrix3<f64>> {
        let k = self.config.covariance_neighbors;
        let eps = self.config.plane_epsilon;

        cloud
            .iter()
            .map(|p| {
                let neighbours = index.nearest_k(p, k);
                if neighbours.len() < 3 {
                    return Matrix3::identity();
                }

                let n = neighbours.len() as f64;
                let mean = neighbours
                    .iter()
                    .fold(Vector3::zeros(), |acc, (i, _)| acc + cloud.points[*i].coords)
                    / n;
                let scatter = neighbours.iter().fold(Matrix3::zeros(), |acc, (i, _)| {
                    let d = cloud.points[*i].coords - mean;
                    acc + d * d.transpose()
                }) / n;

                let eigen = SymmetricEigen::new(scatter);
                let (min_idx, _) = eigen.eigenvalues.argmin();
                let normal = eigen.eigenvectors.column(min_idx).into_owned();

                Matrix3::identity() - (1.0 - eps) * normal * normal.transpose()
            })
            .collect()
    }
}

impl ScanMatcher for GeneralizedIcp {
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
        let source_index = SpatialIndex::build(source);
        let source_covs = self.surface_covariances(source, &source_index);
        let target_covs = self.surface_covariances(target, &target_index);

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

            let rotation = transform.rotation.to_rotation_matrix().into_inner();
            let mut hessian = Matrix6::zeros();
            let mut gradient = Vector6::zeros();

            for c in &correspondences {
                let x = &transformed[c.source];
                let residual = target.points[c.target] - x;
                let combined =
                    target_covs[c.target] + rotation * source_covs[c.source] * rotation.transpose();
                let Some(weight) = combined.try_inverse() else {
                    continue;
                };

                let j = point_jacobian(x);
                let jt_w = j.transpose() * weight;
                hessian += jt_w * j;
                gradient += jt_w * residual;
            }

            let Some(chol) = hessian.cholesky() else {
                return ScanMatchResult::failed(transform, iterations);
            };
            let delta = -chol.solve(&gradient);
            if !delta.iter().all(|v| v.is_finite()) {
                return ScanMatchResult::failed(transform, iterations);
            }

            transform = se3_exp(&delta) * transform;
            transform.rotation.renormalize();

            if increment_converged(&delta, self.config.transformation_epsilon) {
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
        "GeneralizedIcp"
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
        let matcher = GeneralizedIcp::new(IcpConfig::default());
        let result = matcher.match_clouds(&floor, &floor, &Isometry3::identity());

        assert!(result.converged);
        assert!(result.fitness < 1e-10);
        assert_relative_eq!(result.transform.translation.vector.norm(), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_identity_alignment() {
        let room = create_room(0.2);
        let gicp = GeneralizedIcp::new(IcpConfig::default());
        let result = gicp.match_clouds(&room, &room, &Isometry3::identity());

        assert!(result.converged);
        assert!(result.fitness < 1e-10);
        assert_relative_eq!(result.transform.translation.vector.norm(), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_recovers_small_motion() {
        let source = create_room(0.2);
        let truth = perturbation(0.12, -0.08, 0.03, 0.04);
        let target = source.transformed(&truth);

        let gicp = GeneralizedIcp::new(IcpConfig::default());
        let result = gicp.match_clouds(&source, &target, &Isometry3::identity());

        assert!(result.converged);
        assert_relative_eq!(
            result.transform.translation.vector,
            truth.translation.vector,
            epsilon = 5e-3
        );
        assert!(result.transform.rotation.angle_to(&truth.rotation) < 5e-3);
        assert!(result.correspondences > source.len() / 2);
    }

    #[test]
    fn test_does_not_mutate_inputs() {
        let source = create_room(0.25);
        let target = source.transformed(&perturbation(0.05, 0.0, 0.0, 0.0));
        let (source_copy, target_copy) = (source.clone(), target.clone());

        let gicp = GeneralizedIcp::new(IcpConfig::default());
        let _ = gicp.match_clouds(&source, &target, &Isometry3::identity());

        assert_eq!(source, source_copy);
        assert_eq!(target, target_copy);
    }

    #[test]
    fn test_too_few_points_fails() {
        let tiny = PointCloud::from_points(vec![nalgebra::Point3::origin(); 3]);
        let gicp = GeneralizedIcp::new(IcpConfig::default());
        let result = gicp.match_clouds(&tiny, &tiny, &Isometry3::identity());

        assert!(!result.converged);
        assert!(result.into_result().is_err());
    }

    #[test]
    fn test_disjoint_clouds_fail() {
        let source = create_room(0.25);
        let target = source.transformed(&Isometry3::translation(100.0, 0.0, 0.0));
        let gicp = GeneralizedIcp::new(IcpConfig::default());
        let result = gicp.match_clouds(&source, &target, &Isometry3::identity());

        assert!(!result.converged);
    }

    #[test]
    fn test_fail_on_max_iterations() {
        let source = create_room(0.25);
        let target = source.transformed(&perturbation(0.2, 0.1, 0.0, 0.05));
        let gicp = GeneralizedIcp::new(IcpConfig {
            max_iterations: 1,
            fail_on_max_iterations: true,
            ..Default::default()
        });
        let result = gicp.match_clouds(&source, &target, &Isometry3::identity());

        assert!(!result.converged);
        assert_eq!(result.iterations, 1);
    }
}
