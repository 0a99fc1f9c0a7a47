//! Lie group primitives for SE(3) pose arithmetic.
//!
//! Tangent vectors are ordered `(v, ω)`: translational part first, rotational
//! part second. This matches the `(x, y, z, rx, ry, rz)` covariance layout used
//! by [`Pose6DOF`](crate::core::types::Pose6DOF).

use nalgebra::{
    Isometry3, Matrix3, Matrix6, SymmetricEigen, Translation3, UnitQuaternion, Vector3, Vector6,
};

/// Small angle threshold for switching to series expansions.
const SMALL_ANGLE_THRESHOLD: f64 = 1e-6;

/// Skew-symmetric matrix `[v]×` such that `[v]× u = v × u`.
///
/// ```text
/// [v]× = |  0   -v_z   v_y |
///        |  v_z   0   -v_x |
///        | -v_y  v_x    0  |
/// ```
#[inline]
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// Left Jacobian of SO(3).
///
/// ```text
/// Jl(φ) = I + (1 - cos θ)/θ² [φ]× + (θ - sin θ)/θ³ [φ]×²
/// ```
pub fn so3_left_jacobian(phi: &Vector3<f64>) -> Matrix3<f64> {
    let theta = phi.norm();
    let skew_phi = skew(phi);

    if theta < SMALL_ANGLE_THRESHOLD {
        return Matrix3::identity() + 0.5 * skew_phi;
    }

    let theta_sq = theta * theta;
    Matrix3::identity()
        + ((1.0 - theta.cos()) / theta_sq) * skew_phi
        + ((theta - theta.sin()) / (theta_sq * theta)) * skew_phi * skew_phi
}

/// Inverse of the left Jacobian of SO(3).
///
/// ```text
/// Jl⁻¹(φ) = I - ½[φ]× + (1/θ² - (1 + cos θ)/(2θ sin θ)) [φ]×²
/// ```
pub fn so3_left_jacobian_inv(phi: &Vector3<f64>) -> Matrix3<f64> {
    let theta = phi.norm();
    let skew_phi = skew(phi);
    let skew_phi_sq = skew_phi * skew_phi;

    if theta < SMALL_ANGLE_THRESHOLD {
        return Matrix3::identity() - 0.5 * skew_phi + (1.0 / 12.0) * skew_phi_sq;
    }

    let coeff = 1.0 / (theta * theta) - (1.0 + theta.cos()) / (2.0 * theta * theta.sin());
    Matrix3::identity() - 0.5 * skew_phi + coeff * skew_phi_sq
}

/// Exponential map from se(3) to SE(3).
///
/// ```text
/// exp([v; ω]) = (Jl(ω)·v, exp(ω))
/// ```
pub fn se3_exp(xi: &Vector6<f64>) -> Isometry3<f64> {
    let v = xi.fixed_rows::<3>(0).into_owned();
    let omega = xi.fixed_rows::<3>(3).into_owned();

    let rotation = UnitQuaternion::from_scaled_axis(omega);
    let translation = so3_left_jacobian(&omega) * v;

    Isometry3::from_parts(Translation3::from(translation), rotation)
}

/// Logarithm map from SE(3) to se(3). Inverse of [`se3_exp`].
pub fn se3_log(pose: &Isometry3<f64>) -> Vector6<f64> {
    let omega = pose.rotation.scaled_axis();
    let v = so3_left_jacobian_inv(&omega) * pose.translation.vector;

    let mut xi = Vector6::zeros();
    xi.fixed_rows_mut::<3>(0).copy_from(&v);
    xi.fixed_rows_mut::<3>(3).copy_from(&omega);
    xi
}

/// Adjoint of an SE(3) element for `(v, ω)` ordered tangents.
///
/// Satisfies `T · exp(ξ) · T⁻¹ = exp(Ad(T) ξ)`.
///
/// ```text
/// Ad(T) = | R   [t]× R |
///         | 0     R    |
/// ```
pub fn adjoint(pose: &Isometry3<f64>) -> Matrix6<f64> {
    let r = pose.rotation.to_rotation_matrix().into_inner();
    let t_cross_r = skew(&pose.translation.vector) * r;

    let mut ad = Matrix6::zeros();
    ad.fixed_view_mut::<3, 3>(0, 0).copy_from(&r);
    ad.fixed_view_mut::<3, 3>(0, 3).copy_from(&t_cross_r);
    ad.fixed_view_mut::<3, 3>(3, 3).copy_from(&r);
    ad
}

/// Symmetric part `(M + Mᵀ) / 2` of a 6x6 matrix.
#[inline]
pub fn symmetrize(m: &Matrix6<f64>) -> Matrix6<f64> {
    (m + m.transpose()) * 0.5
}

/// Invert a covariance into an information matrix.
///
/// The covariance is symmetrized and loaded with `epsilon` on the diagonal so
/// that zero or rank-deficient covariances still produce a finite, positive
/// definite information matrix. If the Cholesky factorization still fails
/// (indefinite input), eigenvalues are clamped to `epsilon` before inverting.
/// Non-finite covariances carry no information and map to `epsilon · I`.
pub fn information_from_covariance(covariance: &Matrix6<f64>, epsilon: f64) -> Matrix6<f64> {
    if !covariance.iter().all(|v| v.is_finite()) {
        return Matrix6::identity() * epsilon;
    }

    let regularized = symmetrize(covariance) + Matrix6::identity() * epsilon;

    if let Some(chol) = regularized.cholesky() {
        return symmetrize(&chol.inverse());
    }

    let eigen = SymmetricEigen::new(regularized);
    let mut inv_values = eigen.eigenvalues;
    for value in inv_values.iter_mut() {
        *value = 1.0 / value.max(epsilon);
    }
    let info = eigen.eigenvectors * Matrix6::from_diagonal(&inv_values) * eigen.eigenvectors.transpose();
    symmetrize(&info)
}
