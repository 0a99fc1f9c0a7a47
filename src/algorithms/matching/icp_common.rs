//! Shared utilities for the ICP variants.
//!
//! - Configuration shared by point-to-point and generalized ICP
//! - k-d tree index over a cloud
//! - Correspondence search
//! - Convergence test and covariance estimate

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use kiddo::SquaredEuclidean;
use kiddo::float::kdtree::KdTree;
use nalgebra::{Isometry3, Matrix3, Matrix6, Point3, Rotation3, Vector6};
use serde::{Deserialize, Serialize};

use crate::core::math::{adjoint, skew, symmetrize};
use crate::core::types::PointCloud;
use crate::error::{Error, Result};

/// k-d tree over 3D points.
type PointTree = KdTree<f64, u64, 3, 256, u32>;

/// Euler angles (roll, pitch, yaw) of the frame the tree is built in.
///
/// kiddo cannot split a bucket whose points all share the split coordinate,
/// which every axis-aligned plane (floors, walls, simulated grids) produces.
/// Indexing in an oblique frame keeps those coordinates distinct; squared
/// distances are unchanged by the rotation.
const INDEX_FRAME_RPY: (f64, f64, f64) = (0.4142, 0.7321, 0.2361);

/// Configuration for ICP-family matchers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IcpConfig {
    /// Maximum number of outer iterations.
    pub max_iterations: u32,

    /// Convergence threshold on the squared norm of the incremental
    /// transform (translation in m², rotation in rad²).
    pub transformation_epsilon: f64,

    /// Maximum distance for a correspondence (meters).
    pub max_correspondence_distance: f64,

    /// Minimum number of correspondences needed to solve.
    pub min_correspondences: usize,

    /// Neighbours used to estimate each point's local surface covariance
    /// (generalized ICP only).
    pub covariance_neighbors: usize,

    /// Variance along the surface normal relative to the in-plane variance
    /// (generalized ICP only).
    pub plane_epsilon: f64,

    /// Report non-convergence when the iteration cap is reached.
    ///
    /// When false, hitting the cap with enough correspondences still counts
    /// as converged.
    pub fail_on_max_iterations: bool,
}

impl Default for IcpConfig {
    fn default() -> Self {
        Self {
            max_iterations: 30,
            transformation_epsilon: 1e-9,
            max_correspondence_distance: 0.5, // 50cm
            min_correspondences: 10,
            covariance_neighbors: 20,
            plane_epsilon: 1e-3,
            fail_on_max_iterations: false,
        }
    }
}

impl IcpConfig {
    /// Check parameter ranges.
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(Error::InvalidParameter(
                "matcher max_iterations must be at least 1".into(),
            ));
        }
        if !(self.max_correspondence_distance > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "max_correspondence_distance must be positive, got {}",
                self.max_correspondence_distance
            )));
        }
        if !(self.transformation_epsilon >= 0.0) {
            return Err(Error::InvalidParameter(
                "transformation_epsilon must be non-negative".into(),
            ));
        }
        if self.covariance_neighbors < 3 {
            return Err(Error::InvalidParameter(
                "covariance_neighbors must be at least 3".into(),
            ));
        }
        Ok(())
    }
}

/// Nearest-neighbour index over a point cloud.
///
/// Non-finite points are skipped. Exact duplicates are stored once and
/// expanded again by [`SpatialIndex::nearest_k`].
pub struct SpatialIndex {
    tree: PointTree,
    frame: Rotation3<f64>,
    duplicates: HashMap<usize, Vec<usize>>,
    unique: usize,
    len: usize,
}

impl SpatialIndex {
    /// Build an index over every finite point of the cloud.
    pub fn build(cloud: &PointCloud) -> Self {
        let (roll, pitch, yaw) = INDEX_FRAME_RPY;
        let frame = Rotation3::from_euler_angles(roll, pitch, yaw);

        let mut tree = PointTree::with_capacity(cloud.len().max(1));
        let mut first_seen: HashMap<[u64; 3], usize> = HashMap::new();
        let mut duplicates: HashMap<usize, Vec<usize>> = HashMap::new();
        let mut len = 0;

        for (i, p) in cloud.iter().enumerate() {
            if !(p.x.is_finite() && p.y.is_finite() && p.z.is_finite()) {
                continue;
            }
            len += 1;
            match first_seen.entry([p.x.to_bits(), p.y.to_bits(), p.z.to_bits()]) {
                Entry::Occupied(e) => duplicates.entry(*e.get()).or_default().push(i),
                Entry::Vacant(e) => {
                    e.insert(i);
                    let q = frame * p;
                    tree.add(&[q.x, q.y, q.z], i as u64);
                }
            }
        }

        Self {
            tree,
            frame,
            unique: first_seen.len(),
            duplicates,
            len,
        }
    }

    /// Number of indexed points, duplicates included.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    fn query(&self, p: &Point3<f64>) -> [f64; 3] {
        let q = self.frame * p;
        [q.x, q.y, q.z]
    }

    /// Closest point as (index, squared distance).
    #[inline]
    pub fn nearest(&self, p: &Point3<f64>) -> Option<(usize, f64)> {
        if self.unique == 0 {
            return None;
        }
        let nn = self.tree.nearest_one::<SquaredEuclidean>(&self.query(p));
        Some((nn.item as usize, nn.distance))
    }

    /// Up to `k` closest points as (index, squared distance), nearest first.
    pub fn nearest_k(&self, p: &Point3<f64>, k: usize) -> Vec<(usize, f64)> {
        if self.unique == 0 || k == 0 {
            return Vec::new();
        }
        let mut neighbours = Vec::with_capacity(k);
        for nn in self
            .tree
            .nearest_n::<SquaredEuclidean>(&self.query(p), k.min(self.unique))
        {
            let i = nn.item as usize;
            neighbours.push((i, nn.distance));
            if let Some(copies) = self.duplicates.get(&i) {
                neighbours.extend(copies.iter().map(|&j| (j, nn.distance)));
            }
            if neighbours.len() >= k {
                break;
            }
        }
        neighbours.truncate(k);
        neighbours
    }
}

/// A source/target point pair.
#[derive(Debug, Clone, Copy)]
pub struct Correspondence {
    /// Index into the source cloud
    pub source: usize,
    /// Index into the target cloud
    pub target: usize,
    /// Squared distance at the time of association
    pub distance_sq: f64,
}

/// Pair every transformed source point with its nearest target point,
/// dropping pairs farther than `max_distance`.
pub fn find_correspondences(
    transformed_source: &[Point3<f64>],
    target_index: &SpatialIndex,
    max_distance: f64,
) -> Vec<Correspondence> {
    let max_dist_sq = max_distance * max_distance;
    transformed_source
        .iter()
        .enumerate()
        .filter_map(|(i, p)| {
            let (j, d2) = target_index.nearest(p)?;
            (d2 <= max_dist_sq).then_some(Correspondence {
                source: i,
                target: j,
                distance_sq: d2,
            })
        })
        .collect()
}

/// Mean squared correspondence distance.
#[inline]
pub fn mean_squared_distance(correspondences: &[Correspondence]) -> f64 {
    if correspondences.is_empty() {
        return f64::MAX;
    }
    correspondences.iter().map(|c| c.distance_sq).sum::<f64>() / correspondences.len() as f64
}

/// Apply a transform to every point of a cloud.
#[inline]
pub fn transform_points(cloud: &PointCloud, transform: &Isometry3<f64>) -> Vec<Point3<f64>> {
    cloud.iter().map(|p| transform * p).collect()
}

/// Squared size of an se(3) increment compared against the epsilon.
#[inline]
pub fn increment_converged(delta: &Vector6<f64>, epsilon: f64) -> bool {
    delta.norm_squared() < epsilon
}

/// Covariance of an alignment from its final correspondences.
///
/// Uses the point-to-point Gauss-Newton Hessian scaled by the residual
/// variance:
/// ```text
/// J_i = [-I, [T p_i]×]      Σ_left = mse · (Σ J_iᵀ J_i)⁻¹
/// ```
/// The result is mapped from the left-perturbation space of the solver to
/// the transform's local tangent space: `Σ = Ad(T⁻¹) Σ_left Ad(T⁻¹)ᵀ`.
pub fn estimate_covariance(
    transformed_source: &[Point3<f64>],
    correspondences: &[Correspondence],
    transform: &Isometry3<f64>,
    mse: f64,
) -> Matrix6<f64> {
    let mut hessian = Matrix6::zeros();
    for c in correspondences {
        let j = point_jacobian(&transformed_source[c.source]);
        hessian += j.transpose() * j;
    }

    let Some(inv) = hessian.try_inverse() else {
        return Matrix6::identity();
    };

    let ad = adjoint(&transform.inverse());
    symmetrize(&(ad * (inv * mse.max(0.0)) * ad.transpose()))
}

/// Residual Jacobian `∂(q - exp(δ)·x)/∂δ` at δ = 0 for a transformed point x.
#[inline]
pub fn point_jacobian(x: &Point3<f64>) -> nalgebra::Matrix3x6<f64> {
    let mut j = nalgebra::Matrix3x6::zeros();
    j.fixed_view_mut::<3, 3>(0, 0).copy_from(&(-Matrix3::identity()));
    j.fixed_view_mut::<3, 3>(0, 3).copy_from(&skew(&x.coords));
    j
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::matching::test_utils::flat_floor;
    use approx::assert_relative_eq;

    fn grid_cloud() -> PointCloud {
        (0..10)
            .flat_map(|i| (0..10).map(move |j| (i, j)))
            .map(|(i, j)| Point3::new(i as f64 * 0.1, j as f64 * 0.1, (i * j) as f64 * 0.001))
            .collect()
    }

    #[test]
    fn test_nearest() {
        let cloud = grid_cloud();
        let index = SpatialIndex::build(&cloud);
        let (idx, d2) = index.nearest(&Point3::new(0.31, 0.49, 0.0)).unwrap();

        assert_relative_eq!(cloud.points[idx].x, 0.3, epsilon = 1e-12);
        assert_relative_eq!(cloud.points[idx].y, 0.5, epsilon = 1e-12);
        assert!(d2 < 0.01);
    }

    #[test]
    fn test_nearest_k_sorted() {
        let index = SpatialIndex::build(&grid_cloud());
        let neighbours = index.nearest_k(&Point3::new(0.5, 0.5, 0.0), 5);

        assert_eq!(neighbours.len(), 5);
        assert!(neighbours.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[test]
    fn test_empty_index() {
        let index = SpatialIndex::build(&PointCloud::new());
        assert!(index.nearest(&Point3::origin()).is_none());
        assert!(index.nearest_k(&Point3::origin(), 3).is_empty());
    }

    #[test]
    fn test_index_exact_plane() {
        let cloud = flat_floor(60, 0.1);
        let index = SpatialIndex::build(&cloud);

        assert_eq!(index.len(), 3600);
        let (idx, d2) = index.nearest(&Point3::new(2.02, 3.49, 0.05)).unwrap();
        assert_relative_eq!(cloud.points[idx].x, 2.0, epsilon = 1e-9);
        assert_relative_eq!(cloud.points[idx].y, 3.5, epsilon = 1e-9);
        assert_relative_eq!(d2, 0.0004 + 0.0001 + 0.0025, epsilon = 1e-9);

        let neighbours = index.nearest_k(&Point3::new(3.0, 3.0, 0.0), 5);
        assert_eq!(neighbours.len(), 5);
        assert_relative_eq!(neighbours[0].1, 0.0, epsilon = 1e-12);
        assert!(neighbours[1..].iter().all(|n| (n.1 - 0.01).abs() < 1e-9));
    }

    #[test]
    fn test_index_duplicates_and_non_finite() {
        let mut cloud = PointCloud::new();
        for _ in 0..300 {
            cloud.push(Point3::new(1.0, 1.0, 1.0));
        }
        cloud.push(Point3::new(f64::NAN, 0.0, 0.0));
        cloud.push(Point3::new(2.0, 1.0, 1.0));
        let index = SpatialIndex::build(&cloud);

        assert_eq!(index.len(), 301);
        let neighbours = index.nearest_k(&Point3::new(1.0, 1.0, 1.0), 4);
        assert_eq!(neighbours.len(), 4);
        assert!(neighbours.iter().all(|&(i, d2)| i < 300 && d2 < 1e-12));

        let (far, _) = index.nearest(&Point3::new(2.1, 1.0, 1.0)).unwrap();
        assert_eq!(far, 301);
    }

    #[test]
    fn test_correspondence_gating() {
        let target = grid_cloud();
        let index = SpatialIndex::build(&target);
        let source = vec![Point3::new(0.0, 0.0, 0.0), Point3::new(10.0, 10.0, 10.0)];
        let pairs = find_correspondences(&source, &index, 0.5);

        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].source, 0);
    }

    #[test]
    fn test_mse_empty_is_max() {
        assert_eq!(mean_squared_distance(&[]), f64::MAX);
    }

    #[test]
    fn test_config_validation() {
        assert!(IcpConfig::default().validate().is_ok());
        let bad = IcpConfig {
            max_correspondence_distance: -1.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
