//! Voxel grid downsampling for 3D point clouds.
//!
//! Space is partitioned into cubic cells of edge `leaf_size`. Every occupied
//! cell is replaced by the centroid of the points that fell into it, which
//! bounds the point count handed to registration while keeping the surface
//! shape.

use std::collections::BTreeMap;

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::core::types::PointCloud;
use crate::error::{Error, Result};

/// Configuration for voxel grid downsampling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoxelGridConfig {
    /// Cell edge length in meters.
    ///
    /// Default: 0.05
    pub leaf_size: f64,

    /// Minimum number of points a cell needs to produce an output point.
    ///
    /// Default: 1
    pub min_points_per_voxel: usize,
}

impl Default for VoxelGridConfig {
    fn default() -> Self {
        Self {
            leaf_size: 0.05,
            min_points_per_voxel: 1,
        }
    }
}

impl VoxelGridConfig {
    /// Check parameter ranges.
    pub fn validate(&self) -> Result<()> {
        if !(self.leaf_size.is_finite() && self.leaf_size > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "voxel leaf_size must be positive, got {}",
                self.leaf_size
            )));
        }
        if self.min_points_per_voxel == 0 {
            return Err(Error::InvalidParameter(
                "min_points_per_voxel must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Per-cell running sum.
#[derive(Debug, Clone, Copy)]
struct VoxelAccumulator {
    sum: Vector3<f64>,
    count: usize,
}

/// Voxel grid filter replacing each occupied cell by its centroid.
///
/// Output order follows the integer cell index (x, then y, then z), so the
/// same input and leaf size always produce the same cloud.
#[derive(Debug, Clone)]
pub struct VoxelGrid {
    config: VoxelGridConfig,
    inv_leaf: f64,
}

impl VoxelGrid {
    /// Create a new voxel filter, rejecting a non-positive leaf size.
    pub fn new(config: VoxelGridConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            inv_leaf: 1.0 / config.leaf_size,
        })
    }

    /// Get the current configuration.
    pub fn config(&self) -> &VoxelGridConfig {
        &self.config
    }

    /// Integer cell coordinates for a point.
    #[inline]
    fn voxel_key(&self, p: &Point3<f64>) -> (i64, i64, i64) {
        (
            (p.x * self.inv_leaf).floor() as i64,
            (p.y * self.inv_leaf).floor() as i64,
            (p.z * self.inv_leaf).floor() as i64,
        )
    }

    /// Downsample a cloud. Non-finite points are dropped.
    pub fn apply(&self, cloud: &PointCloud) -> PointCloud {
        let mut cells: BTreeMap<(i64, i64, i64), VoxelAccumulator> = BTreeMap::new();

        for p in cloud.iter() {
            if !(p.x.is_finite() && p.y.is_finite() && p.z.is_finite()) {
                continue;
            }
            let acc = cells.entry(self.voxel_key(p)).or_insert(VoxelAccumulator {
                sum: Vector3::zeros(),
                count: 0,
            });
            acc.sum += p.coords;
            acc.count += 1;
        }

        cells
            .values()
            .filter(|acc| acc.count >= self.config.min_points_per_voxel)
            .map(|acc| Point3::from(acc.sum / acc.count as f64))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn grid(leaf: f64) -> VoxelGrid {
        VoxelGrid::new(VoxelGridConfig {
            leaf_size: leaf,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_points_in_one_cell_collapse_to_centroid() {
        let cloud = PointCloud::from_points(vec![
            Point3::new(0.01, 0.01, 0.01),
            Point3::new(0.03, 0.01, 0.02),
            Point3::new(0.02, 0.04, 0.03),
        ]);
        let out = grid(0.05).apply(&cloud);

        assert_eq!(out.len(), 1);
        assert_relative_eq!(out.points[0], Point3::new(0.02, 0.02, 0.02), epsilon = 1e-12);
    }

    #[test]
    fn test_separate_cells_stay_separate() {
        let cloud = PointCloud::from_points(vec![
            Point3::new(0.01, 0.0, 0.0),
            Point3::new(1.01, 0.0, 0.0),
            Point3::new(-0.01, 0.0, 0.0),
        ]);
        let out = grid(0.05).apply(&cloud);

        assert_eq!(out.len(), 3);
        // Ordered by cell index along x
        assert!(out.points[0].x < 0.0);
        assert!(out.points[2].x > 1.0);
    }

    #[test]
    fn test_deterministic_output() {
        let cloud: PointCloud = (0..500)
            .map(|i| {
                let t = i as f64 * 0.013;
                Point3::new(t.sin() * 2.0, t.cos() * 2.0, t * 0.01)
            })
            .collect();
        let filter = grid(0.1);

        assert_eq!(filter.apply(&cloud), filter.apply(&cloud));
        assert!(filter.apply(&cloud).len() < cloud.len());
    }

    #[test]
    fn test_non_finite_points_dropped() {
        let cloud = PointCloud::from_points(vec![
            Point3::new(f64::NAN, 0.0, 0.0),
            Point3::new(0.0, f64::INFINITY, 0.0),
            Point3::new(0.2, 0.2, 0.2),
        ]);

        assert_eq!(grid(0.05).apply(&cloud).len(), 1);
    }

    #[test]
    fn test_empty_cloud() {
        assert!(grid(0.05).apply(&PointCloud::new()).is_empty());
    }

    #[test]
    fn test_invalid_leaf_size_rejected() {
        let config = VoxelGridConfig {
            leaf_size: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            VoxelGrid::new(config),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_min_points_per_voxel() {
        let cloud = PointCloud::from_points(vec![
            Point3::new(0.01, 0.01, 0.01),
            Point3::new(0.02, 0.02, 0.02),
            Point3::new(2.0, 2.0, 2.0),
        ]);
        let filter = VoxelGrid::new(VoxelGridConfig {
            leaf_size: 0.05,
            min_points_per_voxel: 2,
        })
        .unwrap();

        assert_eq!(filter.apply(&cloud).len(), 1);
    }
}
