//! 3D point cloud type.

use nalgebra::{Isometry3, Point3};
use serde::{Deserialize, Serialize};

/// Ordered collection of 3D points in meters.
///
/// Clouds are treated as values: transforms return new clouds and the
/// registration code only ever borrows them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointCloud {
    /// Points in the cloud's own frame
    pub points: Vec<Point3<f64>>,
}

impl PointCloud {
    /// Create an empty cloud.
    pub fn new() -> Self {
        Self { points: Vec::new() }
    }

    /// Create an empty cloud with preallocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            points: Vec::with_capacity(capacity),
        }
    }

    /// Wrap an existing point vector.
    pub fn from_points(points: Vec<Point3<f64>>) -> Self {
        Self { points }
    }

    /// Number of points.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True if the cloud has no points.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Append a point.
    #[inline]
    pub fn push(&mut self, point: Point3<f64>) {
        self.points.push(point);
    }

    /// Iterate over points.
    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, Point3<f64>> {
        self.points.iter()
    }

    /// Append all points of another cloud.
    pub fn extend_from(&mut self, other: &PointCloud) {
        self.points.extend_from_slice(&other.points);
    }

    /// Copy of this cloud with every point transformed.
    pub fn transformed(&self, transform: &Isometry3<f64>) -> PointCloud {
        PointCloud {
            points: self.points.iter().map(|p| transform * p).collect(),
        }
    }

    /// Axis-aligned bounds as (min, max), `None` for an empty cloud.
    pub fn bounds(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        let first = self.points.first()?;
        let (mut min, mut max) = (*first, *first);
        for p in &self.points[1..] {
            min = min.inf(p);
            max = max.sup(p);
        }
        Some((min, max))
    }
}

impl FromIterator<Point3<f64>> for PointCloud {
    fn from_iter<I: IntoIterator<Item = Point3<f64>>>(iter: I) -> Self {
        Self {
            points: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a PointCloud {
    type Item = &'a Point3<f64>;
    type IntoIter = std::slice::Iter<'a, Point3<f64>>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_transformed_leaves_source_untouched() {
        let cloud = PointCloud::from_points(vec![Point3::new(1.0, 0.0, 0.0)]);
        let iso = Isometry3::translation(0.0, 0.0, 2.0);
        let moved = cloud.transformed(&iso);

        assert_relative_eq!(moved.points[0], Point3::new(1.0, 0.0, 2.0), epsilon = 1e-12);
        assert_relative_eq!(cloud.points[0], Point3::new(1.0, 0.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_bounds() {
        let cloud: PointCloud = vec![Point3::new(-1.0, 2.0, 0.5), Point3::new(3.0, -2.0, 0.0)]
            .into_iter()
            .collect();
        let (min, max) = cloud.bounds().unwrap();

        assert_relative_eq!(min, Point3::new(-1.0, -2.0, 0.0));
        assert_relative_eq!(max, Point3::new(3.0, 2.0, 0.5));
    }
}
