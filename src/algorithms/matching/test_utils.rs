//! Shared test fixtures for the matcher test suites.

use nalgebra::{Isometry3, Point3, Vector3};

use crate::core::types::PointCloud;

/// Closed box room (floor, ceiling, four walls) sampled on a grid.
///
/// Room spans x ∈ [-2, 2], y ∈ [-1.5, 1.5], z ∈ [0, 2.5].
pub fn create_room(spacing: f64) -> PointCloud {
    let (hx, hy, h) = (2.0, 1.5, 2.5);
    let nx = (2.0 * hx / spacing) as usize;
    let ny = (2.0 * hy / spacing) as usize;
    let nz = (h / spacing) as usize;

    let mut cloud = PointCloud::new();

    for i in 0..=nx {
        for j in 0..=ny {
            let x = -hx + i as f64 * spacing;
            let y = -hy + j as f64 * spacing;
            cloud.push(Point3::new(x, y, 0.0));
            cloud.push(Point3::new(x, y, h));
        }
    }
    for i in 0..=nx {
        for l in 1..nz {
            let x = -hx + i as f64 * spacing;
            let z = l as f64 * spacing;
            cloud.push(Point3::new(x, -hy, z));
            cloud.push(Point3::new(x, hy, z));
        }
    }
    for j in 1..ny {
        for l in 1..nz {
            let y = -hy + j as f64 * spacing;
            let z = l as f64 * spacing;
            cloud.push(Point3::new(-hx, y, z));
            cloud.push(Point3::new(hx, y, z));
        }
    }
    cloud
}

/// Square grid on the plane z = 0 with no offsets.
pub fn flat_floor(n: usize, spacing: f64) -> PointCloud {
    (0..n)
        .flat_map(|i| (0..n).map(move |j| (i, j)))
        .map(|(i, j)| Point3::new(i as f64 * spacing, j as f64 * spacing, 0.0))
        .collect()
}

/// Planar motion: translation plus yaw.
pub fn perturbation(x: f64, y: f64, z: f64, yaw: f64) -> Isometry3<f64> {
    Isometry3::new(Vector3::new(x, y, z), Vector3::new(0.0, 0.0, yaw))
}
