//! Cloud preprocessing.
//!
//! Raw lidar clouds are reduced before registration so the per-cycle cost of
//! scan matching stays bounded:
//!
//! ```text
//! raw PointCloud → VoxelGrid → downsampled PointCloud → ScanMatcher
//! ```

mod voxel_grid;

pub use voxel_grid::{VoxelGrid, VoxelGridConfig};
