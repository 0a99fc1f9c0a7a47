//! Sensor processing layer.
//!
//! - [`preprocessing`]: voxel downsampling of raw clouds

pub mod preprocessing;
