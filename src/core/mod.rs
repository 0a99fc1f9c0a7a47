//! Core foundation layer.
//!
//! Bottom of the stack, no internal dependencies.
//!
//! - [`types`]: poses, clouds, trajectories
//! - [`math`]: SE(3) exponential/logarithm, adjoints, covariance helpers

pub mod math;
pub mod types;
