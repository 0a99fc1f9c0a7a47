//! Scan matching module.
//!
//! Aligns two 3D point clouds and reports the rigid transform mapping the
//! source cloud onto the target cloud.
//!
//! # Algorithms
//!
//! - [`GeneralizedIcp`]: plane-to-plane ICP with per-point covariances (default)
//! - [`PointToPointIcp`]: classic ICP with closed-form SVD alignment
//! - [`DynMatcher`]: runtime selection between the two
//!
//! # Example
//!
//! ```ignore
//! use icpslam::algorithms::matching::{GeneralizedIcp, IcpConfig, ScanMatcher};
//! use nalgebra::Isometry3;
//!
//! let gicp = GeneralizedIcp::new(IcpConfig::default());
//! let result = gicp.match_clouds(&previous, &current, &Isometry3::identity());
//! if result.converged {
//!     println!("Transform: {:?}", result.transform);
//! }
//! ```

mod dynamic;
mod gicp;
mod icp;
mod icp_common;

#[cfg(test)]
pub(crate) mod test_utils;

pub use dynamic::{DynMatcher, MatcherConfig, MatcherType};
pub use gicp::GeneralizedIcp;
pub use icp::PointToPointIcp;
pub use icp_common::{Correspondence, IcpConfig, SpatialIndex};

use nalgebra::{Isometry3, Matrix6};

use crate::core::types::PointCloud;
use crate::error::{Error, Result};

/// Result of a scan matching operation.
#[derive(Debug, Clone)]
pub struct ScanMatchResult {
    /// Transform mapping source points into the target frame.
    pub transform: Isometry3<f64>,
    /// Covariance of the transform in its local tangent space.
    pub covariance: Matrix6<f64>,
    /// Mean squared distance of final correspondences (lower is better).
    pub fitness: f64,
    /// Whether the algorithm converged.
    pub converged: bool,
    /// Number of iterations performed.
    pub iterations: u32,
    /// Number of correspondences at the final transform.
    pub correspondences: usize,
}

impl ScanMatchResult {
    /// Create a failed result carrying the transform reached so far.
    pub fn failed(transform: Isometry3<f64>, iterations: u32) -> Self {
        Self {
            transform,
            covariance: Matrix6::identity(),
            fitness: f64::MAX,
            converged: false,
            iterations,
            correspondences: 0,
        }
    }

    /// Turn a non-converged result into [`Error::RegistrationFailure`].
    pub fn into_result(self) -> Result<Self> {
        if self.converged {
            Ok(self)
        } else {
            Err(Error::RegistrationFailure {
                iterations: self.iterations,
                fitness: self.fitness,
            })
        }
    }
}

/// Trait for scan matching algorithms.
pub trait ScanMatcher {
    /// Align source cloud to target cloud.
    ///
    /// # Arguments
    ///
    /// * `source` - The cloud to be transformed
    /// * `target` - The reference cloud
    /// * `initial_guess` - Initial estimate of the source → target transform
    ///
    /// Neither input is modified.
    fn match_clouds(
        &self,
        source: &PointCloud,
        target: &PointCloud,
        initial_guess: &Isometry3<f64>,
    ) -> ScanMatchResult;

    /// Name for diagnostics.
    fn name(&self) -> &'static str;
}
