//! Runtime matcher selection.
//!
//! [`DynMatcher`] wraps the concrete matchers so the odometry front end and
//! loop closure can pick an algorithm from configuration or the command line.

use clap::ValueEnum;
use nalgebra::Isometry3;
use serde::{Deserialize, Serialize};

use super::{GeneralizedIcp, IcpConfig, PointToPointIcp, ScanMatchResult, ScanMatcher};
use crate::core::types::PointCloud;
use crate::error::Result;

/// Available scan matching algorithm types.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatcherType {
    /// Generalized (plane-to-plane) ICP.
    ///
    /// Robust on structured scenes; default.
    #[default]
    Gicp,

    /// Point-to-Point ICP.
    ///
    /// Cheaper per iteration, needs a closer initial guess.
    Icp,
}

impl std::fmt::Display for MatcherType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatcherType::Gicp => write!(f, "gicp"),
            MatcherType::Icp => write!(f, "icp"),
        }
    }
}

/// Matcher selection plus parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Algorithm to run.
    pub algorithm: MatcherType,
    /// Iteration and correspondence parameters.
    pub icp: IcpConfig,
}

impl MatcherConfig {
    pub fn validate(&self) -> Result<()> {
        self.icp.validate()
    }
}

/// Runtime-selected scan matcher.
#[derive(Debug, Clone)]
pub enum DynMatcher {
    Gicp(GeneralizedIcp),
    Icp(PointToPointIcp),
}

impl DynMatcher {
    /// Build the matcher named by the configuration.
    pub fn new(config: &MatcherConfig) -> Self {
        match config.algorithm {
            MatcherType::Gicp => DynMatcher::Gicp(GeneralizedIcp::new(config.icp)),
            MatcherType::Icp => DynMatcher::Icp(PointToPointIcp::new(config.icp)),
        }
    }

    /// Algorithm this matcher runs.
    pub fn matcher_type(&self) -> MatcherType {
        match self {
            DynMatcher::Gicp(_) => MatcherType::Gicp,
            DynMatcher::Icp(_) => MatcherType::Icp,
        }
    }
}

impl ScanMatcher for DynMatcher {
    fn match_clouds(
        &self,
        source: &PointCloud,
        target: &PointCloud,
        initial_guess: &Isometry3<f64>,
    ) -> ScanMatchResult {
        match self {
            DynMatcher::Gicp(m) => m.match_clouds(source, target, initial_guess),
            DynMatcher::Icp(m) => m.match_clouds(source, target, initial_guess),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            DynMatcher::Gicp(m) => m.name(),
            DynMatcher::Icp(m) => m.name(),
        }
    }
}
