//! Configuration loading for icpslam.
//!
//! Every section has defaults, so a file only needs the values it changes:
//!
//! ```toml
//! verbosity = 1
//!
//! [preprocessing]
//! leaf_size = 0.1
//!
//! [matcher]
//! algorithm = "icp"
//!
//! [matcher.icp]
//! max_iterations = 50
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::algorithms::matching::MatcherConfig;
use crate::engine::graph::{GraphOptimizerConfig, LoopDetectorConfig};
use crate::engine::odometry::OdometerConfig;
use crate::engine::slam::GraphConfig;
use crate::error::{Error, Result};
use crate::io::frames::FrameNames;
use crate::io::simulation::SimulationConfig;
use crate::sensors::preprocessing::VoxelGridConfig;
use crate::threads::BroadcastConfig;

/// Files tried, in order, when no path is given.
pub const DEFAULT_CONFIG_PATHS: [&str; 2] = ["icpslam.toml", "/etc/icpslam.toml"];

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlamConfig {
    /// Frame labels.
    pub frames: FrameNames,
    /// Voxel downsampling of incoming clouds.
    pub preprocessing: VoxelGridConfig,
    /// Scan matcher used by odometry.
    pub matcher: MatcherConfig,
    /// Odometry gating and increment noise.
    pub odometry: OdometerConfig,
    /// Pose graph construction policy.
    pub graph: GraphConfig,
    /// Levenberg-Marquardt settings.
    pub optimizer: GraphOptimizerConfig,
    /// Loop-closure search and verification.
    pub loop_closure: LoopDetectorConfig,
    /// `map → odom` publication.
    pub broadcast: BroadcastConfig,
    /// Synthetic scenario driven by the binary.
    pub simulation: SimulationConfig,
    /// 0: quiet, 1: debug outputs, 2: per-integration pose logs.
    pub verbosity: u8,
}

impl SlamConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: SlamConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write configuration as TOML.
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Load from `path` if given, else from the first default path that
    /// exists, else defaults.
    ///
    /// Returns the file actually used. An explicit path that fails to load is
    /// an error; unreadable default paths are skipped.
    pub fn load(path: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = path {
            return Ok((Self::from_file(path)?, Some(path.to_path_buf())));
        }

        for candidate in DEFAULT_CONFIG_PATHS {
            let candidate = Path::new(candidate);
            if !candidate.exists() {
                continue;
            }
            match Self::from_file(candidate) {
                Ok(config) => return Ok((config, Some(candidate.to_path_buf()))),
                Err(e) => log::warn!("Ignoring {}: {}", candidate.display(), e),
            }
        }

        Ok((Self::default(), None))
    }

    /// Check every section.
    pub fn validate(&self) -> Result<()> {
        self.preprocessing.validate()?;
        self.matcher.validate()?;
        self.odometry.validate()?;
        self.graph.validate()?;
        self.optimizer.validate()?;
        self.loop_closure.validate()?;
        self.broadcast.validate()?;
        self.simulation.validate()?;

        for (name, frame) in [
            ("map", &self.frames.map),
            ("odom", &self.frames.odom),
            ("robot", &self.frames.robot),
            ("sensor", &self.frames.sensor),
        ] {
            if frame.is_empty() {
                return Err(Error::InvalidParameter(format!("{} frame name is empty", name)));
            }
        }
        Ok(())
    }
}
