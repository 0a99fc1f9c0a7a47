//! ICP odometry front end.
//!
//! Consumes two independent streams:
//!
//! - **Reference poses** from an external estimator (wheel/IMU filter). The
//!   first sample initializes odometry and seeds the ICP trajectory; later
//!   samples are recorded on their own path when they moved far enough.
//! - **Point clouds**. Each cloud is voxel-filtered and registered against
//!   the previous filtered cloud. A converged registration is turned into a
//!   motion increment and composed onto the last ICP pose.
//!
//! ```text
//! cloud_k ──► VoxelGrid ──► match(prev → cur) ──► T_align
//!                                                   │ inverse
//!                                                   ▼
//!                         pose_k = pose_{k-1} ⊕ increment
//! ```
//!
//! The previous-cloud reference always advances to the newest filtered
//! cloud, whether or not registration ran or succeeded.

use nalgebra::{Isometry3, Matrix6, Vector6};
use serde::{Deserialize, Serialize};

use crate::algorithms::matching::{DynMatcher, ScanMatcher};
use crate::core::types::{PointCloud, Pose6DOF, Timestamped, Trajectory};
use crate::error::{Error, Result};
use crate::sensors::preprocessing::{VoxelGrid, VoxelGridConfig};

/// Configuration for the odometry front end.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OdometerConfig {
    /// Minimum travel between recorded reference samples (meters).
    ///
    /// The same threshold gates graph vertex creation.
    /// Default: 0.1
    pub min_motion: f64,

    /// Rotation that also triggers a new graph vertex (radians), so turning
    /// in place is still recorded.
    /// Default: 0.2
    pub min_rotation: f64,

    /// Standard deviation floor added to every increment's translation (m).
    pub increment_translation_sigma: f64,

    /// Standard deviation floor added to every increment's rotation (rad).
    pub increment_rotation_sigma: f64,
}

impl Default for OdometerConfig {
    fn default() -> Self {
        Self {
            min_motion: 0.1,
            min_rotation: 0.2,
            increment_translation_sigma: 0.01, // 1cm
            increment_rotation_sigma: 0.005,   // ~0.3°
        }
    }
}

impl OdometerConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.min_motion >= 0.0) {
            return Err(Error::InvalidParameter(format!(
                "min_motion must be non-negative, got {}",
                self.min_motion
            )));
        }
        if !(self.min_rotation > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "min_rotation must be positive, got {}",
                self.min_rotation
            )));
        }
        if !(self.increment_translation_sigma >= 0.0 && self.increment_rotation_sigma >= 0.0) {
            return Err(Error::InvalidParameter(
                "increment sigmas must be non-negative".into(),
            ));
        }
        Ok(())
    }

    /// Diagonal covariance floor for one increment.
    fn increment_floor(&self) -> Matrix6<f64> {
        let t = self.increment_translation_sigma.powi(2);
        let r = self.increment_rotation_sigma.powi(2);
        Matrix6::from_diagonal(&Vector6::new(t, t, t, r, r, r))
    }
}

/// Outcome of feeding one reference pose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReferenceUpdate {
    /// First sample: odometry initialized and seeded with this pose.
    Initialized(Pose6DOF),
    /// Sample moved at least `min_motion` and was recorded.
    Recorded(Pose6DOF),
    /// Sample was too close to the last recorded one.
    Discarded { distance: f64 },
}

/// Successful registration of the newest cloud.
#[derive(Debug, Clone)]
pub struct Registration {
    /// New ICP odometry pose.
    pub pose: Pose6DOF,
    /// Motion of the robot between the two clouds.
    pub increment: Pose6DOF,
    /// Transform aligning the previous cloud onto the current cloud.
    pub alignment: Isometry3<f64>,
    /// Mean squared correspondence distance.
    pub fitness: f64,
    /// Matcher iterations.
    pub iterations: u32,
    /// The previous filtered cloud that was registered.
    pub previous_cloud: PointCloud,
}

/// Outcome of feeding one cloud.
#[derive(Debug)]
pub enum CloudUpdate {
    /// Odometry not yet initialized by a reference pose.
    AwaitingInitialization,
    /// No previous cloud to register against.
    NoReference,
    /// Registration converged and the pose advanced.
    Integrated(Box<Registration>),
    /// Registration failed; pose unchanged.
    RegistrationFailed(Error),
}

/// ICP odometry estimator.
pub struct IcpOdometer<M: ScanMatcher = DynMatcher> {
    config: OdometerConfig,
    voxel: VoxelGrid,
    matcher: M,
    previous_cloud: Option<Timestamped<PointCloud>>,
    latest_reference: Option<Pose6DOF>,
    reference_path: Trajectory,
    trajectory: Trajectory,
}

impl<M: ScanMatcher> IcpOdometer<M> {
    /// Create an odometer whose trajectories are expressed in `odom_frame`.
    pub fn new(
        config: OdometerConfig,
        voxel_config: VoxelGridConfig,
        matcher: M,
        odom_frame: &str,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            voxel: VoxelGrid::new(voxel_config)?,
            matcher,
            previous_cloud: None,
            latest_reference: None,
            reference_path: Trajectory::new(odom_frame),
            trajectory: Trajectory::new(odom_frame),
        })
    }

    /// Get the current configuration.
    pub fn config(&self) -> &OdometerConfig {
        &self.config
    }

    /// True once a reference pose has been observed.
    #[inline]
    pub fn is_initialized(&self) -> bool {
        !self.trajectory.is_empty()
    }

    /// Feed an external reference pose.
    pub fn handle_reference_pose(&mut self, pose: Pose6DOF) -> ReferenceUpdate {
        self.latest_reference = Some(pose);

        let Some(last) = self.reference_path.last() else {
            self.reference_path.push(pose);
            if self.trajectory.is_empty() {
                self.trajectory.push(pose);
            }
            log::info!(
                "Odometry initialized at ({:.3}, {:.3}, {:.3})",
                pose.position.x,
                pose.position.y,
                pose.position.z
            );
            return ReferenceUpdate::Initialized(pose);
        };

        let distance = last.distance_to(&pose);
        if distance < self.config.min_motion {
            return ReferenceUpdate::Discarded { distance };
        }

        self.reference_path.push(pose);
        ReferenceUpdate::Recorded(pose)
    }

    /// Feed a raw cloud.
    pub fn handle_cloud(&mut self, cloud: &Timestamped<PointCloud>) -> CloudUpdate {
        let current = self.voxel.apply(&cloud.data);
        let previous = self.previous_cloud.take();

        let update = match previous {
            _ if !self.is_initialized() => CloudUpdate::AwaitingInitialization,
            Some(prev) if !prev.data.is_empty() && !current.is_empty() => {
                self.register(prev.data, &current, cloud.timestamp_us)
            }
            _ => CloudUpdate::NoReference,
        };

        self.previous_cloud = Some(Timestamped::new(current, cloud.timestamp_us));
        update
    }

    fn register(&mut self, previous: PointCloud, current: &PointCloud, timestamp_us: u64) -> CloudUpdate {
        let result = match self
            .matcher
            .match_clouds(&previous, current, &Isometry3::identity())
            .into_result()
        {
            Ok(result) => result,
            Err(e) => {
                log::debug!("{} rejected cloud at {}: {}", self.matcher.name(), timestamp_us, e);
                return CloudUpdate::RegistrationFailed(e);
            }
        };

        let increment = Pose6DOF::from_isometry(&result.transform, timestamp_us)
            .with_covariance(result.covariance + self.config.increment_floor())
            .inverse();
        let pose = self.integrate(&increment, timestamp_us);

        CloudUpdate::Integrated(Box::new(Registration {
            pose,
            increment,
            alignment: result.transform,
            fitness: result.fitness,
            iterations: result.iterations,
            previous_cloud: previous,
        }))
    }

    /// Compose a motion increment onto the last ICP pose.
    ///
    /// ```text
    /// position = prev.position + prev.rotation · t
    /// rotation = normalize(prev.rotation · q)
    /// ```
    /// Starts from the identity pose when no pose has been recorded yet.
    pub fn integrate(&mut self, increment: &Pose6DOF, timestamp_us: u64) -> Pose6DOF {
        let prev = self.trajectory.last().copied().unwrap_or_default();
        let pose = prev.compose(increment).with_timestamp(timestamp_us);
        self.trajectory.push(pose);
        pose
    }

    /// Last ICP odometry pose.
    pub fn latest_pose(&self) -> Option<&Pose6DOF> {
        self.trajectory.last()
    }

    /// Most recent reference pose, recorded or not.
    pub fn latest_reference_pose(&self) -> Option<&Pose6DOF> {
        self.latest_reference.as_ref()
    }

    /// ICP odometry trajectory.
    pub fn trajectory(&self) -> &Trajectory {
        &self.trajectory
    }

    /// Motion-gated reference trajectory.
    pub fn reference_path(&self) -> &Trajectory {
        &self.reference_path
    }

    /// Newest filtered cloud, the reference for the next registration.
    pub fn previous_cloud(&self) -> Option<&Timestamped<PointCloud>> {
        self.previous_cloud.as_ref()
    }

    /// Newest filtered cloud together with the latest ICP pose.
    pub fn latest_cloud(&self) -> Option<(&PointCloud, &Pose6DOF)> {
        Some((&self.previous_cloud.as_ref()?.data, self.trajectory.last()?))
    }
}
