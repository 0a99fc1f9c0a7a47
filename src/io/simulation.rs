//! Synthetic sensor scenario.
//!
//! A robot drives an elliptical loop inside a furnished room. Each step
//! produces a drifting reference pose (wheel/IMU-like) and a lidar cloud
//! observed from the true pose.
//!
//! ```text
//!   ┌───────────────────────────────┐
//!   │        ╭───────────╮          │
//!   │       ╱     ██      ╲    ▄▄   │
//!   │      │      ██       │        │
//!   │       ╲             ╱         │
//!   │  ▄▄    ╰─────●─────╯          │   ● start (origin), heading +x
//!   └───────────────────────────────┘
//! ```

use nalgebra::{Isometry3, Matrix6, Point3, Vector3, Vector6};
use rand::prelude::*;
use rand::rngs::SmallRng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::core::types::{PointCloud, Pose6DOF, Timestamped};
use crate::error::{Error, Result};

/// Noise generator with deterministic seeding.
#[derive(Clone)]
pub struct NoiseGenerator {
    rng: SmallRng,
}

impl NoiseGenerator {
    /// Seed 0 draws from entropy; any other seed is reproducible.
    pub fn new(seed: u64) -> Self {
        let rng = if seed == 0 {
            SmallRng::from_entropy()
        } else {
            SmallRng::seed_from_u64(seed)
        };
        Self { rng }
    }

    /// Zero-mean Gaussian sample.
    #[inline]
    pub fn gaussian(&mut self, stddev: f64) -> f64 {
        if stddev == 0.0 {
            return 0.0;
        }
        let n: f64 = self.rng.sample(StandardNormal);
        n * stddev
    }
}

/// Scenario parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// RNG seed; 0 for non-deterministic runs.
    pub seed: u64,
    /// Cloud (and reference) rate.
    pub rate_hz: f64,
    /// Forward speed along the loop (m/s).
    pub speed: f64,
    /// Loop semi-axes (m).
    pub loop_radius_x: f64,
    pub loop_radius_y: f64,
    /// Grid spacing of sampled surfaces (m).
    pub surface_spacing: f64,
    /// Lidar range (m).
    pub max_range: f64,
    /// Per-axis lidar point noise (m).
    pub point_noise: f64,
    /// Reference heading bias per meter travelled (rad/m).
    pub reference_drift: f64,
    /// Reference per-step translation noise (m).
    pub reference_noise: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            rate_hz: 10.0,
            speed: 0.3,
            loop_radius_x: 2.5,
            loop_radius_y: 1.5,
            surface_spacing: 0.15,
            max_range: 6.0,
            point_noise: 0.003,
            reference_drift: 0.02,
            reference_noise: 0.002,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.rate_hz > 0.0 && self.surface_spacing > 0.0 && self.max_range > 0.0) {
            return Err(Error::InvalidParameter(
                "simulation rate, spacing and range must be positive".into(),
            ));
        }
        if !(self.loop_radius_x > 0.0 && self.loop_radius_y > 0.0) {
            return Err(Error::InvalidParameter("loop radii must be positive".into()));
        }
        Ok(())
    }
}

/// One generated sample.
#[derive(Debug, Clone)]
pub enum SensorSample {
    Reference(Pose6DOF),
    Cloud(Timestamped<PointCloud>),
}

/// Deterministic lidar + reference pose generator.
pub struct Simulation {
    config: SimulationConfig,
    noise: NoiseGenerator,
    world: PointCloud,
    step: u64,
    last_true: Isometry3<f64>,
    reference: Isometry3<f64>,
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let world = build_room(&config);
        log::info!("Simulated room with {} surface points", world.len());

        Ok(Self {
            config,
            noise: NoiseGenerator::new(config.seed),
            world,
            step: 0,
            last_true: Isometry3::identity(),
            reference: Isometry3::identity(),
        })
    }

    /// All surface points in the world frame.
    pub fn world(&self) -> &PointCloud {
        &self.world
    }

    /// Timestamp of the next step.
    pub fn time_us(&self) -> u64 {
        (self.step as f64 * 1e6 / self.config.rate_hz) as u64
    }

    /// Seconds needed to drive the loop once.
    pub fn loop_period_s(&self) -> f64 {
        let (a, b) = (self.config.loop_radius_x, self.config.loop_radius_y);
        // Ramanujan's ellipse perimeter
        let perimeter = std::f64::consts::PI * (3.0 * (a + b) - ((3.0 * a + b) * (a + 3.0 * b)).sqrt());
        perimeter / self.config.speed
    }

    /// Ground-truth robot pose at time `t_s`.
    pub fn true_pose(&self, t_s: f64) -> Isometry3<f64> {
        let (a, b) = (self.config.loop_radius_x, self.config.loop_radius_y);
        let theta = std::f64::consts::TAU * t_s / self.loop_period_s();
        let position = Vector3::new(a * theta.sin(), b * (1.0 - theta.cos()), 0.0);
        let yaw = (b * theta.sin()).atan2(a * theta.cos());
        Isometry3::new(position, Vector3::new(0.0, 0.0, yaw))
    }

    /// Advance one period: a reference pose followed by a cloud.
    pub fn step(&mut self) -> [SensorSample; 2] {
        let timestamp_us = self.time_us();
        let t_s = timestamp_us as f64 * 1e-6;
        let truth = self.true_pose(t_s);

        let reference = self.reference_pose(&truth, timestamp_us);
        let cloud = self.observe(&truth);
        self.step += 1;

        [
            SensorSample::Reference(reference),
            SensorSample::Cloud(Timestamped::new(cloud, timestamp_us)),
        ]
    }

    /// Integrate the true motion with heading bias and noise.
    fn reference_pose(&mut self, truth: &Isometry3<f64>, timestamp_us: u64) -> Pose6DOF {
        let delta = self.last_true.inverse() * truth;
        self.last_true = *truth;

        let travelled = delta.translation.vector.norm();
        let sigma = self.config.reference_noise;
        let noisy = Isometry3::new(
            delta.translation.vector
                + Vector3::new(self.noise.gaussian(sigma), self.noise.gaussian(sigma), 0.0),
            Vector3::new(0.0, 0.0, self.config.reference_drift * travelled),
        ) * Isometry3::rotation(delta.rotation.scaled_axis());
        self.reference *= noisy;

        let t = (sigma.max(1e-3) * (1.0 + self.step as f64).sqrt()).powi(2);
        let r = (self.config.reference_drift.max(1e-3)).powi(2);
        Pose6DOF::from_isometry(&self.reference, timestamp_us)
            .with_covariance(Matrix6::from_diagonal(&Vector6::new(t, t, t, r, r, r)))
    }

    /// World points within range, in the robot frame, with noise.
    fn observe(&mut self, truth: &Isometry3<f64>) -> PointCloud {
        let to_robot = truth.inverse();
        let max_sq = self.config.max_range * self.config.max_range;
        let sigma = self.config.point_noise;

        let mut cloud = PointCloud::with_capacity(self.world.len());
        for p in self.world.iter() {
            let local = to_robot * p;
            if local.coords.norm_squared() > max_sq {
                continue;
            }
            cloud.push(Point3::new(
                local.x + self.noise.gaussian(sigma),
                local.y + self.noise.gaussian(sigma),
                local.z + self.noise.gaussian(sigma),
            ));
        }
        cloud
    }
}

/// Axis-aligned rectangle sampled on a grid.
fn add_rectangle(cloud: &mut PointCloud, origin: Vector3<f64>, u: Vector3<f64>, v: Vector3<f64>, spacing: f64) {
    let nu = (u.norm() / spacing).ceil() as usize;
    let nv = (v.norm() / spacing).ceil() as usize;
    for i in 0..=nu {
        for j in 0..=nv {
            let p = origin + u * (i as f64 / nu as f64) + v * (j as f64 / nv as f64);
            cloud.push(Point3::from(p));
        }
    }
}

/// Vertical box (four sides and a top).
fn add_box(cloud: &mut PointCloud, min: Vector3<f64>, size: Vector3<f64>, spacing: f64) {
    let (dx, dy, dz) = (Vector3::x() * size.x, Vector3::y() * size.y, Vector3::z() * size.z);
    add_rectangle(cloud, min, dx, dz, spacing);
    add_rectangle(cloud, min + dy, dx, dz, spacing);
    add_rectangle(cloud, min, dy, dz, spacing);
    add_rectangle(cloud, min + dx, dy, dz, spacing);
    add_rectangle(cloud, min + dz, dx, dy, spacing);
}

/// Room enclosing the loop, with furniture to break its symmetry.
fn build_room(config: &SimulationConfig) -> PointCloud {
    let (a, b, s) = (config.loop_radius_x, config.loop_radius_y, config.surface_spacing);
    let margin = 2.0;
    let height = 2.5;
    let min = Vector3::new(-a - margin, -margin, 0.0);
    let size = Vector3::new(2.0 * (a + margin), 2.0 * (b + margin), height);

    let mut cloud = PointCloud::new();
    let (dx, dy, dz) = (Vector3::x() * size.x, Vector3::y() * size.y, Vector3::z() * size.z);
    add_rectangle(&mut cloud, min, dx, dy, s);
    add_rectangle(&mut cloud, min + dz, dx, dy, s);
    add_rectangle(&mut cloud, min, dx, dz, s);
    add_rectangle(&mut cloud, min + dy, dx, dz, s);
    add_rectangle(&mut cloud, min, dy, dz, s);
    add_rectangle(&mut cloud, min + dx, dy, dz, s);

    // Central column and two cabinets
    add_box(&mut cloud, Vector3::new(-0.3, b - 0.3, 0.0), Vector3::new(0.6, 0.6, height), s);
    add_box(&mut cloud, Vector3::new(a + 0.8, -1.5, 0.0), Vector3::new(0.5, 1.0, 1.2), s);
    add_box(&mut cloud, Vector3::new(-a - 1.6, 2.0 * b + 0.5, 0.0), Vector3::new(1.2, 0.4, 0.8), s);

    cloud
}
