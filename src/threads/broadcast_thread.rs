//! Broadcast Thread - periodic `map → odom` publication.
//!
//! ```text
//!   T(map→odom) = T(map→robot) · T(odom→robot)⁻¹
//!                    │                 │
//!       newest vertex estimate   odometry pose recorded with that vertex
//!                                (transform buffer if none was recorded)
//! ```
//!
//! Runs on a fixed timer and only reads the graph; it never matches scans or
//! optimizes. A failed lookup skips the cycle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use nalgebra::Isometry3;
use serde::{Deserialize, Serialize};

use crate::engine::graph::PoseGraph;
use crate::error::{Error, Result};
use crate::io::frames::{FrameNames, StampedTransform, TransformBroadcaster, TransformLookup};
use crate::state::SharedStateHandle;

/// Broadcast timer settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Publication rate in Hz.
    pub rate_hz: f64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self { rate_hz: 20.0 }
    }
}

impl BroadcastConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.rate_hz > 0.0 && self.rate_hz.is_finite()) {
            return Err(Error::InvalidParameter(format!(
                "broadcast rate_hz must be positive, got {}",
                self.rate_hz
            )));
        }
        Ok(())
    }

    fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.rate_hz)
    }
}

/// Compute the `map → odom` correction.
///
/// Identity while the graph is empty. Both sides of the correction are taken
/// at the newest vertex: its current estimate and the odometry pose recorded
/// when it was added. A vertex without a recorded odometry pose falls back to
/// the live `odom → robot` lookup.
pub fn map_to_odom(
    graph: &PoseGraph,
    transforms: &dyn TransformLookup,
    frames: &FrameNames,
) -> Result<StampedTransform> {
    let Some(vertex) = graph.latest_vertex() else {
        return Ok(StampedTransform::new(&frames.map, &frames.odom, Isometry3::identity(), 0));
    };

    let odom_to_robot = match &vertex.odometry_pose {
        Some(pose) => pose.to_isometry(),
        None => transforms.lookup(&frames.odom, &frames.robot)?,
    };
    let correction = vertex.pose.to_isometry() * odom_to_robot.inverse();

    Ok(StampedTransform::new(
        &frames.map,
        &frames.odom,
        correction,
        vertex.timestamp_us,
    ))
}

/// Broadcast Thread handle.
pub struct BroadcastThread {
    handle: JoinHandle<()>,
}

impl BroadcastThread {
    /// Spawn the broadcast thread.
    pub fn spawn(
        config: BroadcastConfig,
        frames: FrameNames,
        shared_state: SharedStateHandle,
        running: Arc<AtomicBool>,
    ) -> Self {
        let handle = thread::Builder::new()
            .name("broadcast".into())
            .spawn(move || run_broadcast_loop(config, frames, shared_state, running))
            .expect("Failed to spawn broadcast thread");

        Self { handle }
    }

    /// Wait for thread to finish.
    pub fn join(self) -> thread::Result<()> {
        self.handle.join()
    }
}

fn run_broadcast_loop(
    config: BroadcastConfig,
    frames: FrameNames,
    shared_state: SharedStateHandle,
    running: Arc<AtomicBool>,
) {
    log::info!("Broadcast thread starting at {:.1} Hz", config.rate_hz);
    let period = config.period();

    while running.load(Ordering::Relaxed) {
        let cycle_start = Instant::now();

        let correction = {
            let graph = shared_state.graph.read();
            map_to_odom(&graph, &shared_state.transforms, &frames)
        };
        match correction {
            Ok(transform) => shared_state.transforms.send_transform(transform),
            Err(e) => log::debug!("Skipping broadcast cycle: {}", e),
        }

        let elapsed = cycle_start.elapsed();
        if elapsed < period {
            thread::sleep(period - elapsed);
        }
    }

    log::info!("Broadcast thread shutdown complete");
}
