//! SLAM Thread - sensor processing.
//!
//! This thread:
//! - Receives reference poses and clouds on two channels
//! - Drives the SLAM engine with each sample in arrival order
//! - Publishes `odom → robot` into the shared transform buffer
//! - Updates SharedState with status, odometry pose and map
//! - Forwards every output message to an optional consumer
//!
//! Both streams are waited on with `crossbeam_channel::select!`; a short
//! timeout lets the loop observe the shutdown flag. The thread exits when the
//! flag clears or when an input channel disconnects.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, select};

use crate::core::types::{PointCloud, Pose6DOF, Timestamped};
use crate::engine::slam::SlamEngine;
use crate::io::frames::{FrameNames, StampedTransform, TransformBroadcaster};
use crate::io::messages::SlamOutput;
use crate::state::SharedStateHandle;

/// Configuration for the SLAM thread.
#[derive(Debug, Clone)]
pub struct SlamThreadConfig {
    /// Frame labels used for the odometry transform.
    pub frames: FrameNames,
    /// How long to wait for input before re-checking the shutdown flag.
    pub idle_timeout: Duration,
}

impl Default for SlamThreadConfig {
    fn default() -> Self {
        Self {
            frames: FrameNames::default(),
            idle_timeout: Duration::from_millis(10),
        }
    }
}

/// Input channels of the SLAM thread.
pub struct SlamInputs {
    pub reference_rx: Receiver<Pose6DOF>,
    pub cloud_rx: Receiver<Timestamped<PointCloud>>,
}

/// SLAM Thread handle.
pub struct SlamThread {
    handle: JoinHandle<()>,
}

impl SlamThread {
    /// Spawn the SLAM thread.
    pub fn spawn(
        config: SlamThreadConfig,
        engine: Box<dyn SlamEngine>,
        shared_state: SharedStateHandle,
        inputs: SlamInputs,
        output_tx: Option<Sender<SlamOutput>>,
        running: Arc<AtomicBool>,
    ) -> Self {
        let handle = thread::Builder::new()
            .name("slam".into())
            .spawn(move || {
                let mut context = SlamContext::new(config.frames, engine, shared_state, output_tx);
                run_slam_loop(&mut context, inputs, config.idle_timeout, running);
            })
            .expect("Failed to spawn SLAM thread");

        Self { handle }
    }

    /// Wait for thread to finish.
    pub fn join(self) -> thread::Result<()> {
        self.handle.join()
    }
}

fn run_slam_loop(
    context: &mut SlamContext,
    inputs: SlamInputs,
    idle_timeout: Duration,
    running: Arc<AtomicBool>,
) {
    log::info!("SLAM thread starting");

    while running.load(Ordering::Relaxed) {
        select! {
            recv(inputs.reference_rx) -> result => match result {
                Ok(pose) => context.process_reference_pose(pose),
                Err(_) => {
                    log::info!("Reference stream closed");
                    break;
                }
            },
            recv(inputs.cloud_rx) -> result => match result {
                Ok(cloud) => context.process_cloud(&cloud),
                Err(_) => {
                    log::info!("Cloud stream closed");
                    break;
                }
            },
            default(idle_timeout) => {}
        }
    }

    let status = context.shared_state.status();
    log::info!(
        "SLAM thread shutdown complete ({} clouds, {} vertices, {} loop closures)",
        status.clouds_processed,
        status.vertices,
        status.loop_closures
    );
}

/// Engine plus the sinks its outputs are routed to.
struct SlamContext {
    frames: FrameNames,
    engine: Box<dyn SlamEngine>,
    shared_state: SharedStateHandle,
    output_tx: Option<Sender<SlamOutput>>,
}

impl SlamContext {
    fn new(
        frames: FrameNames,
        engine: Box<dyn SlamEngine>,
        shared_state: SharedStateHandle,
        output_tx: Option<Sender<SlamOutput>>,
    ) -> Self {
        Self {
            frames,
            engine,
            shared_state,
            output_tx,
        }
    }

    fn process_reference_pose(&mut self, pose: Pose6DOF) {
        let outputs = self.engine.process_reference_pose(pose);
        self.publish(outputs);
    }

    fn process_cloud(&mut self, cloud: &Timestamped<PointCloud>) {
        let outputs = self.engine.process_cloud(cloud);
        self.publish(outputs);
    }

    fn publish(&mut self, outputs: Vec<SlamOutput>) {
        for output in outputs {
            match &output {
                SlamOutput::Odometry(odometry) => {
                    self.shared_state.transforms.send_transform(StampedTransform::from_pose(
                        &self.frames.odom,
                        &self.frames.robot,
                        &odometry.pose,
                    ));
                    *self.shared_state.odometry_pose.write() = Some(odometry.pose);
                }
                SlamOutput::Map(map) => {
                    log::info!("Map rebuilt: {} points from {} keyframes", map.len(), map.keyframes.len());
                    self.shared_state.update_map(Arc::clone(map));
                }
                _ => {}
            }

            if let Some(tx) = &self.output_tx {
                if tx.send(output).is_err() {
                    log::debug!("Output consumer gone, dropping further outputs");
                    self.output_tx = None;
                }
            }
        }

        self.shared_state.update_status(self.engine.status());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::matching::DynMatcher;
    use crate::algorithms::matching::test_utils::create_room;
    use crate::config::SlamConfig;
    use crate::engine::slam::IcpSlam;
    use crate::io::frames::TransformLookup;
    use crate::state::create_shared_state;
    use crossbeam_channel::{bounded, unbounded};

    fn context(output_tx: Option<Sender<SlamOutput>>) -> SlamContext {
        let config = SlamConfig::default();
        let shared = create_shared_state(config.graph.information_epsilon);
        let engine = IcpSlam::with_graph(
            &config,
            DynMatcher::new(&config.matcher),
            Arc::clone(&shared.graph),
        )
        .unwrap();
        SlamContext::new(config.frames, Box::new(engine), shared, output_tx)
    }

    #[test]
    fn test_odometry_output_publishes_transform() {
        let mut context = context(None);
        context.process_cloud(&Timestamped::new(create_room(0.25), 0));
        context.process_reference_pose(Pose6DOF::from_translation(1.0, 0.0, 0.0));
        context.process_cloud(&Timestamped::new(create_room(0.25), 100_000));

        let state = &context.shared_state;
        let odom_to_robot = state.transforms.lookup("odom", "base_link").unwrap();
        assert!((odom_to_robot.translation.vector.x - 1.0).abs() < 1e-3);
        assert!(state.odometry_pose.read().is_some());

        let status = state.status();
        assert!(status.initialized);
        assert_eq!(status.clouds_processed, 2);
        assert_eq!(status.vertices, 1);
    }

    #[test]
    fn test_outputs_forwarded_until_consumer_drops() {
        let (tx, rx) = unbounded();
        let mut context = context(Some(tx));

        context.process_reference_pose(Pose6DOF::identity());
        assert!(rx.try_iter().count() > 0);

        drop(rx);
        context.process_reference_pose(Pose6DOF::from_translation(0.5, 0.0, 0.0));
        assert!(context.output_tx.is_none());
    }

    #[test]
    fn test_thread_exits_when_inputs_close() {
        let config = SlamConfig::default();
        let shared = create_shared_state(config.graph.information_epsilon);
        let engine = IcpSlam::with_graph(
            &config,
            DynMatcher::new(&config.matcher),
            Arc::clone(&shared.graph),
        )
        .unwrap();

        let (reference_tx, reference_rx) = bounded(4);
        let (cloud_tx, cloud_rx) = bounded(4);
        let running = Arc::new(AtomicBool::new(true));

        let thread = SlamThread::spawn(
            SlamThreadConfig::default(),
            Box::new(engine),
            Arc::clone(&shared),
            SlamInputs { reference_rx, cloud_rx },
            None,
            Arc::clone(&running),
        );

        reference_tx.send(Pose6DOF::identity()).unwrap();
        for _ in 0..500 {
            if shared.status().initialized {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        drop(reference_tx);
        drop(cloud_tx);

        thread.join().unwrap();
        assert_eq!(shared.graph.read().vertex_count(), 1);
    }
}
