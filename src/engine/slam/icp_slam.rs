//! ICP SLAM pipeline.
//!
//! Wires the odometry front end to the pose graph back end:
//!
//! ```text
//! reference pose ──► IcpOdometer ──(first)──► vertex 0 (fixed)
//!
//! cloud ──► IcpOdometer ──► increment ──► pending += increment
//!                                            │ |t| ≥ min_motion or |θ| ≥ min_rotation
//!                                            ▼
//!                         vertex = prev vertex ⊕ pending (+ scan)
//!                         odometry edge, reference edge
//!                                            │
//!                               loop closure? / every N vertices
//!                                            ▼
//!                         solve (read lock) ► commit (write lock)
//!                                            ▼
//!                                      rebuild map
//! ```

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::map_refiner::{RefinedMap, rebuild_map};
use crate::algorithms::matching::{DynMatcher, ScanMatcher};
use crate::config::SlamConfig;
use crate::core::types::{PointCloud, Pose6DOF, Timestamped};
use crate::engine::graph::{
    DEFAULT_INFORMATION_EPSILON, EdgeType, GraphOptimizer, LoopDetector, OptimizationResult,
    PoseGraph,
};
use crate::engine::odometry::{CloudUpdate, IcpOdometer, ReferenceUpdate, Registration};
use crate::error::{Error, Result};
use crate::io::frames::FrameNames;
use crate::io::messages::{CloudMessage, OdometryMessage, SlamOutput};

/// Pose graph shared between the pipeline and its readers.
pub type SharedGraph = Arc<RwLock<PoseGraph>>;

/// Pose graph construction policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Optimize after this many new vertices. 0 disables periodic runs;
    /// loop closures still trigger optimization.
    pub optimize_every: usize,

    /// Diagonal loading applied before inverting edge covariances.
    pub information_epsilon: f64,

    /// Add an edge carrying the external pose source's relative motion.
    pub use_reference_edges: bool,

    /// Every n-th vertex keeps its scan. 1 makes every vertex a keyframe.
    pub keyframe_stride: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            optimize_every: 10,
            information_epsilon: DEFAULT_INFORMATION_EPSILON,
            use_reference_edges: true,
            keyframe_stride: 1,
        }
    }
}

impl GraphConfig {
    pub fn validate(&self) -> Result<()> {
        if self.keyframe_stride == 0 {
            return Err(Error::InvalidParameter("keyframe_stride must be at least 1".into()));
        }
        if !(self.information_epsilon > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "information_epsilon must be positive, got {}",
                self.information_epsilon
            )));
        }
        Ok(())
    }
}

/// Running counters for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SlamStatus {
    /// A reference pose has been received.
    pub initialized: bool,
    /// Clouds fed to the pipeline.
    pub clouds_processed: u64,
    /// Converged registrations.
    pub registrations: u64,
    /// Rejected registrations.
    pub registration_failures: u64,
    /// Graph vertices.
    pub vertices: usize,
    /// Graph edges.
    pub edges: usize,
    /// Vertices owning a scan.
    pub keyframes: usize,
    /// Loop-closure edges.
    pub loop_closures: usize,
    /// Successful optimizations.
    pub optimizations: u64,
    /// Failed optimizations.
    pub optimization_failures: u64,
    /// Fitness of the last converged registration.
    pub last_fitness: f64,
}

/// Lidar SLAM: ICP odometry, pose graph, loop closure and map refinement.
pub struct IcpSlam<M: ScanMatcher = DynMatcher> {
    frames: FrameNames,
    graph_config: GraphConfig,
    verbosity: u8,

    odometer: IcpOdometer<M>,
    loop_detector: LoopDetector,
    optimizer: GraphOptimizer,
    graph: SharedGraph,

    /// Motion integrated since the newest vertex.
    pending: Pose6DOF,
    /// Reference pose at the time the newest vertex was added.
    reference_at_vertex: Option<Pose6DOF>,
    vertices_since_optimization: usize,

    map: Option<Arc<RefinedMap>>,
    status: SlamStatus,
}

impl IcpSlam<DynMatcher> {
    /// Create a pipeline with its own graph and the configured matcher.
    pub fn new(config: &SlamConfig) -> Result<Self> {
        let graph = Arc::new(RwLock::new(PoseGraph::with_information_epsilon(
            config.graph.information_epsilon,
        )));
        Self::with_graph(config, DynMatcher::new(&config.matcher), graph)
    }
}

impl<M: ScanMatcher> IcpSlam<M> {
    /// Create a pipeline writing into an existing graph handle.
    pub fn with_graph(config: &SlamConfig, matcher: M, graph: SharedGraph) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            frames: config.frames.clone(),
            graph_config: config.graph,
            verbosity: config.verbosity,
            odometer: IcpOdometer::new(
                config.odometry,
                config.preprocessing,
                matcher,
                &config.frames.odom,
            )?,
            loop_detector: LoopDetector::new(config.loop_closure)?,
            optimizer: GraphOptimizer::new(config.optimizer),
            graph,
            pending: Pose6DOF::identity(),
            reference_at_vertex: None,
            vertices_since_optimization: 0,
            map: None,
            status: SlamStatus::default(),
        })
    }

    /// Graph handle.
    pub fn graph(&self) -> &SharedGraph {
        &self.graph
    }

    /// Odometry front end.
    pub fn odometer(&self) -> &IcpOdometer<M> {
        &self.odometer
    }

    /// Map from the last successful optimization.
    pub fn map(&self) -> Option<&Arc<RefinedMap>> {
        self.map.as_ref()
    }

    /// Pose of vertex 0.
    pub fn start_pose(&self) -> Option<Pose6DOF> {
        self.graph.read().start_pose().copied()
    }

    /// Feed an external reference pose.
    pub fn handle_reference_pose(&mut self, pose: Pose6DOF) -> Vec<SlamOutput> {
        let mut outputs = Vec::new();

        match self.odometer.handle_reference_pose(pose) {
            ReferenceUpdate::Initialized(initial) => {
                self.status.initialized = true;
                self.reference_at_vertex = Some(initial);

                let mut graph = self.graph.write();
                if graph.is_empty() {
                    let scan = self.odometer.previous_cloud().map(|c| c.data.clone());
                    let id = graph.add_vertex(initial, scan);
                    if let Err(e) = graph.set_odometry_pose(id, initial) {
                        log::warn!("{}", e);
                    }
                    outputs.push(SlamOutput::Graph(graph.snapshot()));
                }
                outputs.push(SlamOutput::ReferencePath(self.odometer.reference_path().clone()));
            }
            ReferenceUpdate::Recorded(_) => {
                outputs.push(SlamOutput::ReferencePath(self.odometer.reference_path().clone()));
            }
            ReferenceUpdate::Discarded { .. } => {}
        }

        outputs
    }

    /// Feed a raw cloud.
    pub fn handle_cloud(&mut self, cloud: &Timestamped<PointCloud>) -> Vec<SlamOutput> {
        self.status.clouds_processed += 1;
        let mut outputs = Vec::new();

        match self.odometer.handle_cloud(cloud) {
            CloudUpdate::AwaitingInitialization | CloudUpdate::NoReference => {}
            CloudUpdate::RegistrationFailed(_) => {
                self.status.registration_failures += 1;
            }
            CloudUpdate::Integrated(registration) => {
                self.status.registrations += 1;
                self.status.last_fitness = registration.fitness;
                if let Err(e) = self.on_registration(*registration, &mut outputs) {
                    log::warn!("Graph update failed: {}", e);
                }
            }
        }

        outputs
    }

    fn on_registration(&mut self, registration: Registration, outputs: &mut Vec<SlamOutput>) -> Result<()> {
        let pose = registration.pose;
        outputs.push(SlamOutput::Odometry(OdometryMessage {
            frame_id: self.frames.odom.clone(),
            child_frame_id: self.frames.robot.clone(),
            pose,
        }));

        if self.verbosity >= 2 {
            log::info!(
                "ICP odometry: ({:.3}, {:.3}, {:.3}) fitness {:.5}",
                pose.position.x,
                pose.position.y,
                pose.position.z,
                registration.fitness
            );
        }

        if self.verbosity >= 1 {
            let aligned = registration.previous_cloud.transformed(&registration.alignment);
            outputs.push(SlamOutput::PreviousCloud(CloudMessage {
                frame_id: self.frames.sensor.clone(),
                timestamp_us: pose.timestamp_us,
                cloud: registration.previous_cloud,
            }));
            outputs.push(SlamOutput::AlignedCloud(CloudMessage {
                frame_id: self.frames.sensor.clone(),
                timestamp_us: pose.timestamp_us,
                cloud: aligned,
            }));
            outputs.push(SlamOutput::IcpPath(self.odometer.trajectory().clone()));
        }

        self.pending = self.pending.compose(&registration.increment);
        let gating = self.odometer.config();
        if self.pending.position.norm() < gating.min_motion
            && self.pending.orientation.angle() < gating.min_rotation
        {
            return Ok(());
        }

        self.add_odometry_vertex(&pose)?;

        let closed = self.close_loop()?;
        let periodic = self.graph_config.optimize_every > 0
            && self.vertices_since_optimization >= self.graph_config.optimize_every;

        if closed || periodic {
            self.vertices_since_optimization = 0;
            match self.optimize() {
                Ok(_) => {
                    if let Some(map) = &self.map {
                        outputs.push(SlamOutput::Map(Arc::clone(map)));
                    }
                }
                Err(e) => log::warn!("{}", e),
            }
        }

        outputs.push(SlamOutput::Graph(self.graph.read().snapshot()));
        Ok(())
    }

    /// Append a vertex at the previous vertex estimate composed with the
    /// pending increment, linked by odometry and reference edges.
    fn add_odometry_vertex(&mut self, odometry_pose: &Pose6DOF) -> Result<u64> {
        let timestamp_us = odometry_pose.timestamp_us;
        let pending = self.pending.with_timestamp(timestamp_us);
        let scan = self.odometer.previous_cloud().map(|c| c.data.clone());
        let latest_reference = self.odometer.latest_reference_pose().copied();

        let mut graph = self.graph.write();
        let previous = graph.latest_vertex().ok_or(Error::MissingVertex(0))?;
        let (previous_id, previous_pose) = (previous.id, previous.pose);

        let id = graph.vertex_count() as u64;
        let keyframe_scan = scan.filter(|_| id % self.graph_config.keyframe_stride as u64 == 0);
        let estimate = previous_pose.compose(&pending).with_timestamp(timestamp_us);
        graph.add_vertex(estimate, keyframe_scan);
        graph.set_odometry_pose(id, *odometry_pose)?;
        graph.add_edge(&pending, previous_id, id)?;

        if self.graph_config.use_reference_edges {
            if let (Some(before), Some(after)) = (self.reference_at_vertex, latest_reference) {
                if before != after {
                    let relative = before
                        .between(&after)
                        .with_covariance(after.covariance)
                        .with_timestamp(timestamp_us);
                    graph.add_measured_edge(&relative, previous_id, id, EdgeType::Reference)?;
                }
            }
        }

        self.reference_at_vertex = latest_reference;
        self.pending = Pose6DOF::identity();
        self.vertices_since_optimization += 1;

        log::debug!(
            "Vertex {} at ({:.3}, {:.3}, {:.3})",
            id,
            estimate.position.x,
            estimate.position.y,
            estimate.position.z
        );
        Ok(id)
    }

    /// Search for and insert a loop closure for the newest vertex.
    fn close_loop(&mut self) -> Result<bool> {
        let closure = {
            let graph = self.graph.read();
            self.loop_detector.detect(&graph)
        };
        let Some(closure) = closure else {
            return Ok(false);
        };

        self.graph
            .write()
            .add_loop_closure_edge(&closure.measurement, closure.from, closure.to)?;
        Ok(true)
    }

    /// Optimize the graph and rebuild the map.
    ///
    /// Solves on a read snapshot and commits under a short write lock.
    pub fn optimize(&mut self) -> Result<OptimizationResult> {
        let solution = {
            let graph = self.graph.read();
            self.optimizer.solve(&graph)
        };

        let solution = match solution {
            Ok(solution) => solution,
            Err(e) => {
                self.status.optimization_failures += 1;
                return Err(e);
            }
        };

        self.graph.write().commit_estimates(&solution.estimates)?;
        self.status.optimizations += 1;

        let map = rebuild_map(&self.graph.read());
        self.map = Some(Arc::new(map));

        log::info!(
            "Optimized graph: {} iterations, chi2 {:.4} -> {:.4}",
            solution.result.iterations,
            solution.result.initial_error,
            solution.result.final_error
        );
        Ok(solution.result)
    }

    /// Current counters.
    pub fn status(&self) -> SlamStatus {
        let graph = self.graph.read();
        SlamStatus {
            vertices: graph.vertex_count(),
            edges: graph.edge_count(),
            keyframes: graph.keyframe_count(),
            loop_closures: graph.loop_closure_count(),
            ..self.status.clone()
        }
    }

    /// Latest ICP odometry pose.
    pub fn current_pose(&self) -> Option<Pose6DOF> {
        self.odometer.latest_pose().copied()
    }
}
