//! Shared state for thread communication.
//!
//! The SLAM thread is the only writer of the pose graph, the status and the
//! map. The broadcast thread and the binary read them.
//!
//! ```text
//! SLAM thread ──write──► SharedState ◄──read── broadcast thread
//!                          │ graph: SharedGraph (RwLock)
//!                          │ status: RwLock<SlamStatus>
//!                          │ map: RwLock<Option<Arc<RefinedMap>>>
//!                          └ transforms: TransformBuffer
//! ```

use std::sync::Arc;

use parking_lot::RwLock;

use crate::core::types::Pose6DOF;
use crate::engine::graph::PoseGraph;
use crate::engine::slam::{RefinedMap, SharedGraph, SlamStatus};
use crate::io::frames::TransformBuffer;

/// State shared across threads.
#[derive(Debug)]
pub struct SharedState {
    /// Pose graph, written by the pipeline.
    pub graph: SharedGraph,

    /// Latest pipeline counters.
    pub status: RwLock<SlamStatus>,

    /// Latest ICP odometry pose.
    pub odometry_pose: RwLock<Option<Pose6DOF>>,

    /// Map from the last successful optimization.
    pub map: RwLock<Option<Arc<RefinedMap>>>,

    /// Published transforms.
    pub transforms: TransformBuffer,
}

impl SharedState {
    /// Create state around an existing graph handle.
    pub fn new(graph: SharedGraph) -> Self {
        Self {
            graph,
            status: RwLock::new(SlamStatus::default()),
            odometry_pose: RwLock::new(None),
            map: RwLock::new(None),
            transforms: TransformBuffer::new(),
        }
    }

    /// Replace the status snapshot.
    pub fn update_status(&self, status: SlamStatus) {
        *self.status.write() = status;
    }

    /// Replace the map.
    pub fn update_map(&self, map: Arc<RefinedMap>) {
        *self.map.write() = Some(map);
    }

    /// Copy of the latest status.
    pub fn status(&self) -> SlamStatus {
        self.status.read().clone()
    }

    /// Latest map, if any optimization has succeeded.
    pub fn map(&self) -> Option<Arc<RefinedMap>> {
        self.map.read().clone()
    }
}

/// Thread-safe handle to the shared state.
pub type SharedStateHandle = Arc<SharedState>;

/// Create shared state with an empty graph.
pub fn create_shared_state(information_epsilon: f64) -> SharedStateHandle {
    let graph = Arc::new(RwLock::new(PoseGraph::with_information_epsilon(information_epsilon)));
    Arc::new(SharedState::new(graph))
}
