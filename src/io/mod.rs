//! Input/output plumbing.
//!
//! - [`frames`]: frame names and the transform buffer
//! - [`messages`]: output messages published by the pipeline
//! - [`simulation`]: synthetic lidar and reference pose source

pub mod frames;
pub mod messages;
pub mod simulation;

pub use frames::{FrameNames, StampedTransform, TransformBroadcaster, TransformBuffer, TransformLookup};
pub use messages::{CloudMessage, OdometryMessage, SlamOutput};
pub use simulation::{SensorSample, Simulation, SimulationConfig};
