//! Thread management for the SLAM node.
//!
//! Two threads:
//! - `SlamThread`: event-driven processing of reference poses and clouds
//! - `BroadcastThread`: fixed-rate `map → odom` publication

mod broadcast_thread;
mod slam_thread;

pub use broadcast_thread::{BroadcastConfig, BroadcastThread, map_to_odom};
pub use slam_thread::{SlamInputs, SlamThread, SlamThreadConfig};
