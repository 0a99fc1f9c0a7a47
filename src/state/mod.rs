//! State shared between the SLAM and broadcast threads.

mod shared;

pub use shared::{SharedState, SharedStateHandle, create_shared_state};
