//! Core algorithms layer.
//!
//! - [`matching`]: 3D scan registration (generalized ICP, point-to-point ICP)

pub mod matching;
