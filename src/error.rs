//! Error types for icpslam

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// icpslam error types
///
/// Every variant is recoverable: callers log and continue with the next
/// sample, leaving estimator and graph state as it was before the failing call.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Scan registration did not converge
    #[error("Registration failed after {iterations} iterations (fitness {fitness:.6})")]
    RegistrationFailure {
        /// Iterations spent before giving up
        iterations: u32,
        /// Mean squared correspondence distance at termination
        fitness: f64,
    },

    /// Edge references a vertex that is not in the graph
    #[error("Missing vertex reference: {0}")]
    MissingVertex(u64),

    /// Graph optimization performed no iterations
    #[error("Optimization failed: {0}")]
    OptimizationFailure(String),

    /// Transform between two frames is not available
    #[error("Transform from '{source_frame}' to '{target_frame}' unavailable")]
    FrameUnavailable {
        /// Frame the transform should map into
        target_frame: String,
        /// Frame the transform should map from
        source_frame: String,
    },

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration could not be serialized
    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
}
