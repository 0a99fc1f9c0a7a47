//! Scan-to-scan odometry.
//!
//! [`IcpOdometer`] turns consecutive filtered clouds into an ICP trajectory,
//! anchored by an external reference pose stream.

mod icp_odometer;

pub use icp_odometer::{
    CloudUpdate, IcpOdometer, OdometerConfig, ReferenceUpdate, Registration,
};
