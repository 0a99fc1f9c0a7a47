//! Generic timestamp wrapper.

use serde::{Deserialize, Serialize};

/// Sensor sample stamped with its acquisition time.
///
/// Timestamps are microseconds since epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timestamped<T> {
    /// Sample payload
    pub data: T,
    /// Acquisition time in microseconds
    pub timestamp_us: u64,
}

impl<T> Timestamped<T> {
    #[inline]
    pub fn new(data: T, timestamp_us: u64) -> Self {
        Self { data, timestamp_us }
    }

    /// Transform the payload, keeping the stamp.
    #[inline]
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Timestamped<U> {
        Timestamped {
            data: f(self.data),
            timestamp_us: self.timestamp_us,
        }
    }

    /// Borrow the payload, keeping the stamp.
    #[inline]
    pub fn as_ref(&self) -> Timestamped<&T> {
        Timestamped {
            data: &self.data,
            timestamp_us: self.timestamp_us,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::PointCloud;
    use nalgebra::Point3;

    #[test]
    fn test_map_keeps_stamp() {
        let cloud = PointCloud::from_points(vec![Point3::origin(); 4]);
        let counted = Timestamped::new(cloud, 1_500).map(|c| c.len());

        assert_eq!(counted.data, 4);
        assert_eq!(counted.timestamp_us, 1_500);
    }
}
