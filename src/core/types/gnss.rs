//! GNSS fix and converted local-frame observation types.

use nalgebra::{Rotation3, Vector3};
use serde::{Deserialize, Serialize};

/// Raw GNSS fix as read from the receiver.
///
/// Position is geodetic (latitude deg, longitude deg, altitude m);
/// heading is a compass course in degrees. `heading_valid` is false when
/// the receiver could not resolve the antenna baseline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GnssFix {
    /// Timestamp in Unix seconds
    pub unix_time: f64,
    /// Receiver fix status (4 = RTK fixed, 0 = invalid)
    pub fix_status: u8,
    /// Latitude (deg), longitude (deg), altitude (m)
    pub lat_lon_alt: Vector3<f64>,
    /// Compass heading in degrees, north-referenced, clockwise
    pub heading_deg: f64,
    /// Whether the heading field is usable
    pub heading_valid: bool,
}

impl GnssFix {
    /// Create a new fix.
    pub fn new(
        unix_time: f64,
        fix_status: u8,
        lat_lon_alt: Vector3<f64>,
        heading_deg: f64,
        heading_valid: bool,
    ) -> Self {
        Self {
            unix_time,
            fix_status,
            lat_lon_alt,
            heading_deg,
            heading_valid,
        }
    }
}

/// Rigid transform in the local planar frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalPose {
    /// Body-to-world rotation
    pub rotation: Rotation3<f64>,
    /// Position in meters (east, north, up)
    pub translation: Vector3<f64>,
}

impl LocalPose {
    /// Create a pose from rotation and translation.
    #[inline]
    pub fn new(rotation: Rotation3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Identity pose at the origin.
    #[inline]
    pub fn identity() -> Self {
        Self {
            rotation: Rotation3::identity(),
            translation: Vector3::zeros(),
        }
    }
}

impl Default for LocalPose {
    fn default() -> Self {
        Self::identity()
    }
}

/// A GNSS fix converted to the local planar frame, ready for the filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GnssObservation {
    /// Timestamp in Unix seconds
    pub time: f64,
    /// Body pose in the local frame (lever arm already applied)
    pub pose: LocalPose,
    /// Whether the pose rotation carries a usable heading
    pub heading_valid: bool,
}

impl GnssObservation {
    /// Create a new observation.
    #[inline]
    pub fn new(time: f64, pose: LocalPose, heading_valid: bool) -> Self {
        Self {
            time,
            pose,
            heading_valid,
        }
    }
}
