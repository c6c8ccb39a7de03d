//! WGS84 to local-planar projection.
//!
//! GNSS fixes arrive as geodetic coordinates plus a compass heading.
//! The projector maps them to a locally tangent east/north/up frame
//! anchored at the first successfully converted fix, applies the RTK
//! antenna lever-arm correction, and encodes the heading as the yaw of
//! a rigid transform.

use nalgebra::{Matrix3, Vector2, Vector3};
use nav_types::{ECEF, WGS84};

use crate::core::math::{compass_to_yaw, DEG2RAD};
use crate::core::so3;
use crate::core::types::{GnssFix, GnssObservation, LocalPose};

/// Configuration for the antenna mounting on the vehicle.
#[derive(Debug, Clone, Copy)]
pub struct AntennaConfig {
    /// Antenna position in the body frame (x forward-right plane), meters
    pub offset: Vector2<f64>,
    /// Installation yaw misalignment of the antenna baseline, degrees
    pub yaw_deg: f64,
}

impl Default for AntennaConfig {
    fn default() -> Self {
        Self {
            offset: Vector2::zeros(),
            yaw_deg: 0.0,
        }
    }
}

/// Projects raw GNSS fixes into the local planar frame.
///
/// The first fix that converts successfully pins the tangent point; all
/// later fixes are expressed relative to it. Conversion fails (returns
/// `None`) for non-finite or out-of-range latitude/longitude.
#[derive(Debug, Clone)]
pub struct GeoProjector {
    antenna: AntennaConfig,
    reference: Option<EnuReference>,
}

#[derive(Debug, Clone, Copy)]
struct EnuReference {
    ecef: Vector3<f64>,
    /// Rotation taking ECEF deltas into the east/north/up frame
    rotation: Matrix3<f64>,
}

impl GeoProjector {
    /// Create a projector with the given antenna mounting.
    pub fn new(antenna: AntennaConfig) -> Self {
        Self {
            antenna,
            reference: None,
        }
    }

    /// Whether the tangent point has been pinned yet.
    pub fn has_reference(&self) -> bool {
        self.reference.is_some()
    }

    /// Convert one fix to a local-frame observation.
    ///
    /// The returned pose is the *body* pose: the antenna lever arm has
    /// been removed using the fix heading. `heading_valid` is carried
    /// through from the fix; callers may force-invalidate it afterwards.
    pub fn convert(&mut self, fix: &GnssFix) -> Option<GnssObservation> {
        let lat = fix.lat_lon_alt.x;
        let lon = fix.lat_lon_alt.y;
        let alt = fix.lat_lon_alt.z;

        if !lat.is_finite() || !lon.is_finite() || !alt.is_finite() {
            return None;
        }
        if lat.abs() > 90.0 || lon.abs() > 180.0 {
            return None;
        }

        let ecef = ECEF::from(WGS84::from_degrees_and_meters(lat, lon, alt));
        let ecef = Vector3::new(ecef.x(), ecef.y(), ecef.z());

        let reference = *self
            .reference
            .get_or_insert_with(|| EnuReference::new(lat, lon, ecef));
        let antenna_enu = reference.rotation * (ecef - reference.ecef);

        // Antenna pose in the world: ENU position plus heading-as-yaw.
        let yaw = if fix.heading_valid {
            compass_to_yaw(fix.heading_deg)
        } else {
            0.0
        };
        let world_from_antenna = LocalPose::new(so3::yaw_rotation(yaw), antenna_enu);

        // Antenna pose in the body frame, from the mounting survey.
        let body_from_antenna = LocalPose::new(
            so3::yaw_rotation(self.antenna.yaw_deg * DEG2RAD),
            Vector3::new(self.antenna.offset.x, self.antenna.offset.y, 0.0),
        );

        // world_from_body = world_from_antenna * inverse(body_from_antenna)
        let rotation = world_from_antenna.rotation * body_from_antenna.rotation.inverse();
        let translation =
            world_from_antenna.translation - rotation * body_from_antenna.translation;

        Some(GnssObservation::new(
            fix.unix_time,
            LocalPose::new(rotation, translation),
            fix.heading_valid,
        ))
    }
}

impl EnuReference {
    fn new(lat_deg: f64, lon_deg: f64, ecef: Vector3<f64>) -> Self {
        let lat = lat_deg * DEG2RAD;
        let lon = lon_deg * DEG2RAD;
        let (sin_lat, cos_lat) = lat.sin_cos();
        let (sin_lon, cos_lon) = lon.sin_cos();
        // Rows: east, north, up unit vectors expressed in ECEF.
        let rotation = Matrix3::new(
            -sin_lon, cos_lon, 0.0, //
            -sin_lat * cos_lon, -sin_lat * sin_lon, cos_lat, //
            cos_lat * cos_lon, cos_lat * sin_lon, sin_lat,
        );
        Self { ecef, rotation }
    }
}

/// Yaw angle of a local pose, in radians.
#[inline]
pub fn pose_yaw(pose: &LocalPose) -> f64 {
    let m = pose.rotation.matrix();
    m[(1, 0)].atan2(m[(0, 0)])
}

/// Force the heading of an observation invalid, keeping the pose.
#[inline]
pub fn invalidate_heading(obs: &GnssObservation) -> GnssObservation {
    GnssObservation {
        heading_valid: false,
        ..*obs
    }
}
