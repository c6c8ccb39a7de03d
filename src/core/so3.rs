//! SO(3) primitives: hat operator, exponential and logarithm maps.
//!
//! Rotations are kept on the manifold as [`Rotation3`]; tangent-space
//! vectors are plain [`Vector3`]. Composition, inverse and matrix access
//! come from `nalgebra` itself, so this module only provides the maps
//! between the group and its tangent space.

use nalgebra::{Matrix3, Rotation3, Vector3};

/// Angle below which the Rodrigues formula switches to its Taylor
/// expansion. Small enough that the second-order series is exact to
/// machine precision, large enough to stay clear of 0/0.
const SMALL_ANGLE: f64 = 1e-4;

/// Skew-symmetric (hat) matrix of a 3-vector.
///
/// `hat(v) * w == v.cross(&w)` for all `w`.
#[inline]
pub fn hat(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -v.z, v.y, //
        v.z, 0.0, -v.x, //
        -v.y, v.x, 0.0,
    )
}

/// Exponential map: rotation vector (axis * angle, radians) to rotation.
///
/// Uses the Rodrigues formula; below [`SMALL_ANGLE`] the second-order
/// Taylor expansion `I + K + K²/2` is used instead, which makes
/// `exp(0)` return the identity exactly.
pub fn exp(omega: &Vector3<f64>) -> Rotation3<f64> {
    let angle = omega.norm();
    let k = hat(omega);
    let m = if angle < SMALL_ANGLE {
        Matrix3::identity() + k + 0.5 * (k * k)
    } else {
        let k_unit = k / angle;
        Matrix3::identity() + angle.sin() * k_unit + (1.0 - angle.cos()) * (k_unit * k_unit)
    };
    Rotation3::from_matrix_unchecked(m)
}

/// Logarithm map: rotation to rotation vector (axis * angle).
///
/// Valid for rotation angles strictly below pi; the small-angle branch
/// keeps `log(identity)` exactly zero.
pub fn log(r: &Rotation3<f64>) -> Vector3<f64> {
    let m = r.matrix();
    let trace = m[(0, 0)] + m[(1, 1)] + m[(2, 2)];
    let theta = if trace > 3.0 - 1e-6 {
        0.0
    } else {
        (0.5 * (trace - 1.0)).clamp(-1.0, 1.0).acos()
    };
    let k = Vector3::new(
        m[(2, 1)] - m[(1, 2)],
        m[(0, 2)] - m[(2, 0)],
        m[(1, 0)] - m[(0, 1)],
    );
    if theta.abs() < 1e-3 {
        0.5 * k
    } else {
        0.5 * theta / theta.sin() * k
    }
}

/// Rotation about the world z axis (ENU yaw).
#[inline]
pub fn yaw_rotation(yaw_rad: f64) -> Rotation3<f64> {
    Rotation3::from_axis_angle(&Vector3::z_axis(), yaw_rad)
}
