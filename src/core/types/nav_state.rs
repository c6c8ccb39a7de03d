//! Nominal navigation state.

use nalgebra::{Rotation3, UnitQuaternion, Vector3};

/// Full nominal state of the navigation filter.
///
/// Position, velocity and gravity are expressed in the local planar
/// frame (east, north, up); the rotation maps body to world. The biases
/// are the current online estimates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NavState {
    /// Timestamp in seconds
    pub t: f64,
    /// Position in meters
    pub p: Vector3<f64>,
    /// Velocity in m/s
    pub v: Vector3<f64>,
    /// Body-to-world rotation
    pub rotation: Rotation3<f64>,
    /// Gyroscope bias in rad/s
    pub bg: Vector3<f64>,
    /// Accelerometer bias in m/s²
    pub ba: Vector3<f64>,
    /// Gravity vector in m/s²
    pub g: Vector3<f64>,
}

impl NavState {
    /// State at the origin with identity attitude and default gravity.
    pub fn new(t: f64) -> Self {
        Self {
            t,
            p: Vector3::zeros(),
            v: Vector3::zeros(),
            rotation: Rotation3::identity(),
            bg: Vector3::zeros(),
            ba: Vector3::zeros(),
            g: Vector3::new(0.0, 0.0, -9.8),
        }
    }

    /// Attitude as a unit quaternion (w, x, y, z ordering on access).
    #[inline]
    pub fn quaternion(&self) -> UnitQuaternion<f64> {
        UnitQuaternion::from_rotation_matrix(&self.rotation)
    }

    /// Ground speed in m/s.
    #[inline]
    pub fn speed(&self) -> f64 {
        self.v.norm()
    }
}

impl Default for NavState {
    fn default() -> Self {
        Self::new(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_state() {
        let state = NavState::default();
        assert_eq!(state.t, 0.0);
        assert_eq!(state.p, Vector3::zeros());
        assert_relative_eq!(state.g.z, -9.8);
    }

    #[test]
    fn test_quaternion_of_identity() {
        let state = NavState::default();
        let q = state.quaternion();
        assert_relative_eq!(q.w, 1.0, epsilon = 1e-12);
        assert_relative_eq!(q.i, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_speed() {
        let mut state = NavState::default();
        state.v = Vector3::new(3.0, 4.0, 0.0);
        assert_relative_eq!(state.speed(), 5.0);
    }
}
