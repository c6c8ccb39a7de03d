//! Inertial measurement sample.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// One IMU sample: angular rate and specific force at a common instant.
///
/// Timestamps are Unix seconds; the gyro is in rad/s and the
/// accelerometer in m/s², both in the device frame as delivered by the
/// sensor (the install compensator rotates them into the body frame).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImuSample {
    /// Timestamp in seconds
    pub t: f64,
    /// Angular rate in rad/s
    pub gyro: Vector3<f64>,
    /// Specific force in m/s²
    pub accel: Vector3<f64>,
}

impl ImuSample {
    /// Create a new IMU sample.
    #[inline]
    pub fn new(t: f64, gyro: Vector3<f64>, accel: Vector3<f64>) -> Self {
        Self { t, gyro, accel }
    }
}

/// Wheel speed sample. Parsed from logs for completeness; the fusion
/// core ignores it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OdomSample {
    /// Timestamp in seconds
    pub t: f64,
    /// Left wheel pulse count
    pub left_pulse: f64,
    /// Right wheel pulse count
    pub right_pulse: f64,
}

impl OdomSample {
    /// Create a new wheel speed sample.
    #[inline]
    pub fn new(t: f64, left_pulse: f64, right_pulse: f64) -> Self {
        Self {
            t,
            left_pulse,
            right_pulse,
        }
    }
}
