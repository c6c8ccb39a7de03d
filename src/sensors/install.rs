//! Phone-install compensation.
//!
//! A handheld device is mounted in an arbitrary pose, so raw IMU axes do
//! not line up with the vehicle's forward/right/up. A fixed rotation,
//! built once from three install Euler angles, maps every reading from
//! the device frame into the body frame before integration.

use nalgebra::Matrix3;

use crate::core::types::ImuSample;

/// Fixed device-to-body rotation applied to every IMU sample.
#[derive(Debug, Clone)]
pub struct InstallCompensator {
    c_phone_to_body: Matrix3<f64>,
}

impl InstallCompensator {
    /// Build the compensator from install angles in radians.
    ///
    /// The body-to-device matrix is the product of the three factor
    /// rotations below; its transpose maps device readings into the
    /// body frame.
    pub fn from_euler(roll: f64, pitch: f64, heading: f64) -> Self {
        let c1 = Matrix3::new(
            roll.cos(), 0.0, -roll.sin(), //
            0.0, 1.0, 0.0, //
            roll.sin(), 0.0, roll.cos(),
        );
        let c2 = Matrix3::new(
            1.0, 0.0, 0.0, //
            0.0, pitch.cos(), pitch.sin(), //
            0.0, -pitch.sin(), pitch.cos(),
        );
        let c3 = Matrix3::new(
            heading.cos(), -heading.sin(), 0.0, //
            heading.sin(), heading.cos(), 0.0, //
            0.0, 0.0, 1.0,
        );
        let cnb = c1 * c2 * c3;
        Self {
            c_phone_to_body: cnb.transpose(),
        }
    }

    /// Identity compensator (device axes already aligned with the body).
    pub fn identity() -> Self {
        Self {
            c_phone_to_body: Matrix3::identity(),
        }
    }

    /// Rotate one sample's gyro and accelerometer into the body frame.
    pub fn apply(&self, imu: &ImuSample) -> ImuSample {
        ImuSample {
            t: imu.t,
            gyro: self.c_phone_to_body * imu.gyro,
            accel: self.c_phone_to_body * imu.accel,
        }
    }

    /// The device-to-body rotation matrix.
    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.c_phone_to_body
    }
}
