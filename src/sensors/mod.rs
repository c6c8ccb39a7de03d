//! Sensor preprocessing and fusion.
//!
//! # Components
//!
//! - [`install::InstallCompensator`]: rotate raw IMU readings from the
//!   device frame into the vehicle body frame
//! - [`geo::GeoProjector`]: project WGS84 fixes into the local planar
//!   frame and remove the antenna lever arm
//! - [`fusion::Eskf`]: the 18-state error-state Kalman filter

pub mod fusion;
pub mod geo;
pub mod install;
