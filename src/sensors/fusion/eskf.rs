//! 18-state error-state Kalman filter for GNSS/INS fusion.
//!
//! The filter keeps a nominal state (position, velocity, attitude,
//! gyro/accel biases, gravity) on its manifold and propagates an
//! 18-dimensional error state with covariance through an IMU-driven
//! prediction and GNSS-derived updates. After every update the error is
//! folded into the nominal state and zeroed.
//!
//! # State layout
//!
//! The error vector and covariance follow the fixed block order
//! `[δp(3) | δv(3) | δθ(3) | δbg(3) | δba(3) | δg(3)]`, with the
//! attitude error applied on the right: `R ← R · Exp(δθ)`.
//!
//! # Update modes
//!
//! - [`Eskf::observe_gps`]: full pose (position + heading) from a
//!   converted GNSS fix. Roll/pitch components of the rotation residual
//!   are zeroed, so GNSS attitude acts as a heading-only observation.
//! - [`Eskf::observe_position_only`]: position block only. Used while
//!   the vehicle is turning, when the GNSS course lags the true yaw.
//!
//! # References
//!
//! - Solà, J. "Quaternion kinematics for the error-state Kalman filter"

use nalgebra::{Matrix3, Rotation3, SMatrix, SVector, Vector3};
use serde::{Deserialize, Serialize};

use crate::core::math::DEG2RAD;
use crate::core::so3;
use crate::core::types::{GnssObservation, ImuSample, LocalPose, NavState};
use crate::sensors::install::InstallCompensator;

type Vec18 = SVector<f64, 18>;
type Mat18 = SMatrix<f64, 18, 18>;
type Mat6 = SMatrix<f64, 6, 6>;

/// Filter configuration.
///
/// The `*_var` entries are discrete-time variances placed directly on
/// the process-noise diagonal; the `gnss_*_noise` entries are standard
/// deviations, squared when the observation noise is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EskfOptions {
    /// Nominal IMU sampling interval in seconds; gates the predict step
    /// (gaps above `5 * imu_dt` reset the clock without integrating)
    pub imu_dt: f64,
    /// Gyro measurement variance ((rad/s)²) on the attitude block of Q
    pub gyro_var: f64,
    /// Accelerometer measurement variance ((m/s²)²) on the velocity block of Q
    pub acce_var: f64,
    /// Gyro bias random-walk variance
    pub bias_gyro_var: f64,
    /// Accelerometer bias random-walk variance
    pub bias_acce_var: f64,

    /// GNSS horizontal position noise, meters (standard deviation)
    pub gnss_pos_noise: f64,
    /// GNSS height noise, meters (standard deviation)
    pub gnss_height_noise: f64,
    /// GNSS heading noise, radians (standard deviation)
    pub gnss_ang_noise: f64,

    /// Device install roll, radians
    pub phone_roll_install: f64,
    /// Device install pitch, radians
    pub phone_pitch_install: f64,
    /// Device install heading, radians
    pub phone_heading_install: f64,

    /// Add `fixed_time_delay` to every IMU timestamp before prediction
    pub enable_time_compensation: bool,
    /// Fixed delay of the IMU pipeline behind GNSS, seconds
    pub fixed_time_delay: f64,

    /// Whether updates may adjust the gyro bias
    pub update_bias_gyro: bool,
    /// Whether updates may adjust the accelerometer bias
    pub update_bias_acce: bool,
}

impl Default for EskfOptions {
    fn default() -> Self {
        Self {
            imu_dt: 0.04,
            gyro_var: 1e-5,
            acce_var: 1e-2,
            bias_gyro_var: 1e-6,
            bias_acce_var: 1e-4,
            gnss_pos_noise: 5.0,
            gnss_height_noise: 1.0,
            gnss_ang_noise: 1.0 * DEG2RAD,
            phone_roll_install: 0.0,
            phone_pitch_install: 0.0,
            phone_heading_install: 0.0,
            enable_time_compensation: false,
            fixed_time_delay: 0.2,
            update_bias_gyro: true,
            update_bias_acce: true,
        }
    }
}

/// Outcome of one predict call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictOutcome {
    /// Nominal state and covariance advanced to the sample time
    Integrated,
    /// Sample older than the filter clock; nothing changed
    SkippedStale,
    /// Gap above `5 * imu_dt`; clock advanced without integrating
    GapReset,
}

impl PredictOutcome {
    /// Whether the state was actually integrated.
    #[inline]
    pub fn is_integrated(&self) -> bool {
        matches!(self, PredictOutcome::Integrated)
    }
}

/// Error-state Kalman filter fusing IMU and GNSS in a local planar frame.
#[derive(Debug, Clone)]
pub struct Eskf {
    options: EskfOptions,
    install: InstallCompensator,

    current_time: f64,

    // Nominal state
    p: Vector3<f64>,
    v: Vector3<f64>,
    rotation: Rotation3<f64>,
    bg: Vector3<f64>,
    ba: Vector3<f64>,
    g: Vector3<f64>,

    // Error state, zero outside of an update
    dx: Vec18,

    cov: Mat18,
    q: Mat18,
    gnss_noise: Mat6,
    gnss_pos_noise: Matrix3<f64>,

    first_gnss: bool,
}

impl Eskf {
    /// Create a filter with zero biases at the origin.
    pub fn new(options: EskfOptions) -> Self {
        let mut eskf = Self {
            install: InstallCompensator::identity(),
            options: EskfOptions::default(),
            current_time: 0.0,
            p: Vector3::zeros(),
            v: Vector3::zeros(),
            rotation: Rotation3::identity(),
            bg: Vector3::zeros(),
            ba: Vector3::zeros(),
            g: Vector3::new(0.0, 0.0, -9.8),
            dx: Vec18::zeros(),
            cov: Mat18::identity(),
            q: Mat18::zeros(),
            gnss_noise: Mat6::zeros(),
            gnss_pos_noise: Matrix3::zeros(),
            first_gnss: true,
        };
        eskf.rebuild(options);
        eskf
    }

    /// Set initial conditions: noise configuration, biases and gravity.
    ///
    /// Resets the covariance to `1e-4 * I` and rebuilds the noise
    /// matrices and install rotation. Calling twice with identical
    /// arguments leaves the filter in an identical state.
    pub fn set_initial(
        &mut self,
        options: EskfOptions,
        init_bg: Vector3<f64>,
        init_ba: Vector3<f64>,
        gravity: Vector3<f64>,
    ) {
        debug_assert!(init_bg.iter().all(|x| x.is_finite()));
        debug_assert!(init_ba.iter().all(|x| x.is_finite()));
        debug_assert!((8.0..=12.0).contains(&gravity.norm()));
        self.rebuild(options);
        self.bg = init_bg;
        self.ba = init_ba;
        self.g = gravity;
        self.cov = Mat18::identity() * 1e-4;
    }

    fn rebuild(&mut self, options: EskfOptions) {
        let ev = options.acce_var;
        let et = options.gyro_var;
        let eg = options.bias_gyro_var;
        let ea = options.bias_acce_var;

        // Process noise: zero on the position and gravity blocks.
        let mut q = Mat18::zeros();
        for i in 0..3 {
            q[(3 + i, 3 + i)] = ev;
            q[(6 + i, 6 + i)] = et;
            q[(9 + i, 9 + i)] = eg;
            q[(12 + i, 12 + i)] = ea;
        }
        self.q = q;

        // GNSS observation noise carries variances on the diagonal.
        let gp2 = options.gnss_pos_noise * options.gnss_pos_noise;
        let gh2 = options.gnss_height_noise * options.gnss_height_noise;
        let ga2 = options.gnss_ang_noise * options.gnss_ang_noise;
        let mut v6 = Mat6::zeros();
        v6[(0, 0)] = gp2;
        v6[(1, 1)] = gp2;
        v6[(2, 2)] = gh2;
        v6[(3, 3)] = ga2;
        v6[(4, 4)] = ga2;
        v6[(5, 5)] = ga2;
        self.gnss_noise = v6;
        self.gnss_pos_noise = Matrix3::from_diagonal(&Vector3::new(gp2, gp2, gh2));

        self.install = InstallCompensator::from_euler(
            options.phone_roll_install,
            options.phone_pitch_install,
            options.phone_heading_install,
        );
        self.options = options;
    }

    /// Advance the filter with one IMU sample.
    ///
    /// The sample is first rotated into the body frame by the install
    /// compensator; when time compensation is enabled the configured
    /// delay is added to its timestamp. Stale samples (`dt < 0`) are
    /// skipped; gaps above `5 * imu_dt` advance the clock only.
    pub fn predict(&mut self, imu: &ImuSample) -> PredictOutcome {
        let mut sample = self.install.apply(imu);
        if self.options.enable_time_compensation {
            sample.t += self.options.fixed_time_delay;
        }

        let dt = sample.t - self.current_time;
        if dt < 0.0 {
            log::info!("skipping early imu sample: dt = {:.4}", dt);
            return PredictOutcome::SkippedStale;
        }
        if dt > 5.0 * self.options.imu_dt {
            log::info!("imu gap of {:.3}s, resetting integration clock", dt);
            self.current_time = sample.t;
            return PredictOutcome::GapReset;
        }

        let accel = sample.accel - self.ba;
        let gyro = sample.gyro - self.bg;

        // Nominal state integration.
        let r_accel = self.rotation * accel;
        self.p += self.v * dt + 0.5 * r_accel * dt * dt + 0.5 * self.g * dt * dt;
        self.v += r_accel * dt + self.g * dt;
        self.rotation *= so3::exp(&(gyro * dt));

        // Error-state transition, identity plus the sparse blocks.
        let mut f = Mat18::identity();
        let eye_dt = Matrix3::identity() * dt;
        f.fixed_view_mut::<3, 3>(0, 3).copy_from(&eye_dt);
        f.fixed_view_mut::<3, 3>(3, 6)
            .copy_from(&(-self.rotation.matrix() * so3::hat(&accel) * dt));
        f.fixed_view_mut::<3, 3>(3, 12)
            .copy_from(&(-self.rotation.matrix() * dt));
        f.fixed_view_mut::<3, 3>(3, 15).copy_from(&eye_dt);
        f.fixed_view_mut::<3, 3>(6, 6)
            .copy_from(so3::exp(&(-gyro * dt)).matrix());
        f.fixed_view_mut::<3, 3>(6, 9).copy_from(&(-eye_dt));

        // dx is zero between updates, so only the covariance moves.
        self.cov = f * self.cov * f.transpose() + self.q;
        self.current_time = sample.t;
        PredictOutcome::Integrated
    }

    /// Full-pose update from a converted GNSS observation.
    ///
    /// The first observation bypasses the filter and initializes the
    /// pose directly. Afterwards the fix must carry a valid heading;
    /// fixes without one are skipped with a warning. Returns whether
    /// the observation was consumed.
    pub fn observe_gps(&mut self, obs: &GnssObservation) -> bool {
        if self.first_gnss {
            self.initialize_from(obs);
            return true;
        }
        if !obs.heading_valid {
            log::warn!("gnss heading invalid, skipping pose update");
            return false;
        }
        let noise = self.gnss_noise;
        self.update_pose(&obs.pose, &noise);
        true
    }

    /// Position-only update from a converted GNSS observation.
    ///
    /// Same first-observation bypass as [`Eskf::observe_gps`]; later
    /// observations touch only the position block, leaving heading to
    /// the gyro.
    pub fn observe_position_only(&mut self, obs: &GnssObservation) -> bool {
        if self.first_gnss {
            self.initialize_from(obs);
            return true;
        }
        let noise = self.gnss_pos_noise;
        self.update_position(&obs.pose.translation, &noise);
        true
    }

    /// SE(3) update with explicit noise standard deviations.
    ///
    /// Roll and pitch components of the rotation residual are zeroed
    /// before the gain is applied: the observation's attitude is
    /// trusted for heading only.
    pub fn observe_se3(&mut self, pose: &LocalPose, trans_noise: f64, ang_noise: f64) {
        let t2 = trans_noise * trans_noise;
        let a2 = ang_noise * ang_noise;
        let mut noise = Mat6::zeros();
        for i in 0..3 {
            noise[(i, i)] = t2;
            noise[(3 + i, 3 + i)] = a2;
        }
        self.update_pose(pose, &noise);
    }

    /// Position-only update with an explicit noise standard deviation.
    pub fn observe_position(&mut self, pose: &LocalPose, trans_noise: f64) {
        let t2 = trans_noise * trans_noise;
        self.update_position(&pose.translation, &(Matrix3::identity() * t2));
    }

    fn initialize_from(&mut self, obs: &GnssObservation) {
        if obs.heading_valid {
            self.rotation = obs.pose.rotation;
            log::info!(
                "initial heading from gnss: {:.2} deg",
                crate::core::math::RAD2DEG * self.current_heading()
            );
        } else {
            // Without a heading there is nothing to anchor yaw to.
            self.rotation = Rotation3::identity();
            log::info!("first gnss fix has no heading, starting at identity attitude");
        }
        self.p = obs.pose.translation;
        self.current_time = obs.time;
        self.first_gnss = false;
    }

    fn update_pose(&mut self, pose: &LocalPose, noise: &Mat6) {
        // H picks the position and attitude blocks.
        let mut h = SMatrix::<f64, 6, 18>::zeros();
        h.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&Matrix3::identity());
        h.fixed_view_mut::<3, 3>(3, 6)
            .copy_from(&Matrix3::identity());

        let s = h * self.cov * h.transpose() + noise;
        let s_inv = match s.try_inverse() {
            Some(inv) => inv,
            None => {
                log::error!("pose innovation covariance not invertible, dropping update");
                return;
            }
        };
        let k = self.cov * h.transpose() * s_inv;

        let mut innov = SVector::<f64, 6>::zeros();
        innov
            .fixed_rows_mut::<3>(0)
            .copy_from(&(pose.translation - self.p));
        innov
            .fixed_rows_mut::<3>(3)
            .copy_from(&so3::log(&(self.rotation.inverse() * pose.rotation)));
        // GNSS attitude is heading-only: drop roll and pitch residuals.
        innov[3] = 0.0;
        innov[4] = 0.0;

        self.dx = k * innov;
        self.cov = (Mat18::identity() - k * h) * self.cov;
        self.update_and_reset();
    }

    fn update_position(&mut self, translation: &Vector3<f64>, noise: &Matrix3<f64>) {
        let mut h = SMatrix::<f64, 3, 18>::zeros();
        h.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&Matrix3::identity());

        let s = h * self.cov * h.transpose() + noise;
        let s_inv = match s.try_inverse() {
            Some(inv) => inv,
            None => {
                log::error!("position innovation covariance not invertible, dropping update");
                return;
            }
        };
        let k = self.cov * h.transpose() * s_inv;

        let innov = translation - self.p;
        self.dx = k * innov;
        self.cov = (Mat18::identity() - k * h) * self.cov;
        self.update_and_reset();
    }

    /// Fold the error state into the nominal state, project the
    /// covariance around the new attitude and zero the error.
    fn update_and_reset(&mut self) {
        self.p += self.dx.fixed_rows::<3>(0).into_owned();
        self.v += self.dx.fixed_rows::<3>(3).into_owned();
        let dtheta = self.dx.fixed_rows::<3>(6).into_owned();
        self.rotation *= so3::exp(&dtheta);

        if self.options.update_bias_gyro {
            self.bg += self.dx.fixed_rows::<3>(9).into_owned();
        }
        if self.options.update_bias_acce {
            self.ba += self.dx.fixed_rows::<3>(12).into_owned();
        }
        self.g += self.dx.fixed_rows::<3>(15).into_owned();

        self.project_cov(&dtheta);
        // Keep P numerically symmetric after the gain application.
        self.cov = 0.5 * (self.cov + self.cov.transpose());
        self.dx = Vec18::zeros();
    }

    /// Covariance projection after the attitude reset: the attitude
    /// block is re-linearized around the corrected rotation.
    fn project_cov(&mut self, dtheta: &Vector3<f64>) {
        let mut j = Mat18::identity();
        j.fixed_view_mut::<3, 3>(6, 6)
            .copy_from(&(Matrix3::identity() - 0.5 * so3::hat(dtheta)));
        self.cov = j * self.cov * j.transpose();
    }

    /// Snapshot of the nominal state.
    pub fn nominal(&self) -> NavState {
        NavState {
            t: self.current_time,
            p: self.p,
            v: self.v,
            rotation: self.rotation,
            bg: self.bg,
            ba: self.ba,
            g: self.g,
        }
    }

    /// Body pose in the local frame.
    pub fn nominal_pose(&self) -> LocalPose {
        LocalPose::new(self.rotation, self.p)
    }

    /// Overwrite the nominal state (for replays and tests).
    pub fn set_state(&mut self, state: &NavState) {
        self.current_time = state.t;
        self.p = state.p;
        self.v = state.v;
        self.rotation = state.rotation;
        self.bg = state.bg;
        self.ba = state.ba;
        self.g = state.g;
    }

    /// Overwrite the covariance.
    pub fn set_cov(&mut self, cov: Mat18) {
        self.cov = cov;
    }

    /// Gravity estimate.
    pub fn gravity(&self) -> Vector3<f64> {
        self.g
    }

    /// Filter clock (last integrated timestamp).
    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    /// Whether the first GNSS fix is still pending.
    pub fn awaiting_first_gnss(&self) -> bool {
        self.first_gnss
    }

    /// Yaw of the nominal attitude, radians.
    pub fn current_heading(&self) -> f64 {
        let m = self.rotation.matrix();
        m[(1, 0)].atan2(m[(0, 0)])
    }

    /// Signed cross-track component of a position residual.
    ///
    /// East/north residual components rotated by the current heading;
    /// positive to the right of the direction of travel.
    pub fn lateral_residual(&self, residual: &Vector3<f64>) -> f64 {
        let heading = self.current_heading();
        residual.x * heading.cos() - residual.y * heading.sin()
    }

    /// Diagonal of the error covariance, in state order.
    pub fn covariance_diagonal(&self) -> [f64; 18] {
        let mut diag = [0.0; 18];
        for (i, d) in diag.iter_mut().enumerate() {
            *d = self.cov[(i, i)];
        }
        diag
    }

    /// Full error covariance.
    pub fn covariance(&self) -> &Mat18 {
        &self.cov
    }

    /// Effective time compensation currently applied to IMU timestamps.
    pub fn time_compensation(&self) -> f64 {
        if self.options.enable_time_compensation {
            self.options.fixed_time_delay
        } else {
            0.0
        }
    }

    /// Enable or disable the fixed IMU time delay at runtime.
    pub fn set_time_compensation(&mut self, enable: bool, delay: f64) {
        self.options.enable_time_compensation = enable;
        self.options.fixed_time_delay = delay;
        log::info!(
            "time compensation {}, delay = {:.3}s",
            if enable { "enabled" } else { "disabled" },
            delay
        );
    }

    /// Active options.
    pub fn options(&self) -> &EskfOptions {
        &self.options
    }

    #[cfg(test)]
    pub(crate) fn error_state(&self) -> &Vec18 {
        &self.dx
    }
}
