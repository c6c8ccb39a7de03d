//! Configuration loading for MargaNav.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::algorithms::turning::TurnConfig;
use crate::error::{MargaError, Result};
use crate::io::pipeline::PipelineConfig;
use crate::sensors::fusion::EskfOptions;
use crate::sensors::geo::AntennaConfig;

/// Main configuration structure, loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MargaConfig {
    /// RTK antenna mounting
    pub antenna: AntennaSection,
    /// Filter noise and install options
    pub filter: EskfOptions,
    /// Initial biases and gravity
    pub init: InitSection,
    /// Turn-detector thresholds
    pub turning: TurnConfig,
    /// Event pipeline tuning
    pub pipeline: PipelineConfig,
    /// Output settings
    pub output: OutputSection,
}

/// Antenna mounting parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AntennaSection {
    /// Installation yaw misalignment of the antenna baseline (degrees)
    pub angle_deg: f64,
    /// Antenna offset in the body frame, x (meters)
    pub offset_x: f64,
    /// Antenna offset in the body frame, y (meters)
    pub offset_y: f64,
}

impl Default for AntennaSection {
    fn default() -> Self {
        Self {
            angle_deg: 12.06,
            offset_x: -0.17,
            offset_y: -0.20,
        }
    }
}

impl AntennaSection {
    /// Convert to the projector's antenna configuration.
    pub fn to_antenna_config(&self) -> AntennaConfig {
        AntennaConfig {
            offset: nalgebra::Vector2::new(self.offset_x, self.offset_y),
            yaw_deg: self.angle_deg,
        }
    }
}

/// Initial filter state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InitSection {
    /// Initial gyro bias, rad/s
    pub gyro_bias: [f64; 3],
    /// Initial accelerometer bias, m/s²
    pub accel_bias: [f64; 3],
    /// Initial gravity vector, m/s²
    pub gravity: [f64; 3],
}

impl Default for InitSection {
    fn default() -> Self {
        Self {
            gyro_bias: [0.0; 3],
            accel_bias: [0.0; 3],
            gravity: [0.0, 0.0, -9.8],
        }
    }
}

/// Output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    /// Directory receiving the report files
    pub dir: String,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            dir: "output".to_string(),
        }
    }
}

impl MargaConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| MargaError::Config(format!("failed to read config file: {}", e)))?;
        let config: MargaConfig = toml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_config() {
        let config = MargaConfig::default();
        assert_relative_eq!(config.antenna.angle_deg, 12.06);
        assert_relative_eq!(config.filter.imu_dt, 0.04);
        assert_relative_eq!(config.turning.start_rate_threshold, 3.0);
        assert_eq!(config.pipeline.pending_queue_cap, 256);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: MargaConfig = toml::from_str(
            r#"
            [filter]
            gyro_var = 2e-3
            acce_var = 5e-2

            [antenna]
            angle_deg = 10.0

            [pipeline]
            gnss_time_offset = 0.45
            "#,
        )
        .unwrap();
        assert_relative_eq!(config.filter.gyro_var, 2e-3);
        assert_relative_eq!(config.filter.bias_gyro_var, 1e-6);
        assert_relative_eq!(config.antenna.angle_deg, 10.0);
        assert_relative_eq!(config.antenna.offset_x, -0.17);
        assert_relative_eq!(config.pipeline.gnss_time_offset, 0.45);
        assert_relative_eq!(config.init.gravity[2], -9.8);
    }

    #[test]
    fn test_antenna_conversion() {
        let section = AntennaSection::default();
        let antenna = section.to_antenna_config();
        assert_relative_eq!(antenna.offset.x, -0.17);
        assert_relative_eq!(antenna.yaw_deg, 12.06);
    }
}
