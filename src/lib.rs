//! MargaNav - GNSS/INS integrated navigation for ground vehicles.
//!
//! Fuses phone-grade inertial data with RTK-GNSS fixes through an
//! 18-state error-state Kalman filter, producing a smooth 6-DoF
//! navigation state with online bias and gravity estimates.
//!
//! # Architecture
//!
//! The crate is organized into 4 logical layers:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                      io/                            │  ← Infrastructure
//! │          (reader, pipeline, report sinks)           │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                  algorithms/                        │  ← Trajectory analysis
//! │                  (turn detection)                   │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                   sensors/                          │  ← Sensor processing
//! │          (install, geo projection, eskf)            │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                     core/                           │  ← Foundation
//! │                 (types, so3, math)                  │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Data flow
//!
//! Raw log records become [`ImuSample`] and [`GnssFix`] events. The
//! [`GeoProjector`] maps fixes into a local east/north/up frame and
//! removes the antenna lever arm; the [`InstallCompensator`] rotates IMU
//! readings from the device frame into the vehicle body frame. The
//! [`Eskf`] consumes both streams in timestamp order, driven by either
//! the offline replay or the online reorder pipeline. The
//! [`TurnDetector`] classifies turning intervals from the GNSS heading
//! series so the pipeline can fall back to position-only updates while
//! the GNSS course lags the true yaw.

// ============================================================================
// Layer 1: Core foundation (no internal deps)
// ============================================================================
pub mod core;

// ============================================================================
// Layer 2: Sensor processing (depends on core)
// ============================================================================
pub mod sensors;

// ============================================================================
// Layer 3: Algorithms (depends on core)
// ============================================================================
pub mod algorithms;

// ============================================================================
// Layer 4: I/O infrastructure (depends on all layers)
// ============================================================================
pub mod io;

// Crate-wide configuration and errors
pub mod config;
pub mod error;

// ============================================================================
// Convenience re-exports (flat namespace for common use)
// ============================================================================

// Core types
pub use crate::core::math;
pub use crate::core::so3;
pub use crate::core::types::{GnssFix, GnssObservation, ImuSample, LocalPose, NavState, OdomSample};

// Sensors
pub use crate::sensors::fusion::{Eskf, EskfOptions, PredictOutcome};
pub use crate::sensors::geo::{AntennaConfig, GeoProjector};
pub use crate::sensors::install::InstallCompensator;

// Algorithms
pub use crate::algorithms::turning::{
    TurnConfig, TurnDetector, TurnDirection, TurnSegment, TurnTable,
};

// I/O
pub use crate::io::pipeline::{Event, OfflineRunner, OnlinePipeline, PipelineConfig, RunSummary};
pub use crate::io::reader::{read_events, LogReader, Misalignment};
pub use crate::io::report::{CovarianceWriter, ReportSinks, ResidualWriter, StateWriter};

// Configuration and errors
pub use crate::config::MargaConfig;
pub use crate::error::{MargaError, Result};
