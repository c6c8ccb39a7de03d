//! Event pipeline: feed time-ordered sensor events into the filter.
//!
//! Two modes share one contract:
//!
//! - **Offline**: all events are loaded, a configured GNSS time offset
//!   is applied, the events are stably sorted by timestamp and replayed.
//!   A first pass over the GNSS headings runs turn detection so the
//!   replay can route fixes inside turn intervals to the position-only
//!   update.
//! - **Online**: events are pushed as they arrive. GNSS fixes whose
//!   timestamp is still ahead of the filter clock wait in a bounded FIFO
//!   and are drained as soon as prediction catches up, so every applied
//!   observation satisfies `filter.t >= observation.t`.
//!
//! Either way the pipeline owns the coordinate projector, the map
//! origin, the turn table and the report sinks; the filter itself never
//! blocks.

use std::collections::VecDeque;

use nalgebra::Vector3;

use crate::algorithms::turning::{TurnConfig, TurnDetector, TurnTable};
use crate::core::types::{GnssFix, GnssObservation, ImuSample, NavState, OdomSample};
use crate::error::Result;
use crate::io::reader::Misalignment;
use crate::io::report::ReportSinks;
use crate::sensors::fusion::Eskf;
use crate::sensors::geo::GeoProjector;

/// One input event, in the order the source delivered it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Event {
    /// IMU sample
    Imu(ImuSample),
    /// GNSS fix
    Gnss(GnssFix),
    /// Wheel speed sample (parsed, not fused)
    Odom(OdomSample),
    /// Recorder misalignment estimate (diagnostic)
    Misalignment(Misalignment),
}

impl Event {
    /// Timestamp of the event in seconds.
    pub fn timestamp(&self) -> f64 {
        match self {
            Event::Imu(imu) => imu.t,
            Event::Gnss(fix) => fix.unix_time,
            Event::Odom(odom) => odom.t,
            Event::Misalignment(m) => m.t,
        }
    }

    /// Whether this is an IMU sample.
    pub fn is_imu(&self) -> bool {
        matches!(self, Event::Imu(_))
    }

    /// Whether this is a GNSS fix.
    pub fn is_gnss(&self) -> bool {
        matches!(self, Event::Gnss(_))
    }
}

/// Pipeline tuning.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Constant offset added to every GNSS timestamp, seconds
    pub gnss_time_offset: f64,
    /// Fixes older than this relative to the filter clock are dropped
    pub stale_gnss_max_age: f64,
    /// Capacity of the online pending-GNSS queue
    pub pending_queue_cap: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            gnss_time_offset: 0.0,
            stale_gnss_max_age: 5.0,
            pending_queue_cap: 256,
        }
    }
}

/// Counters reported after a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Predict calls that integrated the state
    pub imu_integrated: u64,
    /// IMU samples skipped (stale or gap)
    pub imu_skipped: u64,
    /// GNSS observations applied (including the initializing fix)
    pub gnss_applied: u64,
    /// GNSS fixes dropped (stale, conversion failure, invalid heading)
    pub gnss_dropped: u64,
    /// GNSS observations routed to the position-only update
    pub gnss_position_only: u64,
}

/// Shared fusion state driven by both pipeline modes.
struct FusionCore {
    eskf: Eskf,
    projector: GeoProjector,
    turns: TurnTable,
    config: PipelineConfig,
    origin: Option<Vector3<f64>>,
    last_gps: Option<Vector3<f64>>,
    summary: RunSummary,
}

impl FusionCore {
    fn new(
        eskf: Eskf,
        projector: GeoProjector,
        turns: TurnTable,
        config: PipelineConfig,
    ) -> Self {
        Self {
            eskf,
            projector,
            turns,
            config,
            origin: None,
            last_gps: None,
            summary: RunSummary::default(),
        }
    }

    /// Integrate one IMU sample, writing state and covariance lines on
    /// success. Prediction only starts once the first fix has anchored
    /// the filter.
    fn handle_imu(&mut self, imu: &ImuSample, sinks: &mut ReportSinks) -> Result<bool> {
        if self.eskf.awaiting_first_gnss() {
            return Ok(false);
        }
        if self.eskf.predict(imu).is_integrated() {
            self.summary.imu_integrated += 1;
            let state = self.eskf.nominal();
            sinks.state.append(&state, self.last_gps.as_ref())?;
            sinks
                .covariance
                .append(state.t, &self.eskf.covariance_diagonal())?;
            Ok(true)
        } else {
            self.summary.imu_skipped += 1;
            Ok(false)
        }
    }

    /// Convert a fix into a local observation, dropping stale or
    /// unconvertible fixes and subtracting the map origin. The caller
    /// has already applied the GNSS time offset.
    fn convert(&mut self, fix: &GnssFix) -> Option<GnssObservation> {
        if !self.eskf.awaiting_first_gnss()
            && fix.unix_time < self.eskf.current_time() - self.config.stale_gnss_max_age
        {
            log::warn!(
                "dropping stale gnss fix: {:.3}s behind the filter",
                self.eskf.current_time() - fix.unix_time
            );
            self.summary.gnss_dropped += 1;
            return None;
        }

        let mut obs = match self.projector.convert(fix) {
            Some(obs) => obs,
            None => {
                log::warn!("gnss conversion failed, dropping fix");
                self.summary.gnss_dropped += 1;
                return None;
            }
        };

        let origin = *self.origin.get_or_insert_with(|| {
            log::info!(
                "map origin set to first fix: ({:.3}, {:.3}, {:.3})",
                obs.pose.translation.x,
                obs.pose.translation.y,
                obs.pose.translation.z
            );
            obs.pose.translation
        });
        obs.pose.translation -= origin;
        Some(obs)
    }

    /// Apply a converted observation, routing by the turn table, and
    /// write the residual and state lines.
    fn apply(&mut self, obs: &GnssObservation, sinks: &mut ReportSinks) -> Result<bool> {
        let initialized = !self.eskf.awaiting_first_gnss();
        if initialized {
            let residual = obs.pose.translation - self.eskf.nominal().p;
            sinks.residuals.append(
                obs.time,
                self.eskf.lateral_residual(&residual),
                self.eskf.current_heading(),
                self.eskf.nominal().speed(),
                &residual,
            )?;
        }

        let applied = if self.turns.contains(obs.time) {
            self.summary.gnss_position_only += 1;
            self.eskf.observe_position_only(obs)
        } else {
            self.eskf.observe_gps(obs)
        };

        if applied {
            self.summary.gnss_applied += 1;
            self.last_gps = Some(obs.pose.translation);
            sinks
                .state
                .append(&self.eskf.nominal(), self.last_gps.as_ref())?;
        } else {
            self.summary.gnss_dropped += 1;
        }
        Ok(applied)
    }
}

/// Offline replay over a pre-collected event list.
pub struct OfflineRunner {
    core: FusionCore,
    turn_config: TurnConfig,
    sinks: ReportSinks,
}

impl OfflineRunner {
    /// Create a runner. The turn table is built internally from the
    /// GNSS headings during [`OfflineRunner::run`].
    pub fn new(
        eskf: Eskf,
        projector: GeoProjector,
        config: PipelineConfig,
        turn_config: TurnConfig,
        sinks: ReportSinks,
    ) -> Self {
        Self {
            core: FusionCore::new(eskf, projector, TurnTable::empty(), config),
            turn_config,
            sinks,
        }
    }

    /// Replay all events in timestamp order and return the counters.
    pub fn run(&mut self, mut events: Vec<Event>) -> Result<RunSummary> {
        // The GNSS offset must be applied before the global sort.
        for event in events.iter_mut() {
            if let Event::Gnss(fix) = event {
                fix.unix_time += self.core.config.gnss_time_offset;
            }
        }

        events.sort_by(|a, b| {
            a.timestamp()
                .partial_cmp(&b.timestamp())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        // Pass 1: turn detection over the GNSS heading series.
        let mut detector = TurnDetector::new(self.turn_config.clone());
        for event in &events {
            if let Event::Gnss(fix) = event {
                if fix.heading_valid {
                    detector.add_heading(fix.unix_time, fix.heading_deg);
                }
            }
        }
        detector.finalize();
        self.sinks
            .write_turns(detector.segments(), detector.config())?;
        self.core.turns = TurnTable::new(detector.segments().to_vec());

        // Pass 2: replay through the filter.
        for event in &events {
            match event {
                Event::Imu(imu) => {
                    self.core.handle_imu(imu, &mut self.sinks)?;
                }
                Event::Gnss(fix) => {
                    if let Some(obs) = self.core.convert(fix) {
                        self.core.apply(&obs, &mut self.sinks)?;
                    }
                }
                Event::Odom(_) => {
                    // Wheel speed is not fused by this filter.
                }
                Event::Misalignment(m) => {
                    log::info!(
                        "recorder misalignment at {:.3}: pitch {:.2} deg, heading {:.2} deg",
                        m.t,
                        m.pitch_deg,
                        m.heading_deg
                    );
                }
            }
        }

        self.sinks.flush()?;
        log::info!(
            "offline replay done: {} imu integrated, {} gnss applied ({} position-only), {} gnss dropped",
            self.core.summary.imu_integrated,
            self.core.summary.gnss_applied,
            self.core.summary.gnss_position_only,
            self.core.summary.gnss_dropped
        );
        Ok(self.core.summary)
    }

    /// Current nominal state (for inspection mid-run in tests).
    pub fn nominal(&self) -> NavState {
        self.core.eskf.nominal()
    }
}

/// Online event loop: push events as the sources deliver them.
///
/// GNSS fixes ahead of the filter clock wait in a bounded FIFO; each
/// accepted IMU sample drains every queued fix whose timestamp the
/// filter has passed. This keeps observations applied exactly once and
/// in time order even when the GNSS stream runs ahead of the IMU.
pub struct OnlinePipeline {
    core: FusionCore,
    pending: VecDeque<GnssObservation>,
    sinks: ReportSinks,
}

impl OnlinePipeline {
    /// Create a pipeline. Turn segments, if any are known up front,
    /// route fixes to the position-only update.
    pub fn new(
        eskf: Eskf,
        projector: GeoProjector,
        config: PipelineConfig,
        turns: TurnTable,
        sinks: ReportSinks,
    ) -> Self {
        Self {
            core: FusionCore::new(eskf, projector, turns, config),
            pending: VecDeque::new(),
            sinks,
        }
    }

    /// Feed one IMU sample, then apply any queued fix the filter clock
    /// has caught up with.
    pub fn on_imu(&mut self, imu: &ImuSample) -> Result<()> {
        self.core.handle_imu(imu, &mut self.sinks)?;
        while let Some(head) = self.pending.front() {
            if head.time > self.core.eskf.current_time() {
                break;
            }
            let obs = self.pending.pop_front().expect("front checked above");
            self.core.apply(&obs, &mut self.sinks)?;
        }
        Ok(())
    }

    /// Feed one GNSS fix: apply it now if the filter has reached its
    /// timestamp, otherwise queue it until the IMU catches up.
    pub fn on_gnss(&mut self, fix: &GnssFix) -> Result<()> {
        let mut fix = *fix;
        fix.unix_time += self.core.config.gnss_time_offset;
        let obs = match self.core.convert(&fix) {
            Some(obs) => obs,
            None => return Ok(()),
        };

        if self.core.eskf.awaiting_first_gnss() || obs.time <= self.core.eskf.current_time() {
            self.core.apply(&obs, &mut self.sinks)?;
            return Ok(());
        }

        if self.pending.len() >= self.core.config.pending_queue_cap {
            log::warn!(
                "pending gnss queue full ({}), dropping oldest fix",
                self.pending.len()
            );
            self.pending.pop_front();
            self.core.summary.gnss_dropped += 1;
        }
        self.pending.push_back(obs);
        Ok(())
    }

    /// Feed one wheel-speed sample. Parsed for interface completeness;
    /// this filter does not fuse it.
    pub fn on_odom(&mut self, _odom: &OdomSample) {}

    /// Number of fixes currently waiting for the IMU to catch up.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Current nominal state.
    pub fn nominal(&self) -> NavState {
        self.core.eskf.nominal()
    }

    /// Flush sinks and return the counters.
    pub fn finish(mut self) -> Result<RunSummary> {
        if !self.pending.is_empty() {
            log::warn!(
                "{} gnss fixes still pending at end of stream",
                self.pending.len()
            );
        }
        self.sinks.flush()?;
        Ok(self.core.summary)
    }
}
