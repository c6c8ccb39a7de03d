//! Turn detection from a heading time series.
//!
//! GNSS course measurements lag the true vehicle yaw during sharp turns
//! (the antenna baseline needs time to swing around), so the fusion
//! pipeline suppresses heading observations inside detected turn
//! intervals. The detector works on a time-ordered sequence of
//! (timestamp, compass heading) pairs: consecutive headings become turn
//! rates, the rates are smoothed with a centered moving average, and a
//! three-state machine accumulates angle until a turn either commits or
//! is discarded.

use serde::{Deserialize, Serialize};

use crate::core::math::{heading_diff, normalize_heading};

/// Turn direction, by sign of the smoothed rate.
///
/// Compass headings grow clockwise, so a positive heading rate is a
/// right turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnDirection {
    /// Negative heading change (counter-clockwise)
    Left,
    /// Positive heading change (clockwise)
    Right,
}

impl TurnDirection {
    fn from_rate(rate: f64) -> Self {
        if rate > 0.0 {
            TurnDirection::Right
        } else {
            TurnDirection::Left
        }
    }

    fn matches(&self, rate: f64) -> bool {
        match self {
            TurnDirection::Right => rate > 0.0,
            TurnDirection::Left => rate < 0.0,
        }
    }
}

impl std::fmt::Display for TurnDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TurnDirection::Left => write!(f, "left"),
            TurnDirection::Right => write!(f, "right"),
        }
    }
}

/// One committed turn interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TurnSegment {
    /// Start timestamp in seconds
    pub start_time: f64,
    /// End timestamp in seconds
    pub end_time: f64,
    /// Accumulated heading change, degrees (always positive)
    pub total_angle: f64,
    /// Mean absolute turn rate over the segment, deg/s
    pub mean_rate: f64,
    /// Turn direction
    pub direction: TurnDirection,
}

impl TurnSegment {
    /// Segment duration in seconds.
    #[inline]
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// Whether a timestamp falls inside this segment.
    #[inline]
    pub fn contains(&self, t: f64) -> bool {
        t >= self.start_time && t <= self.end_time
    }
}

/// Detector thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnConfig {
    /// Smoothed rate that opens a candidate turn, deg/s
    pub start_rate_threshold: f64,
    /// Smoothed rate below which the turn is considered ending, deg/s
    pub end_rate_threshold: f64,
    /// How long the rate must stay below the end threshold, seconds
    pub end_duration: f64,
    /// Minimum accumulated angle for a commit, degrees
    pub min_accumulated_angle: f64,
    /// Moving-average window over the rate series, samples
    pub smoothing_window: usize,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            start_rate_threshold: 3.0,
            end_rate_threshold: 1.5,
            end_duration: 3.0,
            min_accumulated_angle: 30.0,
            smoothing_window: 5,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RatePoint {
    t: f64,
    rate: f64,
}

/// Offline turn detector.
///
/// Collect heading samples with [`TurnDetector::add_heading`], then call
/// [`TurnDetector::finalize`] once to run detection over the whole
/// series.
#[derive(Debug)]
pub struct TurnDetector {
    config: TurnConfig,
    headings: Vec<(f64, f64)>,
    segments: Vec<TurnSegment>,
    finalized: bool,
}

impl TurnDetector {
    /// Create a detector with the given thresholds.
    pub fn new(config: TurnConfig) -> Self {
        Self {
            config,
            headings: Vec::new(),
            segments: Vec::new(),
            finalized: false,
        }
    }

    /// Add one heading sample. Heading is normalized to [0, 360).
    pub fn add_heading(&mut self, timestamp: f64, heading_deg: f64) {
        if self.finalized {
            log::warn!("turn detector already finalized, dropping heading sample");
            return;
        }
        self.headings.push((timestamp, normalize_heading(heading_deg)));
    }

    /// Run detection over all collected samples and return the segments.
    pub fn finalize(&mut self) -> &[TurnSegment] {
        if self.finalized {
            return &self.segments;
        }
        self.finalized = true;

        if self.headings.len() < 2 {
            log::warn!(
                "not enough heading samples for turn detection: {}",
                self.headings.len()
            );
            return &self.segments;
        }

        self.headings
            .sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let rates = self.turn_rates();
        let smoothed = self.smooth(&rates);
        self.segments = self.detect(&smoothed);
        log::info!("turn detection found {} segments", self.segments.len());
        &self.segments
    }

    /// Detected segments (empty before [`TurnDetector::finalize`]).
    pub fn segments(&self) -> &[TurnSegment] {
        &self.segments
    }

    /// Active thresholds.
    pub fn config(&self) -> &TurnConfig {
        &self.config
    }

    /// Per-sample turn rates from consecutive heading pairs. Pairs with
    /// a non-increasing timestamp are dropped.
    fn turn_rates(&self) -> Vec<RatePoint> {
        let mut rates = Vec::with_capacity(self.headings.len().saturating_sub(1));
        for pair in self.headings.windows(2) {
            let (t0, h0) = pair[0];
            let (t1, h1) = pair[1];
            let dt = t1 - t0;
            if dt <= 0.0 {
                continue;
            }
            rates.push(RatePoint {
                t: t1,
                rate: heading_diff(h0, h1) / dt,
            });
        }
        rates
    }

    /// Centered moving average, window clipped at the boundaries.
    fn smooth(&self, rates: &[RatePoint]) -> Vec<RatePoint> {
        let window = self.config.smoothing_window;
        if rates.len() < window {
            return rates.to_vec();
        }
        let half = window / 2;
        rates
            .iter()
            .enumerate()
            .map(|(i, point)| {
                let start = i.saturating_sub(half);
                let end = (i + half + 1).min(rates.len());
                let sum: f64 = rates[start..end].iter().map(|r| r.rate).sum();
                RatePoint {
                    t: point.t,
                    rate: sum / (end - start) as f64,
                }
            })
            .collect()
    }

    fn detect(&self, smoothed: &[RatePoint]) -> Vec<TurnSegment> {
        let cfg = &self.config;
        let mut segments = Vec::new();

        let mut in_turn = false;
        let mut in_end_timing = false;
        let mut start_idx = 0usize;
        let mut accumulated = 0.0f64;
        let mut rate_log: Vec<f64> = Vec::new();
        let mut direction = TurnDirection::Left;
        let mut end_timing_start = 0.0f64;

        for (i, point) in smoothed.iter().enumerate() {
            let abs_rate = point.rate.abs();

            if !in_turn {
                if abs_rate > cfg.start_rate_threshold {
                    in_turn = true;
                    in_end_timing = false;
                    start_idx = i;
                    accumulated = 0.0;
                    rate_log.clear();
                    rate_log.push(point.rate);
                    direction = TurnDirection::from_rate(point.rate);
                }
                continue;
            }

            if !in_end_timing {
                if abs_rate > cfg.end_rate_threshold {
                    if i > 0 {
                        let dt = point.t - smoothed[i - 1].t;
                        let angle_change = point.rate * dt;
                        if direction.matches(point.rate) {
                            accumulated += angle_change.abs();
                        } else if abs_rate > cfg.start_rate_threshold {
                            // Clear reversal: commit what we have (if it
                            // qualifies) and restart in the new direction.
                            if accumulated >= cfg.min_accumulated_angle {
                                segments.push(Self::record(
                                    smoothed,
                                    start_idx,
                                    i - 1,
                                    accumulated,
                                    &rate_log,
                                    direction,
                                ));
                            }
                            start_idx = i;
                            accumulated = angle_change.abs();
                            rate_log.clear();
                            direction = TurnDirection::from_rate(point.rate);
                        }
                    }
                    rate_log.push(point.rate);
                } else {
                    in_end_timing = true;
                    end_timing_start = point.t;
                }
            } else if abs_rate <= cfg.end_rate_threshold {
                if point.t - end_timing_start >= cfg.end_duration {
                    if accumulated >= cfg.min_accumulated_angle {
                        segments.push(Self::record(
                            smoothed,
                            start_idx,
                            i,
                            accumulated,
                            &rate_log,
                            direction,
                        ));
                    } else {
                        log::info!(
                            "discarding turn at {:.1}s, accumulated only {:.1} deg",
                            point.t,
                            accumulated
                        );
                    }
                    in_turn = false;
                    in_end_timing = false;
                }
            } else {
                // Rate picked back up before the end timer ran out.
                in_end_timing = false;
                if i > 0 {
                    let dt = point.t - smoothed[i - 1].t;
                    if direction.matches(point.rate) {
                        accumulated += (point.rate * dt).abs();
                    }
                }
                rate_log.push(point.rate);
            }
        }

        // A turn still open at end of stream commits if it qualifies.
        if in_turn && !smoothed.is_empty() && accumulated >= cfg.min_accumulated_angle {
            segments.push(Self::record(
                smoothed,
                start_idx,
                smoothed.len() - 1,
                accumulated,
                &rate_log,
                direction,
            ));
        }

        segments
    }

    fn record(
        smoothed: &[RatePoint],
        start_idx: usize,
        end_idx: usize,
        accumulated: f64,
        rate_log: &[f64],
        direction: TurnDirection,
    ) -> TurnSegment {
        let mean_rate = if rate_log.is_empty() {
            0.0
        } else {
            rate_log.iter().map(|r| r.abs()).sum::<f64>() / rate_log.len() as f64
        };
        let segment = TurnSegment {
            start_time: smoothed[start_idx].t,
            end_time: smoothed[end_idx].t,
            total_angle: accumulated,
            mean_rate,
            direction,
        };
        log::info!(
            "turn segment: {:.1}s - {:.1}s ({:.1}s, {}, {:.1} deg, {:.2} deg/s)",
            segment.start_time,
            segment.end_time,
            segment.duration(),
            segment.direction,
            segment.total_angle,
            segment.mean_rate
        );
        segment
    }
}

/// Interval lookup over committed turn segments.
#[derive(Debug, Clone, Default)]
pub struct TurnTable {
    segments: Vec<TurnSegment>,
}

impl TurnTable {
    /// Build a table from detected segments.
    pub fn new(mut segments: Vec<TurnSegment>) -> Self {
        segments.sort_by(|a, b| {
            a.start_time
                .partial_cmp(&b.start_time)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Self { segments }
    }

    /// Empty table: no observation is ever routed to position-only.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether the timestamp falls inside any turn segment.
    pub fn contains(&self, t: f64) -> bool {
        // Segments are few; a linear scan with early exit is enough.
        for segment in &self.segments {
            if segment.start_time > t {
                return false;
            }
            if segment.contains(t) {
                return true;
            }
        }
        false
    }

    /// The underlying segments, sorted by start time.
    pub fn segments(&self) -> &[TurnSegment] {
        &self.segments
    }
}
